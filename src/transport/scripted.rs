//! In-memory transport whose server side is driven by hand.
//!
//! Everything sent through it is recorded, and replies, errors, events, the "last request
//! processed" counter and connection failures are scripted by the owner. Blocking waits never
//! block: waiting on a request the script has not answered yet marks it as processed.

use crate::{
    error::Error,
    sequence::{compare_sequence_ids, SequenceNumber},
    transport::{RawError, RawEvent, RawResponse, RequestFlags, Transport},
};
use parking_lot::Mutex;
use std::{
    collections::{HashMap, VecDeque},
    os::unix::io::{AsRawFd, OwnedFd, RawFd},
    sync::Arc,
};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SentRequest {
    pub sequence: SequenceNumber,
    pub bytes: Vec<u8>,
    pub flags: RequestFlags,
}

/// Order in which data was handed to the transport
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WireItem {
    Fds(Vec<RawFd>),
    Request(SequenceNumber),
}

type Responder = Box<dyn Fn(&SentRequest) -> Option<RawResponse> + Send + Sync>;

#[derive(Default)]
struct ScriptState {
    last_sequence: u64,
    sent: Vec<SentRequest>,
    wire: Vec<WireItem>,
    responses: HashMap<u64, RawResponse>,
    events: VecDeque<RawEvent>,
    last_processed: u64,
    closed: bool,
    flushes: usize,
    responder: Option<Responder>,
}

impl ScriptState {
    fn record_request(&mut self, request: &[u8], flags: RequestFlags) -> SequenceNumber {
        self.last_sequence += 1;
        let sent = SentRequest {
            sequence: SequenceNumber::new(self.last_sequence),
            bytes: request.to_vec(),
            flags,
        };
        if let Some(response) = self.responder.as_ref().and_then(|respond| respond(&sent)) {
            self.responses.insert(self.last_sequence, response);
        }
        self.wire.push(WireItem::Request(sent.sequence));
        self.sent.push(sent);
        SequenceNumber::new(self.last_sequence)
    }

    fn is_processed(&self, sequence: SequenceNumber) -> bool {
        compare_sequence_ids(sequence, self.last_processed) <= 0
    }
}

#[derive(Clone, Default)]
pub struct ScriptedTransport {
    state: Arc<Mutex<ScriptState>>,
    atomic_fd_send: bool,
}

impl ScriptedTransport {
    pub fn new() -> Self {
        Self::default()
    }

    /// Transport that can send file descriptors and request bytes as one unit
    pub fn with_atomic_fd_send() -> Self {
        Self {
            atomic_fd_send: true,
            ..Self::default()
        }
    }

    /// Answer requests as soon as they are sent
    pub fn set_responder(
        &self,
        responder: impl Fn(&SentRequest) -> Option<RawResponse> + Send + Sync + 'static,
    ) {
        self.state.lock().responder = Some(Box::new(responder));
    }

    pub fn set_reply(&self, sequence: u64, bytes: Vec<u8>) {
        self.state
            .lock()
            .responses
            .insert(sequence, RawResponse::reply(bytes));
    }

    pub fn set_error(&self, sequence: u64, error: RawError) {
        self.state
            .lock()
            .responses
            .insert(sequence, RawResponse::error(error));
    }

    pub fn push_event(&self, event: RawEvent) {
        self.state.lock().events.push_back(event);
    }

    pub fn set_last_processed(&self, sequence: u64) {
        self.state.lock().last_processed = sequence;
    }

    /// Pretend the server processed everything sent so far
    pub fn process_all(&self) {
        let mut state = self.state.lock();
        state.last_processed = state.last_sequence;
    }

    /// Simulate the server going away
    pub fn close(&self) {
        self.state.lock().closed = true;
    }

    pub fn last_sequence(&self) -> u64 {
        self.state.lock().last_sequence
    }

    pub fn sent_requests(&self) -> Vec<SentRequest> {
        self.state.lock().sent.clone()
    }

    pub fn wire_log(&self) -> Vec<WireItem> {
        self.state.lock().wire.clone()
    }

    pub fn flush_count(&self) -> usize {
        self.state.lock().flushes
    }

    pub fn pending_events(&self) -> usize {
        self.state.lock().events.len()
    }

    fn record_fds(state: &mut ScriptState, fds: Vec<OwnedFd>) {
        let raw = fds.iter().map(|fd| fd.as_raw_fd()).collect();
        state.wire.push(WireItem::Fds(raw));
    }
}

impl Transport for ScriptedTransport {
    fn send_request(&self, request: &[u8], flags: RequestFlags) -> Result<SequenceNumber, Error> {
        let mut state = self.state.lock();
        if state.closed {
            return Err(Error::ConnectionClosed);
        }
        Ok(state.record_request(request, flags))
    }

    fn send_fds(&self, fds: Vec<OwnedFd>) -> Result<(), Error> {
        {
            let mut state = self.state.lock();
            if state.closed {
                return Err(Error::ConnectionClosed);
            }
            Self::record_fds(&mut state, fds);
        }
        // Give other senders a chance to sneak in between fds and request bytes
        std::thread::yield_now();
        Ok(())
    }

    fn supports_atomic_fd_send(&self) -> bool {
        self.atomic_fd_send
    }

    fn send_request_with_fds(
        &self,
        request: &[u8],
        fds: Vec<OwnedFd>,
        flags: RequestFlags,
    ) -> Result<SequenceNumber, Error> {
        if !self.atomic_fd_send {
            return Err(Error::AtomicFdSendUnsupported);
        }
        let mut state = self.state.lock();
        if state.closed {
            return Err(Error::ConnectionClosed);
        }
        Self::record_fds(&mut state, fds);
        Ok(state.record_request(request, flags))
    }

    fn flush(&self) -> Result<(), Error> {
        let mut state = self.state.lock();
        if state.closed {
            return Err(Error::ConnectionClosed);
        }
        state.flushes += 1;
        Ok(())
    }

    fn poll_for_event(&self) -> Result<Option<RawEvent>, Error> {
        let mut state = self.state.lock();
        if state.closed {
            return Err(Error::ConnectionClosed);
        }
        Ok(state.events.pop_front())
    }

    fn poll_for_reply(&self, sequence: SequenceNumber) -> Result<Option<RawResponse>, Error> {
        let mut state = self.state.lock();
        if state.closed {
            return Err(Error::ConnectionClosed);
        }
        if !state.is_processed(sequence) {
            return Ok(None);
        }
        Ok(Some(
            state
                .responses
                .remove(&sequence.value())
                .unwrap_or_default(),
        ))
    }

    fn wait_for_reply(&self, sequence: SequenceNumber) -> Result<RawResponse, Error> {
        let mut state = self.state.lock();
        if state.closed {
            return Err(Error::ConnectionClosed);
        }
        if !state.is_processed(sequence) {
            state.last_processed = sequence.value();
        }
        Ok(state
            .responses
            .remove(&sequence.value())
            .unwrap_or_default())
    }

    fn last_request_processed(&self) -> SequenceNumber {
        SequenceNumber::new(self.state.lock().last_processed)
    }

    fn has_error(&self) -> bool {
        self.state.lock().closed
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn replies_only_visible_after_processing() {
        let transport = ScriptedTransport::new();
        let seq = transport
            .send_request(&[43, 0, 1, 0], RequestFlags::checked(true))
            .unwrap();
        transport.set_reply(seq.value(), vec![1; 32]);

        assert_eq!(transport.poll_for_reply(seq).unwrap(), None);

        transport.process_all();
        let response = transport.poll_for_reply(seq).unwrap().unwrap();
        assert_eq!(response.reply.unwrap().bytes, vec![1; 32]);
    }

    #[test]
    fn closed_transport_reports_error() {
        let transport = ScriptedTransport::new();
        transport.close();
        assert!(transport.has_error());
        assert!(matches!(
            transport.send_request(&[127, 0, 1, 0], RequestFlags::checked(false)),
            Err(Error::ConnectionClosed)
        ));
    }
}
