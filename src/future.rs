use crate::{
    connection::Connection,
    replies::{decode_response, XReply},
    sequence::{compare_sequence_ids, ResponseCallback, ResponseSlot, SequenceNumber, SlotState},
    transport::RawResponse,
    xerror::XError,
};
use std::{fmt, marker::PhantomData};

#[derive(Debug)]
struct PendingRequest {
    name: &'static str,
    sequence: SequenceNumber,
    slot: ResponseSlot,
}

/// Handle to the response of a single request.
///
/// The response is consumed exactly once: by [`Future::sync`], by the callback given to
/// [`Future::on_response`], or, if the handle is dropped, by a default handler that logs the
/// error of a failed request.
#[must_use = "dropping a future logs the error of the request, if there is one"]
pub struct Future<R: XReply> {
    conn: Connection,
    request: Option<PendingRequest>,
    _reply: PhantomData<fn() -> R>,
}

impl<R: XReply> fmt::Debug for Future<R> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Future")
            .field("request", &self.request)
            .finish()
    }
}

impl<R: XReply> Future<R> {
    pub(crate) fn new(
        conn: Connection,
        name: &'static str,
        sequence: SequenceNumber,
        slot: ResponseSlot,
    ) -> Self {
        Self {
            conn,
            request: Some(PendingRequest {
                name,
                sequence,
                slot,
            }),
            _reply: PhantomData,
        }
    }

    /// Future of a request that was never sent, resolves to an empty response
    pub(crate) fn empty(conn: Connection) -> Self {
        Self {
            conn,
            request: None,
            _reply: PhantomData,
        }
    }

    pub fn sequence(&self) -> Option<SequenceNumber> {
        self.request.as_ref().map(|request| request.sequence)
    }

    /// Block until the server answered the request.
    ///
    /// If the connection fails first, the response has neither reply nor error.
    pub fn sync(mut self) -> R::Response {
        let request = match self.request.take() {
            Some(request) => request,
            None => return R::into_response(None, None),
        };

        let raw = match request.slot.replace(SlotState::Done) {
            SlotState::Arrived(raw) => raw,
            SlotState::Waiting => {
                if !R::HAS_REPLY {
                    self.round_trip_void(request.sequence);
                }
                self.conn.wait_for_response(request.sequence)
            }
            state => {
                debug_assert!(false, "{} resolved twice: {:?}", request.name, state);
                request.slot.replace(state);
                RawResponse::empty()
            }
        };
        decode_response::<R>(raw)
    }

    /// Resolve the request from the dispatch loop by calling `callback`
    pub fn on_response<F>(mut self, callback: F)
    where
        F: FnOnce(R::Response) + 'static,
    {
        match self.request.take() {
            Some(request) => {
                let callback: ResponseCallback =
                    Box::new(move |raw| callback(decode_response::<R>(raw)));
                self.install(request, callback);
            }
            None => callback(R::into_response(None, None)),
        }
    }

    /// Resolve the request without looking at the response, errors included
    pub fn ignore_error(mut self) {
        if let Some(request) = self.request.take() {
            self.install(request, Box::new(|_| {}));
        }
    }

    fn install(&self, request: PendingRequest, callback: ResponseCallback) {
        match request.slot.replace(SlotState::Done) {
            SlotState::Waiting => {
                request.slot.replace(SlotState::Callback(callback));
            }
            SlotState::Arrived(raw) => self.conn.defer(callback, raw),
            state => {
                debug_assert!(false, "{} resolved twice: {:?}", request.name, state);
                request.slot.replace(state);
            }
        }
    }

    /// Requests without a reply only get a response if they fail, so make sure the server got
    /// past the request before waiting on it
    fn round_trip_void(&self, sequence: SequenceNumber) {
        let last_processed = self.conn.last_request_processed();
        if compare_sequence_ids(sequence, last_processed) <= 0 {
            return;
        }
        if let Err(err) = self.conn.sync() {
            tracing::warn!("Could not synchronize with the server: {}", err);
        }
    }
}

impl<R: XReply> Drop for Future<R> {
    fn drop(&mut self) {
        if let Some(request) = self.request.take() {
            let name = request.name;
            self.install(request, Box::new(move |raw| log_unhandled_error(name, raw)));
        }
    }
}

fn log_unhandled_error(name: &'static str, raw: RawResponse) {
    if let Some(raw) = raw.error {
        match XError::from_raw(&raw) {
            Ok(error) => tracing::error!("Unhandled X error in {}: {}", name, error),
            Err(err) => tracing::warn!("Could not decode X error of {}: {}", name, err),
        }
    }
}
