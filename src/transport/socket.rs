use crate::{
    error::Error,
    sequence::SequenceNumber,
    setup::{
        additional_setup_length, InitializeConnection, Setup, SetupResponse, SETUP_HEADER_SIZE,
    },
    transport::{
        RawError, RawEvent, RawReply, RawResponse, RequestFlags, Transport, GENERIC_EVENT,
        RESPONSE_HEADER_SIZE, X_ERROR, X_REPLY,
    },
    utils::display_maybe_utf8,
    wire::{FromLeBytes, ReadBuffer, ToLeBytes, WriteBuffer},
    xauth::XAuth,
};
use nix::{
    errno::Errno,
    poll::{poll, PollFd, PollFlags},
    sys::socket::{sendmsg, ControlMessage, MsgFlags, UnixAddr},
};
use parking_lot::{Mutex, MutexGuard};
use std::{
    collections::{BTreeMap, HashMap, VecDeque},
    fmt::Display,
    io::{self, IoSlice, Read, Write},
    os::unix::{
        io::{AsRawFd, OwnedFd, RawFd},
        net::UnixStream,
    },
    str::FromStr,
    sync::atomic::{AtomicBool, Ordering},
};

// Arbitrarly chosen
const FILL_BUFF_SIZE: usize = 0x1000;

/// Queued request bytes are written out once they grow past this
const AUTO_FLUSH_SIZE: usize = 0x4000;

/// Event code of `KeymapNotify`, the only event without a sequence number
const KEYMAP_NOTIFY: u8 = 11;

/// `GetInputFocus`, used to force a response after requests that have none
const SYNC_REQUEST: [u8; 4] = [43, 0, 1, 0];

/// Responses only carry 16 bits of the sequence number, so a reply must be produced at least
/// this often for the full number to be recoverable
const MAX_REQUESTS_WITHOUT_REPLY: u64 = 0xfffe;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DisplayVar {
    pub hostname: String,
    pub display_sequence: u32,
    pub screen: Option<u32>,
}

impl FromStr for DisplayVar {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (hostname, s) = s.split_once(':').ok_or(Error::InvalidDisplayEnv)?;
        let parse = |n: &str| n.parse::<u32>().map_err(|_| Error::InvalidDisplayEnv);
        let (display_sequence, screen) = match s.split_once('.') {
            Some((display_sequence, screen)) => (parse(display_sequence)?, Some(parse(screen)?)),
            None => (parse(s)?, None),
        };

        Ok(Self {
            hostname: hostname.to_string(),
            display_sequence,
            screen,
        })
    }
}

impl Display for DisplayVar {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}", self.hostname, self.display_sequence)?;
        if let Some(screen) = self.screen {
            write!(f, ".{}", screen)?;
        }
        Ok(())
    }
}

impl DisplayVar {
    /// Read and parse `$DISPLAY` environment variable
    pub fn from_env() -> Result<Self, Error> {
        let var = "DISPLAY";
        let value = std::env::var(var).map_err(|_| Error::NoEnv(var))?;
        Self::from_str(&value)
    }

    pub fn socket_path(&self) -> String {
        format!("/tmp/.X11-unix/X{}", self.display_sequence)
    }
}

#[derive(Default)]
struct WriteState {
    out: Vec<u8>,
    /// Sent with the first chunk of `out` that goes out
    fds: Vec<OwnedFd>,
    last_sequence: u64,
    /// Last request that the server answers with a reply
    last_reply_request: u64,
}

#[derive(Debug, Clone, Copy)]
struct PendingRequest {
    flags: RequestFlags,
    /// Sync sent by the transport itself, its reply is thrown away
    internal: bool,
}

struct ReadState {
    read_buf: VecDeque<u8>,

    /// Shared temporary buffer used to read data from the socket before pushing them to
    /// `read_buf`
    fill_buf: Box<[u8]>,

    events: VecDeque<RawEvent>,
    responses: HashMap<u64, RawResponse>,

    /// Sequence of the last response read, responses come in request order
    last_read: u64,
}

/// Transport over the local unix socket of an X server
pub struct SocketTransport {
    stream: UnixStream,
    write: Mutex<WriteState>,
    /// Requests sent but not yet known to be processed. Locked after `write` and `read`.
    pending: Mutex<BTreeMap<u64, PendingRequest>>,
    read: Mutex<ReadState>,
    error: AtomicBool,
}

impl SocketTransport {
    /// Connect and authenticate to the display from `$DISPLAY`
    pub fn open() -> Result<(Self, Setup), Error> {
        Self::connect(&DisplayVar::from_env()?)
    }

    pub fn connect(display: &DisplayVar) -> Result<(Self, Setup), Error> {
        if !display.hostname.is_empty() {
            return Err(Error::CouldNotConnectTo(display.to_string()));
        }

        let socket_path = display.socket_path();
        let stream = UnixStream::connect(&socket_path)
            .map_err(|err| Error::CouldNotOpenUnixSocket(socket_path, err))?;

        let auth = match XAuth::from_env() {
            Ok(entries) => XAuth::for_display(entries, display.display_sequence),
            Err(err) => {
                tracing::debug!("Connecting without authorization: {}", err);
                None
            }
        };
        let setup = Self::handshake(&stream, auth)?;
        let display_var = display;
        tracing::debug!(
            display = %display_var,
            release = setup.release_number,
            screens = setup.screens.len(),
            "Connected to X server"
        );

        Ok((Self::from_stream(stream)?, setup))
    }

    fn handshake(mut stream: &UnixStream, auth: Option<XAuth>) -> Result<Setup, Error> {
        let (name, data) = auth.map_or((Vec::new(), Vec::new()), |auth| (auth.name, auth.data));
        let init = InitializeConnection {
            authorization_protocol_name: name,
            authorization_protocol_data: data,
        };
        let mut w = WriteBuffer::new();
        init.to_le_bytes(&mut w);
        stream.write_all(w.bytes())?;

        let mut header = [0u8; SETUP_HEADER_SIZE];
        stream.read_exact(&mut header)?;
        let mut raw = header.to_vec();
        raw.resize(SETUP_HEADER_SIZE + additional_setup_length(&header), 0);
        stream.read_exact(&mut raw[SETUP_HEADER_SIZE..])?;

        match SetupResponse::from_le_bytes(&mut ReadBuffer::new(&raw))? {
            SetupResponse::Success(setup) => Ok(setup),
            SetupResponse::Refused(refused) => Err(Error::CouldNotOpenDisplay(refused)),
            SetupResponse::Authenticate(reason) => {
                Err(Error::AuthenticationRequired(display_maybe_utf8(&reason)))
            }
        }
    }

    /// Wrap a socket that already completed the connection setup
    pub fn from_stream(stream: UnixStream) -> Result<Self, Error> {
        stream.set_nonblocking(true)?;
        Ok(Self {
            stream,
            write: Mutex::new(WriteState::default()),
            pending: Mutex::new(BTreeMap::new()),
            read: Mutex::new(ReadState {
                read_buf: VecDeque::new(),
                fill_buf: vec![0u8; FILL_BUFF_SIZE].into_boxed_slice(),
                events: VecDeque::new(),
                responses: HashMap::new(),
                last_read: 0,
            }),
            error: AtomicBool::new(false),
        })
    }

    fn fd(&self) -> RawFd {
        self.stream.as_raw_fd()
    }

    fn fail<E: Into<Error>>(&self, err: E) -> Error {
        self.error.store(true, Ordering::SeqCst);
        let err = err.into();
        tracing::error!("X connection failed: {}", err);
        err
    }

    fn check_error(&self) -> Result<(), Error> {
        if self.error.load(Ordering::SeqCst) {
            Err(Error::ConnectionClosed)
        } else {
            Ok(())
        }
    }

    fn wait_for(&self, flags: PollFlags) -> Result<(), Error> {
        let mut fds = [PollFd::new(self.fd(), flags)];
        loop {
            match poll(&mut fds, -1) {
                Ok(_) => return Ok(()),
                Err(Errno::EINTR) => continue,
                Err(err) => return Err(self.fail(err)),
            }
        }
    }

    fn push_request(
        &self,
        write: &mut WriteState,
        request: &[u8],
        flags: RequestFlags,
        internal: bool,
    ) -> u64 {
        write.last_sequence += 1;
        write.out.extend_from_slice(request);
        if flags.reply_expected {
            write.last_reply_request = write.last_sequence;
        }
        self.pending
            .lock()
            .insert(write.last_sequence, PendingRequest { flags, internal });
        write.last_sequence
    }

    fn queue_sync(&self, write: &mut WriteState) -> u64 {
        self.push_request(write, &SYNC_REQUEST, RequestFlags::checked(true), true)
    }

    fn queue_request(
        &self,
        write: &mut WriteState,
        request: &[u8],
        flags: RequestFlags,
    ) -> Result<SequenceNumber, Error> {
        if !flags.reply_expected
            && write.last_sequence - write.last_reply_request >= MAX_REQUESTS_WITHOUT_REPLY
        {
            let sync = self.queue_sync(write);
            tracing::trace!(sync, "Queued sync to keep response sequence numbers unambiguous");
        }
        let sequence = SequenceNumber::new(self.push_request(write, request, flags, false));

        if write.out.len() >= AUTO_FLUSH_SIZE {
            self.flush_locked(write)?;
        }
        Ok(sequence)
    }

    fn flush_locked(&self, write: &mut WriteState) -> Result<(), Error> {
        let mut written = 0;
        while written < write.out.len() {
            let raw_fds: Vec<RawFd> = write.fds.iter().map(AsRawFd::as_raw_fd).collect();
            let rights = [ControlMessage::ScmRights(&raw_fds)];
            let cmsgs: &[ControlMessage<'_>] = if raw_fds.is_empty() { &[] } else { &rights };

            match sendmsg::<UnixAddr>(
                self.fd(),
                &[IoSlice::new(&write.out[written..])],
                cmsgs,
                MsgFlags::MSG_NOSIGNAL,
                None,
            ) {
                Ok(n) => {
                    written += n;
                    // Our copies are closed once the server has its own
                    write.fds.clear();
                }
                Err(Errno::EAGAIN) => self.wait_for(PollFlags::POLLOUT)?,
                Err(Errno::EINTR) => {}
                Err(err) => return Err(self.fail(err)),
            }
        }
        write.out.clear();
        Ok(())
    }

    /// `true` if read any new data
    fn fill_buf_nonblocking(&self, read: &mut ReadState) -> Result<bool, Error> {
        let ReadState {
            read_buf, fill_buf, ..
        } = read;
        match (&self.stream).read(fill_buf) {
            Ok(0) => Err(self.fail(Error::ConnectionClosed)),
            Ok(n) => {
                read_buf.extend(&fill_buf[0..n]);
                Ok(true)
            }
            Err(err) if err.kind() == io::ErrorKind::WouldBlock => Ok(false),
            Err(err) if err.kind() == io::ErrorKind::Interrupted => Ok(false),
            Err(err) => Err(self.fail(err)),
        }
    }

    fn read_available(&self, read: &mut ReadState) -> Result<(), Error> {
        while self.fill_buf_nonblocking(read)? {}
        while self.parse_packet(read) {}
        Ok(())
    }

    /// Move one complete packet out of the read buffer. `false` if there is none yet.
    fn parse_packet(&self, read: &mut ReadState) -> bool {
        if read.read_buf.len() < RESPONSE_HEADER_SIZE {
            return false;
        }
        let response_type = read.read_buf[0];
        let length = if response_type == X_REPLY || response_type & 0x7f == GENERIC_EVENT {
            let extra = u32::from_le_bytes([
                read.read_buf[4],
                read.read_buf[5],
                read.read_buf[6],
                read.read_buf[7],
            ]);
            RESPONSE_HEADER_SIZE + extra as usize * 4
        } else {
            RESPONSE_HEADER_SIZE
        };
        if read.read_buf.len() < length {
            return false;
        }
        let bytes: Vec<u8> = read.read_buf.drain(0..length).collect();

        if response_type & 0x7f == KEYMAP_NOTIFY {
            read.events.push_back(RawEvent { bytes });
            return true;
        }

        let wire = u16::from_le_bytes([bytes[2], bytes[3]]);
        let sequence = widen_sequence(read.last_read, wire);
        read.last_read = sequence;
        let request = {
            let mut pending = self.pending.lock();
            let request = pending.get(&sequence).copied();
            // Everything up to this response has been processed
            *pending = pending.split_off(&(sequence + 1));
            request
        };

        match response_type {
            X_REPLY if request.map_or(false, |request| request.internal) => {}
            X_REPLY => {
                read.responses.entry(sequence).or_default().reply = Some(RawReply { bytes });
            }
            X_ERROR if request.map_or(false, |request| request.flags.checked) => {
                let mut raw = [0u8; RESPONSE_HEADER_SIZE];
                raw.copy_from_slice(&bytes);
                read.responses.entry(sequence).or_default().error = Some(RawError { bytes: raw });
            }
            _ => read.events.push_back(RawEvent { bytes }),
        }
        true
    }

    fn lock_read(&self) -> Result<MutexGuard<'_, ReadState>, Error> {
        self.check_error()?;
        let mut read = self.read.lock();
        self.read_available(&mut read)?;
        Ok(read)
    }

    fn take_response(read: &mut ReadState, sequence: SequenceNumber) -> Option<RawResponse> {
        if sequence.value() > read.last_read {
            return None;
        }
        Some(read.responses.remove(&sequence.value()).unwrap_or_default())
    }
}

/// Full sequence number of a response, given the 16 bits on the wire and the previous response.
///
/// Exact as long as fewer than 65536 requests separate the two, which the periodic syncs queued
/// by [`SocketTransport::queue_request`] guarantee.
fn widen_sequence(last_read: u64, wire: u16) -> u64 {
    let candidate = (last_read & !0xffff) | wire as u64;
    if candidate < last_read {
        candidate + 0x1_0000
    } else {
        candidate
    }
}

impl Transport for SocketTransport {
    fn send_request(&self, request: &[u8], flags: RequestFlags) -> Result<SequenceNumber, Error> {
        self.check_error()?;
        let mut write = self.write.lock();
        self.queue_request(&mut write, request, flags)
    }

    fn send_fds(&self, fds: Vec<OwnedFd>) -> Result<(), Error> {
        self.check_error()?;
        self.write.lock().fds.extend(fds);
        Ok(())
    }

    fn supports_atomic_fd_send(&self) -> bool {
        true
    }

    fn send_request_with_fds(
        &self,
        request: &[u8],
        fds: Vec<OwnedFd>,
        flags: RequestFlags,
    ) -> Result<SequenceNumber, Error> {
        self.check_error()?;
        let mut write = self.write.lock();
        write.fds.extend(fds);
        self.queue_request(&mut write, request, flags)
    }

    fn flush(&self) -> Result<(), Error> {
        self.check_error()?;
        let mut write = self.write.lock();
        self.flush_locked(&mut write)
    }

    fn poll_for_event(&self) -> Result<Option<RawEvent>, Error> {
        Ok(self.lock_read()?.events.pop_front())
    }

    fn poll_for_reply(&self, sequence: SequenceNumber) -> Result<Option<RawResponse>, Error> {
        let mut read = self.lock_read()?;
        Ok(Self::take_response(&mut read, sequence))
    }

    fn wait_for_reply(&self, sequence: SequenceNumber) -> Result<RawResponse, Error> {
        let needs_sync = self
            .pending
            .lock()
            .get(&sequence.value())
            .map_or(false, |request| !request.flags.reply_expected);
        if needs_sync {
            self.check_error()?;
            self.queue_sync(&mut self.write.lock());
        }
        self.flush()?;

        loop {
            {
                let mut read = self.lock_read()?;
                if let Some(response) = Self::take_response(&mut read, sequence) {
                    return Ok(response);
                }
            }
            self.wait_for(PollFlags::POLLIN)?;
        }
    }

    fn last_request_processed(&self) -> SequenceNumber {
        SequenceNumber::new(self.read.lock().last_read)
    }

    fn has_error(&self) -> bool {
        self.error.load(Ordering::SeqCst)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_display_var() {
        let display = DisplayVar::from_str(":1").unwrap();
        assert_eq!(display.hostname, "");
        assert_eq!(display.display_sequence, 1);
        assert_eq!(display.screen, None);
        assert_eq!(display.socket_path(), "/tmp/.X11-unix/X1");

        let display = DisplayVar::from_str("remote:10.2").unwrap();
        assert_eq!(display.hostname, "remote");
        assert_eq!(display.screen, Some(2));
        assert_eq!(display.to_string(), "remote:10.2");

        assert!(DisplayVar::from_str("nocolon").is_err());
        assert!(DisplayVar::from_str(":x").is_err());
    }

    #[test]
    fn sequence_widening_wraps() {
        assert_eq!(widen_sequence(0, 1), 1);
        assert_eq!(widen_sequence(0xfffe, 0xffff), 0xffff);
        assert_eq!(widen_sequence(0xffff, 2), 0x1_0002);
        assert_eq!(widen_sequence(0x1_0002, 0x0002), 0x1_0002);
    }

    fn reply_bytes(sequence: u16, extra_words: u32) -> Vec<u8> {
        let mut bytes = vec![0u8; 32 + extra_words as usize * 4];
        bytes[0] = X_REPLY;
        bytes[2..4].copy_from_slice(&sequence.to_le_bytes());
        bytes[4..8].copy_from_slice(&extra_words.to_le_bytes());
        bytes
    }

    fn error_bytes(sequence: u16) -> Vec<u8> {
        let mut bytes = vec![0u8; 32];
        bytes[0] = X_ERROR;
        bytes[1] = 3;
        bytes[2..4].copy_from_slice(&sequence.to_le_bytes());
        bytes
    }

    #[test]
    fn responses_over_socket_pair() {
        let (client, mut server) = UnixStream::pair().unwrap();
        let transport = SocketTransport::from_stream(client).unwrap();

        let with_reply = transport
            .send_request(&SYNC_REQUEST, RequestFlags::checked(true))
            .unwrap();
        let checked_void = transport
            .send_request(&[8, 0, 2, 0, 1, 0, 0, 0], RequestFlags::checked(false))
            .unwrap();
        let unchecked_void = transport
            .send_request(&[8, 0, 2, 0, 2, 0, 0, 0], RequestFlags::unchecked(false))
            .unwrap();
        transport.flush().unwrap();

        let mut sent = [0u8; 20];
        server.read_exact(&mut sent).unwrap();
        assert_eq!(&sent[0..4], &SYNC_REQUEST);

        assert_eq!(transport.poll_for_reply(with_reply).unwrap(), None);

        let mut incoming = reply_bytes(1, 2);
        incoming.extend(error_bytes(2));
        incoming.extend(error_bytes(3));
        server.write_all(&incoming).unwrap();

        let response = transport.wait_for_reply(with_reply).unwrap();
        assert_eq!(response.reply.unwrap().bytes.len(), 40);
        assert_eq!(response.error, None);

        // The rest of the data may still be in flight
        let response = transport.wait_for_reply(checked_void).unwrap();
        assert!(response.reply.is_none());
        assert_eq!(response.error.unwrap().bytes[1], 3);

        transport.wait_for_reply(unchecked_void).unwrap();
        let event = transport.poll_for_event().unwrap().unwrap();
        assert_eq!(event.response_type(), X_ERROR);
        assert_eq!(transport.last_request_processed(), unchecked_void);
    }

    /// Sequence numbers of every request read from `server` up to and including the first one
    /// with `last_opcode`, grouped by opcode
    fn read_requests(server: &mut UnixStream, last_opcode: u8) -> HashMap<u8, Vec<u64>> {
        let mut requests: HashMap<u8, Vec<u64>> = HashMap::new();
        let mut sequence = 0;
        loop {
            let mut header = [0u8; 4];
            server.read_exact(&mut header).unwrap();
            let length = u16::from_le_bytes([header[2], header[3]]) as usize * 4;
            let mut body = vec![0u8; length - 4];
            server.read_exact(&mut body).unwrap();

            sequence += 1;
            requests.entry(header[0]).or_default().push(sequence);
            if header[0] == last_opcode {
                return requests;
            }
        }
    }

    #[test]
    fn long_runs_of_void_requests_keep_sequence_numbers_unambiguous() {
        const NO_OPERATION: [u8; 4] = [127, 0, 1, 0];
        const GET_ATOM_NAME: [u8; 8] = [17, 0, 2, 0, 1, 0, 0, 0];

        let (client, mut server) = UnixStream::pair().unwrap();
        let transport = SocketTransport::from_stream(client).unwrap();

        let client = std::thread::spawn(move || {
            let mut target = None;
            for idx in 0..70_000 {
                let sequence = transport
                    .send_request(&NO_OPERATION, RequestFlags::checked(false))
                    .unwrap();
                if idx == 66_000 {
                    target = Some(sequence);
                }
            }
            transport
                .send_request(&GET_ATOM_NAME, RequestFlags::checked(true))
                .unwrap();
            transport.flush().unwrap();
            (transport, target.unwrap())
        });

        let requests = read_requests(&mut server, GET_ATOM_NAME[0]);
        let (transport, target) = client.join().unwrap();

        // Requests with a reply are never too far apart
        let mut with_reply = requests[&SYNC_REQUEST[0]].clone();
        with_reply.extend(&requests[&GET_ATOM_NAME[0]]);
        with_reply.sort_unstable();
        assert!(!requests[&SYNC_REQUEST[0]].is_empty());
        let mut previous = 0;
        for sequence in &with_reply {
            assert!(sequence - previous <= 0xffff);
            previous = *sequence;
        }

        let mut incoming = Vec::new();
        for sync in requests[&SYNC_REQUEST[0]]
            .iter()
            .filter(|sync| **sync < target.value())
        {
            incoming.extend(reply_bytes(*sync as u16, 0));
        }
        incoming.extend(error_bytes(target.wire()));
        server.write_all(&incoming).unwrap();

        let response = transport.wait_for_reply(target).unwrap();
        assert!(response.reply.is_none());
        assert_eq!(response.error.unwrap().bytes[1], 3);
        assert_eq!(transport.last_request_processed(), target);
        // Replies to syncs never reach the caller
        assert_eq!(transport.poll_for_event().unwrap(), None);
    }

    #[test]
    fn closed_socket_sets_error() {
        let (client, server) = UnixStream::pair().unwrap();
        let transport = SocketTransport::from_stream(client).unwrap();
        drop(server);

        assert!(transport.poll_for_event().is_err());
        assert!(transport.has_error());
        assert!(matches!(
            transport.send_request(&SYNC_REQUEST, RequestFlags::checked(true)),
            Err(Error::ConnectionClosed)
        ));
    }
}
