//! Boundary between the connection core and whatever carries bytes to and from the X server.

use crate::{error::Error, sequence::SequenceNumber};
use std::os::unix::io::OwnedFd;

pub mod scripted;
pub mod socket;

/// Size of errors, events and the fixed part of replies
pub const RESPONSE_HEADER_SIZE: usize = 32;

/// Response type of a server error
pub const X_ERROR: u8 = 0;
/// Response type of a reply
pub const X_REPLY: u8 = 1;
/// Response type of an event with variable length payload
pub const GENERIC_EVENT: u8 = 35;

/// Complete reply bytes, including the 32 byte header
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawReply {
    pub bytes: Vec<u8>,
}

/// Error as sent by the server
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RawError {
    pub bytes: [u8; RESPONSE_HEADER_SIZE],
}

/// Event bytes. 32 bytes long except for generic events which can be longer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawEvent {
    pub bytes: Vec<u8>,
}

impl RawEvent {
    pub fn response_type(&self) -> u8 {
        self.bytes.first().copied().unwrap_or_default()
    }
}

/// Everything the server sent in response to a single request. Both fields are `None` for
/// requests that succeeded without a reply.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RawResponse {
    pub reply: Option<RawReply>,
    pub error: Option<RawError>,
}

impl RawResponse {
    pub fn empty() -> Self {
        Self::default()
    }

    pub fn reply(bytes: Vec<u8>) -> Self {
        Self {
            reply: Some(RawReply { bytes }),
            error: None,
        }
    }

    pub fn error(error: RawError) -> Self {
        Self {
            reply: None,
            error: Some(error),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RequestFlags {
    pub reply_expected: bool,
    /// Errors of checked requests are returned with the response, errors of unchecked requests
    /// are delivered on the event stream
    pub checked: bool,
}

impl RequestFlags {
    pub fn checked(reply_expected: bool) -> Self {
        Self {
            reply_expected,
            checked: true,
        }
    }

    pub fn unchecked(reply_expected: bool) -> Self {
        Self {
            reply_expected,
            checked: false,
        }
    }
}

/// A connected and authenticated byte stream to the X server.
///
/// Sequence numbers are assigned by the transport in send order. The transport frames incoming
/// data into replies, errors and events but does not interpret them.
pub trait Transport: Send + Sync {
    /// Queue a fully encoded request and return its sequence number
    fn send_request(&self, request: &[u8], flags: RequestFlags) -> Result<SequenceNumber, Error>;

    /// Queue file descriptors to be sent with the next request bytes that hit the wire
    fn send_fds(&self, fds: Vec<OwnedFd>) -> Result<(), Error>;

    /// `true` if [`Transport::send_request_with_fds`] is available
    fn supports_atomic_fd_send(&self) -> bool {
        false
    }

    /// Queue a request together with its file descriptors as one unit
    fn send_request_with_fds(
        &self,
        _request: &[u8],
        _fds: Vec<OwnedFd>,
        _flags: RequestFlags,
    ) -> Result<SequenceNumber, Error> {
        Err(Error::AtomicFdSendUnsupported)
    }

    fn flush(&self) -> Result<(), Error>;

    /// Next event read from the server, without blocking
    fn poll_for_event(&self) -> Result<Option<RawEvent>, Error>;

    /// Response of a request, without blocking. `None` if the server has not processed the
    /// request yet.
    fn poll_for_reply(&self, sequence: SequenceNumber) -> Result<Option<RawResponse>, Error>;

    /// Block until the server has processed the request and return its response
    fn wait_for_reply(&self, sequence: SequenceNumber) -> Result<RawResponse, Error>;

    /// Sequence number of the last request the server is known to have processed
    fn last_request_processed(&self) -> SequenceNumber;

    /// `true` once the connection is unusable
    fn has_error(&self) -> bool;
}
