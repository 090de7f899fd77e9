//! Bookkeeping of requests that are still waiting for their reply or error.

use crate::transport::RawResponse;
use std::{
    cell::RefCell,
    collections::VecDeque,
    fmt::{self, Display},
    rc::Rc,
};

/// Unsigned integer that a sequence number can be stored in
pub trait SequenceId: Copy {
    const BITS: u32;

    fn widen(self) -> u64;
}

impl SequenceId for u16 {
    const BITS: u32 = u16::BITS;

    #[inline]
    fn widen(self) -> u64 {
        self as u64
    }
}

impl SequenceId for u32 {
    const BITS: u32 = u32::BITS;

    #[inline]
    fn widen(self) -> u64 {
        self as u64
    }
}

impl SequenceId for u64 {
    const BITS: u32 = u64::BITS;

    #[inline]
    fn widen(self) -> u64 {
        self
    }
}

impl SequenceId for SequenceNumber {
    const BITS: u32 = u64::BITS;

    #[inline]
    fn widen(self) -> u64 {
        self.value
    }
}

/// Compare two sequence numbers that may have wrapped around.
///
/// Both values are truncated to the narrower of the two widths and the difference is read as a
/// signed number: negative if `t` comes before `u`, zero if equal and positive if `t` comes after
/// `u`.
pub fn compare_sequence_ids<T: SequenceId, U: SequenceId>(t: T, u: U) -> i64 {
    let bits = T::BITS.min(U::BITS);
    let shift = u64::BITS - bits;
    let diff = t.widen().wrapping_sub(u.widen());
    // Drop the bits above `bits` and sign-extend from there
    ((diff << shift) as i64) >> shift
}

/// Client side sequence number. The server only sends the lower 16 bits of it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(transparent)]
pub struct SequenceNumber {
    value: u64,
}

impl SequenceNumber {
    pub fn new(value: u64) -> Self {
        Self { value }
    }

    #[inline]
    pub fn value(self) -> u64 {
        self.value
    }

    /// Truncated value, as seen on the wire
    #[inline]
    pub fn wire(self) -> u16 {
        self.value as u16
    }
}

impl From<u64> for SequenceNumber {
    fn from(value: u64) -> Self {
        Self { value }
    }
}

impl Display for SequenceNumber {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.value)
    }
}

pub type ResponseCallback = Box<dyn FnOnce(RawResponse)>;

pub(crate) enum SlotState {
    /// Sent, the handle has not decided yet how the response will be consumed
    Waiting,
    Callback(ResponseCallback),
    /// Response was read while the handle was still undecided
    Arrived(RawResponse),
    /// Consumed outside of the dispatch loop
    Done,
}

impl fmt::Debug for SlotState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SlotState::Waiting => write!(f, "Waiting"),
            SlotState::Callback(_) => write!(f, "Callback"),
            SlotState::Arrived(response) => f.debug_tuple("Arrived").field(response).finish(),
            SlotState::Done => write!(f, "Done"),
        }
    }
}

/// Shared between an [`OutstandingRequest`] and the handle that was returned to the caller
#[derive(Debug, Clone)]
pub(crate) struct ResponseSlot {
    state: Rc<RefCell<SlotState>>,
}

impl ResponseSlot {
    pub(crate) fn waiting() -> Self {
        Self {
            state: Rc::new(RefCell::new(SlotState::Waiting)),
        }
    }

    pub(crate) fn replace(&self, state: SlotState) -> SlotState {
        self.state.replace(state)
    }

    pub(crate) fn is_done(&self) -> bool {
        matches!(&*self.state.borrow(), SlotState::Done)
    }
}

#[derive(Debug)]
pub(crate) struct OutstandingRequest {
    pub(crate) sequence: SequenceNumber,
    pub(crate) slot: ResponseSlot,
}

/// FIFO of requests in the order they were sent. The server processes requests in order, so
/// entries are only ever resolved from the front.
#[derive(Debug, Default)]
pub(crate) struct SequenceTracker {
    requests: VecDeque<OutstandingRequest>,
}

impl SequenceTracker {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn add_request(&mut self, sequence: SequenceNumber, slot: ResponseSlot) {
        if let Some(last) = self.requests.back() {
            assert!(
                compare_sequence_ids(last.sequence, sequence) < 0,
                "Request {} added after request {}",
                sequence,
                last.sequence
            );
        }
        self.requests.push_back(OutstandingRequest { sequence, slot });
    }

    pub(crate) fn front_sequence(&self) -> Option<SequenceNumber> {
        self.requests.front().map(|request| request.sequence)
    }

    /// `true` if the front request has been processed by the server, so its reply or error is
    /// either already received or was never generated
    pub(crate) fn has_next_response(&self, last_processed: SequenceNumber) -> bool {
        self.front_sequence()
            .map_or(false, |front| compare_sequence_ids(front, last_processed) <= 0)
    }

    pub(crate) fn pop_front(&mut self) -> Option<OutstandingRequest> {
        self.requests.pop_front()
    }

    /// Drop entries at the front whose response was already consumed by a blocking wait
    pub(crate) fn retire_done(&mut self) {
        while self
            .requests
            .front()
            .map_or(false, |request| request.slot.is_done())
        {
            self.requests.pop_front();
        }
    }

    pub(crate) fn len(&self) -> usize {
        self.requests.len()
    }
}
