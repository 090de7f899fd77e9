use crate::{
    error::Error,
    events::{self, Event},
    extensions::Extensions,
    transport::{RawError, RawEvent, Transport, RESPONSE_HEADER_SIZE},
    xerror::XError,
};
use std::collections::VecDeque;

/// Events read from the transport but not yet handed to the delegate, in arrival order
#[derive(Debug, Default)]
pub(crate) struct EventQueue {
    events: VecDeque<Event>,
}

impl EventQueue {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Move every event the transport has available into the queue, without blocking
    pub(crate) fn read_responses(
        &mut self,
        transport: &dyn Transport,
        extensions: &Extensions,
    ) -> Result<(), Error> {
        while let Some(raw) = transport.poll_for_event()? {
            if events::is_error(&raw) {
                log_unchecked_error(&raw);
                continue;
            }
            let event = Event::from_raw(raw, extensions);
            tracing::trace!(sequence = ?event.sequence(), "Queued event");
            self.events.push_back(event);
        }
        Ok(())
    }

    pub(crate) fn push(&mut self, event: Event) {
        self.events.push_back(event);
    }

    pub(crate) fn front(&self) -> Option<&Event> {
        self.events.front()
    }

    pub(crate) fn pop(&mut self) -> Option<Event> {
        self.events.pop_front()
    }

    pub(crate) fn len(&self) -> usize {
        self.events.len()
    }
}

/// Errors of requests sent without a response handle show up among events
fn log_unchecked_error(raw: &RawEvent) {
    let error = raw
        .bytes
        .get(..RESPONSE_HEADER_SIZE)
        .and_then(|bytes| <[u8; RESPONSE_HEADER_SIZE]>::try_from(bytes).ok())
        .ok_or(Error::UnexpectedEof)
        .and_then(|bytes| XError::from_raw(&RawError { bytes }));
    match error {
        Ok(error) => tracing::warn!("{}", error),
        Err(err) => tracing::warn!("Could not decode X error: {}", err),
    }
}
