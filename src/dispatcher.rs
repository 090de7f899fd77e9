//! Delivery of ordered events to the rest of the application.
//!
//! [`Connection::dispatch`] talks to exactly one [`Delegate`]. [`EventSource`] is the delegate
//! most applications want: it fans events out to a list of [`XEventDispatcher`]s in registration
//! order, stopping at the first one that handles the event, and lets modal flows temporarily put
//! a single dispatcher in front of all others.

use crate::{connection::Connection, events::Event};
use std::{
    cell::RefCell,
    fmt,
    rc::{Rc, Weak},
};

/// Receiver of the dispatch loop
pub trait Delegate {
    /// Checked before every iteration, the loop returns as soon as this is `false`
    fn should_continue_stream(&self) -> bool;

    fn dispatch_x_event(&mut self, event: &Event);
}

pub trait XEventDispatcher {
    /// `true` if the event was handled and must not reach dispatchers after this one
    fn dispatch_x_event(&self, event: &Event) -> bool;
}

impl<F> XEventDispatcher for F
where
    F: Fn(&Event) -> bool,
{
    fn dispatch_x_event(&self, event: &Event) -> bool {
        self(event)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct DispatcherId(u64);

struct Override {
    generation: u64,
    dispatcher: Rc<dyn XEventDispatcher>,
}

struct SourceState {
    dispatchers: Vec<(DispatcherId, Rc<dyn XEventDispatcher>)>,
    next_id: u64,
    /// Innermost override is last
    overrides: Vec<Override>,
    next_generation: u64,
    continue_stream: bool,
    /// Number of [`EventSource::dispatch`] calls currently on the stack
    loop_depth: usize,
}

impl Default for SourceState {
    fn default() -> Self {
        Self {
            dispatchers: Vec::new(),
            next_id: 0,
            overrides: Vec::new(),
            next_generation: 0,
            continue_stream: true,
            loop_depth: 0,
        }
    }
}

/// Multiplexes events from one connection to many dispatchers
#[derive(Clone, Default)]
pub struct EventSource {
    state: Rc<RefCell<SourceState>>,
}

impl fmt::Debug for EventSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.state.borrow();
        f.debug_struct("EventSource")
            .field("dispatchers", &state.dispatchers.len())
            .field("overrides", &state.overrides.len())
            .field("continue_stream", &state.continue_stream)
            .finish()
    }
}

impl EventSource {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_dispatcher(&self, dispatcher: Rc<dyn XEventDispatcher>) -> DispatcherId {
        let mut state = self.state.borrow_mut();
        let id = DispatcherId(state.next_id);
        state.next_id += 1;
        state.dispatchers.push((id, dispatcher));
        id
    }

    /// `false` if there was no such dispatcher
    pub fn remove_dispatcher(&self, id: DispatcherId) -> bool {
        let mut state = self.state.borrow_mut();
        let before = state.dispatchers.len();
        state.dispatchers.retain(|(other, _)| *other != id);
        before != state.dispatchers.len()
    }

    /// Give `dispatcher` the first look at every event until the returned guard is dropped.
    ///
    /// Dropping the guard restores whatever override was active before. If that happens while
    /// the source is dispatching, or after a newer override replaced this one, the running
    /// dispatch loop stops so the next call starts from a consistent state.
    #[must_use = "the override is removed as soon as the guard is dropped"]
    pub fn override_dispatcher(
        &self,
        dispatcher: Rc<dyn XEventDispatcher>,
    ) -> ScopedEventDispatcher {
        let mut state = self.state.borrow_mut();
        let generation = state.next_generation;
        state.next_generation += 1;
        state.overrides.push(Override {
            generation,
            dispatcher,
        });
        ScopedEventDispatcher {
            source: Rc::downgrade(&self.state),
            generation,
        }
    }

    pub fn has_override(&self) -> bool {
        !self.state.borrow().overrides.is_empty()
    }

    /// Run the dispatch loop of `conn` with this source as the delegate
    pub fn dispatch(&self, conn: &Connection) {
        {
            let mut state = self.state.borrow_mut();
            if state.loop_depth == 0 {
                state.continue_stream = true;
            }
            state.loop_depth += 1;
        }

        let mut delegate = self.clone();
        conn.dispatch(&mut delegate);

        self.state.borrow_mut().loop_depth -= 1;
    }

    /// Deliver one event, `true` if some dispatcher handled it
    pub fn dispatch_event(&self, event: &Event) -> bool {
        // Dispatchers may add or remove dispatchers, so work on a snapshot
        let (current_override, dispatchers) = {
            let state = self.state.borrow();
            let current_override = state
                .overrides
                .last()
                .map(|entry| entry.dispatcher.clone());
            let dispatchers: Vec<_> = state
                .dispatchers
                .iter()
                .map(|(_, dispatcher)| dispatcher.clone())
                .collect();
            (current_override, dispatchers)
        };

        if let Some(dispatcher) = current_override {
            if dispatcher.dispatch_x_event(event) {
                return true;
            }
        }
        dispatchers
            .iter()
            .any(|dispatcher| dispatcher.dispatch_x_event(event))
    }
}

impl Delegate for EventSource {
    fn should_continue_stream(&self) -> bool {
        self.state.borrow().continue_stream
    }

    fn dispatch_x_event(&mut self, event: &Event) {
        if !self.dispatch_event(event) {
            tracing::trace!(event = ?event.data(), "Event not handled by any dispatcher");
        }
    }
}

/// Keeps an override installed, see [`EventSource::override_dispatcher`]
pub struct ScopedEventDispatcher {
    source: Weak<RefCell<SourceState>>,
    generation: u64,
}

impl Drop for ScopedEventDispatcher {
    fn drop(&mut self) {
        let source = match self.source.upgrade() {
            Some(source) => source,
            None => return,
        };
        let mut state = source.borrow_mut();

        let position = state
            .overrides
            .iter()
            .position(|entry| entry.generation == self.generation);
        let was_current = position.map_or(false, |idx| idx + 1 == state.overrides.len());
        if let Some(idx) = position {
            state.overrides.remove(idx);
        }

        if state.loop_depth > 0 || !was_current {
            tracing::debug!(
                replaced = !was_current,
                "Dispatcher override released, stopping dispatch loop"
            );
            state.continue_stream = false;
        }
    }
}
