use crate::{
    dispatcher::Delegate,
    error::Error,
    event_queue::EventQueue,
    events::{Event, SomeEvent},
    extensions::{big_requests, ExtensionInfo, Extensions},
    future::Future,
    replies::{NoReply, XReply},
    requests::{
        frame_request, EncodedRequest, GetInputFocus, QueryExtension, XExtensionRequest,
        XRequest, XRequestBase,
    },
    sequence::{
        compare_sequence_ids, ResponseCallback, ResponseSlot, SequenceNumber, SequenceTracker,
        SlotState,
    },
    setup::{Screen, Setup},
    transport::{
        socket::{DisplayVar, SocketTransport},
        RawResponse, RequestFlags, Transport,
    },
    IdAllocator, ResourceId, WindowId,
};
use parking_lot::Mutex;
use std::{
    cell::{Ref, RefCell},
    collections::VecDeque,
    fmt,
    os::unix::io::OwnedFd,
    rc::Rc,
    sync::{
        atomic::{AtomicU32, Ordering},
        Arc,
    },
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConnectionOptions {
    /// Negotiate BIG-REQUESTS right after connecting
    pub enable_big_requests: bool,
}

impl Default for ConnectionOptions {
    fn default() -> Self {
        Self {
            enable_big_requests: true,
        }
    }
}

/// Thread safe half of a connection: frames requests and hands them to the transport.
///
/// Requests sent through a [`RequestWriter`] from another thread are not tracked, their errors
/// show up on the event stream of the owning [`Connection`] and are logged there.
pub struct RequestWriter {
    transport: Arc<dyn Transport>,
    /// Keeps file descriptors and the request they belong to together on transports that
    /// cannot send both at once
    fd_lock: Mutex<()>,
    maximum_request_length: u32,
    /// Zero until BIG-REQUESTS is enabled
    extended_maximum_request_length: AtomicU32,
}

impl fmt::Debug for RequestWriter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RequestWriter")
            .field("maximum_request_length", &self.maximum_request_length)
            .field(
                "extended_maximum_request_length",
                &self.extended_maximum_request_length(),
            )
            .finish()
    }
}

impl RequestWriter {
    fn new(transport: Arc<dyn Transport>, maximum_request_length: u32) -> Self {
        Self {
            transport,
            fd_lock: Mutex::new(()),
            maximum_request_length,
            extended_maximum_request_length: AtomicU32::new(0),
        }
    }

    fn extended_maximum_request_length(&self) -> Option<u32> {
        match self.extended_maximum_request_length.load(Ordering::Acquire) {
            0 => None,
            max => Some(max),
        }
    }

    /// Largest request, in 4 byte units, that can be sent
    pub fn maximum_request_length(&self) -> u32 {
        self.extended_maximum_request_length()
            .unwrap_or(self.maximum_request_length)
    }

    fn send(&self, request: EncodedRequest, flags: RequestFlags) -> Result<SequenceNumber, Error> {
        let EncodedRequest {
            name, bytes, fds, ..
        } = request;
        let bytes = frame_request(
            bytes,
            self.maximum_request_length,
            self.extended_maximum_request_length(),
        )?;

        let sequence = if self.transport.supports_atomic_fd_send() {
            if fds.is_empty() {
                self.transport.send_request(&bytes, flags)?
            } else {
                self.transport.send_request_with_fds(&bytes, fds, flags)?
            }
        } else {
            // Every request takes the lock, otherwise another thread could slip its request in
            // between someone else's fds and request
            let _guard = self.fd_lock.lock();
            if !fds.is_empty() {
                self.transport.send_fds(fds)?;
            }
            self.transport.send_request(&bytes, flags)?
        };
        tracing::trace!(%sequence, request = name, "Sent request");
        Ok(sequence)
    }

    /// Send a request without a reply from any thread
    pub fn send_request<R>(&self, request: &R) -> Result<SequenceNumber, Error>
    where
        R: XRequest + XRequestBase<Reply = NoReply>,
    {
        self.send(EncodedRequest::new(request), RequestFlags::unchecked(false))
    }

    pub fn send_request_with_fds<R>(
        &self,
        request: &R,
        fds: Vec<OwnedFd>,
    ) -> Result<SequenceNumber, Error>
    where
        R: XRequest + XRequestBase<Reply = NoReply>,
    {
        self.send(
            EncodedRequest::new(request).with_fds(fds),
            RequestFlags::unchecked(false),
        )
    }

    pub fn flush(&self) -> Result<(), Error> {
        self.transport.flush()
    }
}

struct ConnectionState {
    writer: Arc<RequestWriter>,
    setup: RefCell<Setup>,
    default_screen: usize,
    extensions: RefCell<Extensions>,
    tracker: RefCell<SequenceTracker>,
    events: RefCell<EventQueue>,
    id_allocator: RefCell<IdAllocator>,
    /// Callbacks whose response arrived before they were registered
    deferred: RefCell<VecDeque<(ResponseCallback, RawResponse)>>,
}

enum Work {
    Reply,
    Event,
    Idle,
}

/// Client connection to an X server.
///
/// Cheap to clone, all clones share the same state. Not thread safe; use
/// [`Connection::request_writer`] to send requests from other threads.
#[derive(Clone)]
pub struct Connection {
    state: Rc<ConnectionState>,
}

impl fmt::Debug for Connection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Connection")
            .field("writer", &self.state.writer)
            .field("outstanding_requests", &self.state.tracker.borrow().len())
            .field("queued_events", &self.state.events.borrow().len())
            .finish()
    }
}

impl Connection {
    /// Wrap a transport that already completed the connection setup
    pub fn new<T>(transport: T, setup: Setup) -> Self
    where
        T: Transport + 'static,
    {
        Self::with_default_screen(Arc::new(transport), setup, 0)
    }

    fn with_default_screen(
        transport: Arc<dyn Transport>,
        setup: Setup,
        default_screen: usize,
    ) -> Self {
        let writer = Arc::new(RequestWriter::new(
            transport,
            setup.maximum_request_length as u32,
        ));
        let id_allocator = IdAllocator::new(setup.resource_id_base, setup.resource_id_mask);
        Self {
            state: Rc::new(ConnectionState {
                writer,
                setup: RefCell::new(setup),
                default_screen,
                extensions: RefCell::new(Extensions::new()),
                tracker: RefCell::new(SequenceTracker::new()),
                events: RefCell::new(EventQueue::new()),
                id_allocator: RefCell::new(id_allocator),
                deferred: RefCell::new(VecDeque::new()),
            }),
        }
    }

    /// Connect to the display from `$DISPLAY`
    pub fn open() -> Result<Self, Error> {
        Self::open_with_options(&DisplayVar::from_env()?, ConnectionOptions::default())
    }

    pub fn open_with_options(
        display: &DisplayVar,
        options: ConnectionOptions,
    ) -> Result<Self, Error> {
        let (transport, setup) = SocketTransport::connect(display)?;
        let default_screen = display.screen.unwrap_or(0) as usize;
        if default_screen >= setup.screens.len() {
            return Err(Error::CouldNotConnectTo(display.to_string()));
        }

        let conn = Self::with_default_screen(Arc::new(transport), setup, default_screen);
        if options.enable_big_requests {
            conn.enable_big_requests();
        }
        Ok(conn)
    }

    fn transport(&self) -> &dyn Transport {
        self.state.writer.transport.as_ref()
    }

    pub fn request_writer(&self) -> Arc<RequestWriter> {
        self.state.writer.clone()
    }

    pub fn send_request<R: XRequest>(&self, request: &R) -> Future<R::Reply> {
        self.send(EncodedRequest::new(request))
    }

    pub fn send_request_with_fds<R: XRequest>(
        &self,
        request: &R,
        fds: Vec<OwnedFd>,
    ) -> Future<R::Reply> {
        self.send(EncodedRequest::new(request).with_fds(fds))
    }

    /// Send a request of an extension, querying the extension first if needed. If the server does
    /// not have the extension nothing is sent and the future resolves to an empty response.
    pub fn send_extension_request<R: XExtensionRequest>(&self, request: &R) -> Future<R::Reply> {
        match self.query_extension(R::EXTENSION) {
            Some(info) => self.send(EncodedRequest::new_extension(request, info.major_opcode)),
            None => {
                tracing::error!(
                    "Could not send {}: {}",
                    R::NAME,
                    Error::ExtensionUnavailable(R::EXTENSION)
                );
                Future::empty(self.clone())
            }
        }
    }

    fn send<R: XReply>(&self, request: EncodedRequest) -> Future<R> {
        let name = request.name;
        let flags = RequestFlags::checked(request.reply_expected);
        match self.state.writer.send(request, flags) {
            Ok(sequence) => {
                let slot = ResponseSlot::waiting();
                self.state
                    .tracker
                    .borrow_mut()
                    .add_request(sequence, slot.clone());
                Future::new(self.clone(), name, sequence, slot)
            }
            Err(err) => {
                tracing::error!("Could not send {}: {}", name, err);
                Future::empty(self.clone())
            }
        }
    }

    pub fn flush(&self) -> Result<(), Error> {
        self.transport().flush()
    }

    /// Round trip to the server. Every request sent before has been processed when this returns.
    pub fn sync(&self) -> Result<(), Error> {
        let _focus = self.send_request(&GetInputFocus).sync();
        if self.ready() {
            Ok(())
        } else {
            Err(Error::ConnectionClosed)
        }
    }

    /// `false` once the transport failed, nothing will be sent or received after that
    pub fn ready(&self) -> bool {
        !self.transport().has_error()
    }

    pub(crate) fn last_request_processed(&self) -> SequenceNumber {
        self.transport().last_request_processed()
    }

    /// Move events that already arrived into the event queue, without blocking
    pub fn read_responses(&self) -> Result<(), Error> {
        let extensions = self.state.extensions.borrow();
        self.state
            .events
            .borrow_mut()
            .read_responses(self.transport(), &extensions)
    }

    /// Put an event that did not come from the server in the event queue
    pub fn queue_event(&self, event: Event) {
        self.state.events.borrow_mut().push(event);
    }

    pub(crate) fn defer(&self, callback: ResponseCallback, raw: RawResponse) {
        self.state.deferred.borrow_mut().push_back((callback, raw));
    }

    pub(crate) fn wait_for_response(&self, sequence: SequenceNumber) -> RawResponse {
        if let Err(err) = self.flush() {
            tracing::warn!("Could not flush requests: {}", err);
        }
        match self.transport().wait_for_reply(sequence) {
            Ok(raw) => raw,
            Err(err) => {
                tracing::warn!(%sequence, "Could not wait for response: {}", err);
                RawResponse::empty()
            }
        }
    }

    /// Deliver replies and events in the order the server produced them.
    ///
    /// Returns when nothing can be done without blocking, when the connection failed or when
    /// `delegate` asks to stop. Waiting for the connection to become readable again is up to the
    /// caller.
    pub fn dispatch(&self, delegate: &mut dyn Delegate) {
        while delegate.should_continue_stream() {
            self.run_deferred_callbacks();

            if let Err(err) = self.flush() {
                tracing::warn!("Could not flush requests: {}", err);
            }
            if let Err(err) = self.read_responses() {
                tracing::warn!("Could not read from the server: {}", err);
            }
            if !self.ready() {
                tracing::debug!("Connection is not ready, stopping dispatch");
                self.retire_outstanding_requests();
                break;
            }

            match self.next_work() {
                Work::Reply => self.process_next_response(),
                Work::Event => {
                    let event = self.state.events.borrow_mut().pop();
                    if let Some(event) = event {
                        self.update_screen_geometry(&event);
                        delegate.dispatch_x_event(&event);
                    }
                }
                Work::Idle => break,
            }
        }
    }

    fn run_deferred_callbacks(&self) {
        loop {
            let next = self.state.deferred.borrow_mut().pop_front();
            match next {
                Some((callback, raw)) => callback(raw),
                None => break,
            }
        }
    }

    /// Resolve everything still waiting with an empty response once nothing more will arrive
    fn retire_outstanding_requests(&self) {
        loop {
            let request = self.state.tracker.borrow_mut().pop_front();
            let request = match request {
                Some(request) => request,
                None => break,
            };
            match request.slot.replace(SlotState::Done) {
                SlotState::Callback(callback) => callback(RawResponse::empty()),
                SlotState::Waiting => {
                    request
                        .slot
                        .replace(SlotState::Arrived(RawResponse::empty()));
                }
                SlotState::Arrived(raw) => {
                    request.slot.replace(SlotState::Arrived(raw));
                }
                SlotState::Done => {}
            }
        }
        self.run_deferred_callbacks();
    }

    fn next_work(&self) -> Work {
        let last_processed = self.last_request_processed();
        let mut tracker = self.state.tracker.borrow_mut();
        tracker.retire_done();
        let reply = tracker
            .front_sequence()
            .filter(|_| tracker.has_next_response(last_processed));
        let events = self.state.events.borrow();
        let event = events.front().map(Event::sequence);

        match (event, reply) {
            // Local events have no place in the server order
            (Some(None), _) => Work::Event,
            (Some(Some(event)), Some(reply)) => {
                if compare_sequence_ids(event, reply) < 0 {
                    Work::Event
                } else {
                    Work::Reply
                }
            }
            (Some(Some(_)), None) => Work::Event,
            (None, Some(_)) => Work::Reply,
            (None, None) => Work::Idle,
        }
    }

    fn process_next_response(&self) {
        let request = self.state.tracker.borrow_mut().pop_front();
        let request = match request {
            Some(request) => request,
            None => return,
        };

        match request.slot.replace(SlotState::Done) {
            SlotState::Done => {}
            SlotState::Waiting => {
                let raw = self.poll_response(request.sequence);
                request.slot.replace(SlotState::Arrived(raw));
            }
            SlotState::Callback(callback) => {
                let raw = self.poll_response(request.sequence);
                callback(raw);
            }
            SlotState::Arrived(raw) => {
                debug_assert!(false, "Request {} resolved twice", request.sequence);
                request.slot.replace(SlotState::Arrived(raw));
            }
        }
    }

    fn poll_response(&self, sequence: SequenceNumber) -> RawResponse {
        match self.transport().poll_for_reply(sequence) {
            Ok(Some(raw)) => raw,
            Ok(None) => {
                tracing::warn!(%sequence, "Request was processed but has no response");
                RawResponse::empty()
            }
            Err(err) => {
                tracing::warn!(%sequence, "Could not read response: {}", err);
                RawResponse::empty()
            }
        }
    }

    /// Keep root window sizes from the setup current
    fn update_screen_geometry(&self, event: &Event) {
        let mut setup = self.state.setup.borrow_mut();
        match event.data() {
            SomeEvent::ConfigureNotify(configure) => {
                if let Some(screen) = setup.screen_for_root_mut(configure.window) {
                    screen.width_in_pixels = configure.width;
                    screen.height_in_pixels = configure.height;
                }
            }
            SomeEvent::RandrScreenChangeNotify(change) => {
                if let Some(screen) = setup.screen_for_root_mut(change.root) {
                    let (width, height, width_mm, height_mm) = change.rotated_size();
                    screen.width_in_pixels = width;
                    screen.height_in_pixels = height;
                    screen.width_in_millimeters = width_mm;
                    screen.height_in_millimeters = height_mm;
                }
            }
            _ => {}
        }
    }

    pub fn setup(&self) -> Ref<'_, Setup> {
        self.state.setup.borrow()
    }

    pub fn default_screen(&self) -> Option<Screen> {
        self.setup().screens.get(self.state.default_screen).cloned()
    }

    pub fn screen_for_root(&self, root: WindowId) -> Option<Screen> {
        self.setup().screen_for_root(root).cloned()
    }

    /// Largest request, in 4 byte units, that can be sent
    pub fn maximum_request_length(&self) -> u32 {
        self.state.writer.maximum_request_length()
    }

    /// Maximum request length granted by BIG-REQUESTS, if it was enabled
    pub fn extended_max_request_length(&self) -> Option<u32> {
        self.state.writer.extended_maximum_request_length()
    }

    /// Look up an extension on the server, blocking on the first query of each name
    pub fn query_extension(&self, name: &str) -> Option<ExtensionInfo> {
        if let Some(info) = self.state.extensions.borrow().get(name) {
            return info;
        }

        let response = self
            .send_request(&QueryExtension {
                name: name.as_bytes().to_vec(),
            })
            .sync();
        match response.reply {
            Some(reply) => {
                let info = reply.present.then(|| ExtensionInfo {
                    major_opcode: reply.major_opcode,
                    first_event: reply.first_event,
                    first_error: reply.first_error,
                });
                tracing::debug!(extension = name, ?info, "Queried extension");
                self.state.extensions.borrow_mut().insert(name, info);
                info
            }
            None => {
                tracing::warn!("Could not query extension {}", name);
                None
            }
        }
    }

    /// Enable BIG-REQUESTS and return the new maximum request length
    pub fn enable_big_requests(&self) -> Option<u32> {
        if let Some(max) = self.extended_max_request_length() {
            return Some(max);
        }
        if self.query_extension(big_requests::EXTENSION_NAME).is_none() {
            tracing::debug!("Server does not support big requests");
            return None;
        }

        let reply = self
            .send_extension_request(&big_requests::Enable)
            .sync()
            .ok()?;
        tracing::debug!(
            maximum_request_length = reply.maximum_request_length,
            "Enabled big requests"
        );
        self.state
            .writer
            .extended_maximum_request_length
            .store(reply.maximum_request_length, Ordering::Release);
        Some(reply.maximum_request_length)
    }

    /// New id for a client side resource
    pub fn generate_id(&self) -> Result<ResourceId, Error> {
        self.state.id_allocator.borrow_mut().allocate_id()
    }

    /// Requests sent but not yet resolved
    pub fn outstanding_requests(&self) -> usize {
        self.state.tracker.borrow().len()
    }

    pub fn queued_events(&self) -> usize {
        self.state.events.borrow().len()
    }
}
