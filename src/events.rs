use crate::{
    atoms::AtomId,
    error::Error,
    extensions::{randr, Extensions},
    transport::{RawEvent, GENERIC_EVENT, X_ERROR},
    utils::impl_enum,
    wire::{FromLeBytes, ReadBuffer},
    WindowId,
};

pub mod codes {
    pub const KEY_PRESS: u8 = 2;
    pub const KEY_RELEASE: u8 = 3;
    pub const BUTTON_PRESS: u8 = 4;
    pub const BUTTON_RELEASE: u8 = 5;
    pub const MOTION_NOTIFY: u8 = 6;
    pub const ENTER_NOTIFY: u8 = 7;
    pub const LEAVE_NOTIFY: u8 = 8;
    pub const FOCUS_IN: u8 = 9;
    pub const FOCUS_OUT: u8 = 10;
    pub const KEYMAP_NOTIFY: u8 = 11;
    pub const EXPOSE: u8 = 12;
    pub const DESTROY_NOTIFY: u8 = 17;
    pub const UNMAP_NOTIFY: u8 = 18;
    pub const MAP_NOTIFY: u8 = 19;
    pub const CONFIGURE_NOTIFY: u8 = 22;
    pub const PROPERTY_NOTIFY: u8 = 28;
    pub const CLIENT_MESSAGE: u8 = 33;
    pub const MAPPING_NOTIFY: u8 = 34;
    pub const GENERIC_EVENT: u8 = 35;
}

/// Set on the event code of events that were sent with `SendEvent`
const SEND_EVENT_BIT: u8 = 0x80;

/// Shared by key, button and motion events
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InputEvent {
    /// Keycode, button or motion hint
    pub detail: u8,
    pub time: u32,
    pub root: WindowId,
    pub event: WindowId,
    pub child: WindowId,
    pub root_x: i16,
    pub root_y: i16,
    pub event_x: i16,
    pub event_y: i16,
    pub state: u16,
    pub same_screen: bool,
}

impl FromLeBytes for InputEvent {
    fn from_le_bytes(r: &mut ReadBuffer<'_>) -> Result<Self, Error> {
        let detail = r.read()?;
        let _sequence_number: u16 = r.read()?;
        let time = r.read()?;
        let root = WindowId::from_le_bytes(r)?;
        let event = WindowId::from_le_bytes(r)?;
        let child = WindowId::from_le_bytes(r)?;
        let root_x = r.read()?;
        let root_y = r.read()?;
        let event_x = r.read()?;
        let event_y = r.read()?;
        let state = r.read()?;
        let same_screen = r.read()?;
        Ok(Self {
            detail,
            time,
            root,
            event,
            child,
            root_x,
            root_y,
            event_x,
            event_y,
            state,
            same_screen,
        })
    }
}

impl_enum! {
    #[repr(u8)]
    enum NotifyMode {
        Normal = 0,
        Grab = 1,
        Ungrab = 2,
        WhileGrabbed = 3,
    }
}

impl_enum! {
    #[repr(u8)]
    enum NotifyDetail {
        Ancestor = 0,
        Virtual = 1,
        Inferior = 2,
        Nonlinear = 3,
        NonlinearVirtual = 4,
        Pointer = 5,
        PointerRoot = 6,
        None = 7,
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EnterLeaveNotify {
    pub detail: NotifyDetail,
    pub time: u32,
    pub root: WindowId,
    pub event: WindowId,
    pub child: WindowId,
    pub root_x: i16,
    pub root_y: i16,
    pub event_x: i16,
    pub event_y: i16,
    pub state: u16,
    pub mode: NotifyMode,
    /// Bit 0 is focus, bit 1 is same-screen
    pub same_screen_focus: u8,
}

impl FromLeBytes for EnterLeaveNotify {
    fn from_le_bytes(r: &mut ReadBuffer<'_>) -> Result<Self, Error> {
        let detail = NotifyDetail::from_le_bytes(r)?;
        let _sequence_number: u16 = r.read()?;
        let time = r.read()?;
        let root = WindowId::from_le_bytes(r)?;
        let event = WindowId::from_le_bytes(r)?;
        let child = WindowId::from_le_bytes(r)?;
        let root_x = r.read()?;
        let root_y = r.read()?;
        let event_x = r.read()?;
        let event_y = r.read()?;
        let state = r.read()?;
        let mode = NotifyMode::from_le_bytes(r)?;
        let same_screen_focus = r.read()?;
        Ok(Self {
            detail,
            time,
            root,
            event,
            child,
            root_x,
            root_y,
            event_x,
            event_y,
            state,
            mode,
            same_screen_focus,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FocusInOut {
    pub detail: NotifyDetail,
    pub event: WindowId,
    pub mode: NotifyMode,
}

impl FromLeBytes for FocusInOut {
    fn from_le_bytes(r: &mut ReadBuffer<'_>) -> Result<Self, Error> {
        let detail = NotifyDetail::from_le_bytes(r)?;
        let _sequence_number: u16 = r.read()?;
        let event = WindowId::from_le_bytes(r)?;
        let mode = NotifyMode::from_le_bytes(r)?;
        Ok(Self {
            detail,
            event,
            mode,
        })
    }
}

/// Keyboard state, bit per keycode starting at keycode 8. Carries no sequence number.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeymapNotify {
    pub keys: [u8; 31],
}

impl FromLeBytes for KeymapNotify {
    fn from_le_bytes(r: &mut ReadBuffer<'_>) -> Result<Self, Error> {
        let mut keys = [0u8; 31];
        keys.copy_from_slice(r.read_bytes(31)?);
        Ok(Self { keys })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Expose {
    pub window: WindowId,
    pub x: u16,
    pub y: u16,
    pub width: u16,
    pub height: u16,
    /// Number of `Expose` events that follow for the same window
    pub count: u16,
}

impl FromLeBytes for Expose {
    fn from_le_bytes(r: &mut ReadBuffer<'_>) -> Result<Self, Error> {
        r.skip(1)?; // unused
        let _sequence_number: u16 = r.read()?;
        let window = WindowId::from_le_bytes(r)?;
        let x = r.read()?;
        let y = r.read()?;
        let width = r.read()?;
        let height = r.read()?;
        let count = r.read()?;
        Ok(Self {
            window,
            x,
            y,
            width,
            height,
            count,
        })
    }
}

/// `DestroyNotify`, `UnmapNotify` and `MapNotify`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WindowNotify {
    pub event: WindowId,
    pub window: WindowId,
    /// `from-configure` for unmap, `override-redirect` for map, unused for destroy
    pub flag: bool,
}

impl FromLeBytes for WindowNotify {
    fn from_le_bytes(r: &mut ReadBuffer<'_>) -> Result<Self, Error> {
        r.skip(1)?; // unused
        let _sequence_number: u16 = r.read()?;
        let event = WindowId::from_le_bytes(r)?;
        let window = WindowId::from_le_bytes(r)?;
        let flag = r.read()?;
        Ok(Self {
            event,
            window,
            flag,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConfigureNotify {
    pub event: WindowId,
    pub window: WindowId,
    pub above_sibling: WindowId,
    pub x: i16,
    pub y: i16,
    pub width: u16,
    pub height: u16,
    pub border_width: u16,
    pub override_redirect: bool,
}

impl FromLeBytes for ConfigureNotify {
    fn from_le_bytes(r: &mut ReadBuffer<'_>) -> Result<Self, Error> {
        r.skip(1)?; // unused
        let _sequence_number: u16 = r.read()?;
        let event = WindowId::from_le_bytes(r)?;
        let window = WindowId::from_le_bytes(r)?;
        let above_sibling = WindowId::from_le_bytes(r)?;
        let x = r.read()?;
        let y = r.read()?;
        let width = r.read()?;
        let height = r.read()?;
        let border_width = r.read()?;
        let override_redirect = r.read()?;
        Ok(Self {
            event,
            window,
            above_sibling,
            x,
            y,
            width,
            height,
            border_width,
            override_redirect,
        })
    }
}

impl_enum! {
    #[repr(u8)]
    enum PropertyState {
        NewValue = 0,
        Deleted = 1,
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PropertyNotify {
    pub window: WindowId,
    pub atom: AtomId,
    pub time: u32,
    pub state: PropertyState,
}

impl FromLeBytes for PropertyNotify {
    fn from_le_bytes(r: &mut ReadBuffer<'_>) -> Result<Self, Error> {
        r.skip(1)?; // unused
        let _sequence_number: u16 = r.read()?;
        let window = WindowId::from_le_bytes(r)?;
        let atom = AtomId::from_le_bytes(r)?;
        let time = r.read()?;
        let state = PropertyState::from_le_bytes(r)?;
        Ok(Self {
            window,
            atom,
            time,
            state,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientMessage {
    pub format: u8,
    pub window: WindowId,
    pub type_: AtomId,
    pub data: [u8; 20],
}

impl ClientMessage {
    pub fn data32(&self) -> [u32; 5] {
        let mut out = [0u32; 5];
        for (value, raw) in out.iter_mut().zip(self.data.chunks_exact(4)) {
            *value = u32::from_le_bytes([raw[0], raw[1], raw[2], raw[3]]);
        }
        out
    }
}

impl FromLeBytes for ClientMessage {
    fn from_le_bytes(r: &mut ReadBuffer<'_>) -> Result<Self, Error> {
        let format = r.read()?;
        let _sequence_number: u16 = r.read()?;
        let window = WindowId::from_le_bytes(r)?;
        let type_ = AtomId::from_le_bytes(r)?;
        let mut data = [0u8; 20];
        data.copy_from_slice(r.read_bytes(20)?);
        Ok(Self {
            format,
            window,
            type_,
            data,
        })
    }
}

impl_enum! {
    #[repr(u8)]
    enum MappingRequest {
        Modifier = 0,
        Keyboard = 1,
        Pointer = 2,
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MappingNotify {
    pub request: MappingRequest,
    pub first_keycode: u8,
    pub count: u8,
}

impl FromLeBytes for MappingNotify {
    fn from_le_bytes(r: &mut ReadBuffer<'_>) -> Result<Self, Error> {
        r.skip(1)?; // unused
        let _sequence_number: u16 = r.read()?;
        let request = MappingRequest::from_le_bytes(r)?;
        let first_keycode = r.read()?;
        let count = r.read()?;
        Ok(Self {
            request,
            first_keycode,
            count,
        })
    }
}

/// Extension event with a payload longer than 32 bytes
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GenericEvent {
    /// Major opcode of the extension
    pub extension: u8,
    pub event_type: u16,
    /// Everything after the fixed 32 bytes
    pub data: Vec<u8>,
}

impl FromLeBytes for GenericEvent {
    fn from_le_bytes(r: &mut ReadBuffer<'_>) -> Result<Self, Error> {
        let extension = r.read()?;
        let _sequence_number: u16 = r.read()?;
        let length: u32 = r.read()?;
        let event_type = r.read()?;
        r.skip(22)?; // unused
        let data = r.read_bytes(length as usize * 4)?.to_vec();
        Ok(Self {
            extension,
            event_type,
            data,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SomeEvent {
    KeyPress(InputEvent),
    KeyRelease(InputEvent),
    ButtonPress(InputEvent),
    ButtonRelease(InputEvent),
    MotionNotify(InputEvent),
    EnterNotify(EnterLeaveNotify),
    LeaveNotify(EnterLeaveNotify),
    FocusIn(FocusInOut),
    FocusOut(FocusInOut),
    KeymapNotify(KeymapNotify),
    Expose(Expose),
    DestroyNotify(WindowNotify),
    UnmapNotify(WindowNotify),
    MapNotify(WindowNotify),
    ConfigureNotify(ConfigureNotify),
    PropertyNotify(PropertyNotify),
    ClientMessage(ClientMessage),
    MappingNotify(MappingNotify),
    RandrScreenChangeNotify(randr::ScreenChangeNotify),
    GenericEvent(GenericEvent),
    /// Event this library does not decode, with its raw bytes
    Unknown(Vec<u8>),
}

impl SomeEvent {
    fn decode(raw: &[u8], extensions: &Extensions) -> Result<Self, Error> {
        let code = raw.first().ok_or(Error::UnexpectedEof)? & !SEND_EVENT_BIT;
        let mut r = ReadBuffer::new(raw);
        r.skip(1)?;
        let r = &mut r;

        let event = match code {
            codes::KEY_PRESS => Self::KeyPress(InputEvent::from_le_bytes(r)?),
            codes::KEY_RELEASE => Self::KeyRelease(InputEvent::from_le_bytes(r)?),
            codes::BUTTON_PRESS => Self::ButtonPress(InputEvent::from_le_bytes(r)?),
            codes::BUTTON_RELEASE => Self::ButtonRelease(InputEvent::from_le_bytes(r)?),
            codes::MOTION_NOTIFY => Self::MotionNotify(InputEvent::from_le_bytes(r)?),
            codes::ENTER_NOTIFY => Self::EnterNotify(EnterLeaveNotify::from_le_bytes(r)?),
            codes::LEAVE_NOTIFY => Self::LeaveNotify(EnterLeaveNotify::from_le_bytes(r)?),
            codes::FOCUS_IN => Self::FocusIn(FocusInOut::from_le_bytes(r)?),
            codes::FOCUS_OUT => Self::FocusOut(FocusInOut::from_le_bytes(r)?),
            codes::KEYMAP_NOTIFY => Self::KeymapNotify(KeymapNotify::from_le_bytes(r)?),
            codes::EXPOSE => Self::Expose(Expose::from_le_bytes(r)?),
            codes::DESTROY_NOTIFY => Self::DestroyNotify(WindowNotify::from_le_bytes(r)?),
            codes::UNMAP_NOTIFY => Self::UnmapNotify(WindowNotify::from_le_bytes(r)?),
            codes::MAP_NOTIFY => Self::MapNotify(WindowNotify::from_le_bytes(r)?),
            codes::CONFIGURE_NOTIFY => Self::ConfigureNotify(ConfigureNotify::from_le_bytes(r)?),
            codes::PROPERTY_NOTIFY => Self::PropertyNotify(PropertyNotify::from_le_bytes(r)?),
            codes::CLIENT_MESSAGE => Self::ClientMessage(ClientMessage::from_le_bytes(r)?),
            codes::MAPPING_NOTIFY => Self::MappingNotify(MappingNotify::from_le_bytes(r)?),
            codes::GENERIC_EVENT => Self::GenericEvent(GenericEvent::from_le_bytes(r)?),
            code => match extensions.for_event(code) {
                Some((randr::EXTENSION_NAME, randr::SCREEN_CHANGE_NOTIFY)) => {
                    Self::RandrScreenChangeNotify(randr::ScreenChangeNotify::from_le_bytes(r)?)
                }
                _ => Self::Unknown(raw.to_vec()),
            },
        };
        Ok(event)
    }
}

/// Event read from the server, or made up locally
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Event {
    sequence: Option<u16>,
    send_event: bool,
    data: SomeEvent,
}

impl Event {
    /// Event that did not come from the server. It has no sequence number, so it is dispatched
    /// ahead of any pending reply.
    pub fn new(data: SomeEvent) -> Self {
        Self {
            sequence: None,
            send_event: false,
            data,
        }
    }

    /// Decode an event as read from the server. Events that cannot be decoded are kept as
    /// [`SomeEvent::Unknown`].
    pub fn from_raw(raw: RawEvent, extensions: &Extensions) -> Self {
        let response_type = raw.response_type();
        let code = response_type & !SEND_EVENT_BIT;
        let sequence = (code != codes::KEYMAP_NOTIFY && raw.bytes.len() >= 4)
            .then(|| u16::from_le_bytes([raw.bytes[2], raw.bytes[3]]));
        let data = match SomeEvent::decode(&raw.bytes, extensions) {
            Ok(data) => data,
            Err(err) => {
                tracing::warn!("Could not decode event {}: {}", code, err);
                SomeEvent::Unknown(raw.bytes)
            }
        };
        Self {
            sequence,
            send_event: response_type & SEND_EVENT_BIT != 0,
            data,
        }
    }

    /// Low 16 bits of the sequence number of the last request processed before this event
    pub fn sequence(&self) -> Option<u16> {
        self.sequence
    }

    pub fn is_send_event(&self) -> bool {
        self.send_event
    }

    pub fn data(&self) -> &SomeEvent {
        &self.data
    }

    pub fn into_data(self) -> SomeEvent {
        self.data
    }
}

/// `true` for X errors that were delivered on the event stream
pub(crate) fn is_error(raw: &RawEvent) -> bool {
    raw.response_type() == X_ERROR
}

// Generic events are framed by the transport, make sure both sides agree on the code
const _: () = assert!(GENERIC_EVENT == codes::GENERIC_EVENT);

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::{extensions::ExtensionInfo, wire::WriteBuffer};

    pub(crate) fn configure_notify_bytes(
        sequence: u16,
        window: u32,
        width: u16,
        height: u16,
    ) -> Vec<u8> {
        let mut w = WriteBuffer::new();
        w.write(codes::CONFIGURE_NOTIFY);
        w.pad(1);
        w.write(sequence);
        w.write(window); // event
        w.write(window);
        w.write(0u32); // above sibling
        w.write(10i16);
        w.write(20i16);
        w.write(width);
        w.write(height);
        w.write(0u16); // border
        w.write(false);
        w.pad(5);
        w.into_bytes()
    }

    #[test]
    fn decode_configure_notify() {
        let raw = RawEvent {
            bytes: configure_notify_bytes(0x1234, 0x0040_0001, 800, 600),
        };
        let event = Event::from_raw(raw, &Extensions::new());
        assert_eq!(event.sequence(), Some(0x1234));
        assert!(!event.is_send_event());
        match event.data() {
            SomeEvent::ConfigureNotify(configure) => {
                assert_eq!(configure.window, WindowId::from(0x0040_0001));
                assert_eq!((configure.x, configure.y), (10, 20));
                assert_eq!((configure.width, configure.height), (800, 600));
            }
            other => panic!("Unexpected event {:?}", other),
        }
    }

    #[test]
    fn keymap_notify_has_no_sequence() {
        let mut bytes = vec![0xffu8; 32];
        bytes[0] = codes::KEYMAP_NOTIFY;
        let event = Event::from_raw(RawEvent { bytes }, &Extensions::new());
        assert_eq!(event.sequence(), None);
        assert!(matches!(event.data(), SomeEvent::KeymapNotify(k) if k.keys == [0xff; 31]));
    }

    #[test]
    fn send_event_bit_is_stripped() {
        let mut bytes = configure_notify_bytes(3, 1, 2, 2);
        bytes[0] |= SEND_EVENT_BIT;
        let event = Event::from_raw(RawEvent { bytes }, &Extensions::new());
        assert!(event.is_send_event());
        assert!(matches!(event.data(), SomeEvent::ConfigureNotify(_)));
    }

    #[test]
    fn randr_event_needs_queried_extension() {
        let bytes = randr::tests::screen_change_bytes(
            89,
            7,
            randr::Rotation::ROTATE_90,
            0x1e3,
            (1024, 768, 270, 203),
        );
        let event = Event::from_raw(RawEvent { bytes: bytes.clone() }, &Extensions::new());
        assert!(matches!(event.data(), SomeEvent::Unknown(_)));

        let mut extensions = Extensions::new();
        extensions.insert(
            randr::EXTENSION_NAME,
            Some(ExtensionInfo {
                major_opcode: 140,
                first_event: 89,
                first_error: 147,
            }),
        );
        let event = Event::from_raw(RawEvent { bytes }, &extensions);
        assert_eq!(event.sequence(), Some(7));
        match event.data() {
            SomeEvent::RandrScreenChangeNotify(change) => {
                assert_eq!(change.rotated_size(), (768, 1024, 203, 270))
            }
            other => panic!("Unexpected event {:?}", other),
        }
    }

    #[test]
    fn undecodable_event_is_kept_raw() {
        let mut bytes = vec![0u8; 32];
        bytes[0] = codes::PROPERTY_NOTIFY;
        bytes[16] = 9; // invalid state
        let event = Event::from_raw(RawEvent { bytes: bytes.clone() }, &Extensions::new());
        assert_eq!(event.data(), &SomeEvent::Unknown(bytes));
    }
}
