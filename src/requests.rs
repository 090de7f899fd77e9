use crate::{
    atoms::AtomId,
    error::Error,
    replies::XReply,
    utils::{bitmask, impl_enum, pad},
    wire::{ToLeBytes, WriteBuffer},
    DrawableId, WindowId,
};
use std::os::unix::io::OwnedFd;

pub(crate) mod opcodes;

/// Every request starts with 4 byte header: major opcode, one byte of data and 2 bytes of length
pub const REQUEST_HEADER_SIZE: usize = 4;

pub trait XRequestBase: ToLeBytes {
    type Reply: XReply;

    /// Name used in diagnostics
    const NAME: &'static str;
}

/// Core protocol request. Encoding starts with the major opcode.
pub trait XRequest: XRequestBase {}

/// Extension request. Encoding starts with the minor opcode, the major opcode is assigned by the
/// server at runtime.
pub trait XExtensionRequest: XRequestBase {
    const EXTENSION: &'static str;
}

macro_rules! impl_xrequest_with_response {
    ($r:tt) => {
        impl $crate::requests::XRequestBase for $r {
            type Reply = $crate::replies::$r;

            const NAME: &'static str = stringify!($r);
        }

        impl $crate::requests::XRequest for $r {}
    };
}

macro_rules! impl_xrequest_without_response {
    ($r:tt) => {
        impl $crate::requests::XRequestBase for $r {
            type Reply = $crate::replies::NoReply;

            const NAME: &'static str = stringify!($r);
        }

        impl $crate::requests::XRequest for $r {}
    };
}

/// Request bytes as produced by the encoder, before the length field is filled in
#[derive(Debug)]
pub struct EncodedRequest {
    pub name: &'static str,
    pub bytes: Vec<u8>,
    pub fds: Vec<OwnedFd>,
    pub reply_expected: bool,
}

impl EncodedRequest {
    pub fn new<R: XRequest>(request: &R) -> Self {
        let mut w = WriteBuffer::new();
        request.to_le_bytes(&mut w);
        Self::from_buffer::<R>(w)
    }

    pub fn new_extension<R: XExtensionRequest>(request: &R, major_opcode: u8) -> Self {
        let mut w = WriteBuffer::new();
        w.write(major_opcode);
        request.to_le_bytes(&mut w);
        Self::from_buffer::<R>(w)
    }

    fn from_buffer<R: XRequestBase>(w: WriteBuffer) -> Self {
        let bytes = w.into_bytes();
        debug_assert!(bytes.len() >= REQUEST_HEADER_SIZE);
        Self {
            name: R::NAME,
            bytes,
            fds: Vec::new(),
            reply_expected: <R::Reply as XReply>::HAS_REPLY,
        }
    }

    /// Attach file descriptors that are sent along with the request
    pub fn with_fds(mut self, fds: Vec<OwnedFd>) -> Self {
        self.fds.extend(fds);
        self
    }
}

/// Pad the request to 4 bytes and fill in its length.
///
/// Requests longer than `maximum_request_length` (in 4 byte units) are re-encoded with the
/// big-requests header: the regular length field is left at zero and the real length, which
/// counts the extra 4 bytes, is inserted right after the header.
pub fn frame_request(
    mut bytes: Vec<u8>,
    maximum_request_length: u32,
    extended_max_request_length: Option<u32>,
) -> Result<Vec<u8>, Error> {
    debug_assert!(bytes.len() >= REQUEST_HEADER_SIZE);
    bytes.resize(bytes.len() + pad(bytes.len()), 0);
    let size32 = bytes.len() / 4;

    if size32 <= maximum_request_length as usize {
        bytes[2..4].copy_from_slice(&(size32 as u16).to_le_bytes());
        return Ok(bytes);
    }

    match extended_max_request_length {
        Some(extended) if size32 + 1 <= extended as usize => {
            let long_length = (size32 + 1) as u32;
            bytes[2..4].copy_from_slice(&0u16.to_le_bytes());
            bytes.splice(
                REQUEST_HEADER_SIZE..REQUEST_HEADER_SIZE,
                long_length.to_le_bytes(),
            );
            Ok(bytes)
        }
        extended => Err(Error::RequestTooLong {
            length: size32,
            maximum: extended.unwrap_or(maximum_request_length),
        }),
    }
}

/*
GetInputFocus
     1     43                              opcode
     1                                     unused
     2     1                               request length
*/

#[derive(Debug, Clone, Copy, Default)]
pub struct GetInputFocus;

impl ToLeBytes for GetInputFocus {
    fn to_le_bytes(&self, w: &mut WriteBuffer) {
        w.write(opcodes::GET_INPUT_FOCUS);
        w.pad(1); // unused
        w.write(0u16); // length
    }
}

impl_xrequest_with_response!(GetInputFocus);

/*
GetGeometry
     1     14                              opcode
     1                                     unused
     2     2                               request length
     4     DRAWABLE                        drawable
*/

#[derive(Debug, Clone, Copy)]
pub struct GetGeometry {
    pub drawable: DrawableId,
}

impl ToLeBytes for GetGeometry {
    fn to_le_bytes(&self, w: &mut WriteBuffer) {
        w.write(opcodes::GET_GEOMETRY);
        w.pad(1); // unused
        w.write(0u16); // length
        self.drawable.to_le_bytes(w);
    }
}

impl_xrequest_with_response!(GetGeometry);

/*
InternAtom
     1     16                              opcode
     1     BOOL                            only-if-exists
     2     2+(n+p)/4                       request length
     2     n                               length of name
     2                                     unused
     n     STRING8                         name
     p                                     unused, p=pad(n)
*/

#[derive(Debug, Clone)]
pub struct InternAtom {
    pub only_if_exists: bool,
    pub name: Vec<u8>,
}

impl ToLeBytes for InternAtom {
    fn to_le_bytes(&self, w: &mut WriteBuffer) {
        w.write(opcodes::INTERN_ATOM);
        w.write(self.only_if_exists);
        w.write(0u16); // length
        w.write(self.name.len() as u16);
        w.pad(2); // unused
        w.write_padded(&self.name);
    }
}

impl_xrequest_with_response!(InternAtom);

/*
GetAtomName
     1     17                              opcode
     1                                     unused
     2     2                               request length
     4     ATOM                            atom
*/

#[derive(Debug, Clone, Copy)]
pub struct GetAtomName {
    pub atom: AtomId,
}

impl ToLeBytes for GetAtomName {
    fn to_le_bytes(&self, w: &mut WriteBuffer) {
        w.write(opcodes::GET_ATOM_NAME);
        w.pad(1); // unused
        w.write(0u16); // length
        self.atom.to_le_bytes(w);
    }
}

impl_xrequest_with_response!(GetAtomName);

impl_enum! {
    #[repr(u8)]
    enum ChangePropertyMode {
        Replace = 0,
        Prepend = 1,
        Append = 2,
    }
}

/*
ChangeProperty
     1     18                              opcode
     1                                     mode
     2     6+(n+p)/4                       request length
     4     WINDOW                          window
     4     ATOM                            property
     4     ATOM                            type
     1     CARD8                           format
     3                                     unused
     4     CARD32                          length of data in format units
     n     LISTofBYTE                      data
     p                                     unused, p=pad(n)
*/

#[derive(Debug, Clone)]
pub struct ChangeProperty {
    pub mode: ChangePropertyMode,
    pub window: WindowId,
    pub property: AtomId,
    pub type_: AtomId,
    /// 8, 16 or 32
    pub format: u8,
    pub data: Vec<u8>,
}

impl ToLeBytes for ChangeProperty {
    fn to_le_bytes(&self, w: &mut WriteBuffer) {
        debug_assert!(matches!(self.format, 8 | 16 | 32));
        debug_assert_eq!(self.data.len() % (self.format as usize / 8), 0);

        w.write(opcodes::CHANGE_PROPERTY);
        w.write(u8::from(self.mode));
        w.write(0u16); // length
        self.window.to_le_bytes(w);
        self.property.to_le_bytes(w);
        self.type_.to_le_bytes(w);
        w.write(self.format);
        w.pad(3); // unused
        w.write((self.data.len() / (self.format as usize / 8)) as u32);
        w.write_padded(&self.data);
    }
}

impl_xrequest_without_response!(ChangeProperty);

/*
GetProperty
     1     20                              opcode
     1     BOOL                            delete
     2     6                               request length
     4     WINDOW                          window
     4     ATOM                            property
     4     ATOM                            type
          0     AnyPropertyType
     4     CARD32                          long-offset
     4     CARD32                          long-length
*/

#[derive(Debug, Clone, Copy)]
pub struct GetProperty {
    pub delete: bool,
    pub window: WindowId,
    pub property: AtomId,
    /// [`AtomId::NONE`] for any type
    pub type_: AtomId,
    pub long_offset: u32,
    pub long_length: u32,
}

impl ToLeBytes for GetProperty {
    fn to_le_bytes(&self, w: &mut WriteBuffer) {
        w.write(opcodes::GET_PROPERTY);
        w.write(self.delete);
        w.write(0u16); // length
        self.window.to_le_bytes(w);
        self.property.to_le_bytes(w);
        self.type_.to_le_bytes(w);
        w.write(self.long_offset);
        w.write(self.long_length);
    }
}

impl_xrequest_with_response!(GetProperty);

/*
MapWindow
     1     8                               opcode
     1                                     unused
     2     2                               request length
     4     WINDOW                          window
*/

#[derive(Debug, Clone, Copy)]
pub struct MapWindow {
    pub window: WindowId,
}

impl ToLeBytes for MapWindow {
    fn to_le_bytes(&self, w: &mut WriteBuffer) {
        w.write(opcodes::MAP_WINDOW);
        w.pad(1); // unused
        w.write(0u16); // length
        self.window.to_le_bytes(w);
    }
}

impl_xrequest_without_response!(MapWindow);

impl_enum! {
    #[repr(u8)]
    enum StackMode {
        Above = 0,
        Below = 1,
        TopIf = 2,
        BottomIf = 3,
        Opposite = 4,
    }
}

bitmask! {
    #[repr(u16)]
    bitmask ConfigureWindowMask {
        X = 0x0001,
        Y = 0x0002,
        WIDTH = 0x0004,
        HEIGHT = 0x0008,
        BORDER_WIDTH = 0x0010,
        SIBLING = 0x0020,
        STACK_MODE = 0x0040,
    }
}

/// Values of [`ConfigureWindow`], unset values are left unchanged by the server
#[derive(Debug, Clone, Copy, Default)]
pub struct ConfigureWindowValues {
    pub x: Option<i16>,
    pub y: Option<i16>,
    pub width: Option<u16>,
    pub height: Option<u16>,
    pub border_width: Option<u16>,
    pub sibling: Option<WindowId>,
    pub stack_mode: Option<StackMode>,
}

impl ConfigureWindowValues {
    fn mask_and_values(&self) -> (ConfigureWindowMask, Vec<u32>) {
        let mut mask = ConfigureWindowMask::empty();
        let mut values = Vec::with_capacity(7);
        let fields = [
            (ConfigureWindowMask::X, self.x.map(|v| v as i32 as u32)),
            (ConfigureWindowMask::Y, self.y.map(|v| v as i32 as u32)),
            (ConfigureWindowMask::WIDTH, self.width.map(u32::from)),
            (ConfigureWindowMask::HEIGHT, self.height.map(u32::from)),
            (
                ConfigureWindowMask::BORDER_WIDTH,
                self.border_width.map(u32::from),
            ),
            (ConfigureWindowMask::SIBLING, self.sibling.map(u32::from)),
            (
                ConfigureWindowMask::STACK_MODE,
                self.stack_mode.map(|mode| u8::from(mode) as u32),
            ),
        ];
        for (bit, value) in fields {
            if let Some(value) = value {
                mask |= bit;
                values.push(value);
            }
        }
        (mask, values)
    }
}

/*
ConfigureWindow
     1     12                              opcode
     1                                     unused
     2     3+n                             request length
     4     WINDOW                          window
     2     BITMASK                         value-mask
     2                                     unused
     4n     LISTofVALUE                    value-list
*/

#[derive(Debug, Clone, Copy)]
pub struct ConfigureWindow {
    pub window: WindowId,
    pub values: ConfigureWindowValues,
}

impl ToLeBytes for ConfigureWindow {
    fn to_le_bytes(&self, w: &mut WriteBuffer) {
        let (mask, values) = self.values.mask_and_values();

        w.write(opcodes::CONFIGURE_WINDOW);
        w.pad(1); // unused
        w.write(0u16); // length
        self.window.to_le_bytes(w);
        w.write(mask.raw());
        w.pad(2); // unused
        for value in values {
            w.write(value);
        }
    }
}

impl_xrequest_without_response!(ConfigureWindow);

/*
QueryExtension
     1     98                              opcode
     1                                     unused
     2     2+(n+p)/4                       request length
     2     n                               length of name
     2                                     unused
     n     STRING8                         name
     p                                     unused, p=pad(n)
*/

#[derive(Debug, Clone)]
pub struct QueryExtension {
    pub name: Vec<u8>,
}

impl ToLeBytes for QueryExtension {
    fn to_le_bytes(&self, w: &mut WriteBuffer) {
        w.write(opcodes::QUERY_EXTENSION);
        w.pad(1); // unused
        w.write(0u16); // length
        w.write(self.name.len() as u16);
        w.pad(2); // unused
        w.write_padded(&self.name);
    }
}

impl_xrequest_with_response!(QueryExtension);

/*
NoOperation
     1     127                             opcode
     1                                     unused
     2     1+n                             request length
     4n                                    unused
*/

#[derive(Debug, Clone, Copy, Default)]
pub struct NoOperation {
    /// Extra 4 byte units of padding carried by the request
    pub extra_length: u32,
}

impl ToLeBytes for NoOperation {
    fn to_le_bytes(&self, w: &mut WriteBuffer) {
        w.write(opcodes::NO_OPERATION);
        w.pad(1); // unused
        w.write(0u16); // length
        w.pad(self.extra_length as usize * 4);
    }
}

impl_xrequest_without_response!(NoOperation);

#[cfg(test)]
mod tests {
    use super::*;

    fn encoded<R: XRequest>(request: &R) -> Vec<u8> {
        let encoded = EncodedRequest::new(request);
        frame_request(encoded.bytes, 0xffff, None).unwrap()
    }

    #[test]
    fn intern_atom_is_padded() {
        let bytes = encoded(&InternAtom {
            only_if_exists: true,
            name: b"WM_PROTOCOLS".to_vec(),
        });
        assert_eq!(bytes.len(), 8 + 12);
        assert_eq!(&bytes[0..8], &[16, 1, 5, 0, 12, 0, 0, 0]);
        assert_eq!(&bytes[8..], b"WM_PROTOCOLS");

        let bytes = encoded(&InternAtom {
            only_if_exists: false,
            name: b"_NET_WM_NAME".to_vec(),
        });
        assert_eq!(bytes[2], 5);

        let bytes = encoded(&QueryExtension {
            name: b"RANDR".to_vec(),
        });
        assert_eq!(&bytes[0..8], &[98, 0, 4, 0, 5, 0, 0, 0]);
        assert_eq!(&bytes[8..], b"RANDR\0\0\0");
    }

    #[test]
    fn configure_window_only_sends_set_values() {
        let bytes = encoded(&ConfigureWindow {
            window: WindowId::from(0x0040_0001),
            values: ConfigureWindowValues {
                width: Some(800),
                height: Some(600),
                stack_mode: Some(StackMode::Above),
                ..Default::default()
            },
        });
        assert_eq!(bytes.len(), 12 + 3 * 4);
        assert_eq!(&bytes[0..4], &[12, 0, 6, 0]);
        assert_eq!(&bytes[8..10], &0x004cu16.to_le_bytes());
        assert_eq!(&bytes[12..16], &800u32.to_le_bytes());
        assert_eq!(&bytes[16..20], &600u32.to_le_bytes());
        assert_eq!(&bytes[20..24], &0u32.to_le_bytes());
    }

    #[test]
    fn change_property_length_in_format_units() {
        let bytes = encoded(&ChangeProperty {
            mode: ChangePropertyMode::Replace,
            window: WindowId::from(1),
            property: AtomId::WM_NAME,
            type_: AtomId::CARDINAL,
            format: 32,
            data: vec![0; 12],
        });
        assert_eq!(&bytes[20..24], &3u32.to_le_bytes());
        assert_eq!(bytes[2], 9);
    }

    #[test]
    fn request_within_limit_keeps_regular_header() {
        let bytes = frame_request(vec![127, 0, 0, 0, 0, 0, 0, 0], 2, Some(100)).unwrap();
        assert_eq!(bytes, vec![127, 0, 2, 0, 0, 0, 0, 0]);
    }

    #[test]
    fn oversized_request_is_promoted_to_big_request() {
        let encoded = EncodedRequest::new(&NoOperation { extra_length: 9 });
        assert_eq!(encoded.bytes.len(), 40);

        let bytes = frame_request(encoded.bytes, 4, Some(0x0040_0000)).unwrap();
        assert_eq!(bytes.len(), 44);
        assert_eq!(&bytes[0..4], &[127, 0, 0, 0]);
        // 10 units of the original request plus the extra length field
        assert_eq!(&bytes[4..8], &11u32.to_le_bytes());
        assert!(bytes[8..].iter().all(|b| *b == 0));
    }

    #[test]
    fn request_too_long_even_for_big_requests() {
        let encoded = EncodedRequest::new(&NoOperation { extra_length: 9 });
        let err = frame_request(encoded.bytes, 4, Some(10)).unwrap_err();
        assert!(matches!(
            err,
            Error::RequestTooLong {
                length: 10,
                maximum: 10
            }
        ));

        let encoded = EncodedRequest::new(&NoOperation { extra_length: 9 });
        let err = frame_request(encoded.bytes, 4, None).unwrap_err();
        assert!(matches!(err, Error::RequestTooLong { maximum: 4, .. }));
    }

    #[test]
    fn fds_travel_only_when_attached() {
        let map = MapWindow {
            window: WindowId::from(0x0040_0001),
        };
        assert!(EncodedRequest::new(&map).fds.is_empty());

        let null = std::fs::File::open("/dev/null").unwrap();
        let encoded = EncodedRequest::new(&map).with_fds(vec![OwnedFd::from(null)]);
        assert_eq!(encoded.fds.len(), 1);
        assert_eq!(encoded.bytes.len(), 8);
        assert!(!encoded.reply_expected);
    }
}
