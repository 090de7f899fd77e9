//! RANDR extension
//!
//! Only the parts needed to track screen size changes: version negotiation, event selection and
//! `ScreenChangeNotify`.

use crate::{
    error::Error,
    replies::{impl_xreply, read_reply_header},
    requests::{XExtensionRequest, XRequestBase},
    utils::bitmask,
    wire::{FromLeBytes, ReadBuffer, ToLeBytes, WriteBuffer},
    WindowId,
};

/// Name of the extension as returned by the X11 server
pub const EXTENSION_NAME: &str = "RANDR";

pub const SUPPORTED_MAJOR: u32 = 1;
pub const SUPPORTED_MINOR: u32 = 6;

/// Offset of `ScreenChangeNotify` from the first event of the extension
pub const SCREEN_CHANGE_NOTIFY: u8 = 0;

mod opcodes {
    pub const QUERY_VERSION: u8 = 0;
    pub const SELECT_INPUT: u8 = 4;
}

/*
┌───
    ROTATION
        0x0001  Rotate_0
        0x0002  Rotate_90
        0x0004  Rotate_180
        0x0008  Rotate_270
        0x0010  Reflect_X
        0x0020  Reflect_Y
└───
*/

bitmask! {
    #[repr(u16)]
    bitmask Rotation {
        ROTATE_0 = 0x0001,
        ROTATE_90 = 0x0002,
        ROTATE_180 = 0x0004,
        ROTATE_270 = 0x0008,
        REFLECT_X = 0x0010,
        REFLECT_Y = 0x0020,
    }
}

impl Rotation {
    /// `true` if the screen is turned on its side, so width and height swap places
    pub fn is_sideways(self) -> bool {
        self.intersects(Self::ROTATE_90 | Self::ROTATE_270)
    }
}

bitmask! {
    #[repr(u16)]
    bitmask SelectMask {
        SCREEN_CHANGE_NOTIFY_MASK = 0x0001,
        CRTC_CHANGE_NOTIFY_MASK = 0x0002,
        OUTPUT_CHANGE_NOTIFY_MASK = 0x0004,
        OUTPUT_PROPERTY_NOTIFY_MASK = 0x0008,
        PROVIDER_CHANGE_NOTIFY_MASK = 0x0010,
        PROVIDER_PROPERTY_NOTIFY_MASK = 0x0020,
        RESOURCE_CHANGE_NOTIFY_MASK = 0x0040,
    }
}

/*
┌───
    RRQueryVersion

        1       CARD8                   major opcode
        1       0                       RandR opcode
        2       3                       length
        4       CARD32                  major version
        4       CARD32                  minor version
     ▶
        1       1                       Reply
        1                               unused
        2       CARD16                  sequence number
        4       0                       reply length
        4       CARD32                  major version
        4       CARD32                  minor version
        16                              unused
└───
*/

#[derive(Debug, Clone, Copy)]
pub struct QueryVersion {
    pub major_version: u32,
    pub minor_version: u32,
}

impl Default for QueryVersion {
    fn default() -> Self {
        Self {
            major_version: SUPPORTED_MAJOR,
            minor_version: SUPPORTED_MINOR,
        }
    }
}

impl ToLeBytes for QueryVersion {
    fn to_le_bytes(&self, w: &mut WriteBuffer) {
        w.write(opcodes::QUERY_VERSION);
        w.write(0u16); // length
        w.write(self.major_version);
        w.write(self.minor_version);
    }
}

impl XRequestBase for QueryVersion {
    type Reply = QueryVersionReply;

    const NAME: &'static str = "RRQueryVersion";
}

impl XExtensionRequest for QueryVersion {
    const EXTENSION: &'static str = EXTENSION_NAME;
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueryVersionReply {
    pub major_version: u32,
    pub minor_version: u32,
}

impl FromLeBytes for QueryVersionReply {
    fn from_le_bytes(r: &mut ReadBuffer<'_>) -> Result<Self, Error> {
        read_reply_header(r)?;
        let major_version = r.read()?;
        let minor_version = r.read()?;
        Ok(Self {
            major_version,
            minor_version,
        })
    }
}

impl_xreply!(QueryVersionReply);

/*
┌───
    RRSelectInput

        1       CARD8                   major opcode
        1       4                       RandR opcode
        2       3                       length
        4       WINDOW                  window
        2       SETofRRSELECTMASK       enable
        2                               unused
└───
*/

#[derive(Debug, Clone, Copy)]
pub struct SelectInput {
    pub window: WindowId,
    pub enable: SelectMask,
}

impl ToLeBytes for SelectInput {
    fn to_le_bytes(&self, w: &mut WriteBuffer) {
        w.write(opcodes::SELECT_INPUT);
        w.write(0u16); // length
        self.window.to_le_bytes(w);
        w.write(self.enable.raw());
        w.pad(2); // unused
    }
}

impl XRequestBase for SelectInput {
    type Reply = crate::replies::NoReply;

    const NAME: &'static str = "RRSelectInput";
}

impl XExtensionRequest for SelectInput {
    const EXTENSION: &'static str = EXTENSION_NAME;
}

/*
┌───
    RRScreenChangeNotify

        1       CARD8                   code
        1       ROTATION                new rotation and reflection
        2       CARD16                  sequence number
        4       TIMESTAMP               timestamp
        4       TIMESTAMP               configuration timestamp
        4       WINDOW                  root window
        4       WINDOW                  request window
        2       SIZEID                  size id
        2       SUBPIXELORDER           subpixel order defined in Render
        2       CARD16                  width in pixels
        2       CARD16                  height in pixels
        2       CARD16                  width in millimeters
        2       CARD16                  height in millimeters
└───
*/

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScreenChangeNotify {
    pub rotation: Rotation,
    pub timestamp: u32,
    pub config_timestamp: u32,
    pub root: WindowId,
    pub request_window: WindowId,
    pub size_id: u16,
    pub subpixel_order: u16,
    pub width: u16,
    pub height: u16,
    pub width_in_millimeters: u16,
    pub height_in_millimeters: u16,
}

impl ScreenChangeNotify {
    /// Root window size in pixels and millimeters, as it appears after applying the rotation
    pub fn rotated_size(&self) -> (u16, u16, u16, u16) {
        if self.rotation.is_sideways() {
            (
                self.height,
                self.width,
                self.height_in_millimeters,
                self.width_in_millimeters,
            )
        } else {
            (
                self.width,
                self.height,
                self.width_in_millimeters,
                self.height_in_millimeters,
            )
        }
    }
}

impl FromLeBytes for ScreenChangeNotify {
    /// Starts right after the event code
    fn from_le_bytes(r: &mut ReadBuffer<'_>) -> Result<Self, Error> {
        let rotation: u8 = r.read()?;
        let _sequence_number: u16 = r.read()?;
        let timestamp = r.read()?;
        let config_timestamp = r.read()?;
        let root = WindowId::from_le_bytes(r)?;
        let request_window = WindowId::from_le_bytes(r)?;
        let size_id = r.read()?;
        let subpixel_order = r.read()?;
        let width = r.read()?;
        let height = r.read()?;
        let width_in_millimeters = r.read()?;
        let height_in_millimeters = r.read()?;
        Ok(Self {
            rotation: Rotation::from_raw(rotation as u16),
            timestamp,
            config_timestamp,
            root,
            request_window,
            size_id,
            subpixel_order,
            width,
            height,
            width_in_millimeters,
            height_in_millimeters,
        })
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    /// Raw `ScreenChangeNotify` as sent by the server
    pub(crate) fn screen_change_bytes(
        first_event: u8,
        sequence: u16,
        rotation: Rotation,
        root: u32,
        size: (u16, u16, u16, u16),
    ) -> Vec<u8> {
        let mut w = WriteBuffer::new();
        w.write(first_event + SCREEN_CHANGE_NOTIFY);
        w.write(rotation.raw() as u8);
        w.write(sequence);
        w.write(1000u32);
        w.write(900u32);
        w.write(root);
        w.write(root);
        w.write(0u16);
        w.write(0u16);
        w.write(size.0);
        w.write(size.1);
        w.write(size.2);
        w.write(size.3);
        w.into_bytes()
    }

    #[test]
    fn rotated_size_swaps_for_quarter_turns() {
        for (rotation, swapped) in [
            (Rotation::ROTATE_0, false),
            (Rotation::ROTATE_90, true),
            (Rotation::ROTATE_180, false),
            (Rotation::ROTATE_270, true),
            (Rotation::ROTATE_90 | Rotation::REFLECT_X, true),
        ] {
            let raw = screen_change_bytes(89, 1, rotation, 0x1e3, (1024, 768, 270, 203));
            let mut r = ReadBuffer::new(&raw);
            r.skip(1).unwrap();
            let event = ScreenChangeNotify::from_le_bytes(&mut r).unwrap();
            assert_eq!(event.rotation, rotation);
            let expected = if swapped {
                (768, 1024, 203, 270)
            } else {
                (1024, 768, 270, 203)
            };
            assert_eq!(event.rotated_size(), expected);
        }
    }
}
