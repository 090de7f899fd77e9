//! Connection setup, the only exchange that does not follow the request/reply framing.

use crate::{
    error::Error,
    utils::{display_maybe_utf8, impl_enum, pad},
    wire::{FromLeBytes, ReadBuffer, ToLeBytes, WriteBuffer},
    ColormapId, VisualId, WindowId,
};
use std::fmt::{self, Display};

pub const PROTOCOL_MAJOR_VERSION: u16 = 11;
pub const PROTOCOL_MINOR_VERSION: u16 = 0;

/// Little endian byte order marker
const BYTE_ORDER_LSB_FIRST: u8 = b'l';

/// Size of the part of the setup response that tells how long the rest is
pub const SETUP_HEADER_SIZE: usize = 8;

#[derive(Debug, Clone)]
pub struct InitializeConnection {
    pub authorization_protocol_name: Vec<u8>,
    pub authorization_protocol_data: Vec<u8>,
}

impl ToLeBytes for InitializeConnection {
    fn to_le_bytes(&self, w: &mut WriteBuffer) {
        w.write(BYTE_ORDER_LSB_FIRST);
        w.pad(1);
        w.write(PROTOCOL_MAJOR_VERSION);
        w.write(PROTOCOL_MINOR_VERSION);
        w.write(self.authorization_protocol_name.len() as u16);
        w.write(self.authorization_protocol_data.len() as u16);
        w.pad(2); // unused
        w.write_padded(&self.authorization_protocol_name);
        w.write_padded(&self.authorization_protocol_data);
    }
}

/// Number of bytes that follow the 8 byte setup header
pub fn additional_setup_length(header: &[u8; SETUP_HEADER_SIZE]) -> usize {
    u16::from_le_bytes([header[6], header[7]]) as usize * 4
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SetupRefused {
    pub protocol_major_version: u16,
    pub protocol_minor_version: u16,
    pub reason: Vec<u8>,
}

impl Display for SetupRefused {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Initialize Connection Response Refused: Protocol: {}.{}. Reason: {}",
            self.protocol_major_version,
            self.protocol_minor_version,
            display_maybe_utf8(&self.reason)
        )
    }
}

#[derive(Debug, Clone)]
pub enum SetupResponse {
    Refused(SetupRefused),
    Authenticate(Vec<u8>),
    Success(Setup),
}

impl FromLeBytes for SetupResponse {
    fn from_le_bytes(r: &mut ReadBuffer<'_>) -> Result<Self, Error> {
        let status: u8 = r.read()?;
        match status {
            0 => {
                let reason_length: u8 = r.read()?;
                let protocol_major_version = r.read()?;
                let protocol_minor_version = r.read()?;
                let _length: u16 = r.read()?;
                let reason = r.read_bytes(reason_length as usize)?.to_vec();
                Ok(Self::Refused(SetupRefused {
                    protocol_major_version,
                    protocol_minor_version,
                    reason,
                }))
            }
            1 => Ok(Self::Success(Setup::from_le_bytes(r)?)),
            2 => {
                r.skip(5)?;
                let length: u16 = r.read()?;
                let reason = r.read_bytes(length as usize * 4)?;
                let reason = reason.split(|b| *b == 0).next().unwrap_or_default();
                Ok(Self::Authenticate(reason.to_vec()))
            }
            _ => Err(Error::InvalidResponse(stringify!(SetupResponse))),
        }
    }
}

impl_enum! {
    #[repr(u8)]
    enum VisualClass {
        StaticGray = 0,
        GrayScale = 1,
        StaticColor = 2,
        PseudoColor = 3,
        TrueColor = 4,
        DirectColor = 5,
    }
}

impl_enum! {
    #[repr(u8)]
    enum BackingStore {
        NotUseful = 0,
        WhenMapped = 1,
        Always = 2,
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Visual {
    pub id: VisualId,
    pub class: VisualClass,
    pub bits_per_rgb_value: u8,
    pub colormap_entries: u16,
    pub red_mask: u32,
    pub green_mask: u32,
    pub blue_mask: u32,
}

impl FromLeBytes for Visual {
    fn from_le_bytes(r: &mut ReadBuffer<'_>) -> Result<Self, Error> {
        let id = VisualId::from_le_bytes(r)?;
        let class = VisualClass::from_le_bytes(r)?;
        let bits_per_rgb_value = r.read()?;
        let colormap_entries = r.read()?;
        let red_mask = r.read()?;
        let green_mask = r.read()?;
        let blue_mask = r.read()?;
        r.skip(4)?; // unused
        Ok(Self {
            id,
            class,
            bits_per_rgb_value,
            colormap_entries,
            red_mask,
            green_mask,
            blue_mask,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Depth {
    pub depth: u8,
    pub visuals: Vec<Visual>,
}

impl FromLeBytes for Depth {
    fn from_le_bytes(r: &mut ReadBuffer<'_>) -> Result<Self, Error> {
        let depth = r.read()?;
        r.skip(1)?; // unused
        let visuals_length: u16 = r.read()?;
        r.skip(4)?; // unused
        let visuals = r.read_many(visuals_length as usize)?;
        Ok(Self { depth, visuals })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Screen {
    pub root: WindowId,
    pub default_colormap: ColormapId,
    pub white_pixel: u32,
    pub black_pixel: u32,
    pub current_input_masks: u32,
    pub width_in_pixels: u16,
    pub height_in_pixels: u16,
    pub width_in_millimeters: u16,
    pub height_in_millimeters: u16,
    pub min_installed_maps: u16,
    pub max_installed_maps: u16,
    pub root_visual: VisualId,
    pub backing_stores: BackingStore,
    pub save_unders: bool,
    pub root_depth: u8,
    pub allowed_depths: Vec<Depth>,
}

impl Screen {
    pub fn visual(&self, id: VisualId) -> Option<(&Depth, &Visual)> {
        self.allowed_depths.iter().find_map(|depth| {
            depth
                .visuals
                .iter()
                .find(|visual| visual.id == id)
                .map(|visual| (depth, visual))
        })
    }
}

impl FromLeBytes for Screen {
    fn from_le_bytes(r: &mut ReadBuffer<'_>) -> Result<Self, Error> {
        let root = WindowId::from_le_bytes(r)?;
        let default_colormap = ColormapId::from_le_bytes(r)?;
        let white_pixel = r.read()?;
        let black_pixel = r.read()?;
        let current_input_masks = r.read()?;
        let width_in_pixels = r.read()?;
        let height_in_pixels = r.read()?;
        let width_in_millimeters = r.read()?;
        let height_in_millimeters = r.read()?;
        let min_installed_maps = r.read()?;
        let max_installed_maps = r.read()?;
        let root_visual = VisualId::from_le_bytes(r)?;
        let backing_stores = BackingStore::from_le_bytes(r)?;
        let save_unders = r.read()?;
        let root_depth = r.read()?;
        let allowed_depths_length: u8 = r.read()?;
        let allowed_depths = r.read_many(allowed_depths_length as usize)?;

        Ok(Self {
            root,
            default_colormap,
            white_pixel,
            black_pixel,
            current_input_masks,
            width_in_pixels,
            height_in_pixels,
            width_in_millimeters,
            height_in_millimeters,
            min_installed_maps,
            max_installed_maps,
            root_visual,
            backing_stores,
            save_unders,
            root_depth,
            allowed_depths,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Format {
    pub depth: u8,
    pub bits_per_pixel: u8,
    pub scanline_pad: u8,
}

impl FromLeBytes for Format {
    fn from_le_bytes(r: &mut ReadBuffer<'_>) -> Result<Self, Error> {
        let depth = r.read()?;
        let bits_per_pixel = r.read()?;
        let scanline_pad = r.read()?;
        r.skip(5)?; // unused
        Ok(Self {
            depth,
            bits_per_pixel,
            scanline_pad,
        })
    }
}

/// Information sent by the server once, when the connection is established
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Setup {
    pub protocol_major_version: u16,
    pub protocol_minor_version: u16,
    pub release_number: u32,
    pub resource_id_base: u32,
    pub resource_id_mask: u32,
    pub motion_buffer_size: u32,
    /// In 4 byte units
    pub maximum_request_length: u16,
    pub image_byte_order: u8,
    pub bitmap_format_byte_order: u8,
    pub bitmap_format_scanline_unit: u8,
    pub bitmap_format_scanline_pad: u8,
    pub min_keycode: u8,
    pub max_keycode: u8,
    pub vendor: Vec<u8>,
    pub pixmap_formats: Vec<Format>,
    pub screens: Vec<Screen>,
}

impl Setup {
    pub fn screen_for_root(&self, root: WindowId) -> Option<&Screen> {
        self.screens.iter().find(|screen| screen.root == root)
    }

    pub(crate) fn screen_for_root_mut(&mut self, root: WindowId) -> Option<&mut Screen> {
        self.screens.iter_mut().find(|screen| screen.root == root)
    }
}

impl FromLeBytes for Setup {
    /// Bytes must start after the status byte
    fn from_le_bytes(r: &mut ReadBuffer<'_>) -> Result<Self, Error> {
        r.skip(1)?; // unused
        let protocol_major_version = r.read()?;
        let protocol_minor_version = r.read()?;
        let _length: u16 = r.read()?;
        let release_number = r.read()?;
        let resource_id_base = r.read()?;
        let resource_id_mask = r.read()?;
        let motion_buffer_size = r.read()?;
        let vendor_length: u16 = r.read()?;
        let maximum_request_length = r.read()?;
        let screens_length: u8 = r.read()?;
        let formats_length: u8 = r.read()?;
        let image_byte_order = r.read()?;
        let bitmap_format_byte_order = r.read()?;
        let bitmap_format_scanline_unit = r.read()?;
        let bitmap_format_scanline_pad = r.read()?;
        let min_keycode = r.read()?;
        let max_keycode = r.read()?;
        r.skip(4)?; // unused
        let vendor = r.read_bytes(vendor_length as usize)?.to_vec();
        r.skip(pad(vendor_length as usize))?;
        let pixmap_formats = r.read_many(formats_length as usize)?;
        let screens = r.read_many(screens_length as usize)?;

        Ok(Self {
            protocol_major_version,
            protocol_minor_version,
            release_number,
            resource_id_base,
            resource_id_mask,
            motion_buffer_size,
            maximum_request_length,
            image_byte_order,
            bitmap_format_byte_order,
            bitmap_format_scanline_unit,
            bitmap_format_scanline_pad,
            min_keycode,
            max_keycode,
            vendor,
            pixmap_formats,
            screens,
        })
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    /// Setup response with one screen of `width`x`height` on root `root`
    pub(crate) fn setup_bytes(root: u32, width: u16, height: u16) -> Vec<u8> {
        let vendor = b"Just";
        let mut w = WriteBuffer::new();
        w.write(1u8); // success
        w.pad(1);
        w.write(11u16);
        w.write(0u16);
        w.write(0u16); // length, not checked by the decoder
        w.write(12_000_000u32); // release
        w.write(0x0040_0000u32); // resource id base
        w.write(0x001f_ffffu32); // resource id mask
        w.write(256u32); // motion buffer
        w.write(vendor.len() as u16);
        w.write(0xffffu16); // maximum request length
        w.write(1u8); // screens
        w.write(1u8); // formats
        w.write(0u8); // image byte order
        w.write(0u8); // bitmap byte order
        w.write(32u8);
        w.write(32u8);
        w.write(8u8); // min keycode
        w.write(255u8); // max keycode
        w.pad(4);
        w.write_padded(vendor);

        // format
        w.write(24u8);
        w.write(32u8);
        w.write(32u8);
        w.pad(5);

        // screen
        w.write(root);
        w.write(0x20u32); // colormap
        w.write(0x00ff_ffffu32);
        w.write(0u32);
        w.write(0u32);
        w.write(width);
        w.write(height);
        w.write(508u16);
        w.write(285u16);
        w.write(1u16);
        w.write(1u16);
        w.write(0x21u32); // root visual
        w.write(0u8); // backing stores
        w.write(false);
        w.write(24u8);
        w.write(1u8); // depths

        // depth
        w.write(24u8);
        w.pad(1);
        w.write(1u16);
        w.pad(4);

        // visual
        w.write(0x21u32);
        w.write(4u8); // TrueColor
        w.write(8u8);
        w.write(256u16);
        w.write(0x00ff_0000u32);
        w.write(0x0000_ff00u32);
        w.write(0x0000_00ffu32);
        w.pad(4);

        w.into_bytes()
    }

    #[test]
    fn decode_success() {
        let raw = setup_bytes(0x1e3, 1920, 1080);
        let mut r = ReadBuffer::new(&raw);
        let setup = match SetupResponse::from_le_bytes(&mut r).unwrap() {
            SetupResponse::Success(setup) => setup,
            other => panic!("Expected success, got {:?}", other),
        };
        assert_eq!(r.remaining(), 0);

        assert_eq!(setup.vendor, b"Just");
        assert_eq!(setup.maximum_request_length, 0xffff);
        assert_eq!(setup.pixmap_formats[0].bits_per_pixel, 32);

        let screen = setup.screen_for_root(WindowId::from(0x1e3)).unwrap();
        assert_eq!(screen.width_in_pixels, 1920);
        assert_eq!(screen.height_in_pixels, 1080);
        let (depth, visual) = screen.visual(screen.root_visual).unwrap();
        assert_eq!(depth.depth, 24);
        assert_eq!(visual.class, VisualClass::TrueColor);
    }

    #[test]
    fn decode_refused() {
        let raw = [
            0, 6, 11, 0, 0, 0, 2, 0, b'n', b'o', b' ', b'w', b'a', b'y', 0, 0,
        ];
        let mut r = ReadBuffer::new(&raw);
        match SetupResponse::from_le_bytes(&mut r).unwrap() {
            SetupResponse::Refused(refused) => {
                assert_eq!(refused.protocol_major_version, 11);
                assert_eq!(refused.reason, b"no way");
            }
            other => panic!("Expected refusal, got {:?}", other),
        }
    }

    #[test]
    fn encode_initialize_connection() {
        let init = InitializeConnection {
            authorization_protocol_name: b"MIT-MAGIC-COOKIE-1".to_vec(),
            authorization_protocol_data: vec![0xab; 16],
        };
        let mut w = WriteBuffer::new();
        init.to_le_bytes(&mut w);
        let bytes = w.into_bytes();

        assert_eq!(&bytes[0..12], &[b'l', 0, 11, 0, 0, 0, 18, 0, 16, 0, 0, 0]);
        assert_eq!(bytes.len(), 12 + 20 + 16);
        assert_eq!(&bytes[12..30], b"MIT-MAGIC-COOKIE-1");
        assert_eq!(&bytes[30..32], &[0, 0]);
    }
}
