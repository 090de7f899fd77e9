use crate::{
    error::Error,
    transport::RawError,
    utils::impl_enum,
    wire::{FromLeBytes, ReadBuffer},
};
use std::fmt;

impl_enum! {
    #[repr(u8)]
    enum ErrorCode {
        Request = 1,
        Value = 2,
        Window = 3,
        Pixmap = 4,
        Atom = 5,
        Cursor = 6,
        Font = 7,
        Match = 8,
        Drawable = 9,
        Access = 10,
        Alloc = 11,
        Colormap = 12,
        GContext = 13,
        IDChoice = 14,
        Name = 15,
        Length = 16,
        Implementation = 17,
    }
}

impl ErrorCode {
    pub fn description(self) -> &'static str {
        match self {
            ErrorCode::Request => "bad request code",
            ErrorCode::Value => "integer parameter out of range for operation",
            ErrorCode::Window => "invalid Window parameter",
            ErrorCode::Pixmap => "invalid Pixmap parameter",
            ErrorCode::Atom => "invalid Atom parameter",
            ErrorCode::Cursor => "invalid Cursor parameter",
            ErrorCode::Font => "invalid Font parameter",
            ErrorCode::Match => "invalid parameter attributes",
            ErrorCode::Drawable => "invalid Pixmap or Window parameter",
            ErrorCode::Access => "attempt to access private resource denied",
            ErrorCode::Alloc => "insufficient resources for operation",
            ErrorCode::Colormap => "invalid Colormap parameter",
            ErrorCode::GContext => "invalid GC parameter",
            ErrorCode::IDChoice => "invalid resource ID chosen for this connection",
            ErrorCode::Name => "named color or font does not exist",
            ErrorCode::Length => "poly request too large or internal Xlib length error",
            ErrorCode::Implementation => "server does not implement operation",
        }
    }

    /// Whether the 4 bytes after the sequence number carry the offending resource id
    pub fn has_resource_id(self) -> bool {
        matches!(
            self,
            ErrorCode::Window
                | ErrorCode::Pixmap
                | ErrorCode::Cursor
                | ErrorCode::Font
                | ErrorCode::Drawable
                | ErrorCode::Colormap
                | ErrorCode::GContext
                | ErrorCode::IDChoice
        )
    }
}

/// Error reported by the server for a single request
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct XError {
    pub error_code: u8,
    pub sequence_number: u16,
    /// Bad resource id, bad value or bad atom depending on the error code
    pub bad_value: u32,
    pub minor_opcode: u16,
    pub major_opcode: u8,
}

impl XError {
    pub fn from_raw(raw: &RawError) -> Result<Self, Error> {
        let mut r = ReadBuffer::new(&raw.bytes);
        Self::from_le_bytes(&mut r)
    }

    /// `None` for extension errors
    pub fn code(&self) -> Option<ErrorCode> {
        ErrorCode::try_from(self.error_code).ok()
    }

    pub fn request_name(&self) -> Option<&'static str> {
        CORE_REQUEST_NAMES
            .get(self.major_opcode as usize)
            .copied()
            .filter(|name| !name.is_empty())
    }
}

impl FromLeBytes for XError {
    fn from_le_bytes(r: &mut ReadBuffer<'_>) -> Result<Self, Error> {
        let response_type: u8 = r.read()?;
        if response_type != 0 {
            return Err(Error::InvalidResponse(stringify!(XError)));
        }
        let error_code = r.read()?;
        let sequence_number = r.read()?;
        let bad_value = r.read()?;
        let minor_opcode = r.read()?;
        let major_opcode = r.read()?;
        r.skip(21)?; // unused
        Ok(Self {
            error_code,
            sequence_number,
            bad_value,
            minor_opcode,
            major_opcode,
        })
    }
}

impl fmt::Display for XError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.code() {
            Some(code) => write!(f, "X error {:?} ({})", code, code.description())?,
            None => write!(f, "X extension error {}", self.error_code)?,
        }
        match self.request_name() {
            Some(name) => write!(f, " in {}", name)?,
            None => write!(
                f,
                " in request {}.{}",
                self.major_opcode, self.minor_opcode
            )?,
        }
        if self.code().map_or(false, ErrorCode::has_resource_id) {
            write!(f, ", resource id 0x{:x}", self.bad_value)?;
        } else if self.code() == Some(ErrorCode::Value) || self.code() == Some(ErrorCode::Atom) {
            write!(f, ", value 0x{:x}", self.bad_value)?;
        }
        write!(f, ", sequence {}", self.sequence_number)
    }
}

/// Core protocol request names indexed by major opcode
const CORE_REQUEST_NAMES: [&str; 128] = [
    "",
    "CreateWindow",
    "ChangeWindowAttributes",
    "GetWindowAttributes",
    "DestroyWindow",
    "DestroySubwindows",
    "ChangeSaveSet",
    "ReparentWindow",
    "MapWindow",
    "MapSubwindows",
    "UnmapWindow",
    "UnmapSubwindows",
    "ConfigureWindow",
    "CirculateWindow",
    "GetGeometry",
    "QueryTree",
    "InternAtom",
    "GetAtomName",
    "ChangeProperty",
    "DeleteProperty",
    "GetProperty",
    "ListProperties",
    "SetSelectionOwner",
    "GetSelectionOwner",
    "ConvertSelection",
    "SendEvent",
    "GrabPointer",
    "UngrabPointer",
    "GrabButton",
    "UngrabButton",
    "ChangeActivePointerGrab",
    "GrabKeyboard",
    "UngrabKeyboard",
    "GrabKey",
    "UngrabKey",
    "AllowEvents",
    "GrabServer",
    "UngrabServer",
    "QueryPointer",
    "GetMotionEvents",
    "TranslateCoordinates",
    "WarpPointer",
    "SetInputFocus",
    "GetInputFocus",
    "QueryKeymap",
    "OpenFont",
    "CloseFont",
    "QueryFont",
    "QueryTextExtents",
    "ListFonts",
    "ListFontsWithInfo",
    "SetFontPath",
    "GetFontPath",
    "CreatePixmap",
    "FreePixmap",
    "CreateGC",
    "ChangeGC",
    "CopyGC",
    "SetDashes",
    "SetClipRectangles",
    "FreeGC",
    "ClearArea",
    "CopyArea",
    "CopyPlane",
    "PolyPoint",
    "PolyLine",
    "PolySegment",
    "PolyRectangle",
    "PolyArc",
    "FillPoly",
    "PolyFillRectangle",
    "PolyFillArc",
    "PutImage",
    "GetImage",
    "PolyText8",
    "PolyText16",
    "ImageText8",
    "ImageText16",
    "CreateColormap",
    "FreeColormap",
    "CopyColormapAndFree",
    "InstallColormap",
    "UninstallColormap",
    "ListInstalledColormaps",
    "AllocColor",
    "AllocNamedColor",
    "AllocColorCells",
    "AllocColorPlanes",
    "FreeColors",
    "StoreColors",
    "StoreNamedColor",
    "QueryColors",
    "LookupColor",
    "CreateCursor",
    "CreateGlyphCursor",
    "FreeCursor",
    "RecolorCursor",
    "QueryBestSize",
    "QueryExtension",
    "ListExtensions",
    "ChangeKeyboardMapping",
    "GetKeyboardMapping",
    "ChangeKeyboardControl",
    "GetKeyboardControl",
    "Bell",
    "ChangePointerControl",
    "GetPointerControl",
    "SetScreenSaver",
    "GetScreenSaver",
    "ChangeHosts",
    "ListHosts",
    "SetAccessControl",
    "SetCloseDownMode",
    "KillClient",
    "RotateProperties",
    "ForceScreenSaver",
    "SetPointerMapping",
    "GetPointerMapping",
    "SetModifierMapping",
    "GetModifierMapping",
    "",
    "",
    "",
    "",
    "",
    "",
    "",
    "NoOperation",
];

#[cfg(test)]
mod tests {
    use super::*;

    fn raw_error(code: u8, sequence: u16, value: u32, minor: u16, major: u8) -> RawError {
        let mut bytes = [0u8; 32];
        bytes[1] = code;
        bytes[2..4].copy_from_slice(&sequence.to_le_bytes());
        bytes[4..8].copy_from_slice(&value.to_le_bytes());
        bytes[8..10].copy_from_slice(&minor.to_le_bytes());
        bytes[10] = major;
        RawError { bytes }
    }

    #[test]
    fn decode_window_error() {
        let err = XError::from_raw(&raw_error(3, 0x1234, 0x0040_0001, 0, 12)).unwrap();
        assert_eq!(err.code(), Some(ErrorCode::Window));
        assert_eq!(err.sequence_number, 0x1234);
        assert_eq!(err.bad_value, 0x0040_0001);
        assert_eq!(err.request_name(), Some("ConfigureWindow"));
        assert_eq!(
            err.to_string(),
            "X error Window (invalid Window parameter) in ConfigureWindow, resource id 0x400001, sequence 4660"
        );
    }

    #[test]
    fn extension_error_has_no_core_name() {
        let err = XError::from_raw(&raw_error(147, 7, 0, 3, 140)).unwrap();
        assert_eq!(err.code(), None);
        assert_eq!(err.request_name(), None);
        assert_eq!(
            err.to_string(),
            "X extension error 147 in request 140.3, sequence 7"
        );
    }

    #[test]
    fn opcode_table_lines_up() {
        assert_eq!(CORE_REQUEST_NAMES[43], "GetInputFocus");
        assert_eq!(CORE_REQUEST_NAMES[98], "QueryExtension");
        assert_eq!(CORE_REQUEST_NAMES[119], "GetModifierMapping");
    }
}
