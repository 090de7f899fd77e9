use crate::{
    atoms::AtomId,
    error::Error,
    transport::{RawResponse, X_REPLY},
    utils::{display_maybe_utf8, impl_enum},
    wire::{FromLeBytes, ReadBuffer},
    xerror::XError,
    WindowId,
};
use std::any::type_name;

/// Reply of a request, as decoded from the raw reply bytes
pub trait XReply: FromLeBytes + 'static {
    /// What a handle to the request resolves to
    type Response;

    /// `false` for requests whose only possible response is an error
    const HAS_REPLY: bool = true;

    fn into_response(reply: Option<Self>, error: Option<XError>) -> Self::Response;
}

/// Outcome of a request that has a reply. Both fields are `None` if the connection failed before
/// the response arrived.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Response<R> {
    pub reply: Option<R>,
    pub error: Option<XError>,
}

impl<R> Response<R> {
    pub fn ok(self) -> Option<R> {
        self.reply
    }

    pub fn is_error(&self) -> bool {
        self.error.is_some()
    }
}

macro_rules! impl_xreply {
    ($t:tt) => {
        impl $crate::replies::XReply for $t {
            type Response = $crate::replies::Response<$t>;

            #[inline(always)]
            fn into_response(
                reply: Option<Self>,
                error: Option<$crate::xerror::XError>,
            ) -> Self::Response {
                $crate::replies::Response { reply, error }
            }
        }
    };
}
pub(crate) use impl_xreply;

/// Marker for requests without a reply. Resolves to the error, if there was one.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NoReply;

impl FromLeBytes for NoReply {
    fn from_le_bytes(_r: &mut ReadBuffer<'_>) -> Result<Self, Error> {
        Ok(NoReply)
    }
}

impl XReply for NoReply {
    type Response = Option<XError>;

    const HAS_REPLY: bool = false;

    fn into_response(_reply: Option<Self>, error: Option<XError>) -> Self::Response {
        error
    }
}

/// Turn raw response bytes into the typed response. Bytes that fail to decode are logged and
/// treated as missing.
pub(crate) fn decode_response<R: XReply>(raw: RawResponse) -> R::Response {
    let reply = raw
        .reply
        .filter(|raw| R::HAS_REPLY && !raw.bytes.is_empty())
        .and_then(|raw| match R::from_le_bytes(&mut ReadBuffer::new(&raw.bytes)) {
            Ok(reply) => Some(reply),
            Err(err) => {
                tracing::warn!("Could not decode {} reply: {}", type_name::<R>(), err);
                None
            }
        });
    let error = raw.error.and_then(|raw| match XError::from_raw(&raw) {
        Ok(error) => Some(error),
        Err(err) => {
            tracing::warn!("Could not decode X error: {}", err);
            None
        }
    });
    R::into_response(reply, error)
}

/// Consume the 8 byte reply header and return the byte of reply data stored in it
pub(crate) fn read_reply_header(r: &mut ReadBuffer<'_>) -> Result<u8, Error> {
    let response_type: u8 = r.read()?;
    if response_type != X_REPLY {
        return Err(Error::InvalidResponse("reply"));
    }
    let data = r.read()?;
    let _sequence_number: u16 = r.read()?;
    let _reply_length: u32 = r.read()?;
    Ok(data)
}

impl_enum! {
    #[repr(u8)]
    enum RevertTo {
        None = 0,
        PointerRoot = 1,
        Parent = 2,
    }
}

/*
GetInputFocus
▶
     1     1                               Reply
     1                                     revert-to
          0     None
          1     PointerRoot
          2     Parent
     2     CARD16                          sequence number
     4     0                               reply length
     4     WINDOW                          focus
          0     None
          1     PointerRoot
     20                                    unused
*/

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GetInputFocus {
    pub revert_to: RevertTo,
    /// Can also be `0` (None) or `1` (PointerRoot)
    pub focus: WindowId,
}

impl FromLeBytes for GetInputFocus {
    fn from_le_bytes(r: &mut ReadBuffer<'_>) -> Result<Self, Error> {
        let revert_to = read_reply_header(r)?;
        let revert_to = RevertTo::try_from(revert_to)
            .map_err(|raw| Error::InvalidEnum("RevertTo", raw as u64))?;
        let focus = WindowId::from_le_bytes(r)?;
        Ok(Self { revert_to, focus })
    }
}

impl_xreply!(GetInputFocus);

/*
GetGeometry
▶
     1     1                               Reply
     1     CARD8                           depth
     2     CARD16                          sequence number
     4     0                               reply length
     4     WINDOW                          root
     2     INT16                           x
     2     INT16                           y
     2     CARD16                          width
     2     CARD16                          height
     2     CARD16                          border-width
     10                                    unused
*/

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GetGeometry {
    pub depth: u8,
    pub root: WindowId,
    pub x: i16,
    pub y: i16,
    pub width: u16,
    pub height: u16,
    pub border_width: u16,
}

impl FromLeBytes for GetGeometry {
    fn from_le_bytes(r: &mut ReadBuffer<'_>) -> Result<Self, Error> {
        let depth = read_reply_header(r)?;
        let root = WindowId::from_le_bytes(r)?;
        let x = r.read()?;
        let y = r.read()?;
        let width = r.read()?;
        let height = r.read()?;
        let border_width = r.read()?;
        Ok(Self {
            depth,
            root,
            x,
            y,
            width,
            height,
            border_width,
        })
    }
}

impl_xreply!(GetGeometry);

/*
InternAtom
▶
     1     1                               Reply
     1                                     unused
     2     CARD16                          sequence number
     4     0                               reply length
     4     ATOM                            atom
           0     None
     20                                    unused
*/

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InternAtom {
    /// [`AtomId::NONE`] if `only_if_exists` was set and the atom does not exist
    pub atom: AtomId,
}

impl FromLeBytes for InternAtom {
    fn from_le_bytes(r: &mut ReadBuffer<'_>) -> Result<Self, Error> {
        read_reply_header(r)?;
        let atom = AtomId::from_le_bytes(r)?;
        Ok(Self { atom })
    }
}

impl_xreply!(InternAtom);

/*
GetAtomName
▶
     1     1                               Reply
     1                                     unused
     2     CARD16                          sequence number
     4     (n+p)/4                         reply length
     2     n                               length of name
     22                                    unused
     n     STRING8                         name
     p                                     unused, p=pad(n)
*/

#[derive(Clone, PartialEq, Eq)]
pub struct GetAtomName {
    pub name: Vec<u8>,
}

impl std::fmt::Debug for GetAtomName {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GetAtomName")
            .field("name", &display_maybe_utf8(&self.name))
            .finish()
    }
}

impl FromLeBytes for GetAtomName {
    fn from_le_bytes(r: &mut ReadBuffer<'_>) -> Result<Self, Error> {
        read_reply_header(r)?;
        let name_length: u16 = r.read()?;
        r.skip(22)?; // unused
        let name = r.read_bytes(name_length as usize)?.to_vec();
        Ok(Self { name })
    }
}

impl_xreply!(GetAtomName);

/*
GetProperty
▶
     1     1                               Reply
     1     CARD8                           format
     2     CARD16                          sequence number
     4     (n+p)/4                         reply length
     4     ATOM                            type
          0     None
     4     CARD32                          bytes-after
     4     CARD32                          length of value in format units
                    (= 0 for format = 0)
                    (= n for format = 8)
                    (= n/2 for format = 16)
                    (= n/4 for format = 32)
     12                                    unused
     n     LISTofBYTE                      value
     p                                     unused, p=pad(n)
*/

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GetProperty {
    /// `0` if the property does not exist
    pub format: u8,
    pub type_: AtomId,
    pub bytes_after: u32,
    pub value: Vec<u8>,
}

impl GetProperty {
    /// Value as a list of 32 bit items, `None` for other formats
    pub fn value32(&self) -> Option<impl Iterator<Item = u32> + '_> {
        (self.format == 32).then(|| {
            self.value
                .chunks_exact(4)
                .map(|raw| u32::from_le_bytes([raw[0], raw[1], raw[2], raw[3]]))
        })
    }
}

impl FromLeBytes for GetProperty {
    fn from_le_bytes(r: &mut ReadBuffer<'_>) -> Result<Self, Error> {
        let format = read_reply_header(r)?;
        let type_ = AtomId::from_le_bytes(r)?;
        let bytes_after = r.read()?;
        let value_length: u32 = r.read()?;
        r.skip(12)?; // unused
        let value = r
            .read_bytes(value_length as usize * (format as usize / 8))?
            .to_vec();
        Ok(Self {
            format,
            type_,
            bytes_after,
            value,
        })
    }
}

impl_xreply!(GetProperty);

/*
QueryExtension
▶
     1     1                               Reply
     1                                     unused
     2     CARD16                          sequence number
     4     0                               reply length
     1     BOOL                            present
     1     CARD8                           major-opcode
     1     CARD8                           first-event
     1     CARD8                           first-error
     20                                    unused
*/

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueryExtension {
    pub present: bool,
    pub major_opcode: u8,
    pub first_event: u8,
    pub first_error: u8,
}

impl FromLeBytes for QueryExtension {
    fn from_le_bytes(r: &mut ReadBuffer<'_>) -> Result<Self, Error> {
        read_reply_header(r)?;
        let present = r.read()?;
        let major_opcode = r.read()?;
        let first_event = r.read()?;
        let first_error = r.read()?;
        Ok(Self {
            present,
            major_opcode,
            first_event,
            first_error,
        })
    }
}

impl_xreply!(QueryExtension);
