//! BIG-REQUESTS extension, lifts the request length limit of the core protocol

use crate::{
    error::Error,
    replies::{impl_xreply, read_reply_header},
    requests::{XExtensionRequest, XRequestBase},
    wire::{FromLeBytes, ReadBuffer, ToLeBytes, WriteBuffer},
};

pub const EXTENSION_NAME: &str = "BIG-REQUESTS";

/*
BigReqEnable
     1     CARD8                           opcode
     1     0                               bigreq opcode
     2     1                               request length
▶
     1     1                               Reply
     1                                     unused
     2     CARD16                          sequence number
     4     0                               reply length
     4     CARD32                          maximum-request-length
     20                                    unused
*/

#[derive(Debug, Clone, Copy, Default)]
pub struct Enable;

impl ToLeBytes for Enable {
    fn to_le_bytes(&self, w: &mut WriteBuffer) {
        w.write(0u8); // bigreq opcode
        w.write(0u16); // length
    }
}

impl XRequestBase for Enable {
    type Reply = EnableReply;

    const NAME: &'static str = "BigReqEnable";
}

impl XExtensionRequest for Enable {
    const EXTENSION: &'static str = EXTENSION_NAME;
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EnableReply {
    /// In 4 byte units, counting the extra length field
    pub maximum_request_length: u32,
}

impl FromLeBytes for EnableReply {
    fn from_le_bytes(r: &mut ReadBuffer<'_>) -> Result<Self, Error> {
        read_reply_header(r)?;
        let maximum_request_length = r.read()?;
        Ok(Self {
            maximum_request_length,
        })
    }
}

impl_xreply!(EnableReply);
