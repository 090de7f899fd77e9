use crate::setup::SetupRefused;
use std::io;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    #[error("Could not decode Xauthority file '{0}'")]
    InvalidXAuthFile(String),
    #[error("Could not read Xauthority file '{0}': {1}")]
    CouldNotReadXAuthFile(String, #[source] io::Error),
    #[error("Could not decode $DISPLAY environment variable")]
    InvalidDisplayEnv,
    #[error("Environment variable '{0}' is not set")]
    NoEnv(&'static str),
    #[error("Could not decode response from X server: {0}")]
    InvalidResponse(&'static str),
    #[error("Unexpected end of buffer while decoding")]
    UnexpectedEof,
    #[error("Unexpected IO error: {0}")]
    IOError(#[from] io::Error),
    #[error("Unexpected OS error: {0}")]
    OsError(#[from] nix::Error),
    #[error("Could not open connection to the server: {0}")]
    CouldNotOpenDisplay(SetupRefused),
    #[error("Server requires further authentication: {0}")]
    AuthenticationRequired(String),
    #[error("Could not open unix socket '{0}': {1}")]
    CouldNotOpenUnixSocket(String, #[source] io::Error),
    #[error("Could not connect to display '{0}'")]
    CouldNotConnectTo(String),
    #[error("Server sent invalid enum '{0}' value: {1}")]
    InvalidEnum(&'static str, u64),
    #[error("Request of {length} 4-byte units exceeds maximum request length of {maximum}")]
    RequestTooLong { length: usize, maximum: u32 },
    #[error("Transport cannot send file descriptors together with a request")]
    AtomicFdSendUnsupported,
    #[error("The server does not support the '{0}' extension")]
    ExtensionUnavailable(&'static str),
    #[error("The connection to the server has been closed")]
    ConnectionClosed,
    #[error("All resource ids assigned to this client are in use")]
    ResourceIdsExhausted,
}
