use std::net::SocketAddr;
use std::path::PathBuf;
use std::str::Utf8Error;

/// All error types that can occur while discovering or commanding devices.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// A socket could not be bound or configured when opening the transport.
    #[error("failed to bind {role} socket on {addr}: {err:?}")]
    Bind {
        role: &'static str,
        addr: SocketAddr,
        err: std::io::Error,
    },

    /// A network socket operation failed after the transport was opened.
    #[error("socket {action} error: {err:?}")]
    Socket { action: String, err: std::io::Error },

    /// A receive on a transport whose sockets have been released.
    #[error("transport is closed")]
    Closed,

    /// Failed to serialize data to JSON.
    #[error("failed to dump json: {0:?}")]
    JsonDump(serde_json::Error),

    /// Failed to deserialize JSON data.
    #[error("failed to load json: {0:?}")]
    JsonLoad(serde_json::Error),

    /// An inbound datagram contained invalid UTF-8.
    #[error("utf8 decoding error: {0:?}")]
    Utf8Decode(Utf8Error),

    /// An inbound datagram decoded to JSON that is not an object.
    #[error("payload from {0} is not a json object")]
    NotAnObject(SocketAddr),

    /// A numeric parameter fell outside its valid range.
    #[error("{field} value {value} is out of range {min}-{max}")]
    OutOfRange {
        field: &'static str,
        value: u8,
        min: u8,
        max: u8,
    },

    /// A target string could not be turned into a socket address.
    #[error("invalid target address: {0}")]
    InvalidTarget(String),

    /// The configuration file could not be read.
    #[error("failed to read config file {path:?}: {err:?}")]
    ConfigRead { path: PathBuf, err: std::io::Error },
}

/// Coarse classification of an [`Error`], used to decide how far it may travel.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Fatal at startup; the controller cannot run.
    Bind,
    /// A send failed; logged and reported, never fatal.
    Send,
    /// A malformed inbound payload; dropped where it was detected.
    Decode,
    /// Receive on a closed transport; ends the listener.
    Closed,
    /// Bad caller input (unserializable value, bad target, bad config).
    Invalid,
}

impl Error {
    /// Create a new socket error
    pub fn socket(action: &str, err: std::io::Error) -> Self {
        Error::Socket {
            action: action.to_string(),
            err,
        }
    }

    /// Create a new bind error
    pub fn bind(role: &'static str, addr: SocketAddr, err: std::io::Error) -> Self {
        Error::Bind { role, addr, err }
    }

    /// Create a new out of range error
    pub fn out_of_range(field: &'static str, value: u8, min: u8, max: u8) -> Self {
        Error::OutOfRange {
            field,
            value,
            min,
            max,
        }
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::Bind { .. } => ErrorKind::Bind,
            Error::Socket { .. } => ErrorKind::Send,
            Error::Closed => ErrorKind::Closed,
            Error::JsonLoad(_)
            | Error::Utf8Decode(_)
            | Error::NotAnObject(_)
            | Error::OutOfRange { .. } => ErrorKind::Decode,
            Error::JsonDump(_) | Error::InvalidTarget(_) | Error::ConfigRead { .. } => {
                ErrorKind::Invalid
            }
        }
    }

    /// Whether this error must abort controller startup.
    pub fn is_fatal(&self) -> bool {
        self.kind() == ErrorKind::Bind
    }
}

/// Hacky implementation of PartialEq for testing
#[cfg(test)]
impl PartialEq for Error {
    fn eq(&self, other: &Self) -> bool {
        self.to_string() == other.to_string()
    }
}
