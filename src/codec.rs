//! Envelope encoding for outbound commands and decoding for inbound replies.
//!
//! Commands travel as flat JSON objects:
//!
//! ```text
//! {"cmd": "set_color", "red": 255, "green": 0, "blue": 0, "brightness": 100, "timestamp": 1718000000.25}
//! ```
//!
//! Replies are arbitrary JSON objects. Only `device_id` is interpreted; the
//! rest is handed to callers untouched.

use std::net::SocketAddr;
use std::time::{SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::command::Command;
use crate::errors::Error;

type Result<T> = std::result::Result<T, Error>;

/// A command stamped with its send time, as it appears on the wire.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct Envelope {
    #[serde(flatten)]
    pub command: Command,
    /// Seconds since the Unix epoch at encode time
    pub timestamp: f64,
}

impl Envelope {
    /// Wrap a command, stamping it with the current wall-clock time.
    pub fn now(command: Command) -> Self {
        Envelope {
            command,
            timestamp: unix_timestamp(),
        }
    }
}

/// A decoded datagram received from a device.
#[derive(Debug, Clone, PartialEq)]
pub struct Reply {
    payload: Map<String, Value>,
    source: SocketAddr,
}

impl Reply {
    pub fn new(payload: Map<String, Value>, source: SocketAddr) -> Self {
        Reply { payload, source }
    }

    /// The identifier the device reported, if it sent a non-empty string.
    pub fn device_id(&self) -> Option<&str> {
        self.payload
            .get("device_id")
            .and_then(|id| id.as_str())
            .filter(|id| !id.is_empty())
    }

    /// Address the datagram was received from.
    pub fn source(&self) -> SocketAddr {
        self.source
    }

    /// The full decoded payload, including `device_id`.
    pub fn payload(&self) -> &Map<String, Value> {
        &self.payload
    }

    pub fn into_payload(self) -> Map<String, Value> {
        self.payload
    }
}

/// Encode a command into a datagram payload, stamping it with the current time.
///
/// # Examples
///
/// ```
/// use udp_led_rs::{Command, codec};
///
/// let bytes = codec::encode(&Command::GetStatus).unwrap();
/// let envelope = codec::decode_command(&bytes).unwrap();
/// assert_eq!(envelope.command, Command::GetStatus);
/// ```
pub fn encode(command: &Command) -> Result<Vec<u8>> {
    encode_envelope(&Envelope::now(command.clone()))
}

/// Encode an already stamped envelope.
pub fn encode_envelope(envelope: &Envelope) -> Result<Vec<u8>> {
    serde_json::to_vec(envelope).map_err(Error::JsonDump)
}

/// Decode a command envelope, as a device would.
pub fn decode_command(bytes: &[u8]) -> Result<Envelope> {
    let text = std::str::from_utf8(bytes).map_err(Error::Utf8Decode)?;
    serde_json::from_str(text).map_err(Error::JsonLoad)
}

/// Decode a reply datagram received from `source`.
///
/// The payload must be a JSON object; anything else is a decode error.
pub fn decode_reply(bytes: &[u8], source: SocketAddr) -> Result<Reply> {
    let text = std::str::from_utf8(bytes).map_err(Error::Utf8Decode)?;
    match serde_json::from_str::<Value>(text).map_err(Error::JsonLoad)? {
        Value::Object(payload) => Ok(Reply::new(payload, source)),
        _ => Err(Error::NotAnObject(source)),
    }
}

/// Seconds since the Unix epoch, or zero if the clock is before it.
pub fn unix_timestamp() -> f64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs_f64())
        .unwrap_or_default()
}
