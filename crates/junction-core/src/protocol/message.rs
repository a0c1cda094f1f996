//! The [`Message`] value exchanged between Junction peers.
//!
//! A message is a short `header` naming its intent plus an arbitrary JSON
//! `payload`.  Messages are plain values: once built they are never mutated,
//! and every peer that receives one gets its own copy.

use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;

// ── Control headers ───────────────────────────────────────────────────────────

/// Reserved header meaning "the sender is closing this connection now".
///
/// A reader that decodes a frame with this header closes its side of the
/// connection and does not hand the message to the application handler.
pub const DISCONNECT_HEADER: &str = "/disconnect";

// ── Message ───────────────────────────────────────────────────────────────────

/// A single header/payload pair.
///
/// # Examples
///
/// ```rust
/// use junction_core::Message;
/// use serde_json::json;
///
/// let msg = Message::new("/ping", json!({"n": 1}));
/// assert_eq!(msg.header(), "/ping");
/// assert_eq!(msg.payload()["n"], 1);
/// ```
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Message {
    header: String,
    payload: Value,
}

impl Message {
    /// Creates a message from a header and anything convertible to a JSON value.
    pub fn new(header: impl Into<String>, payload: impl Into<Value>) -> Self {
        Self {
            header: header.into(),
            payload: payload.into(),
        }
    }

    /// Creates a message whose payload is the JSON form of `payload`.
    ///
    /// # Errors
    ///
    /// Returns the `serde_json` error if `payload` cannot be represented as
    /// JSON (for example a map with non-string keys).
    pub fn from_serializable<T: Serialize>(
        header: impl Into<String>,
        payload: &T,
    ) -> Result<Self, serde_json::Error> {
        Ok(Self::new(header, serde_json::to_value(payload)?))
    }

    /// Builds the control message announcing that the sender is disconnecting.
    pub fn disconnect_notice() -> Self {
        Self::new(DISCONNECT_HEADER, Value::Null)
    }

    /// Returns `true` if this message carries the reserved disconnect header.
    pub fn is_disconnect_notice(&self) -> bool {
        self.header == DISCONNECT_HEADER
    }

    pub fn header(&self) -> &str {
        &self.header
    }

    pub fn payload(&self) -> &Value {
        &self.payload
    }

    /// Deserializes the payload into a concrete type.
    ///
    /// # Errors
    ///
    /// Returns the `serde_json` error if the payload does not match `T`.
    pub fn payload_as<T: DeserializeOwned>(&self) -> Result<T, serde_json::Error> {
        T::deserialize(&self.payload)
    }

    /// Consumes the message and returns its header and payload.
    pub fn into_parts(self) -> (String, Value) {
        (self.header, self.payload)
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
