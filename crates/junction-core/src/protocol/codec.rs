//! Frame codec for Junction messages.
//!
//! Wire format:
//! ```text
//! base64(UTF-8(JSON {"header": <string>, "payload": <any>})) 0x00
//! ```
//! The body uses the standard base64 alphabet with padding, which never
//! contains the `0x00` terminator, so frames can be split on the terminator
//! alone.

use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use serde_json::Value;
use thiserror::Error;

use crate::protocol::message::Message;

/// Byte that follows every frame on the wire.
pub const TERMINATOR: u8 = 0x00;

/// Errors that can occur during message encoding or decoding.
///
/// Every variant except [`ProtocolError::Serialize`] describes a malformed
/// frame received from a peer.
#[derive(Debug, Error)]
pub enum ProtocolError {
    /// The frame body contains bytes outside the base64 alphabet or bad padding.
    #[error("frame is not valid base64: {0}")]
    InvalidBase64(#[from] base64::DecodeError),

    /// The base64 body decoded to bytes that are not UTF-8 text.
    #[error("frame body is not valid UTF-8: {0}")]
    InvalidUtf8(#[from] std::str::Utf8Error),

    /// The decoded text is not JSON.
    #[error("frame body is not valid JSON: {0}")]
    InvalidJson(#[source] serde_json::Error),

    /// The decoded JSON is valid but is not an object.
    #[error("frame body is not a JSON object")]
    NotAnObject,

    /// A required top-level field is absent.
    #[error("frame is missing the `{0}` field")]
    MissingField(&'static str),

    /// The `header` field is present but is not a string.
    #[error("frame header is not a string")]
    InvalidHeader,

    /// The outgoing message could not be serialized.
    #[error("failed to serialize message: {0}")]
    Serialize(#[source] serde_json::Error),
}

impl ProtocolError {
    /// Returns `true` when the error describes a malformed inbound frame.
    pub fn is_malformed_frame(&self) -> bool {
        !matches!(self, ProtocolError::Serialize(_))
    }
}

// ── Public API ────────────────────────────────────────────────────────────────

/// Encodes a [`Message`] into its base64 frame body, without the terminator.
///
/// # Errors
///
/// Returns [`ProtocolError::Serialize`] if the message cannot be written as JSON.
pub fn encode_message(msg: &Message) -> Result<Vec<u8>, ProtocolError> {
    let json = serde_json::to_vec(msg).map_err(ProtocolError::Serialize)?;
    Ok(STANDARD.encode(json).into_bytes())
}

/// Encodes a [`Message`] into a complete frame: body followed by [`TERMINATOR`].
///
/// Encoding is deterministic: equal messages always produce equal bytes.
///
/// # Errors
///
/// Returns [`ProtocolError::Serialize`] if the message cannot be written as JSON.
///
/// # Examples
///
/// ```rust
/// use junction_core::{decode_message, encode_frame, split_frame, Message};
/// use serde_json::json;
///
/// let msg = Message::new("/ping", json!({"n": 1}));
/// let frame = encode_frame(&msg).unwrap();
/// let (body, rest) = split_frame(&frame).unwrap();
/// assert!(rest.is_empty());
/// assert_eq!(decode_message(body).unwrap(), msg);
/// ```
pub fn encode_frame(msg: &Message) -> Result<Vec<u8>, ProtocolError> {
    let mut frame = encode_message(msg)?;
    frame.push(TERMINATOR);
    Ok(frame)
}

/// Decodes one frame body (terminator already stripped) into a [`Message`].
///
/// # Errors
///
/// Returns a malformed-frame [`ProtocolError`] if the body is not base64, the
/// decoded bytes are not UTF-8 JSON, the JSON is not an object, or the object
/// lacks a string `header` or a `payload`.
pub fn decode_message(body: &[u8]) -> Result<Message, ProtocolError> {
    let raw = STANDARD.decode(body)?;
    let text = std::str::from_utf8(&raw)?;
    let value: Value = serde_json::from_str(text).map_err(ProtocolError::InvalidJson)?;

    let Value::Object(mut fields) = value else {
        return Err(ProtocolError::NotAnObject);
    };

    let header = match fields.remove("header") {
        Some(Value::String(header)) => header,
        Some(_) => return Err(ProtocolError::InvalidHeader),
        None => return Err(ProtocolError::MissingField("header")),
    };
    let payload = fields
        .remove("payload")
        .ok_or(ProtocolError::MissingField("payload"))?;

    Ok(Message::new(header, payload))
}

/// Splits `stream` at the first [`TERMINATOR`].
///
/// Returns the bytes before the terminator and the bytes after it, or `None`
/// when no terminator has arrived yet and the caller must keep reading.
pub fn split_frame(stream: &[u8]) -> Option<(&[u8], &[u8])> {
    let pos = stream.iter().position(|&b| b == TERMINATOR)?;
    Some((&stream[..pos], &stream[pos + 1..]))
}

// ── Streaming decoder ─────────────────────────────────────────────────────────

/// Accumulates bytes from a stream and yields complete frame bodies.
///
/// TCP gives no guarantee that one `read()` returns exactly one frame: a read
/// may end in the middle of a frame, or deliver several frames at once.  The
/// decoder keeps whatever follows the last terminator until more bytes arrive.
///
/// ```rust
/// use junction_core::{encode_frame, FrameDecoder, Message};
///
/// let frame = encode_frame(&Message::new("/a", 1)).unwrap();
/// let (first, second) = frame.split_at(5);
///
/// let mut decoder = FrameDecoder::new();
/// decoder.extend(first);
/// assert!(decoder.next_frame().is_none());
/// decoder.extend(second);
/// assert_eq!(decoder.next_frame().unwrap(), &frame[..frame.len() - 1]);
/// ```
#[derive(Debug, Default)]
pub struct FrameDecoder {
    buf: Vec<u8>,
    /// Prefix of `buf` already known to contain no terminator.
    scanned: usize,
}

impl FrameDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            buf: Vec::with_capacity(capacity),
            scanned: 0,
        }
    }

    /// Appends newly received bytes.
    pub fn extend(&mut self, bytes: &[u8]) {
        self.buf.extend_from_slice(bytes);
    }

    /// Removes and returns the next complete frame body, if one is buffered.
    pub fn next_frame(&mut self) -> Option<Vec<u8>> {
        match split_frame(&self.buf[self.scanned..]) {
            Some((head, _)) => {
                let end = self.scanned + head.len();
                let mut frame: Vec<u8> = self.buf.drain(..=end).collect();
                frame.pop();
                self.scanned = 0;
                Some(frame)
            }
            None => {
                self.scanned = self.buf.len();
                None
            }
        }
    }

    /// Number of bytes waiting for a terminator.
    pub fn buffered_len(&self) -> usize {
        self.buf.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
