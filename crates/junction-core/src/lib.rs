//! # junction-core
//!
//! Shared protocol library for Junction: the [`Message`] value exchanged
//! between peers and the codec that turns it into terminator-delimited
//! frames on a TCP stream.
//!
//! This crate has no dependencies on sockets or an async runtime.  The
//! `junction-net` crate builds connections, clients and servers on top of it.
//!
//! # Wire format
//!
//! ```text
//! base64( UTF-8( JSON {"header": <string>, "payload": <any>} ) ) 0x00
//! ```
//!
//! The base64 alphabet never produces a `0x00` byte, so the terminator alone
//! delimits frames no matter how the stream is chunked by the transport.

pub mod protocol;

pub use protocol::codec::{
    decode_message, encode_frame, encode_message, split_frame, FrameDecoder, ProtocolError,
    TERMINATOR,
};
pub use protocol::message::{Message, DISCONNECT_HEADER};
