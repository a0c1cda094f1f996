//! Protocol module containing the message type and the frame codec.

pub mod codec;
pub mod message;

pub use codec::{
    decode_message, encode_frame, encode_message, split_frame, FrameDecoder, ProtocolError,
    TERMINATOR,
};
pub use message::{Message, DISCONNECT_HEADER};
