//! Protocol layer: frame layout, payload types and the CBOR payload codec.

pub mod codec;
pub mod framing;
pub mod message;

pub use framing::{Frame, FrameCodec, FrameType, MAX_FRAME_SIZE, decode_frame, encode_frame};
pub use message::{ErrorPayload, HandshakePayload, RequestPayload};
