//! Message framing for the wire protocol.
//!
//! Every frame starts with a fixed 10 byte header:
//!
//! ```text
//! [u32 payload length][u8 frame type][u8 flags][u32 crc32 of payload]
//! ```
//!
//! followed by a `u64` request id when flag bit 0 is set, then the payload.
//! All integers are big-endian.

use std::fmt;

use bytes::{Buf, BufMut, Bytes, BytesMut};
use tokio_util::codec::{Decoder, Encoder};

use crate::error::{Error, ProtocolError, Result};

/// Maximum payload size (10MB by default).
pub const MAX_FRAME_SIZE: usize = 10 * 1024 * 1024;

/// Fixed header size (4 bytes length + 1 byte type + 1 byte flags + 4 bytes checksum).
pub const FRAME_HEADER_SIZE: usize = 10;

/// Size of the optional request id that follows the header.
pub const REQUEST_ID_SIZE: usize = 8;

const FLAG_HAS_REQUEST_ID: u8 = 0b0000_0001;

/// Type of frame being sent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum FrameType {
    /// Session-level authentication, client to server.
    Handshake = 0x01,
    /// A new request, client to server.
    Request = 0x02,
    /// One chunk of a streaming response.
    StreamData = 0x03,
    /// Successful completion of a request.
    ResponseEnd = 0x04,
    /// Failed completion of a request.
    Error = 0x05,
    /// Graceful close, either direction.
    Disconnect = 0x06,
}

impl FrameType {
    /// Whether frames of this type are addressed to a single request.
    #[must_use]
    pub const fn carries_request_id(self) -> bool {
        !matches!(self, Self::Handshake | Self::Disconnect)
    }

    /// Wire name of the frame type.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Handshake => "handshake",
            Self::Request => "request",
            Self::StreamData => "stream-data",
            Self::ResponseEnd => "response-end",
            Self::Error => "error",
            Self::Disconnect => "disconnect",
        }
    }
}

impl fmt::Display for FrameType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl TryFrom<u8> for FrameType {
    type Error = ProtocolError;

    fn try_from(value: u8) -> std::result::Result<Self, ProtocolError> {
        match value {
            0x01 => Ok(Self::Handshake),
            0x02 => Ok(Self::Request),
            0x03 => Ok(Self::StreamData),
            0x04 => Ok(Self::ResponseEnd),
            0x05 => Ok(Self::Error),
            0x06 => Ok(Self::Disconnect),
            _ => Err(ProtocolError::UnknownFrameType(value)),
        }
    }
}

/// A frame in the wire protocol.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    /// Type of this frame.
    pub frame_type: FrameType,
    /// Request this frame belongs to. Absent for handshake and disconnect.
    pub request_id: Option<u64>,
    /// Frame payload.
    pub payload: Bytes,
}

impl Frame {
    /// Handshake frame.
    #[must_use]
    pub const fn handshake(payload: Bytes) -> Self {
        Self {
            frame_type: FrameType::Handshake,
            request_id: None,
            payload,
        }
    }

    /// Request frame.
    #[must_use]
    pub const fn request(request_id: u64, payload: Bytes) -> Self {
        Self::for_request(FrameType::Request, request_id, payload)
    }

    /// Stream-data frame.
    #[must_use]
    pub const fn stream_data(request_id: u64, payload: Bytes) -> Self {
        Self::for_request(FrameType::StreamData, request_id, payload)
    }

    /// Response-end frame. An empty payload means "no final value".
    #[must_use]
    pub const fn response_end(request_id: u64, payload: Bytes) -> Self {
        Self::for_request(FrameType::ResponseEnd, request_id, payload)
    }

    /// Error frame.
    #[must_use]
    pub const fn error(request_id: u64, payload: Bytes) -> Self {
        Self::for_request(FrameType::Error, request_id, payload)
    }

    /// Disconnect frame.
    #[must_use]
    pub const fn disconnect() -> Self {
        Self {
            frame_type: FrameType::Disconnect,
            request_id: None,
            payload: Bytes::new(),
        }
    }

    const fn for_request(frame_type: FrameType, request_id: u64, payload: Bytes) -> Self {
        Self {
            frame_type,
            request_id: Some(request_id),
            payload,
        }
    }

    /// Check that request id presence matches the frame type.
    ///
    /// # Errors
    ///
    /// Returns a protocol error if the id is missing or unexpected.
    pub fn validate(&self) -> Result<()> {
        check_request_id(self.frame_type, self.request_id.is_some())?;
        Ok(())
    }
}

fn check_request_id(
    frame_type: FrameType,
    has_request_id: bool,
) -> std::result::Result<(), ProtocolError> {
    match (frame_type.carries_request_id(), has_request_id) {
        (true, false) => Err(ProtocolError::RequestIdMismatch {
            frame_type: frame_type.to_string(),
            expectation: "requires",
        }),
        (false, true) => Err(ProtocolError::RequestIdMismatch {
            frame_type: frame_type.to_string(),
            expectation: "must not carry",
        }),
        _ => Ok(()),
    }
}

/// Codec for encoding/decoding frames.
#[derive(Debug, Clone)]
pub struct FrameCodec {
    max_frame_size: usize,
}

impl FrameCodec {
    /// Create a new frame codec.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            max_frame_size: MAX_FRAME_SIZE,
        }
    }

    /// Create a codec with custom max payload size.
    #[must_use]
    pub const fn with_max_frame_size(mut self, size: usize) -> Self {
        self.max_frame_size = size;
        self
    }

    /// The configured maximum payload size.
    #[must_use]
    pub const fn max_frame_size(&self) -> usize {
        self.max_frame_size
    }
}

impl Default for FrameCodec {
    fn default() -> Self {
        Self::new()
    }
}

impl Decoder for FrameCodec {
    type Item = Frame;
    type Error = Error;

    fn decode(&mut self, buf: &mut BytesMut) -> Result<Option<Self::Item>> {
        if buf.len() < FRAME_HEADER_SIZE {
            return Ok(None);
        }

        // Parse header without consuming
        let mut header = &buf[..FRAME_HEADER_SIZE];
        let payload_len = header.get_u32() as usize;
        let frame_type_byte = header.get_u8();
        let flags = header.get_u8();
        let expected_checksum = header.get_u32();

        // Header problems are fatal regardless of how much payload has arrived
        let frame_type = FrameType::try_from(frame_type_byte)?;
        if flags & !FLAG_HAS_REQUEST_ID != 0 {
            return Err(ProtocolError::InvalidFrame(format!("Unknown flag bits: {flags:#010b}")).into());
        }
        let has_request_id = flags & FLAG_HAS_REQUEST_ID != 0;
        check_request_id(frame_type, has_request_id)?;

        if payload_len > self.max_frame_size {
            return Err(ProtocolError::FrameTooLarge {
                size: payload_len,
                max: self.max_frame_size,
            }
            .into());
        }

        let id_len = if has_request_id { REQUEST_ID_SIZE } else { 0 };
        let frame_len = FRAME_HEADER_SIZE + id_len + payload_len;
        if buf.len() < frame_len {
            buf.reserve(frame_len - buf.len());
            return Ok(None);
        }

        buf.advance(FRAME_HEADER_SIZE);
        let request_id = has_request_id.then(|| buf.get_u64());
        let payload = buf.split_to(payload_len).freeze();

        let actual_checksum = crc32fast::hash(&payload);
        if actual_checksum != expected_checksum {
            return Err(ProtocolError::ChecksumMismatch {
                expected: expected_checksum,
                actual: actual_checksum,
            }
            .into());
        }

        Ok(Some(Frame {
            frame_type,
            request_id,
            payload,
        }))
    }
}

impl Encoder<Frame> for FrameCodec {
    type Error = Error;

    fn encode(&mut self, frame: Frame, buf: &mut BytesMut) -> Result<()> {
        let payload_len = frame.payload.len();

        if payload_len > self.max_frame_size {
            return Err(ProtocolError::FrameTooLarge {
                size: payload_len,
                max: self.max_frame_size,
            }
            .into());
        }
        frame.validate()?;

        let id_len = if frame.request_id.is_some() {
            REQUEST_ID_SIZE
        } else {
            0
        };
        buf.reserve(FRAME_HEADER_SIZE + id_len + payload_len);

        #[allow(clippy::cast_possible_truncation)]
        buf.put_u32(payload_len as u32);
        buf.put_u8(frame.frame_type as u8);
        buf.put_u8(if frame.request_id.is_some() {
            FLAG_HAS_REQUEST_ID
        } else {
            0
        });
        buf.put_u32(crc32fast::hash(&frame.payload));
        if let Some(request_id) = frame.request_id {
            buf.put_u64(request_id);
        }
        buf.put(frame.payload);

        Ok(())
    }
}

/// Encode a single frame with the default codec settings.
///
/// # Errors
///
/// Returns an error if the frame is oversize or its request id is inconsistent
/// with its type.
pub fn encode_frame(frame: Frame) -> Result<Bytes> {
    let mut buf = BytesMut::new();
    FrameCodec::new().encode(frame, &mut buf)?;
    Ok(buf.freeze())
}

/// Decode one frame from the front of `buf` with the default codec settings.
///
/// Returns `Ok(None)` without consuming anything when `buf` holds only part of
/// a frame.
///
/// # Errors
///
/// Returns a protocol error for malformed frames.
pub fn decode_frame(buf: &mut BytesMut) -> Result<Option<Frame>> {
    FrameCodec::new().decode(buf)
}
