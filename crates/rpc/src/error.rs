//! Error types for the RPC framework.

use std::io;
use std::net::SocketAddr;
use std::time::Duration;

use thiserror::Error;

use crate::context::RequestState;

/// Result type alias for RPC operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type for RPC operations.
#[derive(Debug, Error)]
pub enum Error {
    /// Connection-related errors.
    #[error("Connection error: {0}")]
    Connection(#[from] ConnectionError),

    /// Protocol-level errors.
    #[error("Protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    /// Codec errors during serialization/deserialization.
    #[error("Codec error: {0}")]
    Codec(#[from] CodecError),

    /// A route with this name is already registered.
    #[error("Route already registered: {0}")]
    DuplicateRoute(String),

    /// A request with this id is still pending on the connection.
    #[error("Request id {0} is already in flight")]
    DuplicateRequestId(u64),

    /// A mutator was called on a request that already reached a terminal state.
    #[error("Request {request_id} is already {state}")]
    RequestClosed {
        /// The request id.
        request_id: u64,
        /// The terminal state the request is in.
        state: RequestState,
    },

    /// An outbound payload does not fit in one frame. Nothing was sent.
    #[error("Payload of {size} bytes exceeds the {max} byte frame limit")]
    PayloadTooLarge {
        /// Encoded payload size.
        size: usize,
        /// Configured frame limit.
        max: usize,
    },

    /// The adapter was started twice.
    #[error("Adapter already started")]
    AlreadyStarted,

    /// The adapter has not been started.
    #[error("Adapter not started")]
    NotStarted,

    /// Invalid configuration.
    #[error("Invalid configuration: {0}")]
    Config(String),

    /// Generic I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// Channel closed unexpectedly.
    #[error("Channel closed")]
    ChannelClosed,
}

/// Connection-specific errors.
#[derive(Debug, Error)]
pub enum ConnectionError {
    /// Failed to establish a TCP connection.
    #[error("Failed to connect to {addr}: {source}")]
    ConnectFailed {
        /// The address we tried to connect to.
        addr: SocketAddr,
        /// The underlying error.
        #[source]
        source: io::Error,
    },

    /// Failed to connect to a local IPC socket.
    #[error("Failed to connect to {path}: {source}")]
    IpcConnectFailed {
        /// The socket path we tried to connect to.
        path: String,
        /// The underlying error.
        #[source]
        source: io::Error,
    },

    /// Connect attempt did not complete in time.
    #[error("Connect timed out after {0:?}")]
    Timeout(Duration),

    /// Connection closed unexpectedly.
    #[error("Connection closed unexpectedly")]
    Closed,
}

/// Protocol-level errors. Always fatal for the connection they occur on.
#[derive(Debug, Error)]
pub enum ProtocolError {
    /// Invalid frame received.
    #[error("Invalid frame: {0}")]
    InvalidFrame(String),

    /// Frame too large.
    #[error("Frame size {size} exceeds maximum {max}")]
    FrameTooLarge {
        /// Size of the frame.
        size: usize,
        /// Maximum allowed size.
        max: usize,
    },

    /// Unknown frame type byte.
    #[error("Unknown frame type: {0:#x}")]
    UnknownFrameType(u8),

    /// Request id presence does not match the frame type.
    #[error("Frame type {frame_type} {expectation} a request id")]
    RequestIdMismatch {
        /// The frame type.
        frame_type: String,
        /// What the frame type requires.
        expectation: &'static str,
    },

    /// A frame type the receiving side never expects.
    #[error("Unexpected frame type: {0}")]
    UnexpectedFrame(String),

    /// Checksum mismatch.
    #[error("Checksum mismatch: expected {expected:08x}, got {actual:08x}")]
    ChecksumMismatch {
        /// Expected checksum.
        expected: u32,
        /// Actual checksum.
        actual: u32,
    },
}

/// Codec-related errors.
#[derive(Debug, Error)]
pub enum CodecError {
    /// Serialization failed.
    #[error("Failed to serialize: {0}")]
    SerializationFailed(String),

    /// Deserialization failed.
    #[error("Failed to deserialize: {0}")]
    DeserializationFailed(String),
}

impl From<ciborium::de::Error<io::Error>> for CodecError {
    fn from(err: ciborium::de::Error<io::Error>) -> Self {
        Self::DeserializationFailed(err.to_string())
    }
}

impl From<ciborium::ser::Error<io::Error>> for CodecError {
    fn from(err: ciborium::ser::Error<io::Error>) -> Self {
        Self::SerializationFailed(err.to_string())
    }
}

impl From<serde_json::Error> for CodecError {
    fn from(err: serde_json::Error) -> Self {
        Self::SerializationFailed(err.to_string())
    }
}
