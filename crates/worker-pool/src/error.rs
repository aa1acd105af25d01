//! Error types for the worker pool.

use std::io;

use thiserror::Error;

/// Result type alias for worker pool operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type for worker pool operations.
#[derive(Debug, Error)]
pub enum Error {
    /// Malformed job frame on the wire.
    #[error("Protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    /// A job body could not be encoded or decoded.
    #[error("Serialization error: {0}")]
    Serialization(#[from] bincode::Error),

    /// The worker answered a job with an error.
    #[error("Job {job_id} failed: {message}")]
    JobFailed {
        /// The failed job.
        job_id: u64,
        /// Error text reported by the worker.
        message: String,
    },

    /// The job was aborted before it produced a response.
    #[error("Job {0} was aborted")]
    JobAborted(u64),

    /// A job with this id is already pending.
    #[error("Job id {0} is already in flight")]
    DuplicateJobId(u64),

    /// A task for this message type is already registered.
    #[error("Task already registered for {0}")]
    DuplicateTask(String),

    /// A task failed while executing.
    #[error("Task error: {0}")]
    Task(String),

    /// HTTP request to the API failed.
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// Invalid API address.
    #[error("Invalid URL: {0}")]
    Url(#[from] url::ParseError),

    /// Generic I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// The connection to the worker closed.
    #[error("Worker connection closed")]
    ChannelClosed,
}

/// Job framing errors.
#[derive(Debug, Error)]
pub enum ProtocolError {
    /// Frame exceeds the maximum size.
    #[error("Frame too large: {size} bytes (max: {max})")]
    FrameTooLarge {
        /// Declared frame size.
        size: usize,
        /// Maximum allowed.
        max: usize,
    },

    /// Frame is shorter than its fixed header.
    #[error("Frame too short: {0} bytes")]
    FrameTooShort(usize),

    /// Unknown message type byte.
    #[error("Unknown message type: {0}")]
    UnknownMessageType(u8),
}
