//! Error types for the test network harness.

use std::io;

use thiserror::Error;

/// Result type for harness operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur while running a test network.
#[derive(Debug, Error)]
pub enum Error {
    /// Invalid cluster configuration.
    #[error("Invalid configuration: {0}")]
    Config(String),

    /// Configuration file could not be parsed.
    #[error("Failed to parse configuration: {0}")]
    ParseConfig(#[from] toml::de::Error),

    /// IO error.
    #[error("io error: {0} - {1}")]
    Io(&'static str, #[source] io::Error),

    /// Failed to spawn a process.
    #[error("Failed to spawn {program}: {source}")]
    SpawnProcess {
        /// Program that failed to start.
        program: String,
        /// The underlying error.
        #[source]
        source: io::Error,
    },
}
