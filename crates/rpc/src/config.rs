//! Adapter and client configuration.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::protocol::MAX_FRAME_SIZE;
use crate::router::Router;

/// Default TCP port of the node's RPC server.
pub const DEFAULT_RPC_PORT: u16 = 8020;

/// Configuration shared by every adapter.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AdapterConfig {
    /// Interface the TCP adapter binds.
    pub host: String,
    /// Port the TCP adapter binds. 0 picks an ephemeral port.
    pub port: u16,
    /// Socket path the IPC adapter binds.
    pub ipc_path: PathBuf,
    /// Require the shared token before requests reach the router.
    pub authentication_required: bool,
    /// The shared token.
    pub auth_token: Option<String>,
    /// Namespaces served by the adapter. `None` serves every route.
    pub namespaces: Option<Vec<String>>,
    /// Maximum frame payload size in bytes.
    pub max_frame_size: usize,
}

impl Default for AdapterConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: DEFAULT_RPC_PORT,
            ipc_path: std::env::temp_dir().join("ironfish.ipc"),
            authentication_required: false,
            auth_token: None,
            namespaces: None,
            max_frame_size: MAX_FRAME_SIZE,
        }
    }
}

impl AdapterConfig {
    /// Parse from a TOML document. Missing keys take their defaults.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] if the document is not valid.
    pub fn from_toml_str(s: &str) -> Result<Self> {
        toml::from_str(s).map_err(|e| Error::Config(e.to_string()))
    }

    /// Load from a TOML file.
    ///
    /// # Errors
    ///
    /// Returns an I/O error if the file cannot be read or [`Error::Config`] if
    /// it is not valid.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        Self::from_toml_str(&std::fs::read_to_string(path)?)
    }

    /// Require `token` on every session.
    #[must_use]
    pub fn with_auth_token(mut self, token: impl Into<String>) -> Self {
        self.authentication_required = true;
        self.auth_token = Some(token.into());
        self
    }

    /// Serve only routes under `namespaces`.
    #[must_use]
    pub fn with_namespaces<I, S>(mut self, namespaces: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.namespaces = Some(namespaces.into_iter().map(Into::into).collect());
        self
    }

    /// Check the configuration is usable.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] when authentication is required without a token.
    pub fn validate(&self) -> Result<()> {
        if self.authentication_required && self.auth_token.as_deref().is_none_or(str::is_empty) {
            return Err(Error::Config(
                "authentication_required is set but no auth_token is configured".to_string(),
            ));
        }
        if self.max_frame_size == 0 {
            return Err(Error::Config("max_frame_size must be positive".to_string()));
        }
        Ok(())
    }

    /// Whether the adapter serves `route`.
    #[must_use]
    pub fn serves(&self, route: &str) -> bool {
        self.namespaces.as_ref().is_none_or(|allowed| {
            Router::namespace_of(route).is_some_and(|ns| allowed.iter().any(|a| a == ns))
        })
    }
}

/// Configuration for the RPC client.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientConfig {
    /// Token sent in the handshake and with every request.
    pub auth_token: Option<String>,
    /// Bound on establishing the connection.
    #[serde(with = "millis")]
    pub connect_timeout: Duration,
    /// Maximum frame payload size in bytes.
    pub max_frame_size: usize,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            auth_token: None,
            connect_timeout: Duration::from_secs(5),
            max_frame_size: MAX_FRAME_SIZE,
        }
    }
}

impl ClientConfig {
    /// Parse from a TOML document. Missing keys take their defaults.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] if the document is not valid.
    pub fn from_toml_str(s: &str) -> Result<Self> {
        toml::from_str(s).map_err(|e| Error::Config(e.to_string()))
    }

    /// Load from a TOML file.
    ///
    /// # Errors
    ///
    /// Returns an I/O error if the file cannot be read or [`Error::Config`] if
    /// it is not valid.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        Self::from_toml_str(&std::fs::read_to_string(path)?)
    }
}

// Durations are written as integer milliseconds.
mod millis {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(u64::try_from(duration.as_millis()).unwrap_or(u64::MAX))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        u64::deserialize(deserializer).map(Duration::from_millis)
    }
}
