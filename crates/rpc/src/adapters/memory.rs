//! In-process adapter over memory pipes.
//!
//! Connections are `tokio::io::duplex` pairs. The server end is served by a
//! regular session, so behaviour is identical to the socket adapters.

use std::sync::Arc;

use async_trait::async_trait;
use tracing::debug;

use super::{AdapterCore, RpcAdapter};
use crate::client::RpcClient;
use crate::config::{AdapterConfig, ClientConfig};
use crate::error::{Error, Result};
use crate::router::Router;

/// Buffer size of each direction of an in-memory connection.
const PIPE_CAPACITY: usize = 256 * 1024;

/// Serves a router to clients in the same process.
pub struct MemoryAdapter {
    core: Arc<AdapterCore>,
}

impl MemoryAdapter {
    /// Create an in-memory adapter.
    #[must_use]
    pub fn new(router: Arc<Router>, config: AdapterConfig) -> Self {
        Self {
            core: Arc::new(AdapterCore::new(router, config)),
        }
    }

    /// Open a connection and return a client bound to it.
    ///
    /// # Errors
    ///
    /// Returns [`Error::NotStarted`] unless the adapter is running.
    pub fn connect(&self, config: ClientConfig) -> Result<RpcClient> {
        if !self.core.is_running() {
            return Err(Error::NotStarted);
        }

        let (client_end, server_end) = tokio::io::duplex(PIPE_CAPACITY);
        self.core.spawn_session(server_end, "memory");
        debug!("opened in-memory connection");

        Ok(RpcClient::from_stream(client_end, config))
    }

    /// Number of live sessions.
    #[must_use]
    pub fn active_sessions(&self) -> usize {
        self.core.active_sessions()
    }
}

#[async_trait]
impl RpcAdapter for MemoryAdapter {
    async fn start(&self) -> Result<()> {
        self.core.begin_start()?;
        self.core.finish_start(None);
        Ok(())
    }

    async fn stop(&self) -> Result<()> {
        self.core.stop().await
    }

    fn router(&self) -> &Arc<Router> {
        self.core.router()
    }
}
