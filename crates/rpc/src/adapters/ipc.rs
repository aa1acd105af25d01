//! Unix domain socket adapter.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use tokio::net::UnixListener;
use tracing::{debug, error, info, instrument, warn};

use super::{AdapterCore, RpcAdapter};
use crate::config::AdapterConfig;
use crate::error::Result;
use crate::router::Router;

/// Serves a router over a Unix domain socket.
pub struct IpcAdapter {
    core: Arc<AdapterCore>,
    path: PathBuf,
}

impl IpcAdapter {
    /// Create an adapter binding `config.ipc_path`.
    #[must_use]
    pub fn new(router: Arc<Router>, config: AdapterConfig) -> Self {
        let path = config.ipc_path.clone();
        Self {
            core: Arc::new(AdapterCore::new(router, config)),
            path,
        }
    }

    /// Socket path.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Number of live sessions.
    #[must_use]
    pub fn active_sessions(&self) -> usize {
        self.core.active_sessions()
    }

    fn bind(&self) -> Result<UnixListener> {
        // A previous process may have left its socket file behind
        if self.path.exists() {
            debug!("removing stale socket {}", self.path.display());
            std::fs::remove_file(&self.path)?;
        }
        Ok(UnixListener::bind(&self.path)?)
    }
}

#[async_trait]
impl RpcAdapter for IpcAdapter {
    #[instrument(skip(self), fields(path = %self.path.display()))]
    async fn start(&self) -> Result<()> {
        self.core.begin_start()?;

        let listener = match self.bind() {
            Ok(listener) => listener,
            Err(e) => {
                self.core.abort_start();
                return Err(e);
            }
        };
        info!("RPC IPC adapter listening on {}", self.path.display());

        let core = Arc::clone(&self.core);
        let shutdown = core.shutdown_token();
        let peer = self.path.display().to_string();
        let accept_loop = tokio::spawn(async move {
            loop {
                tokio::select! {
                    accept_result = listener.accept() => {
                        match accept_result {
                            Ok((stream, _addr)) => core.spawn_session(stream, &peer),
                            Err(e) => error!("Failed to accept connection: {}", e),
                        }
                    }
                    () = shutdown.cancelled() => {
                        info!("RPC IPC adapter shutting down");
                        break;
                    }
                }
            }
        });

        self.core.finish_start(Some(accept_loop));
        Ok(())
    }

    async fn stop(&self) -> Result<()> {
        let was_running = self.core.is_running();
        self.core.stop().await?;

        if was_running {
            if let Err(e) = std::fs::remove_file(&self.path) {
                warn!("failed to remove socket {}: {e}", self.path.display());
            }
        }
        Ok(())
    }

    fn router(&self) -> &Arc<Router> {
        self.core.router()
    }
}
