//! TCP adapter.

use std::net::SocketAddr;
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::net::TcpListener;
use tracing::{debug, error, info, instrument};

use super::{AdapterCore, RpcAdapter};
use crate::config::AdapterConfig;
use crate::error::Result;
use crate::router::Router;

/// Serves a router over TCP.
pub struct TcpAdapter {
    core: Arc<AdapterCore>,
    local_addr: Mutex<Option<SocketAddr>>,
}

impl TcpAdapter {
    /// Create an adapter binding `config.host:config.port`.
    #[must_use]
    pub fn new(router: Arc<Router>, config: AdapterConfig) -> Self {
        Self {
            core: Arc::new(AdapterCore::new(router, config)),
            local_addr: Mutex::new(None),
        }
    }

    /// Bound address, available once started.
    #[must_use]
    pub fn local_addr(&self) -> Option<SocketAddr> {
        *self.local_addr.lock()
    }

    /// Bound port, available once started. Resolves an ephemeral port request.
    #[must_use]
    pub fn port(&self) -> Option<u16> {
        self.local_addr().map(|addr| addr.port())
    }

    /// Number of live sessions.
    #[must_use]
    pub fn active_sessions(&self) -> usize {
        self.core.active_sessions()
    }

    /// Whether the adapter is accepting connections.
    #[must_use]
    pub fn is_running(&self) -> bool {
        self.core.is_running()
    }

    async fn bind(&self) -> Result<TcpListener> {
        let config = self.core.config();
        let listener = TcpListener::bind((config.host.as_str(), config.port)).await?;
        let local_addr = listener.local_addr()?;
        *self.local_addr.lock() = Some(local_addr);
        Ok(listener)
    }
}

#[async_trait]
impl RpcAdapter for TcpAdapter {
    #[instrument(skip(self))]
    async fn start(&self) -> Result<()> {
        self.core.begin_start()?;

        let listener = match self.bind().await {
            Ok(listener) => listener,
            Err(e) => {
                self.core.abort_start();
                return Err(e);
            }
        };
        info!("RPC TCP adapter listening on {:?}", self.local_addr());

        let core = Arc::clone(&self.core);
        let shutdown = core.shutdown_token();
        let accept_loop = tokio::spawn(async move {
            loop {
                tokio::select! {
                    accept_result = listener.accept() => {
                        match accept_result {
                            Ok((stream, addr)) => {
                                if let Err(e) = stream.set_nodelay(true) {
                                    debug!("failed to set TCP_NODELAY for {addr}: {e}");
                                }
                                core.spawn_session(stream, &addr.to_string());
                            }
                            Err(e) => {
                                error!("Failed to accept connection: {}", e);
                            }
                        }
                    }
                    () = shutdown.cancelled() => {
                        info!("RPC TCP adapter shutting down");
                        break;
                    }
                }
            }
        });

        self.core.finish_start(Some(accept_loop));
        Ok(())
    }

    async fn stop(&self) -> Result<()> {
        self.core.stop().await
    }

    fn router(&self) -> &Arc<Router> {
        self.core.router()
    }
}

impl std::fmt::Debug for TcpAdapter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TcpAdapter")
            .field("local_addr", &self.local_addr())
            .field("active_sessions", &self.active_sessions())
            .finish_non_exhaustive()
    }
}
