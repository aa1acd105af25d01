//! Transports that accept connections and serve them with a [`Router`].

#[cfg(unix)]
pub mod ipc;
pub mod memory;
pub mod tcp;

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, warn};

use crate::config::AdapterConfig;
use crate::error::{Error, Result};
use crate::router::Router;
use crate::session::Session;

#[cfg(unix)]
pub use ipc::IpcAdapter;
pub use memory::MemoryAdapter;
pub use tcp::TcpAdapter;

/// A transport serving a shared router.
#[async_trait]
pub trait RpcAdapter: Send + Sync {
    /// Start accepting connections.
    ///
    /// # Errors
    ///
    /// Returns [`Error::AlreadyStarted`] on a second call, or the error that
    /// prevented binding.
    async fn start(&self) -> Result<()>;

    /// Stop accepting connections and close every session. Idempotent.
    ///
    /// In-flight requests are failed with a connection-reset error. Returns
    /// once every session finished tearing down.
    ///
    /// # Errors
    ///
    /// Returns an error if transport resources could not be released.
    async fn stop(&self) -> Result<()>;

    /// The router this adapter serves.
    fn router(&self) -> &Arc<Router>;
}

enum Lifecycle {
    Idle,
    Starting,
    Running(Option<JoinHandle<()>>),
    Stopped,
}

/// Lifecycle and session bookkeeping shared by every adapter.
pub(crate) struct AdapterCore {
    router: Arc<Router>,
    config: Arc<AdapterConfig>,
    lifecycle: Mutex<Lifecycle>,
    shutdown: CancellationToken,
    sessions: TaskTracker,
    next_session_id: AtomicU64,
    active: Arc<AtomicUsize>,
}

impl AdapterCore {
    pub(crate) fn new(router: Arc<Router>, config: AdapterConfig) -> Self {
        Self {
            router,
            config: Arc::new(config),
            lifecycle: Mutex::new(Lifecycle::Idle),
            shutdown: CancellationToken::new(),
            sessions: TaskTracker::new(),
            next_session_id: AtomicU64::new(1),
            active: Arc::new(AtomicUsize::new(0)),
        }
    }

    pub(crate) const fn router(&self) -> &Arc<Router> {
        &self.router
    }

    pub(crate) fn config(&self) -> &AdapterConfig {
        &self.config
    }

    pub(crate) fn shutdown_token(&self) -> CancellationToken {
        self.shutdown.clone()
    }

    pub(crate) fn active_sessions(&self) -> usize {
        self.active.load(Ordering::Acquire)
    }

    pub(crate) fn is_running(&self) -> bool {
        matches!(*self.lifecycle.lock(), Lifecycle::Running(_))
    }

    /// Claim the right to start. Must be followed by `finish_start` or `abort_start`.
    pub(crate) fn begin_start(&self) -> Result<()> {
        self.config.validate()?;
        let mut lifecycle = self.lifecycle.lock();
        match *lifecycle {
            Lifecycle::Idle => {
                *lifecycle = Lifecycle::Starting;
                Ok(())
            }
            _ => Err(Error::AlreadyStarted),
        }
    }

    pub(crate) fn abort_start(&self) {
        *self.lifecycle.lock() = Lifecycle::Idle;
    }

    pub(crate) fn finish_start(&self, accept_loop: Option<JoinHandle<()>>) {
        *self.lifecycle.lock() = Lifecycle::Running(accept_loop);
    }

    /// Serve `stream` on a new tracked session.
    pub(crate) fn spawn_session<S>(&self, stream: S, peer: &str)
    where
        S: AsyncRead + AsyncWrite + Send + 'static,
    {
        let id = self.next_session_id.fetch_add(1, Ordering::Relaxed);
        let session = Session::new(id, Arc::clone(&self.router), Arc::clone(&self.config));
        let guard = ActiveGuard::new(Arc::clone(&self.active));
        let shutdown = self.shutdown.child_token();

        debug!(session = id, peer, "accepted connection");
        self.sessions.spawn(async move {
            let _guard = guard;
            if let Err(e) = session.run(stream, shutdown).await {
                debug!(session = id, "session ended with error: {e}");
            }
        });
    }

    pub(crate) async fn stop(&self) -> Result<()> {
        let accept_loop = {
            let mut lifecycle = self.lifecycle.lock();
            match std::mem::replace(&mut *lifecycle, Lifecycle::Stopped) {
                Lifecycle::Running(accept_loop) => accept_loop,
                // Never started, or already stopped
                previous => {
                    *lifecycle = previous;
                    return Ok(());
                }
            }
        };

        self.shutdown.cancel();
        if let Some(accept_loop) = accept_loop {
            if let Err(e) = accept_loop.await {
                warn!("accept loop failed: {e}");
            }
        }

        self.sessions.close();
        self.sessions.wait().await;
        Ok(())
    }
}

/// Counts a session as active for as long as it lives.
struct ActiveGuard(Arc<AtomicUsize>);

impl ActiveGuard {
    fn new(active: Arc<AtomicUsize>) -> Self {
        active.fetch_add(1, Ordering::AcqRel);
        Self(active)
    }
}

impl Drop for ActiveGuard {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::AcqRel);
    }
}
