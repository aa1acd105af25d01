//! RPC client.
//!
//! One client owns one connection. Requests are multiplexed over it by id: a
//! reader task routes every inbound frame to the [`RpcResponse`] waiting on its
//! id, and a writer task serializes outbound frames.

mod handle;

use std::net::SocketAddr;
#[cfg(unix)]
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use futures::StreamExt;
use parking_lot::Mutex;
use serde::Serialize;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::timeout;
use tokio_util::codec::FramedRead;
use tokio_util::sync::CancellationToken;
use tracing::{debug, instrument, trace, warn};

use crate::config::ClientConfig;
use crate::error::{CodecError, ConnectionError, Error, ProtocolError, Result};
use crate::protocol::message::{ErrorPayload, HandshakePayload, RequestPayload};
use crate::protocol::{Frame, FrameCodec, FrameType, codec};
use crate::response::RequestError;
use crate::writer::spawn_writer;
use handle::{Outcome, PendingRequest};

pub use handle::RpcResponse;

/// Where a builder connects to.
#[derive(Debug, Clone)]
enum Target {
    Tcp(SocketAddr),
    #[cfg(unix)]
    Ipc(PathBuf),
}

/// Builder for creating RPC clients.
#[derive(Debug, Clone, Default)]
pub struct ClientBuilder {
    target: Option<Target>,
    config: ClientConfig,
}

impl ClientBuilder {
    /// Create a new client builder.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Connect over TCP.
    #[must_use]
    pub fn tcp_addr(mut self, addr: SocketAddr) -> Self {
        self.target = Some(Target::Tcp(addr));
        self
    }

    /// Connect over a Unix domain socket.
    #[cfg(unix)]
    #[must_use]
    pub fn ipc_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.target = Some(Target::Ipc(path.into()));
        self
    }

    /// Authenticate with `token`.
    #[must_use]
    pub fn auth_token(mut self, token: impl Into<String>) -> Self {
        self.config.auth_token = Some(token.into());
        self
    }

    /// Bound on establishing the connection.
    #[must_use]
    pub const fn connect_timeout(mut self, connect_timeout: Duration) -> Self {
        self.config.connect_timeout = connect_timeout;
        self
    }

    /// Replace the whole configuration.
    #[must_use]
    pub fn config(mut self, config: ClientConfig) -> Self {
        self.config = config;
        self
    }

    /// Connect.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] without a target, or the connection error.
    pub async fn connect(self) -> Result<RpcClient> {
        match self.target {
            Some(Target::Tcp(addr)) => RpcClient::connect_tcp(addr, self.config).await,
            #[cfg(unix)]
            Some(Target::Ipc(path)) => RpcClient::connect_ipc(path, self.config).await,
            None => Err(Error::Config("no address to connect to".to_string())),
        }
    }
}

/// State shared with the reader task.
struct Shared {
    pending: DashMap<u64, PendingRequest>,
    closed: CancellationToken,
}

impl Shared {
    /// Route one inbound frame. Returns `false` when the server disconnected.
    fn route_frame(&self, frame: Frame) -> Result<bool> {
        let Some(request_id) = frame.request_id else {
            return match frame.frame_type {
                FrameType::Disconnect => Ok(false),
                other => Err(ProtocolError::UnexpectedFrame(other.to_string()).into()),
            };
        };

        match frame.frame_type {
            FrameType::StreamData => match self.pending.get(&request_id) {
                Some(pending) => pending.push_chunk(frame.payload),
                None => debug!(request_id, "stream data for unknown request"),
            },
            FrameType::ResponseEnd => {
                self.settle(request_id, Outcome::End(frame.payload));
            }
            FrameType::Error => {
                let err = match codec::decode::<ErrorPayload>(&frame.payload) {
                    Ok(payload) => RequestError::from(payload),
                    Err(e) => RequestError::Decode(e.to_string()),
                };
                self.settle(request_id, Outcome::Failed(err));
            }
            other => return Err(ProtocolError::UnexpectedFrame(other.to_string()).into()),
        }
        Ok(true)
    }

    fn settle(&self, request_id: u64, outcome: Outcome) {
        match self.pending.remove(&request_id) {
            Some((_, pending)) => pending.settle(outcome),
            None => debug!(request_id, "response for unknown request"),
        }
    }

    /// Mark the connection closed and reject everything pending.
    fn close(&self) {
        self.closed.cancel();

        let ids: Vec<u64> = self.pending.iter().map(|entry| *entry.key()).collect();
        for request_id in ids {
            if let Some((_, pending)) = self.pending.remove(&request_id) {
                pending.settle(Outcome::Failed(RequestError::ConnectionClosed));
            }
        }
    }
}

struct ClientInner {
    shared: Arc<Shared>,
    outbound: mpsc::UnboundedSender<Frame>,
    close_writer: CancellationToken,
    tasks: Mutex<Vec<JoinHandle<()>>>,
    next_request_id: AtomicU64,
    config: ClientConfig,
}

impl Drop for ClientInner {
    fn drop(&mut self) {
        if !self.shared.closed.is_cancelled() {
            let _ = self.outbound.send(Frame::disconnect());
            self.shared.close();
            self.close_writer.cancel();
        }
    }
}

/// RPC client for making requests.
///
/// Cheap to clone; clones share the connection.
#[derive(Clone)]
pub struct RpcClient {
    inner: Arc<ClientInner>,
}

impl RpcClient {
    /// Create a new client builder.
    #[must_use]
    pub fn builder() -> ClientBuilder {
        ClientBuilder::new()
    }

    /// Connect to a TCP adapter.
    ///
    /// # Errors
    ///
    /// Returns [`ConnectionError::ConnectFailed`] if the peer is unreachable or
    /// [`ConnectionError::Timeout`] if connecting takes longer than
    /// `config.connect_timeout`.
    #[instrument(skip(config))]
    pub async fn connect_tcp(addr: SocketAddr, config: ClientConfig) -> Result<Self> {
        let stream = timeout(config.connect_timeout, TcpStream::connect(addr))
            .await
            .map_err(|_| ConnectionError::Timeout(config.connect_timeout))?
            .map_err(|source| ConnectionError::ConnectFailed { addr, source })?;
        stream.set_nodelay(true)?;

        debug!("connected");
        Ok(Self::from_stream(stream, config))
    }

    /// Connect to an IPC adapter.
    ///
    /// # Errors
    ///
    /// Returns [`ConnectionError::IpcConnectFailed`] if nothing listens on
    /// `path` or [`ConnectionError::Timeout`] if connecting takes too long.
    #[cfg(unix)]
    #[instrument(skip(path, config), fields(path = %path.as_ref().display()))]
    pub async fn connect_ipc(path: impl AsRef<Path>, config: ClientConfig) -> Result<Self> {
        let path = path.as_ref();
        let stream = timeout(config.connect_timeout, tokio::net::UnixStream::connect(path))
            .await
            .map_err(|_| ConnectionError::Timeout(config.connect_timeout))?
            .map_err(|source| ConnectionError::IpcConnectFailed {
                path: path.display().to_string(),
                source,
            })?;

        debug!("connected");
        Ok(Self::from_stream(stream, config))
    }

    /// Run a client over an already connected stream.
    ///
    /// Sends the handshake right away when `config` carries a token. Must be
    /// called from within a tokio runtime.
    pub fn from_stream<S>(stream: S, config: ClientConfig) -> Self
    where
        S: AsyncRead + AsyncWrite + Send + 'static,
    {
        let codec = FrameCodec::new().with_max_frame_size(config.max_frame_size);
        let (read_half, write_half) = tokio::io::split(stream);

        let shared = Arc::new(Shared {
            pending: DashMap::new(),
            closed: CancellationToken::new(),
        });
        let (outbound, outbound_rx) = mpsc::unbounded_channel();
        let close_writer = CancellationToken::new();

        if let Some(token) = &config.auth_token {
            let handshake = HandshakePayload {
                auth_token: Some(token.clone()),
            };
            match codec::encode(&handshake) {
                Ok(payload) => {
                    let _ = outbound.send(Frame::handshake(payload));
                }
                Err(e) => warn!("failed to encode handshake: {e}"),
            }
        }

        let writer = spawn_writer(write_half, codec.clone(), outbound_rx, close_writer.clone());
        let reader = tokio::spawn(read_frames(
            FramedRead::new(read_half, codec),
            Arc::clone(&shared),
            close_writer.clone(),
        ));

        Self {
            inner: Arc::new(ClientInner {
                shared,
                outbound,
                close_writer,
                tasks: Mutex::new(vec![reader, writer]),
                next_request_id: AtomicU64::new(1),
                config,
            }),
        }
    }

    /// Send `body` to `route`.
    ///
    /// Returns as soon as the request is queued.
    ///
    /// # Errors
    ///
    /// Returns a codec error if `body` cannot be serialized or
    /// [`Error::PayloadTooLarge`] if the request does not fit in a frame.
    pub fn request<TEnd, TStream, B>(&self, route: &str, body: &B) -> Result<RpcResponse<TEnd, TStream>>
    where
        B: Serialize + ?Sized,
    {
        let request_id = self.allocate_request_id();
        self.send_request(request_id, route, Some(body))
    }

    /// Send a request without a body to `route`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::PayloadTooLarge`] if the route name alone exceeds the
    /// frame limit.
    pub fn request_without_body<TEnd, TStream>(&self, route: &str) -> Result<RpcResponse<TEnd, TStream>> {
        let request_id = self.allocate_request_id();
        self.send_request::<TEnd, TStream, ()>(request_id, route, None)
    }

    /// Send a request under a caller-chosen id.
    ///
    /// # Errors
    ///
    /// Returns [`Error::DuplicateRequestId`] if `request_id` is still pending,
    /// a codec error if `body` cannot be serialized, or
    /// [`Error::PayloadTooLarge`] if the request does not fit in a frame.
    pub fn request_with_id<TEnd, TStream, B>(
        &self,
        request_id: u64,
        route: &str,
        body: Option<&B>,
    ) -> Result<RpcResponse<TEnd, TStream>>
    where
        B: Serialize + ?Sized,
    {
        if self.inner.shared.pending.contains_key(&request_id) {
            return Err(Error::DuplicateRequestId(request_id));
        }
        self.send_request(request_id, route, body)
    }

    /// Whether the connection is closed.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.inner.shared.closed.is_cancelled()
    }

    /// Number of requests waiting for completion.
    #[must_use]
    pub fn pending_requests(&self) -> usize {
        self.inner.shared.pending.len()
    }

    /// The configuration this client was created with.
    #[must_use]
    pub fn config(&self) -> &ClientConfig {
        &self.inner.config
    }

    /// Close the connection. Idempotent.
    ///
    /// Sends a best-effort disconnect, rejects every pending request with
    /// [`RequestError::ConnectionClosed`] and waits for the connection tasks.
    pub async fn close(&self) {
        if !self.inner.shared.closed.is_cancelled() {
            let _ = self.inner.outbound.send(Frame::disconnect());
        }
        self.inner.shared.close();
        self.inner.close_writer.cancel();

        let tasks = std::mem::take(&mut *self.inner.tasks.lock());
        for task in tasks {
            if let Err(e) = task.await {
                warn!("connection task failed: {e}");
            }
        }
        debug!("client closed");
    }

    fn allocate_request_id(&self) -> u64 {
        loop {
            let id = self.inner.next_request_id.fetch_add(1, Ordering::Relaxed);
            // Skip ids a caller picked explicitly
            if !self.inner.shared.pending.contains_key(&id) {
                return id;
            }
        }
    }

    fn send_request<TEnd, TStream, B>(
        &self,
        request_id: u64,
        route: &str,
        body: Option<&B>,
    ) -> Result<RpcResponse<TEnd, TStream>>
    where
        B: Serialize + ?Sized,
    {
        let body = body
            .map(serde_json::to_value)
            .transpose()
            .map_err(CodecError::from)?;
        let payload = codec::encode(&RequestPayload {
            route: route.to_string(),
            auth_token: self.inner.config.auth_token.clone(),
            body,
        })?;
        let max = self.inner.config.max_frame_size;
        if payload.len() > max {
            return Err(Error::PayloadTooLarge {
                size: payload.len(),
                max,
            });
        }

        if self.is_closed() {
            return Ok(RpcResponse::rejected(request_id, RequestError::ConnectionClosed));
        }

        let (response, pending) = RpcResponse::pending(request_id);
        match self.inner.shared.pending.entry(request_id) {
            Entry::Occupied(_) => return Err(Error::DuplicateRequestId(request_id)),
            Entry::Vacant(entry) => {
                entry.insert(pending);
            }
        }

        // The connection may have closed between the check and the insert
        if self.is_closed()
            || self
                .inner
                .outbound
                .send(Frame::request(request_id, payload))
                .is_err()
        {
            if let Some((_, pending)) = self.inner.shared.pending.remove(&request_id) {
                pending.settle(Outcome::Failed(RequestError::ConnectionClosed));
            }
            return Ok(response);
        }

        trace!(request_id, route, "request sent");
        Ok(response)
    }
}

impl std::fmt::Debug for RpcClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RpcClient")
            .field("closed", &self.is_closed())
            .field("pending_requests", &self.pending_requests())
            .finish_non_exhaustive()
    }
}

async fn read_frames<R>(
    mut reader: FramedRead<R, FrameCodec>,
    shared: Arc<Shared>,
    close_writer: CancellationToken,
) where
    R: AsyncRead + Unpin,
{
    loop {
        tokio::select! {
            () = shared.closed.cancelled() => break,
            frame = reader.next() => match frame {
                Some(Ok(frame)) => match shared.route_frame(frame) {
                    Ok(true) => {}
                    Ok(false) => {
                        debug!("server disconnected");
                        break;
                    }
                    Err(e) => {
                        warn!("closing connection: {e}");
                        break;
                    }
                },
                Some(Err(e)) => {
                    warn!("closing connection: {e}");
                    break;
                }
                None => {
                    debug!("connection closed by server");
                    break;
                }
            }
        }
    }

    shared.close();
    close_writer.cancel();
}
