//! Server side of one connection.
//!
//! A session reads frames from the peer, authenticates it, turns every request
//! frame into a [`RequestContext`] and dispatches it to the router on its own
//! task. Outbound frames from all requests go through a single writer task.

use std::sync::Arc;

use futures::StreamExt;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::mpsc;
use tokio::task::JoinSet;
use tokio_util::codec::FramedRead;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

use crate::config::AdapterConfig;
use crate::context::{InFlightTable, RequestContext};
use crate::error::{Error, ProtocolError, Result};
use crate::protocol::message::{ErrorPayload, HandshakePayload, RequestPayload};
use crate::protocol::{Frame, FrameCodec, FrameType, codec};
use crate::response::ResponseError;
use crate::router::Router;
use crate::writer::spawn_writer;

/// Why the read loop stopped.
#[derive(Debug)]
enum Close {
    /// The adapter is stopping.
    Shutdown,
    /// The peer sent a disconnect frame.
    Disconnected,
    /// The peer closed the socket.
    Eof,
    /// Protocol violation or I/O failure.
    Failed(Error),
}

/// State of one server-side connection.
pub struct Session {
    id: u64,
    router: Arc<Router>,
    config: Arc<AdapterConfig>,
    in_flight: Arc<InFlightTable>,
    authenticated: bool,
}

impl Session {
    /// Create a session serving `router` under `config`.
    #[must_use]
    pub fn new(id: u64, router: Arc<Router>, config: Arc<AdapterConfig>) -> Self {
        let authenticated = !config.authentication_required;
        Self {
            id,
            router,
            config,
            in_flight: Arc::new(InFlightTable::new()),
            authenticated,
        }
    }

    /// Session id, unique within its adapter.
    #[must_use]
    pub const fn id(&self) -> u64 {
        self.id
    }

    /// Serve `stream` until the peer disconnects, the connection fails or
    /// `shutdown` is cancelled.
    ///
    /// On return every request still in flight has been failed with a
    /// connection-reset error and its handler aborted.
    ///
    /// # Errors
    ///
    /// Returns the protocol or I/O error that closed the connection. A clean
    /// disconnect or shutdown is `Ok`.
    #[instrument(name = "session", skip_all, fields(id = self.id))]
    pub async fn run<S>(mut self, stream: S, shutdown: CancellationToken) -> Result<()>
    where
        S: AsyncRead + AsyncWrite + Send + 'static,
    {
        let codec = FrameCodec::new().with_max_frame_size(self.config.max_frame_size);
        let (read_half, write_half) = tokio::io::split(stream);
        let mut reader = FramedRead::new(read_half, codec.clone());

        let (outbound, outbound_rx) = mpsc::unbounded_channel();
        let close_writer = CancellationToken::new();
        let writer = spawn_writer(write_half, codec, outbound_rx, close_writer.clone());

        let mut handlers = JoinSet::new();
        debug!("session opened");

        let reason = loop {
            tokio::select! {
                () = shutdown.cancelled() => break Close::Shutdown,
                Some(joined) = handlers.join_next(), if !handlers.is_empty() => {
                    if let Err(e) = joined {
                        if e.is_panic() {
                            warn!("handler task panicked: {e}");
                        }
                    }
                }
                frame = reader.next() => {
                    let frame = match frame {
                        None => break Close::Eof,
                        Some(Err(e)) => break Close::Failed(e),
                        Some(Ok(frame)) => frame,
                    };
                    match self.handle_frame(frame, &outbound, &mut handlers) {
                        Ok(Some(close)) => break close,
                        Ok(None) => {}
                        Err(e) => break Close::Failed(e),
                    }
                }
            }
        };

        self.teardown(&reason, &outbound, &mut handlers).await;

        close_writer.cancel();
        drop(outbound);
        if let Err(e) = writer.await {
            warn!("writer task failed: {e}");
        }

        match reason {
            Close::Failed(e) => {
                info!("session closed: {e}");
                Err(e)
            }
            other => {
                debug!(reason = ?other, "session closed");
                Ok(())
            }
        }
    }

    fn handle_frame(
        &mut self,
        frame: Frame,
        outbound: &mpsc::UnboundedSender<Frame>,
        handlers: &mut JoinSet<()>,
    ) -> Result<Option<Close>> {
        match frame.frame_type {
            FrameType::Handshake => {
                let handshake: HandshakePayload = codec::decode(&frame.payload)?;
                if self.token_matches(handshake.auth_token.as_deref()) {
                    self.authenticated = true;
                    debug!("session authenticated by handshake");
                } else {
                    debug!("handshake presented a missing or bad token");
                }
                Ok(None)
            }
            FrameType::Request => {
                self.handle_request(frame, outbound, handlers)?;
                Ok(None)
            }
            FrameType::Disconnect => Ok(Some(Close::Disconnected)),
            FrameType::StreamData | FrameType::ResponseEnd | FrameType::Error => {
                Err(ProtocolError::UnexpectedFrame(frame.frame_type.to_string()).into())
            }
        }
    }

    fn handle_request(
        &self,
        frame: Frame,
        outbound: &mpsc::UnboundedSender<Frame>,
        handlers: &mut JoinSet<()>,
    ) -> Result<()> {
        let request_id = frame.request_id.ok_or_else(|| {
            ProtocolError::InvalidFrame("request frame without request id".to_string())
        })?;
        let RequestPayload {
            route,
            auth_token,
            body,
        } = codec::decode(&frame.payload)?;

        // Only a handshake authenticates the session; a request token covers that request alone
        if !self.authenticated && !self.token_matches(auth_token.as_deref()) {
            debug!(request_id, route, "rejecting unauthenticated request");
            return send_error(outbound, request_id, &ResponseError::authentication());
        }

        if self.in_flight.contains_key(&request_id) {
            debug!(request_id, "duplicate request id");
            let err = ResponseError::new(
                400,
                "ERROR",
                format!("Request id {request_id} is already in flight"),
            );
            return send_error(outbound, request_id, &err);
        }

        let context = RequestContext::new(
            request_id,
            route.clone(),
            outbound.clone(),
            &self.in_flight,
            self.config.max_frame_size,
        );
        self.in_flight.insert(request_id, context.clone());

        if !self.config.serves(&route) {
            debug!(request_id, route, "route outside the adapter's namespaces");
            reject(&context, &ResponseError::not_found(&route));
            return Ok(());
        }

        debug!(request_id, route, "dispatching request");
        let router = Arc::clone(&self.router);
        handlers.spawn(async move {
            router.dispatch(&route, body, context).await;
        });
        Ok(())
    }

    fn token_matches(&self, presented: Option<&str>) -> bool {
        match (self.config.auth_token.as_deref(), presented) {
            (Some(expected), Some(presented)) => !expected.is_empty() && expected == presented,
            _ => false,
        }
    }

    async fn teardown(
        &self,
        reason: &Close,
        outbound: &mpsc::UnboundedSender<Frame>,
        handlers: &mut JoinSet<()>,
    ) {
        // Snapshot first: aborting a context removes it from the table
        let pending: Vec<RequestContext> = self
            .in_flight
            .iter()
            .map(|entry| entry.value().clone())
            .collect();

        if !pending.is_empty() {
            debug!(count = pending.len(), "resetting in-flight requests");
        }
        let reset = ResponseError::connection_reset();
        for context in &pending {
            context.abort(&reset);
        }

        handlers.shutdown().await;

        if matches!(reason, Close::Shutdown) {
            let _ = outbound.send(Frame::disconnect());
        }
    }
}

/// Answer a request that never got a context.
fn send_error(
    outbound: &mpsc::UnboundedSender<Frame>,
    request_id: u64,
    err: &ResponseError,
) -> Result<()> {
    let payload = codec::encode(&ErrorPayload::from(err))?;
    outbound
        .send(Frame::error(request_id, payload))
        .map_err(|_| Error::ChannelClosed)
}

fn reject(context: &RequestContext, err: &ResponseError) {
    if let Err(e) = context.error(err) {
        debug!(request_id = context.request_id(), "failed to reject request: {e}");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::router::schema::{AnySchema, string};
    use futures::SinkExt;
    use serde_json::{Value, json};
    use std::time::Duration;
    use tokio::io::DuplexStream;
    use tokio_util::codec::Framed;

    type Peer = Framed<DuplexStream, FrameCodec>;

    fn start(config: AdapterConfig) -> (Peer, CancellationToken, tokio::task::JoinHandle<Result<()>>) {
        let router = Arc::new(Router::new());
        router
            .register("foo/echo", string().defined(), |request| async move {
                request.end(request.data())?;
                Ok(())
            })
            .unwrap();
        router
            .register("foo/hang", AnySchema, |request| async move {
                request.context().closed().await;
                Ok(())
            })
            .unwrap();

        let (client, server) = tokio::io::duplex(64 * 1024);
        let shutdown = CancellationToken::new();
        let session = Session::new(1, router, Arc::new(config));
        let task = tokio::spawn(session.run(server, shutdown.clone()));
        (Framed::new(client, FrameCodec::new()), shutdown, task)
    }

    fn request(id: u64, route: &str, token: Option<&str>, body: Option<Value>) -> Frame {
        let payload = RequestPayload {
            route: route.to_string(),
            auth_token: token.map(ToString::to_string),
            body,
        };
        Frame::request(id, codec::encode(&payload).unwrap())
    }

    async fn next(peer: &mut Peer) -> Frame {
        tokio::time::timeout(Duration::from_secs(5), peer.next())
            .await
            .expect("timed out waiting for frame")
            .expect("connection closed")
            .unwrap()
    }

    #[tokio::test]
    async fn test_echo() {
        let (mut peer, _shutdown, _task) = start(AdapterConfig::default());

        peer.send(request(1, "foo/echo", None, Some(json!("hello")))).await.unwrap();

        let frame = next(&mut peer).await;
        assert_eq!(frame.frame_type, FrameType::ResponseEnd);
        assert_eq!(frame.request_id, Some(1));
        assert_eq!(codec::decode::<String>(&frame.payload).unwrap(), "hello");
    }

    fn handshake(token: &str) -> Frame {
        let payload = HandshakePayload {
            auth_token: Some(token.to_string()),
        };
        Frame::handshake(codec::encode(&payload).unwrap())
    }

    fn assert_auth_error(frame: &Frame, request_id: u64) {
        assert_eq!(frame.frame_type, FrameType::Error);
        assert_eq!(frame.request_id, Some(request_id));
        let err: ErrorPayload = codec::decode(&frame.payload).unwrap();
        assert_eq!(err.status, 400);
        assert_eq!(err.code_message, "Missing or bad authentication");
    }

    #[tokio::test]
    async fn test_request_tokens_are_checked_per_request() {
        let (mut peer, _shutdown, _task) =
            start(AdapterConfig::default().with_auth_token("secret"));

        peer.send(request(1, "foo/echo", None, Some(json!("a")))).await.unwrap();
        assert_auth_error(&next(&mut peer).await, 1);

        peer.send(request(2, "foo/echo", Some("wrong"), Some(json!("b")))).await.unwrap();
        assert_auth_error(&next(&mut peer).await, 2);

        peer.send(request(3, "foo/echo", Some("secret"), Some(json!("c")))).await.unwrap();
        assert_eq!(next(&mut peer).await.frame_type, FrameType::ResponseEnd);

        // A matching request token does not carry over to later requests
        peer.send(request(4, "foo/echo", None, Some(json!("d")))).await.unwrap();
        assert_auth_error(&next(&mut peer).await, 4);
    }

    #[tokio::test]
    async fn test_handshake_authenticates_session() {
        let (mut peer, _shutdown, _task) =
            start(AdapterConfig::default().with_auth_token("secret"));

        peer.send(handshake("wrong")).await.unwrap();
        peer.send(request(1, "foo/echo", None, Some(json!("a")))).await.unwrap();
        assert_auth_error(&next(&mut peer).await, 1);

        peer.send(handshake("secret")).await.unwrap();
        peer.send(request(2, "foo/echo", None, Some(json!("b")))).await.unwrap();
        let frame = next(&mut peer).await;
        assert_eq!(frame.frame_type, FrameType::ResponseEnd);
        assert_eq!(codec::decode::<String>(&frame.payload).unwrap(), "b");
    }

    #[tokio::test]
    async fn test_authentication_checked_before_duplicate_id() {
        let (mut peer, _shutdown, _task) =
            start(AdapterConfig::default().with_auth_token("secret"));

        peer.send(request(7, "foo/hang", Some("secret"), None)).await.unwrap();
        peer.send(request(7, "foo/hang", None, None)).await.unwrap();

        // The in-flight id is not revealed to an unauthenticated request
        assert_auth_error(&next(&mut peer).await, 7);
    }

    #[tokio::test]
    async fn test_duplicate_request_id() {
        let (mut peer, _shutdown, _task) = start(AdapterConfig::default());

        peer.send(request(7, "foo/hang", None, None)).await.unwrap();
        peer.send(request(7, "foo/hang", None, None)).await.unwrap();

        let frame = next(&mut peer).await;
        assert_eq!(frame.frame_type, FrameType::Error);
        assert_eq!(frame.request_id, Some(7));
        let err: ErrorPayload = codec::decode(&frame.payload).unwrap();
        assert_eq!(err.status, 400);
        assert!(err.code_message.contains("already in flight"));
    }

    #[tokio::test]
    async fn test_unexpected_frame_closes_session() {
        let (mut peer, _shutdown, task) = start(AdapterConfig::default());

        peer.send(request(1, "foo/hang", None, None)).await.unwrap();
        peer.send(request(2, "foo/echo", None, Some(json!("x")))).await.unwrap();
        assert_eq!(next(&mut peer).await.request_id, Some(2));

        peer.send(Frame::stream_data(1, bytes::Bytes::new())).await.unwrap();

        // The request still in flight is reset before the connection closes
        let frame = next(&mut peer).await;
        assert_eq!(frame.frame_type, FrameType::Error);
        assert_eq!(frame.request_id, Some(1));
        let err: ErrorPayload = codec::decode(&frame.payload).unwrap();
        assert_eq!(err.code, "CONNECTION_RESET");

        let result = task.await.unwrap();
        assert!(matches!(
            result,
            Err(Error::Protocol(ProtocolError::UnexpectedFrame(_)))
        ));
        assert!(peer.next().await.is_none());
    }

    #[tokio::test]
    async fn test_malformed_bytes_reset_in_flight_requests() {
        use tokio::io::AsyncWriteExt;

        let (mut peer, _shutdown, task) = start(AdapterConfig::default());

        peer.send(request(1, "foo/hang", None, None)).await.unwrap();
        peer.send(request(2, "foo/echo", None, Some(json!("x")))).await.unwrap();
        assert_eq!(next(&mut peer).await.request_id, Some(2));

        // A header with an unknown frame type
        peer.get_mut().write_all(&[0xff; 16]).await.unwrap();

        let frame = next(&mut peer).await;
        assert_eq!(frame.request_id, Some(1));
        let err: ErrorPayload = codec::decode(&frame.payload).unwrap();
        assert_eq!(err.code, "CONNECTION_RESET");
        assert!(matches!(task.await.unwrap(), Err(Error::Protocol(_))));
    }

    #[tokio::test]
    async fn test_shutdown_resets_in_flight_requests() {
        let (mut peer, shutdown, task) = start(AdapterConfig::default());

        peer.send(request(1, "foo/hang", None, None)).await.unwrap();
        // Make sure the request was read before stopping
        peer.send(request(2, "foo/echo", None, Some(json!("x")))).await.unwrap();
        assert_eq!(next(&mut peer).await.request_id, Some(2));

        shutdown.cancel();

        let frame = next(&mut peer).await;
        assert_eq!(frame.frame_type, FrameType::Error);
        assert_eq!(frame.request_id, Some(1));
        let err: ErrorPayload = codec::decode(&frame.payload).unwrap();
        assert_eq!(err.code, "CONNECTION_RESET");

        assert_eq!(next(&mut peer).await, Frame::disconnect());
        assert!(task.await.unwrap().is_ok());
    }
}
