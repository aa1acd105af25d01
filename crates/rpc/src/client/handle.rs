//! Caller-side handle of one request.

use std::fmt;
use std::marker::PhantomData;
use std::sync::Arc;

use bytes::Bytes;
use futures::Stream;
use serde::de::DeserializeOwned;
use serde_json::Value;
use tokio::sync::{Mutex, mpsc, watch};
use tracing::warn;

use crate::protocol::codec;
use crate::response::RequestError;

/// How a request completed, as received from the server.
#[derive(Debug, Clone)]
pub(crate) enum Outcome {
    /// Response-end payload, empty when there is no final value.
    End(Bytes),
    /// Error frame, or local failure.
    Failed(RequestError),
}

/// Client-side state of a request that has not completed yet.
pub(crate) struct PendingRequest {
    chunks: mpsc::UnboundedSender<Bytes>,
    outcome: watch::Sender<Option<Outcome>>,
}

impl PendingRequest {
    pub(crate) fn push_chunk(&self, payload: Bytes) {
        // The caller may have dropped its handle
        let _ = self.chunks.send(payload);
    }

    /// Record the outcome. Dropping `self` afterwards ends the chunk stream.
    pub(crate) fn settle(self, outcome: Outcome) {
        self.outcome.send_replace(Some(outcome));
    }
}

/// Handle to an outstanding request.
///
/// `TEnd` is the type of the final value, `TStream` the type of each streamed
/// chunk. Both default to dynamic values.
pub struct RpcResponse<TEnd = Value, TStream = Value> {
    request_id: u64,
    chunks: Arc<Mutex<mpsc::UnboundedReceiver<Bytes>>>,
    outcome: watch::Receiver<Option<Outcome>>,
    _types: PhantomData<fn() -> (TEnd, TStream)>,
}

impl<TEnd, TStream> RpcResponse<TEnd, TStream> {
    pub(crate) fn pending(request_id: u64) -> (Self, PendingRequest) {
        let (chunks_tx, chunks_rx) = mpsc::unbounded_channel();
        let (outcome_tx, outcome_rx) = watch::channel(None);
        let response = Self {
            request_id,
            chunks: Arc::new(Mutex::new(chunks_rx)),
            outcome: outcome_rx,
            _types: PhantomData,
        };
        let pending = PendingRequest {
            chunks: chunks_tx,
            outcome: outcome_tx,
        };
        (response, pending)
    }

    /// A handle that already failed with `err`.
    pub(crate) fn rejected(request_id: u64, err: RequestError) -> Self {
        let (response, pending) = Self::pending(request_id);
        pending.settle(Outcome::Failed(err));
        response
    }

    /// The request id.
    #[must_use]
    pub const fn request_id(&self) -> u64 {
        self.request_id
    }

    /// Whether the request completed, successfully or not.
    #[must_use]
    pub fn is_settled(&self) -> bool {
        self.outcome.borrow().is_some()
    }

    /// Wait for the request to complete.
    ///
    /// Returns the final value, `None` when the server ended the request
    /// without one. Can be called any number of times.
    ///
    /// # Errors
    ///
    /// Returns the server's error, [`RequestError::ConnectionClosed`] if the
    /// connection went away first, or [`RequestError::Decode`] if the final
    /// value is not a `TEnd`.
    pub async fn wait_for_end(&self) -> Result<Option<TEnd>, RequestError>
    where
        TEnd: DeserializeOwned,
    {
        let mut outcome = self.outcome.clone();
        let settled = match outcome.wait_for(Option::is_some).await {
            Ok(settled) => settled.clone(),
            Err(_) => None,
        };

        match settled {
            Some(Outcome::End(payload)) => codec::decode_optional(&payload)
                .map_err(|e| RequestError::Decode(e.to_string())),
            Some(Outcome::Failed(err)) => Err(err),
            None => Err(RequestError::ConnectionClosed),
        }
    }

    /// Streamed chunks in arrival order.
    ///
    /// The stream ends when the request completes. Every call reads from the
    /// same buffer, so chunks consumed through one stream are not seen by
    /// another. Chunks received before an error stay readable. Chunks that do
    /// not decode as `TStream` are logged and skipped.
    pub fn content_stream(&self) -> impl Stream<Item = TStream> + Send + 'static
    where
        TStream: DeserializeOwned + Send + 'static,
    {
        let request_id = self.request_id;
        futures::stream::unfold(Arc::clone(&self.chunks), move |chunks| async move {
            loop {
                let payload = chunks.lock().await.recv().await?;
                match codec::decode::<TStream>(&payload) {
                    Ok(chunk) => return Some((chunk, chunks)),
                    Err(e) => warn!(request_id, "skipping undecodable stream chunk: {e}"),
                }
            }
        })
    }
}

impl<TEnd, TStream> fmt::Debug for RpcResponse<TEnd, TStream> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RpcResponse")
            .field("request_id", &self.request_id)
            .field("settled", &self.is_settled())
            .finish_non_exhaustive()
    }
}
