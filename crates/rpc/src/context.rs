//! Per-request response handle.
//!
//! A [`RequestContext`] is created by the session for every inbound request and
//! handed to the route handler. It is the only way a handler talks back to the
//! caller:
//!
//! - `stream` - send one chunk of a streaming response
//! - `end` / `end_empty` - complete the request
//! - `error` - fail the request with a structured error
//!
//! The context enforces the `Open -> Streaming -> Ended | Errored` lifecycle.
//! Once a terminal state is reached every further mutator is rejected with
//! [`Error::RequestClosed`].
//!
//! Payloads are checked against the session's frame limit before the state
//! changes. An oversized final value fails the request with a 500 instead, so
//! the caller always receives a terminal frame.

use std::fmt;
use std::sync::{Arc, Weak};

use dashmap::DashMap;
use parking_lot::Mutex;
use serde::Serialize;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace};

use crate::error::{Error, Result};
use crate::protocol::codec;
use crate::protocol::message::ErrorPayload;
use crate::protocol::Frame;
use crate::response::ResponseError;

/// Requests of one session that have not reached a terminal state.
pub(crate) type InFlightTable = DashMap<u64, RequestContext>;

/// Lifecycle state of a request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RequestState {
    /// Nothing sent yet.
    Open,
    /// At least one stream chunk sent.
    Streaming,
    /// Completed successfully.
    Ended,
    /// Completed with an error.
    Errored,
}

impl RequestState {
    /// Whether no further frames may be sent.
    #[must_use]
    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Ended | Self::Errored)
    }
}

impl fmt::Display for RequestState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Open => "open",
            Self::Streaming => "streaming",
            Self::Ended => "ended",
            Self::Errored => "errored",
        })
    }
}

/// Response handle for one inbound request.
///
/// Cheap to clone; all clones share the same state.
#[derive(Clone)]
pub struct RequestContext {
    inner: Arc<ContextInner>,
}

struct ContextInner {
    request_id: u64,
    route: String,
    state: Mutex<RequestState>,
    outbound: mpsc::UnboundedSender<Frame>,
    in_flight: Weak<InFlightTable>,
    closed: CancellationToken,
    max_frame_size: usize,
}

impl RequestContext {
    pub(crate) fn new(
        request_id: u64,
        route: String,
        outbound: mpsc::UnboundedSender<Frame>,
        in_flight: &Arc<InFlightTable>,
        max_frame_size: usize,
    ) -> Self {
        Self {
            inner: Arc::new(ContextInner {
                request_id,
                route,
                state: Mutex::new(RequestState::Open),
                outbound,
                in_flight: Arc::downgrade(in_flight),
                closed: CancellationToken::new(),
                max_frame_size,
            }),
        }
    }

    /// The request id chosen by the client.
    #[must_use]
    pub fn request_id(&self) -> u64 {
        self.inner.request_id
    }

    /// The route this request was sent to.
    #[must_use]
    pub fn route(&self) -> &str {
        &self.inner.route
    }

    /// Current lifecycle state.
    #[must_use]
    pub fn state(&self) -> RequestState {
        *self.inner.state.lock()
    }

    /// Whether the request reached a terminal state.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.state().is_terminal()
    }

    /// Resolves once the request reached a terminal state, including when the
    /// connection is torn down underneath it.
    ///
    /// Long-running streaming handlers select on this to stop producing.
    pub async fn closed(&self) {
        self.inner.closed.cancelled().await;
    }

    /// Send one chunk of a streaming response.
    ///
    /// # Errors
    ///
    /// Returns [`Error::RequestClosed`] after a terminal state, a codec error if
    /// the chunk cannot be serialized, [`Error::PayloadTooLarge`] if it does not
    /// fit in a frame, or [`Error::ChannelClosed`] if the connection is gone.
    /// An oversized chunk is not sent and leaves the state unchanged.
    pub fn stream<T: Serialize + ?Sized>(&self, chunk: &T) -> Result<()> {
        let payload = codec::encode(chunk)?;
        self.check_size(payload.len())?;
        self.transition(RequestState::Streaming, |id| {
            Frame::stream_data(id, payload)
        })
    }

    /// Complete the request with a final value.
    ///
    /// # Errors
    ///
    /// Same as [`stream`](Self::stream). When the value does not fit in a
    /// frame the request is failed with [`ResponseError::response_too_large`]
    /// before [`Error::PayloadTooLarge`] is returned.
    pub fn end<T: Serialize + ?Sized>(&self, value: &T) -> Result<()> {
        let payload = codec::encode(value)?;
        if let Err(e) = self.check_size(payload.len()) {
            self.error(&ResponseError::response_too_large())?;
            return Err(e);
        }
        self.transition(RequestState::Ended, |id| Frame::response_end(id, payload))
    }

    /// Complete the request without a final value.
    ///
    /// # Errors
    ///
    /// Returns [`Error::RequestClosed`] after a terminal state or
    /// [`Error::ChannelClosed`] if the connection is gone.
    pub fn end_empty(&self) -> Result<()> {
        self.transition(RequestState::Ended, |id| {
            Frame::response_end(id, bytes::Bytes::new())
        })
    }

    /// Fail the request. An error whose payload does not fit in a frame is
    /// sent as [`ResponseError::response_too_large`] instead.
    ///
    /// # Errors
    ///
    /// Returns [`Error::RequestClosed`] after a terminal state, a codec error,
    /// or [`Error::ChannelClosed`] if the connection is gone.
    pub fn error(&self, err: &ResponseError) -> Result<()> {
        let mut payload = codec::encode(&ErrorPayload::from(err))?;
        if self.check_size(payload.len()).is_err() {
            debug!(request_id = self.request_id(), "error message exceeds the frame limit");
            payload = codec::encode(&ErrorPayload::from(&ResponseError::response_too_large()))?;
        }
        self.transition(RequestState::Errored, |id| Frame::error(id, payload))
    }

    /// Fail the request unless it already completed. Used on teardown.
    pub(crate) fn abort(&self, err: &ResponseError) {
        match self.error(err) {
            Ok(()) | Err(Error::RequestClosed { .. } | Error::ChannelClosed) => {}
            Err(e) => debug!(request_id = self.request_id(), "failed to abort request: {e}"),
        }
    }

    fn check_size(&self, size: usize) -> Result<()> {
        let max = self.inner.max_frame_size;
        if size > max {
            return Err(Error::PayloadTooLarge { size, max });
        }
        Ok(())
    }

    fn transition(&self, next: RequestState, frame: impl FnOnce(u64) -> Frame) -> Result<()> {
        let request_id = self.inner.request_id;

        // Enqueue under the state lock so a request's frames keep their order
        let sent = {
            let mut state = self.inner.state.lock();
            if state.is_terminal() {
                return Err(Error::RequestClosed {
                    request_id,
                    state: *state,
                });
            }
            *state = next;
            self.inner.outbound.send(frame(request_id)).is_ok()
        };

        trace!(request_id, state = %next, "request state changed");

        if next.is_terminal() {
            self.release();
        }

        if sent { Ok(()) } else { Err(Error::ChannelClosed) }
    }

    fn release(&self) {
        if let Some(table) = self.inner.in_flight.upgrade() {
            table.remove_if(&self.inner.request_id, |_, ctx| {
                Arc::ptr_eq(&ctx.inner, &self.inner)
            });
        }
        self.inner.closed.cancel();
    }
}

impl fmt::Debug for RequestContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RequestContext")
            .field("request_id", &self.inner.request_id)
            .field("route", &self.inner.route)
            .field("state", &self.state())
            .finish_non_exhaustive()
    }
}
