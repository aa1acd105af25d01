//! Errors that cross the wire: what handlers raise and what callers observe.

use std::fmt;

use thiserror::Error;

use crate::protocol::message::ErrorPayload;

/// Message used when a request fails the session's authentication check.
pub const AUTHENTICATION_FAILED_MESSAGE: &str = "Missing or bad authentication";

/// Message used when a handler's final value exceeds the frame limit.
pub const RESPONSE_TOO_LARGE_MESSAGE: &str = "response too large";

/// Well-known error codes produced by the RPC layer itself.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorCode {
    /// Generic failure (uncaught handler errors, authentication).
    Error,
    /// Input rejected by the route's schema.
    Validation,
    /// No route registered under the requested name.
    RouteNotFound,
    /// The connection went away while the request was in flight.
    ConnectionReset,
}

impl ErrorCode {
    /// Wire representation of the code.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Error => "ERROR",
            Self::Validation => "VALIDATION",
            Self::RouteNotFound => "ROUTE_NOT_FOUND",
            Self::ConnectionReset => "CONNECTION_RESET",
        }
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A structured error that is forwarded to the caller verbatim.
///
/// Handlers return this (directly or wrapped in `anyhow::Error`) to control
/// the status and code the client sees. Any other handler error is reported
/// as a generic 500.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{message}")]
pub struct ResponseError {
    /// HTTP-like status.
    pub status: u16,
    /// Machine-readable code.
    pub code: String,
    /// Human-readable message.
    pub message: String,
}

impl ResponseError {
    /// Create an error with an arbitrary status and code.
    pub fn new(status: u16, code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            status,
            code: code.into(),
            message: message.into(),
        }
    }

    /// 400 `VALIDATION`.
    pub fn validation(message: impl Into<String>) -> Self {
        Self::new(400, ErrorCode::Validation.as_str(), message)
    }

    /// 404 `ROUTE_NOT_FOUND`.
    #[must_use]
    pub fn not_found(route: &str) -> Self {
        Self::new(
            404,
            ErrorCode::RouteNotFound.as_str(),
            format!("No route found {route}"),
        )
    }

    /// 400 `ERROR` for missing or mismatched tokens.
    #[must_use]
    pub fn authentication() -> Self {
        Self::new(400, ErrorCode::Error.as_str(), AUTHENTICATION_FAILED_MESSAGE)
    }

    /// 500 `ERROR`.
    pub fn generic(message: impl Into<String>) -> Self {
        Self::new(500, ErrorCode::Error.as_str(), message)
    }

    /// 500 `ERROR`, sent in place of a final value that does not fit in a frame.
    #[must_use]
    pub fn response_too_large() -> Self {
        Self::generic(RESPONSE_TOO_LARGE_MESSAGE)
    }

    /// 500 `CONNECTION_RESET`, used when a session tears down under a request.
    #[must_use]
    pub fn connection_reset() -> Self {
        Self::new(
            500,
            ErrorCode::ConnectionReset.as_str(),
            "Connection closed before the request completed",
        )
    }

    /// Classify an arbitrary handler error.
    ///
    /// Errors that are, or wrap, a [`ResponseError`] keep their status and
    /// code. Everything else becomes a generic 500 carrying the error's display
    /// text.
    #[must_use]
    pub fn from_handler_error(err: &anyhow::Error) -> Self {
        err.chain()
            .find_map(|cause| cause.downcast_ref::<Self>())
            .cloned()
            .unwrap_or_else(|| Self::generic(err.to_string()))
    }
}

impl From<&ResponseError> for ErrorPayload {
    fn from(err: &ResponseError) -> Self {
        Self {
            status: err.status,
            code: err.code.clone(),
            code_message: err.message.clone(),
        }
    }
}

/// Failure observed by a client waiting on a request.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RequestError {
    /// The server answered with an error frame.
    #[error("Request failed ({status} {code}): {code_message}")]
    Rpc {
        /// Status sent by the server.
        status: u16,
        /// Code sent by the server.
        code: String,
        /// Message sent by the server.
        code_message: String,
    },

    /// The connection closed before the request completed.
    #[error("Connection closed")]
    ConnectionClosed,

    /// The final value could not be decoded into the requested type.
    #[error("Failed to decode response: {0}")]
    Decode(String),
}

impl RequestError {
    /// Status sent by the server, if the server answered.
    #[must_use]
    pub const fn status(&self) -> Option<u16> {
        match self {
            Self::Rpc { status, .. } => Some(*status),
            _ => None,
        }
    }

    /// Code sent by the server, if the server answered.
    #[must_use]
    pub fn code(&self) -> Option<&str> {
        match self {
            Self::Rpc { code, .. } => Some(code),
            _ => None,
        }
    }

    /// Message sent by the server, if the server answered.
    #[must_use]
    pub fn code_message(&self) -> Option<&str> {
        match self {
            Self::Rpc { code_message, .. } => Some(code_message),
            _ => None,
        }
    }
}

impl From<ErrorPayload> for RequestError {
    fn from(payload: ErrorPayload) -> Self {
        Self::Rpc {
            status: payload.status,
            code: payload.code,
            code_message: payload.code_message,
        }
    }
}
