//! Route registration and dispatch.

pub mod schema;

use std::fmt;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::pin::Pin;
use std::str::FromStr;
use std::sync::Arc;

use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use futures::FutureExt;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, error, info, warn};

use crate::context::RequestContext;
use crate::error::{Error, Result};
use crate::response::ResponseError;
use schema::Validator;

/// Type alias for boxed futures
pub type BoxedFuture<T> = Pin<Box<dyn Future<Output = T> + Send>>;

/// Namespaces the node exposes routes under.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ApiNamespace {
    /// Chain queries.
    Chain,
    /// Node configuration.
    Config,
    /// Event subscriptions.
    Event,
    /// Testnet faucet.
    Faucet,
    /// Block template and mining.
    Miner,
    /// Node status and lifecycle.
    Node,
    /// Peer network.
    Peer,
    /// RPC introspection.
    Rpc,
    /// Accounts and transactions.
    Wallet,
    /// Worker pool.
    Worker,
    /// Mempool queries.
    Mempool,
}

impl ApiNamespace {
    /// Every namespace.
    pub const ALL: [Self; 11] = [
        Self::Chain,
        Self::Config,
        Self::Event,
        Self::Faucet,
        Self::Miner,
        Self::Node,
        Self::Peer,
        Self::Rpc,
        Self::Wallet,
        Self::Worker,
        Self::Mempool,
    ];

    /// Route prefix of this namespace.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Chain => "chain",
            Self::Config => "config",
            Self::Event => "event",
            Self::Faucet => "faucet",
            Self::Miner => "miner",
            Self::Node => "node",
            Self::Peer => "peer",
            Self::Rpc => "rpc",
            Self::Wallet => "wallet",
            Self::Worker => "worker",
            Self::Mempool => "mempool",
        }
    }
}

impl fmt::Display for ApiNamespace {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ApiNamespace {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Self::ALL
            .into_iter()
            .find(|namespace| namespace.as_str() == s)
            .ok_or_else(|| Error::Config(format!("unknown namespace: {s}")))
    }
}

impl From<ApiNamespace> for String {
    fn from(namespace: ApiNamespace) -> Self {
        namespace.as_str().to_string()
    }
}

/// A validated request as seen by a handler.
pub struct Request<T> {
    data: T,
    context: RequestContext,
}

impl<T> Request<T> {
    /// Validated input.
    pub const fn data(&self) -> &T {
        &self.data
    }

    /// Take the validated input, dropping the response handle.
    pub fn into_data(self) -> T {
        self.data
    }

    /// Response handle.
    pub const fn context(&self) -> &RequestContext {
        &self.context
    }

    /// Split into input and response handle.
    pub fn into_parts(self) -> (T, RequestContext) {
        (self.data, self.context)
    }

    /// See [`RequestContext::stream`].
    ///
    /// # Errors
    ///
    /// Fails once the request completed or the connection is gone.
    pub fn stream<S: Serialize + ?Sized>(&self, chunk: &S) -> Result<()> {
        self.context.stream(chunk)
    }

    /// See [`RequestContext::end`].
    ///
    /// # Errors
    ///
    /// Fails once the request completed or the connection is gone.
    pub fn end<S: Serialize + ?Sized>(&self, value: &S) -> Result<()> {
        self.context.end(value)
    }

    /// See [`RequestContext::end_empty`].
    ///
    /// # Errors
    ///
    /// Fails once the request completed or the connection is gone.
    pub fn end_empty(&self) -> Result<()> {
        self.context.end_empty()
    }

    /// See [`RequestContext::error`].
    ///
    /// # Errors
    ///
    /// Fails once the request completed or the connection is gone.
    pub fn error(&self, err: &ResponseError) -> Result<()> {
        self.context.error(err)
    }
}

impl<T: fmt::Debug> fmt::Debug for Request<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Request")
            .field("data", &self.data)
            .field("context", &self.context)
            .finish()
    }
}

/// Trait for type-erased routes
trait RouteHandler: Send + Sync {
    /// Validate the body and start the handler, or return the rejection reason
    fn call(
        &self,
        body: Option<Value>,
        context: RequestContext,
    ) -> std::result::Result<BoxedFuture<anyhow::Result<()>>, String>;
}

/// Concrete implementation of a typed route
struct TypedRoute<V, F> {
    schema: V,
    handler: F,
}

impl<V, F, Fut> RouteHandler for TypedRoute<V, F>
where
    V: Validator,
    F: Fn(Request<V::Output>) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
{
    fn call(
        &self,
        body: Option<Value>,
        context: RequestContext,
    ) -> std::result::Result<BoxedFuture<anyhow::Result<()>>, String> {
        let data = self.schema.validate(body)?;
        Ok(Box::pin((self.handler)(Request { data, context })))
    }
}

/// Table of routes shared by every adapter serving it.
#[derive(Default)]
pub struct Router {
    routes: DashMap<String, Arc<dyn RouteHandler>>,
}

impl Router {
    /// Create an empty router.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `handler` under `name`, with `schema` validating its input.
    ///
    /// # Errors
    ///
    /// Returns [`Error::DuplicateRoute`] if `name` is already registered.
    pub fn register<V, F, Fut>(&self, name: impl Into<String>, schema: V, handler: F) -> Result<()>
    where
        V: Validator,
        F: Fn(Request<V::Output>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
    {
        let name = name.into();
        match self.routes.entry(name) {
            Entry::Occupied(entry) => Err(Error::DuplicateRoute(entry.key().clone())),
            Entry::Vacant(entry) => {
                info!("Registered route: {}", entry.key());
                entry.insert(Arc::new(TypedRoute { schema, handler }));
                Ok(())
            }
        }
    }

    /// Whether `name` is registered.
    #[must_use]
    pub fn contains(&self, name: &str) -> bool {
        self.routes.contains_key(name)
    }

    /// Registered route names, sorted.
    #[must_use]
    pub fn routes(&self) -> Vec<String> {
        let mut names: Vec<_> = self.routes.iter().map(|r| r.key().clone()).collect();
        names.sort();
        names
    }

    /// The namespace part of a `namespace/method` route name.
    #[must_use]
    pub fn namespace_of(route: &str) -> Option<&str> {
        route
            .split_once('/')
            .map(|(namespace, _)| namespace)
            .filter(|namespace| !namespace.is_empty())
    }

    /// Validate `body` against the route's schema and run its handler.
    ///
    /// Every failure is reported through `context`: unknown routes, schema
    /// rejections, handler errors and handler panics. A handler that returns
    /// `Ok` without completing the request leaves it open.
    pub async fn dispatch(&self, route: &str, body: Option<Value>, context: RequestContext) {
        let Some(handler) = self.routes.get(route).map(|r| Arc::clone(r.value())) else {
            debug!(route, "no route found");
            reply_error(&context, &ResponseError::not_found(route));
            return;
        };

        let started = std::panic::catch_unwind(AssertUnwindSafe(|| {
            handler.call(body, context.clone())
        }));
        let future = match started {
            Ok(Ok(future)) => future,
            Ok(Err(reason)) => {
                debug!(route, "request rejected by schema: {reason}");
                reply_error(&context, &ResponseError::validation(reason));
                return;
            }
            Err(panic) => {
                report_panic(route, &context, panic.as_ref());
                return;
            }
        };

        match AssertUnwindSafe(future).catch_unwind().await {
            Ok(Ok(())) => {}
            Ok(Err(err)) => {
                let response = ResponseError::from_handler_error(&err);
                if response.status >= 500 {
                    warn!(route, "handler failed: {err:#}");
                } else {
                    debug!(route, status = response.status, "handler returned error: {err}");
                }
                reply_error(&context, &response);
            }
            Err(panic) => report_panic(route, &context, panic.as_ref()),
        }
    }
}

impl fmt::Debug for Router {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Router")
            .field("routes", &self.routes())
            .finish()
    }
}

fn report_panic(route: &str, context: &RequestContext, panic: &(dyn std::any::Any + Send)) {
    let message = panic
        .downcast_ref::<&str>()
        .map(ToString::to_string)
        .or_else(|| panic.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| "handler panicked".to_string());
    error!(route, "handler panicked: {message}");
    reply_error(context, &ResponseError::generic(message));
}

fn reply_error(context: &RequestContext, err: &ResponseError) {
    if let Err(e) = context.error(err) {
        debug!(
            request_id = context.request_id(),
            "could not report error to caller: {e}"
        );
    }
}
