//! Node RPC over persistent socket connections.
//!
//! A [`Router`] maps route names (`namespace/method`) to a schema and an async
//! handler. Adapters accept connections (TCP, Unix domain sockets, or in-process
//! pipes) and run a session per connection that multiplexes concurrent
//! requests by id. Handlers answer through a [`RequestContext`] with any number
//! of streamed chunks followed by a final value or a structured error. The
//! [`RpcClient`] speaks the same protocol and hands out one [`RpcResponse`] per
//! request.
//!
//! # Features
//!
//! - **Unary and streaming**: every route can stream chunks before ending
//! - **Validation**: per-route schemas reject bad input before the handler runs
//! - **Authentication**: optional shared token, presented once per session
//! - **Structured errors**: status and code survive the process boundary
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//!
//! use ironfish_rpc::schema::string;
//! use ironfish_rpc::{AdapterConfig, ClientConfig, RpcAdapter, RpcClient, RpcResponse, Router, TcpAdapter};
//!
//! async fn example() -> Result<(), Box<dyn std::error::Error>> {
//!     let router = Arc::new(Router::new());
//!     router.register("node/echo", string().defined(), |request| async move {
//!         request.end(request.data())?;
//!         Ok(())
//!     })?;
//!
//!     let adapter = TcpAdapter::new(Arc::clone(&router), AdapterConfig { port: 0, ..AdapterConfig::default() });
//!     adapter.start().await?;
//!
//!     let addr = adapter.local_addr().ok_or("adapter not bound")?;
//!     let client = RpcClient::connect_tcp(addr, ClientConfig::default()).await?;
//!     let response: RpcResponse<String> = client.request("node/echo", "hello")?;
//!     assert_eq!(response.wait_for_end().await?.as_deref(), Some("hello"));
//!
//!     client.close().await;
//!     adapter.stop().await?;
//!     Ok(())
//! }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]
#![allow(clippy::module_name_repetitions)]

pub mod adapters;
pub mod client;
pub mod config;
pub mod context;
pub mod error;
pub mod protocol;
pub mod response;
pub mod router;
pub mod session;
mod writer;

// Re-export commonly used types
#[cfg(unix)]
pub use adapters::IpcAdapter;
pub use adapters::{MemoryAdapter, RpcAdapter, TcpAdapter};
pub use client::{ClientBuilder, RpcClient, RpcResponse};
pub use config::{AdapterConfig, ClientConfig};
pub use context::{RequestContext, RequestState};
pub use error::{Error, Result};
pub use response::{ErrorCode, RequestError, ResponseError};
pub use router::{ApiNamespace, Request, Router, schema};

// Re-export dependencies that are part of our public API
pub use bytes::Bytes;
pub use serde_json::Value;
