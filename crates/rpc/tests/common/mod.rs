//! Shared fixtures for adapter tests.

#![allow(dead_code)]

use std::sync::Arc;
use std::time::Duration;

use ironfish_rpc::schema::{AnySchema, string, typed};
use ironfish_rpc::{AdapterConfig, ResponseError, Router};
use tracing::Level;
use tracing_subscriber::EnvFilter;

/// Install a subscriber once; later calls are no-ops.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::from_default_env()
                .add_directive(Level::INFO.into())
                .add_directive("ironfish_rpc=debug".parse().unwrap()),
        )
        .with_test_writer()
        .try_init();
}

/// Adapter config binding an ephemeral local port.
pub fn ephemeral() -> AdapterConfig {
    AdapterConfig {
        port: 0,
        ..AdapterConfig::default()
    }
}

/// Upper bound for anything a test waits on.
pub const TEST_TIMEOUT: Duration = Duration::from_secs(10);

/// Router with the routes the adapter tests exercise.
pub fn test_router() -> Arc<Router> {
    let router = Arc::new(Router::new());

    router
        .register("foo/bar", string().defined(), |request| async move {
            request.end(request.data())?;
            Ok(())
        })
        .unwrap();

    router
        .register("foo/baz", string().defined(), |request| async move {
            request.stream(request.data())?;
            request.end_empty()?;
            Ok(())
        })
        .unwrap();

    router
        .register("foo/count", typed::<u32>(), |request| async move {
            let count = *request.data();
            for i in 0..count {
                request.stream(&i)?;
                tokio::task::yield_now().await;
            }
            request.end(&count)?;
            Ok(())
        })
        .unwrap();

    router
        .register("foo/error", AnySchema, |_request| async {
            Err(ResponseError::new(402, "hello-error", "hello error").into())
        })
        .unwrap();

    router
        .register("foo/generic", AnySchema, |_request| async {
            Err(anyhow::anyhow!("something broke"))
        })
        .unwrap();

    router
        .register("foo/hang", AnySchema, |request| async move {
            request.context().closed().await;
            Ok(())
        })
        .unwrap();

    router
        .register("foo/large", typed::<usize>(), |request| async move {
            request.end(&"x".repeat(*request.data()))?;
            Ok(())
        })
        .unwrap();

    router
        .register("node/getStatus", AnySchema, |request| async move {
            request.end(&serde_json::json!({ "status": "started" }))?;
            Ok(())
        })
        .unwrap();

    router
}

/// Poll `condition` until it holds or the test timeout elapses.
pub async fn eventually(mut condition: impl FnMut() -> bool) {
    let deadline = tokio::time::Instant::now() + TEST_TIMEOUT;
    while !condition() {
        assert!(tokio::time::Instant::now() < deadline, "condition not reached in time");
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}
