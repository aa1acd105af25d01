//! Simple echo server/client example.
//!
//! Starts a TCP adapter on an ephemeral port with a unary and a streaming
//! route, then calls both with a client.
//!
//! ```text
//! RUST_LOG=debug cargo run -p ironfish-rpc --example simple_echo
//! ```

use std::sync::Arc;

use futures::StreamExt;
use ironfish_rpc::schema::{object, string};
use ironfish_rpc::{
    AdapterConfig, ClientConfig, Result, RpcAdapter, RpcClient, RpcResponse, Router, TcpAdapter,
    Value,
};
use tracing::info;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let router = Arc::new(Router::new());

    router.register("node/echo", string().defined(), |request| async move {
        request.end(request.data())?;
        Ok(())
    })?;

    router.register(
        "node/repeat",
        object().required_field("message").required_field("times"),
        |request| async move {
            let message = request.data()["message"].clone();
            let times = request.data()["times"].as_u64().unwrap_or(0);
            for _ in 0..times {
                request.stream(&message)?;
            }
            request.end_empty()?;
            Ok(())
        },
    )?;

    let adapter = TcpAdapter::new(
        Arc::clone(&router),
        AdapterConfig {
            port: 0,
            ..AdapterConfig::default()
        },
    );
    adapter.start().await?;

    let Some(addr) = adapter.local_addr() else {
        return Err(ironfish_rpc::Error::NotStarted);
    };
    info!("Echo server listening on {addr}");

    let client = RpcClient::connect_tcp(addr, ClientConfig::default()).await?;

    let echo: RpcResponse<String> = client.request("node/echo", "Hello, RPC!")?;
    match echo.wait_for_end().await {
        Ok(value) => info!("node/echo returned {value:?}"),
        Err(e) => info!("node/echo failed: {e}"),
    }

    let repeat: RpcResponse<Value, String> = client.request(
        "node/repeat",
        &serde_json::json!({ "message": "tick", "times": 3 }),
    )?;
    let mut chunks = Box::pin(repeat.content_stream());
    while let Some(chunk) = chunks.next().await {
        info!("node/repeat streamed {chunk}");
    }

    client.close().await;
    adapter.stop().await?;
    Ok(())
}
