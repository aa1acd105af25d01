//! Client behaviour over the in-process and IPC adapters.

mod common;

use std::net::SocketAddr;
use std::time::Duration;

use futures::{SinkExt, StreamExt};
use ironfish_rpc::error::ConnectionError;
use ironfish_rpc::protocol::{Frame, FrameCodec, FrameType, codec};
use ironfish_rpc::{
    ClientConfig, Error, MemoryAdapter, RequestError, RpcAdapter, RpcClient, RpcResponse, Value,
};
use tokio::io::{AsyncWriteExt, DuplexStream};
use tokio::time::timeout;
use tokio_util::codec::Framed;

use common::{TEST_TIMEOUT, eventually, ephemeral, init_tracing, test_router};

async fn memory_adapter() -> MemoryAdapter {
    init_tracing();
    let adapter = MemoryAdapter::new(test_router(), ephemeral());
    adapter.start().await.unwrap();
    adapter
}

#[tokio::test]
async fn test_memory_adapter_round_trip() {
    let adapter = memory_adapter().await;
    let client = adapter.connect(ClientConfig::default()).unwrap();

    let response: RpcResponse<String> = client.request("foo/bar", "in process").unwrap();
    let value = timeout(TEST_TIMEOUT, response.wait_for_end()).await.unwrap();
    assert_eq!(value, Ok(Some("in process".to_string())));
    assert_eq!(adapter.active_sessions(), 1);

    client.close().await;
    eventually(|| adapter.active_sessions() == 0).await;
    adapter.stop().await.unwrap();
}

#[tokio::test]
async fn test_memory_adapter_requires_start() {
    init_tracing();
    let adapter = MemoryAdapter::new(test_router(), ephemeral());

    assert!(matches!(
        adapter.connect(ClientConfig::default()),
        Err(Error::NotStarted)
    ));
}

const OVERSIZED: usize = 11 * 1024 * 1024;

#[tokio::test]
async fn test_oversized_request_is_rejected_before_sending() {
    let adapter = memory_adapter().await;
    let client = adapter.connect(ClientConfig::default()).unwrap();

    let body = "x".repeat(OVERSIZED);
    let err = client.request::<String, Value, _>("foo/bar", &body).unwrap_err();
    assert!(matches!(err, Error::PayloadTooLarge { size, .. } if size > OVERSIZED));
    assert_eq!(client.pending_requests(), 0);

    // The connection is unaffected
    let response: RpcResponse<String> = client.request("foo/bar", "after").unwrap();
    let value = timeout(TEST_TIMEOUT, response.wait_for_end()).await.unwrap();
    assert_eq!(value, Ok(Some("after".to_string())));

    client.close().await;
    adapter.stop().await.unwrap();
}

#[tokio::test]
async fn test_oversized_response_fails_request() {
    let adapter = memory_adapter().await;
    let client = adapter.connect(ClientConfig::default()).unwrap();

    let response: RpcResponse<String> = client.request("foo/large", &OVERSIZED).unwrap();
    let err = timeout(TEST_TIMEOUT, response.wait_for_end())
        .await
        .unwrap()
        .unwrap_err();
    assert_eq!(err.status(), Some(500));
    assert_eq!(err.code(), Some("ERROR"));
    assert_eq!(err.code_message(), Some("response too large"));
    assert_eq!(client.pending_requests(), 0);

    let small: RpcResponse<String> = client.request("foo/large", &3usize).unwrap();
    let value = timeout(TEST_TIMEOUT, small.wait_for_end()).await.unwrap();
    assert_eq!(value, Ok(Some("xxx".to_string())));

    client.close().await;
    adapter.stop().await.unwrap();
}

/// A client wired to a hand-driven server end.
fn raw_peer() -> (RpcClient, Framed<DuplexStream, FrameCodec>) {
    init_tracing();
    let (client_io, server_io) = tokio::io::duplex(64 * 1024);
    let client = RpcClient::from_stream(client_io, ClientConfig::default());
    (client, Framed::new(server_io, FrameCodec::new()))
}

async fn read_request(peer: &mut Framed<DuplexStream, FrameCodec>) -> Frame {
    let frame = timeout(TEST_TIMEOUT, peer.next())
        .await
        .unwrap()
        .unwrap()
        .unwrap();
    assert_eq!(frame.frame_type, FrameType::Request);
    frame
}

#[tokio::test]
async fn test_malformed_frame_rejects_pending_requests() {
    let (client, mut peer) = raw_peer();

    let first: RpcResponse = client.request_without_body("foo/hang").unwrap();
    let second: RpcResponse = client.request_without_body("foo/hang").unwrap();
    read_request(&mut peer).await;
    read_request(&mut peer).await;

    // A header with an unknown frame type
    peer.get_mut().write_all(&[0xff; 16]).await.unwrap();

    let err = timeout(TEST_TIMEOUT, first.wait_for_end()).await.unwrap();
    assert_eq!(err, Err(RequestError::ConnectionClosed));
    assert_eq!(second.wait_for_end().await, Err(RequestError::ConnectionClosed));
    assert!(client.is_closed());
    assert_eq!(client.pending_requests(), 0);
}

#[tokio::test]
async fn test_unexpected_frame_rejects_pending_requests() {
    let (client, mut peer) = raw_peer();

    let response: RpcResponse = client.request_without_body("foo/hang").unwrap();
    let request = read_request(&mut peer).await;

    // Servers never send requests
    peer.send(request).await.unwrap();

    let err = timeout(TEST_TIMEOUT, response.wait_for_end()).await.unwrap();
    assert_eq!(err, Err(RequestError::ConnectionClosed));
    assert!(client.is_closed());
}

#[tokio::test]
async fn test_connection_reset_rejects_pending_requests() {
    let (client, mut peer) = raw_peer();

    let response: RpcResponse<Value, u32> = client.request_without_body("foo/count").unwrap();
    let request = read_request(&mut peer).await;
    let request_id = request.request_id.unwrap();
    let chunk = codec::encode(&1u32).unwrap();
    peer.send(Frame::stream_data(request_id, chunk)).await.unwrap();

    drop(peer);

    let err = timeout(TEST_TIMEOUT, response.wait_for_end()).await.unwrap();
    assert_eq!(err, Err(RequestError::ConnectionClosed));
    assert_eq!(response.content_stream().collect::<Vec<_>>().await, vec![1]);
    assert!(client.is_closed());

    let late: RpcResponse = client.request_without_body("foo/hang").unwrap();
    assert_eq!(late.wait_for_end().await, Err(RequestError::ConnectionClosed));
}

#[tokio::test]
async fn test_close_rejects_pending_requests() {
    let adapter = memory_adapter().await;
    let client = adapter.connect(ClientConfig::default()).unwrap();

    let first: RpcResponse = client.request_without_body("foo/hang").unwrap();
    let second: RpcResponse = client.request_without_body("foo/hang").unwrap();
    assert_eq!(client.pending_requests(), 2);

    client.close().await;
    client.close().await;

    assert_eq!(first.wait_for_end().await, Err(RequestError::ConnectionClosed));
    assert_eq!(second.wait_for_end().await, Err(RequestError::ConnectionClosed));
    assert_eq!(client.pending_requests(), 0);
    assert!(client.is_closed());

    // Requests on a closed client are rejected up front
    let late: RpcResponse = client.request_without_body("foo/hang").unwrap();
    assert_eq!(late.wait_for_end().await, Err(RequestError::ConnectionClosed));

    adapter.stop().await.unwrap();
}

#[tokio::test]
async fn test_chunks_remain_readable_after_completion() {
    let adapter = memory_adapter().await;
    let client = adapter.connect(ClientConfig::default()).unwrap();

    let response: RpcResponse<u32, u32> = client.request("foo/count", &3u32).unwrap();
    timeout(TEST_TIMEOUT, response.wait_for_end()).await.unwrap().unwrap();

    let chunks: Vec<u32> = response.content_stream().collect().await;
    assert_eq!(chunks, vec![0, 1, 2]);

    let hanging: RpcResponse<Value, u32> = client.request_without_body("foo/hang").unwrap();
    client.close().await;
    assert!(hanging.content_stream().collect::<Vec<_>>().await.is_empty());
    assert!(hanging.wait_for_end().await.is_err());

    adapter.stop().await.unwrap();
}

#[tokio::test]
async fn test_caller_chosen_request_ids() {
    let adapter = memory_adapter().await;
    let client = adapter.connect(ClientConfig::default()).unwrap();

    let held: RpcResponse = client
        .request_with_id::<Value, Value, ()>(1, "foo/hang", None)
        .unwrap();
    assert_eq!(held.request_id(), 1);

    let err = client
        .request_with_id::<Value, Value, str>(1, "foo/bar", Some("again"))
        .unwrap_err();
    assert!(matches!(err, Error::DuplicateRequestId(1)));

    // Automatic ids skip the one in use
    let next: RpcResponse<String> = client.request("foo/bar", "next").unwrap();
    assert_ne!(next.request_id(), 1);
    let value = timeout(TEST_TIMEOUT, next.wait_for_end()).await.unwrap();
    assert_eq!(value, Ok(Some("next".to_string())));

    client.close().await;
    adapter.stop().await.unwrap();
}

#[tokio::test]
async fn test_adapter_stop_closes_clients() {
    let adapter = memory_adapter().await;
    let client = adapter.connect(ClientConfig::default()).unwrap();
    let response: RpcResponse = client.request_without_body("foo/hang").unwrap();
    eventually(|| adapter.active_sessions() == 1).await;

    adapter.stop().await.unwrap();

    let err = timeout(TEST_TIMEOUT, response.wait_for_end())
        .await
        .unwrap()
        .unwrap_err();
    assert!(
        err.code() == Some("CONNECTION_RESET") || err == RequestError::ConnectionClosed,
        "unexpected error: {err}"
    );
    eventually(|| client.is_closed()).await;
}

#[tokio::test]
async fn test_unreachable_peer() {
    init_tracing();
    // Bind then drop to get a port nobody listens on
    let addr: SocketAddr = {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        listener.local_addr().unwrap()
    };

    let config = ClientConfig {
        connect_timeout: Duration::from_secs(2),
        ..ClientConfig::default()
    };
    let err = RpcClient::connect_tcp(addr, config).await.unwrap_err();

    assert!(matches!(
        err,
        Error::Connection(ConnectionError::ConnectFailed { addr: failed, .. }) if failed == addr
    ));
}

#[tokio::test]
async fn test_builder_requires_target() {
    let err = RpcClient::builder().connect().await.unwrap_err();
    assert!(matches!(err, Error::Config(_)));
}

#[cfg(unix)]
#[tokio::test]
async fn test_ipc_adapter() {
    use ironfish_rpc::{AdapterConfig, IpcAdapter};

    init_tracing();
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("node.ipc");
    // A stale socket file from a previous run is replaced
    std::fs::write(&path, b"stale").unwrap();

    let adapter = IpcAdapter::new(
        test_router(),
        AdapterConfig {
            ipc_path: path.clone(),
            ..AdapterConfig::default()
        },
    );
    adapter.start().await.unwrap();

    let client = RpcClient::connect_ipc(&path, ClientConfig::default())
        .await
        .unwrap();
    let response: RpcResponse<Value, String> = client.request("foo/baz", "over ipc").unwrap();
    let chunks: Vec<String> = timeout(TEST_TIMEOUT, response.content_stream().collect())
        .await
        .unwrap();
    assert_eq!(chunks, vec!["over ipc".to_string()]);
    assert_eq!(response.wait_for_end().await, Ok(None));

    client.close().await;
    adapter.stop().await.unwrap();
    assert!(!path.exists());
}
