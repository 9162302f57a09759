//! Tests for the proxy module against an in-process target server.

use super::*;
use crate::broadcaster::Broadcaster;
use crate::capture::CaptureStore;
use crate::config::InspectorConfig;
use crate::error::ForwardError;
use http_body_util::{BodyExt, Full};
use hyper::body::{Bytes, Incoming};
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper::{Request, Response, StatusCode};
use hyper_util::rt::TokioIo;
use std::collections::BTreeMap;
use std::convert::Infallible;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};

async fn target_handler(req: Request<Incoming>) -> Result<Response<Full<Bytes>>, Infallible> {
    let (parts, body) = req.into_parts();
    let body = body
        .collect()
        .await
        .map(|collected| collected.to_bytes())
        .unwrap_or_default();

    let response = match parts.uri.path() {
        "/" => Response::new(Full::new(Bytes::from_static(b"hello"))),
        "/echo" => Response::builder()
            .status(StatusCode::CREATED)
            .header("x-echo-method", parts.method.as_str())
            .header("keep-alive", "timeout=5")
            .body(Full::new(body))
            .unwrap(),
        "/headers" => {
            let names: BTreeMap<String, String> = parts
                .headers
                .iter()
                .map(|(k, v)| (k.to_string(), v.to_str().unwrap_or("").to_string()))
                .collect();
            Response::new(Full::new(Bytes::from(
                serde_json::to_vec(&names).unwrap(),
            )))
        }
        "/hang" => {
            tokio::time::sleep(Duration::from_secs(5)).await;
            Response::new(Full::new(Bytes::from_static(b"late")))
        }
        _ => Response::builder()
            .status(StatusCode::NOT_FOUND)
            .body(Full::new(Bytes::new()))
            .unwrap(),
    };
    Ok(response)
}

async fn spawn_target() -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        while let Ok((stream, _)) = listener.accept().await {
            tokio::spawn(async move {
                let _ = http1::Builder::new()
                    .serve_connection(TokioIo::new(stream), service_fn(target_handler))
                    .await;
            });
        }
    });
    addr
}

fn closed_port() -> u16 {
    let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    listener.local_addr().unwrap().port()
}

fn config_for(port: u16) -> InspectorConfig {
    let mut config = InspectorConfig::for_target_port(port);
    config.readiness.health_interval_ms = 10;
    config.readiness.warmup_backoff_ms = 10;
    config.readiness.warmup_timeout_ms = 500;
    config
}

fn engine_for(config: &InspectorConfig) -> ForwardingEngine {
    ForwardingEngine::new(
        config,
        Arc::new(CaptureStore::new(config.capture.effective_capacity())),
        Broadcaster::new(config.capture.subscriber_capacity),
    )
}

async fn body_of(response: Response<Full<Bytes>>) -> Bytes {
    response.into_body().collect().await.unwrap().to_bytes()
}

#[tokio::test]
async fn test_forward_preserves_status_headers_and_body() {
    let target = spawn_target().await;
    let engine = engine_for(&config_for(target.port()));

    let req = Request::builder()
        .method("PUT")
        .uri("/echo?verbose=1")
        .header("x-request-id", "r-1")
        .body(Bytes::from_static(b"payload"))
        .unwrap();
    let response = engine.forward(req).await.unwrap();

    assert_eq!(response.status(), StatusCode::CREATED);
    assert_eq!(response.headers().get("x-echo-method").unwrap(), "PUT");
    assert!(response.headers().get("keep-alive").is_none());
    assert_eq!(&body_of(response).await[..], b"payload");

    let captured = engine.store().snapshot();
    assert_eq!(captured.len(), 1);
    let exchange = &captured[0];
    assert_eq!(exchange.method, "PUT");
    assert_eq!(exchange.path, "/echo");
    assert_eq!(exchange.query.as_deref(), Some("verbose=1"));
    assert_eq!(exchange.status, 201);
    assert_eq!(exchange.request_headers.get("x-request-id").unwrap(), "r-1");
    assert_eq!(
        exchange.response_headers.get("x-echo-method").unwrap(),
        "PUT"
    );
    assert_eq!(&exchange.request_body[..], b"payload");
    assert_eq!(&exchange.response_body[..], b"payload");
    assert_eq!(exchange.bytes_in, 7);
    assert_eq!(exchange.bytes_out, 7);
}

#[tokio::test]
async fn test_hop_by_hop_headers_not_forwarded() {
    let target = spawn_target().await;
    let engine = engine_for(&config_for(target.port()));

    let req = Request::builder()
        .uri("/headers")
        .header("connection", "x-private")
        .header("x-private", "secret")
        .header("proxy-authorization", "Basic Zm9vOmJhcg==")
        .header("x-public", "visible")
        .body(Bytes::new())
        .unwrap();
    let response = engine.forward(req).await.unwrap();
    let received: BTreeMap<String, String> =
        serde_json::from_slice(&body_of(response).await).unwrap();

    assert_eq!(received.get("x-public").map(String::as_str), Some("visible"));
    assert!(!received.contains_key("x-private"));
    assert!(!received.contains_key("proxy-authorization"));

    // Captured request headers are recorded as received.
    let exchange = &engine.store().snapshot()[0];
    assert_eq!(exchange.request_headers.get("x-private").unwrap(), "secret");
}

#[tokio::test]
async fn test_warm_up_requests_are_forwarded_but_not_captured() {
    let target = spawn_target().await;
    let engine = engine_for(&config_for(target.port()));
    let mut subscription = engine.broadcaster().subscribe();

    let req = Request::builder()
        .uri("/")
        .header(X_LROK_WARMUP.clone(), engine.warmup_token())
        .body(Bytes::new())
        .unwrap();
    let response = engine.forward(req).await.unwrap();

    assert_eq!(&body_of(response).await[..], b"hello");
    assert!(engine.store().is_empty());
    assert_eq!(engine.store().stats().exchanges, 0);
    assert!(subscription.try_recv().is_err());
}

#[tokio::test]
async fn test_capture_body_cap_truncates_record_only() {
    let target = spawn_target().await;
    let mut config = config_for(target.port());
    config.capture.max_body_bytes = Some(4);
    let engine = engine_for(&config);

    let req = Request::builder()
        .method("POST")
        .uri("/echo")
        .body(Bytes::from_static(b"0123456789"))
        .unwrap();
    let response = engine.forward(req).await.unwrap();
    assert_eq!(&body_of(response).await[..], b"0123456789");

    let exchange = &engine.store().snapshot()[0];
    assert_eq!(&exchange.request_body[..], b"0123");
    assert_eq!(&exchange.response_body[..], b"0123");
    assert!(exchange.request_body_truncated);
    assert!(exchange.response_body_truncated);
    assert_eq!(exchange.bytes_in, 10);
    assert_eq!(exchange.bytes_out, 10);
}

#[tokio::test]
async fn test_unreachable_target_is_not_captured() {
    let engine = engine_for(&config_for(closed_port()));
    let mut subscription = engine.broadcaster().subscribe();

    let req = Request::builder().uri("/").body(Bytes::new()).unwrap();
    let err = engine.forward(req).await.unwrap_err();

    assert!(matches!(err, ForwardError::Upstream(_)));
    assert_eq!(err.status(), StatusCode::BAD_GATEWAY);
    assert!(engine.store().is_empty());
    assert!(subscription.try_recv().is_err());
}

#[tokio::test]
async fn test_upstream_timeout_is_gateway_timeout() {
    let target = spawn_target().await;
    let mut config = config_for(target.port());
    config.target.timeout_secs = 1;
    let engine = engine_for(&config);

    let req = Request::builder().uri("/hang").body(Bytes::new()).unwrap();
    let err = engine.forward(req).await.unwrap_err();

    assert!(matches!(err, ForwardError::UpstreamTimeout(_)));
    assert_eq!(err.status(), StatusCode::GATEWAY_TIMEOUT);
    assert!(engine.store().is_empty());
}

#[tokio::test]
async fn test_captured_exchange_is_broadcast() {
    let target = spawn_target().await;
    let engine = engine_for(&config_for(target.port()));
    let mut subscription = engine.broadcaster().subscribe();

    let req = Request::builder().uri("/").body(Bytes::new()).unwrap();
    engine.forward(req).await.unwrap();

    let exchange = subscription.try_recv().unwrap();
    assert_eq!(exchange.path, "/");
    assert_eq!(&exchange.response_body[..], b"hello");
    assert_eq!(engine.store().snapshot()[0].id, exchange.id);
}

#[tokio::test]
async fn test_server_start_serves_liveness_without_capture() {
    let target = spawn_target().await;
    let handle = ProxyServer::new(config_for(target.port()))
        .start()
        .await
        .unwrap();

    // Warm-up traffic went through the proxy but left no history.
    assert!(handle.query().snapshot().is_empty());

    let client = reqwest::Client::builder().no_proxy().build().unwrap();
    let url = format!("http://127.0.0.1:{}{}", handle.port(), LIVENESS_PATH);
    let response = client.get(&url).send().await.unwrap();
    assert_eq!(response.status(), 200);
    assert_eq!(response.text().await.unwrap(), "OK");
    assert!(handle.query().snapshot().is_empty());

    handle.shutdown().await;
}

#[tokio::test]
async fn test_shutdown_stops_accepting() {
    let target = spawn_target().await;
    let handle = ProxyServer::new(config_for(target.port()))
        .start()
        .await
        .unwrap();
    let port = handle.port();
    handle.shutdown().await;

    let client = reqwest::Client::builder()
        .no_proxy()
        .timeout(Duration::from_secs(2))
        .build()
        .unwrap();
    let result = client
        .get(format!("http://127.0.0.1:{port}{LIVENESS_PATH}"))
        .send()
        .await;
    assert!(result.is_err());
}

#[tokio::test]
async fn test_shutdown_ends_live_streams() {
    let target = spawn_target().await;
    let handle = ProxyServer::new(config_for(target.port()))
        .start()
        .await
        .unwrap();
    let mut stream = handle.query().stream();

    handle.shutdown().await;
    assert!(stream.next_exchange().await.is_none());
}

#[tokio::test]
async fn test_client_sent_warmup_header_is_still_captured() {
    let target = spawn_target().await;
    let engine = engine_for(&config_for(target.port()));

    let req = Request::builder()
        .method("POST")
        .uri("/echo")
        .header(X_LROK_WARMUP.clone(), "true")
        .body(Bytes::from_static(b"user-payload"))
        .unwrap();
    let response = engine.forward(req).await.unwrap();
    assert_eq!(&body_of(response).await[..], b"user-payload");

    let captured = engine.store().snapshot();
    assert_eq!(captured.len(), 1);
    assert_eq!(&captured[0].request_body[..], b"user-payload");
    assert_eq!(captured[0].request_headers.get("x-lrok-warmup").unwrap(), "true");
    assert_eq!(engine.store().stats().bytes_in, 12);
}

#[tokio::test]
async fn test_warmup_marker_is_not_relayed_to_target() {
    let target = spawn_target().await;
    let handle = ProxyServer::new(config_for(target.port()))
        .start()
        .await
        .unwrap();

    let client = reqwest::Client::builder().no_proxy().build().unwrap();
    let response = client
        .get(format!("http://127.0.0.1:{}/headers", handle.port()))
        .header("x-lrok-warmup", "true")
        .send()
        .await
        .unwrap();
    let seen: BTreeMap<String, String> = response.json().await.unwrap();

    assert!(!seen.contains_key("x-lrok-warmup"));
    let captured = handle.query().snapshot();
    assert_eq!(captured.len(), 1);
    assert_eq!(captured[0].path, "/headers");
}

async fn start_with_listen_timeouts(read_secs: u64, idle_secs: u64) -> (ProxyHandle, u16) {
    let target = spawn_target().await;
    let mut config = config_for(target.port());
    config.listen.read_timeout_secs = read_secs;
    config.listen.idle_timeout_secs = idle_secs;
    let handle = ProxyServer::new(config).start().await.unwrap();
    let port = handle.port();
    (handle, port)
}

/// Read until the peer closes the connection.
async fn read_to_close(stream: &mut TcpStream) -> String {
    let mut received = Vec::new();
    let mut buf = [0u8; 1024];
    loop {
        match stream.read(&mut buf).await {
            Ok(0) | Err(_) => break,
            Ok(n) => received.extend_from_slice(&buf[..n]),
        }
    }
    String::from_utf8_lossy(&received).into_owned()
}

#[tokio::test]
async fn test_slow_request_body_gets_request_timeout() {
    let (handle, port) = start_with_listen_timeouts(1, 120).await;

    let mut stream = TcpStream::connect(("127.0.0.1", port)).await.unwrap();
    stream
        .write_all(b"POST /echo HTTP/1.1\r\nhost: localhost\r\ncontent-length: 10\r\n\r\nabc")
        .await
        .unwrap();

    let mut buf = [0u8; 1024];
    let n = tokio::time::timeout(Duration::from_secs(5), stream.read(&mut buf))
        .await
        .unwrap()
        .unwrap();
    let response = String::from_utf8_lossy(&buf[..n]);

    assert!(response.starts_with("HTTP/1.1 408"), "{response}");
    assert!(handle.query().snapshot().is_empty());
    assert_eq!(handle.query().stats().exchanges, 0);
}

#[tokio::test]
async fn test_incomplete_headers_close_connection() {
    let (handle, port) = start_with_listen_timeouts(1, 120).await;

    let mut stream = TcpStream::connect(("127.0.0.1", port)).await.unwrap();
    stream
        .write_all(b"GET / HTTP/1.1\r\nhost: localhost\r\n")
        .await
        .unwrap();

    let received = tokio::time::timeout(Duration::from_secs(5), read_to_close(&mut stream))
        .await
        .unwrap();
    assert!(!received.contains("200 OK"), "{received}");
    assert!(handle.query().snapshot().is_empty());
}

#[tokio::test]
async fn test_idle_keep_alive_connection_is_closed() {
    let (handle, port) = start_with_listen_timeouts(30, 1).await;

    let mut stream = TcpStream::connect(("127.0.0.1", port)).await.unwrap();
    stream
        .write_all(b"GET / HTTP/1.1\r\nhost: localhost\r\n\r\n")
        .await
        .unwrap();

    let mut received = String::new();
    let mut buf = [0u8; 1024];
    while !received.contains("hello") {
        let n = tokio::time::timeout(Duration::from_secs(5), stream.read(&mut buf))
            .await
            .unwrap()
            .unwrap();
        assert_ne!(n, 0, "closed before the response: {received}");
        received.push_str(&String::from_utf8_lossy(&buf[..n]));
    }
    assert!(received.starts_with("HTTP/1.1 200"));
    let answered = std::time::Instant::now();

    let rest = tokio::time::timeout(Duration::from_secs(5), read_to_close(&mut stream))
        .await
        .unwrap();
    assert!(rest.is_empty());
    assert!(answered.elapsed() >= Duration::from_millis(800));
    assert_eq!(handle.query().snapshot().len(), 1);
}
