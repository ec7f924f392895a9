//! Shared utilities for integration tests.

#![allow(dead_code)]

use axum::body::Body;
use axum::http::{Method, StatusCode};
use std::net::SocketAddr;
use std::time::Duration;
use switchyard::config::ServerConfig;
use switchyard::lifecycle::Shutdown;
use switchyard::{Application, HttpServer};
use tokio::net::TcpListener;
use tower::ServiceExt;

/// Config tuned for tests: short timeout, loopback bind.
pub fn test_config() -> ServerConfig {
    let mut config = ServerConfig::default();
    config.listener.bind_address = "127.0.0.1:0".to_string();
    config.timeouts.request_secs = 2;
    config
}

/// Drive one request through the fully layered service, without a socket.
pub async fn send(
    server: &HttpServer,
    method: Method,
    uri: &str,
    body: impl Into<Body>,
) -> (StatusCode, String) {
    let request = axum::http::Request::builder()
        .method(method)
        .uri(uri)
        .body(body.into())
        .unwrap();
    let response = server.service().oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    (status, String::from_utf8(bytes.to_vec()).unwrap())
}

/// Serve `app` on an ephemeral loopback port. Trigger the returned
/// coordinator to stop it.
pub async fn start_server(config: ServerConfig, app: Application) -> (SocketAddr, Shutdown) {
    let listener = TcpListener::bind(&config.listener.bind_address).await.unwrap();
    let addr = listener.local_addr().unwrap();
    let shutdown = Shutdown::new();
    let server = HttpServer::new(config, app);
    let server_shutdown = shutdown.clone();

    tokio::spawn(async move {
        let _ = server.run(listener, server_shutdown).await;
    });

    tokio::time::sleep(Duration::from_millis(50)).await;
    (addr, shutdown)
}

/// Client without pooling or proxies so each test sees a fresh connection.
pub fn client() -> reqwest::Client {
    reqwest::Client::builder()
        .pool_max_idle_per_host(0)
        .no_proxy()
        .build()
        .unwrap()
}
