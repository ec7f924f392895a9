//! WebSocket upgrade recognition and hand-off.
//!
//! # Responsibilities
//! - Recognize upgrade requests on the registered path
//! - Answer the handshake with `101 Switching Protocols`
//! - Hand the upgraded connection to the application's handler
//!
//! # Data Flow
//! ```text
//! GET /ws (Connection: Upgrade, Upgrade: websocket)
//!     → upgrade layer (after earlier middleware ran)
//!     → handler.upgrade_options(req)
//!     → 101 response, sink closed
//!     → transport completes the HTTP upgrade
//!     → handler.on_open(socket, context) on its own task
//! ```
//!
//! # Design Decisions
//! - Non-upgrade requests fall through to the next layer
//! - The session itself belongs to the handler; nothing here tracks it

use axum::http::header::{CONNECTION, SEC_WEBSOCKET_ACCEPT, SEC_WEBSOCKET_KEY, UPGRADE};
use axum::http::{Extensions, HeaderMap, HeaderValue};
use futures_util::future::BoxFuture;
use hyper::upgrade::Upgraded;
use hyper_util::rt::TokioIo;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio_tungstenite::tungstenite::handshake::derive_accept_key;
use tokio_tungstenite::tungstenite::protocol::Role;
use tokio_tungstenite::WebSocketStream;

use crate::error::HandlerError;
use crate::http::{Request, Response};
use crate::routing::{handler, Middleware, Next, Params};

/// An upgraded websocket connection.
pub type WebSocket = WebSocketStream<TokioIo<Upgraded>>;

/// Extra handshake settings chosen per request.
#[derive(Debug, Clone, Default)]
pub struct UpgradeOptions {
    /// Headers added to the `101` response.
    pub headers: HeaderMap,
}

/// What the session handler learns about the request that opened it.
#[derive(Debug, Clone)]
pub struct SessionContext {
    pub request_id: String,
    pub path: String,
    pub params: Params,
    pub remote_addr: Option<SocketAddr>,
    /// Data attached by middleware that ran before the upgrade.
    pub extensions: Extensions,
}

/// Application hook receiving upgraded connections.
pub trait WebSocketHandler: Send + Sync + 'static {
    /// Options for the handshake response. Runs during dispatch.
    fn upgrade_options<'a>(&'a self, _req: &'a Request) -> BoxFuture<'a, UpgradeOptions> {
        Box::pin(async { UpgradeOptions::default() })
    }

    /// Take ownership of an upgraded connection.
    fn on_open(&self, socket: WebSocket, ctx: SessionContext) -> BoxFuture<'static, ()>;
}

#[derive(Debug, thiserror::Error)]
enum UpgradeError {
    #[error("connection cannot be upgraded")]
    Unavailable,
}

/// True if the headers ask for a websocket upgrade.
pub fn is_upgrade_request(headers: &HeaderMap) -> bool {
    let connection_upgrade = headers
        .get_all(CONNECTION)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .flat_map(|v| v.split(','))
        .any(|token| token.trim().eq_ignore_ascii_case("upgrade"));
    let upgrade_websocket = headers
        .get(UPGRADE)
        .and_then(|v| v.to_str().ok())
        .map(|v| v.trim().eq_ignore_ascii_case("websocket"))
        .unwrap_or(false);
    connection_upgrade && upgrade_websocket
}

/// Build the layer answering upgrade requests for `handler`.
pub(crate) fn upgrade_layer(ws: Arc<dyn WebSocketHandler>) -> Middleware {
    handler(move |req, res, next| Box::pin(upgrade(ws.clone(), req, res, next)))
}

async fn upgrade(
    ws: Arc<dyn WebSocketHandler>,
    req: &mut Request,
    res: &Response,
    next: Next,
) -> Result<(), HandlerError> {
    if !is_upgrade_request(req.headers()) {
        next.proceed();
        return Ok(());
    }

    let Some(key) = req.headers().get(SEC_WEBSOCKET_KEY).cloned() else {
        tracing::debug!(request_id = %req.request_id(), "Upgrade request without Sec-WebSocket-Key");
        res.set_status_code(400).set_text_body("Bad Request").close();
        return Ok(());
    };

    let options = ws.upgrade_options(req).await;
    let Some(on_upgrade) = req.take_upgrade() else {
        next.fail(UpgradeError::Unavailable);
        return Ok(());
    };

    let accept = HeaderValue::try_from(derive_accept_key(key.as_bytes()))
        .map_err(|e| HandlerError::msg(format!("invalid accept key: {e}")))?;
    res.set_status_code(101);
    res.insert_header(CONNECTION, HeaderValue::from_static("upgrade"));
    res.insert_header(UPGRADE, HeaderValue::from_static("websocket"));
    res.insert_header(SEC_WEBSOCKET_ACCEPT, accept);
    for (name, value) in options.headers.iter() {
        res.insert_header(name.clone(), value.clone());
    }

    let ctx = SessionContext {
        request_id: req.request_id().to_string(),
        path: req.path().to_string(),
        params: req.params().clone(),
        remote_addr: req.remote_addr(),
        extensions: req.extensions().clone(),
    };
    tokio::spawn(async move {
        match on_upgrade.await {
            Ok(upgraded) => {
                let socket =
                    WebSocketStream::from_raw_socket(TokioIo::new(upgraded), Role::Server, None).await;
                tracing::debug!(request_id = %ctx.request_id, "WebSocket session opened");
                ws.on_open(socket, ctx).await;
            }
            Err(e) => {
                tracing::warn!(request_id = %ctx.request_id, error = %e, "WebSocket upgrade failed");
            }
        }
    });

    res.close();
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn headers(pairs: &[(&'static str, &'static str)]) -> HeaderMap {
        let mut map = HeaderMap::new();
        for (name, value) in pairs {
            map.append(*name, HeaderValue::from_static(*value));
        }
        map
    }

    #[test]
    fn test_recognizes_upgrade() {
        assert!(is_upgrade_request(&headers(&[
            ("connection", "Upgrade"),
            ("upgrade", "websocket"),
        ])));
        assert!(is_upgrade_request(&headers(&[
            ("connection", "keep-alive, Upgrade"),
            ("upgrade", "WebSocket"),
        ])));
    }

    #[test]
    fn test_rejects_plain_requests() {
        assert!(!is_upgrade_request(&headers(&[])));
        assert!(!is_upgrade_request(&headers(&[("connection", "keep-alive")])));
        assert!(!is_upgrade_request(&headers(&[
            ("connection", "Upgrade"),
            ("upgrade", "h2c"),
        ])));
    }
}
