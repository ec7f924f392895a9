//! Top-level application: the root router plus the completion policy.
//!
//! # Responsibilities
//! - Own the root router and the optional websocket hand-off
//! - Run one request through the router
//! - Finalize responses the router left open (404 or 500), exactly once

use std::sync::Arc;
use std::time::Instant;

use crate::http::websocket::{self, WebSocketHandler};
use crate::http::{Request, Response};
use crate::observability::metrics;
use crate::routing::{Dispatch, Router};

/// Errors raised while assembling an application.
#[derive(Debug, thiserror::Error)]
pub enum ApplicationError {
    #[error("websocket handler already registered")]
    WebSocketAlreadyRegistered,
}

/// Default path answered by the websocket hand-off.
pub const DEFAULT_WEBSOCKET_PATH: &str = "/ws";

/// The dispatcher handed to the transport.
#[derive(Clone, Default)]
pub struct Application {
    router: Router,
    websocket: Option<Arc<dyn WebSocketHandler>>,
}

impl std::fmt::Debug for Application {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Application")
            .field("layers", &self.router.layers().len())
            .field("websocket", &self.websocket.is_some())
            .finish()
    }
}

impl Application {
    pub fn new(router: Router) -> Self {
        Self {
            router,
            websocket: None,
        }
    }

    pub fn router(&self) -> &Router {
        &self.router
    }

    /// Enable websocket upgrades on `path` (`/ws` when `None`).
    ///
    /// The upgrade layer is appended after the layers registered so far, so
    /// earlier middleware shapes the request the handler sees.
    pub fn websocket(
        mut self,
        path: Option<&str>,
        handler: impl WebSocketHandler,
    ) -> Result<Self, ApplicationError> {
        if self.websocket.is_some() {
            return Err(ApplicationError::WebSocketAlreadyRegistered);
        }
        let handler: Arc<dyn WebSocketHandler> = Arc::new(handler);
        let path = path.unwrap_or(DEFAULT_WEBSOCKET_PATH);
        tracing::debug!(path, "Registering websocket upgrade route");

        self.router = self.router.get(path, websocket::upgrade_layer(handler.clone()));
        self.websocket = Some(handler);
        Ok(self)
    }

    /// Dispatch one request and make sure the response ends up closed.
    pub async fn handle(&self, req: &mut Request, res: &Response) {
        let start = Instant::now();
        let outcome = self.router.dispatch(req, res).await;
        self.complete(req, res, outcome);
        metrics::record_request(req.method().as_str(), res.status_code(), start);
    }

    fn complete(&self, req: &Request, res: &Response, outcome: Dispatch) {
        match outcome {
            Dispatch::Closed => {
                tracing::debug!(
                    request_id = %req.request_id(),
                    status = res.status_code(),
                    "Response committed by handler"
                );
            }
            Dispatch::Continue(Some(err)) => {
                if res.finalize(500, "Internal Server Error") {
                    tracing::error!(
                        request_id = %req.request_id(),
                        path = %req.original_path(),
                        error = %err,
                        "Unhandled error reached the top of the router"
                    );
                    metrics::record_outcome(metrics::Outcome::Error);
                }
            }
            Dispatch::Continue(None) => {
                if res.finalize(404, "Not Found") {
                    tracing::debug!(
                        request_id = %req.request_id(),
                        method = %req.method(),
                        path = %req.original_path(),
                        "No route matched"
                    );
                    metrics::record_outcome(metrics::Outcome::NotFound);
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::HandlerError;
    use crate::routing::{handler, responder};
    use axum::http::Method;

    #[tokio::test]
    async fn test_unmatched_becomes_not_found() {
        let app = Application::new(Router::new().post("/only", responder(|res, _next| async move {
            res.set_text_body("posted").close();
            Ok(())
        })));
        let mut req = Request::builder().method(Method::GET).uri("/only").build();
        let res = Response::new();

        app.handle(&mut req, &res).await;
        assert!(res.is_closed());
        assert_eq!(res.status_code(), 404);
        assert_eq!(res.body().as_deref(), Some(&b"Not Found"[..]));
    }

    #[tokio::test]
    async fn test_unhandled_error_becomes_internal_error() {
        let app = Application::new(Router::new().middleware(handler(|_req, _res, next| {
            next.fail(HandlerError::msg("nobody handles me"));
            Box::pin(async { Ok(()) })
        })));
        let mut req = Request::builder().uri("/").build();
        let res = Response::new();

        app.handle(&mut req, &res).await;
        assert_eq!(res.status_code(), 500);
        assert_eq!(res.body().as_deref(), Some(&b"Internal Server Error"[..]));
    }

    #[tokio::test]
    async fn test_committed_response_untouched() {
        let app = Application::new(Router::new().get("/", responder(|res, _next| async move {
            res.set_status_code(201).set_text_body("made").close();
            Ok(())
        })));
        let mut req = Request::builder().uri("/").build();
        let res = Response::new();

        app.handle(&mut req, &res).await;
        assert_eq!(res.status_code(), 201);
    }

    #[test]
    fn test_second_websocket_rejected() {
        struct Silent;
        impl WebSocketHandler for Silent {
            fn on_open(&self, _socket: websocket::WebSocket, _ctx: websocket::SessionContext) -> futures_util::future::BoxFuture<'static, ()> {
                Box::pin(async {})
            }
        }

        let app = Application::new(Router::new()).websocket(None, Silent).unwrap();
        assert_eq!(app.router().layers().len(), 1);
        assert!(matches!(
            app.websocket(Some("/other"), Silent),
            Err(ApplicationError::WebSocketAlreadyRegistered)
        ));
    }
}
