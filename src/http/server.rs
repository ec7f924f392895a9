//! HTTP server setup and configuration.
//!
//! # Responsibilities
//! - Create the Axum router that feeds every request to the application
//! - Wire up middleware (tracing, request ID, body limit)
//! - Buffer the body and build the dispatch context
//! - Enforce the request timeout by aborting the response
//! - Bind server to listener and shut down gracefully
//!
//! # Design Decisions
//! - A single fallback route: path matching belongs to the routing engine
//! - The timeout wraps dispatch only; a timed-out request still gets a
//!   complete 500 reply rather than a dropped connection

use axum::{
    extract::State,
    http::StatusCode,
    response::IntoResponse,
    Router,
};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::net::TcpListener;
use tower::ServiceBuilder;
use tower_http::{
    limit::RequestBodyLimitLayer,
    request_id::{MakeRequestUuid, PropagateRequestIdLayer, SetRequestIdLayer},
    trace::TraceLayer,
};

use crate::config::ServerConfig;
use crate::http::{Application, Request, Response};
use crate::lifecycle::Shutdown;
use crate::observability::metrics::{self, Outcome};

/// Errors from running the server.
#[derive(Debug, thiserror::Error)]
pub enum ServerError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// State injected into the transport handler.
#[derive(Clone)]
struct TransportState {
    app: Arc<Application>,
    request_timeout: Duration,
    max_body_bytes: usize,
}

/// HTTP server hosting one application.
pub struct HttpServer {
    router: Router,
    config: ServerConfig,
}

impl HttpServer {
    /// Create a new HTTP server for `app` with the given configuration.
    pub fn new(config: ServerConfig, app: Application) -> Self {
        let state = TransportState {
            app: Arc::new(app),
            request_timeout: Duration::from_secs(config.timeouts.request_secs),
            max_body_bytes: config.limits.max_body_bytes,
        };
        let router = Self::build_router(&config, state);
        Self { router, config }
    }

    /// Build the Axum router with all middleware layers.
    fn build_router(config: &ServerConfig, state: TransportState) -> Router {
        Router::new()
            .fallback(transport_handler)
            .with_state(state)
            .layer(
                ServiceBuilder::new()
                    .layer(SetRequestIdLayer::x_request_id(MakeRequestUuid))
                    .layer(TraceLayer::new_for_http())
                    .layer(PropagateRequestIdLayer::x_request_id())
                    .layer(RequestBodyLimitLayer::new(config.limits.max_body_bytes)),
            )
    }

    /// The fully layered service, for driving requests without a socket.
    pub fn service(&self) -> Router {
        self.router.clone()
    }

    /// Run the server, accepting connections until `shutdown` triggers.
    pub async fn run(self, listener: TcpListener, shutdown: Shutdown) -> Result<(), ServerError> {
        let addr = listener.local_addr()?;
        tracing::info!(
            address = %addr,
            request_timeout_secs = self.config.timeouts.request_secs,
            "HTTP server starting"
        );

        let app = self.router.into_make_service_with_connect_info::<SocketAddr>();
        axum::serve(listener, app)
            .with_graceful_shutdown(async move {
                shutdown.wait().await;
                tracing::info!("Shutdown signal received");
            })
            .await?;

        tracing::info!("HTTP server stopped");
        Ok(())
    }

    /// Get a reference to the config.
    pub fn config(&self) -> &ServerConfig {
        &self.config
    }
}

/// Buffer the request, dispatch it through the application, and reply.
async fn transport_handler(
    State(state): State<TransportState>,
    request: axum::extract::Request,
) -> axum::response::Response {
    let start = Instant::now();
    let (parts, body) = request.into_parts();

    // Declared oversize bodies are refused by the limit layer; this catches
    // streamed ones and clients that vanish mid-body.
    let body = match axum::body::to_bytes(body, state.max_body_bytes).await {
        Ok(bytes) => bytes,
        Err(e) => {
            tracing::debug!(error = %e, "Failed to buffer request body");
            return (StatusCode::PAYLOAD_TOO_LARGE, "Payload Too Large").into_response();
        }
    };

    let mut req = Request::from_parts(parts, body);
    let res = Response::new();

    tracing::debug!(
        request_id = %req.request_id(),
        method = %req.method(),
        path = %req.original_path(),
        "Dispatching request"
    );

    let dispatched = tokio::time::timeout(state.request_timeout, state.app.handle(&mut req, &res)).await;
    if dispatched.is_err() {
        tracing::warn!(
            request_id = %req.request_id(),
            path = %req.original_path(),
            timeout_secs = state.request_timeout.as_secs(),
            "Request timed out during dispatch"
        );
        res.abort("request timed out");
        metrics::record_outcome(Outcome::Timeout);
        metrics::record_request(req.method().as_str(), res.status_code(), start);
    }

    res.into_http()
}
