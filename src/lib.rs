//! Switchyard: an Express-style routing and middleware dispatch engine
//! on Tokio and Axum.
//!
//! # Architecture Overview
//!
//! ```text
//!     Client Request
//!     ──────────────▶ http::server (axum, request ID, body limit, timeout)
//!                         │
//!                         ▼
//!                     http::application ── completion policy (404 / 500)
//!                         │
//!                         ▼
//!                     routing::Router ── layers in order, nested routers
//!                         │
//!                         ▼
//!                     handlers mutate http::Response, hand control on via Next
//!                         │
//!     Client Response     ▼
//!     ◀────────────── closed response converted to the wire format
//! ```

// Core subsystems
pub mod error;
pub mod http;
pub mod routing;

// Cross-cutting concerns
pub mod config;
pub mod lifecycle;
pub mod observability;

pub use config::schema::ServerConfig;
pub use error::{HandlerError, HandlerResult};
pub use http::{Application, HttpServer, Request, Response};
pub use lifecycle::Shutdown;
pub use routing::{error_handler, handler, responder, Middleware, Next, Router};
