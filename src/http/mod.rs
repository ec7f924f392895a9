//! HTTP-facing subsystem.
//!
//! # Data Flow
//! ```text
//! TCP connection
//!     → server.rs (axum, request ID, body limit, tracing)
//!     → request.rs (dispatch context built from the decoded request)
//!     → application.rs (root router, completion policy)
//!     → routing engine walks the layers, mutating response.rs
//!     → closed response converted to the wire format
//!     → websocket.rs hands upgraded connections to the application
//! ```

pub mod application;
pub mod request;
pub mod response;
pub mod server;
pub mod websocket;

pub use application::{Application, ApplicationError};
pub use request::{Params, Request, RequestBuilder, X_REQUEST_ID};
pub use response::{Blob, ListenerId, Response, ResponseError};
pub use server::HttpServer;
pub use websocket::{SessionContext, UpgradeOptions, WebSocket, WebSocketHandler};
