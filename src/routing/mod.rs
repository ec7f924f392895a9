//! Routing and middleware dispatch.
//!
//! # Data Flow
//! ```text
//! Registration (at startup):
//!     path pattern → matcher.rs (compile to anchored regex + param names)
//!     handler      → layer.rs (tag Normal / Error)
//!     → router.rs appends RouteLayer in order
//!
//! Dispatch (per request):
//!     router.rs walks layers in order
//!     → method + matcher filter
//!     → path / cursor / params rewritten for the layer's turn
//!     → handler runs until next.rs continuation or response close
//!     → view restored, pending error kept
//!     → nested routers repeat the walk on the remaining path
//! ```
//!
//! # Design Decisions
//! - Layers are append-only and read-only during dispatch
//! - All matching layers run, in registration order
//! - Exactly one handler holds control per request at a time

pub mod layer;
pub mod matcher;
pub mod next;
pub mod router;

pub use crate::http::request::Params;
pub use layer::{
    error_handler, handler, responder, ErrorHandler, Handler, IntoMiddleware, Middleware,
    RouteLayer,
};
pub use matcher::{PathMatch, PathMatcher, PathPattern};
pub use next::Next;
pub use router::{Dispatch, Router};
