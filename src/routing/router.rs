//! Route registration and the dispatch loop.
//!
//! # Responsibilities
//! - Append route layers in registration order
//! - Walk matching layers sequentially for each request
//! - Thread path, route cursor and params through nested routers
//! - Gate normal and error handlers on the pending error
//!
//! # Design Decisions
//! - Every matching layer is tried in order, not just the first
//! - A layer's turn ends when its continuation fires or the response closes,
//!   whichever happens first
//! - Path, cursor and params are restored after each turn; the pending error is not
//! - The loop stops the moment the response is closed

use axum::http::Method;
use futures_util::future::BoxFuture;
use futures_util::FutureExt;
use std::any::Any;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;

use crate::error::{HandlerError, HandlerResult};
use crate::http::{Request, Response};
use crate::routing::layer::{Handler, IntoMiddleware, Middleware, RouteLayer};
use crate::routing::matcher::{PathMatcher, PathPattern};
use crate::routing::next::{Next, Resumed};

/// How a router's turn over a request ended.
#[derive(Debug, Clone)]
pub enum Dispatch {
    /// The response was closed; nothing upstream may continue.
    Closed,
    /// All matching layers ran; control returns upward with the pending error, if any.
    Continue(Option<HandlerError>),
}

/// Ordered collection of route layers. Itself a [`Handler`], so it can be
/// mounted inside another router.
#[derive(Debug, Clone, Default)]
pub struct Router {
    layers: Vec<RouteLayer>,
}

impl Router {
    /// Create an empty router.
    pub fn new() -> Self {
        Self::default()
    }

    /// The registered layers in order.
    pub fn layers(&self) -> &[RouteLayer] {
        &self.layers
    }

    /// Global middleware: runs for every path, any method.
    pub fn middleware(self, handlers: impl IntoMiddleware) -> Self {
        self.push(None, PathMatcher::any(), handlers)
    }

    /// Prefix-mounted middleware or sub-router, any method.
    pub fn mount(self, prefix: impl Into<PathPattern>, handlers: impl IntoMiddleware) -> Self {
        self.push(None, PathMatcher::compile(prefix, false), handlers)
    }

    /// Full-path route for one method.
    pub fn route(
        self,
        method: Method,
        path: impl Into<PathPattern>,
        handlers: impl IntoMiddleware,
    ) -> Self {
        self.push(Some(method), PathMatcher::compile(path, true), handlers)
    }

    /// Full-path route for any method.
    pub fn all(self, path: impl Into<PathPattern>, handlers: impl IntoMiddleware) -> Self {
        self.push(None, PathMatcher::compile(path, true), handlers)
    }

    pub fn get(self, path: impl Into<PathPattern>, handlers: impl IntoMiddleware) -> Self {
        self.route(Method::GET, path, handlers)
    }

    pub fn post(self, path: impl Into<PathPattern>, handlers: impl IntoMiddleware) -> Self {
        self.route(Method::POST, path, handlers)
    }

    pub fn put(self, path: impl Into<PathPattern>, handlers: impl IntoMiddleware) -> Self {
        self.route(Method::PUT, path, handlers)
    }

    pub fn patch(self, path: impl Into<PathPattern>, handlers: impl IntoMiddleware) -> Self {
        self.route(Method::PATCH, path, handlers)
    }

    pub fn delete(self, path: impl Into<PathPattern>, handlers: impl IntoMiddleware) -> Self {
        self.route(Method::DELETE, path, handlers)
    }

    pub fn options(self, path: impl Into<PathPattern>, handlers: impl IntoMiddleware) -> Self {
        self.route(Method::OPTIONS, path, handlers)
    }

    pub fn head(self, path: impl Into<PathPattern>, handlers: impl IntoMiddleware) -> Self {
        self.route(Method::HEAD, path, handlers)
    }

    pub fn connect(self, path: impl Into<PathPattern>, handlers: impl IntoMiddleware) -> Self {
        self.route(Method::CONNECT, path, handlers)
    }

    pub fn trace(self, path: impl Into<PathPattern>, handlers: impl IntoMiddleware) -> Self {
        self.route(Method::TRACE, path, handlers)
    }

    fn push(mut self, method: Option<Method>, matcher: PathMatcher, handlers: impl IntoMiddleware) -> Self {
        let matcher = Arc::new(matcher);
        for handler in handlers.into_middleware() {
            tracing::trace!(
                method = ?method,
                pattern = %matcher.as_regex(),
                error_handler = handler.is_error_handler(),
                "Registering layer"
            );
            self.layers
                .push(RouteLayer::new(method.clone(), matcher.clone(), handler));
        }
        self
    }

    /// Run this router's layers over the request.
    ///
    /// Returns [`Dispatch::Closed`] if the response was closed during the
    /// walk, otherwise the pending error to hand back to the caller.
    pub async fn dispatch(&self, req: &mut Request, res: &Response) -> Dispatch {
        if self.layers.is_empty() {
            return Dispatch::Continue(req.error.clone());
        }

        let prev_params = req.params.clone();
        let prev_path = req.path.clone();
        let route_path = req.route_cursor.clone();

        for layer in &self.layers {
            if !layer.accepts(&req.method) {
                continue;
            }
            let Some(found) = layer.matches(&route_path) else {
                continue;
            };

            let rest = &route_path[found.end..];
            let next_route_path = if rest.starts_with('/') {
                rest.to_string()
            } else {
                format!("/{rest}")
            };

            req.path = route_path.clone();
            req.route_cursor = next_route_path;
            let mut params = prev_params.clone();
            for (name, value) in found.params {
                params.insert(name.to_string(), value);
            }
            req.params = params;

            match (layer.handler(), req.error.clone()) {
                (Middleware::Error(handler), Some(err)) => {
                    tracing::trace!(path = %req.path, error = %err, "Invoking error handler");
                    let outcome = run_turn(req, res, |req, next| handler.call(err, req, res, next)).await;
                    settle(req, outcome);
                }
                (Middleware::Normal(handler), None) => {
                    tracing::trace!(path = %req.path, "Invoking handler");
                    let outcome = run_turn(req, res, |req, next| handler.call(req, res, next)).await;
                    settle(req, outcome);
                }
                // Normal handlers are passed over while an error is pending,
                // leaving it unchanged.
                (Middleware::Normal(_), Some(_)) => {}
                // Error handlers are inert on the happy path.
                (Middleware::Error(_), None) => req.error = None,
            }

            req.path = prev_path.clone();
            req.route_cursor = route_path.clone();
            req.params = prev_params.clone();

            if res.is_closed() {
                break;
            }
        }

        if res.is_closed() {
            Dispatch::Closed
        } else {
            Dispatch::Continue(req.error.clone())
        }
    }
}

impl Handler for Router {
    fn call<'a>(
        &'a self,
        req: &'a mut Request,
        res: &'a Response,
        next: Next,
    ) -> BoxFuture<'a, HandlerResult> {
        Box::pin(async move {
            match self.dispatch(req, res).await {
                // The chain ended in a committed response; do not resume the caller.
                Dispatch::Closed => drop(next),
                Dispatch::Continue(err) => next.resume(err),
            }
            Ok(())
        })
    }
}

impl IntoMiddleware for Router {
    fn into_middleware(self) -> Vec<Middleware> {
        vec![Middleware::Normal(Arc::new(self))]
    }
}

impl From<Router> for Middleware {
    fn from(router: Router) -> Self {
        Middleware::Normal(Arc::new(router))
    }
}

/// How a single layer's turn ended.
enum Turn {
    /// The response closed first.
    Closed,
    /// The continuation fired first (or the handler failed), with this error.
    Resumed(Option<HandlerError>),
}

/// Run one handler until its continuation fires or the response closes.
///
/// A returned `Err` or a panic counts as a continuation carrying that error,
/// unless the continuation already fired. Once the turn ends the handler's
/// future is dropped.
async fn run_turn<'r, F>(req: &'r mut Request, res: &Response, invoke: F) -> Turn
where
    F: FnOnce(&'r mut Request, Next) -> BoxFuture<'r, HandlerResult>,
{
    let (next, mut resumed) = Next::channel();
    let invocation = match panic::catch_unwind(AssertUnwindSafe(|| invoke(req, next))) {
        Ok(fut) => AssertUnwindSafe(fut).catch_unwind(),
        Err(payload) => return fault(&mut resumed, Err(payload)),
    };
    tokio::pin!(invocation);
    let closed = res.closed();
    tokio::pin!(closed);

    let mut returned = false;
    let mut abandoned = false;
    loop {
        tokio::select! {
            biased;
            _ = &mut closed => return Turn::Closed,
            signal = &mut resumed, if !abandoned => match signal {
                Ok(err) => return Turn::Resumed(err),
                Err(_) => {
                    abandoned = true;
                    if returned && !res.is_closed() {
                        stalled();
                    }
                }
            },
            outcome = &mut invocation, if !returned => {
                returned = true;
                if !matches!(outcome, Ok(Ok(()))) {
                    return fault(&mut resumed, outcome);
                }
                if abandoned && !res.is_closed() {
                    stalled();
                }
            }
        }
    }
}

/// Convert a failed invocation into the turn's outcome. A continuation that
/// fired before the failure was observed still wins.
fn fault(resumed: &mut Resumed, outcome: Result<HandlerResult, Box<dyn Any + Send>>) -> Turn {
    if let Ok(signal) = resumed.try_recv() {
        return Turn::Resumed(signal);
    }
    let err = match outcome {
        Ok(Ok(())) => None,
        Ok(Err(err)) => Some(err),
        Err(payload) => {
            let err = HandlerError::from_panic(payload);
            tracing::error!(error = %err, "Handler panicked");
            Some(err)
        }
    };
    Turn::Resumed(err)
}

fn stalled() {
    tracing::warn!("Handler finished without continuing or closing the response; waiting for close");
}

fn settle(req: &mut Request, outcome: Turn) {
    match outcome {
        Turn::Closed => {}
        Turn::Resumed(err) => req.error = err,
    }
}
