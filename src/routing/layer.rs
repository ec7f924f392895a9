//! Route layers and the handler contract.
//!
//! # Responsibilities
//! - Define the normal and error handler traits
//! - Tag each registered handler with its variant at registration
//! - Pair a handler with an optional method and a compiled matcher
//!
//! # Design Decisions
//! - The variant is an explicit enum tag, never inferred per call
//! - Layers are immutable once built; routers only append

use axum::http::Method;
use futures_util::future::BoxFuture;
use std::fmt;
use std::future::Future;
use std::sync::Arc;

use crate::error::{HandlerError, HandlerResult};
use crate::http::{Request, Response};
use crate::routing::matcher::{PathMatch, PathMatcher};
use crate::routing::next::Next;

/// A handler running on the happy path.
pub trait Handler: Send + Sync + 'static {
    /// Process the request. Control passes on through `next` or by closing `res`.
    fn call<'a>(
        &'a self,
        req: &'a mut Request,
        res: &'a Response,
        next: Next,
    ) -> BoxFuture<'a, HandlerResult>;
}

/// A handler that only runs while an error is pending.
pub trait ErrorHandler: Send + Sync + 'static {
    /// Process the pending error. `next.proceed()` recovers, `next.fail(..)` propagates.
    fn call<'a>(
        &'a self,
        err: HandlerError,
        req: &'a mut Request,
        res: &'a Response,
        next: Next,
    ) -> BoxFuture<'a, HandlerResult>;
}

impl<F> Handler for F
where
    F: for<'a> Fn(&'a mut Request, &'a Response, Next) -> BoxFuture<'a, HandlerResult>
        + Send
        + Sync
        + 'static,
{
    fn call<'a>(
        &'a self,
        req: &'a mut Request,
        res: &'a Response,
        next: Next,
    ) -> BoxFuture<'a, HandlerResult> {
        self(req, res, next)
    }
}

struct ErrorFn<F>(F);

impl<F> ErrorHandler for ErrorFn<F>
where
    F: for<'a> Fn(HandlerError, &'a mut Request, &'a Response, Next) -> BoxFuture<'a, HandlerResult>
        + Send
        + Sync
        + 'static,
{
    fn call<'a>(
        &'a self,
        err: HandlerError,
        req: &'a mut Request,
        res: &'a Response,
        next: Next,
    ) -> BoxFuture<'a, HandlerResult> {
        (self.0)(err, req, res, next)
    }
}

/// A registered handler, tagged with its variant.
#[derive(Clone)]
pub enum Middleware {
    Normal(Arc<dyn Handler>),
    Error(Arc<dyn ErrorHandler>),
}

impl Middleware {
    /// Returns true for the error variant.
    pub fn is_error_handler(&self) -> bool {
        matches!(self, Middleware::Error(_))
    }
}

impl fmt::Debug for Middleware {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Middleware::Normal(_) => f.write_str("Middleware::Normal"),
            Middleware::Error(_) => f.write_str("Middleware::Error"),
        }
    }
}

/// Register a closure or function as a normal handler.
///
/// ```ignore
/// router.get("/ping", handler(|_req, res, _next| Box::pin(async move {
///     res.set_text_body("pong").close();
///     Ok(())
/// })));
/// ```
pub fn handler<F>(f: F) -> Middleware
where
    F: for<'a> Fn(&'a mut Request, &'a Response, Next) -> BoxFuture<'a, HandlerResult>
        + Send
        + Sync
        + 'static,
{
    Middleware::Normal(Arc::new(f))
}

/// Register a closure or function as an error handler.
pub fn error_handler<F>(f: F) -> Middleware
where
    F: for<'a> Fn(HandlerError, &'a mut Request, &'a Response, Next) -> BoxFuture<'a, HandlerResult>
        + Send
        + Sync
        + 'static,
{
    Middleware::Error(Arc::new(ErrorFn(f)))
}

/// Register a handler that only needs the response and owns its future.
///
/// Convenient for leaf responders that do not touch the request context:
/// the future receives a clone of the response and the continuation.
pub fn responder<F, Fut>(f: F) -> Middleware
where
    F: Fn(Response, Next) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = HandlerResult> + Send + 'static,
{
    handler(move |_req, res, next| Box::pin(f(res.clone(), next)))
}

/// Anything that can be registered on a router in one call.
pub trait IntoMiddleware {
    fn into_middleware(self) -> Vec<Middleware>;
}

impl IntoMiddleware for Middleware {
    fn into_middleware(self) -> Vec<Middleware> {
        vec![self]
    }
}

impl IntoMiddleware for Vec<Middleware> {
    fn into_middleware(self) -> Vec<Middleware> {
        self
    }
}

impl<const N: usize> IntoMiddleware for [Middleware; N] {
    fn into_middleware(self) -> Vec<Middleware> {
        self.into()
    }
}

/// One registered (method, matcher, handler) entry.
#[derive(Debug, Clone)]
pub struct RouteLayer {
    method: Option<Method>,
    matcher: Arc<PathMatcher>,
    handler: Middleware,
}

impl RouteLayer {
    pub(crate) fn new(method: Option<Method>, matcher: Arc<PathMatcher>, handler: Middleware) -> Self {
        Self {
            method,
            matcher,
            handler,
        }
    }

    /// The method restriction, if any.
    pub fn method(&self) -> Option<&Method> {
        self.method.as_ref()
    }

    /// Parameter names captured by this layer's matcher.
    pub fn param_names(&self) -> &[String] {
        self.matcher.param_names()
    }

    pub fn matcher(&self) -> &PathMatcher {
        &self.matcher
    }

    pub fn handler(&self) -> &Middleware {
        &self.handler
    }

    /// Method check, case-insensitive. A layer without a method accepts any.
    pub fn accepts(&self, method: &Method) -> bool {
        match &self.method {
            Some(m) => m.as_str().eq_ignore_ascii_case(method.as_str()),
            None => true,
        }
    }

    pub(crate) fn matches<'s>(&'s self, route_path: &str) -> Option<PathMatch<'s>> {
        self.matcher.matches(route_path)
    }
}
