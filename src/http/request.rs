//! The per-request dispatch context.
//!
//! # Responsibilities
//! - Hold the request line, headers, buffered body and client address
//! - Carry the dispatch state: path, route cursor, params, pending error
//! - Assign a request ID for tracing
//!
//! # Design Decisions
//! - `path`, the route cursor and `params` are rewritten by the router for
//!   each layer's turn and restored afterwards; handlers only read them
//! - `params` accumulate across nested routers, inner names winning
//! - The query string is parsed once, eagerly, keeping duplicates in order

use axum::body::Bytes;
use axum::extract::ConnectInfo;
use axum::http::request::Parts;
use axum::http::{Extensions, HeaderMap, HeaderName, HeaderValue, Method, Uri};
use hyper::upgrade::OnUpgrade;
use serde::de::DeserializeOwned;
use std::collections::HashMap;
use std::net::SocketAddr;

use crate::error::HandlerError;

/// Header carrying the request ID.
pub const X_REQUEST_ID: &str = "x-request-id";

/// Path parameters by name.
pub type Params = HashMap<String, String>;

/// One inbound request as seen by handlers.
pub struct Request {
    pub(crate) method: Method,
    uri: Uri,
    original_path: String,
    pub(crate) path: String,
    pub(crate) route_cursor: String,
    pub(crate) params: Params,
    query: Vec<(String, String)>,
    headers: HeaderMap,
    body: Bytes,
    remote_addr: Option<SocketAddr>,
    request_id: String,
    extensions: Extensions,
    upgrade: Option<OnUpgrade>,
    pub(crate) error: Option<HandlerError>,
}

impl std::fmt::Debug for Request {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Request")
            .field("request_id", &self.request_id)
            .field("method", &self.method)
            .field("original_path", &self.original_path)
            .field("path", &self.path)
            .field("params", &self.params)
            .field("error", &self.error)
            .finish_non_exhaustive()
    }
}

impl Request {
    pub fn builder() -> RequestBuilder {
        RequestBuilder::default()
    }

    /// Build the context from a decoded HTTP request and its buffered body.
    pub fn from_parts(mut parts: Parts, body: Bytes) -> Self {
        let remote_addr = parts
            .extensions
            .get::<ConnectInfo<SocketAddr>>()
            .map(|ConnectInfo(addr)| *addr);
        let upgrade = parts.extensions.remove::<OnUpgrade>();

        let mut req = Self::assemble(parts.method, parts.uri, parts.headers, body, remote_addr);
        req.extensions = parts.extensions;
        req.upgrade = upgrade;
        req
    }

    fn assemble(
        method: Method,
        uri: Uri,
        headers: HeaderMap,
        body: Bytes,
        remote_addr: Option<SocketAddr>,
    ) -> Self {
        let original_path = uri.path().to_string();
        let query = uri
            .query()
            .map(|q| url::form_urlencoded::parse(q.as_bytes()).into_owned().collect())
            .unwrap_or_default();
        let request_id = headers
            .get(X_REQUEST_ID)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string)
            .unwrap_or_else(|| uuid::Uuid::new_v4().to_string());

        Self {
            method,
            uri,
            path: original_path.clone(),
            route_cursor: original_path.clone(),
            original_path,
            params: Params::new(),
            query,
            headers,
            body,
            remote_addr,
            request_id,
            extensions: Extensions::new(),
            upgrade: None,
            error: None,
        }
    }

    pub fn method(&self) -> &Method {
        &self.method
    }

    pub fn uri(&self) -> &Uri {
        &self.uri
    }

    /// The full path as received.
    pub fn original_path(&self) -> &str {
        &self.original_path
    }

    /// The route path matched at the current nesting level.
    pub fn path(&self) -> &str {
        &self.path
    }

    pub fn params(&self) -> &Params {
        &self.params
    }

    pub fn param(&self, name: &str) -> Option<&str> {
        self.params.get(name).map(String::as_str)
    }

    /// Decoded query pairs in order of appearance.
    pub fn query(&self) -> &[(String, String)] {
        &self.query
    }

    /// First value of a query parameter.
    pub fn query_param(&self, name: &str) -> Option<&str> {
        self.query
            .iter()
            .find(|(k, _)| k == name)
            .map(|(_, v)| v.as_str())
    }

    pub fn headers(&self) -> &HeaderMap {
        &self.headers
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name).and_then(|v| v.to_str().ok())
    }

    pub fn body(&self) -> &Bytes {
        &self.body
    }

    /// Deserialize the body as JSON.
    pub fn json<T: DeserializeOwned>(&self) -> Result<T, serde_json::Error> {
        serde_json::from_slice(&self.body)
    }

    pub fn remote_addr(&self) -> Option<SocketAddr> {
        self.remote_addr
    }

    pub fn request_id(&self) -> &str {
        &self.request_id
    }

    /// The pending error, if one is being propagated.
    pub fn error(&self) -> Option<&HandlerError> {
        self.error.as_ref()
    }

    /// Typed data attached by earlier middleware.
    pub fn extensions(&self) -> &Extensions {
        &self.extensions
    }

    pub fn extensions_mut(&mut self) -> &mut Extensions {
        &mut self.extensions
    }

    pub(crate) fn take_upgrade(&mut self) -> Option<OnUpgrade> {
        self.upgrade.take()
    }
}

/// Builder for requests constructed outside a live connection.
#[derive(Debug, Default)]
pub struct RequestBuilder {
    method: Method,
    uri: String,
    headers: HeaderMap,
    body: Bytes,
    remote_addr: Option<SocketAddr>,
}

impl RequestBuilder {
    pub fn method(mut self, method: Method) -> Self {
        self.method = method;
        self
    }

    pub fn uri(mut self, uri: impl Into<String>) -> Self {
        self.uri = uri.into();
        self
    }

    /// Add a header; invalid names or values are skipped.
    pub fn header(mut self, name: &str, value: &str) -> Self {
        match (HeaderName::try_from(name), HeaderValue::try_from(value)) {
            (Ok(name), Ok(value)) => {
                self.headers.append(name, value);
            }
            _ => tracing::warn!(header = name, "Skipping invalid header"),
        }
        self
    }

    pub fn body(mut self, body: impl Into<Bytes>) -> Self {
        self.body = body.into();
        self
    }

    pub fn remote_addr(mut self, addr: SocketAddr) -> Self {
        self.remote_addr = Some(addr);
        self
    }

    /// Build the request. An unparsable URI falls back to `/`.
    pub fn build(self) -> Request {
        let uri = self.uri.parse::<Uri>().unwrap_or_else(|e| {
            tracing::warn!(uri = %self.uri, error = %e, "Invalid request URI; using /");
            Uri::default()
        });
        Request::assemble(self.method, uri, self.headers, self.body, self.remote_addr)
    }
}
