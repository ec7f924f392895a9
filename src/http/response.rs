//! The per-request response sink.
//!
//! # Responsibilities
//! - Accumulate status, headers and body shared by every layer
//! - Buffer streamed chunks until close
//! - Close exactly once and notify listeners in registration order
//! - Convert the closed sink into the wire response
//!
//! # Design Decisions
//! - Cheap to clone; all clones observe the same state
//! - A listener added after close fires immediately instead of being queued
//! - A panicking listener is logged and does not stop the others
//! - Mutations after close are ignored

use axum::body::{Body, Bytes};
use axum::http::header::{HeaderMap, HeaderName, HeaderValue, CONTENT_TYPE};
use axum::http::StatusCode;
use serde::Serialize;
use std::panic::{self, AssertUnwindSafe};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio::sync::watch;

pub const JSON_CONTENT_TYPE: &str = "application/json; charset=utf-8";
pub const HTML_CONTENT_TYPE: &str = "text/html; charset=utf-8";
pub const TEXT_CONTENT_TYPE: &str = "text/plain; charset=utf-8";

const INTERNAL_ERROR_BODY: &str = "Internal Server Error";

/// Errors raised by response operations.
#[derive(Debug, thiserror::Error)]
pub enum ResponseError {
    #[error("response already closed")]
    Closed,

    #[error("invalid header: {0}")]
    InvalidHeader(String),

    #[error("failed to serialize JSON body: {0}")]
    Json(#[from] serde_json::Error),
}

/// Binary payload with an optional media type.
#[derive(Debug, Clone, Default)]
pub struct Blob {
    pub data: Bytes,
    pub content_type: Option<String>,
}

impl Blob {
    pub fn new(data: impl Into<Bytes>, content_type: Option<&str>) -> Self {
        Self {
            data: data.into(),
            content_type: content_type.map(str::to_string),
        }
    }
}

/// Handle returned when a close listener is queued.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ListenerId(u64);

type CloseListener = Box<dyn FnOnce() + Send>;

struct State {
    status: u16,
    headers: HeaderMap,
    body: Option<Bytes>,
    chunks: Vec<Bytes>,
    closed: bool,
    listeners: Vec<(ListenerId, CloseListener)>,
    next_listener: u64,
}

struct Inner {
    state: Mutex<State>,
    closed_tx: watch::Sender<bool>,
}

/// Mutable output shared by all layers of one request.
#[derive(Clone)]
pub struct Response {
    inner: Arc<Inner>,
}

impl Default for Response {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for Response {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.lock();
        f.debug_struct("Response")
            .field("status", &state.status)
            .field("headers", &state.headers)
            .field("closed", &state.closed)
            .finish()
    }
}

impl Response {
    /// Create an open response with status 200 and no body.
    pub fn new() -> Self {
        let (closed_tx, _) = watch::channel(false);
        Self {
            inner: Arc::new(Inner {
                state: Mutex::new(State {
                    status: 200,
                    headers: HeaderMap::new(),
                    body: None,
                    chunks: Vec::new(),
                    closed: false,
                    listeners: Vec::new(),
                    next_listener: 0,
                }),
                closed_tx,
            }),
        }
    }

    fn lock(&self) -> MutexGuard<'_, State> {
        // Listener and handler panics are caught; the state itself stays consistent.
        self.inner.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn mutate(&self, what: &str, f: impl FnOnce(&mut State)) -> &Self {
        let mut state = self.lock();
        if state.closed {
            tracing::warn!(operation = what, "Ignoring mutation of a closed response");
        } else {
            f(&mut state);
        }
        self
    }

    pub fn status_code(&self) -> u16 {
        self.lock().status
    }

    pub fn set_status_code(&self, status: u16) -> &Self {
        self.mutate("set_status_code", |state| state.status = status)
    }

    /// Header value by name (case-insensitive).
    pub fn header(&self, name: &str) -> Option<String> {
        self.lock()
            .headers
            .get(name)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string)
    }

    pub fn headers(&self) -> HeaderMap {
        self.lock().headers.clone()
    }

    /// Set a header, replacing any previous value.
    pub fn set_header(&self, name: &str, value: &str) -> Result<&Self, ResponseError> {
        let name = HeaderName::try_from(name)
            .map_err(|_| ResponseError::InvalidHeader(name.to_string()))?;
        let value = HeaderValue::try_from(value)
            .map_err(|_| ResponseError::InvalidHeader(format!("{name}: {value}")))?;
        Ok(self.insert_header(name, value))
    }

    pub(crate) fn insert_header(&self, name: HeaderName, value: HeaderValue) -> &Self {
        self.mutate("set_header", |state| {
            state.headers.insert(name, value);
        })
    }

    /// The explicit body, or the assembled chunks once closed.
    pub fn body(&self) -> Option<Bytes> {
        self.lock().body.clone()
    }

    /// Assign the body without touching headers.
    pub fn set_body(&self, body: impl Into<Bytes>) -> &Self {
        let body = body.into();
        self.mutate("set_body", |state| state.body = Some(body))
    }

    pub fn set_json_body<T: Serialize + ?Sized>(&self, data: &T) -> Result<&Self, ResponseError> {
        let body = serde_json::to_vec(data)?;
        Ok(self.typed_body(body.into(), Some(JSON_CONTENT_TYPE)))
    }

    pub fn set_html_body(&self, data: impl Into<String>) -> &Self {
        self.typed_body(Bytes::from(data.into()), Some(HTML_CONTENT_TYPE))
    }

    pub fn set_text_body(&self, data: impl Into<String>) -> &Self {
        self.typed_body(Bytes::from(data.into()), Some(TEXT_CONTENT_TYPE))
    }

    pub fn set_blob_body(&self, blob: Blob) -> &Self {
        self.typed_body(blob.data, blob.content_type.as_deref())
    }

    /// Set the body and, unless the caller already chose one, its content type.
    fn typed_body(&self, body: Bytes, content_type: Option<&str>) -> &Self {
        let content_type = content_type.and_then(|ct| HeaderValue::try_from(ct).ok());
        self.mutate("set_body", |state| {
            if let Some(ct) = content_type {
                if !state.headers.contains_key(CONTENT_TYPE) {
                    state.headers.insert(CONTENT_TYPE, ct);
                }
            }
            state.body = Some(body);
        })
    }

    /// Append a streamed chunk. Chunks become the body at close unless a body was set.
    pub fn write(&self, chunk: impl Into<Bytes>) -> Result<(), ResponseError> {
        let mut state = self.lock();
        if state.closed {
            return Err(ResponseError::Closed);
        }
        state.chunks.push(chunk.into());
        Ok(())
    }

    pub fn is_closed(&self) -> bool {
        self.lock().closed
    }

    /// Resolves once the response is closed.
    pub async fn closed(&self) {
        let mut rx = self.inner.closed_tx.subscribe();
        // The sender lives as long as `self`, so this only returns on close.
        let _ = rx.wait_for(|closed| *closed).await;
    }

    /// Close the response. Later calls are no-ops.
    pub fn close(&self) {
        let mut state = self.lock();
        if state.closed {
            return;
        }
        if state.body.is_none() && !state.chunks.is_empty() {
            let chunks = std::mem::take(&mut state.chunks);
            state.body = Some(chunks.concat().into());
        }
        self.finish(state);
    }

    /// Abnormal termination: status 500 with a generic body, then close.
    pub fn abort(&self, reason: impl std::fmt::Display) {
        let mut state = self.lock();
        if state.closed {
            return;
        }
        tracing::error!(reason = %reason, "Response aborted");
        state.status = 500;
        state.headers.insert(CONTENT_TYPE, HeaderValue::from_static(TEXT_CONTENT_TYPE));
        state.body = Some(Bytes::from_static(INTERNAL_ERROR_BODY.as_bytes()));
        self.finish(state);
    }

    /// Set status and a text body and close, only if still open.
    ///
    /// Returns false if something else closed the response first.
    pub fn finalize(&self, status: u16, text: &'static str) -> bool {
        let mut state = self.lock();
        if state.closed {
            return false;
        }
        state.status = status;
        state.headers.insert(CONTENT_TYPE, HeaderValue::from_static(TEXT_CONTENT_TYPE));
        state.body = Some(Bytes::from_static(text.as_bytes()));
        self.finish(state);
        true
    }

    fn finish(&self, mut state: MutexGuard<'_, State>) {
        state.closed = true;
        let listeners = std::mem::take(&mut state.listeners);
        drop(state);

        self.inner.closed_tx.send_replace(true);
        for (id, listener) in listeners {
            if panic::catch_unwind(AssertUnwindSafe(listener)).is_err() {
                tracing::error!(listener = id.0, "Close listener panicked");
            }
        }
    }

    /// Run `listener` when the response closes, or right now if it already has.
    ///
    /// Returns `None` when the listener ran immediately.
    pub fn add_close_listener(&self, listener: impl FnOnce() + Send + 'static) -> Option<ListenerId> {
        let mut state = self.lock();
        if state.closed {
            drop(state);
            listener();
            return None;
        }
        let id = ListenerId(state.next_listener);
        state.next_listener += 1;
        state.listeners.push((id, Box::new(listener)));
        Some(id)
    }

    /// Remove a queued listener. Returns false if it was not queued.
    pub fn remove_close_listener(&self, id: ListenerId) -> bool {
        let mut state = self.lock();
        let before = state.listeners.len();
        state.listeners.retain(|(queued, _)| *queued != id);
        state.listeners.len() != before
    }

    /// Build the wire response from the current state.
    pub fn into_http(&self) -> axum::response::Response {
        let state = self.lock();
        let status = StatusCode::from_u16(state.status).unwrap_or_else(|_| {
            tracing::warn!(status = state.status, "Invalid status code; sending 500");
            StatusCode::INTERNAL_SERVER_ERROR
        });
        let body = state.body.clone().map(Body::from).unwrap_or_else(Body::empty);

        let mut response = axum::response::Response::new(body);
        *response.status_mut() = status;
        *response.headers_mut() = state.headers.clone();
        response
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn test_defaults() {
        let res = Response::new();
        assert_eq!(res.status_code(), 200);
        assert!(res.body().is_none());
        assert!(!res.is_closed());
    }

    #[test]
    fn test_close_is_idempotent() {
        let res = Response::new();
        let fired = Arc::new(AtomicUsize::new(0));
        let counter = fired.clone();
        res.add_close_listener(move || {
            counter.fetch_add(1, Ordering::SeqCst);
        });

        res.close();
        res.close();

        assert!(res.is_closed());
        assert_eq!(fired.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_late_listener_fires_immediately() {
        let res = Response::new();
        res.close();

        let fired = Arc::new(AtomicUsize::new(0));
        let counter = fired.clone();
        let id = res.add_close_listener(move || {
            counter.fetch_add(1, Ordering::SeqCst);
        });

        assert!(id.is_none());
        assert_eq!(fired.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_listeners_fire_in_order_despite_panic() {
        let res = Response::new();
        let order = Arc::new(Mutex::new(Vec::new()));

        let first = order.clone();
        res.add_close_listener(move || first.lock().unwrap().push(1));
        res.add_close_listener(|| panic!("listener failure"));
        let third = order.clone();
        res.add_close_listener(move || third.lock().unwrap().push(3));

        res.close();
        assert_eq!(*order.lock().unwrap(), vec![1, 3]);
    }

    #[test]
    fn test_removed_listener_does_not_fire() {
        let res = Response::new();
        let fired = Arc::new(AtomicUsize::new(0));
        let counter = fired.clone();
        let id = res
            .add_close_listener(move || {
                counter.fetch_add(1, Ordering::SeqCst);
            })
            .unwrap();

        assert!(res.remove_close_listener(id));
        assert!(!res.remove_close_listener(id));
        res.close();
        assert_eq!(fired.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_listener_registering_during_close_fires_immediately() {
        let res = Response::new();
        let fired = Arc::new(AtomicUsize::new(0));
        let handle = res.clone();
        let counter = fired.clone();
        res.add_close_listener(move || {
            let counter = counter.clone();
            handle.add_close_listener(move || {
                counter.fetch_add(1, Ordering::SeqCst);
            });
        });

        res.close();
        assert_eq!(fired.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_chunks_become_body() {
        let res = Response::new();
        res.write("Hello, ").unwrap();
        res.write("world").unwrap();
        assert!(res.body().is_none());

        res.close();
        assert_eq!(res.body().as_deref(), Some(&b"Hello, world"[..]));
        assert!(matches!(res.write("late"), Err(ResponseError::Closed)));
    }

    #[test]
    fn test_explicit_body_wins_over_chunks() {
        let res = Response::new();
        res.write("streamed").unwrap();
        res.set_body("explicit");
        res.close();
        assert_eq!(res.body().as_deref(), Some(&b"explicit"[..]));
    }

    #[test]
    fn test_typed_setters_default_content_type() {
        let res = Response::new();
        res.set_json_body(&serde_json::json!({ "message": "Hello" })).unwrap();
        assert_eq!(res.header("content-type").as_deref(), Some(JSON_CONTENT_TYPE));
        assert_eq!(res.body().as_deref(), Some(&br#"{"message":"Hello"}"#[..]));

        let res = Response::new();
        res.set_header("Content-Type", "text/markdown").unwrap();
        res.set_text_body("# title");
        assert_eq!(res.header("CONTENT-TYPE").as_deref(), Some("text/markdown"));

        let res = Response::new();
        res.set_blob_body(Blob::new(vec![1u8, 2, 3], Some("image/png")));
        assert_eq!(res.header("content-type").as_deref(), Some("image/png"));

        let res = Response::new();
        res.set_blob_body(Blob::new(vec![1u8], None));
        assert!(res.header("content-type").is_none());
    }

    #[test]
    fn test_invalid_header_rejected() {
        let res = Response::new();
        assert!(matches!(
            res.set_header("bad header", "x"),
            Err(ResponseError::InvalidHeader(_))
        ));
    }

    #[test]
    fn test_mutation_after_close_ignored() {
        let res = Response::new();
        res.set_status_code(201).set_text_body("created").close();
        res.set_status_code(500).set_text_body("changed");
        assert_eq!(res.status_code(), 201);
        assert_eq!(res.body().as_deref(), Some(&b"created"[..]));
    }

    #[test]
    fn test_abort_forces_internal_error() {
        let res = Response::new();
        res.set_status_code(201).set_json_body(&[1, 2]).unwrap();
        res.abort("socket reset");
        assert!(res.is_closed());
        assert_eq!(res.status_code(), 500);
        assert_eq!(res.body().as_deref(), Some(&b"Internal Server Error"[..]));
    }

    #[test]
    fn test_finalize_runs_once() {
        let res = Response::new();
        assert!(res.finalize(404, "Not Found"));
        assert!(!res.finalize(500, "Internal Server Error"));
        assert_eq!(res.status_code(), 404);
    }

    #[test]
    fn test_into_http() {
        let res = Response::new();
        res.set_status_code(418).set_text_body("teapot").close();
        let http = res.into_http();
        assert_eq!(http.status(), StatusCode::IM_A_TEAPOT);
        assert_eq!(http.headers()[CONTENT_TYPE], TEXT_CONTENT_TYPE);
    }

    #[tokio::test]
    async fn test_closed_future_resolves() {
        let res = Response::new();
        let handle = res.clone();
        tokio::spawn(async move {
            tokio::time::sleep(std::time::Duration::from_millis(5)).await;
            handle.close();
        });
        res.closed().await;
        assert!(res.is_closed());
    }
}
