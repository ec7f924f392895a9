//! Error values flowing through the dispatch chain.
//!
//! # Design Decisions
//! - A pending error is shared by every layer that observes it, so it is
//!   reference counted and cheap to clone
//! - Any `std::error::Error` converts into it, which lets handlers use `?`
//! - Panics caught at the handler boundary become ordinary pending errors

use std::any::Any;
use std::fmt;
use std::sync::Arc;

/// Result type returned by every handler.
pub type HandlerResult = Result<(), HandlerError>;

/// The pending error carried by a request while it travels through layers.
#[derive(Clone)]
pub struct HandlerError {
    inner: Arc<dyn std::error::Error + Send + Sync + 'static>,
}

impl HandlerError {
    /// Build an error from a plain message.
    pub fn msg(message: impl fmt::Display) -> Self {
        Self {
            inner: Arc::new(Message(message.to_string())),
        }
    }

    /// Convert a caught panic payload into an error.
    pub(crate) fn from_panic(payload: Box<dyn Any + Send>) -> Self {
        let message = if let Some(s) = payload.downcast_ref::<&'static str>() {
            (*s).to_string()
        } else if let Some(s) = payload.downcast_ref::<String>() {
            s.clone()
        } else {
            "handler panicked".to_string()
        };
        Self {
            inner: Arc::new(Panicked(message)),
        }
    }

    /// Returns true if this error was produced by a panicking handler.
    pub fn is_panic(&self) -> bool {
        self.inner.is::<Panicked>()
    }

    /// Attempt to view the underlying error as a concrete type.
    pub fn downcast_ref<E: std::error::Error + 'static>(&self) -> Option<&E> {
        self.inner.downcast_ref::<E>()
    }

    /// Access the underlying error.
    pub fn as_error(&self) -> &(dyn std::error::Error + Send + Sync + 'static) {
        &*self.inner
    }
}

impl<E> From<E> for HandlerError
where
    E: std::error::Error + Send + Sync + 'static,
{
    fn from(err: E) -> Self {
        Self {
            inner: Arc::new(err),
        }
    }
}

impl fmt::Display for HandlerError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&self.inner, f)
    }
}

impl fmt::Debug for HandlerError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("HandlerError").field(&self.inner).finish()
    }
}

#[derive(Debug)]
struct Message(String);

impl fmt::Display for Message {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl std::error::Error for Message {}

#[derive(Debug)]
struct Panicked(String);

impl fmt::Display for Panicked {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "handler panicked: {}", self.0)
    }
}

impl std::error::Error for Panicked {}
