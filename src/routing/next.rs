//! The continuation handed to every handler.
//!
//! Calling it resumes the dispatch loop that is suspended on the handler's
//! turn. Consuming `self` makes a second call impossible.

use tokio::sync::oneshot;

use crate::error::HandlerError;

/// Forward-control callback passed to handlers.
///
/// `proceed` clears the pending error, `fail` sets it. The value may be moved
/// into a spawned task and called later; dropping it without calling leaves
/// the dispatch waiting for the response to close.
#[derive(Debug)]
pub struct Next {
    tx: oneshot::Sender<Option<HandlerError>>,
}

/// Receiving half held by the dispatch loop.
pub(crate) type Resumed = oneshot::Receiver<Option<HandlerError>>;

impl Next {
    pub(crate) fn channel() -> (Next, Resumed) {
        let (tx, rx) = oneshot::channel();
        (Next { tx }, rx)
    }

    /// Continue with the next matching layer, clearing any pending error.
    pub fn proceed(self) {
        self.resume(None);
    }

    /// Continue in error mode: only error handlers run until one recovers.
    pub fn fail(self, err: impl Into<HandlerError>) {
        self.resume(Some(err.into()));
    }

    /// Continue with an optional error.
    pub fn resume(self, err: Option<HandlerError>) {
        // The loop may already have moved on because the response closed.
        let _ = self.tx.send(err);
    }
}
