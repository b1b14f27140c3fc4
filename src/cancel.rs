//! Cooperative cancellation.
//!
//! One token type serves two roles: the engine-wide stop signal that
//! [`crate::Client::close`] fires, and per-call cancellation passed through
//! [`crate::CallOptions`]. It is backed by a `tokio::sync::watch` channel so any
//! number of tasks can wait on it without missed wake-ups.

use std::sync::Arc;

use tokio::sync::watch;

/// A clonable cancellation token.
///
/// Clones share the same cancellation state. Cancelling is idempotent.
#[derive(Clone, Debug)]
pub struct CancelToken {
    tx: Arc<watch::Sender<bool>>,
}

impl Default for CancelToken {
    fn default() -> Self {
        Self::new()
    }
}

impl CancelToken {
    /// Create a new, non-cancelled token.
    #[must_use]
    pub fn new() -> Self {
        let (tx, _rx) = watch::channel(false);
        Self { tx: Arc::new(tx) }
    }

    /// Cancel this token. Returns `true` for the call that flipped the state.
    pub fn cancel(&self) -> bool {
        !self.tx.send_replace(true)
    }

    /// Returns `true` if the token has been cancelled.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        *self.tx.borrow()
    }

    /// A future that resolves when the token is cancelled.
    pub fn cancelled(&self) -> impl std::future::Future<Output = ()> + Send + 'static {
        let mut rx = self.tx.subscribe();
        async move {
            // The sender lives inside `self.tx`, which every clone keeps alive,
            // so `wait_for` only errors if all tokens were dropped mid-wait.
            let _ = rx.wait_for(|cancelled| *cancelled).await;
        }
    }
}
