//! Cooperative cancellation tokens (spec.md §5: "Every Crane and every
//! Terminal owns a cancellation token. Stopping a Crane cancels all its
//! Terminals' tokens; abandoning a Terminal cancels all its Operations").
//!
//! Unlike a plain `AtomicBool` flag, [`CancellationToken`] exposes an async
//! `cancelled()` future so a `select!`-driven loop can wake immediately on
//! cancellation instead of polling.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::sync::Notify;

#[derive(Debug)]
struct Inner {
    flag: AtomicBool,
    notify: Notify,
}

/// A shareable, hierarchical cancellation signal. Cloning shares the same
/// underlying flag; [`CancellationToken::child`] also shares it today (the
/// substrate has no per-child cancellation yet, only blanket propagation),
/// matching the single cascading cancel described in the spec.
#[derive(Debug, Clone)]
pub struct CancellationToken {
    inner: Arc<Inner>,
}

impl Default for CancellationToken {
    fn default() -> Self {
        Self::new()
    }
}

impl CancellationToken {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Inner {
                flag: AtomicBool::new(false),
                notify: Notify::new(),
            }),
        }
    }

    pub fn is_cancelled(&self) -> bool {
        self.inner.flag.load(Ordering::Acquire)
    }

    /// Cancel this token and wake every pending `cancelled()` waiter.
    /// Returns `true` if this call was the one that transitioned the flag
    /// (idempotent: subsequent calls return `false`).
    pub fn cancel(&self) -> bool {
        let first = self
            .inner
            .flag
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_ok();
        // Notify regardless: a racing `cancelled()` call may have checked
        // the flag just before our CAS and be about to `notified().await`.
        self.inner.notify.notify_waiters();
        first
    }

    /// Resolves once [`CancellationToken::cancel`] has been called. Safe to
    /// use inside `tokio::select!` alongside other branches.
    pub async fn cancelled(&self) {
        if self.is_cancelled() {
            return;
        }
        loop {
            let notified = self.inner.notify.notified();
            if self.is_cancelled() {
                return;
            }
            notified.await;
            if self.is_cancelled() {
                return;
            }
        }
    }

    /// Shares the same underlying flag. Present so call sites that mean
    /// "derive a token for this sub-component" read clearly even though
    /// today's propagation model is single-level (Crane -> Terminal ->
    /// Operation all observe one cancellation each, not a cascading tree).
    pub fn child(&self) -> Self {
        self.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn cancel_wakes_pending_waiter() {
        let token = CancellationToken::new();
        let waiter = token.clone();
        let handle = tokio::spawn(async move {
            waiter.cancelled().await;
        });
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert!(token.cancel());
        tokio::time::timeout(Duration::from_secs(1), handle)
            .await
            .expect("waiter should wake promptly")
            .unwrap();
    }

    #[tokio::test]
    async fn cancel_is_idempotent() {
        let token = CancellationToken::new();
        assert!(token.cancel());
        assert!(!token.cancel());
        assert!(token.is_cancelled());
    }

    #[tokio::test]
    async fn already_cancelled_resolves_immediately() {
        let token = CancellationToken::new();
        token.cancel();
        tokio::time::timeout(Duration::from_millis(50), token.cancelled())
            .await
            .expect("already-cancelled token resolves without waiting");
    }
}
