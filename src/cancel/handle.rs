// src/cancel/handle.rs

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use tokio::sync::Notify;

#[derive(Debug, Default)]
struct Inner {
    flag: AtomicBool,
    notify: Notify,
    reason: Mutex<Option<String>>,
}

/// Cloneable cancellation request flag shared between the caller and the
/// driver.
#[derive(Debug, Clone, Default)]
pub struct CancelHandle {
    inner: Arc<Inner>,
}

impl CancelHandle {
    pub fn new() -> Self {
        Self::default()
    }

    /// Request cancellation. Only the first reason is kept.
    pub fn cancel(&self, reason: impl Into<String>) {
        if let Ok(mut slot) = self.inner.reason.lock() {
            slot.get_or_insert_with(|| reason.into());
        }
        self.inner.flag.store(true, Ordering::SeqCst);
        self.inner.notify.notify_waiters();
    }

    pub fn is_canceled(&self) -> bool {
        self.inner.flag.load(Ordering::SeqCst)
    }

    pub fn reason(&self) -> Option<String> {
        self.inner.reason.lock().ok().and_then(|r| r.clone())
    }

    /// Resolves once [`cancel`](Self::cancel) has been called.
    pub async fn canceled(&self) {
        let notified = self.inner.notify.notified();
        tokio::pin!(notified);
        notified.as_mut().enable();
        if self.is_canceled() {
            return;
        }
        notified.await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn waiters_wake_on_cancel_and_first_reason_wins() {
        let handle = CancelHandle::new();
        let waiter = {
            let handle = handle.clone();
            tokio::spawn(async move { handle.canceled().await })
        };

        handle.cancel("user request");
        handle.cancel("second");
        waiter.await.unwrap();

        assert!(handle.is_canceled());
        assert_eq!(handle.reason().as_deref(), Some("user request"));
        // Already canceled: returns immediately.
        handle.canceled().await;
    }
}
