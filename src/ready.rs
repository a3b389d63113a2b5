use std::sync::atomic::{AtomicBool, Ordering};

use tokio::sync::Notify;

/// A single-shot "ready" latch that can be re-armed after a disconnect.
/// Mirrors the source's `asyncio.Event`-based `ready` field: `set()`
/// wakes every waiter; `clear()` re-arms it so the next `wait()` blocks
/// again.
#[derive(Debug, Default)]
pub struct ReadyLatch {
    is_set: AtomicBool,
    notify: Notify,
}

impl ReadyLatch {
    pub fn new() -> Self {
        Self {
            is_set: AtomicBool::new(false),
            notify: Notify::new(),
        }
    }

    pub fn is_ready(&self) -> bool {
        self.is_set.load(Ordering::SeqCst)
    }

    pub fn set(&self) {
        self.is_set.store(true, Ordering::SeqCst);
        self.notify.notify_waiters();
    }

    pub fn clear(&self) {
        self.is_set.store(false, Ordering::SeqCst);
    }

    /// Block until `set()` has been called since the latch was last
    /// cleared. Returns immediately if already set.
    pub async fn wait(&self) {
        loop {
            if self.is_ready() {
                return;
            }
            let notified = self.notify.notified();
            // Re-check after subscribing, in case `set()` raced us
            // between the `is_ready()` check above and here.
            if self.is_ready() {
                return;
            }
            notified.await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::time::Duration;

    #[tokio::test]
    async fn wait_returns_immediately_when_already_set() {
        let latch = ReadyLatch::new();
        latch.set();
        tokio::time::timeout(Duration::from_millis(50), latch.wait())
            .await
            .expect("should not block");
    }

    #[tokio::test]
    async fn wait_blocks_until_set_then_wakes_all_waiters() {
        let latch = Arc::new(ReadyLatch::new());
        let a = latch.clone();
        let b = latch.clone();

        let wait_a = tokio::spawn(async move { a.wait().await });
        let wait_b = tokio::spawn(async move { b.wait().await });

        tokio::time::sleep(Duration::from_millis(20)).await;
        latch.set();

        tokio::time::timeout(Duration::from_millis(200), async {
            wait_a.await.unwrap();
            wait_b.await.unwrap();
        })
        .await
        .expect("both waiters should wake");
    }

    #[tokio::test]
    async fn clear_re_arms_the_latch() {
        let latch = ReadyLatch::new();
        latch.set();
        assert!(latch.is_ready());
        latch.clear();
        assert!(!latch.is_ready());
        tokio::time::timeout(Duration::from_millis(30), latch.wait())
            .await
            .expect_err("should block again after clear");
    }
}
