//! Bounded concurrency for outbound fan-out.

use std::future::Future;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use tokio::sync::Semaphore;
use tracing::debug;

/// Caps how many submitted tasks run at once.
///
/// Waiters are admitted in submission order (tokio's semaphore is fair), but
/// once admitted tasks race, so completion order is not guaranteed. Cloning
/// shares the same limit.
#[derive(Clone)]
pub struct Limiter {
    permits: Arc<Semaphore>,
    active: Arc<AtomicUsize>,
    limit: usize,
}

struct ActiveGuard<'a>(&'a AtomicUsize);

impl Drop for ActiveGuard<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

impl Limiter {
    pub fn new(limit: usize) -> Self {
        let limit = limit.max(1);
        Self {
            permits: Arc::new(Semaphore::new(limit)),
            active: Arc::new(AtomicUsize::new(0)),
            limit,
        }
    }

    #[cfg(test)]
    pub fn limit(&self) -> usize {
        self.limit
    }

    /// Tasks currently holding a slot.
    pub fn active(&self) -> usize {
        self.active.load(Ordering::SeqCst)
    }

    /// Waits for a free slot, then runs `task` to completion.
    pub async fn run<F>(&self, task: F) -> F::Output
    where
        F: Future,
    {
        if self.active() >= self.limit {
            debug!(limit = self.limit, "All slots busy, queueing");
        }
        // The semaphore is never closed.
        let _permit = self.permits.acquire().await.ok();
        self.active.fetch_add(1, Ordering::SeqCst);
        let _guard = ActiveGuard(&self.active);
        task.await
    }
}
