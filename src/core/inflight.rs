//! Coalesces identical concurrent computations into one.

use std::collections::HashMap;
use std::future::Future;
use std::sync::{Arc, Mutex};
use tokio::sync::OnceCell;

/// Callers racing on the same key share the first caller's computation.
///
/// If the computing caller is dropped mid-flight, one of the waiters takes
/// over. A key is forgotten as soon as its value is produced, so later callers
/// recompute (and normally hit the cache the first computation populated).
pub struct Inflight<V> {
    cells: Mutex<HashMap<String, Arc<OnceCell<V>>>>,
}

impl<V: Clone> Inflight<V> {
    pub fn new() -> Self {
        Self {
            cells: Mutex::new(HashMap::new()),
        }
    }

    pub async fn run<F, Fut>(&self, key: &str, compute: F) -> V
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = V>,
    {
        let cell = {
            let mut cells = self.cells.lock().unwrap_or_else(|e| e.into_inner());
            cells
                .entry(key.to_string())
                .or_insert_with(|| Arc::new(OnceCell::new()))
                .clone()
        };

        let value = cell.get_or_init(compute).await.clone();

        let mut cells = self.cells.lock().unwrap_or_else(|e| e.into_inner());
        if cells.get(key).is_some_and(|c| Arc::ptr_eq(c, &cell)) {
            cells.remove(key);
        }
        value
    }

    #[cfg(test)]
    pub fn pending(&self) -> usize {
        self.cells.lock().unwrap_or_else(|e| e.into_inner()).len()
    }
}

impl<V: Clone> Default for Inflight<V> {
    fn default() -> Self {
        Self::new()
    }
}
