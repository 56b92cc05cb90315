use crate::core::cache::KeyValueCollection;
use crate::core::error::CacheError;
use async_trait::async_trait;
use std::collections::HashMap;
use tokio::sync::RwLock;

/// In-process byte map, used on its own in tests and as the fallback behind
/// the disk store.
#[derive(Default)]
pub struct MemoryCollection {
    inner: RwLock<HashMap<String, Vec<u8>>>,
}

impl MemoryCollection {
    pub fn new() -> Self {
        Self::default()
    }

    #[cfg(test)]
    pub async fn len(&self) -> usize {
        self.inner.read().await.len()
    }

    #[cfg(test)]
    pub async fn is_empty(&self) -> bool {
        self.inner.read().await.is_empty()
    }
}

#[async_trait]
impl KeyValueCollection for MemoryCollection {
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, CacheError> {
        Ok(self.inner.read().await.get(key).cloned())
    }

    async fn put(&self, key: &str, value: &[u8]) -> Result<(), CacheError> {
        self.inner
            .write()
            .await
            .insert(key.to_string(), value.to_vec());
        Ok(())
    }

    async fn remove(&self, key: &str) -> Result<(), CacheError> {
        self.inner.write().await.remove(key);
        Ok(())
    }
}
