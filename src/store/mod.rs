pub mod bars;
pub mod disk;
pub mod memory;

use crate::core::cache::KeyValueCollection;
use crate::core::error::CacheError;
use async_trait::async_trait;
use disk::DiskCollection;
use fjall::{Keyspace, PartitionCreateOptions};
use memory::MemoryCollection;
use std::path::Path;
use std::sync::Arc;
use tracing::{info, warn};

/// Opens named collections on the shared store, each paired with an
/// in-process fallback.
pub struct KeyValueStore {
    keyspace: Option<Keyspace>,
}

impl KeyValueStore {
    /// Opens the store at `path`. A store that cannot be opened is not fatal:
    /// every collection then runs on its in-process fallback only.
    pub fn open(path: &Path) -> Self {
        let keyspace = match fjall::Config::new(path).open() {
            Ok(ks) => {
                info!(path = %path.display(), "Opened shared store");
                Some(ks)
            }
            Err(e) => {
                warn!(path = %path.display(), error = %e, "Shared store unavailable, using in-process cache");
                None
            }
        };
        Self { keyspace }
    }

    /// A store with no shared backend.
    pub fn in_memory() -> Self {
        Self { keyspace: None }
    }

    pub fn collection(&self, name: &str) -> Arc<dyn KeyValueCollection> {
        let primary = self.keyspace.as_ref().and_then(|ks| {
            ks.open_partition(name, PartitionCreateOptions::default())
                .map_err(|e| warn!(collection = name, error = %e, "Failed to open partition"))
                .ok()
                .map(|partition| Arc::new(DiskCollection::new(partition)) as Arc<dyn KeyValueCollection>)
        });
        Arc::new(FallbackCollection::new(primary))
    }
}

/// Reads from the primary when reachable and degrades to the in-process map
/// when it errors. The map only holds writes the primary refused, so it stays
/// empty while the shared store is healthy.
pub struct FallbackCollection {
    primary: Option<Arc<dyn KeyValueCollection>>,
    fallback: MemoryCollection,
}

impl FallbackCollection {
    pub fn new(primary: Option<Arc<dyn KeyValueCollection>>) -> Self {
        Self {
            primary,
            fallback: MemoryCollection::new(),
        }
    }
}

#[async_trait]
impl KeyValueCollection for FallbackCollection {
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, CacheError> {
        if let Some(primary) = &self.primary {
            match primary.get(key).await {
                Ok(value) => return Ok(value),
                Err(e) => warn!(key, error = %e, "Shared store read failed, using fallback"),
            }
        }
        self.fallback.get(key).await
    }

    async fn put(&self, key: &str, value: &[u8]) -> Result<(), CacheError> {
        if let Some(primary) = &self.primary {
            match primary.put(key, value).await {
                // Drop any copy written during an outage so it cannot resurface.
                Ok(()) => return self.fallback.remove(key).await,
                Err(e) => warn!(key, error = %e, "Shared store write failed, using fallback"),
            }
        }
        self.fallback.put(key, value).await
    }

    async fn remove(&self, key: &str) -> Result<(), CacheError> {
        if let Some(primary) = &self.primary
            && let Err(e) = primary.remove(key).await
        {
            warn!(key, error = %e, "Shared store remove failed");
        }
        self.fallback.remove(key).await
    }
}
