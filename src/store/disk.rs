use crate::core::cache::KeyValueCollection;
use crate::core::error::CacheError;
use async_trait::async_trait;
use fjall::PartitionHandle;

/// A fjall partition exposed as a byte map.
pub struct DiskCollection {
    partition: PartitionHandle,
}

impl DiskCollection {
    pub fn new(partition: PartitionHandle) -> Self {
        Self { partition }
    }
}

#[async_trait]
impl KeyValueCollection for DiskCollection {
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, CacheError> {
        Ok(self.partition.get(key.as_bytes())?.map(|v| v.to_vec()))
    }

    async fn put(&self, key: &str, value: &[u8]) -> Result<(), CacheError> {
        self.partition.insert(key.as_bytes(), value)?;
        Ok(())
    }

    async fn remove(&self, key: &str) -> Result<(), CacheError> {
        self.partition.remove(key.as_bytes())?;
        Ok(())
    }
}
