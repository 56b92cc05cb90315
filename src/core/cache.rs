//! Two-tier TTL cache over a key/value store.
//!
//! Every logical value lives under two keys: a short-lived "hot" key and a
//! long-lived "last known good" mirror. Entries carry their own freshness
//! boundaries so the store itself can stay a dumb byte map.

use crate::core::clock::Clock;
use crate::core::error::CacheError;
use async_trait::async_trait;
use serde::{Deserialize, Serialize, de::DeserializeOwned};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

/// A named byte map in a key/value store.
#[async_trait]
pub trait KeyValueCollection: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, CacheError>;
    async fn put(&self, key: &str, value: &[u8]) -> Result<(), CacheError>;
    async fn remove(&self, key: &str) -> Result<(), CacheError>;
}

/// A cached value with its freshness boundaries, both epoch milliseconds.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CacheEntry<T> {
    pub value: T,
    pub fresh_until: i64,
    pub stale_until: i64,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Lookup<T> {
    Fresh(T),
    /// Past `fresh_until` but before `stale_until`.
    Stale(T),
    Miss,
}

impl<T> Lookup<T> {
    /// Value only if fresh.
    pub fn fresh(self) -> Option<T> {
        match self {
            Lookup::Fresh(v) => Some(v),
            _ => None,
        }
    }

    /// Value if fresh or stale-allowed.
    pub fn any(self) -> Option<T> {
        match self {
            Lookup::Fresh(v) | Lookup::Stale(v) => Some(v),
            Lookup::Miss => None,
        }
    }
}

/// The pair of keys a logical value is cached under.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TieredKey {
    pub hot: String,
    pub last_good: String,
}

impl TieredKey {
    pub fn new(prefix: &str, rest: &str) -> Self {
        Self {
            hot: format!("{prefix}:{rest}"),
            last_good: format!("{prefix}:lastgood:{rest}"),
        }
    }
}

/// Lifetimes of the two tiers.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TierTtl {
    pub hot: Duration,
    pub last_good: Duration,
}

pub struct TieredCache {
    store: Arc<dyn KeyValueCollection>,
    clock: Arc<dyn Clock>,
}

impl TieredCache {
    pub fn new(store: Arc<dyn KeyValueCollection>, clock: Arc<dyn Clock>) -> Self {
        Self { store, clock }
    }

    pub fn now_ms(&self) -> i64 {
        self.clock.now_ms()
    }

    /// Reads one key, evicting it when past `stale_until`.
    pub async fn get<T: DeserializeOwned>(&self, key: &str) -> Lookup<T> {
        let bytes = match self.store.get(key).await {
            Ok(Some(bytes)) => bytes,
            Ok(None) => {
                debug!("Cache MISS for key: {}", key);
                return Lookup::Miss;
            }
            Err(e) => {
                warn!(key, error = %e, "Cache read failed");
                return Lookup::Miss;
            }
        };

        let entry: CacheEntry<T> = match serde_json::from_slice(&bytes) {
            Ok(entry) => entry,
            Err(e) => {
                warn!(key, error = %e, "Dropping undecodable cache entry");
                self.evict(key).await;
                return Lookup::Miss;
            }
        };

        let now = self.clock.now_ms();
        if now < entry.fresh_until {
            debug!("Cache HIT for key: {}", key);
            Lookup::Fresh(entry.value)
        } else if now < entry.stale_until {
            debug!("Cache STALE for key: {}", key);
            Lookup::Stale(entry.value)
        } else {
            debug!("Cache entry expired for key: {}", key);
            self.evict(key).await;
            Lookup::Miss
        }
    }

    /// Writes one key that is fresh for `fresh` and stale-allowed until `stale`.
    pub async fn put<T: Serialize>(&self, key: &str, value: &T, fresh: Duration, stale: Duration) {
        let now = self.clock.now_ms();
        let fresh_until = now + fresh.as_millis() as i64;
        let stale_until = (now + stale.as_millis() as i64).max(fresh_until);
        let entry = CacheEntry {
            value,
            fresh_until,
            stale_until,
        };

        match serde_json::to_vec(&entry) {
            Ok(bytes) => {
                if let Err(e) = self.store.put(key, &bytes).await {
                    warn!(key, error = %e, "Cache write failed");
                } else {
                    debug!("Cache PUT for key: {}", key);
                }
            }
            Err(e) => warn!(key, error = %e, "Failed to encode cache entry"),
        }
    }

    /// Single-tier write: a hit until `ttl` elapses, a miss afterwards.
    pub async fn set<T: Serialize>(&self, key: &str, value: &T, ttl: Duration) {
        self.put(key, value, ttl, ttl).await;
    }

    pub async fn read_hot<T: DeserializeOwned>(&self, key: &TieredKey) -> Option<T> {
        self.get(&key.hot).await.fresh()
    }

    pub async fn read_last_good<T: DeserializeOwned>(&self, key: &TieredKey) -> Option<T> {
        self.get(&key.last_good).await.any()
    }

    /// Writes the value through both tiers.
    pub async fn write_through<T: Serialize>(&self, key: &TieredKey, value: &T, ttl: TierTtl) {
        self.set(&key.hot, value, ttl.hot).await;
        self.put(&key.last_good, value, ttl.hot, ttl.last_good)
            .await;
    }

    async fn evict(&self, key: &str) {
        if let Err(e) = self.store.remove(key).await {
            warn!(key, error = %e, "Cache eviction failed");
        }
    }
}
