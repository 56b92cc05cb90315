use crate::core::cache::KeyValueCollection;
use crate::core::clock::DAY_MS;
use crate::core::history::DailyBarStore;
use crate::core::price::SeriesPoint;
use async_trait::async_trait;
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{debug, warn};

/// Oldest bars beyond this count are dropped on write.
const MAX_BARS: usize = 3650;

/// Pre-aggregated daily closes, one per UTC day, keyed by `(currency, id)`.
pub struct BarStore {
    collection: Arc<dyn KeyValueCollection>,
}

impl BarStore {
    pub fn new(collection: Arc<dyn KeyValueCollection>) -> Self {
        Self { collection }
    }

    fn key(id: &str, currency: &str) -> String {
        format!("bars:{currency}:{id}")
    }

    async fn load(&self, key: &str) -> BTreeMap<i64, f64> {
        match self.collection.get(key).await {
            Ok(Some(bytes)) => serde_json::from_slice(&bytes).unwrap_or_else(|e| {
                warn!(key, error = %e, "Discarding undecodable bars");
                BTreeMap::new()
            }),
            Ok(None) => BTreeMap::new(),
            Err(e) => {
                warn!(key, error = %e, "Failed to read bars");
                BTreeMap::new()
            }
        }
    }
}

#[async_trait]
impl DailyBarStore for BarStore {
    async fn daily_bars(&self, id: &str, currency: &str, since_ms: i64) -> Vec<SeriesPoint> {
        let bars = self.load(&Self::key(id, currency)).await;
        bars.range(since_ms..)
            .map(|(t, p)| SeriesPoint { t: *t, p: *p })
            .collect()
    }

    async fn record(&self, id: &str, currency: &str, points: &[SeriesPoint]) {
        if points.is_empty() {
            return;
        }
        let key = Self::key(id, currency);
        let mut bars = self.load(&key).await;
        for point in points.iter().filter(|pt| pt.p.is_finite() && pt.p > 0.0) {
            // Last observation of a day is its close.
            bars.insert(point.t - point.t.rem_euclid(DAY_MS), point.p);
        }
        while bars.len() > MAX_BARS {
            bars.pop_first();
        }

        match serde_json::to_vec(&bars) {
            Ok(bytes) => match self.collection.put(&key, &bytes).await {
                Ok(()) => debug!(key, count = bars.len(), "Recorded daily bars"),
                Err(e) => warn!(key, error = %e, "Failed to write bars"),
            },
            Err(e) => warn!(key, error = %e, "Failed to encode bars"),
        }
    }
}
