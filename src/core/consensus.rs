//! Multi-provider consensus prices.

use crate::core::cache::{TierTtl, TieredCache, TieredKey};
use crate::core::clock::DAY_MS;
use crate::core::context::CallContext;
use crate::core::inflight::Inflight;
use crate::core::price::{
    CONSENSUS_SOURCE, ConsensusBatch, PricePoint, PriceProvider, ProviderSample,
};
use futures::future::join_all;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, info, instrument, warn};

/// Aggregate of one asset's samples.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Consensus {
    pub price: Option<f64>,
    /// Inter-provider agreement in [0, 1].
    pub quality: f64,
}

fn median_of_sorted(sorted: &[f64]) -> f64 {
    let mid = sorted.len() / 2;
    if sorted.len() % 2 == 0 {
        (sorted[mid - 1] + sorted[mid]) / 2.0
    } else {
        sorted[mid]
    }
}

/// Median after dropping the lowest and highest 20% of the finite positive
/// values, with a dispersion-based quality score.
pub fn trimmed_median(values: &[f64]) -> Consensus {
    let mut sorted: Vec<f64> = values
        .iter()
        .copied()
        .filter(|v| v.is_finite() && *v > 0.0)
        .collect();
    if sorted.is_empty() {
        return Consensus {
            price: None,
            quality: 0.0,
        };
    }
    sorted.sort_by(f64::total_cmp);

    let cut = sorted.len() / 5;
    let trimmed = if sorted.len() > 2 * cut {
        &sorted[cut..sorted.len() - cut]
    } else {
        &sorted[..]
    };

    let median = median_of_sorted(trimmed);
    let spread = (trimmed[trimmed.len() - 1] - trimmed[0]) / median;
    Consensus {
        price: Some(median),
        quality: (1.0 - spread).clamp(0.0, 1.0),
    }
}

/// Median of the finite values, if any.
fn median(values: impl Iterator<Item = f64>) -> Option<f64> {
    let mut sorted: Vec<f64> = values.filter(|v| v.is_finite()).collect();
    if sorted.is_empty() {
        return None;
    }
    sorted.sort_by(f64::total_cmp);
    Some(median_of_sorted(&sorted))
}

fn fold_samples(id: &str, samples: &[&ProviderSample]) -> PricePoint {
    let prices: Vec<f64> = samples.iter().filter_map(|s| s.usable_price()).collect();
    let consensus = trimmed_median(&prices);

    // Provider-reported change, only from providers that also had a price.
    let pct_24h = median(
        samples
            .iter()
            .filter(|s| s.usable_price().is_some())
            .filter_map(|s| s.pct_24h),
    )
    .filter(|pct| *pct > -100.0);
    let price_24h_ago = consensus
        .price
        .zip(pct_24h)
        .map(|(price, pct)| price / (1.0 + pct / 100.0));

    PricePoint {
        id: id.to_string(),
        price: consensus.price,
        price_24h_ago,
        pct_24h: consensus.price.and(pct_24h),
        source: CONSENSUS_SOURCE.to_string(),
        stale: false,
        quality: consensus.quality,
    }
}

pub fn batch_key(currency: &str, ids: &[String]) -> TieredKey {
    let rest = format!("{}:{}", currency, ids.join(","));
    TieredKey {
        hot: format!("price:live:{rest}"),
        last_good: format!("price:lastgood:{rest}"),
    }
}

pub fn mirror_key(currency: &str, id: &str) -> String {
    format!("price:id:{currency}:{id}")
}

/// Folds same-asset samples from every provider into consensus prices,
/// caching batches at both tiers.
pub struct ConsensusAggregator {
    providers: Vec<Arc<dyn PriceProvider>>,
    cache: Arc<TieredCache>,
    ttl: TierTtl,
    inflight: Inflight<ConsensusBatch>,
}

impl ConsensusAggregator {
    pub fn new(providers: Vec<Arc<dyn PriceProvider>>, cache: Arc<TieredCache>, ttl: TierTtl) -> Self {
        let names: Vec<&str> = providers.iter().map(|p| p.name()).collect();
        debug!("Consensus over providers: {}", names.join(", "));
        Self {
            providers,
            cache,
            ttl,
            inflight: Inflight::new(),
        }
    }

    /// Consensus prices for `ids`, never failing: unresolvable ids come back
    /// with `price: None`, and a total outage serves the last good batch
    /// flagged stale.
    #[instrument(name = "ConsensusBatch", skip(self, ids, ctx), fields(count = ids.len(), reference = ctx.allows_reference()))]
    pub async fn batch(&self, ids: &[String], currency: &str, ctx: &CallContext) -> ConsensusBatch {
        let currency = currency.to_lowercase();
        let mut ids: Vec<String> = ids.iter().map(|id| id.trim().to_lowercase()).collect();
        ids.retain(|id| !id.is_empty());
        ids.sort();
        ids.dedup();

        if ids.is_empty() {
            return ConsensusBatch {
                rows: Vec::new(),
                updated_at: self.cache.now_ms(),
            };
        }

        let key = batch_key(&currency, &ids);
        if let Some(hit) = self.cache.read_hot::<ConsensusBatch>(&key).await {
            return hit;
        }

        let flight = format!("{}|{}", key.hot, ctx.allows_reference());
        self.inflight
            .run(&flight, || self.compute(&ids, &currency, &key, ctx))
            .await
    }

    async fn compute(
        &self,
        ids: &[String],
        currency: &str,
        key: &TieredKey,
        ctx: &CallContext,
    ) -> ConsensusBatch {
        let now = self.cache.now_ms();

        let per_provider = join_all(
            self.providers
                .iter()
                .map(|provider| provider.fetch_prices(ids, currency)),
        )
        .await;

        let mut by_id: HashMap<&str, Vec<&ProviderSample>> = HashMap::new();
        for sample in per_provider.iter().flatten() {
            by_id.entry(sample.asset_id.as_str()).or_default().push(sample);
        }

        let mut rows: Vec<PricePoint> = ids
            .iter()
            .map(|id| fold_samples(id, by_id.get(id.as_str()).map_or(&[][..], |s| s.as_slice())))
            .collect();

        if !rows.iter().any(|r| r.price.is_some()) {
            warn!(currency, ids = %ids.join(","), "No provider returned a price");
            return self.serve_stale(ids, currency, key).await;
        }

        if let Some(reference) = ctx.reference() {
            let target = now - DAY_MS;
            let lookups = rows
                .iter()
                .enumerate()
                .filter(|(_, row)| row.price.is_some() && row.price_24h_ago.is_none())
                .map(|(idx, row)| async move {
                    (idx, reference.price_near(&row.id, currency, target).await)
                });
            let resolved = join_all(lookups).await;
            for (idx, reference_price) in resolved {
                let row = &mut rows[idx];
                if let (Some(price), Some(then)) = (row.price, reference_price.filter(|p| *p > 0.0)) {
                    row.price_24h_ago = Some(then);
                    row.pct_24h = Some((price / then - 1.0) * 100.0);
                }
            }
        }

        for row in rows.iter_mut().filter(|r| r.price.is_none()) {
            if let Some(mirror) = self
                .cache
                .get::<PricePoint>(&mirror_key(currency, &row.id))
                .await
                .any()
            {
                debug!(id = %row.id, "Filling missing price from last good mirror");
                *row = PricePoint {
                    stale: true,
                    ..mirror
                };
            }
        }

        let batch = ConsensusBatch {
            rows,
            updated_at: now,
        };

        // Without a reference lookup the rows may lack 24h data; keep them out
        // of the shared batch tiers.
        if ctx.allows_reference() {
            self.cache.write_through(key, &batch, self.ttl).await;
        }
        for row in batch.rows.iter().filter(|r| r.price.is_some() && !r.stale) {
            self.cache
                .put(&mirror_key(currency, &row.id), row, self.ttl.hot, self.ttl.last_good)
                .await;
        }
        batch
    }

    async fn serve_stale(&self, ids: &[String], currency: &str, key: &TieredKey) -> ConsensusBatch {
        if let Some(mut last_good) = self.cache.read_last_good::<ConsensusBatch>(key).await {
            info!(updated_at = last_good.updated_at, "Serving last good batch");
            for row in &mut last_good.rows {
                row.stale = true;
            }
            return last_good;
        }

        let mut rows = Vec::with_capacity(ids.len());
        for id in ids {
            let row = match self
                .cache
                .get::<PricePoint>(&mirror_key(currency, id))
                .await
                .any()
            {
                Some(mirror) => PricePoint {
                    stale: true,
                    ..mirror
                },
                None => PricePoint::unavailable(id),
            };
            rows.push(row);
        }
        ConsensusBatch {
            rows,
            updated_at: self.cache.now_ms(),
        }
    }
}
