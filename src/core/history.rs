//! Historical series resolution with staged fallbacks.

use crate::core::cache::{TierTtl, TieredCache, TieredKey};
use crate::core::clock::{DAY_MS, HOUR_MS};
use crate::core::consensus::ConsensusAggregator;
use crate::core::context::{CallContext, ReferenceHistory};
use crate::core::inflight::Inflight;
use crate::core::price::{Interval, PriceProvider, SeriesPoint, normalize_series};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, info, instrument, warn};

pub const HISTORY_UNAVAILABLE: &str = "history_unavailable";

/// How far the stored bars may fall short of either end of the window.
const COVERAGE_TOLERANCE_MS: i64 = 36 * HOUR_MS;

/// How far from the target a point may be to serve as a 24h reference.
const REFERENCE_TOLERANCE_MS: i64 = 6 * HOUR_MS;

/// Pre-aggregated daily bars.
#[async_trait]
pub trait DailyBarStore: Send + Sync {
    /// Bars at or after `since_ms`, ascending.
    async fn daily_bars(&self, id: &str, currency: &str, since_ms: i64) -> Vec<SeriesPoint>;
    async fn record(&self, id: &str, currency: &str, points: &[SeriesPoint]);
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HistoryRequest {
    pub id: String,
    pub currency: String,
    pub days: u32,
    pub interval: Interval,
}

impl HistoryRequest {
    pub fn new(id: &str, currency: &str, days: u32, interval: Interval) -> Self {
        Self {
            id: id.trim().to_lowercase(),
            currency: currency.trim().to_lowercase(),
            days,
            interval,
        }
    }

    pub fn cache_key(&self) -> TieredKey {
        TieredKey::new(
            "hist",
            &format!("{}:{}:{}:{}", self.currency, self.id, self.days, self.interval),
        )
    }
}

fn is_false(b: &bool) -> bool {
    !*b
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HistorySeries {
    pub id: String,
    pub currency: String,
    pub points: Vec<SeriesPoint>,
    pub updated_at: i64,
    #[serde(default, skip_serializing_if = "is_false")]
    pub stale: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Resolution stage a request passed through.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    HotCache,
    DurableStore,
    Provider,
    CoarserInterval,
    Synthesized,
    LastGood,
    Unavailable,
}

/// A resolved series with the stages tried to get it, in order.
#[derive(Debug, Clone, PartialEq)]
pub struct Resolution {
    pub series: HistorySeries,
    pub path: Vec<Stage>,
    pub notes: Vec<String>,
}

impl Resolution {
    pub fn stage(&self) -> Option<Stage> {
        self.path.last().copied()
    }
}

/// Walks the fallback ladder for one series: hot cache, durable daily bars,
/// the provider at the requested interval, the provider one interval coarser,
/// a two-point series synthesized from consensus prices, the last good copy
/// and finally an empty series.
pub struct HistoryResolver {
    provider: Arc<dyn PriceProvider>,
    bars: Arc<dyn DailyBarStore>,
    consensus: Arc<ConsensusAggregator>,
    cache: Arc<TieredCache>,
    ttl: TierTtl,
    inflight: Inflight<Resolution>,
}

impl HistoryResolver {
    pub fn new(
        provider: Arc<dyn PriceProvider>,
        bars: Arc<dyn DailyBarStore>,
        consensus: Arc<ConsensusAggregator>,
        cache: Arc<TieredCache>,
        ttl: TierTtl,
    ) -> Self {
        Self {
            provider,
            bars,
            consensus,
            cache,
            ttl,
            inflight: Inflight::new(),
        }
    }

    /// Never fails; when nothing is available the series is empty with
    /// `error` set to `history_unavailable`.
    #[instrument(name = "ResolveHistory", skip_all, fields(id = %req.id, days = req.days, interval = %req.interval))]
    pub async fn resolve(&self, req: &HistoryRequest) -> Resolution {
        let key = req.cache_key();
        if let Some(series) = self.cache.read_hot::<HistorySeries>(&key).await {
            return Resolution {
                series,
                path: vec![Stage::HotCache],
                notes: Vec::new(),
            };
        }

        self.inflight
            .run(&key.hot, || self.resolve_uncached(req, &key))
            .await
    }

    async fn resolve_uncached(&self, req: &HistoryRequest, key: &TieredKey) -> Resolution {
        let now = self.cache.now_ms();
        let window_start = now - i64::from(req.days) * DAY_MS;
        let mut path = vec![Stage::HotCache];
        let mut notes = Vec::new();

        if req.interval == Interval::Daily && req.days > 1 {
            path.push(Stage::DurableStore);
            let bars = self.bars.daily_bars(&req.id, &req.currency, window_start).await;
            match (bars.first(), bars.last()) {
                (Some(first), Some(last))
                    if bars.len() >= 2
                        && first.t <= window_start + COVERAGE_TOLERANCE_MS
                        && last.t >= now - DAY_MS - COVERAGE_TOLERANCE_MS =>
                {
                    return self.accept(req, key, bars, path, notes).await;
                }
                (Some(first), Some(last)) => notes.push(format!(
                    "durable store: {} bars from {} to {} do not cover window {}..{}",
                    bars.len(),
                    first.t,
                    last.t,
                    window_start,
                    now
                )),
                _ => notes.push("durable store: no bars".to_string()),
            }
        }

        path.push(Stage::Provider);
        let points = self.fetch(req, req.interval, &mut notes).await;
        if points.len() >= 2 {
            return self.accept(req, key, points, path, notes).await;
        }

        if let Some(coarser) = req.interval.coarser() {
            path.push(Stage::CoarserInterval);
            let points = self.fetch(req, coarser, &mut notes).await;
            if points.len() >= 2 {
                return self.accept(req, key, points, path, notes).await;
            }
        }

        if req.days <= 1 {
            path.push(Stage::Synthesized);
            match self.synthesize(req, now).await {
                Some(points) => return self.accept(req, key, points, path, notes).await,
                None => notes.push("synthesis: no live price with a 24h reference".to_string()),
            }
        }

        path.push(Stage::LastGood);
        if let Some(mut series) = self.cache.read_last_good::<HistorySeries>(key).await {
            info!(updated_at = series.updated_at, "Serving last good series");
            series.stale = true;
            return Resolution {
                series,
                path,
                notes,
            };
        }

        warn!("No history available");
        path.push(Stage::Unavailable);
        Resolution {
            series: HistorySeries {
                id: req.id.clone(),
                currency: req.currency.clone(),
                points: Vec::new(),
                updated_at: now,
                stale: false,
                error: Some(HISTORY_UNAVAILABLE.to_string()),
            },
            path,
            notes,
        }
    }

    async fn fetch(&self, req: &HistoryRequest, interval: Interval, notes: &mut Vec<String>) -> Vec<SeriesPoint> {
        match self
            .provider
            .fetch_history(&req.id, &req.currency, req.days, interval)
            .await
        {
            Ok(points) => {
                let points = normalize_series(points);
                if points.len() < 2 {
                    notes.push(format!(
                        "{} {interval}: only {} points",
                        self.provider.name(),
                        points.len()
                    ));
                } else if interval == Interval::Daily {
                    self.bars.record(&req.id, &req.currency, &points).await;
                }
                points
            }
            Err(e) => {
                warn!(error = %e, %interval, "History fetch failed");
                notes.push(format!("{} {interval}: {e}", self.provider.name()));
                Vec::new()
            }
        }
    }

    /// `[(now - 24h, price_24h_ago), (now, price)]` from a detached consensus
    /// batch, so this path never consults history again.
    async fn synthesize(&self, req: &HistoryRequest, now: i64) -> Option<Vec<SeriesPoint>> {
        let batch = self
            .consensus
            .batch(&[req.id.clone()], &req.currency, &CallContext::detached())
            .await;
        let row = batch.row(&req.id).filter(|row| !row.stale)?;
        let (price, then) = (row.price?, row.price_24h_ago?);
        if !(price > 0.0 && then > 0.0) {
            return None;
        }
        debug!(price, then, "Synthesized two-point series");
        Some(vec![
            SeriesPoint {
                t: now - DAY_MS,
                p: then,
            },
            SeriesPoint { t: now, p: price },
        ])
    }

    async fn accept(
        &self,
        req: &HistoryRequest,
        key: &TieredKey,
        points: Vec<SeriesPoint>,
        path: Vec<Stage>,
        notes: Vec<String>,
    ) -> Resolution {
        let series = HistorySeries {
            id: req.id.clone(),
            currency: req.currency.clone(),
            points,
            updated_at: self.cache.now_ms(),
            stale: false,
            error: None,
        };
        self.cache.write_through(key, &series, self.ttl).await;
        debug!(stage = ?path.last(), points = series.points.len(), "Resolved history");
        Resolution {
            series,
            path,
            notes,
        }
    }
}

#[async_trait]
impl ReferenceHistory for HistoryResolver {
    async fn price_near(&self, id: &str, currency: &str, at_ms: i64) -> Option<f64> {
        let resolution = self
            .resolve(&HistoryRequest::new(id, currency, 1, Interval::Hourly))
            .await;
        resolution
            .series
            .points
            .iter()
            .min_by_key(|pt| (pt.t - at_ms).abs())
            .filter(|pt| (pt.t - at_ms).abs() <= REFERENCE_TOLERANCE_MS)
            .map(|pt| pt.p)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::clock::ManualClock;
    use crate::core::error::ProviderError;
    use crate::core::price::ProviderSample;
    use crate::store::bars::BarStore;
    use crate::store::memory::MemoryCollection;
    use std::collections::HashMap;
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    const START: i64 = 1_700_000_000_000;

    /// Scripted history per interval plus a fixed spot quote.
    #[derive(Default)]
    struct ScriptedProvider {
        history: Mutex<HashMap<Interval, Result<Vec<SeriesPoint>, ProviderError>>>,
        quote: Mutex<Option<(f64, Option<f64>)>>,
        history_calls: Mutex<Vec<Interval>>,
        price_calls: AtomicUsize,
    }

    impl ScriptedProvider {
        fn set_history(&self, interval: Interval, result: Result<Vec<SeriesPoint>, ProviderError>) {
            self.history.lock().unwrap().insert(interval, result);
        }

        fn history_calls(&self) -> Vec<Interval> {
            self.history_calls.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl PriceProvider for ScriptedProvider {
        fn name(&self) -> &str {
            "scripted"
        }

        async fn fetch_prices(&self, ids: &[String], _currency: &str) -> Vec<ProviderSample> {
            self.price_calls.fetch_add(1, Ordering::SeqCst);
            let quote = *self.quote.lock().unwrap();
            ids.iter()
                .map(|id| match quote {
                    Some((price, pct)) => ProviderSample {
                        asset_id: id.clone(),
                        price: Some(price),
                        pct_24h: pct,
                        source: "scripted".to_string(),
                    },
                    None => ProviderSample::empty(id, "scripted"),
                })
                .collect()
        }

        async fn fetch_history(
            &self,
            _id: &str,
            _currency: &str,
            _days: u32,
            interval: Interval,
        ) -> Result<Vec<SeriesPoint>, ProviderError> {
            self.history_calls.lock().unwrap().push(interval);
            tokio::time::sleep(Duration::from_millis(5)).await;
            self.history
                .lock()
                .unwrap()
                .get(&interval)
                .cloned()
                .unwrap_or(Ok(Vec::new()))
        }
    }

    struct Fixture {
        resolver: Arc<HistoryResolver>,
        provider: Arc<ScriptedProvider>,
        bars: Arc<BarStore>,
        clock: Arc<ManualClock>,
    }

    fn fixture() -> Fixture {
        let clock = Arc::new(ManualClock::new(START));
        let cache = Arc::new(TieredCache::new(Arc::new(MemoryCollection::new()), clock.clone()));
        let provider = Arc::new(ScriptedProvider::default());
        let bars = Arc::new(BarStore::new(Arc::new(MemoryCollection::new())));
        let consensus = Arc::new(ConsensusAggregator::new(
            vec![provider.clone()],
            cache.clone(),
            TierTtl {
                hot: Duration::from_secs(20),
                last_good: Duration::from_secs(6 * 3600),
            },
        ));
        let resolver = Arc::new(HistoryResolver::new(
            provider.clone(),
            bars.clone(),
            consensus,
            cache,
            TierTtl {
                hot: Duration::from_secs(300),
                last_good: Duration::from_secs(24 * 3600),
            },
        ));
        Fixture {
            resolver,
            provider,
            bars,
            clock,
        }
    }

    fn series(from: i64, step: i64, prices: &[f64]) -> Vec<SeriesPoint> {
        prices
            .iter()
            .enumerate()
            .map(|(i, p)| SeriesPoint {
                t: from + i as i64 * step,
                p: *p,
            })
            .collect()
    }

    #[tokio::test]
    async fn test_provider_series_then_hot_cache() {
        let f = fixture();
        f.provider.set_history(
            Interval::Hourly,
            Ok(series(START - DAY_MS, HOUR_MS, &[1.0, 2.0, 3.0])),
        );
        let req = HistoryRequest::new("Bitcoin", "USD", 1, Interval::Hourly);

        let first = f.resolver.resolve(&req).await;
        assert_eq!(first.stage(), Some(Stage::Provider));
        assert_eq!(first.series.points.len(), 3);
        assert_eq!(first.series.id, "bitcoin");
        assert!(!first.series.stale);

        let second = f.resolver.resolve(&req).await;
        assert_eq!(second.path, vec![Stage::HotCache]);
        assert_eq!(second.series, first.series);
        assert_eq!(f.provider.history_calls(), vec![Interval::Hourly]);
    }

    #[tokio::test]
    async fn test_durable_bars_skip_provider_when_covering_window() {
        let f = fixture();
        let window_start = START - 30 * DAY_MS;
        let prices: Vec<f64> = (0..31).map(|i| 100.0 + i as f64).collect();
        f.bars
            .record("bitcoin", "usd", &series(window_start + HOUR_MS, DAY_MS, &prices))
            .await;

        let out = f
            .resolver
            .resolve(&HistoryRequest::new("bitcoin", "usd", 30, Interval::Daily))
            .await;
        assert_eq!(out.stage(), Some(Stage::DurableStore));
        assert!(out.series.points.len() >= 30);
        assert!(f.provider.history_calls().is_empty());
    }

    #[tokio::test]
    async fn test_outdated_bars_refresh_from_provider() {
        let f = fixture();
        let prices: Vec<f64> = (0..31).map(|i| 100.0 + i as f64).collect();
        f.provider.set_history(
            Interval::Daily,
            Ok(series(START - 30 * DAY_MS, DAY_MS, &prices)),
        );
        let req = HistoryRequest::new("bitcoin", "usd", 30, Interval::Daily);
        let first = f.resolver.resolve(&req).await;
        assert_eq!(first.stage(), Some(Stage::Provider));

        // Ten days on, the window start is still covered but the newest bar is old.
        let later = START + 10 * DAY_MS;
        f.clock.advance_ms(10 * DAY_MS);
        f.provider.set_history(
            Interval::Daily,
            Ok(series(later - 30 * DAY_MS, DAY_MS, &prices)),
        );
        let out = f.resolver.resolve(&req).await;
        assert_eq!(
            out.path,
            vec![Stage::HotCache, Stage::DurableStore, Stage::Provider]
        );
        assert_eq!(out.series.points.last().map(|p| p.t), Some(later));
        assert_eq!(f.provider.history_calls().len(), 2);

        // The refreshed bars answer the next request on their own.
        f.clock.advance_ms(10 * 60_000);
        let again = f.resolver.resolve(&req).await;
        assert_eq!(again.stage(), Some(Stage::DurableStore));
        assert_eq!(f.provider.history_calls().len(), 2);
    }

    #[tokio::test]
    async fn test_partial_bars_fall_through_and_record_fetched_daily() {
        let f = fixture();
        // Only the last five days are on disk.
        f.bars
            .record("bitcoin", "usd", &series(START - 5 * DAY_MS, DAY_MS, &[1.0, 2.0, 3.0]))
            .await;
        f.provider.set_history(
            Interval::Daily,
            Ok(series(START - 30 * DAY_MS, DAY_MS, &[5.0; 31])),
        );

        let out = f
            .resolver
            .resolve(&HistoryRequest::new("bitcoin", "usd", 30, Interval::Daily))
            .await;
        assert_eq!(
            out.path,
            vec![Stage::HotCache, Stage::DurableStore, Stage::Provider]
        );
        assert!(out.notes[0].starts_with("durable store"));

        let stored = f.bars.daily_bars("bitcoin", "usd", 0).await;
        assert!(stored.len() >= 31);
    }

    #[tokio::test]
    async fn test_sparse_series_degrades_to_coarser_interval() {
        let f = fixture();
        f.provider
            .set_history(Interval::Minute, Ok(series(START, 60_000, &[1.0])));
        f.provider.set_history(
            Interval::Hourly,
            Ok(series(START - DAY_MS, HOUR_MS, &[1.0, 1.1, 1.2])),
        );

        let out = f
            .resolver
            .resolve(&HistoryRequest::new("bitcoin", "usd", 1, Interval::Minute))
            .await;
        assert_eq!(out.stage(), Some(Stage::CoarserInterval));
        assert_eq!(out.series.points.len(), 3);
        assert_eq!(
            f.provider.history_calls(),
            vec![Interval::Minute, Interval::Hourly]
        );
    }

    #[tokio::test]
    async fn test_one_day_synthesis_from_consensus() {
        let f = fixture();
        *f.provider.quote.lock().unwrap() = Some((65000.0, Some(2.0)));
        f.provider.set_history(
            Interval::Hourly,
            Err(ProviderError::Status {
                status: 503,
                url: "/coins/bitcoin/market_chart".to_string(),
            }),
        );

        let out = f
            .resolver
            .resolve(&HistoryRequest::new("bitcoin", "usd", 1, Interval::Hourly))
            .await;
        assert_eq!(out.stage(), Some(Stage::Synthesized));
        let points = &out.series.points;
        assert_eq!(points.len(), 2);
        assert_eq!(points[0].t, START - DAY_MS);
        assert_eq!(points[1], SeriesPoint { t: START, p: 65000.0 });
        assert!((points[0].p - 65000.0 / 1.02).abs() < 1e-6);
        assert_eq!(f.provider.price_calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_last_good_then_unavailable() {
        let f = fixture();
        let req = HistoryRequest::new("bitcoin", "usd", 2, Interval::Hourly);
        f.provider.set_history(
            Interval::Hourly,
            Ok(series(START - 2 * DAY_MS, HOUR_MS, &[1.0, 2.0])),
        );
        let good = f.resolver.resolve(&req).await;
        assert_eq!(good.stage(), Some(Stage::Provider));

        f.provider.set_history(Interval::Hourly, Ok(Vec::new()));
        f.clock.advance_ms(10 * 60_000);
        let out = f.resolver.resolve(&req).await;
        assert_eq!(
            out.path,
            vec![
                Stage::HotCache,
                Stage::Provider,
                Stage::CoarserInterval,
                Stage::LastGood
            ]
        );
        assert!(out.series.stale);
        assert_eq!(out.series.points, good.series.points);
        assert_eq!(out.series.updated_at, good.series.updated_at);

        let out = f
            .resolver
            .resolve(&HistoryRequest::new("dogecoin", "usd", 7, Interval::Daily))
            .await;
        assert_eq!(out.stage(), Some(Stage::Unavailable));
        assert!(out.series.points.is_empty());
        assert_eq!(out.series.error.as_deref(), Some(HISTORY_UNAVAILABLE));
    }

    #[tokio::test]
    async fn test_concurrent_resolutions_coalesce() {
        let f = fixture();
        f.provider.set_history(
            Interval::Hourly,
            Ok(series(START - DAY_MS, HOUR_MS, &[1.0, 2.0])),
        );
        let req = HistoryRequest::new("bitcoin", "usd", 1, Interval::Hourly);

        let (a, b) = tokio::join!(f.resolver.resolve(&req), f.resolver.resolve(&req));
        assert_eq!(a.series, b.series);
        assert_eq!(f.provider.history_calls().len(), 1);
    }

    #[tokio::test]
    async fn test_price_near_picks_closest_point() {
        let f = fixture();
        f.provider.set_history(
            Interval::Hourly,
            Ok(series(START - DAY_MS, HOUR_MS, &[10.0, 11.0, 12.0])),
        );

        let near = f
            .resolver
            .price_near("bitcoin", "usd", START - DAY_MS + 50 * 60_000)
            .await;
        assert_eq!(near, Some(11.0));

        let far = f.resolver.price_near("bitcoin", "usd", START + 30 * DAY_MS).await;
        assert_eq!(far, None);
    }
}
