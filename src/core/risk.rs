//! Portfolio risk scoring over resolved history.
//!
//! A two-point synthesized series is not history: every factor here demands
//! its own minimum length and reports `None` below it.

use crate::core::cache::TieredCache;
use crate::core::clock::DAY_MS;
use crate::core::config::RiskConfig;
use crate::core::error::ValidationError;
use crate::core::history::{HistoryRequest, HistoryResolver, HistorySeries};
use crate::core::price::{Interval, SeriesPoint};
use futures::future::join_all;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, instrument};

/// Points needed for 30 daily log returns.
pub const VOLATILITY_POINTS: usize = 31;
pub const SMA_POINTS: usize = 20;
const MIN_CORRELATION_RETURNS: usize = 10;
/// History window requested when the caller asks for less.
const MIN_HISTORY_DAYS: u32 = 35;
const MAX_VOLATILITY: f64 = 5.0;

/// One holding with its share of the portfolio.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Holding {
    pub id: String,
    pub weight: f64,
}

/// Normalizes position values into weights summing to 1, merging duplicate
/// ids and ordering by id.
pub fn normalize_weights(ids: &[String], values: &[f64]) -> Result<Vec<Holding>, ValidationError> {
    if ids.is_empty() {
        return Err(ValidationError::Missing("ids"));
    }
    if ids.len() != values.len() {
        return Err(ValidationError::Invalid {
            field: "values",
            value: format!("{} values for {} ids", values.len(), ids.len()),
        });
    }

    let mut merged: BTreeMap<String, f64> = BTreeMap::new();
    for (id, value) in ids.iter().zip(values) {
        if !value.is_finite() || *value < 0.0 {
            return Err(ValidationError::Invalid {
                field: "values",
                value: value.to_string(),
            });
        }
        *merged.entry(id.trim().to_lowercase()).or_default() += value;
    }

    let total: f64 = merged.values().sum();
    if total <= 0.0 {
        return Err(ValidationError::Invalid {
            field: "values",
            value: "total must be positive".to_string(),
        });
    }
    Ok(merged
        .into_iter()
        .map(|(id, value)| Holding {
            id,
            weight: value / total,
        })
        .collect())
}

/// Stable fingerprint of an allocation, insensitive to input order and scale.
pub fn allocation_hash(holdings: &[Holding]) -> String {
    let mut hasher = Sha256::new();
    for holding in holdings {
        hasher.update(format!("{}={:.6};", holding.id, holding.weight));
    }
    hex::encode(&hasher.finalize()[..8])
}

fn log_returns(prices: &[f64]) -> Vec<f64> {
    prices.windows(2).map(|w| (w[1] / w[0]).ln()).collect()
}

fn mean(values: &[f64]) -> f64 {
    values.iter().sum::<f64>() / values.len() as f64
}

fn population_stdev(values: &[f64]) -> f64 {
    let m = mean(values);
    (values.iter().map(|v| (v - m).powi(2)).sum::<f64>() / values.len() as f64).sqrt()
}

/// Annualized volatility of the last 30 daily log returns, clamped to [0, 5].
pub fn annualized_volatility(points: &[SeriesPoint]) -> Option<f64> {
    if points.len() < VOLATILITY_POINTS {
        return None;
    }
    let prices: Vec<f64> = points[points.len() - VOLATILITY_POINTS..]
        .iter()
        .map(|pt| pt.p)
        .collect();
    let vol = population_stdev(&log_returns(&prices)) * 365f64.sqrt();
    Some(vol.clamp(0.0, MAX_VOLATILITY))
}

/// Whether the latest price broke below the 20-period SMA minus two standard
/// deviations.
pub fn tail_active(points: &[SeriesPoint]) -> Option<bool> {
    if points.len() < SMA_POINTS {
        return None;
    }
    let prices: Vec<f64> = points[points.len() - SMA_POINTS..]
        .iter()
        .map(|pt| pt.p)
        .collect();
    let band = mean(&prices) - 2.0 * population_stdev(&prices);
    prices.last().map(|latest| *latest < band)
}

fn daily_closes(points: &[SeriesPoint]) -> BTreeMap<i64, f64> {
    points
        .iter()
        .map(|pt| (pt.t - pt.t.rem_euclid(DAY_MS), pt.p))
        .collect()
}

/// Pearson correlation of daily log returns over the trailing `window`
/// returns both series share.
pub fn correlation(a: &[SeriesPoint], b: &[SeriesPoint], window: usize) -> Option<f64> {
    let a = daily_closes(a);
    let b = daily_closes(b);
    let (xs, ys): (Vec<f64>, Vec<f64>) = a
        .iter()
        .filter_map(|(day, pa)| b.get(day).map(|pb| (*pa, *pb)))
        .unzip();

    let mut rx = log_returns(&xs);
    let mut ry = log_returns(&ys);
    if rx.len() > window {
        rx.drain(..rx.len() - window);
        ry.drain(..ry.len() - window);
    }
    if rx.len() < MIN_CORRELATION_RETURNS {
        return None;
    }

    let (mx, my) = (mean(&rx), mean(&ry));
    let cov: f64 = rx.iter().zip(&ry).map(|(x, y)| (x - mx) * (y - my)).sum();
    let vx: f64 = rx.iter().map(|x| (x - mx).powi(2)).sum();
    let vy: f64 = ry.iter().map(|y| (y - my).powi(2)).sum();
    if vx == 0.0 || vy == 0.0 {
        return None;
    }
    Some((cov / (vx * vy).sqrt()).clamp(-1.0, 1.0))
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AssetRisk {
    pub id: String,
    pub weight: f64,
    pub points: usize,
    pub volatility: Option<f64>,
    pub tail: Option<bool>,
    pub correlation: Option<f64>,
    pub liquidity_tier: u8,
    pub stale: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RiskReport {
    pub currency: String,
    pub days: u32,
    pub allocation_hash: String,
    pub assets: Vec<AssetRisk>,
    /// Weighted volatility of the holdings that have enough history.
    pub volatility: Option<f64>,
    /// Portfolio share currently in tail activation.
    pub tail: f64,
    pub correlation: Option<f64>,
    pub liquidity: f64,
    pub score: Option<f64>,
    pub updated_at: i64,
}

/// Weighted mean over the holdings where `value` is known, renormalized.
fn weighted<F: Fn(&AssetRisk) -> Option<f64>>(assets: &[AssetRisk], value: F) -> Option<f64> {
    let (sum, weight) = assets
        .iter()
        .filter_map(|a| value(a).map(|v| (v * a.weight, a.weight)))
        .fold((0.0, 0.0), |(s, w), (v, aw)| (s + v, w + aw));
    (weight > 0.0).then(|| sum / weight)
}

/// Combines per-asset factors into portfolio factors and a composite score.
pub fn compose(
    currency: &str,
    days: u32,
    allocation_hash: String,
    assets: Vec<AssetRisk>,
    config: &RiskConfig,
    updated_at: i64,
) -> RiskReport {
    let volatility = weighted(&assets, |a| a.volatility);
    let correlation = weighted(&assets, |a| a.correlation);
    let tail: f64 = assets
        .iter()
        .filter(|a| a.tail == Some(true))
        .map(|a| a.weight)
        .sum();
    let liquidity: f64 = assets
        .iter()
        .map(|a| a.weight * config.multiplier(a.liquidity_tier))
        .sum();

    let score = volatility.map(|vol| {
        vol * (1.0 + tail) * (1.0 + correlation.unwrap_or(0.0).max(0.0) / 2.0) * liquidity
    });

    RiskReport {
        currency: currency.to_string(),
        days,
        allocation_hash,
        assets,
        volatility,
        tail,
        correlation,
        liquidity,
        score,
        updated_at,
    }
}

pub struct RiskAggregator {
    history: Arc<HistoryResolver>,
    cache: Arc<TieredCache>,
    ttl: Duration,
    config: RiskConfig,
}

impl RiskAggregator {
    pub fn new(history: Arc<HistoryResolver>, cache: Arc<TieredCache>, ttl: Duration, config: RiskConfig) -> Self {
        Self {
            history,
            cache,
            ttl,
            config,
        }
    }

    #[instrument(name = "PortfolioRisk", skip(self, holdings), fields(count = holdings.len()))]
    pub async fn assess(&self, holdings: &[Holding], currency: &str, days: u32) -> RiskReport {
        let currency = currency.to_lowercase();
        let hash = allocation_hash(holdings);
        let key = format!("risk:{currency}:{days}:{hash}");
        if let Some(report) = self.cache.get::<RiskReport>(&key).await.fresh() {
            return report;
        }

        let window = days.max(MIN_HISTORY_DAYS);
        let mut wanted: Vec<&str> = holdings.iter().map(|h| h.id.as_str()).collect();
        wanted.push(&self.config.reference_asset);
        let unique: HashSet<&str> = wanted.into_iter().collect();

        let cur = currency.as_str();
        let resolved = join_all(unique.into_iter().map(|id| async move {
            let req = HistoryRequest::new(id, cur, window, Interval::Daily);
            (id, self.history.resolve(&req).await.series)
        }))
        .await;
        let by_id: HashMap<&str, &HistorySeries> =
            resolved.iter().map(|(id, series)| (*id, series)).collect();

        let reference = by_id.get(self.config.reference_asset.as_str()).copied();
        let corr_window = self.config.correlation_window_days as usize;
        let assets: Vec<AssetRisk> = holdings
            .iter()
            .map(|holding| {
                let series = by_id.get(holding.id.as_str()).copied();
                let points = series.map_or(&[][..], |s| s.points.as_slice());
                let correlation = reference.and_then(|r| correlation(points, &r.points, corr_window));
                AssetRisk {
                    id: holding.id.clone(),
                    weight: holding.weight,
                    points: points.len(),
                    volatility: annualized_volatility(points),
                    tail: tail_active(points),
                    correlation,
                    liquidity_tier: self.config.tier(&holding.id),
                    stale: series.is_some_and(|s| s.stale),
                }
            })
            .collect();

        let report = compose(&currency, days, hash, assets, &self.config, self.cache.now_ms());
        if report.score.is_some() {
            self.cache.set(&key, &report, self.ttl).await;
        } else {
            debug!("Not caching risk report without a score");
        }
        report
    }
}
