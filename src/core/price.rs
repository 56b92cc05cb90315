//! Pricing abstractions and core types

use crate::core::error::ProviderError;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt::Display;
use std::str::FromStr;

pub const CONSENSUS_SOURCE: &str = "consensus";

/// Sampling granularity of a historical series.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Ord, PartialOrd, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Interval {
    Minute,
    Hourly,
    Daily,
}

impl Display for Interval {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{}",
            match self {
                Interval::Minute => "minute",
                Interval::Hourly => "hourly",
                Interval::Daily => "daily",
            }
        )
    }
}

impl Interval {
    /// Next coarser granularity, `None` when already the coarsest.
    pub fn coarser(&self) -> Option<Interval> {
        match self {
            Interval::Minute => Some(Interval::Hourly),
            Interval::Hourly => Some(Interval::Daily),
            Interval::Daily => None,
        }
    }
}

impl FromStr for Interval {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "minute" | "1m" => Ok(Interval::Minute),
            "hourly" | "hour" | "1h" => Ok(Interval::Hourly),
            "daily" | "day" | "1d" => Ok(Interval::Daily),
            _ => Err(anyhow::anyhow!("Invalid interval: {}", s)),
        }
    }
}

/// One observation in a historical series.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SeriesPoint {
    /// Epoch milliseconds.
    pub t: i64,
    pub p: f64,
}

/// Sorts by time, drops non-positive or non-finite prices and keeps the last
/// observation for duplicated timestamps.
pub fn normalize_series(mut points: Vec<SeriesPoint>) -> Vec<SeriesPoint> {
    points.retain(|pt| pt.p.is_finite() && pt.p > 0.0);
    points.sort_by_key(|pt| pt.t);

    let mut out: Vec<SeriesPoint> = Vec::with_capacity(points.len());
    for pt in points {
        match out.last_mut() {
            Some(last) if last.t == pt.t => *last = pt,
            _ => out.push(pt),
        }
    }
    out
}

/// Raw observation of one asset from one provider, before aggregation.
#[derive(Debug, Clone, PartialEq)]
pub struct ProviderSample {
    pub asset_id: String,
    pub price: Option<f64>,
    pub pct_24h: Option<f64>,
    pub source: String,
}

impl ProviderSample {
    pub fn empty(asset_id: &str, source: &str) -> Self {
        Self {
            asset_id: asset_id.to_string(),
            price: None,
            pct_24h: None,
            source: source.to_string(),
        }
    }

    /// Price if it is usable for aggregation.
    pub fn usable_price(&self) -> Option<f64> {
        self.price.filter(|p| p.is_finite() && *p > 0.0)
    }
}

/// Consensus price of one asset.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PricePoint {
    pub id: String,
    pub price: Option<f64>,
    pub price_24h_ago: Option<f64>,
    pub pct_24h: Option<f64>,
    pub source: String,
    pub stale: bool,
    pub quality: f64,
}

impl PricePoint {
    pub fn unavailable(id: &str) -> Self {
        Self {
            id: id.to_string(),
            price: None,
            price_24h_ago: None,
            pct_24h: None,
            source: CONSENSUS_SOURCE.to_string(),
            stale: false,
            quality: 0.0,
        }
    }
}

/// Unit of work and unit of caching for live prices.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConsensusBatch {
    pub rows: Vec<PricePoint>,
    /// Epoch milliseconds of the computation that produced the rows.
    pub updated_at: i64,
}

impl ConsensusBatch {
    pub fn row(&self, id: &str) -> Option<&PricePoint> {
        self.rows.iter().find(|r| r.id == id)
    }

    pub fn has_any_price(&self) -> bool {
        self.rows.iter().any(|r| r.price.is_some())
    }
}

/// An upstream market data source.
///
/// Implementations never fail a whole batch for one unresolved id: such ids
/// come back as samples with `price: None`.
#[async_trait]
pub trait PriceProvider: Send + Sync {
    fn name(&self) -> &str;

    async fn fetch_prices(&self, ids: &[String], currency: &str) -> Vec<ProviderSample>;

    async fn fetch_history(
        &self,
        id: &str,
        currency: &str,
        days: u32,
        interval: Interval,
    ) -> Result<Vec<SeriesPoint>, ProviderError>;
}
