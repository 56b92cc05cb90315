use crate::core::error::ProviderError;
use crate::core::limiter::Limiter;
use crate::core::price::{Interval, PriceProvider, ProviderSample, SeriesPoint, normalize_series};
use crate::providers::fetch::FetchClient;
use crate::providers::registry::IdRegistry;
use anyhow::{Context, Result};
use async_trait::async_trait;
use futures::future::join_all;
use reqwest::Url;
use serde::Deserialize;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, instrument, warn};

pub const NAME: &str = "coingecko";

/// `/simple/price` body: `{"bitcoin": {"usd": 1.0, "usd_24h_change": -0.5}}`.
type SimplePriceResponse = HashMap<String, HashMap<String, Option<f64>>>;

/// `/coins/{id}/market_chart` body; `prices` holds `[epoch_ms, price]` pairs.
#[derive(Debug, Deserialize)]
struct MarketChartResponse {
    prices: Vec<(f64, Option<f64>)>,
}

#[derive(Debug, Clone, Copy, PartialEq)]
struct Quote {
    price: Option<f64>,
    pct_24h: Option<f64>,
}

/// CoinGecko adapter. Every outbound call takes a slot on the shared
/// [`Limiter`].
pub struct CoinGeckoProvider {
    base_url: Url,
    client: FetchClient,
    registry: Arc<IdRegistry>,
    limiter: Limiter,
}

impl CoinGeckoProvider {
    pub fn new(
        base_url: &str,
        client: FetchClient,
        registry: Arc<IdRegistry>,
        limiter: Limiter,
    ) -> Result<Self> {
        let base_url = Url::parse(base_url)
            .with_context(|| format!("Invalid CoinGecko base URL: {base_url}"))?;
        Ok(Self {
            base_url,
            client,
            registry,
            limiter,
        })
    }

    fn endpoint(&self, segments: &[&str], params: &[(&str, &str)]) -> Result<Url, ProviderError> {
        let mut url = self.base_url.clone();
        {
            let mut path = url
                .path_segments_mut()
                .map_err(|_| ProviderError::Network(format!("invalid base URL: {}", self.base_url)))?;
            path.pop_if_empty().extend(segments);
        }
        url.query_pairs_mut().extend_pairs(params);
        Ok(url)
    }

    /// One `/simple/price` call. Keys of the result are canonical ids.
    async fn fetch_quotes(
        &self,
        ids: &[String],
        currency: &str,
    ) -> Result<HashMap<String, Quote>, ProviderError> {
        let provider_ids: Vec<String> = ids
            .iter()
            .map(|id| self.registry.provider_id(NAME, id))
            .collect();
        let joined = provider_ids.join(",");
        let url = self.endpoint(
            &["simple", "price"],
            &[
                ("ids", joined.as_str()),
                ("vs_currencies", currency),
                ("include_24hr_change", "true"),
            ],
        )?;

        let response: SimplePriceResponse = self.client.fetch_json(&url).await?;
        let change_key = format!("{currency}_24h_change");

        let mut quotes = HashMap::new();
        for (id, provider_id) in ids.iter().zip(&provider_ids) {
            let Some(fields) = response.get(provider_id) else {
                continue;
            };
            let price = fields
                .get(currency)
                .copied()
                .flatten()
                .filter(|p| p.is_finite() && *p > 0.0);
            let pct_24h = fields
                .get(&change_key)
                .copied()
                .flatten()
                .filter(|p| p.is_finite() && *p > -100.0);
            if price.is_some() {
                quotes.insert(id.clone(), Quote { price, pct_24h });
            }
        }
        Ok(quotes)
    }
}

#[async_trait]
impl PriceProvider for CoinGeckoProvider {
    fn name(&self) -> &str {
        NAME
    }

    #[instrument(name = "CoinGeckoPrices", skip(self, ids), fields(count = ids.len()))]
    async fn fetch_prices(&self, ids: &[String], currency: &str) -> Vec<ProviderSample> {
        if ids.is_empty() {
            return Vec::new();
        }
        let currency = currency.to_lowercase();

        let mut quotes = match self.limiter.run(self.fetch_quotes(ids, &currency)).await {
            Ok(quotes) => quotes,
            Err(e) => {
                // Already retried; fanning out per id would only multiply the load.
                warn!(error = %e, "CoinGecko batch price request failed");
                return ids.iter().map(|id| ProviderSample::empty(id, NAME)).collect();
            }
        };

        // A uniformly empty batch is often one bad id poisoning the call.
        if quotes.is_empty() && ids.len() > 1 {
            debug!("Batch returned no prices, retrying per id");
            let singles = ids.iter().map(|id| {
                let currency = currency.as_str();
                async move {
                    let single = std::slice::from_ref(id);
                    match self.limiter.run(self.fetch_quotes(single, currency)).await {
                        Ok(found) => found,
                        Err(e) => {
                            debug!(id = %id, error = %e, "Per-id price request failed");
                            HashMap::new()
                        }
                    }
                }
            });
            for found in join_all(singles).await {
                quotes.extend(found);
            }
        }

        ids.iter()
            .map(|id| match quotes.get(id) {
                Some(quote) => ProviderSample {
                    asset_id: id.clone(),
                    price: quote.price,
                    pct_24h: quote.pct_24h,
                    source: NAME.to_string(),
                },
                None => ProviderSample::empty(id, NAME),
            })
            .collect()
    }

    #[instrument(name = "CoinGeckoHistory", skip_all, fields(id = %id, days = days, interval = %interval))]
    async fn fetch_history(
        &self,
        id: &str,
        currency: &str,
        days: u32,
        interval: Interval,
    ) -> Result<Vec<SeriesPoint>, ProviderError> {
        let provider_id = self.registry.provider_id(NAME, id);
        let currency = currency.to_lowercase();
        let days = days.to_string();
        let mut params = vec![("vs_currency", currency.as_str()), ("days", days.as_str())];
        // Finer granularities are picked automatically from the window length.
        if interval == Interval::Daily {
            params.push(("interval", "daily"));
        }
        let url = self.endpoint(&["coins", provider_id.as_str(), "market_chart"], &params)?;

        let response: MarketChartResponse =
            self.limiter.run(self.client.fetch_json(&url)).await?;
        let points = response
            .prices
            .into_iter()
            .filter_map(|(t, p)| {
                let p = p?;
                t.is_finite().then_some(SeriesPoint { t: t as i64, p })
            })
            .collect();
        Ok(normalize_series(points))
    }
}
