//! Wires providers, caches and resolvers into one injectable service.

use crate::core::cache::TieredCache;
use crate::core::clock::Clock;
use crate::core::config::AppConfig;
use crate::core::consensus::ConsensusAggregator;
use crate::core::context::CallContext;
use crate::core::error::ValidationError;
use crate::core::history::{DailyBarStore, HistoryRequest, HistoryResolver, Resolution};
use crate::core::limiter::Limiter;
use crate::core::price::{ConsensusBatch, Interval, PriceProvider};
use crate::core::risk::{RiskAggregator, RiskReport, normalize_weights};
use crate::providers::coingecko::{self, CoinGeckoProvider};
use crate::providers::fetch::FetchClient;
use crate::providers::registry::IdRegistry;
use crate::providers::unavailable::UnavailableProvider;
use crate::store::KeyValueStore;
use crate::store::bars::BarStore;
use anyhow::Result;
use std::sync::Arc;
use tracing::{debug, info};

/// Price and history feed. Cheap to share behind an `Arc`.
pub struct Engine {
    registry: Arc<IdRegistry>,
    consensus: Arc<ConsensusAggregator>,
    history: Arc<HistoryResolver>,
    risk: RiskAggregator,
    currency: String,
}

impl Engine {
    pub fn from_config(config: &AppConfig, store: &KeyValueStore, clock: Arc<dyn Clock>) -> Result<Self> {
        let mut registry = IdRegistry::with_defaults();
        for (alias, id) in &config.providers.aliases {
            registry.add_alias(alias, id);
        }
        for (id, provider_id) in &config.providers.coingecko.ids {
            registry.add_provider_id(coingecko::NAME, id, provider_id);
        }
        let registry = Arc::new(registry);

        let cg = &config.providers.coingecko;
        let client = FetchClient::new(
            &config.providers.user_agent,
            cg.api_key
                .as_deref()
                .map(|key| (cg.api_key_header.as_str(), key)),
            config.fetch.policy(),
        )?;
        let primary: Arc<dyn PriceProvider> = Arc::new(CoinGeckoProvider::new(
            &cg.base_url,
            client,
            registry.clone(),
            Limiter::new(cg.concurrency),
        )?);

        let mut providers = vec![primary.clone()];
        for name in &config.providers.secondary {
            providers.push(Arc::new(UnavailableProvider::new(name)) as Arc<dyn PriceProvider>);
        }
        info!(
            "Primary provider {} at {}, {} secondary",
            coingecko::NAME,
            cg.base_url,
            config.providers.secondary.len()
        );

        let cache = Arc::new(TieredCache::new(store.collection("cache"), clock));
        let bars: Arc<dyn DailyBarStore> = Arc::new(BarStore::new(store.collection("bars")));
        Ok(Self::new(registry, providers, primary, bars, cache, config))
    }

    /// Builds the engine over already constructed parts. `primary` serves
    /// history; `providers` take part in price consensus.
    pub fn new(
        registry: Arc<IdRegistry>,
        providers: Vec<Arc<dyn PriceProvider>>,
        primary: Arc<dyn PriceProvider>,
        bars: Arc<dyn DailyBarStore>,
        cache: Arc<TieredCache>,
        config: &AppConfig,
    ) -> Self {
        let consensus = Arc::new(ConsensusAggregator::new(
            providers,
            cache.clone(),
            config.cache.price_ttl(),
        ));
        let history = Arc::new(HistoryResolver::new(
            primary,
            bars,
            consensus.clone(),
            cache.clone(),
            config.cache.history_ttl(),
        ));
        let risk = RiskAggregator::new(
            history.clone(),
            cache,
            config.cache.risk_ttl(),
            config.risk.clone(),
        );
        Self {
            registry,
            consensus,
            history,
            risk,
            currency: config.currency.to_lowercase(),
        }
    }

    pub fn default_currency(&self) -> &str {
        &self.currency
    }

    /// Consensus prices with 24h references, looking history up for assets
    /// whose providers report no change.
    pub async fn prices<S: AsRef<str>>(&self, ids: &[S], currency: &str) -> ConsensusBatch {
        let ids = self.registry.normalize_ids(ids);
        debug!("Pricing {} ids in {}", ids.len(), currency);
        let ctx = CallContext::with_reference(self.history.clone());
        self.consensus.batch(&ids, currency, &ctx).await
    }

    pub async fn history(&self, id: &str, currency: &str, days: u32, interval: Interval) -> Resolution {
        let req = HistoryRequest::new(&self.registry.canonical(id), currency, days, interval);
        self.history.resolve(&req).await
    }

    pub async fn risk<S: AsRef<str>>(
        &self,
        ids: &[S],
        values: &[f64],
        currency: &str,
        days: u32,
    ) -> Result<RiskReport, ValidationError> {
        let ids: Vec<String> = ids
            .iter()
            .map(|id| self.registry.canonical(id.as_ref()))
            .collect();
        let holdings = normalize_weights(&ids, values)?;
        Ok(self.risk.assess(&holdings, currency, days).await)
    }
}
