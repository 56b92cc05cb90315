use std::collections::HashMap;

/// Maps canonical asset ids to provider-specific ids.
///
/// Canonical ids are lowercase slugs (`bitcoin`, `ethereum`). Common ticker
/// symbols are accepted as aliases. Ids without an explicit mapping are passed
/// through unchanged.
#[derive(Debug, Clone, Default)]
pub struct IdRegistry {
    aliases: HashMap<String, String>,
    provider_ids: HashMap<(String, String), String>,
}

const DEFAULT_ALIASES: &[(&str, &str)] = &[
    ("btc", "bitcoin"),
    ("eth", "ethereum"),
    ("sol", "solana"),
    ("usdt", "tether"),
    ("usdc", "usd-coin"),
    ("bnb", "binancecoin"),
    ("xrp", "ripple"),
    ("ada", "cardano"),
    ("doge", "dogecoin"),
    ("dot", "polkadot"),
    ("avax", "avalanche-2"),
    ("matic", "matic-network"),
    ("pol", "matic-network"),
    ("link", "chainlink"),
    ("paxg", "pax-gold"),
];

impl IdRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry preloaded with the common ticker aliases.
    pub fn with_defaults() -> Self {
        let mut registry = Self::new();
        for (alias, id) in DEFAULT_ALIASES {
            registry.add_alias(alias, id);
        }
        registry
    }

    pub fn add_alias(&mut self, alias: &str, canonical: &str) {
        self.aliases
            .insert(alias.trim().to_lowercase(), canonical.trim().to_lowercase());
    }

    pub fn add_provider_id(&mut self, provider: &str, canonical: &str, provider_id: &str) {
        self.provider_ids.insert(
            (provider.to_string(), canonical.trim().to_lowercase()),
            provider_id.to_string(),
        );
    }

    /// Canonical id for user input.
    pub fn canonical(&self, input: &str) -> String {
        let key = input.trim().to_lowercase();
        self.aliases.get(&key).cloned().unwrap_or(key)
    }

    /// Id `provider` knows the canonical asset by.
    pub fn provider_id(&self, provider: &str, canonical: &str) -> String {
        self.provider_ids
            .get(&(provider.to_string(), canonical.to_string()))
            .cloned()
            .unwrap_or_else(|| canonical.to_string())
    }

    /// Canonical, deduplicated and sorted ids. Empty entries are dropped.
    pub fn normalize_ids<S: AsRef<str>>(&self, ids: &[S]) -> Vec<String> {
        let mut out: Vec<String> = ids
            .iter()
            .map(|id| id.as_ref().trim())
            .filter(|id| !id.is_empty())
            .map(|id| self.canonical(id))
            .collect();
        out.sort();
        out.dedup();
        out
    }
}
