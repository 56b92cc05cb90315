use crate::core::cache::TierTtl;
use crate::providers::fetch::RetryPolicy;
use anyhow::{Context, Result};
use directories::ProjectDirs;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::time::Duration;
use std::{fs, path::PathBuf};
use tracing::debug;

pub const ENV_PROVIDER_URL: &str = "PXFEED_PROVIDER_URL";
pub const ENV_API_KEY: &str = "PXFEED_API_KEY";
pub const ENV_DATA_PATH: &str = "PXFEED_DATA_PATH";
pub const ENV_LISTEN: &str = "PXFEED_LISTEN";

#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
#[serde(default)]
pub struct CoinGeckoConfig {
    pub base_url: String,
    pub api_key: Option<String>,
    pub api_key_header: String,
    /// Simultaneous outbound requests.
    pub concurrency: usize,
    /// Canonical id to CoinGecko id, where they differ.
    pub ids: HashMap<String, String>,
}

impl Default for CoinGeckoConfig {
    fn default() -> Self {
        CoinGeckoConfig {
            base_url: "https://api.coingecko.com/api/v3".to_string(),
            api_key: None,
            api_key_header: "x-cg-demo-api-key".to_string(),
            concurrency: 4,
            ids: HashMap::new(),
        }
    }
}

#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
#[serde(default)]
pub struct ProvidersConfig {
    pub coingecko: CoinGeckoConfig,
    /// Sources that take part in consensus but have no adapter yet.
    pub secondary: Vec<String>,
    pub user_agent: String,
    /// Extra ticker aliases on top of the built-in ones.
    pub aliases: HashMap<String, String>,
}

impl Default for ProvidersConfig {
    fn default() -> Self {
        ProvidersConfig {
            coingecko: CoinGeckoConfig::default(),
            secondary: vec!["coincap".to_string(), "cryptocompare".to_string()],
            user_agent: concat!("pxfeed/", env!("CARGO_PKG_VERSION")).to_string(),
            aliases: HashMap::new(),
        }
    }
}

#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
#[serde(default)]
pub struct CacheConfig {
    pub price_hot_secs: u64,
    pub price_last_good_secs: u64,
    pub history_hot_secs: u64,
    pub history_last_good_secs: u64,
    pub risk_secs: u64,
}

impl Default for CacheConfig {
    fn default() -> Self {
        CacheConfig {
            price_hot_secs: 20,
            price_last_good_secs: 6 * 3600,
            history_hot_secs: 5 * 60,
            history_last_good_secs: 7 * 24 * 3600,
            risk_secs: 12 * 3600,
        }
    }
}

impl CacheConfig {
    pub fn price_ttl(&self) -> TierTtl {
        TierTtl {
            hot: Duration::from_secs(self.price_hot_secs),
            last_good: Duration::from_secs(self.price_last_good_secs),
        }
    }

    pub fn history_ttl(&self) -> TierTtl {
        TierTtl {
            hot: Duration::from_secs(self.history_hot_secs),
            last_good: Duration::from_secs(self.history_last_good_secs),
        }
    }

    pub fn risk_ttl(&self) -> Duration {
        Duration::from_secs(self.risk_secs)
    }
}

#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
#[serde(default)]
pub struct FetchConfig {
    pub timeout_ms: u64,
    pub attempts: u32,
    pub backoff_base_ms: u64,
    pub jitter_ms: u64,
}

impl Default for FetchConfig {
    fn default() -> Self {
        let policy = RetryPolicy::default();
        FetchConfig {
            timeout_ms: policy.timeout.as_millis() as u64,
            attempts: policy.attempts,
            backoff_base_ms: policy.backoff_base.as_millis() as u64,
            jitter_ms: policy.jitter.as_millis() as u64,
        }
    }
}

impl FetchConfig {
    pub fn policy(&self) -> RetryPolicy {
        RetryPolicy {
            timeout: Duration::from_millis(self.timeout_ms),
            attempts: self.attempts.max(1),
            backoff_base: Duration::from_millis(self.backoff_base_ms),
            jitter: Duration::from_millis(self.jitter_ms),
        }
    }
}

#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
#[serde(default)]
pub struct RiskConfig {
    /// Asset every holding is correlated against.
    pub reference_asset: String,
    pub correlation_window_days: u32,
    /// Liquidity tier per canonical id, 1 being the most liquid.
    pub tiers: HashMap<String, u8>,
    /// Multiplier per tier, tier 1 first.
    pub tier_multipliers: Vec<f64>,
}

impl Default for RiskConfig {
    fn default() -> Self {
        let tiers = [
            ("bitcoin", 1),
            ("ethereum", 1),
            ("tether", 1),
            ("usd-coin", 1),
            ("binancecoin", 2),
            ("solana", 2),
            ("ripple", 2),
            ("cardano", 2),
            ("dogecoin", 2),
        ];
        RiskConfig {
            reference_asset: "bitcoin".to_string(),
            correlation_window_days: 30,
            tiers: tiers
                .iter()
                .map(|(id, tier)| (id.to_string(), *tier))
                .collect(),
            tier_multipliers: vec![1.0, 1.25, 1.5],
        }
    }
}

impl RiskConfig {
    /// Tier of `id`; unlisted assets fall in the least liquid tier.
    pub fn tier(&self, id: &str) -> u8 {
        let lowest = self.tier_multipliers.len().max(1) as u8;
        self.tiers
            .get(id)
            .copied()
            .unwrap_or(lowest)
            .clamp(1, lowest)
    }

    pub fn multiplier(&self, tier: u8) -> f64 {
        self.tier_multipliers
            .get(usize::from(tier.max(1)) - 1)
            .copied()
            .unwrap_or(1.0)
    }
}

fn default_currency() -> String {
    "usd".to_string()
}

fn default_listen() -> String {
    "127.0.0.1:8080".to_string()
}

#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
pub struct AppConfig {
    #[serde(default = "default_currency")]
    pub currency: String,
    #[serde(default)]
    pub providers: ProvidersConfig,
    #[serde(default)]
    pub cache: CacheConfig,
    #[serde(default)]
    pub fetch: FetchConfig,
    #[serde(default)]
    pub risk: RiskConfig,
    pub data_path: Option<String>,
    #[serde(default = "default_listen")]
    pub listen: String,
}

impl Default for AppConfig {
    fn default() -> Self {
        AppConfig {
            currency: default_currency(),
            providers: ProvidersConfig::default(),
            cache: CacheConfig::default(),
            fetch: FetchConfig::default(),
            risk: RiskConfig::default(),
            data_path: None,
            listen: default_listen(),
        }
    }
}

impl AppConfig {
    /// Loads the default config file, or built-in defaults when there is none.
    pub fn load() -> Result<Self> {
        debug!("Loading default config");
        let config_path = Self::default_config_path()?;
        let config = if config_path.exists() {
            Self::load_from_path(&config_path)?
        } else {
            debug!("No config at {}, using defaults", config_path.display());
            Self::default()
        };
        Ok(config.with_env_overrides(|name| std::env::var(name).ok()))
    }

    pub fn default_config_path() -> Result<PathBuf> {
        let proj_dirs = ProjectDirs::from("dev", "pxfeed", "pxfeed")
            .context("Could not determine project directories")?;
        Ok(proj_dirs.config_dir().join("config.yaml"))
    }

    pub fn default_data_path(&self) -> Result<PathBuf> {
        if let Some(custom_path) = &self.data_path {
            return Ok(PathBuf::from(custom_path));
        }
        let proj_dirs = ProjectDirs::from("dev", "pxfeed", "pxfeed")
            .context("Could not determine project directories")?;
        Ok(proj_dirs.data_dir().to_path_buf())
    }

    pub fn load_from_path<P: AsRef<std::path::Path>>(path: P) -> Result<Self> {
        let config_str = fs::read_to_string(path.as_ref())
            .with_context(|| format!("Failed to read config file: {}", path.as_ref().display()))?;

        let config: Self = serde_yaml::from_str(&config_str)
            .with_context(|| format!("Failed to parse config file: {}", path.as_ref().display()))?;
        debug!("Successfully loaded config");
        Ok(config.with_env_overrides(|name| std::env::var(name).ok()))
    }

    /// Applies `PXFEED_*` overrides read through `lookup`.
    pub fn with_env_overrides(mut self, lookup: impl Fn(&str) -> Option<String>) -> Self {
        let lookup = |name: &str| lookup(name).filter(|v| !v.trim().is_empty());
        if let Some(url) = lookup(ENV_PROVIDER_URL) {
            self.providers.coingecko.base_url = url;
        }
        if let Some(key) = lookup(ENV_API_KEY) {
            self.providers.coingecko.api_key = Some(key);
        }
        if let Some(path) = lookup(ENV_DATA_PATH) {
            self.data_path = Some(path);
        }
        if let Some(listen) = lookup(ENV_LISTEN) {
            self.listen = listen;
        }
        self
    }
}
