use crate::core::error::ProviderError;
use crate::core::price::{Interval, PriceProvider, ProviderSample, SeriesPoint};
use async_trait::async_trait;

/// A configured source without an implementation yet.
///
/// Answers immediately with no data so the aggregator keeps its multi-source
/// shape.
pub struct UnavailableProvider {
    name: String,
}

impl UnavailableProvider {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
        }
    }
}

#[async_trait]
impl PriceProvider for UnavailableProvider {
    fn name(&self) -> &str {
        &self.name
    }

    async fn fetch_prices(&self, ids: &[String], _currency: &str) -> Vec<ProviderSample> {
        ids.iter()
            .map(|id| ProviderSample::empty(id, &self.name))
            .collect()
    }

    async fn fetch_history(
        &self,
        _id: &str,
        _currency: &str,
        _days: u32,
        _interval: Interval,
    ) -> Result<Vec<SeriesPoint>, ProviderError> {
        Ok(Vec::new())
    }
}
