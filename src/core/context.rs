//! Call context threaded through price and history lookups.

use async_trait::async_trait;
use std::sync::Arc;

/// Looks up a historical price to derive a 24h reference.
#[async_trait]
pub trait ReferenceHistory: Send + Sync {
    /// Price of `id` nearest to `at_ms`, if any history is available.
    async fn price_near(&self, id: &str, currency: &str, at_ms: i64) -> Option<f64>;
}

/// Capabilities of one request as it flows down the call graph.
///
/// The 24h history lookup is only reachable through a context that carries
/// it. Paths that are themselves serving history (two-point synthesis) build
/// their price requests from [`CallContext::detached`], which has no handle
/// to the lookup and therefore cannot re-enter it.
#[derive(Clone, Default)]
pub struct CallContext {
    reference: Option<Arc<dyn ReferenceHistory>>,
}

impl CallContext {
    /// A context allowed to consult history for 24h references.
    pub fn with_reference(reference: Arc<dyn ReferenceHistory>) -> Self {
        Self {
            reference: Some(reference),
        }
    }

    /// A context that never consults history.
    pub fn detached() -> Self {
        Self { reference: None }
    }

    pub fn reference(&self) -> Option<&dyn ReferenceHistory> {
        self.reference.as_deref()
    }

    pub fn allows_reference(&self) -> bool {
        self.reference.is_some()
    }
}

impl std::fmt::Debug for CallContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CallContext")
            .field("reference", &self.allows_reference())
            .finish()
    }
}
