//! Core engine: caching, consensus, history resolution and risk

pub mod cache;
pub mod clock;
pub mod config;
pub mod consensus;
pub mod context;
pub mod error;
pub mod history;
pub mod inflight;
pub mod limiter;
pub mod log;
pub mod price;
pub mod risk;

// Re-export main types for cleaner imports
pub use context::CallContext;
pub use error::{CacheError, ProviderError, ValidationError};
pub use price::{ConsensusBatch, Interval, PricePoint, PriceProvider, SeriesPoint};
