pub mod coingecko;
pub mod fetch;
pub mod registry;
pub mod unavailable;

pub use fetch::{FetchClient, RetryPolicy};
pub use registry::IdRegistry;
