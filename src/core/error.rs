use thiserror::Error;

/// Failure talking to an upstream market data provider.
///
/// Never surfaced past the public boundary; the next fallback stage treats it
/// as "no sample".
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ProviderError {
    #[error("request timed out after {0}ms")]
    Timeout(u64),

    #[error("HTTP error: {status} from {url}")]
    Status { status: u16, url: String },

    #[error("network error: {0}")]
    Network(String),

    #[error("malformed response: {0}")]
    Decode(String),

    #[error("gave up after {attempts} attempts: {last}")]
    Exhausted {
        attempts: u32,
        last: Box<ProviderError>,
    },
}

impl ProviderError {
    /// Client errors other than 429 are permanent and not worth retrying.
    pub fn is_retryable(&self) -> bool {
        match self {
            ProviderError::Status { status, .. } => {
                !((400..500).contains(status) && *status != 429)
            }
            _ => true,
        }
    }
}

/// The shared store could not be read or written.
#[derive(Error, Debug)]
pub enum CacheError {
    #[error("store error: {0}")]
    Store(#[from] fjall::Error),

    #[error("store unavailable: {0}")]
    Unavailable(String),
}

/// Malformed query parameters; the only error reported to callers.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ValidationError {
    #[error("missing parameter: {0}")]
    Missing(&'static str),

    #[error("invalid value for {field}: {value}")]
    Invalid { field: &'static str, value: String },

    #[error("{field} must be between {min} and {max}")]
    OutOfRange {
        field: &'static str,
        min: u32,
        max: u32,
    },
}
