//! Crate-level error types.
//!
//! Component boundaries carry their own focused error enums
//! ([`crate::store::StoreError`], [`crate::fetcher::FetchError`]); this module
//! provides the umbrella error for construction and configuration paths.

use crate::fetcher::FetchError;
use crate::store::StoreError;

/// Top-level error for enrichment-core operations.
#[derive(Debug, thiserror::Error)]
pub enum EnrichmentError {
    /// Invalid or unparsable configuration value
    #[error("configuration error: {0}")]
    Configuration(String),

    /// Key-value storage failure
    #[error("storage error: {0}")]
    Store(#[from] StoreError),

    /// Upstream fetch failure after classification and retries
    #[error("fetch error: {0}")]
    Fetch(#[from] FetchError),

    /// HTTP client construction failure
    #[error("transport setup error: {0}")]
    TransportSetup(String),
}

pub type Result<T> = std::result::Result<T, EnrichmentError>;
