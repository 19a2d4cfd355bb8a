//! # Configuration
//!
//! Process-wide tuning for the enrichment core plus the store-persisted
//! feature-flag document. Compiled defaults cover every knob; `from_env`
//! applies `COMPS_*` environment overrides and rejects unparsable values.

use crate::error::{EnrichmentError, Result};
use crate::store::KeyValueStore;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tracing::warn;

/// Well-known store key holding the feature-flag document.
pub const FLAGS_KEY: &str = "comps:flags";

/// Retry and timeout policy for the upstream scraping client.
#[derive(Debug, Clone)]
pub struct FetcherConfig {
    /// Hard per-call timeout for full scraping requests
    pub scrape_timeout: Duration,
    /// Hard per-call timeout for lighter lookup requests
    pub lookup_timeout: Duration,
    /// Base delay before the first retry
    pub base_delay: Duration,
    /// Exponential backoff multiplier between attempts
    pub backoff_factor: f64,
    /// Retries after the initial attempt
    pub max_retries: u32,
}

impl Default for FetcherConfig {
    fn default() -> Self {
        Self {
            scrape_timeout: Duration::from_secs(30),
            lookup_timeout: Duration::from_secs(12),
            base_delay: Duration::from_millis(300),
            backoff_factor: 1.6,
            max_retries: 3,
        }
    }
}

/// Fixed upstream deployment parameters: which competitor marketplace is
/// searched, through which scraping-API zone, and with what credential.
#[derive(Debug, Clone)]
pub struct UpstreamConfig {
    /// Scraping API endpoint
    pub endpoint: String,
    /// Scraping API zone identifier
    pub zone: String,
    /// Bearer token for the scraping API
    pub api_token: String,
    /// Competitor platform searched for comps
    pub platform: String,
    /// Two-letter country the searches are routed through
    pub country: String,
}

impl Default for UpstreamConfig {
    fn default() -> Self {
        Self {
            endpoint: "https://api.brightdata.com/request".to_string(),
            zone: "web_unlocker".to_string(),
            api_token: String::new(),
            platform: "ebay".to_string(),
            country: "us".to_string(),
        }
    }
}

/// Top-level configuration for the enrichment scheduler and its components.
#[derive(Debug, Clone)]
pub struct EnrichmentConfig {
    /// Ceiling on concurrently active upstream fetches
    pub max_concurrent_requests: usize,
    /// Horizon within which repeated attempts for one key are suppressed
    pub dedup_window: Duration,
    /// Consecutive failures that trip the circuit breaker
    pub circuit_breaker_threshold: u32,
    /// How long the breaker stays open before a half-open trial
    pub circuit_breaker_reset: Duration,
    /// Micro-batch debounce before buffered submissions are queued
    pub min_batch_delay: Duration,
    /// TTL applied to freshly written cache entries
    pub cache_ttl: Duration,
    pub fetcher: FetcherConfig,
    pub upstream: UpstreamConfig,
}

impl Default for EnrichmentConfig {
    fn default() -> Self {
        Self {
            max_concurrent_requests: 5,
            dedup_window: Duration::from_secs(60),
            circuit_breaker_threshold: 10,
            circuit_breaker_reset: Duration::from_secs(60),
            min_batch_delay: Duration::from_millis(50),
            cache_ttl: Duration::from_secs(24 * 60 * 60),
            fetcher: FetcherConfig::default(),
            upstream: UpstreamConfig::default(),
        }
    }
}

impl EnrichmentConfig {
    /// Build configuration from defaults plus `COMPS_*` environment overrides.
    pub fn from_env() -> Result<Self> {
        let mut config = Self::default();

        if let Ok(max_concurrent) = std::env::var("COMPS_MAX_CONCURRENT_REQUESTS") {
            config.max_concurrent_requests = max_concurrent.parse().map_err(|e| {
                EnrichmentError::Configuration(format!("invalid max_concurrent_requests: {e}"))
            })?;
        }

        if let Ok(window_ms) = std::env::var("COMPS_DEDUP_WINDOW_MS") {
            config.dedup_window = Duration::from_millis(window_ms.parse().map_err(|e| {
                EnrichmentError::Configuration(format!("invalid dedup_window_ms: {e}"))
            })?);
        }

        if let Ok(threshold) = std::env::var("COMPS_CIRCUIT_BREAKER_THRESHOLD") {
            config.circuit_breaker_threshold = threshold.parse().map_err(|e| {
                EnrichmentError::Configuration(format!("invalid circuit_breaker_threshold: {e}"))
            })?;
        }

        if let Ok(reset_ms) = std::env::var("COMPS_CIRCUIT_BREAKER_RESET_MS") {
            config.circuit_breaker_reset =
                Duration::from_millis(reset_ms.parse().map_err(|e| {
                    EnrichmentError::Configuration(format!("invalid circuit_breaker_reset_ms: {e}"))
                })?);
        }

        if let Ok(delay_ms) = std::env::var("COMPS_MIN_BATCH_DELAY_MS") {
            config.min_batch_delay = Duration::from_millis(delay_ms.parse().map_err(|e| {
                EnrichmentError::Configuration(format!("invalid min_batch_delay_ms: {e}"))
            })?);
        }

        if let Ok(token) = std::env::var("COMPS_API_TOKEN") {
            config.upstream.api_token = token;
        }

        if let Ok(zone) = std::env::var("COMPS_API_ZONE") {
            config.upstream.zone = zone;
        }

        if let Ok(country) = std::env::var("COMPS_COUNTRY") {
            config.upstream.country = country;
        }

        Ok(config)
    }
}

/// Cost-control flags evaluated by the eligibility gate.
///
/// Persisted as a JSON document under [`FLAGS_KEY`] so operators can adjust
/// sampling without a deploy; compiled defaults apply when the document is
/// absent or unreadable.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FeatureFlags {
    pub enabled: bool,
    /// Fraction of eligible matches actually enriched, in `[0, 1]`
    pub sample_rate: f64,
    /// Matches scoring below this are skipped; `None` disables the threshold
    pub min_roi_score: Option<f64>,
}

impl Default for FeatureFlags {
    fn default() -> Self {
        Self {
            enabled: true,
            sample_rate: 1.0,
            min_roi_score: None,
        }
    }
}

impl FeatureFlags {
    /// Load flags from the well-known store key, falling back to defaults
    /// when the document is missing or malformed.
    pub async fn load(store: &Arc<dyn KeyValueStore>) -> Self {
        match store.get(FLAGS_KEY).await {
            Ok(Some(doc)) => match serde_json::from_str(&doc) {
                Ok(flags) => flags,
                Err(e) => {
                    warn!(error = %e, "Feature flag document malformed, using defaults");
                    Self::default()
                }
            },
            Ok(None) => Self::default(),
            Err(e) => {
                warn!(error = %e, "Feature flag load failed, using defaults");
                Self::default()
            }
        }
    }

    /// Persist flags to the well-known store key.
    pub async fn persist(&self, store: &Arc<dyn KeyValueStore>) -> Result<()> {
        let doc = serde_json::to_string(self)
            .map_err(|e| EnrichmentError::Configuration(e.to_string()))?;
        store.put(FLAGS_KEY, doc).await?;
        Ok(())
    }
}
