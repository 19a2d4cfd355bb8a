//! # Core Data Types
//!
//! Shared types flowing through the enrichment pipeline: the inbound
//! [`Match`], the derived [`CacheKey`] that both the result cache and the
//! deduplication window key on, the queued work unit, and the outcome
//! returned to submitters.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::{Duration, Instant};
use uuid::Uuid;

/// Candidate match produced by a marketplace listing scanner.
///
/// Read-only input to this subsystem; the scanner owns its lifecycle.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Match {
    /// Scanner-assigned match identifier
    pub id: String,
    /// Listing title, used as the competitor search query
    pub title: String,
    /// Asking price on the scanned listing, when known
    pub asking_price: Option<f64>,
    /// Heuristic ROI score assigned by the scanner, when scored
    pub roi_score: Option<f64>,
    /// Marketplace the match was scanned from
    pub platform: String,
}

/// Key identifying one logical enrichment query.
///
/// Derived deterministically from `(platform, country, normalized query)`
/// where normalization is trim + lowercase. The result cache and the
/// deduplication window share this derivation so a cache hit and a dedup hit
/// can never disagree about identity.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CacheKey {
    platform: String,
    country: String,
    query: String,
}

impl CacheKey {
    /// Derive a key from the raw query text. Returns `None` when the text is
    /// empty or whitespace-only.
    pub fn derive(platform: &str, country: &str, raw_query: &str) -> Option<Self> {
        let query = raw_query.trim().to_lowercase();
        if query.is_empty() {
            return None;
        }
        Some(Self {
            platform: platform.to_lowercase(),
            country: country.to_lowercase(),
            query,
        })
    }

    /// Normalized query text used as the upstream search term.
    pub fn query(&self) -> &str {
        &self.query
    }

    pub fn platform(&self) -> &str {
        &self.platform
    }

    pub fn country(&self) -> &str {
        &self.country
    }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}:{}", self.platform, self.country, self.query)
    }
}

/// One competitor listing surfaced by enrichment.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CompetitorListing {
    pub platform: String,
    pub price: f64,
    pub listing_url: Option<String>,
    pub confidence: crate::pricing::Confidence,
}

/// Aggregated price statistics attached to an enriched match.
///
/// Fields are `None` when no usable price samples survived filtering.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PricePatch {
    pub avg_price: Option<f64>,
    pub low_price: Option<f64>,
    pub high_price: Option<f64>,
    pub comps_count: usize,
    /// True when the patch was served from an expired cache entry
    pub stale: bool,
}

impl PricePatch {
    pub fn empty() -> Self {
        Self {
            avg_price: None,
            low_price: None,
            high_price: None,
            comps_count: 0,
            stale: false,
        }
    }
}

/// Enrichment value persisted in the result cache.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CachedComps {
    pub listings: Vec<CompetitorListing>,
    pub patch: PricePatch,
    pub fetched_at: DateTime<Utc>,
}

/// Reason code attached to every [`SubmitOutcome`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SubmitReason {
    /// Admitted into the batch buffer
    Ok,
    /// Enrichment disabled by feature flags
    Disabled,
    /// Excluded by the sampling draw
    SampledOut,
    /// ROI score below the configured enrichment threshold
    BelowRoiThreshold,
    /// Title empty after normalization
    NoQuery,
    /// Served from a fresh cache entry
    Cached,
    /// Served from an expired cache entry, flagged stale
    StaleCache,
    /// Same key already attempted inside the deduplication window
    DuplicateRequest,
    /// Circuit breaker is open
    CircuitOpen,
}

impl SubmitReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            SubmitReason::Ok => "ok",
            SubmitReason::Disabled => "disabled",
            SubmitReason::SampledOut => "sampled_out",
            SubmitReason::BelowRoiThreshold => "below_roi_threshold",
            SubmitReason::NoQuery => "no_query",
            SubmitReason::Cached => "cached",
            SubmitReason::StaleCache => "stale_cache",
            SubmitReason::DuplicateRequest => "duplicate_request",
            SubmitReason::CircuitOpen => "circuit_open",
        }
    }
}

impl fmt::Display for SubmitReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Prompt result of [`crate::scheduler::EnrichmentScheduler::submit`].
#[derive(Debug, Clone)]
pub struct SubmitOutcome {
    pub enqueued: bool,
    pub reason: SubmitReason,
    /// Suggested wait before resubmitting, for throttle-style denials
    pub retry_after: Option<Duration>,
}

impl SubmitOutcome {
    pub fn enqueued() -> Self {
        Self {
            enqueued: true,
            reason: SubmitReason::Ok,
            retry_after: None,
        }
    }

    pub fn denied(reason: SubmitReason) -> Self {
        Self {
            enqueued: false,
            reason,
            retry_after: None,
        }
    }

    pub fn throttled(reason: SubmitReason, retry_after: Option<Duration>) -> Self {
        Self {
            enqueued: false,
            reason,
            retry_after,
        }
    }
}

/// Work unit admitted past the gate and waiting in the buffer or queue.
///
/// Consumed exactly once by the pump; never re-queued after processing.
#[derive(Debug, Clone)]
pub struct QueueItem {
    pub match_id: String,
    pub key: CacheKey,
    /// Per-attempt id threaded through tracing spans and event metadata
    pub request_id: Uuid,
    pub requested_at: Instant,
}

impl QueueItem {
    pub fn new(match_id: impl Into<String>, key: CacheKey) -> Self {
        Self {
            match_id: match_id.into(),
            key,
            request_id: Uuid::new_v4(),
            requested_at: Instant::now(),
        }
    }
}
