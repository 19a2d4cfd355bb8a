//! # Enrichment Events
//!
//! Typed outcome events pushed to downstream collaborators over a broadcast
//! channel, decoupling the scheduler from any particular transport. Sending
//! with no subscribers is not an error; events simply fall on the floor.

use crate::types::{CompetitorListing, PricePatch};
use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::broadcast;
use uuid::Uuid;

/// Structured upstream error surfaced on `Failed` events.
#[derive(Debug, Clone, Serialize)]
pub struct UpstreamErrorInfo {
    pub status: Option<u16>,
    /// Classification code: AUTH, RATE_LIMIT, UPSTREAM, TIMEOUT, NETWORK, UNKNOWN
    pub code: String,
    pub message: String,
}

/// Where an `Enriched` event's data came from.
#[derive(Debug, Clone, Serialize)]
pub struct EnrichmentMeta {
    /// Served from the result cache without an upstream call
    pub cached: bool,
    /// The served cache entry was past its TTL
    pub stale: bool,
    /// Attempt id for fresh fetches; absent on cache hits
    pub request_id: Option<Uuid>,
}

/// Outcome event for one submission.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum EnrichmentEvent {
    Enriched {
        match_id: String,
        competitor_prices: Vec<CompetitorListing>,
        patch: PricePatch,
        meta: EnrichmentMeta,
    },
    Failed {
        match_id: String,
        reason: String,
        will_retry: bool,
        attempt_count: u32,
        upstream_error: UpstreamErrorInfo,
    },
    Throttled {
        match_id: String,
        reason: String,
        retry_after_ms: u64,
    },
}

impl EnrichmentEvent {
    pub fn match_id(&self) -> &str {
        match self {
            EnrichmentEvent::Enriched { match_id, .. }
            | EnrichmentEvent::Failed { match_id, .. }
            | EnrichmentEvent::Throttled { match_id, .. } => match_id,
        }
    }
}

/// Event that has been published
#[derive(Debug, Clone)]
pub struct PublishedEvent {
    pub event: EnrichmentEvent,
    pub published_at: DateTime<Utc>,
}

/// Broadcast publisher for enrichment lifecycle events.
#[derive(Debug, Clone)]
pub struct EventPublisher {
    sender: broadcast::Sender<PublishedEvent>,
}

impl EventPublisher {
    /// Create a new event publisher with the specified channel capacity
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    /// Publish an event. A send with no subscribers is acceptable; the
    /// scheduler must not care whether anyone is listening.
    pub fn publish(&self, event: EnrichmentEvent) {
        let published = PublishedEvent {
            event,
            published_at: Utc::now(),
        };
        let _ = self.sender.send(published);
    }

    /// Subscribe to events
    pub fn subscribe(&self) -> broadcast::Receiver<PublishedEvent> {
        self.sender.subscribe()
    }

    /// Get the number of active subscribers
    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

impl Default for EventPublisher {
    fn default() -> Self {
        Self::new(256)
    }
}
