//! # Enrichment Scheduler
//!
//! The orchestrator owning the whole admission pipeline: eligibility gate,
//! cache fast path, deduplication, circuit-breaker admission, micro-batch
//! buffering, and the concurrency-bounded pump that drives each item through
//! the retrying fetcher and out as an event.
//!
//! ## Control flow
//!
//! ```text
//! submit ──▶ gate ──▶ cache ──▶ dedup ──▶ breaker ──▶ batch buffer
//!                                                        │ (micro-batch timer)
//!                                                        ▼
//!                                                    work queue
//!                                                        │ (pump, bounded)
//!                                                        ▼
//!                               fetcher ──▶ price stats ──▶ cache write ──▶ event
//! ```
//!
//! Scheduling is cooperative and event-driven: the pump re-runs after every
//! batch flush and every completion, never on a poll. `submit` returns
//! promptly — the network call always happens in a spawned task — and
//! processing failures never propagate back to the submitter; they surface
//! as `Failed` events and breaker accounting.

use crate::cache::ResultCache;
use crate::config::{EnrichmentConfig, FeatureFlags};
use crate::dedup::DeduplicationWindow;
use crate::events::{
    EnrichmentEvent, EnrichmentMeta, EventPublisher, PublishedEvent, UpstreamErrorInfo,
};
use crate::fetcher::{RetryingFetcher, ScrapeRequest, ScrapeTransport};
use crate::gate::EligibilityGate;
use crate::pricing::{self, PriceStats};
use crate::resilience::{CircuitBreaker, CircuitState};
use crate::store::KeyValueStore;
use crate::types::{
    CacheKey, CachedComps, CompetitorListing, Match, PricePatch, QueueItem, SubmitOutcome,
    SubmitReason,
};
use chrono::Utc;
use dashmap::DashSet;
use std::collections::{HashSet, VecDeque};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::{broadcast, Mutex};
use tracing::{debug, info, instrument, warn};

/// Orchestrates enrichment attempts for candidate matches.
///
/// All coordination state (breaker, dedup map, buffer, queue, active set) is
/// owned here; cloning is cheap and shares that state, which is how spawned
/// processing tasks reach back into the scheduler.
pub struct EnrichmentScheduler {
    config: Arc<EnrichmentConfig>,
    gate: Arc<EligibilityGate>,
    cache: Arc<ResultCache>,
    dedup: Arc<DeduplicationWindow>,
    breaker: Arc<CircuitBreaker>,
    fetcher: Arc<RetryingFetcher>,
    publisher: EventPublisher,
    /// Cache keys with an in-flight attempt; bounds concurrency and blocks
    /// concurrent same-key fetches
    active: Arc<DashSet<String>>,
    /// Submissions waiting for the micro-batch timer
    buffer: Arc<Mutex<Vec<QueueItem>>>,
    /// FIFO work queue drained by the pump
    queue: Arc<Mutex<VecDeque<QueueItem>>>,
    batch_timer_armed: Arc<AtomicBool>,
    /// Serializes pump passes so capacity check and active-set insert are
    /// atomic with respect to other pumps
    pump_lock: Arc<Mutex<()>>,
}

impl EnrichmentScheduler {
    pub fn new(
        config: EnrichmentConfig,
        store: Arc<dyn KeyValueStore>,
        transport: Arc<dyn ScrapeTransport>,
        flags: FeatureFlags,
    ) -> Self {
        let config = Arc::new(config);
        info!(
            max_concurrent = config.max_concurrent_requests,
            dedup_window_ms = config.dedup_window.as_millis() as u64,
            batch_delay_ms = config.min_batch_delay.as_millis() as u64,
            "Enrichment scheduler initialized"
        );

        Self {
            gate: Arc::new(EligibilityGate::new(flags)),
            cache: Arc::new(ResultCache::new(store)),
            dedup: Arc::new(DeduplicationWindow::new(config.dedup_window)),
            breaker: Arc::new(CircuitBreaker::new(
                "scraping_upstream",
                config.circuit_breaker_threshold,
                config.circuit_breaker_reset,
            )),
            fetcher: Arc::new(RetryingFetcher::new(transport, config.fetcher.clone())),
            publisher: EventPublisher::default(),
            active: Arc::new(DashSet::new()),
            buffer: Arc::new(Mutex::new(Vec::new())),
            queue: Arc::new(Mutex::new(VecDeque::new())),
            batch_timer_armed: Arc::new(AtomicBool::new(false)),
            pump_lock: Arc::new(Mutex::new(())),
            config,
        }
    }

    /// Subscribe to outcome events.
    pub fn subscribe(&self) -> broadcast::Receiver<PublishedEvent> {
        self.publisher.subscribe()
    }

    /// The eligibility gate, for live flag reloads.
    pub fn gate(&self) -> &EligibilityGate {
        &self.gate
    }

    /// The upstream circuit breaker.
    pub fn breaker(&self) -> &CircuitBreaker {
        &self.breaker
    }

    /// Physical upstream calls made so far, retries included.
    pub fn usage_count(&self) -> u64 {
        self.fetcher.usage_count()
    }

    pub fn breaker_state(&self) -> CircuitState {
        self.breaker.state()
    }

    /// Number of attempts currently in flight.
    pub fn active_count(&self) -> usize {
        self.active.len()
    }

    /// Submit a candidate match for enrichment.
    ///
    /// Returns promptly with the admission outcome; the upstream call, when
    /// admitted, runs in the background and reports through events.
    #[instrument(skip(self, candidate), fields(match_id = %candidate.id))]
    pub async fn submit(&self, candidate: &Match) -> SubmitOutcome {
        let decision = self.gate.evaluate(candidate);
        if !decision.allow {
            debug!(reason = %decision.reason, "Submission gated");
            return SubmitOutcome::denied(decision.reason);
        }

        let Some(key) = CacheKey::derive(
            &self.config.upstream.platform,
            &self.config.upstream.country,
            &candidate.title,
        ) else {
            return SubmitOutcome::denied(SubmitReason::NoQuery);
        };

        // Cache fast path: fresh or stale, a hit answers immediately and
        // never re-triggers a fetch.
        match self.cache.get::<CachedComps>(&key).await {
            Ok(Some(hit)) => {
                let mut patch = hit.value.patch.clone();
                patch.stale = hit.stale;
                self.publisher.publish(EnrichmentEvent::Enriched {
                    match_id: candidate.id.clone(),
                    competitor_prices: hit.value.listings,
                    patch,
                    meta: EnrichmentMeta {
                        cached: true,
                        stale: hit.stale,
                        request_id: None,
                    },
                });
                let reason = if hit.stale {
                    SubmitReason::StaleCache
                } else {
                    SubmitReason::Cached
                };
                return SubmitOutcome::denied(reason);
            }
            Ok(None) => {}
            Err(e) => {
                debug!(error = %e, cache_key = %key, "Cache read failed, treating as absent");
            }
        }

        if self.dedup.recently_attempted(&key) {
            let retry_after = self.dedup.retry_after(&key);
            self.emit_throttled(&candidate.id, SubmitReason::DuplicateRequest, retry_after);
            return SubmitOutcome::throttled(SubmitReason::DuplicateRequest, retry_after);
        }

        if !self.breaker.is_admissible() {
            let retry_after = self.breaker.remaining_open();
            self.emit_throttled(&candidate.id, SubmitReason::CircuitOpen, retry_after);
            return SubmitOutcome::throttled(SubmitReason::CircuitOpen, retry_after);
        }

        self.buffer
            .lock()
            .await
            .push(QueueItem::new(&candidate.id, key));
        self.arm_batch_timer();

        SubmitOutcome::enqueued()
    }

    /// Arm the micro-batch timer unless a flush is already pending. The
    /// delay coalesces near-simultaneous submissions before queuing.
    fn arm_batch_timer(&self) {
        if self.batch_timer_armed.swap(true, Ordering::SeqCst) {
            return;
        }
        let scheduler = self.clone();
        tokio::spawn(async move {
            tokio::time::sleep(scheduler.config.min_batch_delay).await;
            scheduler.batch_timer_armed.store(false, Ordering::SeqCst);
            scheduler.flush_batch().await;
            scheduler.pump().await;
        });
    }

    /// Move buffered submissions into the work queue, coalescing items whose
    /// key is already buffered, queued, or active. Coalescing is what keeps
    /// a burst of identical submissions down to one upstream call.
    async fn flush_batch(&self) {
        let drained: Vec<QueueItem> = {
            let mut buffer = self.buffer.lock().await;
            buffer.drain(..).collect()
        };
        if drained.is_empty() {
            return;
        }

        let mut queue = self.queue.lock().await;
        let mut queued_keys: HashSet<String> =
            queue.iter().map(|item| item.key.to_string()).collect();
        let mut queued = 0usize;
        let mut coalesced = 0usize;

        for item in drained {
            let key_str = item.key.to_string();
            if queued_keys.contains(&key_str) || self.active.contains(&key_str) {
                coalesced += 1;
                continue;
            }
            queued_keys.insert(key_str);
            queue.push_back(item);
            queued += 1;
        }

        debug!(queued, coalesced, depth = queue.len(), "Batch flushed into work queue");
    }

    /// Drain the queue while capacity remains and the breaker admits.
    ///
    /// Items whose key is already active are pushed back for a later cycle
    /// rather than dropped; each pump pass examines the queue at most once
    /// through so a head full of active duplicates cannot spin it.
    async fn pump(&self) {
        let _guard = self.pump_lock.lock().await;
        let mut remaining = self.queue.lock().await.len();

        while remaining > 0
            && self.active.len() < self.config.max_concurrent_requests
            && self.breaker.is_admissible()
        {
            remaining -= 1;
            let Some(item) = self.queue.lock().await.pop_front() else {
                break;
            };

            let key_str = item.key.to_string();
            if self.active.contains(&key_str) {
                self.queue.lock().await.push_back(item);
                continue;
            }

            // Committing to an upstream attempt: the dedup window is marked
            // here, at dequeue, not at submit.
            self.dedup.mark_attempted(&item.key);
            self.active.insert(key_str);

            let scheduler = self.clone();
            tokio::spawn(async move {
                scheduler.process_item(item).await;
            });
        }
    }

    fn spawn_pump(&self) {
        let scheduler = self.clone();
        tokio::spawn(async move {
            scheduler.pump().await;
        });
    }

    /// Drive one item through fetch, statistics, cache write, breaker
    /// accounting, and event emission. Failures end here; nothing re-queues.
    #[instrument(skip(self, item), fields(
        match_id = %item.match_id,
        cache_key = %item.key,
        request_id = %item.request_id
    ))]
    async fn process_item(&self, item: QueueItem) {
        let request = ScrapeRequest::comps_search(&self.config.upstream, &item.key);

        match self.fetcher.fetch(&request).await {
            Ok(reply) => {
                let prices = pricing::parse_prices(&reply.body);
                let stats = pricing::compute_stats(&prices);
                let (listings, patch) = self.build_enrichment(&item, &request, stats);

                let cached = CachedComps {
                    listings: listings.clone(),
                    patch: patch.clone(),
                    fetched_at: Utc::now(),
                };
                if let Err(e) = self
                    .cache
                    .set(&item.key, &cached, self.config.cache_ttl)
                    .await
                {
                    warn!(error = %e, "Cache write failed, continuing without persistence");
                }

                self.breaker.record_success();
                debug!(
                    comps = patch.comps_count,
                    queue_wait_ms = item.requested_at.elapsed().as_millis() as u64,
                    "Enrichment attempt succeeded"
                );
                self.publisher.publish(EnrichmentEvent::Enriched {
                    match_id: item.match_id.clone(),
                    competitor_prices: listings,
                    patch,
                    meta: EnrichmentMeta {
                        cached: false,
                        stale: false,
                        request_id: Some(item.request_id),
                    },
                });
            }
            Err(err) => {
                self.breaker.record_failure();
                warn!(
                    class = %err.class,
                    status = ?err.status,
                    attempts = err.attempts_made,
                    "Enrichment attempt failed"
                );
                self.publisher.publish(EnrichmentEvent::Failed {
                    match_id: item.match_id.clone(),
                    reason: err.class.code().to_string(),
                    will_retry: false,
                    attempt_count: err.attempts_made,
                    upstream_error: UpstreamErrorInfo {
                        status: err.status,
                        code: err.class.code().to_string(),
                        message: err.message,
                    },
                });
            }
        }

        self.active.remove(&item.key.to_string());
        self.dedup.maybe_gc();
        self.spawn_pump();
    }

    fn build_enrichment(
        &self,
        item: &QueueItem,
        request: &ScrapeRequest,
        stats: Option<PriceStats>,
    ) -> (Vec<CompetitorListing>, PricePatch) {
        let Some(stats) = stats else {
            return (Vec::new(), PricePatch::empty());
        };

        let listings = stats
            .samples
            .iter()
            .map(|&price| CompetitorListing {
                platform: item.key.platform().to_string(),
                price,
                listing_url: Some(request.target_url.clone()),
                confidence: stats.confidence,
            })
            .collect();
        let patch = PricePatch {
            avg_price: Some(stats.mean),
            low_price: Some(stats.min),
            high_price: Some(stats.max),
            comps_count: stats.count,
            stale: false,
        };
        (listings, patch)
    }

    fn emit_throttled(
        &self,
        match_id: &str,
        reason: SubmitReason,
        retry_after: Option<std::time::Duration>,
    ) {
        self.publisher.publish(EnrichmentEvent::Throttled {
            match_id: match_id.to_string(),
            reason: reason.as_str().to_string(),
            retry_after_ms: retry_after.map(|d| d.as_millis() as u64).unwrap_or(0),
        });
    }
}

// Clone shares all coordination state; used to hand the scheduler to
// spawned processing tasks.
impl Clone for EnrichmentScheduler {
    fn clone(&self) -> Self {
        Self {
            config: self.config.clone(),
            gate: self.gate.clone(),
            cache: self.cache.clone(),
            dedup: self.dedup.clone(),
            breaker: self.breaker.clone(),
            fetcher: self.fetcher.clone(),
            publisher: self.publisher.clone(),
            active: self.active.clone(),
            buffer: self.buffer.clone(),
            queue: self.queue.clone(),
            batch_timer_armed: self.batch_timer_armed.clone(),
            pump_lock: self.pump_lock.clone(),
        }
    }
}
