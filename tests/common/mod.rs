//! Shared pipeline test support: a scriptable transport with call and
//! concurrency accounting, plus scheduler builders tuned for fast tests.

use async_trait::async_trait;
use enrichment_core::config::{EnrichmentConfig, FeatureFlags, FetcherConfig};
use enrichment_core::events::PublishedEvent;
use enrichment_core::fetcher::{ScrapeRequest, ScrapeTransport, TransportError, TransportReply};
use enrichment_core::scheduler::EnrichmentScheduler;
use enrichment_core::store::InMemoryStore;
use enrichment_core::types::Match;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;

/// What the mock upstream does with the next call.
#[derive(Debug, Clone)]
pub enum Behavior {
    Succeed(String),
    FailStatus(u16),
}

/// Transport double that records physical calls and the in-flight
/// high-water mark.
pub struct MockTransport {
    behavior: Mutex<Behavior>,
    delay: Duration,
    calls: AtomicU64,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
}

impl MockTransport {
    pub fn succeeding(body: &str) -> Arc<Self> {
        Self::with_behavior(Behavior::Succeed(body.to_string()), Duration::from_millis(5))
    }

    pub fn failing(status: u16) -> Arc<Self> {
        Self::with_behavior(Behavior::FailStatus(status), Duration::from_millis(5))
    }

    pub fn with_behavior(behavior: Behavior, delay: Duration) -> Arc<Self> {
        Arc::new(Self {
            behavior: Mutex::new(behavior),
            delay,
            calls: AtomicU64::new(0),
            in_flight: AtomicUsize::new(0),
            max_in_flight: AtomicUsize::new(0),
        })
    }

    pub fn set_behavior(&self, behavior: Behavior) {
        *self.behavior.lock() = behavior;
    }

    pub fn calls(&self) -> u64 {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn max_in_flight(&self) -> usize {
        self.max_in_flight.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ScrapeTransport for MockTransport {
    async fn execute(&self, _: &ScrapeRequest) -> Result<TransportReply, TransportError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let now_in_flight = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(now_in_flight, Ordering::SeqCst);

        tokio::time::sleep(self.delay).await;
        self.in_flight.fetch_sub(1, Ordering::SeqCst);

        match self.behavior.lock().clone() {
            Behavior::Succeed(body) => Ok(TransportReply {
                status: 200,
                body,
                retry_after: None,
            }),
            Behavior::FailStatus(status) => Ok(TransportReply {
                status,
                body: String::new(),
                retry_after: None,
            }),
        }
    }
}

/// Configuration with timings tightened for tests: short batch delay, no
/// fetcher retries, quick timeouts.
pub fn fast_config() -> EnrichmentConfig {
    EnrichmentConfig {
        min_batch_delay: Duration::from_millis(10),
        fetcher: FetcherConfig {
            scrape_timeout: Duration::from_millis(500),
            lookup_timeout: Duration::from_millis(200),
            base_delay: Duration::from_millis(1),
            backoff_factor: 1.6,
            max_retries: 0,
        },
        ..EnrichmentConfig::default()
    }
}

pub fn build_scheduler(
    config: EnrichmentConfig,
    transport: Arc<MockTransport>,
) -> EnrichmentScheduler {
    EnrichmentScheduler::new(
        config,
        Arc::new(InMemoryStore::new()),
        transport,
        FeatureFlags::default(),
    )
}

pub fn candidate(id: &str, title: &str) -> Match {
    Match {
        id: id.to_string(),
        title: title.to_string(),
        asking_price: Some(45.0),
        roi_score: Some(80.0),
        platform: "craigslist".to_string(),
    }
}

/// Receive the next event or fail the test after a bounded wait.
pub async fn next_event(rx: &mut broadcast::Receiver<PublishedEvent>) -> PublishedEvent {
    tokio::time::timeout(Duration::from_secs(2), rx.recv())
        .await
        .expect("timed out waiting for event")
        .expect("event channel closed")
}

/// Let spawned batch timers, pumps, and processing tasks run to quiescence.
pub async fn settle() {
    tokio::time::sleep(Duration::from_millis(60)).await;
}
