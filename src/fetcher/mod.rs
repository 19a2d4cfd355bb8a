//! # Retrying Fetcher
//!
//! Wraps a single outbound scraping call with a hard timeout, exponential
//! backoff, and error classification. The transport behind the
//! [`ScrapeTransport`] seam performs exactly one physical call per
//! invocation; everything above it — timeout enforcement, retry policy,
//! usage accounting — lives here so tests can script the wire.
//!
//! Classification taxonomy: `AUTH` (401/403), `RATE_LIMIT` (429), `UPSTREAM`
//! (503/504), `TIMEOUT`, `NETWORK` (transport-level failure), `UNKNOWN`.
//! Only 429/503/504/timeout/network outcomes are retried; all other statuses
//! are terminal on the first attempt.

pub mod http;

pub use http::HttpScrapeTransport;

use crate::config::{FetcherConfig, UpstreamConfig};
use crate::types::CacheKey;
use async_trait::async_trait;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::timeout;
use tracing::{debug, warn};

/// Error classification driving both the retry decision and the code
/// surfaced to callers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FetchErrorClass {
    Auth,
    RateLimit,
    Upstream,
    Timeout,
    Network,
    Unknown,
}

impl FetchErrorClass {
    pub fn code(&self) -> &'static str {
        match self {
            FetchErrorClass::Auth => "AUTH",
            FetchErrorClass::RateLimit => "RATE_LIMIT",
            FetchErrorClass::Upstream => "UPSTREAM",
            FetchErrorClass::Timeout => "TIMEOUT",
            FetchErrorClass::Network => "NETWORK",
            FetchErrorClass::Unknown => "UNKNOWN",
        }
    }

    fn is_retryable(&self) -> bool {
        matches!(
            self,
            FetchErrorClass::RateLimit
                | FetchErrorClass::Upstream
                | FetchErrorClass::Timeout
                | FetchErrorClass::Network
        )
    }
}

impl fmt::Display for FetchErrorClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.code())
    }
}

/// Terminal fetch failure, returned once retries are exhausted or the first
/// non-retryable outcome is seen. `retryable` is always false by the time
/// this surfaces: the local retry budget is spent.
#[derive(Debug, Clone, thiserror::Error)]
#[error("{class} upstream failure (status {status:?}) after {attempts_made} attempt(s): {message}")]
pub struct FetchError {
    pub class: FetchErrorClass,
    pub status: Option<u16>,
    pub message: String,
    pub retryable: bool,
    pub attempts_made: u32,
}

/// Transport-level failures below the HTTP status layer.
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    /// Connection refused, reset, DNS failure, or mid-body disconnect
    #[error("connection failed: {0}")]
    Connection(String),

    /// The request could not be constructed at all
    #[error("request could not be built: {0}")]
    InvalidRequest(String),
}

/// Which timeout budget a request runs under.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestKind {
    /// Full anti-bot scraping call
    Scrape,
    /// Lighter metadata lookup
    Lookup,
}

/// One outbound scraping request.
#[derive(Debug, Clone)]
pub struct ScrapeRequest {
    pub target_url: String,
    pub country: String,
    pub kind: RequestKind,
}

impl ScrapeRequest {
    /// Build the competitor-search request for a cache key: a sold-listings
    /// search on the configured platform for the normalized query text.
    pub fn comps_search(upstream: &UpstreamConfig, key: &CacheKey) -> Self {
        let query = urlencoding::encode(key.query());
        let target_url = match key.platform() {
            "ebay" => format!(
                "https://www.ebay.com/sch/i.html?_nkw={query}&LH_Sold=1&LH_Complete=1"
            ),
            platform => format!("https://www.{platform}.com/search?q={query}"),
        };
        Self {
            target_url,
            country: upstream.country.clone(),
            kind: RequestKind::Scrape,
        }
    }
}

/// Raw reply from one physical call.
#[derive(Debug, Clone)]
pub struct TransportReply {
    pub status: u16,
    pub body: String,
    /// Server-supplied retry hint, honored over the computed backoff
    pub retry_after: Option<Duration>,
}

/// Performs exactly one physical upstream call.
#[async_trait]
pub trait ScrapeTransport: Send + Sync {
    async fn execute(&self, request: &ScrapeRequest) -> Result<TransportReply, TransportError>;
}

/// Retrying client over a [`ScrapeTransport`].
pub struct RetryingFetcher {
    transport: Arc<dyn ScrapeTransport>,
    config: FetcherConfig,
    /// Physical calls made, including retries; mirrors metered API usage
    usage_counter: AtomicU64,
}

impl RetryingFetcher {
    pub fn new(transport: Arc<dyn ScrapeTransport>, config: FetcherConfig) -> Self {
        Self {
            transport,
            config,
            usage_counter: AtomicU64::new(0),
        }
    }

    /// Total physical calls made so far.
    pub fn usage_count(&self) -> u64 {
        self.usage_counter.load(Ordering::Relaxed)
    }

    /// Execute a request, retrying retryable outcomes with exponential
    /// backoff until success, a terminal classification, or an exhausted
    /// retry budget.
    pub async fn fetch(&self, request: &ScrapeRequest) -> Result<TransportReply, FetchError> {
        let deadline = self.timeout_for(request.kind);
        let mut attempts_made = 0u32;

        loop {
            attempts_made += 1;
            self.usage_counter.fetch_add(1, Ordering::Relaxed);

            let outcome = timeout(deadline, self.transport.execute(request)).await;
            let (class, status, message, retry_after) = match outcome {
                Ok(Ok(reply)) if (200..300).contains(&reply.status) => {
                    debug!(
                        url = %request.target_url,
                        attempts = attempts_made,
                        "Upstream fetch succeeded"
                    );
                    return Ok(reply);
                }
                Ok(Ok(reply)) => {
                    let class = classify_status(reply.status);
                    let message = format!("upstream returned HTTP {}", reply.status);
                    (class, Some(reply.status), message, reply.retry_after)
                }
                Ok(Err(TransportError::Connection(msg))) => {
                    (FetchErrorClass::Network, None, msg, None)
                }
                Ok(Err(TransportError::InvalidRequest(msg))) => {
                    (FetchErrorClass::Unknown, None, msg, None)
                }
                Err(_) => {
                    let message = format!("request timed out after {}ms", deadline.as_millis());
                    (FetchErrorClass::Timeout, None, message, None)
                }
            };

            if !class.is_retryable() || attempts_made > self.config.max_retries {
                warn!(
                    url = %request.target_url,
                    class = %class,
                    status = ?status,
                    attempts = attempts_made,
                    "Upstream fetch failed terminally"
                );
                return Err(FetchError {
                    class,
                    status,
                    message,
                    retryable: false,
                    attempts_made,
                });
            }

            let delay = self.backoff_delay(attempts_made - 1, retry_after);
            debug!(
                url = %request.target_url,
                class = %class,
                attempt = attempts_made,
                delay_ms = delay.as_millis() as u64,
                "Retrying upstream fetch"
            );
            tokio::time::sleep(delay).await;
        }
    }

    fn timeout_for(&self, kind: RequestKind) -> Duration {
        match kind {
            RequestKind::Scrape => self.config.scrape_timeout,
            RequestKind::Lookup => self.config.lookup_timeout,
        }
    }

    /// Backoff before the retry following 0-indexed attempt `n`. A
    /// server-supplied retry-after always wins over the computed delay.
    fn backoff_delay(&self, attempt_index: u32, retry_after: Option<Duration>) -> Duration {
        let computed = self
            .config
            .base_delay
            .mul_f64(self.config.backoff_factor.powi(attempt_index as i32));
        match retry_after {
            Some(hinted) => hinted.max(computed),
            None => computed,
        }
    }
}

fn classify_status(status: u16) -> FetchErrorClass {
    match status {
        401 | 403 => FetchErrorClass::Auth,
        429 => FetchErrorClass::RateLimit,
        503 | 504 => FetchErrorClass::Upstream,
        _ => FetchErrorClass::Unknown,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;
    use std::collections::VecDeque;
    use std::time::Instant;

    /// Transport whose replies are scripted per call.
    struct ScriptedTransport {
        script: Mutex<VecDeque<ScriptedReply>>,
    }

    enum ScriptedReply {
        Status(u16),
        StatusWithRetryAfter(u16, Duration),
        ConnectionError,
        Hang(Duration),
    }

    impl ScriptedTransport {
        fn new(script: Vec<ScriptedReply>) -> Arc<Self> {
            Arc::new(Self {
                script: Mutex::new(script.into()),
            })
        }
    }

    #[async_trait]
    impl ScrapeTransport for ScriptedTransport {
        async fn execute(&self, _: &ScrapeRequest) -> Result<TransportReply, TransportError> {
            let next = self.script.lock().pop_front().expect("script exhausted");
            match next {
                ScriptedReply::Status(status) => Ok(TransportReply {
                    status,
                    body: "$90 $100 $110".to_string(),
                    retry_after: None,
                }),
                ScriptedReply::StatusWithRetryAfter(status, after) => Ok(TransportReply {
                    status,
                    body: String::new(),
                    retry_after: Some(after),
                }),
                ScriptedReply::ConnectionError => {
                    Err(TransportError::Connection("connection reset".to_string()))
                }
                ScriptedReply::Hang(d) => {
                    tokio::time::sleep(d).await;
                    Ok(TransportReply {
                        status: 200,
                        body: String::new(),
                        retry_after: None,
                    })
                }
            }
        }
    }

    fn quick_config() -> FetcherConfig {
        FetcherConfig {
            scrape_timeout: Duration::from_millis(100),
            lookup_timeout: Duration::from_millis(40),
            base_delay: Duration::from_millis(1),
            backoff_factor: 1.6,
            max_retries: 3,
        }
    }

    fn request() -> ScrapeRequest {
        ScrapeRequest {
            target_url: "https://www.ebay.com/sch/i.html?_nkw=drill".to_string(),
            country: "us".to_string(),
            kind: RequestKind::Scrape,
        }
    }

    #[tokio::test]
    async fn success_on_first_attempt_makes_one_call() {
        let transport = ScriptedTransport::new(vec![ScriptedReply::Status(200)]);
        let fetcher = RetryingFetcher::new(transport, quick_config());

        let reply = fetcher.fetch(&request()).await.unwrap();
        assert_eq!(reply.status, 200);
        assert_eq!(fetcher.usage_count(), 1);
    }

    #[tokio::test]
    async fn rate_limit_is_retried_until_success() {
        let transport = ScriptedTransport::new(vec![
            ScriptedReply::Status(429),
            ScriptedReply::Status(503),
            ScriptedReply::Status(200),
        ]);
        let fetcher = RetryingFetcher::new(transport, quick_config());

        let reply = fetcher.fetch(&request()).await.unwrap();
        assert_eq!(reply.status, 200);
        assert_eq!(fetcher.usage_count(), 3);
    }

    #[tokio::test]
    async fn auth_failure_is_terminal_on_first_attempt() {
        let transport = ScriptedTransport::new(vec![ScriptedReply::Status(401)]);
        let fetcher = RetryingFetcher::new(transport, quick_config());

        let err = fetcher.fetch(&request()).await.unwrap_err();
        assert_eq!(err.class, FetchErrorClass::Auth);
        assert_eq!(err.status, Some(401));
        assert_eq!(err.attempts_made, 1);
        assert!(!err.retryable);
        assert_eq!(fetcher.usage_count(), 1);
    }

    #[tokio::test]
    async fn other_client_errors_are_not_retried() {
        let transport = ScriptedTransport::new(vec![ScriptedReply::Status(404)]);
        let fetcher = RetryingFetcher::new(transport, quick_config());

        let err = fetcher.fetch(&request()).await.unwrap_err();
        assert_eq!(err.class, FetchErrorClass::Unknown);
        assert_eq!(fetcher.usage_count(), 1);
    }

    #[tokio::test]
    async fn exhausted_retries_report_all_attempts() {
        let transport = ScriptedTransport::new(vec![
            ScriptedReply::Status(503),
            ScriptedReply::Status(503),
            ScriptedReply::Status(503),
            ScriptedReply::Status(503),
        ]);
        let fetcher = RetryingFetcher::new(transport, quick_config());

        let err = fetcher.fetch(&request()).await.unwrap_err();
        assert_eq!(err.class, FetchErrorClass::Upstream);
        assert_eq!(err.attempts_made, 4);
        assert!(!err.retryable);
        assert_eq!(fetcher.usage_count(), 4);
    }

    #[tokio::test]
    async fn network_errors_are_retryable() {
        let transport = ScriptedTransport::new(vec![
            ScriptedReply::ConnectionError,
            ScriptedReply::Status(200),
        ]);
        let fetcher = RetryingFetcher::new(transport, quick_config());

        assert!(fetcher.fetch(&request()).await.is_ok());
        assert_eq!(fetcher.usage_count(), 2);
    }

    #[tokio::test]
    async fn timeout_is_classified_and_retried() {
        let transport = ScriptedTransport::new(vec![
            ScriptedReply::Hang(Duration::from_millis(200)),
            ScriptedReply::Status(200),
        ]);
        let fetcher = RetryingFetcher::new(transport, quick_config());

        let mut req = request();
        req.kind = RequestKind::Lookup;
        assert!(fetcher.fetch(&req).await.is_ok());
        assert_eq!(fetcher.usage_count(), 2);
    }

    #[tokio::test]
    async fn timeout_exhaustion_carries_timeout_class() {
        let transport = ScriptedTransport::new(vec![
            ScriptedReply::Hang(Duration::from_millis(200)),
            ScriptedReply::Hang(Duration::from_millis(200)),
            ScriptedReply::Hang(Duration::from_millis(200)),
            ScriptedReply::Hang(Duration::from_millis(200)),
        ]);
        let fetcher = RetryingFetcher::new(transport, quick_config());

        let mut req = request();
        req.kind = RequestKind::Lookup;
        let err = fetcher.fetch(&req).await.unwrap_err();
        assert_eq!(err.class, FetchErrorClass::Timeout);
        assert_eq!(err.attempts_made, 4);
    }

    #[tokio::test]
    async fn retry_after_header_takes_precedence_over_backoff() {
        let transport = ScriptedTransport::new(vec![
            ScriptedReply::StatusWithRetryAfter(429, Duration::from_millis(60)),
            ScriptedReply::Status(200),
        ]);
        let fetcher = RetryingFetcher::new(transport, quick_config());

        let started = Instant::now();
        assert!(fetcher.fetch(&request()).await.is_ok());
        assert!(started.elapsed() >= Duration::from_millis(60));
    }

    #[test]
    fn backoff_grows_geometrically_from_base_delay() {
        let transport = ScriptedTransport::new(vec![]);
        let config = FetcherConfig {
            base_delay: Duration::from_millis(300),
            backoff_factor: 1.6,
            ..quick_config()
        };
        let fetcher = RetryingFetcher::new(transport, config);

        assert_eq!(fetcher.backoff_delay(0, None).as_millis(), 300);
        assert_eq!(fetcher.backoff_delay(1, None).as_millis(), 480);
        assert_eq!(fetcher.backoff_delay(2, None).as_millis(), 768);
    }

    #[test]
    fn comps_search_builds_sold_listing_url_for_ebay() {
        let upstream = UpstreamConfig::default();
        let key = CacheKey::derive("ebay", "us", "Makita Drill").unwrap();
        let req = ScrapeRequest::comps_search(&upstream, &key);
        assert!(req.target_url.contains("_nkw=makita%20drill"));
        assert!(req.target_url.contains("LH_Sold=1"));
        assert_eq!(req.kind, RequestKind::Scrape);
    }
}
