#![allow(clippy::missing_errors_doc)] // Allow public functions without # Errors sections
#![allow(clippy::must_use_candidate)] // Allow methods without must_use when context is clear

//! # Enrichment Core
//!
//! Scheduling and resilience engine for competitor-price enrichment of
//! marketplace candidate matches.
//!
//! ## Overview
//!
//! Candidate matches arrive from listing scanners; each is enriched with
//! competitor pricing fetched through a metered, anti-bot-protected scraping
//! API. The enrichment path never blocks the primary matching flow, bounds
//! concurrent outbound requests, avoids redundant calls to the paid
//! upstream, and degrades gracefully — then self-heals — when the upstream
//! turns unhealthy.
//!
//! ## Architecture
//!
//! Admission flows through a fixed pipeline, each stage a separate
//! component:
//!
//! - [`gate::EligibilityGate`] — feature flags, sampling, ROI floor
//! - [`cache::ResultCache`] — TTL cache with explicit stale reads
//! - [`dedup::DeduplicationWindow`] — re-attempt suppression over time
//! - [`resilience::CircuitBreaker`] — upstream health gating
//! - [`fetcher::RetryingFetcher`] — timeout, backoff, error classification
//! - [`scheduler::EnrichmentScheduler`] — micro-batching, the bounded pump,
//!   and event emission
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use enrichment_core::config::{EnrichmentConfig, FeatureFlags};
//! use enrichment_core::fetcher::HttpScrapeTransport;
//! use enrichment_core::scheduler::EnrichmentScheduler;
//! use enrichment_core::store::InMemoryStore;
//! use enrichment_core::types::Match;
//! use std::sync::Arc;
//!
//! # tokio_test::block_on(async {
//! let config = EnrichmentConfig::from_env().expect("valid configuration");
//! let transport = Arc::new(HttpScrapeTransport::new(&config.upstream).expect("client"));
//! let scheduler = EnrichmentScheduler::new(
//!     config,
//!     Arc::new(InMemoryStore::new()),
//!     transport,
//!     FeatureFlags::default(),
//! );
//!
//! let mut events = scheduler.subscribe();
//! let outcome = scheduler
//!     .submit(&Match {
//!         id: "m1".to_string(),
//!         title: "Makita Drill".to_string(),
//!         asking_price: Some(45.0),
//!         roi_score: Some(80.0),
//!         platform: "craigslist".to_string(),
//!     })
//!     .await;
//! println!("enqueued: {} ({})", outcome.enqueued, outcome.reason);
//! let next = events.recv().await;
//! # let _ = next;
//! # });
//! ```

pub mod cache;
pub mod config;
pub mod dedup;
pub mod error;
pub mod events;
pub mod fetcher;
pub mod gate;
pub mod logging;
pub mod pricing;
pub mod resilience;
pub mod scheduler;
pub mod store;
pub mod types;

pub use config::{EnrichmentConfig, FeatureFlags};
pub use error::{EnrichmentError, Result};
pub use events::{EnrichmentEvent, EventPublisher, PublishedEvent};
pub use resilience::{CircuitBreaker, CircuitState};
pub use scheduler::EnrichmentScheduler;
pub use types::{Match, SubmitOutcome, SubmitReason};
