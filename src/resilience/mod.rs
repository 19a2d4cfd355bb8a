//! # Resilience Module
//!
//! Fault-isolation primitives guarding the scraping upstream. The circuit
//! breaker gates admission for all enrichment attempts, independent of the
//! fetcher's per-request retries.

pub mod circuit_breaker;

pub use circuit_breaker::{CircuitBreaker, CircuitState};
