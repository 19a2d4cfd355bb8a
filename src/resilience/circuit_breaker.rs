//! # Circuit Breaker Implementation
//!
//! Classic three-state breaker (Closed, Open, Half-Open) guarding the
//! scraping upstream. Transitions are evaluated lazily at admission time —
//! there is no background timer probing for recovery — and the half-open
//! trial tolerates zero failures: one failed probe re-opens the circuit with
//! a fresh window. That slow-recovery policy suits a metered, cost-sensitive
//! upstream where speculative traffic is money.

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

/// Circuit breaker states representing the current operational mode
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum CircuitState {
    /// Normal operation - all calls are allowed through
    Closed,
    /// Failure mode - all admission is rejected until the reset window lapses
    Open,
    /// Testing recovery - trial traffic allowed; one failure re-opens
    HalfOpen,
}

#[derive(Debug)]
struct BreakerInner {
    state: CircuitState,
    failure_count: u32,
    opened_at: Option<Instant>,
}

/// Upstream health tracker shared by every enrichment attempt.
///
/// Admission (`is_admissible`) and outcome recording (`record_success`,
/// `record_failure`) are independent of per-request retries: the fetcher
/// retries internally, and only the final outcome of each attempt lands here.
#[derive(Debug)]
pub struct CircuitBreaker {
    /// Component name for logging
    name: String,
    /// Consecutive failures that trip the circuit
    failure_threshold: u32,
    /// How long the circuit stays open before a half-open trial
    reset_window: Duration,
    inner: Mutex<BreakerInner>,
}

impl CircuitBreaker {
    pub fn new(name: impl Into<String>, failure_threshold: u32, reset_window: Duration) -> Self {
        let name = name.into();
        info!(
            component = %name,
            failure_threshold,
            reset_ms = reset_window.as_millis() as u64,
            "🛡️ Circuit breaker initialized"
        );
        Self {
            name,
            failure_threshold,
            reset_window,
            inner: Mutex::new(BreakerInner {
                state: CircuitState::Closed,
                failure_count: 0,
                opened_at: None,
            }),
        }
    }

    /// Current circuit state, without side effects.
    pub fn state(&self) -> CircuitState {
        self.inner.lock().state
    }

    /// Consecutive failure count, for diagnostics.
    pub fn failure_count(&self) -> u32 {
        self.inner.lock().failure_count
    }

    /// Remaining open-window time, when the circuit is open.
    pub fn remaining_open(&self) -> Option<Duration> {
        let inner = self.inner.lock();
        if inner.state != CircuitState::Open {
            return None;
        }
        let opened_at = inner.opened_at?;
        self.reset_window.checked_sub(opened_at.elapsed())
    }

    /// Check whether a new attempt may proceed.
    ///
    /// Side-effecting: an open circuit whose reset window has lapsed
    /// transitions to half-open here, with the failure count reset, so
    /// recovery is probed by the next admission check instead of a timer.
    pub fn is_admissible(&self) -> bool {
        let mut inner = self.inner.lock();
        match inner.state {
            CircuitState::Closed | CircuitState::HalfOpen => true,
            CircuitState::Open => {
                let elapsed = inner
                    .opened_at
                    .map(|at| at.elapsed())
                    .unwrap_or(self.reset_window);
                if elapsed < self.reset_window {
                    return false;
                }
                inner.state = CircuitState::HalfOpen;
                inner.failure_count = 0;
                info!(component = %self.name, "🟡 Circuit breaker half-open (testing recovery)");
                true
            }
        }
    }

    /// Record a successful attempt. Closes a half-open trial and resets the
    /// failure count whenever health is confirmed.
    pub fn record_success(&self) {
        let mut inner = self.inner.lock();
        match inner.state {
            CircuitState::Closed => {
                inner.failure_count = 0;
            }
            CircuitState::HalfOpen => {
                inner.state = CircuitState::Closed;
                inner.failure_count = 0;
                inner.opened_at = None;
                info!(component = %self.name, "🟢 Circuit breaker closed (recovered)");
            }
            CircuitState::Open => {
                // Attempt admitted before the trip finished; ignore.
                debug!(component = %self.name, "Success recorded while circuit is open");
            }
        }
    }

    /// Record a failed attempt. Trips the circuit at the threshold while
    /// closed; re-opens immediately during a half-open trial.
    pub fn record_failure(&self) {
        let mut inner = self.inner.lock();
        match inner.state {
            CircuitState::Closed => {
                inner.failure_count += 1;
                if inner.failure_count >= self.failure_threshold {
                    inner.state = CircuitState::Open;
                    inner.opened_at = Some(Instant::now());
                    warn!(
                        component = %self.name,
                        consecutive_failures = inner.failure_count,
                        failure_threshold = self.failure_threshold,
                        reset_ms = self.reset_window.as_millis() as u64,
                        "🔴 Circuit breaker opened (failing fast)"
                    );
                }
            }
            CircuitState::HalfOpen => {
                inner.state = CircuitState::Open;
                inner.opened_at = Some(Instant::now());
                warn!(component = %self.name, "🔴 Circuit breaker re-opened (trial failed)");
            }
            CircuitState::Open => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread::sleep;

    fn breaker(threshold: u32, reset: Duration) -> CircuitBreaker {
        CircuitBreaker::new("test", threshold, reset)
    }

    #[test]
    fn starts_closed_and_admits() {
        let circuit = breaker(3, Duration::from_millis(100));
        assert_eq!(circuit.state(), CircuitState::Closed);
        assert!(circuit.is_admissible());
    }

    #[test]
    fn success_while_closed_resets_failure_count() {
        let circuit = breaker(3, Duration::from_millis(100));
        circuit.record_failure();
        circuit.record_failure();
        assert_eq!(circuit.failure_count(), 2);

        circuit.record_success();
        assert_eq!(circuit.failure_count(), 0);
    }

    #[test]
    fn trips_open_at_exactly_the_threshold() {
        let circuit = breaker(3, Duration::from_millis(100));
        circuit.record_failure();
        circuit.record_failure();
        assert_eq!(circuit.state(), CircuitState::Closed);

        circuit.record_failure();
        assert_eq!(circuit.state(), CircuitState::Open);
        assert!(!circuit.is_admissible());
        assert!(circuit.remaining_open().is_some());
    }

    #[test]
    fn open_transitions_to_half_open_lazily_after_reset_window() {
        let circuit = breaker(1, Duration::from_millis(30));
        circuit.record_failure();
        assert_eq!(circuit.state(), CircuitState::Open);

        sleep(Duration::from_millis(50));

        // No timer fired; the state still reads open until admission is
        // checked, which performs the transition and resets the count.
        assert_eq!(circuit.state(), CircuitState::Open);
        assert!(circuit.is_admissible());
        assert_eq!(circuit.state(), CircuitState::HalfOpen);
        assert_eq!(circuit.failure_count(), 0);
    }

    #[test]
    fn half_open_success_closes_circuit() {
        let circuit = breaker(1, Duration::from_millis(20));
        circuit.record_failure();
        sleep(Duration::from_millis(40));
        assert!(circuit.is_admissible());

        circuit.record_success();
        assert_eq!(circuit.state(), CircuitState::Closed);
        assert_eq!(circuit.failure_count(), 0);
    }

    #[test]
    fn half_open_failure_reopens_with_fresh_window() {
        let circuit = breaker(1, Duration::from_millis(40));
        circuit.record_failure();
        sleep(Duration::from_millis(60));
        assert!(circuit.is_admissible());

        circuit.record_failure();
        assert_eq!(circuit.state(), CircuitState::Open);

        // Window restarted at the trial failure, so admission stays denied.
        assert!(!circuit.is_admissible());
    }
}
