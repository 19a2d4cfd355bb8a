//! # Deduplication Window
//!
//! Suppresses repeated attempts for the same logical query within a short
//! horizon. Concurrent in-flight duplicates are the active set's problem;
//! this map only throttles re-attempts across time. Garbage collection is
//! opportunistic — no background timer — and runs only once the map outgrows
//! its bound.

use crate::types::CacheKey;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::time::{Duration, Instant};
use tracing::debug;

/// Map size above which a completed attempt triggers collection.
const GC_ENTRY_BOUND: usize = 500;

/// Time-windowed attempt tracker keyed by the shared cache-key derivation.
pub struct DeduplicationWindow {
    window: Duration,
    attempts: Mutex<HashMap<String, Instant>>,
}

impl DeduplicationWindow {
    pub fn new(window: Duration) -> Self {
        Self {
            window,
            attempts: Mutex::new(HashMap::new()),
        }
    }

    /// True iff the key was attempted less than one window ago.
    pub fn recently_attempted(&self, key: &CacheKey) -> bool {
        let attempts = self.attempts.lock();
        attempts
            .get(&key.to_string())
            .is_some_and(|at| at.elapsed() < self.window)
    }

    /// Remaining suppression time for the key, if any.
    pub fn retry_after(&self, key: &CacheKey) -> Option<Duration> {
        let attempts = self.attempts.lock();
        let at = attempts.get(&key.to_string())?;
        self.window.checked_sub(at.elapsed())
    }

    /// Record an attempt. Called at dequeue time, when the upstream call is
    /// actually committed to, not at submit time.
    pub fn mark_attempted(&self, key: &CacheKey) {
        self.attempts.lock().insert(key.to_string(), Instant::now());
    }

    /// Collect entries older than the window, but only when the map has
    /// outgrown its bound. Invoked after each completed attempt.
    pub fn maybe_gc(&self) {
        let mut attempts = self.attempts.lock();
        if attempts.len() <= GC_ENTRY_BOUND {
            return;
        }
        let before = attempts.len();
        attempts.retain(|_, at| at.elapsed() < self.window);
        debug!(
            removed = before - attempts.len(),
            remaining = attempts.len(),
            "Dedup window GC"
        );
    }

    #[cfg(test)]
    pub(crate) fn len(&self) -> usize {
        self.attempts.lock().len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread::sleep;

    fn key(q: &str) -> CacheKey {
        CacheKey::derive("ebay", "us", q).unwrap()
    }

    #[test]
    fn unmarked_key_is_not_recent() {
        let window = DeduplicationWindow::new(Duration::from_secs(60));
        assert!(!window.recently_attempted(&key("makita drill")));
        assert!(window.retry_after(&key("makita drill")).is_none());
    }

    #[test]
    fn marked_key_is_suppressed_within_window() {
        let window = DeduplicationWindow::new(Duration::from_secs(60));
        window.mark_attempted(&key("makita drill"));

        assert!(window.recently_attempted(&key("makita drill")));
        let remaining = window.retry_after(&key("makita drill")).unwrap();
        assert!(remaining <= Duration::from_secs(60));
        assert!(remaining > Duration::from_secs(55));
    }

    #[test]
    fn suppression_lapses_after_window() {
        let window = DeduplicationWindow::new(Duration::from_millis(20));
        window.mark_attempted(&key("makita drill"));
        sleep(Duration::from_millis(40));

        assert!(!window.recently_attempted(&key("makita drill")));
    }

    #[test]
    fn gc_only_fires_past_bound_and_drops_old_entries() {
        let window = DeduplicationWindow::new(Duration::from_millis(10));
        for i in 0..GC_ENTRY_BOUND + 10 {
            window.mark_attempted(&key(&format!("query {i}")));
        }
        sleep(Duration::from_millis(30));

        window.maybe_gc();
        assert_eq!(window.len(), 0);

        // Below the bound nothing is collected, even when expired.
        window.mark_attempted(&key("straggler"));
        sleep(Duration::from_millis(30));
        window.maybe_gc();
        assert_eq!(window.len(), 1);
    }
}
