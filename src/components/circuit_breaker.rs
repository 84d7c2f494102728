//! Circuit Breaker
//!
//! Per-filter failure tracking. A filter that keeps timing out is skipped
//! until its reset window has elapsed since the last recorded failure.

use serde::Serialize;
use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};
use std::time::{Duration, Instant};

#[derive(Debug, Clone, Copy)]
struct BreakerState {
    failures: u32,
    last_failure: Instant,
}

/// Point-in-time view of one tracked filter.
#[derive(Debug, Clone, Serialize)]
pub struct BreakerStatus {
    pub filter_id: String,
    pub failures: u32,
    pub open: bool,
    pub since_last_failure_ms: u64,
}

pub struct CircuitBreaker {
    threshold: u32,
    reset_window: Duration,
    states: Mutex<HashMap<String, BreakerState>>,
}

impl CircuitBreaker {
    /// A `threshold` of 0 is treated as 1.
    pub fn new(threshold: u32, reset_window: Duration) -> Self {
        Self {
            threshold: threshold.max(1),
            reset_window,
            states: Mutex::new(HashMap::new()),
        }
    }

    // A poisoned map still holds valid counters.
    fn states(&self) -> MutexGuard<'_, HashMap<String, BreakerState>> {
        self.states.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Drops the entry for `filter_id` when its window has elapsed, then
    /// reports whether the breaker is open.
    pub fn is_open(&self, filter_id: &str) -> bool {
        let mut states = self.states();
        let Some(state) = states.get(filter_id).copied() else {
            return false;
        };

        if state.last_failure.elapsed() > self.reset_window {
            states.remove(filter_id);
            log::debug!("Circuit breaker for filter {filter_id} reset");
            return false;
        }

        state.failures >= self.threshold
    }

    /// Returns true when this failure is the one that opened the breaker.
    pub fn record_failure(&self, filter_id: &str) -> bool {
        let mut states = self.states();
        let now = Instant::now();
        let state = states.entry(filter_id.to_string()).or_insert(BreakerState {
            failures: 0,
            last_failure: now,
        });
        state.failures += 1;
        state.last_failure = now;
        state.failures == self.threshold
    }

    pub fn failure_count(&self, filter_id: &str) -> u32 {
        self.states().get(filter_id).map(|s| s.failures).unwrap_or(0)
    }

    pub fn open_filters(&self) -> Vec<String> {
        let mut open: Vec<String> = self
            .status()
            .into_iter()
            .filter(|s| s.open)
            .map(|s| s.filter_id)
            .collect();
        open.sort();
        open
    }

    /// Snapshot of every tracked entry. Does not expire stale entries.
    pub fn status(&self) -> Vec<BreakerStatus> {
        self.states()
            .iter()
            .map(|(id, state)| {
                let elapsed = state.last_failure.elapsed();
                BreakerStatus {
                    filter_id: id.clone(),
                    failures: state.failures,
                    open: state.failures >= self.threshold && elapsed <= self.reset_window,
                    since_last_failure_ms: elapsed.as_millis() as u64,
                }
            })
            .collect()
    }

    pub fn reset(&self, filter_id: &str) {
        self.states().remove(filter_id);
    }

    pub fn clear(&self) {
        self.states().clear();
    }
}
