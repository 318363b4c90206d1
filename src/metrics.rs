//! Injected observability sink for scoring components.
//!
//! Components take a sink by reference instead of writing to process-wide
//! state, so they stay pure and testable in isolation. The host wires this
//! to whatever collector it runs.

use std::collections::HashMap;
use std::sync::Mutex;

/// Counter and timing sink implemented by the host's metrics layer.
pub trait MetricsSink: Send + Sync {
    /// Increment a named counter by one.
    fn increment(&self, name: &str);
    /// Record a duration in milliseconds under a named timer.
    fn timing(&self, name: &str, millis: u64);
}

/// Sink that discards everything. The default when the host wires nothing.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopMetrics;

impl MetricsSink for NoopMetrics {
    fn increment(&self, _name: &str) {}
    fn timing(&self, _name: &str, _millis: u64) {}
}

/// In-memory counting sink for tests and diagnostics.
#[derive(Debug, Default)]
pub struct CountingMetrics {
    counters: Mutex<HashMap<String, u64>>,
    timings: Mutex<HashMap<String, Vec<u64>>>,
}

impl CountingMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    /// Current value of a counter, zero if never incremented.
    pub fn count(&self, name: &str) -> u64 {
        self.counters
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .get(name)
            .copied()
            .unwrap_or(0)
    }

    /// All recorded durations for a timer, in call order.
    pub fn timings(&self, name: &str) -> Vec<u64> {
        self.timings
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .get(name)
            .cloned()
            .unwrap_or_default()
    }
}

impl MetricsSink for CountingMetrics {
    fn increment(&self, name: &str) {
        *self
            .counters
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .entry(name.to_owned())
            .or_insert(0) += 1;
    }

    fn timing(&self, name: &str, millis: u64) {
        self.timings
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .entry(name.to_owned())
            .or_default()
            .push(millis);
    }
}
