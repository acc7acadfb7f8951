//! Crawl metrics
//!
//! Counters and timers shared by all crawlers of a session. Everything is a
//! relaxed atomic; a [`MetricsSnapshot`] is a consistent-enough copy for
//! reports.

use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

#[derive(Debug, Default)]
pub struct CrawlMetrics {
    fires_attempted: AtomicU64,
    fires_succeeded: AtomicU64,
    fires_failed: AtomicU64,
    states_discovered: AtomicU64,
    edges_added: AtomicU64,
    invariants_violated: AtomicU64,
    plugin_failures: AtomicU64,
    browser_restarts: AtomicU64,
    fire_micros: AtomicU64,
    wait_micros: AtomicU64,
    extract_micros: AtomicU64,
}

/// Point-in-time copy of [`CrawlMetrics`]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct MetricsSnapshot {
    pub fires_attempted: u64,
    pub fires_succeeded: u64,
    pub fires_failed: u64,
    pub states_discovered: u64,
    pub edges_added: u64,
    pub invariants_violated: u64,
    pub plugin_failures: u64,
    pub browser_restarts: u64,
    pub fire_time: Duration,
    pub wait_time: Duration,
    pub extract_time: Duration,
}

fn add_micros(counter: &AtomicU64, elapsed: Duration) {
    counter.fetch_add(elapsed.as_micros() as u64, Ordering::Relaxed);
}

fn bump(counter: &AtomicU64) {
    counter.fetch_add(1, Ordering::Relaxed);
}

impl CrawlMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    /// Records one fire attempt and its outcome
    pub fn record_fire(&self, succeeded: bool, elapsed: Duration) {
        bump(&self.fires_attempted);
        if succeeded {
            bump(&self.fires_succeeded);
        } else {
            bump(&self.fires_failed);
        }
        add_micros(&self.fire_micros, elapsed);
    }

    pub fn record_wait(&self, elapsed: Duration) {
        add_micros(&self.wait_micros, elapsed);
    }

    pub fn record_extract(&self, elapsed: Duration) {
        add_micros(&self.extract_micros, elapsed);
    }

    pub fn state_discovered(&self) {
        bump(&self.states_discovered);
    }

    pub fn edge_added(&self) {
        bump(&self.edges_added);
    }

    pub fn invariant_violated(&self) {
        bump(&self.invariants_violated);
    }

    pub fn plugin_failed(&self, count: usize) {
        self.plugin_failures
            .fetch_add(count as u64, Ordering::Relaxed);
    }

    pub fn browser_restarted(&self) {
        bump(&self.browser_restarts);
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        let load = |c: &AtomicU64| c.load(Ordering::Relaxed);
        MetricsSnapshot {
            fires_attempted: load(&self.fires_attempted),
            fires_succeeded: load(&self.fires_succeeded),
            fires_failed: load(&self.fires_failed),
            states_discovered: load(&self.states_discovered),
            edges_added: load(&self.edges_added),
            invariants_violated: load(&self.invariants_violated),
            plugin_failures: load(&self.plugin_failures),
            browser_restarts: load(&self.browser_restarts),
            fire_time: Duration::from_micros(load(&self.fire_micros)),
            wait_time: Duration::from_micros(load(&self.wait_micros)),
            extract_time: Duration::from_micros(load(&self.extract_micros)),
        }
    }
}
