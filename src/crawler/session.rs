//! The crawl session: what a run produces
//!
//! A [`CrawlSession`] is created when the supervisor starts and is shared by
//! every crawler. When the run is over it holds the (possibly partial) graph,
//! the invariant violations seen, aggregate metrics and the run's timing.

use crate::condition::Invariant;
use crate::config::CrawlConfig;
use crate::crawler::metrics::CrawlMetrics;
use crate::state::{StateFlowGraph, StateId, StateVertex};
use chrono::{DateTime, Utc};
use std::fmt;
use std::sync::{Arc, Mutex, PoisonError};

/// Terminal status of a run
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CrawlStatus {
    /// Every reachable state was explored, or the state budget was used up
    Completed,
    /// The run was stopped on request
    Stopped,
    /// The maximum runtime passed
    TimedOut,
    /// No working browser was left
    BrowserFailure,
    /// The configuration was rejected before crawling started
    ConfigError,
}

impl CrawlStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Completed => "completed",
            Self::Stopped => "stopped",
            Self::TimedOut => "timed-out",
            Self::BrowserFailure => "browser-failure",
            Self::ConfigError => "config-error",
        }
    }

    /// Process exit code the CLI reports for this status
    pub fn exit_code(&self) -> i32 {
        match self {
            Self::Completed | Self::TimedOut => 0,
            Self::Stopped => 130,
            Self::BrowserFailure => 3,
            Self::ConfigError => 2,
        }
    }
}

impl fmt::Display for CrawlStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// One observed invariant violation
#[derive(Debug, Clone)]
pub struct InvariantViolation {
    pub invariant: Invariant,
    pub state: StateId,
    pub url: String,
    pub detected_at: DateTime<Utc>,
}

#[derive(Debug)]
pub struct CrawlSession {
    config: Arc<CrawlConfig>,
    graph: Arc<StateFlowGraph>,
    metrics: Arc<CrawlMetrics>,
    started_at: DateTime<Utc>,
    finished_at: Mutex<Option<DateTime<Utc>>>,
    violations: Mutex<Vec<InvariantViolation>>,
}

impl CrawlSession {
    pub fn new(config: Arc<CrawlConfig>) -> Self {
        Self {
            graph: Arc::new(StateFlowGraph::with_max_states(config.max_states())),
            config,
            metrics: Arc::new(CrawlMetrics::new()),
            started_at: Utc::now(),
            finished_at: Mutex::new(None),
            violations: Mutex::new(Vec::new()),
        }
    }

    pub fn config(&self) -> &Arc<CrawlConfig> {
        &self.config
    }

    pub fn graph(&self) -> &Arc<StateFlowGraph> {
        &self.graph
    }

    /// The index state, once the first crawler loaded the landing URL
    pub fn initial_state(&self) -> Option<Arc<StateVertex>> {
        self.graph.initial_state()
    }

    pub fn metrics(&self) -> &Arc<CrawlMetrics> {
        &self.metrics
    }

    pub fn config_hash(&self) -> &str {
        self.config.config_hash()
    }

    pub fn started_at(&self) -> DateTime<Utc> {
        self.started_at
    }

    pub fn finished_at(&self) -> Option<DateTime<Utc>> {
        *self
            .finished_at
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    pub fn record_violation(&self, violation: InvariantViolation) {
        self.violations
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(violation);
    }

    /// Violations in the order they were detected
    pub fn violations(&self) -> Vec<InvariantViolation> {
        self.violations
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Stamps the end of the run; later calls keep the first stamp
    pub fn finish(&self) {
        let mut finished = self
            .finished_at
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        if finished.is_none() {
            *finished = Some(Utc::now());
        }
    }

    /// Wall-clock duration of the run (so far, if it is still going)
    pub fn duration(&self) -> chrono::Duration {
        self.finished_at().unwrap_or_else(Utc::now) - self.started_at
    }
}

/// The result of a run: the session and how it ended
#[derive(Debug, Clone)]
pub struct CrawlOutcome {
    pub session: Arc<CrawlSession>,
    pub status: CrawlStatus,
}
