//! Summary data of a finished crawl
//!
//! A [`CrawlSummary`] is a plain snapshot of a session: everything the
//! markdown report and the console printer need, detached from the live graph.

use crate::crawler::{CrawlOutcome, MetricsSnapshot};
use crate::state::StateId;
use thiserror::Error;

/// Errors that can occur during output operations
#[derive(Debug, Error)]
pub enum OutputError {
    #[error("Failed to write output: {0}")]
    Write(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type for output operations
pub type OutputResult<T> = Result<T, OutputError>;

/// One vertex of the state-flow graph
#[derive(Debug, Clone, PartialEq)]
pub struct StateSummary {
    pub id: StateId,
    pub name: String,
    pub url: String,
    /// Number of events from the index state; `None` if unreachable
    pub depth: Option<usize>,
    pub outgoing: usize,
    pub incoming: usize,
}

/// One edge of the state-flow graph
#[derive(Debug, Clone, PartialEq)]
pub struct EdgeSummary {
    pub source: StateId,
    pub target: StateId,
    /// Event type and element, e.g. `click on xpath /HTML[1]/BODY[1]/A[1]`
    pub event: String,
}

/// An invariant that failed in a state
#[derive(Debug, Clone, PartialEq)]
pub struct ViolationSummary {
    pub invariant: String,
    pub state: StateId,
    pub url: String,
    pub detected_at: String,
}

/// Summary of a crawl session
#[derive(Debug, Clone, Default)]
pub struct CrawlSummary {
    pub landing_url: String,
    pub status: String,
    pub config_hash: String,
    pub started_at: String,
    pub finished_at: Option<String>,
    pub duration_seconds: Option<u64>,
    pub states: Vec<StateSummary>,
    pub edges: Vec<EdgeSummary>,
    pub violations: Vec<ViolationSummary>,
    pub metrics: MetricsSnapshot,
}

impl CrawlSummary {
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshots a finished crawl; states and edges are ordered by id
    pub fn from_outcome(outcome: &CrawlOutcome) -> Self {
        let session = &outcome.session;
        let graph = session.graph();
        let distances = graph.distances_from_initial();

        let mut states: Vec<StateSummary> = graph
            .all_states()
            .iter()
            .map(|state| StateSummary {
                id: state.id(),
                name: state.name().to_string(),
                url: state.url().to_string(),
                depth: distances.get(&state.id()).copied(),
                outgoing: graph.outgoing_edges(state.id()).len(),
                incoming: graph.incoming_edges(state.id()).len(),
            })
            .collect();
        states.sort_by_key(|s| s.id);

        let mut edges: Vec<EdgeSummary> = graph
            .all_edges()
            .iter()
            .filter_map(|edge| {
                Some(EdgeSummary {
                    source: edge.source()?,
                    target: edge.target()?,
                    event: edge.to_string(),
                })
            })
            .collect();
        edges.sort_by(|a, b| (a.source, a.target, &a.event).cmp(&(b.source, b.target, &b.event)));

        let violations = session
            .violations()
            .into_iter()
            .map(|v| ViolationSummary {
                invariant: v.invariant.description,
                state: v.state,
                url: v.url,
                detected_at: v.detected_at.to_rfc3339(),
            })
            .collect();

        let finished_at = session.finished_at();
        Self {
            landing_url: session.config().landing_url().to_string(),
            status: outcome.status.to_string(),
            config_hash: session.config_hash().to_string(),
            started_at: session.started_at().to_rfc3339(),
            finished_at: finished_at.map(|t| t.to_rfc3339()),
            duration_seconds: finished_at.map(|_| session.duration().num_seconds().max(0) as u64),
            states,
            edges,
            violations,
            metrics: session.metrics().snapshot(),
        }
    }

    /// Percentage of fire attempts that succeeded
    pub fn fire_success_rate(&self) -> f64 {
        if self.metrics.fires_attempted == 0 {
            return 0.0;
        }
        (self.metrics.fires_succeeded as f64 / self.metrics.fires_attempted as f64) * 100.0
    }

    /// Deepest reachable state, 0 for an empty graph
    pub fn max_depth(&self) -> usize {
        self.states.iter().filter_map(|s| s.depth).max().unwrap_or(0)
    }
}
