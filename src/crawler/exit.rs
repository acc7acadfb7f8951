//! Termination signalling
//!
//! The [`ExitNotifier`] owns the run's termination flag. It moves from
//! `Running` to `Stopping` on the first stop request (the first reason wins)
//! and to `Stopped` once the supervisor has joined every crawler. Crawlers
//! poll it at each state-machine transition.

use std::fmt;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Mutex, PoisonError};
use tracing::info;

/// Why a run is ending
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExitReason {
    /// No crawler has work left
    Exhausted,
    /// The configured maximum number of states was reached
    MaxStates,
    /// The configured maximum runtime passed
    MaxRuntime,
    /// Stopped on request
    Stopped,
    /// Browsers failed beyond the configured restarts
    BrowserFailure,
}

impl fmt::Display for ExitReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = match self {
            Self::Exhausted => "all states exhausted",
            Self::MaxStates => "maximum number of states reached",
            Self::MaxRuntime => "maximum runtime passed",
            Self::Stopped => "stopped on request",
            Self::BrowserFailure => "unrecoverable browser failure",
        };
        write!(f, "{}", text)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExitPhase {
    Running,
    Stopping,
    Stopped,
}

#[derive(Debug)]
struct ExitState {
    phase: ExitPhase,
    reason: Option<ExitReason>,
}

#[derive(Debug)]
pub struct ExitNotifier {
    state: Mutex<ExitState>,
    max_states: Option<usize>,
    active: AtomicUsize,
}

impl ExitNotifier {
    /// Creates a running notifier; `max_states` of `None` means unlimited
    pub fn new(max_states: Option<usize>) -> Self {
        Self {
            state: Mutex::new(ExitState {
                phase: ExitPhase::Running,
                reason: None,
            }),
            max_states,
            active: AtomicUsize::new(0),
        }
    }

    pub fn phase(&self) -> ExitPhase {
        self.state
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .phase
    }

    pub fn reason(&self) -> Option<ExitReason> {
        self.state
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .reason
    }

    pub fn is_running(&self) -> bool {
        self.phase() == ExitPhase::Running
    }

    pub fn should_stop(&self) -> bool {
        !self.is_running()
    }

    /// Requests termination; returns true if this call initiated it
    pub fn stop(&self, reason: ExitReason) -> bool {
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        if state.phase != ExitPhase::Running {
            return false;
        }
        info!("Stopping crawl: {}", reason);
        state.phase = ExitPhase::Stopping;
        state.reason = Some(reason);
        true
    }

    /// Marks the run as fully stopped; every crawler has been joined
    pub fn mark_stopped(&self) {
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        if state.reason.is_none() {
            state.reason = Some(ExitReason::Exhausted);
        }
        state.phase = ExitPhase::Stopped;
    }

    /// Stops the run if `state_count` reached the configured maximum
    pub fn check_max_states(&self, state_count: usize) -> bool {
        match self.max_states {
            Some(max) if state_count >= max => {
                self.stop(ExitReason::MaxStates);
                true
            }
            _ => false,
        }
    }

    pub fn crawler_started(&self) {
        self.active.fetch_add(1, Ordering::SeqCst);
    }

    /// Returns the number of crawlers still active
    pub fn crawler_finished(&self) -> usize {
        let previous = self
            .active
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| Some(n.saturating_sub(1)))
            .unwrap_or(0);
        previous.saturating_sub(1)
    }

    pub fn active_crawlers(&self) -> usize {
        self.active.load(Ordering::SeqCst)
    }
}
