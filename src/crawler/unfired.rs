//! The unfired-candidate store
//!
//! Per state, the queue of candidate actions not yet handed to any crawler.
//! The store is shared by all crawlers and also acts as their work pool:
//! [`UnfiredCandidateStore::await_new_task`] hands out the next state worth
//! exploring and notices when no crawler can produce more work.
//!
//! Guarantees:
//!
//! - a candidate is queued at most once per state (by its key), so every
//!   queued candidate is returned by [`poll`](UnfiredCandidateStore::poll) at
//!   most once across all crawlers
//! - exhaustion is monotone: once a state's queue ran dry it stays exhausted
//!   and later additions for it are ignored

use crate::crawler::candidate::{CandidateElement, CandidateKey};
use crate::crawler::exit::ExitNotifier;
use crate::state::{StateFlowGraph, StateId};
use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tracing::debug;

/// How long an idle crawler sleeps before re-checking the exit flag
const IDLE_RECHECK: Duration = Duration::from_millis(50);

/// Lifecycle of one state's queue
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueueState {
    /// Nothing was ever queued for the state
    Unknown,
    /// Candidates remain
    Pending,
    /// The queue ran dry; nothing will be queued again
    Exhausted,
}

#[derive(Debug, Default)]
struct StoreInner {
    queues: HashMap<StateId, VecDeque<CandidateElement>>,
    seen: HashMap<StateId, HashSet<CandidateKey>>,
    exhausted: HashSet<StateId>,
    busy: usize,
    closed: bool,
}

#[derive(Debug, Default)]
pub struct UnfiredCandidateStore {
    inner: Mutex<StoreInner>,
    work_available: Condvar,
}

/// A claimed unit of work: explore from `target`
///
/// While a guard is alive its crawler counts as busy, i.e. as a possible source
/// of new work. Dropping the guard releases the claim.
#[derive(Debug)]
pub struct TaskGuard {
    store: Arc<UnfiredCandidateStore>,
    target: StateId,
}

impl TaskGuard {
    pub fn target(&self) -> StateId {
        self.target
    }
}

impl Drop for TaskGuard {
    fn drop(&mut self) {
        self.store.finish_task();
    }
}

impl UnfiredCandidateStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, StoreInner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Queues candidates for a state
    ///
    /// Candidates already queued (or already handed out) for the state are
    /// skipped, and nothing is queued for an exhausted state. Queuing an empty
    /// list registers the state, which the next poll then exhausts.
    ///
    /// # Returns
    ///
    /// The number of candidates actually queued
    pub fn add(&self, state: StateId, candidates: Vec<CandidateElement>) -> usize {
        let mut inner = self.lock();
        if inner.exhausted.contains(&state) {
            debug!("Ignoring {} candidates for exhausted state {}", candidates.len(), state);
            return 0;
        }

        let mut fresh = Vec::with_capacity(candidates.len());
        {
            let seen = inner.seen.entry(state).or_default();
            for candidate in candidates {
                if seen.insert(candidate.key()) {
                    fresh.push(candidate);
                }
            }
        }

        let added = fresh.len();
        inner.queues.entry(state).or_default().extend(fresh);
        drop(inner);

        if added > 0 {
            self.work_available.notify_all();
        }
        added
    }

    /// Removes and returns the next candidate of `state`
    ///
    /// Returns `None` once the state is exhausted; the call that finds the
    /// queue empty marks it exhausted.
    pub fn poll(&self, state: StateId) -> Option<CandidateElement> {
        let mut inner = self.lock();
        if inner.exhausted.contains(&state) {
            return None;
        }

        let next = inner.queues.get_mut(&state).and_then(VecDeque::pop_front);
        if next.is_none() {
            debug!("State {} is exhausted", state);
            inner.queues.remove(&state);
            inner.exhausted.insert(state);
        }
        next
    }

    pub fn is_exhausted(&self, state: StateId) -> bool {
        self.lock().exhausted.contains(&state)
    }

    pub fn queue_state(&self, state: StateId) -> QueueState {
        let inner = self.lock();
        if inner.exhausted.contains(&state) {
            QueueState::Exhausted
        } else if inner.queues.contains_key(&state) {
            QueueState::Pending
        } else {
            QueueState::Unknown
        }
    }

    /// Drops every remaining candidate of `state` and marks it exhausted
    pub fn purge(&self, state: StateId) {
        let mut inner = self.lock();
        inner.queues.remove(&state);
        inner.exhausted.insert(state);
    }

    /// Number of candidates still queued for `state`
    pub fn pending_count(&self, state: StateId) -> usize {
        self.lock().queues.get(&state).map_or(0, VecDeque::len)
    }

    /// True once idleness was detected: no queued work and no busy crawler
    pub fn is_closed(&self) -> bool {
        self.lock().closed
    }

    /// Claims a task without a target lookup; used while crawling the index
    pub fn start_task(self: &Arc<Self>, target: StateId) -> TaskGuard {
        self.lock().busy += 1;
        TaskGuard {
            store: Arc::clone(self),
            target,
        }
    }

    fn finish_task(&self) {
        let mut inner = self.lock();
        inner.busy = inner.busy.saturating_sub(1);
        drop(inner);
        self.work_available.notify_all();
    }

    /// Wakes every crawler blocked in [`await_new_task`](Self::await_new_task)
    pub fn wake_all(&self) {
        self.work_available.notify_all();
    }

    /// Blocks until there is a state to explore
    ///
    /// The next target is the pending state closest to the initial state,
    /// smaller id first on ties. Returns `None` when the run is stopping or
    /// when no work is queued and no crawler is busy, in which case the store
    /// closes for good.
    pub fn await_new_task(
        self: &Arc<Self>,
        graph: &StateFlowGraph,
        exit: &ExitNotifier,
    ) -> Option<TaskGuard> {
        let mut inner = self.lock();
        loop {
            if inner.closed || exit.should_stop() {
                return None;
            }

            let pending: Vec<StateId> = inner
                .queues
                .iter()
                .filter(|(_, q)| !q.is_empty())
                .map(|(id, _)| *id)
                .collect();

            if !pending.is_empty() {
                let distances = graph.distances_from_initial();
                let target = pending
                    .into_iter()
                    .min_by_key(|id| (distances.get(id).copied().unwrap_or(usize::MAX), *id));
                if let Some(target) = target {
                    inner.busy += 1;
                    return Some(TaskGuard {
                        store: Arc::clone(self),
                        target,
                    });
                }
            }

            if inner.busy == 0 {
                debug!("No queued candidates and no busy crawler, closing the store");
                inner.closed = true;
                drop(inner);
                self.work_available.notify_all();
                return None;
            }

            inner = self
                .work_available
                .wait_timeout(inner, IDLE_RECHECK)
                .unwrap_or_else(PoisonError::into_inner)
                .0;
        }
    }
}
