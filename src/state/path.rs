//! The event path a crawler has followed since its last reset

use crate::state::{Eventable, StateId};
use crate::FlowError;
use std::sync::Arc;

/// Ordered sequence of bound eventables starting at the index state
///
/// Consecutive eventables always share a vertex: the target of one is the
/// source of the next. The target of the last one is the crawler's current state.
#[derive(Debug, Clone, Default)]
pub struct CrawlPath {
    events: Vec<Arc<Eventable>>,
}

impl CrawlPath {
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends an eventable, refusing one that does not continue the path
    pub fn push(&mut self, eventable: Arc<Eventable>) -> Result<(), FlowError> {
        let source = eventable.source().ok_or_else(|| {
            FlowError::EdgeFrozen(format!("{} is unbound and cannot join a path", eventable))
        })?;

        let expected = self.last_target().unwrap_or(StateId::INDEX);
        if source != expected {
            return Err(FlowError::EdgeFrozen(format!(
                "{} starts at state {} but the path ends at state {}",
                eventable, source, expected
            )));
        }

        self.events.push(eventable);
        Ok(())
    }

    /// Target of the last eventable, `None` for an empty path
    pub fn last_target(&self) -> Option<StateId> {
        self.events.last().and_then(|e| e.target())
    }

    pub fn len(&self) -> usize {
        self.events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    pub fn clear(&mut self) {
        self.events.clear();
    }

    pub fn events(&self) -> &[Arc<Eventable>] {
        &self.events
    }

    /// States visited by this path, starting with the index
    pub fn state_ids(&self) -> Vec<StateId> {
        let mut ids = vec![StateId::INDEX];
        ids.extend(self.events.iter().filter_map(|e| e.target()));
        ids
    }
}
