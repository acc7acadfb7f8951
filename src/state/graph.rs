//! The state-flow graph
//!
//! A directed multigraph whose vertices are [`StateVertex`] values and whose
//! edges are bound [`Eventable`] values. Vertices and edges live in arenas keyed
//! by id/insertion index; adjacency is kept as edge-index lists per vertex, so
//! nothing holds a pointer back to its parent and paths are computed on demand.
//!
//! One `RwLock` guards the whole structure. Every mutating operation is atomic
//! with respect to the others: in particular [`StateFlowGraph::add_transition`]
//! inserts the target state and the edge under the same write lock, so no reader
//! ever sees an edge whose endpoints are missing.

use crate::state::eventable::EdgeKey;
use crate::state::vertex::{state_name, StateVertexFactory};
use crate::state::{dom_hash, Eventable, StateId, StateVertex};
use crate::FlowError;
use std::collections::{BTreeMap, HashMap, HashSet, VecDeque};
use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

/// Result of inserting a state
#[derive(Debug, Clone)]
pub enum AddState {
    /// The state was new and is now part of the graph
    Added(Arc<StateVertex>),
    /// A state with the same canonical DOM already existed; it is returned
    AlreadyPresent(Arc<StateVertex>),
}

impl AddState {
    pub fn vertex(&self) -> &Arc<StateVertex> {
        match self {
            Self::Added(v) | Self::AlreadyPresent(v) => v,
        }
    }

    pub fn is_added(&self) -> bool {
        matches!(self, Self::Added(_))
    }
}

/// Result of recording one fired event in the graph
#[derive(Debug, Clone)]
pub struct Transition {
    /// The state the event led to
    pub target: Arc<StateVertex>,
    /// The recorded (or already present) edge
    pub eventable: Arc<Eventable>,
    /// True if `target` was created by this transition
    pub new_state: bool,
    /// True if the edge was not in the graph before
    pub new_edge: bool,
}

#[derive(Debug)]
struct GraphInner {
    states: BTreeMap<StateId, Arc<StateVertex>>,
    by_hash: HashMap<String, StateId>,
    edges: Vec<Arc<Eventable>>,
    edge_index: HashMap<EdgeKey, usize>,
    outgoing: HashMap<StateId, Vec<usize>>,
    incoming: HashMap<StateId, Vec<usize>>,
    initial: Option<StateId>,
    next_id: u32,
    max_states: Option<usize>,
}

impl GraphInner {
    fn insert_vertex(&mut self, vertex: Arc<StateVertex>) {
        let id = vertex.id();
        self.by_hash.insert(vertex.dom_hash().to_string(), id);
        self.states.insert(id, vertex);
        if id.0 >= self.next_id {
            self.next_id = id.0 + 1;
        }
    }

    fn add_state(&mut self, vertex: StateVertex) -> Result<AddState, FlowError> {
        if let Some(existing) = self
            .by_hash
            .get(vertex.dom_hash())
            .and_then(|id| self.states.get(id))
        {
            return Ok(AddState::AlreadyPresent(existing.clone()));
        }
        if self.states.contains_key(&vertex.id()) {
            return Err(FlowError::DuplicateStateId(vertex.id()));
        }
        let vertex = Arc::new(vertex);
        self.insert_vertex(vertex.clone());
        Ok(AddState::Added(vertex))
    }

    fn new_state_for(
        &mut self,
        factory: &dyn StateVertexFactory,
        url: &str,
        dom: &str,
        stripped_dom: &str,
    ) -> (Arc<StateVertex>, bool) {
        if let Some(existing) = self
            .by_hash
            .get(&dom_hash(stripped_dom))
            .and_then(|id| self.states.get(id))
        {
            return (existing.clone(), false);
        }

        let id = StateId(self.next_id);
        let vertex = Arc::new(factory.new_state_vertex(
            id,
            url,
            &state_name(id),
            dom,
            stripped_dom,
        ));
        self.insert_vertex(vertex.clone());
        (vertex, true)
    }

    fn add_edge(&mut self, eventable: Eventable) -> Result<(Arc<Eventable>, bool), FlowError> {
        let key = eventable.edge_key().ok_or_else(|| {
            FlowError::EdgeFrozen(format!("{} has no endpoints and cannot be an edge", eventable))
        })?;

        for endpoint in [key.source, key.target] {
            if !self.states.contains_key(&endpoint) {
                return Err(FlowError::UnknownState(endpoint));
            }
        }

        if let Some(&idx) = self.edge_index.get(&key) {
            return Ok((self.edges[idx].clone(), false));
        }

        let idx = self.edges.len();
        let eventable = Arc::new(eventable);
        self.edges.push(eventable.clone());
        self.edge_index.insert(key.clone(), idx);
        self.outgoing.entry(key.source).or_default().push(idx);
        self.incoming.entry(key.target).or_default().push(idx);
        Ok((eventable, true))
    }

    /// Outgoing edge indices of `id`, ordered by (target id, insertion order)
    fn ordered_outgoing(&self, id: StateId) -> Vec<usize> {
        let mut out = self.outgoing.get(&id).cloned().unwrap_or_default();
        out.sort_by_key(|&idx| (self.edges[idx].target(), idx));
        out
    }

    /// Breadth-first search from `from`; returns for each reached vertex the
    /// edge index it was first discovered through
    fn bfs(&self, from: StateId) -> HashMap<StateId, Option<usize>> {
        let mut parent: HashMap<StateId, Option<usize>> = HashMap::new();
        if !self.states.contains_key(&from) {
            return parent;
        }

        let mut queue = VecDeque::new();
        parent.insert(from, None);
        queue.push_back(from);

        while let Some(current) = queue.pop_front() {
            for idx in self.ordered_outgoing(current) {
                if let Some(target) = self.edges[idx].target() {
                    if !parent.contains_key(&target) {
                        parent.insert(target, Some(idx));
                        queue.push_back(target);
                    }
                }
            }
        }

        parent
    }
}

/// Directed multigraph of application states and the events between them
#[derive(Debug)]
pub struct StateFlowGraph {
    inner: RwLock<GraphInner>,
}

impl Default for StateFlowGraph {
    fn default() -> Self {
        Self::new()
    }
}

impl StateFlowGraph {
    /// Creates an empty graph; the first non-index state gets id 1
    pub fn new() -> Self {
        Self {
            inner: RwLock::new(GraphInner {
                states: BTreeMap::new(),
                by_hash: HashMap::new(),
                edges: Vec::new(),
                edge_index: HashMap::new(),
                outgoing: HashMap::new(),
                incoming: HashMap::new(),
                initial: None,
                next_id: 1,
                max_states: None,
            }),
        }
    }

    /// Creates an empty graph that refuses transitions to new states once it
    /// holds `max_states` states; `None` means unlimited
    pub fn with_max_states(max_states: Option<usize>) -> Self {
        let graph = Self::new();
        graph.write().max_states = max_states;
        graph
    }

    fn read(&self) -> RwLockReadGuard<'_, GraphInner> {
        self.inner.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, GraphInner> {
        self.inner.write().unwrap_or_else(PoisonError::into_inner)
    }

    /// Installs the index state
    ///
    /// The first call wins; later calls return the already installed index.
    pub fn put_index(&self, index: StateVertex) -> Arc<StateVertex> {
        let mut inner = self.write();
        if let Some(existing) = inner.initial.and_then(|id| inner.states.get(&id)) {
            return existing.clone();
        }

        let id = index.id();
        let vertex = Arc::new(index);
        inner.insert_vertex(vertex.clone());
        inner.initial = Some(id);
        vertex
    }

    /// Inserts a state unless one with the same canonical DOM exists
    ///
    /// Fails with [`FlowError::DuplicateStateId`] if the id is taken by a
    /// state with a different DOM.
    pub fn add_state(&self, vertex: StateVertex) -> Result<AddState, FlowError> {
        self.write().add_state(vertex)
    }

    /// Returns the state for a canonical DOM, creating it if needed
    ///
    /// The lookup, id allocation and insertion happen under one write lock, so
    /// concurrent crawlers observing the same DOM always agree on one vertex and
    /// ids are handed out without gaps. The flag is true for a new state.
    pub fn new_state_for(
        &self,
        factory: &dyn StateVertexFactory,
        url: &str,
        dom: &str,
        stripped_dom: &str,
    ) -> (Arc<StateVertex>, bool) {
        self.write().new_state_for(factory, url, dom, stripped_dom)
    }

    /// Adds a bound eventable as an edge
    ///
    /// Returns `Ok(false)` if an edge with the same source, target,
    /// identification, event type and frame already exists.
    pub fn add_edge(&self, eventable: Eventable) -> Result<bool, FlowError> {
        self.write().add_edge(eventable).map(|(_, added)| added)
    }

    /// Records a fired event: resolves the target state and adds the edge atomically
    ///
    /// Fails with [`FlowError::StateLimitReached`] instead of creating a state
    /// beyond the graph's state limit.
    pub fn add_transition(
        &self,
        source: StateId,
        mut eventable: Eventable,
        factory: &dyn StateVertexFactory,
        url: &str,
        dom: &str,
        stripped_dom: &str,
    ) -> Result<Transition, FlowError> {
        let mut inner = self.write();
        if !inner.states.contains_key(&source) {
            return Err(FlowError::UnknownState(source));
        }

        if let Some(max) = inner.max_states {
            if inner.states.len() >= max && !inner.by_hash.contains_key(&dom_hash(stripped_dom)) {
                return Err(FlowError::StateLimitReached(max));
            }
        }

        let (target, new_state) = inner.new_state_for(factory, url, dom, stripped_dom);
        eventable.bind(source, target.id())?;
        let (eventable, new_edge) = inner.add_edge(eventable)?;

        Ok(Transition {
            target,
            eventable,
            new_state,
            new_edge,
        })
    }

    /// Shortest event sequence leading from `from` to `to`
    ///
    /// Breadth-first; among equally short paths the one using edges with
    /// smaller target ids (then older edges) wins, so the answer is
    /// deterministic. `Some(vec![])` when `from == to`, `None` if unreachable.
    pub fn shortest_path(&self, from: StateId, to: StateId) -> Option<Vec<Arc<Eventable>>> {
        let inner = self.read();
        let parents = inner.bfs(from);
        if !parents.contains_key(&to) {
            return None;
        }

        let mut path = Vec::new();
        let mut current = to;
        while let Some(Some(idx)) = parents.get(&current) {
            let edge = inner.edges[*idx].clone();
            current = edge.source()?;
            path.push(edge);
        }
        path.reverse();
        Some(path)
    }

    /// True if some path leads from `from` to `to`
    pub fn can_go_to(&self, from: StateId, to: StateId) -> bool {
        self.read().bfs(from).contains_key(&to)
    }

    /// Graph distance of every state reachable from the index
    pub fn distances_from_initial(&self) -> HashMap<StateId, usize> {
        let inner = self.read();
        let Some(initial) = inner.initial else {
            return HashMap::new();
        };
        let parents = inner.bfs(initial);

        let mut distances = HashMap::with_capacity(parents.len());
        for &id in parents.keys() {
            let mut depth = 0;
            let mut current = id;
            while let Some(Some(idx)) = parents.get(&current) {
                depth += 1;
                match inner.edges[*idx].source() {
                    Some(source) => current = source,
                    None => break,
                }
            }
            distances.insert(id, depth);
        }
        distances
    }

    /// The state reached by loading the landing URL
    pub fn initial_state(&self) -> Option<Arc<StateVertex>> {
        let inner = self.read();
        inner.initial.and_then(|id| inner.states.get(&id).cloned())
    }

    pub fn state(&self, id: StateId) -> Option<Arc<StateVertex>> {
        self.read().states.get(&id).cloned()
    }

    pub fn contains(&self, id: StateId) -> bool {
        self.read().states.contains_key(&id)
    }

    /// Snapshot of all states, ordered by id
    pub fn all_states(&self) -> Vec<Arc<StateVertex>> {
        self.read().states.values().cloned().collect()
    }

    /// Snapshot of all edges, in insertion order
    pub fn all_edges(&self) -> Vec<Arc<Eventable>> {
        self.read().edges.clone()
    }

    pub fn outgoing_edges(&self, id: StateId) -> Vec<Arc<Eventable>> {
        let inner = self.read();
        inner
            .outgoing
            .get(&id)
            .map(|idxs| idxs.iter().map(|&i| inner.edges[i].clone()).collect())
            .unwrap_or_default()
    }

    pub fn incoming_edges(&self, id: StateId) -> Vec<Arc<Eventable>> {
        let inner = self.read();
        inner
            .incoming
            .get(&id)
            .map(|idxs| idxs.iter().map(|&i| inner.edges[i].clone()).collect())
            .unwrap_or_default()
    }

    pub fn state_count(&self) -> usize {
        self.read().states.len()
    }

    pub fn edge_count(&self) -> usize {
        self.read().edges.len()
    }

    /// Edge keys of the graph, for duplicate checks in tests and reports
    pub fn edge_keys(&self) -> HashSet<EdgeKey> {
        self.read().edge_index.keys().cloned().collect()
    }
}
