//! State vertices and the factory that builds them

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;
use std::fmt;
use std::sync::{Mutex, PoisonError};

/// Stable identifier of a state within one graph
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct StateId(pub u32);

impl StateId {
    /// Id reserved for the state reached by loading the landing URL
    pub const INDEX: StateId = StateId(0);
}

impl fmt::Display for StateId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Computes the state-equivalence hash of a canonical (stripped) DOM
///
/// Hex-encoded SHA-256; two DOMs with the same canonical form get the same hash.
pub fn dom_hash(stripped_dom: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(stripped_dom.as_bytes());
    hex::encode(hasher.finalize())
}

/// One observable DOM state of the application
///
/// Vertices are shared read-only once created; the only mutation allowed is
/// attaching derived data through [`StateVertex::annotate`].
#[derive(Debug)]
pub struct StateVertex {
    id: StateId,
    name: String,
    url: String,
    dom: String,
    stripped_dom: String,
    dom_hash: String,
    annotations: Mutex<BTreeMap<String, String>>,
}

impl StateVertex {
    pub fn new(
        id: StateId,
        url: impl Into<String>,
        name: impl Into<String>,
        dom: impl Into<String>,
        stripped_dom: impl Into<String>,
    ) -> Self {
        let stripped_dom = stripped_dom.into();
        Self {
            id,
            name: name.into(),
            url: url.into(),
            dom: dom.into(),
            dom_hash: dom_hash(&stripped_dom),
            stripped_dom,
            annotations: Mutex::new(BTreeMap::new()),
        }
    }

    pub fn id(&self) -> StateId {
        self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    /// The DOM as the browser reported it
    pub fn dom(&self) -> &str {
        &self.dom
    }

    /// The canonical DOM used for state equivalence
    pub fn stripped_dom(&self) -> &str {
        &self.stripped_dom
    }

    pub fn dom_hash(&self) -> &str {
        &self.dom_hash
    }

    pub fn is_index(&self) -> bool {
        self.id == StateId::INDEX
    }

    /// Attaches a piece of derived data to this state
    pub fn annotate(&self, key: impl Into<String>, value: impl Into<String>) {
        self.annotations
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(key.into(), value.into());
    }

    pub fn annotation(&self, key: &str) -> Option<String> {
        self.annotations
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(key)
            .cloned()
    }
}

impl PartialEq for StateVertex {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id && self.dom_hash == other.dom_hash
    }
}

impl Eq for StateVertex {}

impl fmt::Display for StateVertex {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} (id {})", self.name, self.id)
    }
}

/// Builds state vertices for newly observed canonical DOMs
///
/// Id allocation is owned by the graph so that the new-or-existing decision and
/// the insertion happen under one lock; the factory only shapes the vertex.
pub trait StateVertexFactory: Send + Sync {
    fn new_state_vertex(
        &self,
        id: StateId,
        url: &str,
        name: &str,
        dom: &str,
        stripped_dom: &str,
    ) -> StateVertex;

    /// Builds the vertex for the landing page
    fn create_index(&self, url: &str, dom: &str, stripped_dom: &str) -> StateVertex {
        self.new_state_vertex(StateId::INDEX, url, "index", dom, stripped_dom)
    }
}

/// Factory producing plain [`StateVertex`] values
#[derive(Debug, Clone, Copy, Default)]
pub struct DefaultStateVertexFactory;

impl StateVertexFactory for DefaultStateVertexFactory {
    fn new_state_vertex(
        &self,
        id: StateId,
        url: &str,
        name: &str,
        dom: &str,
        stripped_dom: &str,
    ) -> StateVertex {
        StateVertex::new(id, url, name, dom, stripped_dom)
    }
}

/// Default name for a non-index state
pub fn state_name(id: StateId) -> String {
    if id == StateId::INDEX {
        "index".to_string()
    } else {
        format!("state{}", id.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_dom_hash_is_deterministic() {
        assert_eq!(dom_hash("<p>a</p>"), dom_hash("<p>a</p>"));
        assert_ne!(dom_hash("<p>a</p>"), dom_hash("<p>b</p>"));
        assert_eq!(dom_hash("").len(), 64);
    }

    #[test]
    fn test_hash_follows_stripped_dom() {
        let a = StateVertex::new(StateId(1), "u", "s1", "<p> a </p>", "<p>a</p>");
        let b = StateVertex::new(StateId(2), "u", "s2", "<p>a</p>", "<p>a</p>");
        assert_eq!(a.dom_hash(), b.dom_hash());
        assert_ne!(a, b);
    }

    #[test]
    fn test_factory_index() {
        let index = DefaultStateVertexFactory.create_index("http://x/", "<a/>", "<a/>");
        assert!(index.is_index());
        assert_eq!(index.name(), "index");
    }

    #[test]
    fn test_annotations() {
        let v = StateVertex::new(StateId(3), "u", "state3", "d", "d");
        assert_eq!(v.annotation("screenshot"), None);
        v.annotate("screenshot", "state3.png");
        assert_eq!(v.annotation("screenshot").as_deref(), Some("state3.png"));
    }

    #[test]
    fn test_state_name() {
        assert_eq!(state_name(StateId::INDEX), "index");
        assert_eq!(state_name(StateId(7)), "state7");
    }
}
