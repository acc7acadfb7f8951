//! State model of the crawl
//!
//! This module holds the value types of the state-flow graph and the graph
//! itself.
//!
//! # Components
//!
//! - `Identification`: names one DOM element (strategy + value)
//! - `Eventable`: an event fired on an element; the edges of the graph
//! - `StateVertex`: one canonical DOM state, identified by a stable id
//! - `StateFlowGraph`: the shared graph with shortest-path queries
//! - `CrawlPath`: the event sequence a crawler followed since its last reset

mod eventable;
mod graph;
mod identification;
mod path;
mod vertex;

// Re-export main types
pub use eventable::{EdgeKey, ElementInfo, EventType, Eventable, FormInput};
pub use graph::{AddState, StateFlowGraph, Transition};
pub use identification::{How, Identification};
pub use path::CrawlPath;
pub use vertex::{dom_hash, state_name, DefaultStateVertexFactory, StateId, StateVertex, StateVertexFactory};
