//! Property-based tests for the state-flow graph, the candidate store and
//! the depth bound of a crawl

mod common;

use common::{builder, new_trace, page_dom, App, Harness, LANDING};
use proptest::prelude::*;
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};
use sumi_flow::crawler::{CandidateElement, UnfiredCandidateStore};
use sumi_flow::state::{
    DefaultStateVertexFactory, EventType, Eventable, Identification, StateFlowGraph, StateId,
    StateVertex,
};

fn event_type(kind: u8) -> EventType {
    match kind % 3 {
        0 => EventType::Click,
        1 => EventType::Hover,
        _ => EventType::Submit,
    }
}

fn candidate(n: u8) -> CandidateElement {
    CandidateElement::new(
        Identification::xpath(format!("/HTML[1]/BODY[1]/A[{}]", n)),
        EventType::Click,
    )
}

/// A graph with an index and `states - 1` further states, all distinct
fn graph_with_states(states: u32) -> StateFlowGraph {
    let graph = StateFlowGraph::new();
    let index = page_dom("index", &[]);
    graph.put_index(StateVertex::new(StateId::INDEX, LANDING, "index", &index, &index));
    for i in 1..states {
        let dom = page_dom(&format!("p{}", i), &[]);
        graph.new_state_for(&DefaultStateVertexFactory, LANDING, &dom, &dom);
    }
    graph
}

#[derive(Debug, Clone)]
enum StoreOp {
    Add(Vec<u8>),
    Poll,
    Purge,
}

fn store_op() -> impl Strategy<Value = StoreOp> {
    prop_oneof![
        3 => prop::collection::vec(0u8..6, 0..4).prop_map(StoreOp::Add),
        3 => Just(StoreOp::Poll),
        1 => Just(StoreOp::Purge),
    ]
}

/// Outgoing link targets of every page of a random site; page 0 is the index
fn site_links() -> impl Strategy<Value = Vec<Vec<usize>>> {
    (2usize..7).prop_flat_map(|pages| {
        prop::collection::vec(prop::collection::vec(0..pages, 0..4), pages)
    })
}

fn page_name(page: usize) -> String {
    if page == 0 {
        "index".to_string()
    } else {
        format!("p{}", page)
    }
}

fn build_site(links: &[Vec<usize>]) -> App {
    let mut app = App::new();
    for (page, targets) in links.iter().enumerate() {
        let mut seen = HashSet::new();
        let named: Vec<(String, String)> = targets
            .iter()
            .filter(|t| seen.insert(**t))
            .map(|t| (format!("go{}", t), page_name(*t)))
            .collect();
        let borrowed: Vec<(&str, &str)> = named
            .iter()
            .map(|(text, target)| (text.as_str(), target.as_str()))
            .collect();
        app = app.page(&page_name(page), &borrowed);
    }
    app
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    #[test]
    fn test_state_insertion_is_idempotent(doms in prop::collection::vec(0u8..8, 1..40)) {
        let graph = StateFlowGraph::new();
        let mut seen: HashMap<u8, StateId> = HashMap::new();

        for dom in &doms {
            let text = format!("<p>{}</p>", dom);
            let (state, _) = graph.new_state_for(&DefaultStateVertexFactory, LANDING, &text, &text);
            let id = *seen.entry(*dom).or_insert(state.id());
            prop_assert_eq!(state.id(), id);
        }

        let distinct: HashSet<u8> = doms.iter().copied().collect();
        prop_assert_eq!(graph.state_count(), distinct.len());
        let ids: HashSet<StateId> = graph.all_states().iter().map(|s| s.id()).collect();
        let expected: HashSet<StateId> = seen.values().copied().collect();
        prop_assert_eq!(ids, expected);
    }

    #[test]
    fn test_edges_are_unique(
        edges in prop::collection::vec((0u32..4, 0u32..4, 0u8..3, 0u8..3), 0..40)
    ) {
        let graph = graph_with_states(4);
        let mut keys = HashSet::new();

        for (source, target, element, kind) in edges {
            let eventable = Eventable::new(
                Identification::id(format!("el{}", element)),
                event_type(kind),
            )
            .bound(StateId(source), StateId(target))
            .unwrap();
            let fresh = keys.insert(eventable.edge_key().unwrap());
            prop_assert_eq!(graph.add_edge(eventable).unwrap(), fresh);
        }

        prop_assert_eq!(graph.edge_count(), keys.len());
        prop_assert_eq!(graph.edge_keys().len(), graph.edge_count());
    }

    #[test]
    fn test_shortest_paths_replay_to_their_target(
        edges in prop::collection::vec((0u32..6, 0u32..6), 0..20)
    ) {
        let graph = graph_with_states(6);
        for (i, (source, target)) in edges.iter().enumerate() {
            let eventable = Eventable::new(Identification::id(format!("e{}", i)), EventType::Click)
                .bound(StateId(*source), StateId(*target))
                .unwrap();
            graph.add_edge(eventable).unwrap();
        }

        for a in 0..6 {
            for b in 0..6 {
                let (from, to) = (StateId(a), StateId(b));
                match graph.shortest_path(from, to) {
                    Some(path) => {
                        prop_assert!(graph.can_go_to(from, to));
                        let mut at = from;
                        for edge in &path {
                            prop_assert_eq!(edge.source(), Some(at));
                            at = edge.target().unwrap();
                        }
                        prop_assert_eq!(at, to);
                        if a == b {
                            prop_assert!(path.is_empty());
                        }
                    }
                    None => prop_assert!(!graph.can_go_to(from, to)),
                }
            }
        }
    }

    #[test]
    fn test_exhaustion_is_permanent(ops in prop::collection::vec(store_op(), 1..40)) {
        let store = UnfiredCandidateStore::new();
        let state = StateId(1);
        let mut exhausted = false;

        for op in ops {
            match op {
                StoreOp::Add(ns) => {
                    let added = store.add(state, ns.into_iter().map(candidate).collect());
                    if exhausted {
                        prop_assert_eq!(added, 0);
                    }
                }
                StoreOp::Poll => {
                    let polled = store.poll(state);
                    if exhausted {
                        prop_assert!(polled.is_none());
                    }
                }
                StoreOp::Purge => store.purge(state),
            }

            if exhausted {
                prop_assert!(store.is_exhausted(state));
            }
            exhausted = store.is_exhausted(state);
        }
    }

    #[test]
    fn test_candidates_are_delivered_at_most_once(
        batches in prop::collection::vec(prop::collection::vec(0u8..30, 0..10), 1..5),
        pollers in 1usize..5,
    ) {
        let store = UnfiredCandidateStore::new();
        let state = StateId(1);
        let mut distinct = HashSet::new();
        for batch in &batches {
            distinct.extend(batch.iter().copied());
            store.add(state, batch.iter().copied().map(candidate).collect());
        }

        let delivered = Mutex::new(Vec::new());
        std::thread::scope(|scope| {
            for _ in 0..pollers {
                scope.spawn(|| {
                    while let Some(c) = store.poll(state) {
                        delivered.lock().unwrap().push(c.identification().value.clone());
                    }
                });
            }
        });

        let delivered = delivered.into_inner().unwrap();
        let unique: HashSet<&String> = delivered.iter().collect();
        prop_assert_eq!(unique.len(), delivered.len());
        prop_assert_eq!(delivered.len(), distinct.len());
    }
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(24))]

    #[test]
    fn test_no_edges_beyond_max_depth(links in site_links(), max_depth in 1u32..3) {
        let trace = new_trace();
        let config = builder(&trace).click_once(false).set_max_depth(max_depth);
        let mut h = Harness::new(config, build_site(&links), Arc::clone(&trace));

        h.crawler.crawl_index().unwrap();
        h.crawler.run().unwrap();

        let graph = h.session.graph();
        let distances = graph.distances_from_initial();
        for state in graph.all_states() {
            let depth = distances.get(&state.id()).copied().unwrap_or(usize::MAX);
            if depth > max_depth as usize {
                prop_assert!(graph.outgoing_edges(state.id()).is_empty());
            }
        }
    }
}
