//! Integration tests for the crawler
//!
//! These tests drive single crawlers and whole runs against a scripted stub
//! browser and check the observable trace of browser calls and plugin hooks.

mod common;

use common::{
    builder, is_subsequence, new_trace, page_dom, page_url, provider, App, Harness, StubBrowser,
    LANDING,
};
use std::sync::Arc;
use sumi_flow::browser::EmbeddedBrowser;
use sumi_flow::condition::{Condition, Invariant};
use sumi_flow::config::{BrowserConfig, ElementRule};
use sumi_flow::crawler::{
    CandidateElement, CrawlController, CrawlPhase, ExecuteOutcome, ExitReason, QueueState,
};
use sumi_flow::state::{
    DefaultStateVertexFactory, EventType, Eventable, Identification, StateFlowGraph, StateId,
    StateVertex, StateVertexFactory,
};
use sumi_flow::{run_crawl, BrowserError, CrawlStatus, FlowError};

fn install_index(graph: &StateFlowGraph, dom: &str) {
    graph.put_index(StateVertex::new(StateId::INDEX, LANDING, "index", dom, dom));
}

#[test]
fn test_reset_loads_landing_page_then_url_load_plugins() {
    let trace = new_trace();
    let app = App::new().page("index", &[("about", "about")]);
    let mut h = Harness::new(builder(&trace), app, trace);

    h.crawler.reset().unwrap();

    assert_eq!(h.trace(), vec!["goToUrl(http://example.com/)", "onUrlLoad"]);
    assert_eq!(h.crawler.phase(), CrawlPhase::AtInitial);
    assert!(h.crawler.context().crawl_path().is_empty());
}

#[test]
fn test_execute_replays_path_then_explores_target() {
    let trace = new_trace();
    let index_dom = page_dom("index", &[]);
    let second_dom = page_dom("second", &[]);
    let app = App::new()
        .page("index", &[])
        .page("second", &[])
        .link("index", "//DIV[@id='click']", "second");
    let mut h = Harness::new(builder(&trace), app, trace);

    let graph = Arc::clone(h.session.graph());
    install_index(&graph, &index_dom);
    let edge = Eventable::new(Identification::xpath("//DIV[@id='click']"), EventType::Click);
    let transition = graph
        .add_transition(
            StateId::INDEX,
            edge,
            &DefaultStateVertexFactory,
            &page_url("second"),
            &second_dom,
            &second_dom,
        )
        .unwrap();
    let v2 = transition.target.id();
    assert!(graph.can_go_to(StateId::INDEX, v2));

    let a = CandidateElement::new(Identification::xpath("/HTML[1]/BODY[1]/A[1]"), EventType::Click);
    h.store.add(v2, vec![a]);

    let outcome = h.crawler.execute(v2).unwrap();

    assert_eq!(outcome, ExecuteOutcome::Explored);
    assert_eq!(
        h.trace(),
        vec![
            "goToUrl(http://example.com/)",
            "onUrlLoad",
            "checkCrawlCondition",
            "fire(//DIV[@id='click'])",
            "wait",
            "closeOtherWindows",
            "onRevisitState(1)",
            "checkCrawlCondition",
            "fire(/HTML[1]/BODY[1]/A[1])",
            "wait",
            "closeOtherWindows",
        ]
    );
    // The candidate left the page unchanged: no new state, no new edge
    assert!(h.store.is_exhausted(v2));
    assert_eq!(graph.state_count(), 2);
    assert_eq!(graph.edge_count(), 1);
}

#[test]
fn test_replay_landing_on_another_state_fails() {
    let trace = new_trace();
    let app = App::new()
        .page("index", &[])
        .page("second", &[])
        .link("index", "//DIV[@id='click']", "second");
    let mut h = Harness::new(builder(&trace), app, trace);

    let graph = Arc::clone(h.session.graph());
    install_index(&graph, &page_dom("index", &[]));
    let recorded = page_dom("third", &[]);
    let edge = Eventable::new(Identification::xpath("//DIV[@id='click']"), EventType::Click);
    let target = graph
        .add_transition(
            StateId::INDEX,
            edge,
            &DefaultStateVertexFactory,
            &page_url("third"),
            &recorded,
            &recorded,
        )
        .unwrap()
        .target
        .id();
    h.store.add(
        target,
        vec![CandidateElement::new(Identification::xpath("/HTML[1]/BODY[1]/A[1]"), EventType::Click)],
    );

    let outcome = h.crawler.execute(target).unwrap();

    assert_eq!(outcome, ExecuteOutcome::ReplayFailed);
    let trace = h.trace();
    assert!(trace.contains(&"fire(//DIV[@id='click'])".to_string()));
    assert!(!trace.iter().any(|entry| entry.starts_with("onRevisitState")));
    assert!(h.crawler.context().crawl_path().is_empty());
    assert_eq!(h.store.pending_count(target), 1);
}

#[test]
fn test_duplicate_doms_collapse_to_one_state() {
    let graph = StateFlowGraph::new();
    let ids: Vec<u32> = ["A", "B", "A", "C", "B"]
        .iter()
        .map(|dom| {
            let (state, _) = graph.new_state_for(&DefaultStateVertexFactory, LANDING, dom, dom);
            state.id().0
        })
        .collect();

    assert_eq!(ids, vec![1, 2, 1, 3, 2]);
    assert_eq!(graph.state_count(), 3);
}

/// Names every vertex after the page heading
struct HeadingFactory;

impl StateVertexFactory for HeadingFactory {
    fn new_state_vertex(
        &self,
        id: StateId,
        url: &str,
        _name: &str,
        dom: &str,
        stripped_dom: &str,
    ) -> StateVertex {
        let heading = dom
            .split("<h1>")
            .nth(1)
            .and_then(|rest| rest.split("</h1>").next())
            .unwrap_or("untitled");
        StateVertex::new(id, url, heading, dom, stripped_dom)
    }
}

#[test]
fn test_custom_factory_shapes_every_vertex() {
    let trace = new_trace();
    let app = App::new()
        .page("index", &[("about", "about")])
        .page("about", &[]);
    let mut h = Harness::new(builder(&trace), app, trace);
    h.crawler = h.crawler.with_factory(Arc::new(HeadingFactory));

    h.crawler.crawl_index().unwrap();
    h.crawler.run().unwrap();

    let names: Vec<String> = h
        .session
        .graph()
        .all_states()
        .iter()
        .map(|s| s.name().to_string())
        .collect();
    assert_eq!(names, vec!["index", "about"]);
}

#[test]
fn test_fire_failure_is_reported_and_crawl_continues() {
    let trace = new_trace();
    let app = App::new()
        .page("index", &[("broken", "about"), ("about", "about")])
        .page("about", &[])
        .failing("broken");
    let mut h = Harness::new(builder(&trace), app, trace);

    h.crawler.crawl_index().unwrap();
    h.crawler.run().unwrap();

    assert!(is_subsequence(
        &h.trace(),
        &["fire(broken)", "onFireEventFailed(broken)", "fire(about)", "onNewState(1)"]
    ));
    let graph = h.session.graph();
    assert_eq!(graph.state_count(), 2);
    assert_eq!(graph.edge_count(), 1);
    let snapshot = h.session.metrics().snapshot();
    assert_eq!(snapshot.fires_failed, 1);
    assert_eq!(h.exit.reason(), Some(ExitReason::Exhausted));
    assert_eq!(h.crawler.phase(), CrawlPhase::Done);
}

#[test]
fn test_invariant_violation_is_reported_without_touching_graph() {
    let trace = new_trace();
    let app = App::new().page("index", &[("about", "about")]).raw_page(
        "about",
        "<html><head></head><body><h1>about</h1><div class=\"error\">oops</div></body></html>",
    );
    let invariant = Invariant::new(
        "no error banner",
        Condition::NotXpath {
            expression: "//DIV[@class='error']".into(),
        },
    )
    .with_precondition(Condition::Url {
        pattern: "#about".into(),
    });
    let mut h = Harness::new(builder(&trace).add_invariant(invariant), app, trace);

    h.crawler.crawl_index().unwrap();
    h.crawler.run().unwrap();

    let trace = h.trace();
    let reported: Vec<&String> = trace
        .iter()
        .filter(|e| e.starts_with("onInvariantViolation"))
        .collect();
    assert_eq!(reported, vec!["onInvariantViolation(no error banner)"]);
    assert!(is_subsequence(
        &trace,
        &["onNewState(1)", "onInvariantViolation(no error banner)", "preStateCrawling(1:0)"]
    ));

    let violations = h.session.violations();
    assert_eq!(violations.len(), 1);
    assert_eq!(violations[0].state, StateId(1));
    assert_eq!(violations[0].url, page_url("about"));
    assert_eq!(h.session.graph().state_count(), 2);
    assert_eq!(h.session.graph().edge_count(), 1);
    assert_eq!(h.exit.reason(), Some(ExitReason::Exhausted));
}

#[test]
fn test_exhausted_target_is_skipped_without_firing() {
    let trace = new_trace();
    let app = App::new().page("index", &[]);
    let mut h = Harness::new(builder(&trace), app, trace);

    let graph = Arc::clone(h.session.graph());
    install_index(&graph, &page_dom("index", &[]));
    for (name, key) in [("one", "1"), ("two", "2"), ("three", "3")] {
        let dom = page_dom(name, &[]);
        let edge = Eventable::new(Identification::id(key), EventType::Click);
        graph
            .add_transition(
                StateId::INDEX,
                edge,
                &DefaultStateVertexFactory,
                &page_url(name),
                &dom,
                &dom,
            )
            .unwrap();
    }

    let candidate = |xpath: &str| CandidateElement::new(Identification::xpath(xpath), EventType::Click);
    h.store.add(StateId(1), Vec::new());
    h.store.add(StateId(3), vec![candidate("/HTML[1]/BODY[1]/A[1]")]);
    h.store.add(StateId(2), vec![candidate("/HTML[1]/BODY[1]/A[2]")]);

    let outcome = h.crawler.execute(StateId(1)).unwrap();

    assert_eq!(outcome, ExecuteOutcome::Exhausted);
    assert!(h.trace().is_empty());
    assert_eq!(h.store.queue_state(StateId(1)), QueueState::Exhausted);

    // Equally distant pending states: the smaller id is next
    let task = h.store.await_new_task(&graph, &h.exit).unwrap();
    assert_eq!(task.target(), StateId(2));
}

#[test]
fn test_known_state_ends_exploration() {
    let trace = new_trace();
    let app = App::new()
        .page("index", &[("about", "about")])
        .page("about", &[("home", "index")]);
    let mut h = Harness::new(builder(&trace), app, trace);

    h.crawler.crawl_index().unwrap();
    h.clear_trace();
    h.crawler.run().unwrap();

    assert!(is_subsequence(
        &h.trace(),
        &["fire(about)", "onNewState(1)", "fire(home)", "onRevisitState(0)"]
    ));
    let graph = h.session.graph();
    assert_eq!(graph.state_count(), 2);
    assert_eq!(graph.edge_count(), 2);
    assert_eq!(graph.outgoing_edges(StateId(1))[0].target(), Some(StateId::INDEX));
}

#[test]
fn test_leaving_the_site_goes_back() {
    let trace = new_trace();
    let app = App::new()
        .page("index", &[("partner", "index"), ("about", "about")])
        .external("index", "partner")
        .page("about", &[]);
    let mut h = Harness::new(builder(&trace), app, trace);

    h.crawler.crawl_index().unwrap();
    h.crawler.run().unwrap();

    assert!(is_subsequence(&h.trace(), &["fire(partner)", "goBack", "fire(about)"]));
    let graph = h.session.graph();
    assert_eq!(graph.state_count(), 2);
    assert!(graph
        .all_states()
        .iter()
        .all(|s| s.url().starts_with(LANDING)));
}

#[test]
fn test_states_at_max_depth_are_not_explored() {
    let trace = new_trace();
    let app = App::new()
        .page("index", &[("one", "one")])
        .page("one", &[("two", "two")])
        .page("two", &[]);
    let mut h = Harness::new(builder(&trace).set_max_depth(1), app, trace);

    h.crawler.crawl_index().unwrap();
    h.crawler.run().unwrap();

    let trace = h.trace();
    assert!(trace.contains(&"extract(0)".to_string()));
    assert!(!trace.contains(&"extract(1)".to_string()));
    assert!(trace.contains(&"preStateCrawling(1:0)".to_string()));
    assert_eq!(h.session.graph().state_count(), 2);
    assert!(h.session.graph().outgoing_edges(StateId(1)).is_empty());
}

#[test]
fn test_max_states_stops_the_run() {
    let trace = new_trace();
    let app = App::new()
        .page("index", &[("one", "one"), ("two", "two")])
        .page("one", &[])
        .page("two", &[]);
    let mut h = Harness::new(builder(&trace).set_max_states(2), app, trace);

    h.crawler.crawl_index().unwrap();
    h.crawler.run().unwrap();

    assert_eq!(h.exit.reason(), Some(ExitReason::MaxStates));
    assert_eq!(h.session.graph().state_count(), 2);
    assert!(!h.trace().contains(&"fire(two)".to_string()));
}

#[test]
fn test_single_state_limit_stops_at_the_index() {
    let trace = new_trace();
    let app = App::new()
        .page("index", &[("one", "one")])
        .page("one", &[]);
    let mut h = Harness::new(builder(&trace).set_max_states(1), app, trace);

    h.crawler.crawl_index().unwrap();
    h.crawler.run().unwrap();

    assert_eq!(h.exit.reason(), Some(ExitReason::MaxStates));
    assert_eq!(h.session.graph().state_count(), 1);
    assert!(!h.trace().iter().any(|e| e.starts_with("fire(")));
}

#[test]
fn test_transient_load_failures_are_retried() {
    let trace = new_trace();
    let app = Arc::new(App::new().page("index", &[]));
    let browser = StubBrowser::new(Arc::clone(&app), Arc::clone(&trace)).failing_loads(2);
    let mut h = Harness::with_browser(builder(&trace), Box::new(browser), trace);

    h.crawler.reset().unwrap();

    let loads = h.trace().iter().filter(|e| e.starts_with("goToUrl")).count();
    assert_eq!(loads, 3);
    assert_eq!(h.trace().last().map(String::as_str), Some("onUrlLoad"));
}

#[test]
fn test_persistent_load_failure_is_unrecoverable() {
    let trace = new_trace();
    let app = Arc::new(App::new().page("index", &[]));
    let browser = StubBrowser::new(Arc::clone(&app), Arc::clone(&trace)).failing_loads(5);
    let mut h = Harness::with_browser(builder(&trace), Box::new(browser), trace);

    let result = h.crawler.reset();

    assert!(matches!(
        result,
        Err(FlowError::Browser(BrowserError::Unrecoverable(_)))
    ));
    assert!(!h.trace().contains(&"onUrlLoad".to_string()));
}

fn site() -> App {
    App::new()
        .page("index", &[("about", "about"), ("contact", "contact")])
        .page("about", &[("home", "index"), ("team", "team")])
        .page("contact", &[("home", "index")])
        .page("team", &[])
}

#[tokio::test]
async fn test_controller_runs_crawl_to_completion() {
    let trace = new_trace();
    let config = builder(&trace).click_once(false).build().unwrap();
    let controller = CrawlController::new(config, provider(site(), Arc::clone(&trace)));

    let outcome = controller.run().await;

    assert_eq!(outcome.status, CrawlStatus::Completed);
    let graph = outcome.session.graph();
    assert_eq!(graph.state_count(), 4);
    assert_eq!(graph.edge_count(), 5);
    assert!(outcome.session.finished_at().is_some());

    let trace = trace.lock().unwrap().clone();
    assert_eq!(trace.first().map(String::as_str), Some("preCrawling"));
    assert_eq!(trace.last().map(String::as_str), Some("postCrawling(completed)"));
    assert_eq!(trace.iter().filter(|e| e.starts_with("postCrawling")).count(), 1);
    assert_eq!(trace.iter().filter(|e| e.starts_with("onNewState")).count(), 4);
}

#[tokio::test]
async fn test_excluded_elements_never_become_edges() {
    let trace = new_trace();
    let config = builder(&trace)
        .click_once(false)
        .exclude(ElementRule::new("a").with_text("contact"))
        .build()
        .unwrap();
    let controller = CrawlController::new(config, provider(site(), Arc::clone(&trace)));

    let outcome = controller.run().await;

    assert_eq!(outcome.status, CrawlStatus::Completed);
    let graph = outcome.session.graph();
    let edges = graph.all_edges();
    assert_eq!(edges.len(), 3);
    for edge in &edges {
        let element = edge.element().unwrap();
        assert_eq!(element.tag.to_ascii_lowercase(), "a");
        assert_ne!(element.text, "contact");
    }
    assert_eq!(graph.state_count(), 3);
    assert!(!trace.lock().unwrap().iter().any(|e| e == "fire(contact)"));
}

#[tokio::test]
async fn test_every_page_load_is_followed_by_url_load_plugins() {
    let trace = new_trace();
    let config = builder(&trace).build().unwrap();
    let outcome = CrawlController::new(config, provider(site(), Arc::clone(&trace)))
        .run()
        .await;
    assert_eq!(outcome.status, CrawlStatus::Completed);

    let trace = trace.lock().unwrap().clone();
    let is_hook = |e: &str| e.starts_with("on") || e.starts_with("pre") || e.starts_with("post");
    for (i, entry) in trace.iter().enumerate() {
        if entry.starts_with("goToUrl") {
            let next_hook = trace[i + 1..].iter().find(|e| is_hook(e));
            assert_eq!(next_hook.map(String::as_str), Some("onUrlLoad"));
        }
    }
}

#[tokio::test]
async fn test_click_once_is_shared_by_all_crawlers() {
    let trace = new_trace();
    let config = builder(&trace).set_max_crawlers(2).build().unwrap();
    let outcome = CrawlController::new(config, provider(site(), Arc::clone(&trace)))
        .run()
        .await;

    assert_eq!(outcome.status, CrawlStatus::Completed);
    // "home" sits at the same position on both pages, so it is offered once
    let homes = trace
        .lock()
        .unwrap()
        .iter()
        .filter(|e| *e == "fire(home)")
        .count();
    assert_eq!(homes, 1);
    assert_eq!(outcome.session.graph().state_count(), 4);
}

#[tokio::test]
async fn test_state_limit_holds_across_crawlers() {
    let trace = new_trace();
    let config = builder(&trace)
        .click_once(false)
        .set_max_crawlers(3)
        .set_max_states(3)
        .build()
        .unwrap();

    let outcome = CrawlController::new(config, provider(site(), Arc::clone(&trace)))
        .run()
        .await;

    assert_eq!(outcome.status, CrawlStatus::Completed);
    assert_eq!(outcome.session.graph().state_count(), 3);
    let new_states = trace
        .lock()
        .unwrap()
        .iter()
        .filter(|e| e.starts_with("onNewState"))
        .count();
    assert_eq!(new_states, 3);
}

#[tokio::test]
async fn test_browser_failure_after_restarts() {
    let trace = new_trace();
    let config = builder(&trace).browser_restarts(1).build().unwrap();
    let failing = Arc::new(
        |_config: &BrowserConfig| -> Result<Box<dyn EmbeddedBrowser>, BrowserError> {
            Err(BrowserError::LaunchFailed("no chrome here".into()))
        },
    );

    let outcome = CrawlController::new(config, failing).run().await;

    assert_eq!(outcome.status, CrawlStatus::BrowserFailure);
    assert_eq!(outcome.session.metrics().snapshot().browser_restarts, 1);
    assert_eq!(outcome.session.graph().state_count(), 0);
    assert_eq!(
        trace.lock().unwrap().clone(),
        vec!["preCrawling", "postCrawling(browser-failure)"]
    );
}

#[tokio::test]
async fn test_external_stop_ends_run() {
    let trace = new_trace();
    let config = builder(&trace).build().unwrap();
    let controller = CrawlController::new(config, provider(site(), Arc::clone(&trace)));
    controller.exit_notifier().stop(ExitReason::Stopped);

    let outcome = controller.run().await;

    assert_eq!(outcome.status, CrawlStatus::Stopped);
    assert_eq!(outcome.status.exit_code(), 130);
}

#[tokio::test]
async fn test_run_crawl_writes_summary() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("summary.md");
    let trace = new_trace();

    let outcome = run_crawl(
        builder(&trace).summary_path(path.display().to_string()),
        provider(site(), Arc::clone(&trace)),
    )
    .await
    .unwrap();

    assert_eq!(outcome.status, CrawlStatus::Completed);
    let summary = std::fs::read_to_string(&path).unwrap();
    assert!(summary.contains("# Sumi-Flow Crawl Summary"));
    assert!(summary.contains("- **States**: 4"));
}

#[tokio::test]
async fn test_run_crawl_rejects_invalid_config() {
    let trace = new_trace();
    let result = run_crawl(
        builder(&trace).set_max_crawlers(0),
        provider(site(), Arc::clone(&trace)),
    )
    .await;

    assert!(matches!(result, Err(FlowError::Config(_))));
}
