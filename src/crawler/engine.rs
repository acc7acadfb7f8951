//! The crawler engine
//!
//! A [`Crawler`] owns one browser (through its [`CrawlerContext`]) and walks
//! the application as a state machine:
//!
//! ```text
//! INIT -> RESET -> AT_INITIAL -> EXPLORING -> FIRING -> CLASSIFYING
//!      -> AT_NEW_OR_EXISTING -> (EXPLORING | BACKTRACKING | DONE)
//! ```
//!
//! Any phase may move to `ERROR_RECOVERY` when the browser fails. The exit
//! flag is checked at every transition and after every blocking browser call.
//!
//! Observable order of one [`Crawler::execute`] call:
//!
//! 1. reset: go to the landing URL, then the `on_url_load` plugins
//! 2. per replayed edge: crawl conditions, then fire (wait conditions and
//!    closing other windows follow every successful fire)
//! 3. on arrival: `on_revisit_state`, crawl conditions again, then the first
//!    candidate of the target is polled and exploration continues

use crate::browser::EmbeddedBrowser;
use crate::condition::{ConditionContext, Invariant, PollingWaitChecker, WaitConditionChecker};
use crate::crawler::context::CrawlerContext;
use crate::crawler::exit::ExitReason;
use crate::crawler::extractor::{CandidateElementExtractor, CandidateExtractor, CheckedElements};
use crate::crawler::phase::CrawlPhase;
use crate::crawler::session::InvariantViolation;
use crate::crawler::unfired::{QueueState, UnfiredCandidateStore};
use crate::dom::parse_dom;
use crate::plugin::Plugins;
use crate::state::{DefaultStateVertexFactory, Eventable, StateId, StateVertex, StateVertexFactory};
use crate::url::is_in_scope;
use crate::{BrowserError, FlowError};
use chrono::Utc;
use std::collections::HashMap;
use std::sync::Arc;
use std::thread;
use std::time::Instant;
use tracing::{debug, info, trace, warn};

/// Failed attempts to reach a state before its remaining candidates are dropped
const MAX_REPLAY_ATTEMPTS: u32 = 3;

/// How a call to [`Crawler::execute`] ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExecuteOutcome {
    /// Reached the target and explored until its candidates ran out or a
    /// known state was reached
    Explored,
    /// The target has no queued candidates; nothing was fired
    Exhausted,
    /// A crawl condition failed on the way to or at the target
    ConditionFailed,
    /// The graph holds no path to the target
    Unreachable,
    /// An event of the path could not be fired or led to another state
    ReplayFailed,
    /// The run is stopping
    Stopped,
}

/// Outcome of looking at the page after an event
enum Classified {
    Unchanged,
    LeftSite,
    Moved { target: Arc<StateVertex>, new_state: bool, dom: String, url: String },
}

/// One crawler: a browser plus the state machine that drives it
pub struct Crawler {
    context: CrawlerContext,
    plugins: Plugins,
    extractor: Box<dyn CandidateExtractor>,
    waiter: Arc<dyn WaitConditionChecker>,
    store: Arc<UnfiredCandidateStore>,
    factory: Arc<dyn StateVertexFactory>,
    phase: CrawlPhase,
}

impl Crawler {
    /// Creates a crawler with the rule-driven extractor, the polling wait
    /// checker and the default vertex factory
    pub fn new(context: CrawlerContext, store: Arc<UnfiredCandidateStore>) -> Self {
        let config = Arc::clone(context.config());
        Self {
            plugins: config.plugins().clone(),
            extractor: Box::new(CandidateElementExtractor::new(
                Arc::clone(&config),
                CheckedElements::new(),
            )),
            waiter: Arc::new(PollingWaitChecker::new(config.rules.wait_conditions.clone())),
            store,
            factory: Arc::new(DefaultStateVertexFactory),
            phase: CrawlPhase::Init,
            context,
        }
    }

    pub fn with_extractor(mut self, extractor: Box<dyn CandidateExtractor>) -> Self {
        self.extractor = extractor;
        self
    }

    pub fn with_wait_checker(mut self, waiter: Arc<dyn WaitConditionChecker>) -> Self {
        self.waiter = waiter;
        self
    }

    pub fn with_factory(mut self, factory: Arc<dyn StateVertexFactory>) -> Self {
        self.factory = factory;
        self
    }

    pub fn context(&self) -> &CrawlerContext {
        &self.context
    }

    pub fn phase(&self) -> CrawlPhase {
        self.phase
    }

    fn id(&self) -> usize {
        self.context.crawler_id()
    }

    fn set_phase(&mut self, phase: CrawlPhase) {
        trace!("Crawler {}: {} -> {}", self.id(), self.phase, phase);
        self.phase = phase;
    }

    fn should_stop(&self) -> bool {
        self.context.exit().should_stop()
    }

    /// Brings the browser back to the landing URL
    ///
    /// The page is loaded first and the `on_url_load` plugins run after it.
    /// The crawl path is cleared; the current state becomes the index state
    /// (if it exists yet).
    pub fn reset(&mut self) -> Result<(), FlowError> {
        self.set_phase(CrawlPhase::Reset);
        self.context.crawl_path_mut().clear();
        self.context.set_current_state(None);

        self.load_landing_page()?;

        let pause = self.context.config().wait_after_reload();
        if !pause.is_zero() {
            thread::sleep(pause);
        }

        self.plugins.run_on_url_load(&mut self.context);

        let initial = self.context.graph().initial_state();
        self.context.set_current_state(initial);
        self.set_phase(CrawlPhase::AtInitial);
        Ok(())
    }

    /// Loads the landing URL, retrying transient failures with exponential backoff
    fn load_landing_page(&mut self) -> Result<(), FlowError> {
        let config = Arc::clone(self.context.config());
        let url = config.landing_url();
        let retries = config.crawler.page_load_retries;
        let mut backoff = config.retry_backoff();
        let mut attempt = 0;

        loop {
            match self.context.browser_mut().go_to_url(url) {
                Ok(()) => return Ok(()),
                Err(e) if e.is_transient() && attempt < retries => {
                    attempt += 1;
                    warn!(
                        "Crawler {}: loading {} failed (attempt {}/{}): {}",
                        self.id(),
                        url,
                        attempt,
                        retries,
                        e
                    );
                    self.set_phase(CrawlPhase::ErrorRecovery);
                    thread::sleep(backoff);
                    backoff = backoff.saturating_mul(2);
                }
                Err(e) => {
                    return Err(BrowserError::Unrecoverable(format!(
                        "cannot load {}: {}",
                        url, e
                    ))
                    .into())
                }
            }
        }
    }

    /// Loads the landing page and records it as the index state
    ///
    /// Runs `on_new_state` and the invariants for the index and queues its
    /// candidates. Returns the index vertex.
    pub fn crawl_index(&mut self) -> Result<Arc<StateVertex>, FlowError> {
        info!("Crawler {}: crawling the index state", self.id());
        self.reset()?;
        self.wait_for_page();

        let (url, dom, stripped) = self.read_page()?;
        let graph = Arc::clone(self.context.graph());
        let existed = graph.initial_state().is_some();
        let index = graph.put_index(self.factory.create_index(&url, &dom, &stripped));
        self.context.set_current_state(Some(Arc::clone(&index)));

        if !existed {
            self.context.metrics().state_discovered();
            self.plugins.run_on_new_state(&mut self.context, &index);
            self.check_invariants(&index, &dom, &url);
            if self.context.exit().check_max_states(graph.state_count()) {
                info!("Crawler {}: state limit reached at the index", self.id());
                return Ok(index);
            }
            self.prepare_state(&index)?;
        }
        Ok(index)
    }

    /// Replays the shortest path to `target`, then explores from there
    ///
    /// Returns immediately, without touching the browser, when `target` has no
    /// queued candidates.
    pub fn execute(&mut self, target: StateId) -> Result<ExecuteOutcome, FlowError> {
        if self.should_stop() {
            return Ok(ExecuteOutcome::Stopped);
        }
        if self.store.pending_count(target) == 0 {
            if self.store.queue_state(target) == QueueState::Pending {
                self.store.purge(target);
            }
            debug!("Crawler {}: state {} has nothing to fire", self.id(), target);
            return Ok(ExecuteOutcome::Exhausted);
        }

        let graph = Arc::clone(self.context.graph());
        let initial = graph.initial_state().ok_or(FlowError::NoIndexState)?;
        let Some(path) = graph.shortest_path(initial.id(), target) else {
            warn!("Crawler {}: no path to state {}", self.id(), target);
            return Ok(ExecuteOutcome::Unreachable);
        };
        let state = graph.state(target).ok_or(FlowError::UnknownState(target))?;

        debug!(
            "Crawler {}: going to state {} via {} events",
            self.id(),
            target,
            path.len()
        );
        self.reset()?;

        for edge in &path {
            if self.should_stop() {
                return Ok(ExecuteOutcome::Stopped);
            }
            if !self.check_crawl_condition() {
                return Ok(ExecuteOutcome::ConditionFailed);
            }

            self.set_phase(CrawlPhase::Firing);
            if !self.fire_event(edge)? {
                self.report_fire_failed(edge);
                return Ok(ExecuteOutcome::ReplayFailed);
            }

            let Some(expected) = edge.target().and_then(|id| graph.state(id)) else {
                return Ok(ExecuteOutcome::Unreachable);
            };
            let (url, _, stripped) = self.read_page()?;
            if stripped != expected.stripped_dom() {
                warn!(
                    "Crawler {}: replaying {} did not lead to {} (at {})",
                    self.id(),
                    edge,
                    expected,
                    url
                );
                return Ok(ExecuteOutcome::ReplayFailed);
            }

            self.context.crawl_path_mut().push(Arc::clone(edge))?;
            self.context.set_current_state(Some(expected));
        }

        if path.is_empty() {
            if !self.check_crawl_condition() {
                return Ok(ExecuteOutcome::ConditionFailed);
            }
            self.wait_for_page();
            self.close_other_windows()?;
        }

        if self.should_stop() {
            return Ok(ExecuteOutcome::Stopped);
        }

        self.context.set_current_state(Some(Arc::clone(&state)));
        self.set_phase(CrawlPhase::AtNewOrExisting);
        self.plugins.run_on_revisit_state(&mut self.context, &state);

        if !self.check_crawl_condition() {
            return Ok(ExecuteOutcome::ConditionFailed);
        }

        self.explore(state)
    }

    /// Fires the candidates of `current` until it runs dry or the crawler
    /// lands in a state it has to backtrack from
    fn explore(&mut self, mut current: Arc<StateVertex>) -> Result<ExecuteOutcome, FlowError> {
        loop {
            if self.should_stop() {
                return Ok(ExecuteOutcome::Stopped);
            }

            self.set_phase(CrawlPhase::Exploring);
            let Some(candidate) = self.store.poll(current.id()) else {
                debug!("Crawler {}: {} has no candidates left", self.id(), current);
                self.set_phase(CrawlPhase::Backtracking);
                return Ok(ExecuteOutcome::Explored);
            };

            let eventable = candidate.to_eventable();
            self.set_phase(CrawlPhase::Firing);
            debug!("Crawler {}: firing {} in {}", self.id(), candidate, current);
            if !self.fire_event(&eventable)? {
                self.report_fire_failed(&eventable);
                continue;
            }

            if self.should_stop() {
                return Ok(ExecuteOutcome::Stopped);
            }

            self.set_phase(CrawlPhase::Classifying);
            let classified = match self.classify(&current, eventable) {
                Err(FlowError::StateLimitReached(max)) => {
                    info!("Crawler {}: not recording more than {} states", self.id(), max);
                    self.context.exit().stop(ExitReason::MaxStates);
                    return Ok(ExecuteOutcome::Stopped);
                }
                other => other?,
            };
            let (target, new_state, dom, url) = match classified {
                Classified::Unchanged => {
                    debug!("Crawler {}: DOM unchanged after {}", self.id(), candidate);
                    continue;
                }
                Classified::LeftSite => {
                    self.set_phase(CrawlPhase::Backtracking);
                    return Ok(ExecuteOutcome::Explored);
                }
                Classified::Moved {
                    target,
                    new_state,
                    dom,
                    url,
                } => (target, new_state, dom, url),
            };

            self.set_phase(CrawlPhase::AtNewOrExisting);
            if !new_state {
                debug!("Crawler {}: back in known {}", self.id(), target);
                self.plugins.run_on_revisit_state(&mut self.context, &target);
                self.set_phase(CrawlPhase::Backtracking);
                return Ok(ExecuteOutcome::Explored);
            }

            info!("Crawler {}: found new {} at {}", self.id(), target, url);
            self.context.metrics().state_discovered();
            self.plugins.run_on_new_state(&mut self.context, &target);
            self.check_invariants(&target, &dom, &url);

            let state_count = self.context.graph().state_count();
            if self.context.exit().check_max_states(state_count) {
                return Ok(ExecuteOutcome::Stopped);
            }

            self.prepare_state(&target)?;
            current = target;
        }
    }

    /// Decides which state the page shows after `eventable` was fired from
    /// `current`, recording the transition in the graph
    fn classify(
        &mut self,
        current: &Arc<StateVertex>,
        eventable: Eventable,
    ) -> Result<Classified, FlowError> {
        let (url, dom, stripped) = self.read_page()?;

        if !self.in_scope(&url) {
            info!("Crawler {}: left the application for {}", self.id(), url);
            if let Err(e) = self.context.browser_mut().go_back() {
                warn!("Crawler {}: cannot go back from {}: {}", self.id(), url, e);
            }
            return Ok(Classified::LeftSite);
        }

        if stripped == current.stripped_dom() {
            return Ok(Classified::Unchanged);
        }

        let transition = self.context.graph().add_transition(
            current.id(),
            eventable,
            self.factory.as_ref(),
            &url,
            &dom,
            &stripped,
        )?;
        if transition.new_edge {
            self.context.metrics().edge_added();
        }
        self.context
            .crawl_path_mut()
            .push(Arc::clone(&transition.eventable))?;
        self.context
            .set_current_state(Some(Arc::clone(&transition.target)));

        Ok(Classified::Moved {
            target: transition.target,
            new_state: transition.new_state,
            dom,
            url,
        })
    }

    /// Extracts and queues the candidates of a state the crawler is in
    ///
    /// States at or beyond the maximum depth, and pages where a crawl
    /// condition fails, get an empty queue.
    fn prepare_state(&mut self, state: &Arc<StateVertex>) -> Result<(), FlowError> {
        let graph = Arc::clone(self.context.graph());
        let depth = graph
            .initial_state()
            .and_then(|initial| graph.shortest_path(initial.id(), state.id()))
            .map_or(0, |path| path.len());
        let max_depth = self.context.config().max_depth();

        let candidates = if max_depth.is_some_and(|max| depth >= max) {
            debug!(
                "Crawler {}: {} is at depth {}, not exploring it",
                self.id(),
                state,
                depth
            );
            Vec::new()
        } else if !self.check_crawl_condition() {
            debug!("Crawler {}: crawl conditions forbid exploring {}", self.id(), state);
            Vec::new()
        } else {
            let started = Instant::now();
            let extracted = self.extractor.extract(self.context.browser_mut(), state);
            self.context.metrics().record_extract(started.elapsed());
            match extracted {
                Ok(candidates) => candidates,
                Err(e @ BrowserError::Unrecoverable(_)) => return Err(e.into()),
                Err(e) => {
                    warn!("Crawler {}: extraction failed in {}: {}", self.id(), state, e);
                    Vec::new()
                }
            }
        };

        self.plugins
            .run_pre_state_crawling(&mut self.context, &candidates, state);
        let queued = self.store.add(state.id(), candidates);
        debug!("Crawler {}: queued {} candidates for {}", self.id(), queued, state);
        Ok(())
    }

    /// Evaluates the invariants on a state's page and reports violations
    fn check_invariants(&mut self, state: &Arc<StateVertex>, dom: &str, url: &str) {
        let config = Arc::clone(self.context.config());
        if config.rules.invariants.is_empty() {
            return;
        }

        let violated: Vec<&Invariant> = {
            let doc = parse_dom(dom);
            let ctx = ConditionContext::new(dom, &doc, url);
            config
                .rules
                .invariants
                .iter()
                .filter(|invariant| match invariant.is_violated(&ctx) {
                    Ok(violated) => violated,
                    Err(e) => {
                        warn!("Invariant '{}' cannot be evaluated: {}", invariant, e);
                        false
                    }
                })
                .collect()
        };

        for invariant in violated {
            warn!(
                "Crawler {}: invariant '{}' violated in {}",
                self.id(),
                invariant,
                state
            );
            self.context.session().record_violation(InvariantViolation {
                invariant: invariant.clone(),
                state: state.id(),
                url: url.to_string(),
                detected_at: Utc::now(),
            });
            self.context.metrics().invariant_violated();
            self.plugins
                .run_on_invariant_violation(invariant, &mut self.context);
        }
    }

    fn check_crawl_condition(&mut self) -> bool {
        self.extractor.check_crawl_condition(self.context.browser_mut())
    }

    fn wait_for_page(&mut self) {
        let started = Instant::now();
        self.waiter.wait(self.context.browser_mut());
        self.context.metrics().record_wait(started.elapsed());
    }

    fn close_other_windows(&mut self) -> Result<(), FlowError> {
        match self.context.browser_mut().close_other_windows() {
            Ok(()) => Ok(()),
            Err(e @ BrowserError::Unrecoverable(_)) => Err(e.into()),
            Err(e) => {
                warn!("Crawler {}: cannot close other windows: {}", self.id(), e);
                Ok(())
            }
        }
    }

    /// Fires one event and lets the page settle
    ///
    /// Returns `Ok(false)` when the event could not be fired; only an
    /// unrecoverable browser is an error.
    fn fire_event(&mut self, eventable: &Eventable) -> Result<bool, FlowError> {
        let started = Instant::now();
        let fired = match self.context.browser_mut().fire_event_and_wait(eventable) {
            Ok(fired) => fired,
            Err(e @ BrowserError::Unrecoverable(_)) => {
                self.context.metrics().record_fire(false, started.elapsed());
                return Err(e.into());
            }
            Err(e) => {
                warn!("Crawler {}: firing {} failed: {}", self.id(), eventable, e);
                false
            }
        };
        self.context.metrics().record_fire(fired, started.elapsed());
        if !fired {
            return Ok(false);
        }

        let pause = self.context.config().wait_after_event();
        if !pause.is_zero() {
            thread::sleep(pause);
        }
        self.wait_for_page();
        self.close_other_windows()?;
        Ok(true)
    }

    fn report_fire_failed(&mut self, eventable: &Eventable) {
        info!("Crawler {}: could not fire {}", self.id(), eventable);
        let path = self.context.crawl_path().clone();
        self.plugins
            .run_on_fire_event_failed(&mut self.context, eventable, &path);
    }

    /// URL, raw DOM and canonical DOM of the current page
    fn read_page(&mut self) -> Result<(String, String, String), FlowError> {
        let browser: &dyn EmbeddedBrowser = self.context.browser();
        let dom = browser.dom()?;
        let url = browser.current_url()?;
        let stripped = self.context.config().strippers().strip(&dom);
        Ok((url, dom, stripped))
    }

    fn in_scope(&self, url: &str) -> bool {
        let config = self.context.config();
        config.crawler.follow_external_links
            || is_in_scope(config.landing_url(), url, &config.crawler.allowed_hosts)
    }

    /// Takes tasks from the shared store until no work is left or the run stops
    ///
    /// Returns an error only when the browser became unusable.
    pub fn run(&mut self) -> Result<(), FlowError> {
        let graph = Arc::clone(self.context.graph());
        let exit = Arc::clone(self.context.exit());
        let mut failures: HashMap<StateId, u32> = HashMap::new();

        while let Some(task) = self.store.await_new_task(&graph, &exit) {
            let target = task.target();
            match self.execute(target) {
                Ok(ExecuteOutcome::ConditionFailed) | Ok(ExecuteOutcome::Unreachable) => {
                    debug!("Crawler {}: dropping the candidates of state {}", self.id(), target);
                    self.store.purge(target);
                }
                Ok(ExecuteOutcome::ReplayFailed) => self.note_failure(&mut failures, target),
                Ok(outcome) => trace!("Crawler {}: state {} -> {:?}", self.id(), target, outcome),
                Err(FlowError::Browser(e @ BrowserError::Unrecoverable(_))) => {
                    self.set_phase(CrawlPhase::ErrorRecovery);
                    return Err(e.into());
                }
                Err(e) => {
                    warn!("Crawler {}: exploring state {} failed: {}", self.id(), target, e);
                    self.note_failure(&mut failures, target);
                }
            }
        }

        if self.store.is_closed() {
            exit.stop(ExitReason::Exhausted);
        }
        self.set_phase(CrawlPhase::Done);
        Ok(())
    }

    fn note_failure(&self, failures: &mut HashMap<StateId, u32>, target: StateId) {
        let count = failures.entry(target).or_insert(0);
        *count += 1;
        if *count >= MAX_REPLAY_ATTEMPTS {
            warn!(
                "Crawler {}: giving up on state {} after {} failed attempts",
                self.id(),
                target,
                count
            );
            self.store.purge(target);
        }
    }

    /// Closes the browser; the crawler is gone afterwards
    pub fn shutdown(self) {
        let id = self.context.crawler_id();
        let mut browser = self.context.into_browser();
        if let Err(e) = browser.close() {
            debug!("Crawler {}: closing the browser failed: {}", id, e);
        }
    }
}
