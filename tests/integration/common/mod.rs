//! Shared fixtures for the crawler integration tests
//!
//! Every stub writes into one shared [`Trace`], so a test can assert the exact
//! interleaving of browser calls, plugin hooks, crawl-condition checks and
//! waits.

#![allow(dead_code)]

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use sumi_flow::browser::EmbeddedBrowser;
use sumi_flow::condition::{Invariant, WaitConditionChecker};
use sumi_flow::config::{BrowserConfig, CrawlConfig, CrawlConfigBuilder};
use sumi_flow::crawler::{
    CandidateElement, CandidateElementExtractor, CandidateExtractor, CheckedElements, CrawlSession,
    CrawlStatus, CrawlerContext, ExitNotifier, UnfiredCandidateStore,
};
use sumi_flow::plugin::{Hook, Plugin};
use sumi_flow::state::{CrawlPath, Eventable, Identification, StateVertex};
use sumi_flow::{BrowserError, Crawler};
use url::Url;

pub const LANDING: &str = "http://example.com/";
const EXTERNAL_PAGE: &str = "@external";
const EXTERNAL_URL: &str = "http://elsewhere.org/";

pub type Trace = Arc<Mutex<Vec<String>>>;

pub fn new_trace() -> Trace {
    Arc::new(Mutex::new(Vec::new()))
}

fn record(trace: &Trace, entry: impl Into<String>) {
    trace.lock().unwrap().push(entry.into());
}

/// The name the stub application uses for the element an eventable targets:
/// the element text when known, the identification value otherwise
pub fn event_key(eventable: &Eventable) -> String {
    eventable
        .element()
        .map(|e| e.text.clone())
        .filter(|text| !text.is_empty())
        .unwrap_or_else(|| eventable.identification().value.clone())
}

/// HTML of a stub page: a heading plus one link per entry
pub fn page_dom(name: &str, links: &[&str]) -> String {
    let anchors: String = links
        .iter()
        .map(|text| format!("<a href=\"#\">{}</a>", text))
        .collect();
    format!(
        "<html><head></head><body><h1>{}</h1>{}</body></html>",
        name, anchors
    )
}

pub fn page_url(page: &str) -> String {
    match page {
        "index" => LANDING.to_string(),
        EXTERNAL_PAGE => EXTERNAL_URL.to_string(),
        _ => format!("{}#{}", LANDING, page),
    }
}

/// A scripted application: pages and the links between them
///
/// Links are addressed by their text. Firing an unknown link leaves the page
/// unchanged.
#[derive(Debug, Clone, Default)]
pub struct App {
    pages: HashMap<String, String>,
    links: HashMap<(String, String), String>,
    failing: HashSet<String>,
}

impl App {
    pub fn new() -> Self {
        let mut app = Self::default();
        app.pages.insert(
            EXTERNAL_PAGE.to_string(),
            "<html><head></head><body>elsewhere</body></html>".to_string(),
        );
        app
    }

    /// Adds a page whose links lead to the named pages
    pub fn page(mut self, name: &str, links: &[(&str, &str)]) -> Self {
        let texts: Vec<&str> = links.iter().map(|(text, _)| *text).collect();
        self.pages.insert(name.to_string(), page_dom(name, &texts));
        for (text, target) in links {
            self.links
                .insert((name.to_string(), text.to_string()), target.to_string());
        }
        self
    }

    /// Adds a page with a hand-written DOM
    pub fn raw_page(mut self, name: &str, dom: &str) -> Self {
        self.pages.insert(name.to_string(), dom.to_string());
        self
    }

    /// Adds a link that is not part of the page's generated DOM
    pub fn link(mut self, from: &str, key: &str, to: &str) -> Self {
        self.links
            .insert((from.to_string(), key.to_string()), to.to_string());
        self
    }

    /// A link that leaves the application
    pub fn external(self, from: &str, key: &str) -> Self {
        self.link(from, key, EXTERNAL_PAGE)
    }

    /// Elements with this key cannot be interacted with
    pub fn failing(mut self, key: &str) -> Self {
        self.failing.insert(key.to_string());
        self
    }

    pub fn dom(&self, page: &str) -> Option<&String> {
        self.pages.get(page)
    }
}

/// Browser over an [`App`]
pub struct StubBrowser {
    app: Arc<App>,
    trace: Trace,
    current: String,
    history: Vec<String>,
    failing_loads: usize,
}

impl StubBrowser {
    pub fn new(app: Arc<App>, trace: Trace) -> Self {
        Self {
            app,
            trace,
            current: "index".to_string(),
            history: Vec::new(),
            failing_loads: 0,
        }
    }

    /// The next `count` page loads fail transiently
    pub fn failing_loads(mut self, count: usize) -> Self {
        self.failing_loads = count;
        self
    }
}

impl EmbeddedBrowser for StubBrowser {
    fn go_to_url(&mut self, url: &Url) -> Result<(), BrowserError> {
        record(&self.trace, format!("goToUrl({})", url));
        if self.failing_loads > 0 {
            self.failing_loads -= 1;
            return Err(BrowserError::Transient("connection refused".into()));
        }
        self.current = "index".to_string();
        self.history.clear();
        Ok(())
    }

    fn current_url(&self) -> Result<String, BrowserError> {
        Ok(page_url(&self.current))
    }

    fn dom(&self) -> Result<String, BrowserError> {
        self.app
            .dom(&self.current)
            .cloned()
            .ok_or_else(|| BrowserError::Transient(format!("no page {}", self.current)))
    }

    fn is_visible(&self, _identification: &Identification) -> Result<bool, BrowserError> {
        Ok(true)
    }

    fn close_other_windows(&mut self) -> Result<(), BrowserError> {
        record(&self.trace, "closeOtherWindows");
        Ok(())
    }

    fn fire_event_and_wait(&mut self, eventable: &Eventable) -> Result<bool, BrowserError> {
        let key = event_key(eventable);
        record(&self.trace, format!("fire({})", key));
        if self.app.failing.contains(&key) {
            return Ok(false);
        }
        if let Some(target) = self.app.links.get(&(self.current.clone(), key)) {
            self.history.push(std::mem::replace(&mut self.current, target.clone()));
        }
        Ok(true)
    }

    fn go_back(&mut self) -> Result<(), BrowserError> {
        record(&self.trace, "goBack");
        if let Some(previous) = self.history.pop() {
            self.current = previous;
        }
        Ok(())
    }

    fn close(&mut self) -> Result<(), BrowserError> {
        record(&self.trace, "close");
        Ok(())
    }
}

/// Plugin recording every hook into the trace
pub struct RecordingPlugin {
    trace: Trace,
}

impl RecordingPlugin {
    pub fn new(trace: Trace) -> Self {
        Self { trace }
    }
}

impl Plugin for RecordingPlugin {
    fn name(&self) -> &str {
        "recorder"
    }

    fn hooks(&self) -> &'static [Hook] {
        Hook::ALL
    }

    fn pre_crawling(&self, _config: &CrawlConfig) -> anyhow::Result<()> {
        record(&self.trace, "preCrawling");
        Ok(())
    }

    fn on_browser_created(&self, _browser: &mut dyn EmbeddedBrowser) -> anyhow::Result<()> {
        record(&self.trace, "onBrowserCreated");
        Ok(())
    }

    fn on_url_load(&self, _context: &mut CrawlerContext) -> anyhow::Result<()> {
        record(&self.trace, "onUrlLoad");
        Ok(())
    }

    fn on_new_state(&self, _context: &mut CrawlerContext, state: &StateVertex) -> anyhow::Result<()> {
        record(&self.trace, format!("onNewState({})", state.id()));
        Ok(())
    }

    fn on_revisit_state(
        &self,
        _context: &mut CrawlerContext,
        state: &StateVertex,
    ) -> anyhow::Result<()> {
        record(&self.trace, format!("onRevisitState({})", state.id()));
        Ok(())
    }

    fn pre_state_crawling(
        &self,
        _context: &mut CrawlerContext,
        candidates: &[CandidateElement],
        state: &StateVertex,
    ) -> anyhow::Result<()> {
        record(
            &self.trace,
            format!("preStateCrawling({}:{})", state.id(), candidates.len()),
        );
        Ok(())
    }

    fn on_invariant_violation(
        &self,
        invariant: &Invariant,
        _context: &mut CrawlerContext,
    ) -> anyhow::Result<()> {
        record(&self.trace, format!("onInvariantViolation({})", invariant));
        Ok(())
    }

    fn on_fire_event_failed(
        &self,
        _context: &mut CrawlerContext,
        eventable: &Eventable,
        _path: &CrawlPath,
    ) -> anyhow::Result<()> {
        record(
            &self.trace,
            format!("onFireEventFailed({})", event_key(eventable)),
        );
        Ok(())
    }

    fn post_crawling(&self, _session: &CrawlSession, status: CrawlStatus) -> anyhow::Result<()> {
        record(&self.trace, format!("postCrawling({})", status));
        Ok(())
    }
}

/// Rule-driven extractor that records its calls
pub struct RecordingExtractor {
    inner: CandidateElementExtractor,
    trace: Trace,
}

impl RecordingExtractor {
    pub fn new(config: Arc<CrawlConfig>, trace: Trace) -> Self {
        Self {
            inner: CandidateElementExtractor::new(config, CheckedElements::new()),
            trace,
        }
    }
}

impl CandidateExtractor for RecordingExtractor {
    fn check_crawl_condition(&mut self, browser: &mut dyn EmbeddedBrowser) -> bool {
        record(&self.trace, "checkCrawlCondition");
        self.inner.check_crawl_condition(browser)
    }

    fn extract(
        &mut self,
        browser: &mut dyn EmbeddedBrowser,
        state: &StateVertex,
    ) -> Result<Vec<CandidateElement>, BrowserError> {
        record(&self.trace, format!("extract({})", state.id()));
        self.inner.extract(browser, state)
    }
}

/// Wait checker that returns at once and records the call
pub struct RecordingWaiter {
    trace: Trace,
}

impl RecordingWaiter {
    pub fn new(trace: Trace) -> Self {
        Self { trace }
    }
}

impl WaitConditionChecker for RecordingWaiter {
    fn wait(&self, _browser: &mut dyn EmbeddedBrowser) {
        record(&self.trace, "wait");
    }
}

/// Builder for the landing page with no pauses and a recording plugin
pub fn builder(trace: &Trace) -> CrawlConfigBuilder {
    CrawlConfigBuilder::new(LANDING)
        .wait_after_event(Duration::ZERO)
        .wait_after_reload(Duration::ZERO)
        .page_load_retries(2, Duration::from_millis(1))
        .add_plugin(Arc::new(RecordingPlugin::new(Arc::clone(trace))))
}

/// One crawler wired to stubs that share a trace
pub struct Harness {
    pub crawler: Crawler,
    pub session: Arc<CrawlSession>,
    pub store: Arc<UnfiredCandidateStore>,
    pub exit: Arc<ExitNotifier>,
    pub trace: Trace,
}

impl Harness {
    pub fn new(builder: CrawlConfigBuilder, app: App, trace: Trace) -> Self {
        let browser = StubBrowser::new(Arc::new(app), Arc::clone(&trace));
        Self::with_browser(builder, Box::new(browser), trace)
    }

    pub fn with_browser(
        builder: CrawlConfigBuilder,
        browser: Box<dyn EmbeddedBrowser>,
        trace: Trace,
    ) -> Self {
        let config = Arc::new(builder.build().unwrap());
        let session = Arc::new(CrawlSession::new(Arc::clone(&config)));
        let exit = Arc::new(ExitNotifier::new(config.max_states()));
        let store = Arc::new(UnfiredCandidateStore::new());

        let context = CrawlerContext::new(0, browser, Arc::clone(&session), Arc::clone(&exit));
        let crawler = Crawler::new(context, Arc::clone(&store))
            .with_extractor(Box::new(RecordingExtractor::new(
                Arc::clone(&config),
                Arc::clone(&trace),
            )))
            .with_wait_checker(Arc::new(RecordingWaiter::new(Arc::clone(&trace))));

        Self {
            crawler,
            session,
            store,
            exit,
            trace,
        }
    }

    pub fn trace(&self) -> Vec<String> {
        self.trace.lock().unwrap().clone()
    }

    pub fn clear_trace(&self) {
        self.trace.lock().unwrap().clear();
    }
}

/// Browser provider over an [`App`]; every browser gets its own stub
pub fn provider(app: App, trace: Trace) -> Arc<dyn sumi_flow::BrowserProvider> {
    let app = Arc::new(app);
    Arc::new(
        move |_config: &BrowserConfig| -> Result<Box<dyn EmbeddedBrowser>, BrowserError> {
            Ok(Box::new(StubBrowser::new(Arc::clone(&app), Arc::clone(&trace))))
        },
    )
}

/// True if `expected` occurs in `trace` in order (other entries may interleave)
pub fn is_subsequence(trace: &[String], expected: &[&str]) -> bool {
    let mut remaining = expected.iter().peekable();
    for entry in trace {
        if remaining.peek().is_some_and(|next| entry == *next) {
            remaining.next();
        }
    }
    remaining.peek().is_none()
}
