//! Per-crawler context handed to plugins

use crate::browser::EmbeddedBrowser;
use crate::config::CrawlConfig;
use crate::crawler::exit::{ExitNotifier, ExitReason};
use crate::crawler::metrics::CrawlMetrics;
use crate::crawler::session::CrawlSession;
use crate::state::{CrawlPath, StateFlowGraph, StateVertex};
use std::fmt;
use std::sync::Arc;

/// Everything one crawler owns or shares, as seen by plugins
///
/// A context belongs to exactly one crawler thread. It owns that crawler's
/// browser and path; the configuration, session and exit notifier are shared.
pub struct CrawlerContext {
    crawler_id: usize,
    browser: Box<dyn EmbeddedBrowser>,
    config: Arc<CrawlConfig>,
    session: Arc<CrawlSession>,
    exit: Arc<ExitNotifier>,
    crawl_path: CrawlPath,
    current_state: Option<Arc<StateVertex>>,
}

impl fmt::Debug for CrawlerContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CrawlerContext")
            .field("crawler_id", &self.crawler_id)
            .field("crawl_path", &self.crawl_path)
            .field("current_state", &self.current_state.as_ref().map(|s| s.id()))
            .finish_non_exhaustive()
    }
}

impl CrawlerContext {
    pub fn new(
        crawler_id: usize,
        browser: Box<dyn EmbeddedBrowser>,
        session: Arc<CrawlSession>,
        exit: Arc<ExitNotifier>,
    ) -> Self {
        Self {
            crawler_id,
            browser,
            config: Arc::clone(session.config()),
            session,
            exit,
            crawl_path: CrawlPath::new(),
            current_state: None,
        }
    }

    pub fn crawler_id(&self) -> usize {
        self.crawler_id
    }

    pub fn browser(&self) -> &dyn EmbeddedBrowser {
        self.browser.as_ref()
    }

    pub fn browser_mut(&mut self) -> &mut dyn EmbeddedBrowser {
        self.browser.as_mut()
    }

    pub fn config(&self) -> &Arc<CrawlConfig> {
        &self.config
    }

    pub fn session(&self) -> &Arc<CrawlSession> {
        &self.session
    }

    pub fn graph(&self) -> &Arc<StateFlowGraph> {
        self.session.graph()
    }

    pub fn metrics(&self) -> &Arc<CrawlMetrics> {
        self.session.metrics()
    }

    pub fn exit(&self) -> &Arc<ExitNotifier> {
        &self.exit
    }

    /// Events fired since the last reset
    pub fn crawl_path(&self) -> &CrawlPath {
        &self.crawl_path
    }

    /// The state the browser is believed to show
    pub fn current_state(&self) -> Option<&Arc<StateVertex>> {
        self.current_state.as_ref()
    }

    /// Asks the whole run to stop
    pub fn stop(&self) {
        self.exit.stop(ExitReason::Stopped);
    }

    pub(crate) fn crawl_path_mut(&mut self) -> &mut CrawlPath {
        &mut self.crawl_path
    }

    pub(crate) fn set_current_state(&mut self, state: Option<Arc<StateVertex>>) {
        self.current_state = state;
    }

    /// Gives the browser back, e.g. to close it when the crawler exits
    pub(crate) fn into_browser(self) -> Box<dyn EmbeddedBrowser> {
        self.browser
    }
}
