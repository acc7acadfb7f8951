//! Crawl supervision
//!
//! The [`CrawlController`] owns everything a run shares: the session (graph,
//! metrics, violations), the exit notifier and the unfired candidate store.
//! Each crawler runs on its own blocking thread with its own browser. The
//! controller first lets one crawler record the index state, then starts the
//! configured number of crawlers, enforces the runtime limit and replaces
//! crawlers whose browser died while restarts remain.

use crate::browser::BrowserProvider;
use crate::config::{CrawlConfig, CrawlConfigBuilder};
use crate::crawler::context::CrawlerContext;
use crate::crawler::engine::Crawler;
use crate::crawler::exit::{ExitNotifier, ExitReason};
use crate::crawler::extractor::{CandidateElementExtractor, CheckedElements};
use crate::crawler::session::{CrawlOutcome, CrawlSession, CrawlStatus};
use crate::crawler::unfired::UnfiredCandidateStore;
use crate::state::StateId;
use crate::{BrowserError, FlowError};
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinSet;
use tracing::{debug, error, info, warn};

/// Pause before a replacement crawler asks for a new browser
const RESTART_DELAY: Duration = Duration::from_millis(100);

/// What a crawler thread was asked to do
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Job {
    /// Record the index state and queue its candidates
    Index,
    /// Take tasks from the store until the run ends
    Work,
}

/// Result of one crawler thread
struct Finished {
    id: usize,
    job: Job,
    result: Result<Option<Crawler>, FlowError>,
}

/// Creates crawlers; cloned into every crawler thread
#[derive(Clone)]
struct Launcher {
    provider: Arc<dyn BrowserProvider>,
    session: Arc<CrawlSession>,
    exit: Arc<ExitNotifier>,
    store: Arc<UnfiredCandidateStore>,
    checked: CheckedElements,
}

impl Launcher {
    fn create(&self, id: usize) -> Result<Crawler, FlowError> {
        let config = self.session.config();
        let mut browser = self.provider.create(&config.browser)?;
        let failures = config.plugins().run_on_browser_created(browser.as_mut());
        self.session.metrics().plugin_failed(failures);

        let context = CrawlerContext::new(
            id,
            browser,
            Arc::clone(&self.session),
            Arc::clone(&self.exit),
        );
        let extractor = CandidateElementExtractor::new(Arc::clone(config), self.checked.clone());
        Ok(Crawler::new(context, Arc::clone(&self.store)).with_extractor(Box::new(extractor)))
    }

    /// Records the index state; hands the crawler back for the work phase
    fn index(&self, id: usize) -> Result<Option<Crawler>, FlowError> {
        let mut crawler = self.create(id)?;
        let _task = self.store.start_task(StateId::INDEX);
        match crawler.crawl_index() {
            Ok(index) => {
                info!("Index state {} recorded at {}", index.id(), index.url());
                Ok(Some(crawler))
            }
            Err(e) => {
                crawler.shutdown();
                Err(e)
            }
        }
    }

    fn work(&self, crawler: Option<Crawler>, id: usize) -> Result<Option<Crawler>, FlowError> {
        let mut crawler = match crawler {
            Some(crawler) => crawler,
            None => self.create(id)?,
        };
        self.exit.crawler_started();
        let result = crawler.run();
        let remaining = self.exit.crawler_finished();
        debug!("Crawler {} finished, {} still active", id, remaining);
        crawler.shutdown();
        result.map(|()| None)
    }
}

/// Runs one crawl to completion
///
/// # Example
///
/// ```no_run
/// # async fn demo(provider: std::sync::Arc<dyn sumi_flow::browser::BrowserProvider>) {
/// use sumi_flow::config::CrawlConfigBuilder;
/// use sumi_flow::CrawlController;
///
/// let config = CrawlConfigBuilder::new("http://localhost:8080/").build().unwrap();
/// let outcome = CrawlController::new(config, provider).run().await;
/// println!("{} states", outcome.session.graph().state_count());
/// # }
/// ```
pub struct CrawlController {
    config: Arc<CrawlConfig>,
    launcher: Launcher,
}

impl CrawlController {
    pub fn new(config: impl Into<Arc<CrawlConfig>>, provider: Arc<dyn BrowserProvider>) -> Self {
        let config = config.into();
        let session = Arc::new(CrawlSession::new(Arc::clone(&config)));
        let exit = Arc::new(ExitNotifier::new(config.max_states()));
        Self {
            launcher: Launcher {
                provider,
                session,
                exit,
                store: Arc::new(UnfiredCandidateStore::new()),
                checked: CheckedElements::new(),
            },
            config,
        }
    }

    pub fn session(&self) -> &Arc<CrawlSession> {
        &self.launcher.session
    }

    /// The notifier every crawler of this run watches; stopping it ends the run
    pub fn exit_notifier(&self) -> Arc<ExitNotifier> {
        Arc::clone(&self.launcher.exit)
    }

    pub fn store(&self) -> &Arc<UnfiredCandidateStore> {
        &self.launcher.store
    }

    fn spawn(
        &self,
        jobs: &mut JoinSet<Finished>,
        id: usize,
        job: Job,
        crawler: Option<Crawler>,
        delay: Duration,
    ) {
        let launcher = self.launcher.clone();
        jobs.spawn_blocking(move || {
            if !delay.is_zero() {
                std::thread::sleep(delay);
            }
            let result = catch_unwind(AssertUnwindSafe(|| match job {
                Job::Index => launcher.index(id),
                Job::Work => launcher.work(crawler, id),
            }))
            .unwrap_or_else(|_| {
                Err(BrowserError::Unrecoverable(format!("crawler {} panicked", id)).into())
            });
            Finished { id, job, result }
        });
    }

    /// Runs the crawl and returns its outcome
    ///
    /// The `pre_crawling` plugins run before the first browser is created and
    /// the `post_crawling` plugins exactly once after every crawler has ended.
    pub async fn run(self) -> CrawlOutcome {
        let session = Arc::clone(&self.launcher.session);
        let exit = Arc::clone(&self.launcher.exit);
        let store = Arc::clone(&self.launcher.store);
        let plugins = self.config.plugins().clone();

        info!(
            "Starting crawl of {} with {} crawler(s)",
            self.config.landing_url(),
            self.config.max_crawlers()
        );
        let failures = plugins.run_pre_crawling(&self.config);
        session.metrics().plugin_failed(failures);

        let mut jobs = JoinSet::new();
        let mut next_id = 1;
        let mut restarts_left = self.config.crawler.browser_restarts;
        let deadline = self
            .config
            .max_runtime()
            .map(|runtime| tokio::time::Instant::now() + runtime);

        self.spawn(&mut jobs, 0, Job::Index, None, Duration::ZERO);

        loop {
            let joined = match deadline {
                Some(deadline) => tokio::select! {
                    joined = jobs.join_next() => joined,
                    _ = tokio::time::sleep_until(deadline), if exit.is_running() => {
                        warn!("Maximum runtime reached");
                        exit.stop(ExitReason::MaxRuntime);
                        store.wake_all();
                        continue;
                    }
                },
                None => jobs.join_next().await,
            };

            let Some(joined) = joined else {
                break;
            };
            let finished = match joined {
                Ok(finished) => finished,
                Err(e) => {
                    error!("Crawler task was lost: {}", e);
                    continue;
                }
            };

            match finished.result {
                Ok(Some(crawler)) => {
                    // The index is recorded; start the whole crew
                    self.spawn(&mut jobs, finished.id, Job::Work, Some(crawler), Duration::ZERO);
                    for _ in 1..self.config.max_crawlers() {
                        self.spawn(&mut jobs, next_id, Job::Work, None, Duration::ZERO);
                        next_id += 1;
                    }
                }
                Ok(None) => debug!("Crawler {} done", finished.id),
                Err(e) => {
                    error!("Crawler {} failed: {}", finished.id, e);
                    if exit.should_stop() {
                        continue;
                    }
                    if restarts_left > 0 {
                        restarts_left -= 1;
                        session.metrics().browser_restarted();
                        info!(
                            "Restarting crawler {} as crawler {} ({} restarts left)",
                            finished.id, next_id, restarts_left
                        );
                        self.spawn(&mut jobs, next_id, finished.job, None, RESTART_DELAY);
                        next_id += 1;
                    } else if finished.job == Job::Index || jobs.is_empty() {
                        exit.stop(ExitReason::BrowserFailure);
                        store.wake_all();
                    }
                }
            }
        }

        exit.mark_stopped();
        session.finish();

        let status = match exit.reason() {
            Some(ExitReason::Exhausted) | Some(ExitReason::MaxStates) | None => {
                CrawlStatus::Completed
            }
            Some(ExitReason::MaxRuntime) => CrawlStatus::TimedOut,
            Some(ExitReason::Stopped) => CrawlStatus::Stopped,
            Some(ExitReason::BrowserFailure) => CrawlStatus::BrowserFailure,
        };

        let snapshot = session.metrics().snapshot();
        info!(
            "Crawl {}: {} states, {} edges, {} events fired in {}s",
            status,
            session.graph().state_count(),
            session.graph().edge_count(),
            snapshot.fires_attempted,
            session.duration().num_seconds()
        );

        let failures = plugins.run_post_crawling(&session, status);
        session.metrics().plugin_failed(failures);

        CrawlOutcome { session, status }
    }
}

/// Builds the configuration, runs the crawl and writes the summary if one
/// was configured
///
/// # Returns
///
/// * `Ok(CrawlOutcome)` - The crawl ran (it may still have ended early)
/// * `Err(FlowError)` - The configuration is invalid or the summary could not
///   be written
pub async fn run_crawl(
    builder: CrawlConfigBuilder,
    provider: Arc<dyn BrowserProvider>,
) -> Result<CrawlOutcome, FlowError> {
    let config = builder.build()?;
    let summary_path = config.output.summary_path.clone();
    let outcome = CrawlController::new(config, provider).run().await;

    if let Some(path) = summary_path {
        crate::output::write_summary(&outcome, std::path::Path::new(&path))?;
        info!("Summary written to {}", path);
    }
    Ok(outcome)
}
