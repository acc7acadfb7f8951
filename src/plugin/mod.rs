//! Plugins and the plugin bus
//!
//! A plugin declares the set of hooks it implements ([`Plugin::hooks`]). The
//! [`Plugins`] bus keeps, per hook, the plugins in registration order and
//! dispatches to them synchronously on the calling crawler's thread.
//!
//! Plugin failures never abort a crawler: errors and panics are caught,
//! logged and counted, and the crawl continues.
//!
//! # Hook points
//!
//! | Hook | When |
//! |---|---|
//! | `pre_crawling` | once, before any browser is created |
//! | `on_browser_created` | after each crawler's browser is created |
//! | `on_url_load` | after every load of the landing URL |
//! | `on_new_state` | after a new state was added to the graph |
//! | `on_revisit_state` | when a crawler arrives at a known state |
//! | `pre_state_crawling` | with the candidates of a state before they are queued |
//! | `on_invariant_violation` | for each violated invariant on a new state |
//! | `on_fire_event_failed` | when an event could not be fired |
//! | `post_crawling` | once, after all crawlers stopped |

use crate::browser::EmbeddedBrowser;
use crate::condition::Invariant;
use crate::config::CrawlConfig;
use crate::crawler::{CandidateElement, CrawlSession, CrawlStatus, CrawlerContext};
use crate::state::{CrawlPath, Eventable, StateVertex};
use std::collections::BTreeMap;
use std::fmt;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;
use tracing::{debug, warn};

/// The hook points a plugin can implement
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Hook {
    PreCrawling,
    OnBrowserCreated,
    OnUrlLoad,
    OnNewState,
    OnRevisitState,
    PreStateCrawling,
    OnInvariantViolation,
    OnFireEventFailed,
    PostCrawling,
}

impl Hook {
    pub const ALL: &'static [Hook] = &[
        Hook::PreCrawling,
        Hook::OnBrowserCreated,
        Hook::OnUrlLoad,
        Hook::OnNewState,
        Hook::OnRevisitState,
        Hook::PreStateCrawling,
        Hook::OnInvariantViolation,
        Hook::OnFireEventFailed,
        Hook::PostCrawling,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::PreCrawling => "preCrawling",
            Self::OnBrowserCreated => "onBrowserCreated",
            Self::OnUrlLoad => "onUrlLoad",
            Self::OnNewState => "onNewState",
            Self::OnRevisitState => "onRevisitState",
            Self::PreStateCrawling => "preStateCrawling",
            Self::OnInvariantViolation => "onInvariantViolation",
            Self::OnFireEventFailed => "onFireEventFailed",
            Self::PostCrawling => "postCrawling",
        }
    }
}

impl fmt::Display for Hook {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// A crawl plugin
///
/// Only the hooks listed by [`Plugin::hooks`] are ever called. Plugins may read
/// the context and session they are handed and may drive the browser (to log
/// in on URL load, for example), but must not mutate the graph.
#[allow(unused_variables)]
pub trait Plugin: Send + Sync {
    fn name(&self) -> &str;

    /// The hooks this plugin implements
    fn hooks(&self) -> &'static [Hook];

    fn pre_crawling(&self, config: &CrawlConfig) -> anyhow::Result<()> {
        Ok(())
    }

    fn on_browser_created(&self, browser: &mut dyn EmbeddedBrowser) -> anyhow::Result<()> {
        Ok(())
    }

    fn on_url_load(&self, context: &mut CrawlerContext) -> anyhow::Result<()> {
        Ok(())
    }

    fn on_new_state(&self, context: &mut CrawlerContext, state: &StateVertex) -> anyhow::Result<()> {
        Ok(())
    }

    fn on_revisit_state(
        &self,
        context: &mut CrawlerContext,
        state: &StateVertex,
    ) -> anyhow::Result<()> {
        Ok(())
    }

    fn pre_state_crawling(
        &self,
        context: &mut CrawlerContext,
        candidates: &[CandidateElement],
        state: &StateVertex,
    ) -> anyhow::Result<()> {
        Ok(())
    }

    fn on_invariant_violation(
        &self,
        invariant: &Invariant,
        context: &mut CrawlerContext,
    ) -> anyhow::Result<()> {
        Ok(())
    }

    fn on_fire_event_failed(
        &self,
        context: &mut CrawlerContext,
        eventable: &Eventable,
        path: &CrawlPath,
    ) -> anyhow::Result<()> {
        Ok(())
    }

    fn post_crawling(&self, session: &CrawlSession, status: CrawlStatus) -> anyhow::Result<()> {
        Ok(())
    }
}

/// Ordered, per-hook plugin registry
#[derive(Clone, Default)]
pub struct Plugins {
    by_hook: BTreeMap<Hook, Vec<Arc<dyn Plugin>>>,
}

impl fmt::Debug for Plugins {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut map = f.debug_map();
        for (hook, plugins) in &self.by_hook {
            let names: Vec<&str> = plugins.iter().map(|p| p.name()).collect();
            map.entry(hook, &names);
        }
        map.finish()
    }
}

impl Plugins {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a plugin under every hook it declares
    pub fn register(&mut self, plugin: Arc<dyn Plugin>) {
        let mut hooks: Vec<Hook> = plugin.hooks().to_vec();
        hooks.sort();
        hooks.dedup();
        debug!("Registering plugin {} for {:?}", plugin.name(), hooks);
        for hook in hooks {
            self.by_hook.entry(hook).or_default().push(Arc::clone(&plugin));
        }
    }

    /// Plugins registered for `hook`, in registration order
    pub fn for_hook(&self, hook: Hook) -> &[Arc<dyn Plugin>] {
        self.by_hook.get(&hook).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn is_empty(&self) -> bool {
        self.by_hook.is_empty()
    }

    /// Number of distinct registered plugins
    pub fn len(&self) -> usize {
        let mut ptrs: Vec<*const ()> = self
            .by_hook
            .values()
            .flatten()
            .map(|p| Arc::as_ptr(p) as *const ())
            .collect();
        ptrs.sort();
        ptrs.dedup();
        ptrs.len()
    }

    /// Calls `call` for every plugin of `hook`; returns the number of failures
    fn dispatch<F>(&self, hook: Hook, mut call: F) -> usize
    where
        F: FnMut(&dyn Plugin) -> anyhow::Result<()>,
    {
        let mut failures = 0;
        for plugin in self.for_hook(hook) {
            match catch_unwind(AssertUnwindSafe(|| call(plugin.as_ref()))) {
                Ok(Ok(())) => {}
                Ok(Err(e)) => {
                    failures += 1;
                    warn!("Plugin {} failed in {}: {:#}", plugin.name(), hook, e);
                }
                Err(panic) => {
                    failures += 1;
                    warn!(
                        "Plugin {} panicked in {}: {}",
                        plugin.name(),
                        hook,
                        panic_message(panic.as_ref())
                    );
                }
            }
        }
        failures
    }

    fn dispatch_in_context<F>(&self, hook: Hook, context: &mut CrawlerContext, mut call: F)
    where
        F: FnMut(&dyn Plugin, &mut CrawlerContext) -> anyhow::Result<()>,
    {
        let failures = self.dispatch(hook, |plugin| call(plugin, context));
        context.metrics().plugin_failed(failures);
    }

    /// Returns the number of failed plugins
    pub fn run_pre_crawling(&self, config: &CrawlConfig) -> usize {
        self.dispatch(Hook::PreCrawling, |p| p.pre_crawling(config))
    }

    /// Returns the number of failed plugins
    pub fn run_on_browser_created(&self, browser: &mut dyn EmbeddedBrowser) -> usize {
        self.dispatch(Hook::OnBrowserCreated, |p| p.on_browser_created(browser))
    }

    pub fn run_on_url_load(&self, context: &mut CrawlerContext) {
        self.dispatch_in_context(Hook::OnUrlLoad, context, |p, ctx| p.on_url_load(ctx));
    }

    pub fn run_on_new_state(&self, context: &mut CrawlerContext, state: &StateVertex) {
        self.dispatch_in_context(Hook::OnNewState, context, |p, ctx| {
            p.on_new_state(ctx, state)
        });
    }

    pub fn run_on_revisit_state(&self, context: &mut CrawlerContext, state: &StateVertex) {
        self.dispatch_in_context(Hook::OnRevisitState, context, |p, ctx| {
            p.on_revisit_state(ctx, state)
        });
    }

    pub fn run_pre_state_crawling(
        &self,
        context: &mut CrawlerContext,
        candidates: &[CandidateElement],
        state: &StateVertex,
    ) {
        self.dispatch_in_context(Hook::PreStateCrawling, context, |p, ctx| {
            p.pre_state_crawling(ctx, candidates, state)
        });
    }

    pub fn run_on_invariant_violation(&self, invariant: &Invariant, context: &mut CrawlerContext) {
        self.dispatch_in_context(Hook::OnInvariantViolation, context, |p, ctx| {
            p.on_invariant_violation(invariant, ctx)
        });
    }

    pub fn run_on_fire_event_failed(
        &self,
        context: &mut CrawlerContext,
        eventable: &Eventable,
        path: &CrawlPath,
    ) {
        self.dispatch_in_context(Hook::OnFireEventFailed, context, |p, ctx| {
            p.on_fire_event_failed(ctx, eventable, path)
        });
    }

    /// Returns the number of failed plugins
    pub fn run_post_crawling(&self, session: &CrawlSession, status: CrawlStatus) -> usize {
        self.dispatch(Hook::PostCrawling, |p| p.post_crawling(session, status))
    }
}

fn panic_message(panic: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}
