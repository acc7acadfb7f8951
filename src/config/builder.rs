//! The runtime crawl configuration and its builder

use crate::condition::{CrawlCondition, Invariant, WaitCondition};
use crate::config::parser::hash_content;
use crate::config::types::{
    BrowserConfig, ConfigFile, CrawlRules, CrawlerConfig, ElementRule, FormBinding, OutputConfig,
    StripperConfig,
};
use crate::config::validation::validate;
use crate::dom::{DomStripper, DomStrippers};
use crate::plugin::{Plugin, Plugins};
use crate::url::normalize_landing_url;
use crate::{ConfigError, ConfigResult};
use std::sync::Arc;
use std::time::Duration;
use url::Url;

/// Immutable configuration of one run, shared by every crawler
#[derive(Debug, Clone)]
pub struct CrawlConfig {
    landing_url: Url,
    pub crawler: CrawlerConfig,
    pub browser: BrowserConfig,
    pub rules: CrawlRules,
    pub output: OutputConfig,
    strippers: DomStrippers,
    plugins: Plugins,
    config_hash: String,
    max_runtime: Option<Duration>,
}

impl CrawlConfig {
    pub fn landing_url(&self) -> &Url {
        &self.landing_url
    }

    pub fn strippers(&self) -> &DomStrippers {
        &self.strippers
    }

    pub fn plugins(&self) -> &Plugins {
        &self.plugins
    }

    /// SHA-256 of the configuration this run was built from
    pub fn config_hash(&self) -> &str {
        &self.config_hash
    }

    /// `None` when the depth is unlimited
    pub fn max_depth(&self) -> Option<usize> {
        non_zero(self.crawler.max_depth as usize)
    }

    /// `None` when the number of states is unlimited
    pub fn max_states(&self) -> Option<usize> {
        non_zero(self.crawler.max_states as usize)
    }

    /// `None` when the runtime is unlimited
    pub fn max_runtime(&self) -> Option<Duration> {
        self.max_runtime
    }

    pub fn max_crawlers(&self) -> usize {
        self.crawler.max_crawlers.max(1) as usize
    }

    pub fn wait_after_event(&self) -> Duration {
        Duration::from_millis(self.crawler.wait_after_event)
    }

    pub fn wait_after_reload(&self) -> Duration {
        Duration::from_millis(self.crawler.wait_after_reload)
    }

    pub fn retry_backoff(&self) -> Duration {
        Duration::from_millis(self.crawler.retry_backoff)
    }
}

fn non_zero(value: usize) -> Option<usize> {
    (value > 0).then_some(value)
}

/// Builds a [`CrawlConfig`]
///
/// Starts either from defaults for a landing URL or from a loaded
/// [`ConfigFile`]. Plugins and custom strippers can only be registered here.
///
/// # Example
///
/// ```
/// use sumi_flow::config::{CrawlConfigBuilder, ElementRule};
///
/// let config = CrawlConfigBuilder::new("http://localhost:8080/")
///     .set_max_depth(3)
///     .set_max_crawlers(2)
///     .exclude(ElementRule::new("a").with_text("Logout"))
///     .build()
///     .unwrap();
/// assert_eq!(config.max_depth(), Some(3));
/// ```
pub struct CrawlConfigBuilder {
    file: ConfigFile,
    custom_strippers: Vec<Arc<dyn DomStripper>>,
    plugins: Plugins,
    config_hash: Option<String>,
    max_runtime: Option<Duration>,
}

impl CrawlConfigBuilder {
    pub fn new(url: impl Into<String>) -> Self {
        Self::from_file(ConfigFile {
            crawler: CrawlerConfig::with_url(url),
            browser: BrowserConfig::default(),
            strippers: Vec::new(),
            rules: CrawlRules::default(),
            output: OutputConfig::default(),
        })
    }

    pub fn from_file(file: ConfigFile) -> Self {
        Self {
            file,
            custom_strippers: Vec::new(),
            plugins: Plugins::new(),
            config_hash: None,
            max_runtime: None,
        }
    }

    /// Records the hash of the file the configuration was loaded from
    pub fn config_hash(mut self, hash: impl Into<String>) -> Self {
        self.config_hash = Some(hash.into());
        self
    }

    pub fn set_max_depth(mut self, depth: u32) -> Self {
        self.file.crawler.max_depth = depth;
        self
    }

    pub fn set_max_states(mut self, states: u32) -> Self {
        self.file.crawler.max_states = states;
        self
    }

    /// Limits the runtime; `Duration::ZERO` means unlimited
    ///
    /// The exact duration is kept. The file record gets it rounded up to whole
    /// seconds, so a sub-second limit never reads as unlimited.
    pub fn set_max_runtime(mut self, runtime: Duration) -> Self {
        let secs = runtime.as_secs() + u64::from(runtime.subsec_nanos() > 0);
        self.file.crawler.max_runtime = secs;
        self.max_runtime = Some(runtime);
        self
    }

    pub fn set_max_crawlers(mut self, crawlers: u32) -> Self {
        self.file.crawler.max_crawlers = crawlers;
        self
    }

    pub fn click_once(mut self, enabled: bool) -> Self {
        self.file.crawler.click_once = enabled;
        self
    }

    pub fn crawl_frames(mut self, enabled: bool) -> Self {
        self.file.crawler.crawl_frames = enabled;
        self
    }

    pub fn ignore_frame(mut self, frame: impl Into<String>) -> Self {
        self.file.crawler.ignore_frames.push(frame.into());
        self
    }

    pub fn wait_after_event(mut self, wait: Duration) -> Self {
        self.file.crawler.wait_after_event = wait.as_millis() as u64;
        self
    }

    pub fn wait_after_reload(mut self, wait: Duration) -> Self {
        self.file.crawler.wait_after_reload = wait.as_millis() as u64;
        self
    }

    pub fn page_load_retries(mut self, retries: u32, backoff: Duration) -> Self {
        self.file.crawler.page_load_retries = retries;
        self.file.crawler.retry_backoff = backoff.as_millis() as u64;
        self
    }

    pub fn browser_restarts(mut self, restarts: u32) -> Self {
        self.file.crawler.browser_restarts = restarts;
        self
    }

    pub fn follow_external_links(mut self, enabled: bool) -> Self {
        self.file.crawler.follow_external_links = enabled;
        self
    }

    pub fn allow_host(mut self, pattern: impl Into<String>) -> Self {
        self.file.crawler.allowed_hosts.push(pattern.into());
        self
    }

    pub fn browser(mut self, browser: BrowserConfig) -> Self {
        self.file.browser = browser;
        self
    }

    pub fn add_stripper(mut self, stripper: StripperConfig) -> Self {
        self.file.strippers.push(stripper);
        self
    }

    /// Appends a stripper that has no configuration-file form; it runs after
    /// the configured ones
    pub fn add_custom_stripper(mut self, stripper: Arc<dyn DomStripper>) -> Self {
        self.custom_strippers.push(stripper);
        self
    }

    /// Replaces the include rules
    pub fn include_only(mut self, rules: Vec<ElementRule>) -> Self {
        self.file.rules.include = rules;
        self
    }

    pub fn include(mut self, rule: ElementRule) -> Self {
        self.file.rules.include.push(rule);
        self
    }

    pub fn exclude(mut self, rule: ElementRule) -> Self {
        self.file.rules.exclude.push(rule);
        self
    }

    pub fn add_crawl_condition(mut self, condition: CrawlCondition) -> Self {
        self.file.rules.crawl_conditions.push(condition);
        self
    }

    pub fn add_invariant(mut self, invariant: Invariant) -> Self {
        self.file.rules.invariants.push(invariant);
        self
    }

    pub fn add_wait_condition(mut self, condition: WaitCondition) -> Self {
        self.file.rules.wait_conditions.push(condition);
        self
    }

    pub fn add_form(mut self, form: FormBinding) -> Self {
        self.file.rules.forms.push(form);
        self
    }

    pub fn summary_path(mut self, path: impl Into<String>) -> Self {
        self.file.output.summary_path = Some(path.into());
        self
    }

    pub fn add_plugin(mut self, plugin: Arc<dyn Plugin>) -> Self {
        self.plugins.register(plugin);
        self
    }

    /// Validates the settings and freezes them
    pub fn build(self) -> ConfigResult<CrawlConfig> {
        validate(&self.file)?;

        let landing_url = normalize_landing_url(&self.file.crawler.url)
            .map_err(|e| ConfigError::InvalidUrl(e.to_string()))?;

        let mut strippers = DomStrippers::default();
        for stripper in &self.file.strippers {
            strippers.push(stripper.into_stripper()?);
        }
        for stripper in self.custom_strippers {
            strippers.push(stripper);
        }

        let config_hash = match self.config_hash {
            Some(hash) => hash,
            None => {
                let text = toml::to_string(&self.file)
                    .unwrap_or_else(|_| format!("{:?}", self.file));
                hash_content(&text)
            }
        };

        let max_runtime = self
            .max_runtime
            .unwrap_or_else(|| Duration::from_secs(self.file.crawler.max_runtime));

        Ok(CrawlConfig {
            landing_url,
            crawler: self.file.crawler,
            browser: self.file.browser,
            rules: self.file.rules,
            output: self.file.output,
            strippers,
            plugins: self.plugins,
            config_hash,
            max_runtime: (!max_runtime.is_zero()).then_some(max_runtime),
        })
    }
}
