use crate::condition::{Condition, CrawlCondition, Invariant, WaitCondition};
use crate::dom::{
    AttributeStripper, CommentStripper, DomStripper, RegexStripper, TagStripper,
    WhitespaceStripper,
};
use crate::state::{EventType, FormInput, Identification};
use crate::ConfigError;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;

/// Configuration file of a crawl, as written in TOML
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConfigFile {
    pub crawler: CrawlerConfig,

    #[serde(default)]
    pub browser: BrowserConfig,

    /// Stripper pipeline, applied in order
    #[serde(default)]
    pub strippers: Vec<StripperConfig>,

    #[serde(default)]
    pub rules: CrawlRules,

    #[serde(default)]
    pub output: OutputConfig,
}

/// Crawler behavior configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CrawlerConfig {
    /// Landing URL of the application
    pub url: String,

    /// Maximum shortest-path distance from the index at which states are
    /// still explored (0 = unlimited)
    #[serde(rename = "max-depth", default = "default_max_depth")]
    pub max_depth: u32,

    /// Maximum number of states (0 = unlimited)
    #[serde(rename = "max-states", default)]
    pub max_states: u32,

    /// Maximum runtime in seconds (0 = unlimited)
    #[serde(rename = "max-runtime", default = "default_max_runtime")]
    pub max_runtime: u64,

    /// Number of crawlers exploring in parallel, one browser each
    #[serde(rename = "max-crawlers", default = "default_max_crawlers")]
    pub max_crawlers: u32,

    /// Offer every element at most once across all states
    #[serde(rename = "click-once", default = "default_true")]
    pub click_once: bool,

    /// Extract candidates inside iframes
    #[serde(rename = "crawl-frames", default = "default_true")]
    pub crawl_frames: bool,

    /// Frames (by name or id) that are never entered
    #[serde(rename = "ignore-frames", default)]
    pub ignore_frames: Vec<String>,

    /// Pause after firing an event (milliseconds)
    #[serde(rename = "wait-after-event", default = "default_wait")]
    pub wait_after_event: u64,

    /// Pause after loading the landing URL (milliseconds)
    #[serde(rename = "wait-after-reload", default = "default_wait")]
    pub wait_after_reload: u64,

    /// Attempts to reload the landing URL before the browser is given up
    #[serde(rename = "page-load-retries", default = "default_page_load_retries")]
    pub page_load_retries: u32,

    /// Initial delay between page load attempts (milliseconds), doubled per attempt
    #[serde(rename = "retry-backoff", default = "default_retry_backoff")]
    pub retry_backoff: u64,

    /// Replacement crawlers the supervisor may start after browser failures
    #[serde(rename = "browser-restarts", default)]
    pub browser_restarts: u32,

    /// Keep exploring when an event navigates to another host
    #[serde(rename = "follow-external-links", default)]
    pub follow_external_links: bool,

    /// Additional hosts that belong to the application (`*.` wildcards allowed)
    #[serde(rename = "allowed-hosts", default)]
    pub allowed_hosts: Vec<String>,
}

fn default_max_depth() -> u32 {
    2
}

fn default_max_runtime() -> u64 {
    3600
}

fn default_max_crawlers() -> u32 {
    1
}

fn default_true() -> bool {
    true
}

fn default_wait() -> u64 {
    500
}

fn default_page_load_retries() -> u32 {
    3
}

fn default_retry_backoff() -> u64 {
    1000
}

impl CrawlerConfig {
    /// Default crawler settings for the given landing URL
    pub fn with_url(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            max_depth: default_max_depth(),
            max_states: 0,
            max_runtime: default_max_runtime(),
            max_crawlers: default_max_crawlers(),
            click_once: true,
            crawl_frames: true,
            ignore_frames: Vec::new(),
            wait_after_event: default_wait(),
            wait_after_reload: default_wait(),
            page_load_retries: default_page_load_retries(),
            retry_backoff: default_retry_backoff(),
            browser_restarts: 0,
            follow_external_links: false,
            allowed_hosts: Vec::new(),
        }
    }
}

/// Browser launch configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BrowserConfig {
    #[serde(default = "default_true")]
    pub headless: bool,

    #[serde(rename = "window-width", default = "default_window_width")]
    pub window_width: u32,

    #[serde(rename = "window-height", default = "default_window_height")]
    pub window_height: u32,

    /// Page load timeout (milliseconds)
    #[serde(rename = "page-load-timeout", default = "default_page_load_timeout")]
    pub page_load_timeout: u64,

    /// Extra command-line arguments for the browser
    #[serde(default)]
    pub args: Vec<String>,
}

fn default_window_width() -> u32 {
    1280
}

fn default_window_height() -> u32 {
    800
}

fn default_page_load_timeout() -> u64 {
    30_000
}

impl Default for BrowserConfig {
    fn default() -> Self {
        Self {
            headless: true,
            window_width: default_window_width(),
            window_height: default_window_height(),
            page_load_timeout: default_page_load_timeout(),
            args: Vec::new(),
        }
    }
}

/// One stage of the stripper pipeline
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum StripperConfig {
    Whitespace,
    Comments,
    Attribute {
        names: Vec<String>,
    },
    Regex {
        pattern: String,
        #[serde(default)]
        replacement: String,
    },
    Tag {
        name: String,
    },
}

impl StripperConfig {
    /// Builds the stripper this entry describes
    pub fn into_stripper(&self) -> Result<Arc<dyn DomStripper>, ConfigError> {
        let invalid = |e: regex::Error| ConfigError::InvalidPattern(e.to_string());
        Ok(match self {
            Self::Whitespace => Arc::new(WhitespaceStripper),
            Self::Comments => Arc::new(CommentStripper::new()),
            Self::Attribute { names } => {
                Arc::new(AttributeStripper::new(names.clone()).map_err(invalid)?)
            }
            Self::Regex {
                pattern,
                replacement,
            } => Arc::new(RegexStripper::new(pattern, replacement.clone()).map_err(invalid)?),
            Self::Tag { name } => Arc::new(TagStripper::new(name.clone()).map_err(invalid)?),
        })
    }
}

/// Selects elements of the current page
///
/// An element matches when its tag matches and every qualifier that is set
/// holds. The rule only applies on pages where all its `conditions` hold.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ElementRule {
    /// Tag name, case-insensitive; `*` matches every tag
    pub tag: String,

    /// Exact (whitespace-collapsed) text of the element
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,

    /// Attribute values the element must carry; a value of `*` only requires
    /// the attribute to be present
    #[serde(default)]
    pub attributes: BTreeMap<String, String>,

    /// The element must be selected by this XPath
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub xpath: Option<String>,

    /// The element must lie inside an element selected by this XPath
    #[serde(rename = "under-xpath", default, skip_serializing_if = "Option::is_none")]
    pub under_xpath: Option<String>,

    /// Preconditions on the page for this rule to apply
    #[serde(default)]
    pub conditions: Vec<Condition>,

    /// Event fired on elements this rule includes
    #[serde(rename = "event-type", default)]
    pub event_type: EventType,
}

impl ElementRule {
    pub fn new(tag: impl Into<String>) -> Self {
        Self {
            tag: tag.into(),
            text: None,
            attributes: BTreeMap::new(),
            xpath: None,
            under_xpath: None,
            conditions: Vec::new(),
            event_type: EventType::Click,
        }
    }

    pub fn with_text(mut self, text: impl Into<String>) -> Self {
        self.text = Some(text.into());
        self
    }

    pub fn with_attribute(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.attributes.insert(name.into(), value.into());
        self
    }

    pub fn with_xpath(mut self, xpath: impl Into<String>) -> Self {
        self.xpath = Some(xpath.into());
        self
    }

    pub fn under_xpath(mut self, xpath: impl Into<String>) -> Self {
        self.under_xpath = Some(xpath.into());
        self
    }

    pub fn with_condition(mut self, condition: Condition) -> Self {
        self.conditions.push(condition);
        self
    }

    pub fn with_event_type(mut self, event_type: EventType) -> Self {
        self.event_type = event_type;
        self
    }
}

/// Values to enter before the trigger element is fired
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FormBinding {
    pub trigger: Identification,
    pub inputs: Vec<FormInput>,
}

/// What is explored and what is checked
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CrawlRules {
    #[serde(default = "default_include")]
    pub include: Vec<ElementRule>,

    #[serde(default)]
    pub exclude: Vec<ElementRule>,

    #[serde(rename = "crawl-conditions", default)]
    pub crawl_conditions: Vec<CrawlCondition>,

    #[serde(default)]
    pub invariants: Vec<Invariant>,

    #[serde(rename = "wait-conditions", default)]
    pub wait_conditions: Vec<WaitCondition>,

    #[serde(default)]
    pub forms: Vec<FormBinding>,
}

fn default_include() -> Vec<ElementRule> {
    vec![ElementRule::new("a"), ElementRule::new("button")]
}

impl Default for CrawlRules {
    fn default() -> Self {
        Self {
            include: default_include(),
            exclude: Vec::new(),
            crawl_conditions: Vec::new(),
            invariants: Vec::new(),
            wait_conditions: Vec::new(),
            forms: Vec::new(),
        }
    }
}

/// Output configuration
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct OutputConfig {
    /// Path to the markdown summary file
    #[serde(rename = "summary-path", default, skip_serializing_if = "Option::is_none")]
    pub summary_path: Option<String>,
}
