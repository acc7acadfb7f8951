//! Sumi-Flow: a model-based crawler for dynamic web applications
//!
//! This crate drives a real browser from a landing URL and incrementally builds a
//! state-flow graph: vertices are observable DOM states, edges are the user
//! interactions (clicks, hovers, form submissions) that move between them.
//! Several crawlers can explore cooperatively, sharing one graph and one pool of
//! unfired candidate actions.

pub mod browser;
pub mod condition;
pub mod config;
pub mod crawler;
pub mod dom;
pub mod output;
pub mod plugin;
pub mod state;
pub mod url;

use thiserror::Error;

/// Main error type for Sumi-Flow operations
#[derive(Debug, Error)]
pub enum FlowError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Browser error: {0}")]
    Browser(#[from] BrowserError),

    #[error("URL error: {0}")]
    UrlError(#[from] UrlError),

    #[error("URL parse error: {0}")]
    UrlParse(#[from] ::url::ParseError),

    #[error("XPath error: {0}")]
    XPath(#[from] dom::XPathError),

    #[error("Condition error: {0}")]
    Condition(#[from] condition::ConditionError),

    #[error("Eventable endpoints are frozen: {0}")]
    EdgeFrozen(String),

    #[error("State {0} is not part of the state-flow graph")]
    UnknownState(state::StateId),

    #[error("State id {0} is already used by a different DOM")]
    DuplicateStateId(state::StateId),

    #[error("State limit of {0} reached")]
    StateLimitReached(usize),

    #[error("Crawl has no index state yet")]
    NoIndexState,

    #[error("Output error: {0}")]
    Output(#[from] output::OutputError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Configuration-specific errors
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to parse TOML: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Invalid URL in config: {0}")]
    InvalidUrl(String),

    #[error("Invalid pattern: {0}")]
    InvalidPattern(String),
}

/// Errors reported by an embedded browser
#[derive(Debug, Error)]
pub enum BrowserError {
    #[error("Browser launch failed: {0}")]
    LaunchFailed(String),

    #[error("Navigation to {url} failed: {message}")]
    NavigationFailed { url: String, message: String },

    #[error("Stale element: {0}")]
    StaleElement(String),

    #[error("Element not found: {0}")]
    ElementNotFound(String),

    #[error("Transient browser error: {0}")]
    Transient(String),

    #[error("Browser is no longer usable: {0}")]
    Unrecoverable(String),

    #[error("Operation not supported by this browser: {0}")]
    Unsupported(String),
}

impl BrowserError {
    /// Returns true if retrying the same operation may succeed
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            Self::NavigationFailed { .. }
                | Self::StaleElement(_)
                | Self::ElementNotFound(_)
                | Self::Transient(_)
        )
    }

    /// Wraps any displayable error as a transient browser error
    pub fn transient<E: std::fmt::Display>(err: E) -> Self {
        Self::Transient(err.to_string())
    }
}

/// URL-specific errors
#[derive(Debug, Error)]
pub enum UrlError {
    #[error("Failed to parse URL: {0}")]
    Parse(String),

    #[error("Invalid URL scheme: {0}")]
    InvalidScheme(String),

    #[error("Missing host in URL")]
    MissingHost,
}

/// Result type alias for Sumi-Flow operations
pub type Result<T> = std::result::Result<T, FlowError>;

/// Result type alias for configuration operations
pub type ConfigResult<T> = std::result::Result<T, ConfigError>;

/// Result type alias for URL operations
pub type UrlResult<T> = std::result::Result<T, UrlError>;

// Re-export commonly used types
pub use browser::{BrowserProvider, EmbeddedBrowser};
pub use config::{CrawlConfig, CrawlConfigBuilder};
pub use crawler::{run_crawl, CrawlController, CrawlOutcome, CrawlSession, CrawlStatus, Crawler};
pub use plugin::{Plugin, Plugins};
pub use state::{Eventable, Identification, StateFlowGraph, StateId, StateVertex};
