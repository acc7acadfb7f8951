//! Configuration module for Sumi-Flow
//!
//! This module handles loading, parsing, and validating TOML configuration
//! files, and turns them (or programmatic settings) into the immutable
//! [`CrawlConfig`] every crawler of a run shares.
//!
//! # Example
//!
//! ```no_run
//! use sumi_flow::config::{load_config_with_hash, CrawlConfigBuilder};
//! use std::path::Path;
//!
//! let (file, hash) = load_config_with_hash(Path::new("crawl.toml")).unwrap();
//! let config = CrawlConfigBuilder::from_file(file).config_hash(hash).build().unwrap();
//! println!("Crawling {} with max depth {:?}", config.landing_url(), config.max_depth());
//! ```

mod builder;
mod parser;
mod types;
mod validation;

// Re-export types
pub use builder::{CrawlConfig, CrawlConfigBuilder};
pub use types::{
    BrowserConfig, ConfigFile, CrawlRules, CrawlerConfig, ElementRule, FormBinding, OutputConfig,
    StripperConfig,
};

// Re-export parser functions
pub use parser::{compute_config_hash, load_config, load_config_with_hash, parse_config};
