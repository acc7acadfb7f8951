//! Output module for generating crawl summaries and reports
//!
//! This module handles:
//! - Snapshotting a finished session into a [`CrawlSummary`]
//! - Generating markdown summaries of crawl results
//! - Printing crawl statistics to the console

mod markdown;
pub mod stats;
mod summary;

pub use markdown::{format_markdown_summary, generate_markdown_summary};
pub use stats::{load_statistics, print_statistics, CrawlStatistics};
pub use summary::{
    CrawlSummary, EdgeSummary, OutputError, OutputResult, StateSummary, ViolationSummary,
};

use crate::crawler::CrawlOutcome;
use std::path::Path;

/// Writes the markdown summary of a finished crawl
///
/// # Arguments
///
/// * `outcome` - The finished crawl
/// * `path` - Where the markdown file goes; parent directories are created
///
/// # Returns
///
/// * `Ok(CrawlSummary)` - The summary that was written
/// * `Err(OutputError)` - Failed to write the file
pub fn write_summary(outcome: &CrawlOutcome, path: &Path) -> OutputResult<CrawlSummary> {
    let summary = CrawlSummary::from_outcome(outcome);
    generate_markdown_summary(&summary, path)?;
    Ok(summary)
}
