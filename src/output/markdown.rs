//! Markdown summary generation
//!
//! This module generates a human-readable markdown report of a finished
//! crawl: run information, the states and edges of the state-flow graph,
//! invariant violations and crawler metrics.

use crate::output::summary::{CrawlSummary, OutputResult};
use std::fs::File;
use std::io::Write;
use std::path::Path;

/// Edges listed in the report; the rest is only counted
const MAX_LISTED_EDGES: usize = 200;

/// Generates a markdown summary and writes it to `output_path`
///
/// # Arguments
///
/// * `summary` - The crawl summary data
/// * `output_path` - Path where the markdown file should be written
///
/// # Returns
///
/// * `Ok(())` - Successfully wrote markdown summary
/// * `Err(OutputError)` - Failed to write summary
pub fn generate_markdown_summary(summary: &CrawlSummary, output_path: &Path) -> OutputResult<()> {
    let markdown = format_markdown_summary(summary);

    if let Some(parent) = output_path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)?;
    }
    let mut file = File::create(output_path)?;
    file.write_all(markdown.as_bytes())?;

    Ok(())
}

/// Formats a crawl summary as markdown
pub fn format_markdown_summary(summary: &CrawlSummary) -> String {
    let mut md = String::new();

    md.push_str("# Sumi-Flow Crawl Summary\n\n");

    // Run metadata
    md.push_str("## Run Information\n\n");
    md.push_str(&format!("- **Landing URL**: {}\n", summary.landing_url));
    md.push_str(&format!("- **Started**: {}\n", summary.started_at));
    if let Some(finished) = &summary.finished_at {
        md.push_str(&format!("- **Finished**: {}\n", finished));
    }
    if let Some(duration) = summary.duration_seconds {
        md.push_str(&format!(
            "- **Duration**: {} seconds ({:.2} minutes)\n",
            duration,
            duration as f64 / 60.0
        ));
    }
    md.push_str(&format!("- **Status**: {}\n", summary.status));
    md.push_str(&format!("- **Config Hash**: {}\n\n", summary.config_hash));

    // Overall statistics
    let metrics = &summary.metrics;
    md.push_str("## Overall Statistics\n\n");
    md.push_str(&format!("- **States**: {}\n", summary.states.len()));
    md.push_str(&format!("- **Edges**: {}\n", summary.edges.len()));
    md.push_str(&format!("- **Maximum Depth**: {}\n", summary.max_depth()));
    md.push_str(&format!(
        "- **Events Fired**: {} ({} failed)\n",
        metrics.fires_attempted, metrics.fires_failed
    ));
    md.push_str(&format!(
        "- **Fire Success Rate**: {:.2}%\n",
        summary.fire_success_rate()
    ));
    md.push_str(&format!(
        "- **Invariant Violations**: {}\n",
        summary.violations.len()
    ));
    md.push_str(&format!(
        "- **Plugin Failures**: {}\n",
        metrics.plugin_failures
    ));
    md.push_str(&format!(
        "- **Browser Restarts**: {}\n\n",
        metrics.browser_restarts
    ));

    // Timings
    md.push_str("## Time Spent\n\n");
    md.push_str("| Activity | Seconds |\n");
    md.push_str("|----------|---------|\n");
    md.push_str(&format!(
        "| Firing events | {:.2} |\n",
        metrics.fire_time.as_secs_f64()
    ));
    md.push_str(&format!(
        "| Waiting for pages | {:.2} |\n",
        metrics.wait_time.as_secs_f64()
    ));
    md.push_str(&format!(
        "| Extracting candidates | {:.2} |\n\n",
        metrics.extract_time.as_secs_f64()
    ));

    // States
    if !summary.states.is_empty() {
        md.push_str("## States\n\n");
        md.push_str("| Id | Name | Depth | Out | In | URL |\n");
        md.push_str("|----|------|-------|-----|----|-----|\n");
        for state in &summary.states {
            let depth = state
                .depth
                .map(|d| d.to_string())
                .unwrap_or_else(|| "-".to_string());
            md.push_str(&format!(
                "| {} | {} | {} | {} | {} | {} |\n",
                state.id, state.name, depth, state.outgoing, state.incoming, state.url
            ));
        }
        md.push('\n');
    }

    // Edges
    if !summary.edges.is_empty() {
        md.push_str("## Edges\n\n");
        md.push_str("| From | To | Event |\n");
        md.push_str("|------|----|-------|\n");
        for edge in summary.edges.iter().take(MAX_LISTED_EDGES) {
            md.push_str(&format!(
                "| {} | {} | {} |\n",
                edge.source,
                edge.target,
                escape_cell(&edge.event)
            ));
        }
        if summary.edges.len() > MAX_LISTED_EDGES {
            md.push_str(&format!(
                "\n... and {} more\n",
                summary.edges.len() - MAX_LISTED_EDGES
            ));
        }
        md.push('\n');
    }

    // Violations
    if !summary.violations.is_empty() {
        md.push_str("## Invariant Violations\n\n");
        md.push_str("| Invariant | State | URL | Detected |\n");
        md.push_str("|-----------|-------|-----|----------|\n");
        for violation in &summary.violations {
            md.push_str(&format!(
                "| {} | {} | {} | {} |\n",
                escape_cell(&violation.invariant),
                violation.state,
                violation.url,
                violation.detected_at
            ));
        }
        md.push('\n');
    }

    md
}

fn escape_cell(text: &str) -> String {
    text.replace('|', "\\|")
}
