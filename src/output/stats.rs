//! Console statistics of a crawl
//!
//! This module condenses a [`CrawlSummary`] into the few numbers worth
//! printing at the end of a CLI run.

use crate::output::summary::CrawlSummary;
use std::collections::BTreeMap;

/// Crawl statistics summary
#[derive(Debug, Clone, PartialEq)]
pub struct CrawlStatistics {
    pub status: String,

    /// Number of states in the graph
    pub total_states: usize,

    /// Number of edges in the graph
    pub total_edges: usize,

    /// Count of states per distance from the index state
    pub states_by_depth: BTreeMap<usize, usize>,

    /// States the index cannot reach (should stay zero)
    pub unreachable_states: usize,

    /// States without any outgoing edge
    pub leaf_states: usize,

    pub events_fired: u64,
    pub events_failed: u64,
    pub invariant_violations: usize,
    pub plugin_failures: u64,
}

/// Computes statistics from a summary
pub fn load_statistics(summary: &CrawlSummary) -> CrawlStatistics {
    let mut states_by_depth = BTreeMap::new();
    let mut unreachable_states = 0;
    for state in &summary.states {
        match state.depth {
            Some(depth) => *states_by_depth.entry(depth).or_insert(0) += 1,
            None => unreachable_states += 1,
        }
    }

    CrawlStatistics {
        status: summary.status.clone(),
        total_states: summary.states.len(),
        total_edges: summary.edges.len(),
        states_by_depth,
        unreachable_states,
        leaf_states: summary.states.iter().filter(|s| s.outgoing == 0).count(),
        events_fired: summary.metrics.fires_attempted,
        events_failed: summary.metrics.fires_failed,
        invariant_violations: summary.violations.len(),
        plugin_failures: summary.metrics.plugin_failures,
    }
}

/// Prints statistics to stdout in a formatted manner
///
/// # Arguments
///
/// * `stats` - The statistics to display
pub fn print_statistics(stats: &CrawlStatistics) {
    println!("=== Crawl Statistics ===\n");

    println!("Overview:");
    println!("  Status: {}", stats.status);
    println!("  States discovered: {}", stats.total_states);
    println!("  Edges recorded: {}", stats.total_edges);
    println!("  Leaf states: {}", stats.leaf_states);
    println!();

    println!("States by Depth:");
    for (depth, count) in &stats.states_by_depth {
        let percentage = if stats.total_states > 0 {
            (*count as f64 / stats.total_states as f64) * 100.0
        } else {
            0.0
        };
        println!("  {}: {} ({:.1}%)", depth, count, percentage);
    }
    if stats.unreachable_states > 0 {
        println!("  unreachable: {}", stats.unreachable_states);
    }
    println!();

    if stats.invariant_violations > 0 {
        println!("Invariant Violations: {}", stats.invariant_violations);
        println!();
    }

    if stats.plugin_failures > 0 {
        println!("Plugin Failures: {}", stats.plugin_failures);
        println!();
    }

    let succeeded = stats.events_fired.saturating_sub(stats.events_failed);
    let success_rate = if stats.events_fired > 0 {
        (succeeded as f64 / stats.events_fired as f64) * 100.0
    } else {
        0.0
    };

    println!(
        "Fire Success Rate: {:.1}% ({} / {} events fired)",
        success_rate, succeeded, stats.events_fired
    );
}
