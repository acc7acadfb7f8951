//! Sumi-Flow main entry point
//!
//! This is the command-line interface for the Sumi-Flow application crawler.

use clap::Parser;
use std::path::PathBuf;
use sumi_flow::config::{load_config_with_hash, CrawlConfig, CrawlConfigBuilder};
use sumi_flow::{CrawlStatus, FlowError};
use tracing_subscriber::EnvFilter;

/// Sumi-Flow: a model-based crawler for dynamic web applications
///
/// Sumi-Flow drives a browser through a web application, firing clicks and
/// other events, and records the distinct DOM states it finds as a
/// state-flow graph.
#[derive(Parser, Debug)]
#[command(name = "sumi-flow")]
#[command(version = "1.0.0")]
#[command(about = "A model-based crawler for dynamic web applications", long_about = None)]
struct Cli {
    /// Path to TOML configuration file
    #[arg(value_name = "CONFIG")]
    config: PathBuf,

    /// Increase logging verbosity (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Suppress non-error output
    #[arg(short, long, conflicts_with = "verbose")]
    quiet: bool,

    /// Validate config and show what would be crawled without actually crawling
    #[arg(long)]
    dry_run: bool,

    /// Write the markdown summary here (overrides `summary-path`)
    #[arg(long, value_name = "PATH")]
    summary: Option<PathBuf>,
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    // Setup logging based on verbosity
    setup_logging(cli.verbose, cli.quiet);

    let code = match run(cli).await {
        Ok(code) => code,
        Err(e) => {
            tracing::error!("{:#}", e);
            match e.downcast_ref::<FlowError>() {
                Some(FlowError::Config(_)) => CrawlStatus::ConfigError.exit_code(),
                _ => 1,
            }
        }
    };
    std::process::exit(code);
}

async fn run(cli: Cli) -> anyhow::Result<i32> {
    // Load and validate configuration
    tracing::info!("Loading configuration from: {}", cli.config.display());
    let (file, hash) = load_config_with_hash(&cli.config).map_err(FlowError::from)?;
    tracing::info!("Configuration loaded successfully (hash: {})", hash);

    let mut builder = CrawlConfigBuilder::from_file(file).config_hash(hash);
    if let Some(summary) = &cli.summary {
        builder = builder.summary_path(summary.display().to_string());
    }
    let config = builder.build().map_err(FlowError::from)?;

    if cli.dry_run {
        handle_dry_run(&config);
        return Ok(0);
    }

    handle_crawl(config, cli.quiet).await
}

/// Sets up the logging/tracing subscriber based on verbosity level
fn setup_logging(verbose: u8, quiet: bool) {
    let filter = if quiet {
        // Only show errors
        EnvFilter::new("error")
    } else {
        match verbose {
            0 => EnvFilter::new("sumi_flow=info,warn"),
            1 => EnvFilter::new("sumi_flow=debug,info"),
            2 => EnvFilter::new("sumi_flow=trace,debug"),
            _ => EnvFilter::new("trace"),
        }
    };

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_thread_ids(false)
        .with_file(false)
        .init();
}

fn limit(value: Option<impl std::fmt::Display>) -> String {
    value.map_or_else(|| "unlimited".to_string(), |v| v.to_string())
}

/// Handles the --dry-run mode: shows the effective configuration
fn handle_dry_run(config: &CrawlConfig) {
    println!("=== Sumi-Flow Dry Run ===\n");

    println!("Crawler Configuration:");
    println!("  Landing URL: {}", config.landing_url());
    println!("  Max depth: {}", limit(config.max_depth()));
    println!("  Max states: {}", limit(config.max_states()));
    println!(
        "  Max runtime: {}",
        limit(config.max_runtime().map(|d| format!("{:.1}s", d.as_secs_f64())))
    );
    println!("  Crawlers: {}", config.max_crawlers());
    println!("  Click once: {}", config.crawler.click_once);
    println!("  Crawl frames: {}", config.crawler.crawl_frames);
    println!("  Browser restarts: {}", config.crawler.browser_restarts);

    println!("\nBrowser:");
    println!("  Headless: {}", config.browser.headless);
    println!(
        "  Window: {}x{}",
        config.browser.window_width, config.browser.window_height
    );

    println!("\nDOM Strippers ({}):", config.strippers().len());
    for name in config.strippers().names() {
        println!("  - {}", name);
    }

    let rules = &config.rules;
    println!("\nRules:");
    println!("  Include rules: {}", rules.include.len());
    for rule in &rules.include {
        println!("    * {} ({})", rule.tag, rule.event_type);
    }
    println!("  Exclude rules: {}", rules.exclude.len());
    println!("  Crawl conditions: {}", rules.crawl_conditions.len());
    println!("  Invariants: {}", rules.invariants.len());
    println!("  Wait conditions: {}", rules.wait_conditions.len());
    println!("  Form bindings: {}", rules.forms.len());

    println!("\nOutput:");
    println!(
        "  Summary: {}",
        config.output.summary_path.as_deref().unwrap_or("(none)")
    );

    println!("\n✓ Configuration is valid");
}

/// Handles the main crawl operation
#[cfg(feature = "chrome")]
async fn handle_crawl(config: CrawlConfig, quiet: bool) -> anyhow::Result<i32> {
    use std::sync::Arc;
    use sumi_flow::browser::ChromeProvider;
    use sumi_flow::crawler::ExitReason;
    use sumi_flow::output::{load_statistics, print_statistics, write_summary, CrawlSummary};
    use sumi_flow::CrawlController;

    let summary_path = config.output.summary_path.clone();
    let controller = CrawlController::new(config, Arc::new(ChromeProvider));

    let exit = controller.exit_notifier();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::warn!("Interrupted, stopping the crawl");
            exit.stop(ExitReason::Stopped);
        }
    });

    let outcome = controller.run().await;

    let summary = match summary_path {
        Some(path) => {
            let summary = write_summary(&outcome, std::path::Path::new(&path))?;
            tracing::info!("Summary written to {}", path);
            summary
        }
        None => CrawlSummary::from_outcome(&outcome),
    };
    if !quiet {
        print_statistics(&load_statistics(&summary));
    }

    Ok(outcome.status.exit_code())
}

#[cfg(not(feature = "chrome"))]
async fn handle_crawl(_config: CrawlConfig, _quiet: bool) -> anyhow::Result<i32> {
    anyhow::bail!("this build has no browser adapter; rebuild with `--features chrome`")
}
