//! Crawler module: exploration of a running application
//!
//! This module contains the core crawling logic, including:
//! - Candidate extraction from the current DOM
//! - The per-crawler state machine that fires events and classifies pages
//! - The shared pool of unfired candidates and the exit notifier
//! - Supervision of concurrent crawlers

mod candidate;
mod context;
mod controller;
mod engine;
mod exit;
mod extractor;
mod metrics;
mod phase;
mod session;
mod unfired;

pub use candidate::{CandidateElement, CandidateKey};
pub use context::CrawlerContext;
pub use controller::{run_crawl, CrawlController};
pub use engine::{Crawler, ExecuteOutcome};
pub use exit::{ExitNotifier, ExitPhase, ExitReason};
pub use extractor::{CandidateElementExtractor, CandidateExtractor, CheckedElements};
pub use metrics::{CrawlMetrics, MetricsSnapshot};
pub use phase::CrawlPhase;
pub use session::{CrawlOutcome, CrawlSession, CrawlStatus, InvariantViolation};
pub use unfired::{QueueState, TaskGuard, UnfiredCandidateStore};
