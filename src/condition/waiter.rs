//! Wait conditions
//!
//! Pages that build their content asynchronously need a moment before their
//! DOM is worth looking at. A [`WaitCondition`] names, for URLs matching a
//! pattern, what the page must show before the crawler proceeds. Timing out is
//! not an error: the crawler logs it and carries on with whatever is there.

use crate::browser::EmbeddedBrowser;
use crate::dom::{locate, parse_dom};
use crate::state::Identification;
use crate::url::matches_url_pattern;
use serde::{Deserialize, Serialize};
use std::time::{Duration, Instant};
use tracing::{debug, warn};

/// One readiness predicate
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum ExpectedCondition {
    ElementPresent { identification: Identification },
    ElementVisible { identification: Identification },
    ElementAbsent { identification: Identification },
}

impl ExpectedCondition {
    fn is_satisfied(&self, browser: &dyn EmbeddedBrowser) -> bool {
        match self {
            Self::ElementVisible { identification } => {
                browser.is_visible(identification).unwrap_or(false)
            }
            Self::ElementPresent { identification } => {
                count_matches(browser, identification).is_some_and(|n| n > 0)
            }
            Self::ElementAbsent { identification } => {
                count_matches(browser, identification) == Some(0)
            }
        }
    }
}

fn count_matches(browser: &dyn EmbeddedBrowser, identification: &Identification) -> Option<usize> {
    let dom = browser.dom().ok()?;
    let doc = parse_dom(&dom);
    locate(&doc, identification).ok().map(|found| found.len())
}

/// Readiness predicates for the pages whose URL matches `url`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WaitCondition {
    /// URL pattern (substring, or wildcard with `*`)
    pub url: String,

    /// Maximum time to wait, in milliseconds
    #[serde(default = "default_wait_timeout")]
    pub timeout: u64,

    pub expected: Vec<ExpectedCondition>,
}

fn default_wait_timeout() -> u64 {
    5_000
}

impl WaitCondition {
    pub fn new(url: impl Into<String>, timeout: Duration, expected: Vec<ExpectedCondition>) -> Self {
        Self {
            url: url.into(),
            timeout: timeout.as_millis() as u64,
            expected,
        }
    }
}

/// Blocks until the page in the browser is ready to be looked at
pub trait WaitConditionChecker: Send + Sync {
    fn wait(&self, browser: &mut dyn EmbeddedBrowser);
}

/// Polls the configured wait conditions
#[derive(Debug, Clone)]
pub struct PollingWaitChecker {
    conditions: Vec<WaitCondition>,
    poll_interval: Duration,
}

impl PollingWaitChecker {
    pub fn new(conditions: Vec<WaitCondition>) -> Self {
        Self {
            conditions,
            poll_interval: Duration::from_millis(100),
        }
    }

    pub fn with_poll_interval(mut self, poll_interval: Duration) -> Self {
        self.poll_interval = poll_interval;
        self
    }

    /// Waits for one condition; returns false on timeout
    fn wait_for(&self, condition: &WaitCondition, browser: &dyn EmbeddedBrowser) -> bool {
        let deadline = Instant::now() + Duration::from_millis(condition.timeout);
        loop {
            if condition.expected.iter().all(|e| e.is_satisfied(browser)) {
                return true;
            }
            let now = Instant::now();
            if now >= deadline {
                return false;
            }
            std::thread::sleep(self.poll_interval.min(deadline - now));
        }
    }
}

impl WaitConditionChecker for PollingWaitChecker {
    fn wait(&self, browser: &mut dyn EmbeddedBrowser) {
        if self.conditions.is_empty() {
            return;
        }

        let url = match browser.current_url() {
            Ok(url) => url,
            Err(e) => {
                warn!("Cannot read current URL for wait conditions: {}", e);
                return;
            }
        };

        for condition in self.conditions.iter().filter(|c| matches_url_pattern(&c.url, &url)) {
            let started = Instant::now();
            if self.wait_for(condition, browser) {
                debug!(
                    "Wait condition for {} satisfied after {:?}",
                    condition.url,
                    started.elapsed()
                );
            } else {
                warn!(
                    "Wait condition for {} timed out after {}ms on {}",
                    condition.url, condition.timeout, url
                );
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::{Eventable, How};
    use crate::BrowserError;
    use std::sync::atomic::{AtomicU32, Ordering};
    use url::Url;

    /// Serves an empty page until polled `ready_after` times
    struct SlowPage {
        polls: AtomicU32,
        ready_after: u32,
    }

    impl EmbeddedBrowser for SlowPage {
        fn go_to_url(&mut self, _url: &Url) -> Result<(), BrowserError> {
            Ok(())
        }
        fn current_url(&self) -> Result<String, BrowserError> {
            Ok("http://app.test/list".to_string())
        }
        fn dom(&self) -> Result<String, BrowserError> {
            let polls = self.polls.fetch_add(1, Ordering::SeqCst) + 1;
            if polls > self.ready_after {
                Ok("<html><body><ul id='items'></ul></body></html>".to_string())
            } else {
                Ok("<html><body></body></html>".to_string())
            }
        }
        fn is_visible(&self, _id: &Identification) -> Result<bool, BrowserError> {
            Ok(false)
        }
        fn close_other_windows(&mut self) -> Result<(), BrowserError> {
            Ok(())
        }
        fn fire_event_and_wait(&mut self, _e: &Eventable) -> Result<bool, BrowserError> {
            Ok(true)
        }
        fn go_back(&mut self) -> Result<(), BrowserError> {
            Ok(())
        }
        fn close(&mut self) -> Result<(), BrowserError> {
            Ok(())
        }
    }

    fn items_present(url: &str, timeout_ms: u64) -> PollingWaitChecker {
        PollingWaitChecker::new(vec![WaitCondition::new(
            url,
            Duration::from_millis(timeout_ms),
            vec![ExpectedCondition::ElementPresent {
                identification: Identification::new(How::Id, "items"),
            }],
        )])
        .with_poll_interval(Duration::from_millis(1))
    }

    #[test]
    fn test_waits_until_element_present() {
        let mut page = SlowPage {
            polls: AtomicU32::new(0),
            ready_after: 3,
        };
        items_present("/list", 1_000).wait(&mut page);
        assert_eq!(page.polls.load(Ordering::SeqCst), 4);
    }

    #[test]
    fn test_timeout_does_not_fail() {
        let mut page = SlowPage {
            polls: AtomicU32::new(0),
            ready_after: u32::MAX,
        };
        let started = Instant::now();
        items_present("/list", 20).wait(&mut page);
        assert!(started.elapsed() >= Duration::from_millis(20));
    }

    #[test]
    fn test_other_urls_are_not_checked() {
        let mut page = SlowPage {
            polls: AtomicU32::new(0),
            ready_after: u32::MAX,
        };
        items_present("/detail", 1_000).wait(&mut page);
        assert_eq!(page.polls.load(Ordering::SeqCst), 0);
    }
}
