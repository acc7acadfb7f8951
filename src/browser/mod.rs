//! Embedded browser contract
//!
//! The crawler drives a real browser through [`EmbeddedBrowser`]. One instance
//! belongs to exactly one crawler for that crawler's lifetime and is only ever
//! used from the crawler's thread. Browsers are created through a
//! [`BrowserProvider`] so the supervisor can replace a browser that died.

#[cfg(feature = "chrome")]
mod chrome;

#[cfg(feature = "chrome")]
pub use chrome::{ChromeBrowser, ChromeProvider};

use crate::config::BrowserConfig;
use crate::state::{Eventable, Identification};
use crate::BrowserError;
use url::Url;

/// Operations the crawler needs from a browser
pub trait EmbeddedBrowser: Send {
    /// Loads `url` and blocks until the page has loaded
    fn go_to_url(&mut self, url: &Url) -> Result<(), BrowserError>;

    fn current_url(&self) -> Result<String, BrowserError>;

    /// Serialized DOM of the top-level document
    fn dom(&self) -> Result<String, BrowserError>;

    /// Serialized DOM of a (possibly nested) frame, named by its
    /// `.`-separated frame path
    fn frame_dom(&self, frame: &str) -> Result<String, BrowserError> {
        Err(BrowserError::Unsupported(format!("frame '{}'", frame)))
    }

    /// Whether the identified element is present and displayed
    fn is_visible(&self, identification: &Identification) -> Result<bool, BrowserError>;

    /// Closes every window and tab except the crawler's main one
    fn close_other_windows(&mut self) -> Result<(), BrowserError>;

    /// Enters the eventable's form inputs, fires its event and waits for the
    /// page to settle
    ///
    /// # Returns
    ///
    /// * `Ok(true)` - The event was fired
    /// * `Ok(false)` - The element could not be interacted with
    /// * `Err(BrowserError)` - The browser failed
    fn fire_event_and_wait(&mut self, eventable: &Eventable) -> Result<bool, BrowserError>;

    /// Navigates one entry back in the session history
    fn go_back(&mut self) -> Result<(), BrowserError>;

    fn close(&mut self) -> Result<(), BrowserError>;
}

/// Creates browsers for crawlers
pub trait BrowserProvider: Send + Sync {
    fn create(&self, config: &BrowserConfig) -> Result<Box<dyn EmbeddedBrowser>, BrowserError>;
}

impl<F> BrowserProvider for F
where
    F: Fn(&BrowserConfig) -> Result<Box<dyn EmbeddedBrowser>, BrowserError> + Send + Sync,
{
    fn create(&self, config: &BrowserConfig) -> Result<Box<dyn EmbeddedBrowser>, BrowserError> {
        self(config)
    }
}
