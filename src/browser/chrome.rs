//! Headless Chrome adapter

use crate::browser::{BrowserProvider, EmbeddedBrowser};
use crate::config::BrowserConfig;
use crate::state::{EventType, Eventable, How, Identification};
use crate::BrowserError;
use headless_chrome::{Browser, LaunchOptions, Tab};
use serde_json::Value;
use std::ffi::OsStr;
use std::sync::{Arc, PoisonError};
use std::time::Duration;
use tracing::debug;
use url::Url;

/// JavaScript expression for the document of a `.`-separated frame path, or `null`
fn document_js(frame: &str) -> String {
    if frame.is_empty() {
        return "document".to_string();
    }
    let mut script = String::from("(() => { let d = document; ");
    for name in frame.split('.') {
        script.push_str(&format!(
            "{{ const n = {}; const f = Array.from(d.querySelectorAll('iframe, frame')).find(x => x.name === n || x.id === n); \
             if (!f || !f.contentDocument) return null; d = f.contentDocument; }} ",
            js_string(name)
        ));
    }
    script.push_str("return d; })()");
    script
}

/// JavaScript that resolves an identification within document `d` to an
/// element or `null`
fn locate_js(identification: &Identification) -> String {
    let value = js_string(&identification.value);
    match identification.how {
        How::Xpath => format!(
            "d.evaluate({}, d, null, XPathResult.FIRST_ORDERED_NODE_TYPE, null).singleNodeValue",
            value
        ),
        How::Id => format!("d.getElementById({})", value),
        How::Name => format!("d.getElementsByName({})[0] || null", value),
        How::Tag => format!("d.getElementsByTagName({})[0] || null", value),
        How::Css => format!("d.querySelector({})", value),
        How::Text | How::LinkText => format!(
            "Array.from(d.querySelectorAll({})).find(e => e.textContent.trim() === {}) || null",
            if identification.how == How::LinkText { "'a'" } else { "'*'" },
            value
        ),
        How::PartialText => format!(
            "Array.from(d.querySelectorAll('*')).reverse().find(e => e.textContent.includes({})) || null",
            value
        ),
    }
}

fn js_string(s: &str) -> String {
    Value::String(s.to_string()).to_string()
}

/// Chrome driven over the DevTools protocol
pub struct ChromeBrowser {
    browser: Browser,
    tab: Arc<Tab>,
}

impl ChromeBrowser {
    pub fn launch(config: &BrowserConfig) -> Result<Self, BrowserError> {
        let window_size_arg = format!(
            "--window-size={},{}",
            config.window_width, config.window_height
        );

        let mut args = vec![
            OsStr::new("--no-sandbox"),
            OsStr::new("--disable-dev-shm-usage"),
            OsStr::new(&window_size_arg),
        ];
        for arg in &config.args {
            args.push(OsStr::new(arg));
        }

        let launch_options = LaunchOptions::default_builder()
            .headless(config.headless)
            .args(args)
            .build()
            .map_err(|e| BrowserError::LaunchFailed(e.to_string()))?;

        let browser =
            Browser::new(launch_options).map_err(|e| BrowserError::LaunchFailed(e.to_string()))?;
        let tab = browser
            .new_tab()
            .map_err(|e| BrowserError::LaunchFailed(e.to_string()))?;
        tab.set_default_timeout(Duration::from_millis(config.page_load_timeout));

        Ok(Self { browser, tab })
    }

    fn evaluate(&self, script: &str) -> Result<Value, BrowserError> {
        let result = self
            .tab
            .evaluate(script, false)
            .map_err(BrowserError::transient)?;
        Ok(result.value.unwrap_or(Value::Null))
    }

    fn set_input(
        &self,
        frame: &str,
        identification: &Identification,
        value: &str,
    ) -> Result<bool, BrowserError> {
        let script = format!(
            "(() => {{ const d = {}; if (!d) return false; const e = {}; if (!e) return false; \
             if (e.type === 'checkbox' || e.type === 'radio') {{ e.checked = {} !== 'false'; }} \
             else {{ e.value = {}; }} \
             e.dispatchEvent(new Event('input', {{ bubbles: true }})); \
             e.dispatchEvent(new Event('change', {{ bubbles: true }})); return true; }})()",
            document_js(frame),
            locate_js(identification),
            js_string(value),
            js_string(value)
        );
        Ok(self.evaluate(&script)?.as_bool() == Some(true))
    }
}

impl EmbeddedBrowser for ChromeBrowser {
    fn go_to_url(&mut self, url: &Url) -> Result<(), BrowserError> {
        let navigation_failed = |e: anyhow::Error| BrowserError::NavigationFailed {
            url: url.to_string(),
            message: e.to_string(),
        };
        self.tab.navigate_to(url.as_str()).map_err(navigation_failed)?;
        self.tab.wait_until_navigated().map_err(navigation_failed)?;
        Ok(())
    }

    fn current_url(&self) -> Result<String, BrowserError> {
        Ok(self.tab.get_url())
    }

    fn dom(&self) -> Result<String, BrowserError> {
        self.tab.get_content().map_err(BrowserError::transient)
    }

    fn frame_dom(&self, frame: &str) -> Result<String, BrowserError> {
        let script = format!(
            "(() => {{ const d = {}; return d ? d.documentElement.outerHTML : null; }})()",
            document_js(frame)
        );
        match self.evaluate(&script)? {
            Value::String(dom) => Ok(dom),
            _ => Err(BrowserError::ElementNotFound(format!("frame {}", frame))),
        }
    }

    fn is_visible(&self, identification: &Identification) -> Result<bool, BrowserError> {
        let script = format!(
            "(() => {{ const d = document; const e = {}; if (!e) return false; const r = e.getBoundingClientRect(); \
             const s = window.getComputedStyle(e); \
             return r.width > 0 && r.height > 0 && s.visibility !== 'hidden' && s.display !== 'none'; }})()",
            locate_js(identification)
        );
        Ok(self.evaluate(&script)?.as_bool() == Some(true))
    }

    fn close_other_windows(&mut self) -> Result<(), BrowserError> {
        let main_id = self.tab.get_target_id().clone();
        let tabs = self
            .browser
            .get_tabs()
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone();
        for tab in tabs {
            if *tab.get_target_id() != main_id {
                debug!("Closing extra window {}", tab.get_url());
                tab.close(false).map_err(BrowserError::transient)?;
            }
        }
        Ok(())
    }

    fn fire_event_and_wait(&mut self, eventable: &Eventable) -> Result<bool, BrowserError> {
        let frame = eventable.related_frame();
        for input in eventable.form_inputs() {
            if !self.set_input(frame, &input.identification, &input.value)? {
                debug!("Form input {} not found", input.identification);
            }
        }

        let action = match eventable.event_type() {
            EventType::Click => "e.click();".to_string(),
            EventType::Hover => {
                "e.dispatchEvent(new MouseEvent('mouseover', { bubbles: true }));".to_string()
            }
            EventType::Submit => "(e.form ? e.form.requestSubmit() : e.click());".to_string(),
            EventType::Custom(name) => format!(
                "e.dispatchEvent(new Event({}, {{ bubbles: true }}));",
                js_string(name)
            ),
        };
        let script = format!(
            "(() => {{ const d = {}; if (!d) return false; const e = {}; if (!e) return false; {} return true; }})()",
            document_js(frame),
            locate_js(eventable.identification()),
            action
        );

        let fired = self.evaluate(&script)?.as_bool() == Some(true);
        if fired {
            // Navigation is optional after an event; a timeout here is not an error
            let _ = self.tab.wait_until_navigated();
        }
        Ok(fired)
    }

    fn go_back(&mut self) -> Result<(), BrowserError> {
        self.evaluate("window.history.back()")?;
        self.tab
            .wait_until_navigated()
            .map_err(BrowserError::transient)?;
        Ok(())
    }

    fn close(&mut self) -> Result<(), BrowserError> {
        self.tab.close(false).map_err(BrowserError::transient)?;
        Ok(())
    }
}

/// Launches one headless Chrome per crawler
#[derive(Debug, Clone, Copy, Default)]
pub struct ChromeProvider;

impl BrowserProvider for ChromeProvider {
    fn create(&self, config: &BrowserConfig) -> Result<Box<dyn EmbeddedBrowser>, BrowserError> {
        Ok(Box::new(ChromeBrowser::launch(config)?))
    }
}
