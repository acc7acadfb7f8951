//! Candidate extraction
//!
//! The extractor applies the crawl rules to the DOM the browser currently
//! shows and lists the elements worth firing, in document order. Elements
//! inside frames follow their host frame element and carry the frame path in
//! `related_frame`.
//!
//! A rule that cannot be evaluated (malformed XPath, bad regex in a
//! precondition) is logged and skipped; extraction goes on with the others.

use crate::browser::EmbeddedBrowser;
use crate::condition::{all_hold, compiled_xpath, ConditionContext, ConditionError};
use crate::config::{CrawlConfig, ElementRule};
use crate::crawler::candidate::CandidateElement;
use crate::dom::{element_text, element_xpath, is_within, locate, parse_dom};
use crate::state::{ElementInfo, EventType, FormInput, Identification, StateVertex};
use crate::BrowserError;
use scraper::{ElementRef, Html};
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, PoisonError};
use tracing::{debug, warn};

/// Frames nested deeper than this are not entered
const MAX_FRAME_DEPTH: usize = 4;

/// Lists the candidate actions of the current page
pub trait CandidateExtractor: Send {
    /// Evaluates the global crawl conditions on the current page
    ///
    /// Returns false when the page must not be explored further.
    fn check_crawl_condition(&mut self, browser: &mut dyn EmbeddedBrowser) -> bool;

    /// Candidates of the page, which the caller knows to be `state`
    fn extract(
        &mut self,
        browser: &mut dyn EmbeddedBrowser,
        state: &StateVertex,
    ) -> Result<Vec<CandidateElement>, BrowserError>;
}

/// Element signatures already offered in some state; shared by every crawler
/// when click-once is on
#[derive(Debug, Clone, Default)]
pub struct CheckedElements {
    inner: Arc<Mutex<HashSet<String>>>,
}

impl CheckedElements {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns true if the signature was not checked before
    pub fn insert(&self, signature: String) -> bool {
        self.inner
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(signature)
    }

    pub fn contains(&self, signature: &str) -> bool {
        self.inner
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .contains(signature)
    }

    pub fn len(&self) -> usize {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// The rule-driven extractor used by default
pub struct CandidateElementExtractor {
    config: Arc<CrawlConfig>,
    checked: CheckedElements,
}

impl CandidateElementExtractor {
    pub fn new(config: Arc<CrawlConfig>, checked: CheckedElements) -> Self {
        Self { config, checked }
    }

    fn extract_document(
        &self,
        browser: &dyn EmbeddedBrowser,
        dom: &str,
        url: &str,
        frame: &str,
        depth: usize,
        out: &mut Vec<CandidateElement>,
    ) {
        let doc = parse_dom(dom);
        let ctx = ConditionContext::new(dom, &doc, url);
        let rules = &self.config.rules;

        let mut included = HashMap::new();
        for rule in &rules.include {
            for el in applied(rule, &doc, &ctx) {
                included.entry(el.id()).or_insert_with(|| rule.event_type.clone());
            }
        }

        let excluded: HashSet<_> = rules
            .exclude
            .iter()
            .flat_map(|rule| applied(rule, &doc, &ctx))
            .map(|el| el.id())
            .collect();

        for el in doc.root_element().descendants().filter_map(ElementRef::wrap) {
            if let Some(event_type) = included.get(&el.id()) {
                if excluded.contains(&el.id()) {
                    debug!("Excluded {}", element_xpath(el));
                } else if let Some(candidate) = self.candidate(&doc, el, event_type, frame) {
                    out.push(candidate);
                }
            }

            if self.config.crawler.crawl_frames && is_frame(el) {
                self.extract_frame(browser, el, url, frame, depth, out);
            }
        }
    }

    fn extract_frame(
        &self,
        browser: &dyn EmbeddedBrowser,
        host: ElementRef<'_>,
        url: &str,
        parent: &str,
        depth: usize,
        out: &mut Vec<CandidateElement>,
    ) {
        let Some(name) = host.value().attr("name").or_else(|| host.value().id()) else {
            debug!("Skipping unnamed frame {}", element_xpath(host));
            return;
        };

        if self.config.crawler.ignore_frames.iter().any(|f| f == name) {
            debug!("Ignoring frame {}", name);
            return;
        }

        if depth >= MAX_FRAME_DEPTH {
            debug!("Not entering frame {}: nested too deep", name);
            return;
        }

        let path = if parent.is_empty() {
            name.to_string()
        } else {
            format!("{}.{}", parent, name)
        };

        match browser.frame_dom(&path) {
            Ok(dom) => self.extract_document(browser, &dom, url, &path, depth + 1, out),
            Err(e) => debug!("Cannot read frame {}: {}", path, e),
        }
    }

    fn candidate(
        &self,
        doc: &Html,
        el: ElementRef<'_>,
        event_type: &EventType,
        frame: &str,
    ) -> Option<CandidateElement> {
        let element = ElementInfo {
            tag: el.value().name().to_ascii_uppercase(),
            text: element_text(el),
            attributes: el
                .value()
                .attrs()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect(),
        };

        let candidate = CandidateElement::new(
            Identification::xpath(element_xpath(el)),
            event_type.clone(),
        )
        .with_related_frame(frame)
        .with_form_inputs(self.form_inputs(doc, el))
        .with_element(element);

        if self.config.crawler.click_once && !self.checked.insert(candidate.signature()) {
            return None;
        }
        Some(candidate)
    }

    /// Inputs of every form binding whose trigger is `el`
    fn form_inputs(&self, doc: &Html, el: ElementRef<'_>) -> Vec<FormInput> {
        let mut inputs = Vec::new();
        for form in &self.config.rules.forms {
            match locate(doc, &form.trigger) {
                Ok(triggers) if triggers.iter().any(|t| t.id() == el.id()) => {
                    inputs.extend(form.inputs.iter().cloned());
                }
                Ok(_) => {}
                Err(e) => warn!("Form trigger {} cannot be located: {}", form.trigger, e),
            }
        }
        inputs
    }
}

impl CandidateExtractor for CandidateElementExtractor {
    fn check_crawl_condition(&mut self, browser: &mut dyn EmbeddedBrowser) -> bool {
        let conditions = &self.config.rules.crawl_conditions;
        if conditions.is_empty() {
            return true;
        }

        let (dom, url) = match (browser.dom(), browser.current_url()) {
            (Ok(dom), Ok(url)) => (dom, url),
            (Err(e), _) | (_, Err(e)) => {
                warn!("Cannot read page for crawl conditions: {}", e);
                return false;
            }
        };

        let doc = parse_dom(&dom);
        let ctx = ConditionContext::new(&dom, &doc, &url);
        for cc in conditions {
            match cc.allows(&ctx) {
                Ok(true) => {}
                Ok(false) => {
                    debug!("Crawl condition '{}' fails on {}", cc.description, url);
                    return false;
                }
                Err(e) => warn!("Crawl condition '{}' cannot be evaluated: {}", cc.description, e),
            }
        }
        true
    }

    fn extract(
        &mut self,
        browser: &mut dyn EmbeddedBrowser,
        state: &StateVertex,
    ) -> Result<Vec<CandidateElement>, BrowserError> {
        let dom = browser.dom()?;
        let url = browser
            .current_url()
            .unwrap_or_else(|_| state.url().to_string());

        let mut candidates = Vec::new();
        self.extract_document(&*browser, &dom, &url, "", 0, &mut candidates);
        debug!("Extracted {} candidates for {}", candidates.len(), state);
        Ok(candidates)
    }
}

fn is_frame(el: ElementRef<'_>) -> bool {
    let name = el.value().name();
    name.eq_ignore_ascii_case("iframe") || name.eq_ignore_ascii_case("frame")
}

/// Elements `rule` selects on the page; none if the rule does not apply or
/// cannot be evaluated
fn applied<'a>(rule: &ElementRule, doc: &'a Html, ctx: &ConditionContext<'_>) -> Vec<ElementRef<'a>> {
    match select(rule, doc, ctx) {
        Ok(selected) => selected,
        Err(e) => {
            warn!("Skipping rule for <{}>: {}", rule.tag, e);
            Vec::new()
        }
    }
}

fn select<'a>(
    rule: &ElementRule,
    doc: &'a Html,
    ctx: &ConditionContext<'_>,
) -> Result<Vec<ElementRef<'a>>, ConditionError> {
    if !all_hold(&rule.conditions, ctx)? {
        return Ok(Vec::new());
    }

    let by_xpath: Option<HashSet<_>> = match &rule.xpath {
        Some(expression) => Some(
            compiled_xpath(expression)?
                .select(doc)
                .iter()
                .map(|el| el.id())
                .collect(),
        ),
        None => None,
    };
    let containers = match &rule.under_xpath {
        Some(expression) => Some(compiled_xpath(expression)?.select(doc)),
        None => None,
    };

    Ok(doc
        .root_element()
        .descendants()
        .filter_map(ElementRef::wrap)
        .filter(|el| matches_element(rule, *el))
        .filter(|el| by_xpath.as_ref().map_or(true, |ids| ids.contains(&el.id())))
        .filter(|el| containers.as_ref().map_or(true, |c| is_within(*el, c)))
        .collect())
}

/// Tag, text and attribute tests of a rule
fn matches_element(rule: &ElementRule, el: ElementRef<'_>) -> bool {
    let tag = rule.tag.trim();
    if tag != "*" && !el.value().name().eq_ignore_ascii_case(tag) {
        return false;
    }

    if let Some(text) = &rule.text {
        if element_text(el) != text.trim() {
            return false;
        }
    }

    rule.attributes.iter().all(|(name, expected)| {
        match el.value().attr(name) {
            Some(_) if expected == "*" => true,
            Some(actual) => actual == expected,
            None => false,
        }
    })
}
