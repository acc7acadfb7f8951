//! Conditions over the current page
//!
//! A [`Condition`] is a predicate over the DOM and URL of the page a crawler is
//! looking at. Conditions are combined into:
//!
//! - crawl conditions: when one fails, the page is not explored further
//! - invariants: checked on every new state, violations go to the plugins
//! - per-rule preconditions of include/exclude rules
//!
//! Wait conditions live in [`waiter`].
//!
//! Regexes and XPaths are compiled on first use and shared by every crawler
//! afterwards.

mod waiter;

pub use waiter::{ExpectedCondition, PollingWaitChecker, WaitCondition, WaitConditionChecker};

use crate::dom::{XPath, XPathError};
use crate::url::matches_url_pattern;
use regex::Regex;
use scraper::Html;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, OnceLock, PoisonError};
use thiserror::Error;

/// Errors from evaluating a malformed condition
#[derive(Debug, Error)]
pub enum ConditionError {
    #[error("Invalid regex '{pattern}': {message}")]
    Regex { pattern: String, message: String },

    #[error(transparent)]
    XPath(#[from] XPathError),
}

/// The page a condition is evaluated against
pub struct ConditionContext<'a> {
    pub dom: &'a str,
    pub doc: &'a Html,
    pub url: &'a str,
}

impl<'a> ConditionContext<'a> {
    pub fn new(dom: &'a str, doc: &'a Html, url: &'a str) -> Self {
        Self { dom, doc, url }
    }
}

/// A predicate over the current page
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum Condition {
    /// The DOM matches the regex
    Regex { pattern: String },
    /// The DOM does not match the regex
    NotRegex { pattern: String },
    /// At least one element matches the XPath
    Xpath { expression: String },
    /// No element matches the XPath
    NotXpath { expression: String },
    /// The URL matches the pattern (substring, or wildcard with `*`)
    Url { pattern: String },
    /// The URL does not match the pattern
    NotUrl { pattern: String },
}

impl Condition {
    /// Checks that regexes and XPaths in this condition parse
    pub fn validate(&self) -> Result<(), ConditionError> {
        match self {
            Self::Regex { pattern } | Self::NotRegex { pattern } => regex(pattern).map(|_| ()),
            Self::Xpath { expression } | Self::NotXpath { expression } => {
                compiled_xpath(expression).map(|_| ())
            }
            Self::Url { .. } | Self::NotUrl { .. } => Ok(()),
        }
    }

    /// Evaluates the condition on the given page
    pub fn check(&self, ctx: &ConditionContext<'_>) -> Result<bool, ConditionError> {
        Ok(match self {
            Self::Regex { pattern } => regex(pattern)?.is_match(ctx.dom),
            Self::NotRegex { pattern } => !regex(pattern)?.is_match(ctx.dom),
            Self::Xpath { expression } => compiled_xpath(expression)?.matches_any(ctx.doc),
            Self::NotXpath { expression } => !compiled_xpath(expression)?.matches_any(ctx.doc),
            Self::Url { pattern } => matches_url_pattern(pattern, ctx.url),
            Self::NotUrl { pattern } => !matches_url_pattern(pattern, ctx.url),
        })
    }
}

#[derive(Default)]
struct Compiled {
    regexes: HashMap<String, Regex>,
    xpaths: HashMap<String, Arc<XPath>>,
}

fn compiled() -> MutexGuard<'static, Compiled> {
    static COMPILED: OnceLock<Mutex<Compiled>> = OnceLock::new();
    COMPILED
        .get_or_init(Mutex::default)
        .lock()
        .unwrap_or_else(PoisonError::into_inner)
}

fn regex(pattern: &str) -> Result<Regex, ConditionError> {
    if let Some(regex) = compiled().regexes.get(pattern) {
        return Ok(regex.clone());
    }
    let regex = Regex::new(pattern).map_err(|e| ConditionError::Regex {
        pattern: pattern.to_string(),
        message: e.to_string(),
    })?;
    compiled()
        .regexes
        .insert(pattern.to_string(), regex.clone());
    Ok(regex)
}

/// Parses `expression` once per process
pub(crate) fn compiled_xpath(expression: &str) -> Result<Arc<XPath>, ConditionError> {
    if let Some(xpath) = compiled().xpaths.get(expression) {
        return Ok(Arc::clone(xpath));
    }
    let xpath = Arc::new(XPath::parse(expression)?);
    compiled()
        .xpaths
        .insert(expression.to_string(), Arc::clone(&xpath));
    Ok(xpath)
}

/// True if every condition holds (vacuously true for none)
pub fn all_hold(conditions: &[Condition], ctx: &ConditionContext<'_>) -> Result<bool, ConditionError> {
    for condition in conditions {
        if !condition.check(ctx)? {
            return Ok(false);
        }
    }
    Ok(true)
}

/// A global predicate; when it fails the current page is not explored further
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CrawlCondition {
    pub description: String,
    pub condition: Condition,
    /// The crawl condition only applies where all preconditions hold
    #[serde(default)]
    pub preconditions: Vec<Condition>,
}

impl CrawlCondition {
    pub fn new(description: impl Into<String>, condition: Condition) -> Self {
        Self {
            description: description.into(),
            condition,
            preconditions: Vec::new(),
        }
    }

    pub fn with_precondition(mut self, precondition: Condition) -> Self {
        self.preconditions.push(precondition);
        self
    }

    /// True unless the preconditions hold and the condition fails
    pub fn allows(&self, ctx: &ConditionContext<'_>) -> Result<bool, ConditionError> {
        if !all_hold(&self.preconditions, ctx)? {
            return Ok(true);
        }
        self.condition.check(ctx)
    }
}

/// A (precondition, condition) pair checked on every new state
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Invariant {
    pub description: String,
    pub condition: Condition,
    #[serde(default)]
    pub preconditions: Vec<Condition>,
}

impl Invariant {
    pub fn new(description: impl Into<String>, condition: Condition) -> Self {
        Self {
            description: description.into(),
            condition,
            preconditions: Vec::new(),
        }
    }

    pub fn with_precondition(mut self, precondition: Condition) -> Self {
        self.preconditions.push(precondition);
        self
    }

    /// Violated when every precondition holds and the condition fails
    pub fn is_violated(&self, ctx: &ConditionContext<'_>) -> Result<bool, ConditionError> {
        Ok(all_hold(&self.preconditions, ctx)? && !self.condition.check(ctx)?)
    }
}

impl std::fmt::Display for Invariant {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.description)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const DOM: &str = r#"<html><body><div id="cart"><span class="count">3</span></div></body></html>"#;

    fn eval(condition: Condition) -> bool {
        let doc = Html::parse_document(DOM);
        let ctx = ConditionContext::new(DOM, &doc, "http://shop.test/cart?x=1");
        condition.check(&ctx).unwrap()
    }

    #[test]
    fn test_condition_kinds() {
        assert!(eval(Condition::Regex { pattern: r#"class="count">\d+<"#.into() }));
        assert!(!eval(Condition::NotRegex { pattern: "cart".into() }));
        assert!(eval(Condition::Xpath { expression: "//DIV[@id='cart']/SPAN".into() }));
        assert!(eval(Condition::NotXpath { expression: "//FORM".into() }));
        assert!(eval(Condition::Url { pattern: "/cart".into() }));
        assert!(eval(Condition::NotUrl { pattern: "*logout*".into() }));
    }

    #[test]
    fn test_patterns_are_compiled_once() {
        let expression = "//DIV[@id='cart']/SPAN[@class='count']";
        let condition = Condition::Xpath { expression: expression.into() };
        condition.validate().unwrap();
        assert!(eval(condition.clone()));
        assert!(eval(condition));
        assert!(Arc::ptr_eq(
            &compiled_xpath(expression).unwrap(),
            &compiled_xpath(expression).unwrap()
        ));

        let pattern = r"<span class=.count.>3";
        assert!(!compiled().regexes.contains_key(pattern));
        assert!(eval(Condition::Regex { pattern: pattern.into() }));
        assert!(compiled().regexes.contains_key(pattern));
    }

    #[test]
    fn test_validate_reports_bad_patterns() {
        assert!(Condition::Regex { pattern: "(".into() }.validate().is_err());
        assert!(Condition::Xpath { expression: "DIV".into() }.validate().is_err());
        assert!(Condition::Url { pattern: "*".into() }.validate().is_ok());
    }

    #[test]
    fn test_invariant_respects_preconditions() {
        let doc = Html::parse_document(DOM);
        let ctx = ConditionContext::new(DOM, &doc, "http://shop.test/cart");

        let violated = Invariant::new("no empty cart", Condition::Regex { pattern: "empty".into() })
            .with_precondition(Condition::Url { pattern: "/cart".into() });
        assert!(violated.is_violated(&ctx).unwrap());

        let not_applicable = violated
            .clone()
            .with_precondition(Condition::Url { pattern: "/checkout".into() });
        assert!(!not_applicable.is_violated(&ctx).unwrap());
    }

    #[test]
    fn test_crawl_condition_allows() {
        let doc = Html::parse_document(DOM);
        let ctx = ConditionContext::new(DOM, &doc, "http://shop.test/cart");

        let stay_out = CrawlCondition::new("skip carts", Condition::NotXpath {
            expression: "//DIV[@id='cart']".into(),
        });
        assert!(!stay_out.allows(&ctx).unwrap());

        let scoped = stay_out.with_precondition(Condition::Url { pattern: "/admin".into() });
        assert!(scoped.allows(&ctx).unwrap());
    }

    #[test]
    fn test_deserialize_tagged_condition() {
        let inv: Invariant = toml::from_str(
            r#"
description = "no error banner"
condition = { type = "not-xpath", expression = "//DIV[@class='error']" }
preconditions = [{ type = "url", pattern = "example.com" }]
"#,
        )
        .unwrap();
        assert_eq!(inv.preconditions.len(), 1);
        assert!(matches!(inv.condition, Condition::NotXpath { .. }));
    }
}
