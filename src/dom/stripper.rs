//! DOM strippers
//!
//! A stripper turns a raw DOM into its canonical form by removing content that
//! should not distinguish states (timestamps, whitespace, ad frames...). Every
//! stripper must be deterministic and idempotent: stripping twice yields the
//! same string as stripping once. The pipeline reruns the whole chain while it
//! keeps shrinking the DOM, so one stripper exposing work for an earlier one
//! (whitespace removal closing up a broken comment) still ends in a fixed
//! point. A stripper that rewrites without shrinking must be idempotent on
//! its own.

use regex::Regex;
use std::fmt::Debug;
use std::sync::Arc;

/// Transforms a DOM into its canonical form
pub trait DomStripper: Send + Sync + Debug {
    /// Short name used in logs
    fn name(&self) -> &str;

    fn strip(&self, dom: &str) -> String;
}

/// Applies `pass` for as long as it shrinks the output
///
/// A pass that only removes text either shrinks the string or leaves it
/// unchanged, so for removals this ends exactly at a fixed point.
fn until_stable(dom: &str, pass: impl Fn(&str) -> String) -> String {
    let mut current = dom.to_string();
    loop {
        let next = pass(&current);
        if next.len() >= current.len() {
            return next;
        }
        current = next;
    }
}

/// Removes every whitespace character
#[derive(Debug, Clone, Copy, Default)]
pub struct WhitespaceStripper;

impl DomStripper for WhitespaceStripper {
    fn name(&self) -> &str {
        "whitespace"
    }

    fn strip(&self, dom: &str) -> String {
        dom.chars().filter(|c| !c.is_whitespace()).collect()
    }
}

/// Removes `<!-- ... -->` comments
#[derive(Debug, Clone, Copy, Default)]
pub struct CommentStripper;

impl CommentStripper {
    pub fn new() -> Self {
        Self
    }
}

fn remove_comments(dom: &str) -> String {
    let mut out = String::with_capacity(dom.len());
    let mut rest = dom;
    while let Some(start) = rest.find("<!--") {
        match rest[start + 4..].find("-->") {
            Some(end) => {
                out.push_str(&rest[..start]);
                rest = &rest[start + 4 + end + 3..];
            }
            None => break,
        }
    }
    out.push_str(rest);
    out
}

impl DomStripper for CommentStripper {
    fn name(&self) -> &str {
        "comments"
    }

    fn strip(&self, dom: &str) -> String {
        until_stable(dom, remove_comments)
    }
}

/// Removes the named attributes from every tag
#[derive(Debug, Clone)]
pub struct AttributeStripper {
    names: Vec<String>,
    pattern: Regex,
}

impl AttributeStripper {
    pub fn new(names: Vec<String>) -> Result<Self, regex::Error> {
        let alternatives = names
            .iter()
            .map(|n| regex::escape(n))
            .collect::<Vec<_>>()
            .join("|");
        let pattern = Regex::new(&format!(
            r#"(?i)\s+(?:{})\s*=\s*(?:"[^"]*"|'[^']*'|[^\s>]+)"#,
            alternatives
        ))?;
        Ok(Self { names, pattern })
    }

    pub fn names(&self) -> &[String] {
        &self.names
    }
}

impl DomStripper for AttributeStripper {
    fn name(&self) -> &str {
        "attribute"
    }

    fn strip(&self, dom: &str) -> String {
        if self.names.is_empty() {
            return dom.to_string();
        }
        until_stable(dom, |d| self.pattern.replace_all(d, "").into_owned())
    }
}

/// Replaces every match of a regular expression
#[derive(Debug, Clone)]
pub struct RegexStripper {
    pattern: Regex,
    replacement: String,
}

impl RegexStripper {
    pub fn new(pattern: &str, replacement: impl Into<String>) -> Result<Self, regex::Error> {
        Ok(Self {
            pattern: Regex::new(pattern)?,
            replacement: replacement.into(),
        })
    }
}

impl DomStripper for RegexStripper {
    fn name(&self) -> &str {
        "regex"
    }

    fn strip(&self, dom: &str) -> String {
        until_stable(dom, |d| {
            self.pattern
                .replace_all(d, self.replacement.as_str())
                .into_owned()
        })
    }
}

/// Removes whole elements of one tag, including their content
#[derive(Debug, Clone)]
pub struct TagStripper {
    tag: String,
    paired: Regex,
    single: Regex,
}

impl TagStripper {
    pub fn new(tag: impl Into<String>) -> Result<Self, regex::Error> {
        let tag = tag.into();
        let escaped = regex::escape(&tag);
        Ok(Self {
            paired: Regex::new(&format!(r"(?is)<{0}\b[^>]*>.*?</{0}\s*>", escaped))?,
            single: Regex::new(&format!(r"(?i)<{}\b[^>]*/>", escaped))?,
            tag,
        })
    }

    pub fn tag(&self) -> &str {
        &self.tag
    }
}

impl DomStripper for TagStripper {
    fn name(&self) -> &str {
        "tag"
    }

    fn strip(&self, dom: &str) -> String {
        until_stable(dom, |d| {
            let d = self.paired.replace_all(d, "");
            self.single.replace_all(&d, "").into_owned()
        })
    }
}

/// Ordered pipeline of strippers
///
/// The canonical DOM is the fold of the strippers over the raw DOM; an empty
/// pipeline is the identity.
#[derive(Debug, Clone, Default)]
pub struct DomStrippers {
    strippers: Vec<Arc<dyn DomStripper>>,
}

impl DomStrippers {
    pub fn new(strippers: Vec<Arc<dyn DomStripper>>) -> Self {
        Self { strippers }
    }

    pub fn push(&mut self, stripper: Arc<dyn DomStripper>) {
        self.strippers.push(stripper);
    }

    pub fn len(&self) -> usize {
        self.strippers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.strippers.is_empty()
    }

    pub fn names(&self) -> Vec<String> {
        self.strippers.iter().map(|s| s.name().to_string()).collect()
    }

    /// Computes the canonical form of `dom`
    pub fn strip(&self, dom: &str) -> String {
        until_stable(dom, |current| {
            self.strippers
                .iter()
                .fold(current.to_string(), |acc, stripper| stripper.strip(&acc))
        })
    }
}
