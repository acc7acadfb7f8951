//! XPath generation and a small XPath evaluator over parsed DOMs
//!
//! Candidate elements are identified by absolute positional paths such as
//! `/HTML[1]/BODY[1]/DIV[2]/A[1]`. Crawl rules, conditions and wait conditions
//! use a practical subset of XPath 1.0:
//!
//! - absolute location paths built from `/` (child) and `//` (descendant) steps
//! - name tests (case-insensitive) and `*`
//! - predicates: `[n]`, `[@a]`, `[@a='v']`, `[contains(@a,'v')]`,
//!   `[text()='v']`, `[contains(text(),'v')]`
//!
//! Positional predicates count among the siblings selected so far under the
//! same parent, as in XPath.

use scraper::{ElementRef, Html};
use std::collections::{HashMap, HashSet};
use thiserror::Error;

/// Errors from parsing an XPath expression or element locator
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum XPathError {
    #[error("Empty XPath expression")]
    Empty,

    #[error("Invalid XPath '{expression}': {message}")]
    Invalid { expression: String, message: String },

    #[error("Invalid CSS selector '{0}'")]
    InvalidSelector(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Predicate {
    Position(usize),
    HasAttr(String),
    AttrEquals(String, String),
    AttrContains(String, String),
    TextEquals(String),
    TextContains(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct Step {
    descendant: bool,
    /// `None` is the `*` name test
    name: Option<String>,
    predicates: Vec<Predicate>,
}

/// A parsed XPath expression
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct XPath {
    expression: String,
    steps: Vec<Step>,
}

#[derive(Clone, Copy)]
enum Context<'a> {
    Document,
    Element(ElementRef<'a>),
}

impl XPath {
    /// Parses an absolute XPath expression
    pub fn parse(expression: &str) -> Result<Self, XPathError> {
        let trimmed = expression.trim();
        if trimmed.is_empty() {
            return Err(XPathError::Empty);
        }

        let invalid = |message: &str| XPathError::Invalid {
            expression: trimmed.to_string(),
            message: message.to_string(),
        };

        if !trimmed.starts_with('/') {
            return Err(invalid("only absolute paths starting with '/' are supported"));
        }

        let mut steps = Vec::new();
        let mut rest = trimmed;

        while !rest.is_empty() {
            let descendant = if let Some(r) = rest.strip_prefix("//") {
                rest = r;
                true
            } else if let Some(r) = rest.strip_prefix('/') {
                rest = r;
                false
            } else {
                return Err(invalid("expected '/' between steps"));
            };

            let end = rest.find(['[', '/']).unwrap_or(rest.len());
            let name = &rest[..end];
            rest = &rest[end..];

            if name.is_empty() {
                return Err(invalid("missing name test"));
            }
            if name != "*"
                && !name
                    .chars()
                    .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_' || c == ':')
            {
                return Err(invalid(&format!("unsupported name test '{}'", name)));
            }

            let mut predicates = Vec::new();
            while rest.starts_with('[') {
                let close = find_closing_bracket(rest).ok_or_else(|| invalid("unclosed '['"))?;
                let body = &rest[1..close];
                predicates.push(parse_predicate(body).map_err(|m| invalid(&m))?);
                rest = &rest[close + 1..];
            }

            steps.push(Step {
                descendant,
                name: (name != "*").then(|| name.to_ascii_lowercase()),
                predicates,
            });
        }

        Ok(Self {
            expression: trimmed.to_string(),
            steps,
        })
    }

    pub fn as_str(&self) -> &str {
        &self.expression
    }

    /// Selects the matching elements in document order
    pub fn select<'a>(&self, doc: &'a Html) -> Vec<ElementRef<'a>> {
        let order: HashMap<_, usize> = doc
            .root_element()
            .descendants()
            .enumerate()
            .map(|(i, node)| (node.id(), i))
            .collect();
        let mut contexts = vec![Context::Document];

        for step in &self.steps {
            let parents = if step.descendant {
                descendant_or_self(doc, &contexts)
            } else {
                contexts
            };

            let mut seen = HashSet::new();
            let mut next = Vec::new();
            for parent in parents {
                let mut kids: Vec<ElementRef<'a>> = children(doc, parent)
                    .into_iter()
                    .filter(|el| name_matches(step.name.as_deref(), el))
                    .collect();

                for predicate in &step.predicates {
                    kids = apply_predicate(predicate, kids);
                }

                for kid in kids {
                    if seen.insert(kid.id()) {
                        next.push(kid);
                    }
                }
            }

            next.sort_by_key(|el| order.get(&el.id()).copied().unwrap_or(usize::MAX));
            contexts = next.into_iter().map(Context::Element).collect();
        }

        contexts
            .into_iter()
            .filter_map(|c| match c {
                Context::Element(el) => Some(el),
                Context::Document => None,
            })
            .collect()
    }

    /// True if at least one element matches
    pub fn matches_any(&self, doc: &Html) -> bool {
        !self.select(doc).is_empty()
    }
}

impl std::fmt::Display for XPath {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.expression)
    }
}

/// Builds the absolute positional XPath of an element, e.g. `/HTML[1]/BODY[1]/A[2]`
pub fn element_xpath(element: ElementRef<'_>) -> String {
    let mut parts = Vec::new();
    let mut current = Some(element);

    while let Some(el) = current {
        let name = el.value().name();
        let parent = el.parent().and_then(ElementRef::wrap);
        let index = parent
            .and_then(|p| {
                p.children()
                    .filter_map(ElementRef::wrap)
                    .filter(|s| s.value().name() == name)
                    .position(|s| s.id() == el.id())
            })
            .map_or(1, |i| i + 1);

        parts.push(format!("{}[{}]", name.to_ascii_uppercase(), index));
        current = parent;
    }

    parts.reverse();
    format!("/{}", parts.join("/"))
}

/// Text content of an element with whitespace runs collapsed
pub fn element_text(element: ElementRef<'_>) -> String {
    element
        .text()
        .flat_map(str::split_whitespace)
        .collect::<Vec<_>>()
        .join(" ")
}

/// True if `element` or one of its ancestors is in `set`
pub fn is_within(element: ElementRef<'_>, set: &[ElementRef<'_>]) -> bool {
    let ids: HashSet<_> = set.iter().map(|e| e.id()).collect();
    let mut current = Some(element);
    while let Some(el) = current {
        if ids.contains(&el.id()) {
            return true;
        }
        current = el.parent().and_then(ElementRef::wrap);
    }
    false
}

fn children<'a>(doc: &'a Html, context: Context<'a>) -> Vec<ElementRef<'a>> {
    match context {
        Context::Document => vec![doc.root_element()],
        Context::Element(el) => el.children().filter_map(ElementRef::wrap).collect(),
    }
}

fn descendant_or_self<'a>(doc: &'a Html, contexts: &[Context<'a>]) -> Vec<Context<'a>> {
    let mut out = Vec::new();
    let mut seen = HashSet::new();
    let mut document_added = false;

    for context in contexts {
        match context {
            Context::Document => {
                if !document_added {
                    out.push(Context::Document);
                    document_added = true;
                }
                for el in doc.root_element().descendants().filter_map(ElementRef::wrap) {
                    if seen.insert(el.id()) {
                        out.push(Context::Element(el));
                    }
                }
            }
            Context::Element(root) => {
                for el in root.descendants().filter_map(ElementRef::wrap) {
                    if seen.insert(el.id()) {
                        out.push(Context::Element(el));
                    }
                }
            }
        }
    }

    out
}

fn name_matches(name: Option<&str>, el: &ElementRef<'_>) -> bool {
    match name {
        None => true,
        Some(n) => el.value().name().eq_ignore_ascii_case(n),
    }
}

fn apply_predicate<'a>(predicate: &Predicate, kids: Vec<ElementRef<'a>>) -> Vec<ElementRef<'a>> {
    match predicate {
        Predicate::Position(n) => kids.into_iter().nth(n - 1).into_iter().collect(),
        Predicate::HasAttr(name) => kids
            .into_iter()
            .filter(|el| attr(el, name).is_some())
            .collect(),
        Predicate::AttrEquals(name, value) => kids
            .into_iter()
            .filter(|el| attr(el, name) == Some(value.as_str()))
            .collect(),
        Predicate::AttrContains(name, value) => kids
            .into_iter()
            .filter(|el| attr(el, name).is_some_and(|a| a.contains(value.as_str())))
            .collect(),
        Predicate::TextEquals(value) => kids
            .into_iter()
            .filter(|el| element_text(*el) == *value)
            .collect(),
        Predicate::TextContains(value) => kids
            .into_iter()
            .filter(|el| element_text(*el).contains(value.as_str()))
            .collect(),
    }
}

fn attr<'a>(el: &ElementRef<'a>, name: &str) -> Option<&'a str> {
    el.value()
        .attrs()
        .find(|(k, _)| k.eq_ignore_ascii_case(name))
        .map(|(_, v)| v)
}

fn find_closing_bracket(s: &str) -> Option<usize> {
    let mut quote: Option<char> = None;
    for (i, c) in s.char_indices().skip(1) {
        match quote {
            Some(q) if c == q => quote = None,
            Some(_) => {}
            None if c == '\'' || c == '"' => quote = Some(c),
            None if c == ']' => return Some(i),
            None => {}
        }
    }
    None
}

fn unquote(s: &str) -> Result<String, String> {
    let s = s.trim();
    for q in ['\'', '"'] {
        if s.len() >= 2 && s.starts_with(q) && s.ends_with(q) {
            return Ok(s[1..s.len() - 1].to_string());
        }
    }
    Err(format!("expected a quoted string, got '{}'", s))
}

fn parse_predicate(body: &str) -> Result<Predicate, String> {
    let body = body.trim();

    if !body.is_empty() && body.chars().all(|c| c.is_ascii_digit()) {
        let n: usize = body.parse().map_err(|_| format!("bad position '{}'", body))?;
        if n == 0 {
            return Err("positions start at 1".to_string());
        }
        return Ok(Predicate::Position(n));
    }

    if let Some(attr) = body.strip_prefix('@') {
        return match attr.split_once('=') {
            Some((name, value)) => Ok(Predicate::AttrEquals(
                name.trim().to_string(),
                unquote(value)?,
            )),
            None => Ok(Predicate::HasAttr(attr.trim().to_string())),
        };
    }

    if let Some(args) = body
        .strip_prefix("contains(")
        .and_then(|r| r.strip_suffix(')'))
    {
        let (subject, value) = args
            .split_once(',')
            .ok_or_else(|| "contains() takes two arguments".to_string())?;
        let value = unquote(value)?;
        let subject = subject.trim();
        return if let Some(name) = subject.strip_prefix('@') {
            Ok(Predicate::AttrContains(name.trim().to_string(), value))
        } else if subject == "text()" || subject == "." {
            Ok(Predicate::TextContains(value))
        } else {
            Err(format!("unsupported contains() subject '{}'", subject))
        };
    }

    for prefix in ["text()", "."] {
        if let Some(rest) = body.strip_prefix(prefix) {
            if let Some(value) = rest.trim_start().strip_prefix('=') {
                return Ok(Predicate::TextEquals(unquote(value)?));
            }
        }
    }

    Err(format!("unsupported predicate '[{}]'", body))
}
