//! Element identification
//!
//! An [`Identification`] names one DOM element by a lookup strategy and a value.
//! Candidate elements carry one, and so do the eventables recorded in the graph.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Strategy used to locate an element
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum How {
    Id,
    Name,
    Tag,
    Xpath,
    Text,
    PartialText,
    LinkText,
    Css,
}

impl How {
    /// Returns the configuration/report spelling of this strategy
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Id => "id",
            Self::Name => "name",
            Self::Tag => "tag",
            Self::Xpath => "xpath",
            Self::Text => "text",
            Self::PartialText => "partial-text",
            Self::LinkText => "link-text",
            Self::Css => "css",
        }
    }

    /// Parses a strategy from its configuration spelling
    pub fn from_str_name(s: &str) -> Option<Self> {
        match s {
            "id" => Some(Self::Id),
            "name" => Some(Self::Name),
            "tag" => Some(Self::Tag),
            "xpath" => Some(Self::Xpath),
            "text" => Some(Self::Text),
            "partial-text" => Some(Self::PartialText),
            "link-text" => Some(Self::LinkText),
            "css" => Some(Self::Css),
            _ => None,
        }
    }
}

impl fmt::Display for How {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Names a DOM element: a lookup strategy plus its (non-empty) value
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Identification {
    pub how: How,
    pub value: String,
}

impl Identification {
    pub fn new(how: How, value: impl Into<String>) -> Self {
        Self {
            how,
            value: value.into(),
        }
    }

    pub fn xpath(value: impl Into<String>) -> Self {
        Self::new(How::Xpath, value)
    }

    pub fn id(value: impl Into<String>) -> Self {
        Self::new(How::Id, value)
    }

    /// Returns true if the value is usable for a lookup
    pub fn is_valid(&self) -> bool {
        !self.value.trim().is_empty()
    }
}

impl fmt::Display for Identification {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.how, self.value)
    }
}
