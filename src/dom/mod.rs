//! DOM utilities
//!
//! Canonicalization of raw DOMs (strippers), element lookup by identification,
//! and the XPath subset used by crawl rules and conditions.

mod locate;
mod stripper;
mod xpath;

pub use locate::{locate, locate_first};
pub use stripper::{
    AttributeStripper, CommentStripper, DomStripper, DomStrippers, RegexStripper, TagStripper,
    WhitespaceStripper,
};
pub use xpath::{element_text, element_xpath, is_within, XPath, XPathError};

use scraper::Html;

/// Parses a DOM string into a queryable document
pub fn parse_dom(dom: &str) -> Html {
    Html::parse_document(dom)
}
