//! Element lookup by [`Identification`]

use crate::dom::xpath::{element_text, XPath, XPathError};
use crate::state::{How, Identification};
use scraper::{ElementRef, Html, Selector};

/// Finds every element named by `identification`, in document order
pub fn locate<'a>(
    doc: &'a Html,
    identification: &Identification,
) -> Result<Vec<ElementRef<'a>>, XPathError> {
    let value = identification.value.trim();
    let all = || doc.root_element().descendants().filter_map(ElementRef::wrap);

    let found = match identification.how {
        How::Xpath => XPath::parse(value)?.select(doc),
        How::Css => {
            let selector =
                Selector::parse(value).map_err(|_| XPathError::InvalidSelector(value.to_string()))?;
            doc.select(&selector).collect()
        }
        How::Id => all().filter(|el| el.value().id() == Some(value)).collect(),
        How::Name => all()
            .filter(|el| el.value().attr("name") == Some(value))
            .collect(),
        How::Tag => all()
            .filter(|el| el.value().name().eq_ignore_ascii_case(value))
            .collect(),
        How::Text => all()
            .filter(|el| is_leafmost_match(*el, |text| text == value))
            .collect(),
        How::PartialText => all()
            .filter(|el| is_leafmost_match(*el, |text| text.contains(value)))
            .collect(),
        How::LinkText => all()
            .filter(|el| el.value().name().eq_ignore_ascii_case("a") && element_text(*el) == value)
            .collect(),
    };

    Ok(found)
}

/// Finds the first element named by `identification`
pub fn locate_first<'a>(
    doc: &'a Html,
    identification: &Identification,
) -> Result<Option<ElementRef<'a>>, XPathError> {
    Ok(locate(doc, identification)?.into_iter().next())
}

/// Text matches select the innermost elements whose text matches, otherwise
/// every ancestor with the same text up to `<html>` would match as well
fn is_leafmost_match(el: ElementRef<'_>, matches: impl Fn(&str) -> bool) -> bool {
    matches(&element_text(el))
        && !el
            .children()
            .filter_map(ElementRef::wrap)
            .any(|child| matches(&element_text(child)))
}
