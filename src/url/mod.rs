//! URL handling module for Sumi-Flow
//!
//! This module provides landing-URL normalization, host scope checks (to
//! notice when an event navigated the browser off the application) and the
//! URL-pattern matching used by wait conditions.

mod matcher;
mod normalize;

use url::Url;

// Re-export main functions
pub use matcher::{matches_host_pattern, matches_url_pattern};
pub use normalize::normalize_landing_url;

/// Extracts the lowercase host from a URL string
///
/// Returns `None` for unparsable URLs and URLs without a host
/// (`about:blank`, `data:` documents and the like).
pub fn extract_host(url: &str) -> Option<String> {
    Url::parse(url)
        .ok()
        .and_then(|u| u.host_str().map(|h| h.to_lowercase()))
}

/// Checks whether `current` still belongs to the application rooted at `landing`
///
/// A URL is in scope when its host equals the landing host, or matches one of
/// the additional host patterns (which may use the `*.` wildcard form).
/// URLs without a host (e.g. `about:blank`) are considered in scope since
/// they are produced by in-page navigation of frames and popups.
///
/// # Examples
///
/// ```
/// use sumi_flow::url::is_in_scope;
/// use url::Url;
///
/// let landing = Url::parse("http://example.com/app/").unwrap();
/// assert!(is_in_scope(&landing, "http://example.com/app/#/detail", &[]));
/// assert!(!is_in_scope(&landing, "http://other.org/", &[]));
/// assert!(is_in_scope(&landing, "http://cdn.example.org/", &["*.example.org".to_string()]));
/// ```
pub fn is_in_scope(landing: &Url, current: &str, extra_hosts: &[String]) -> bool {
    let Some(host) = extract_host(current) else {
        return true;
    };

    let landing_host = landing.host_str().map(|h| h.to_lowercase());
    if landing_host.as_deref() == Some(host.as_str()) {
        return true;
    }

    extra_hosts
        .iter()
        .any(|pattern| matches_host_pattern(&pattern.to_lowercase(), &host))
}
