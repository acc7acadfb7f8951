use crate::UrlError;
use url::Url;

/// Normalizes the landing URL of a crawl
///
/// # Normalization Steps
///
/// 1. Parse the URL; reject if malformed
/// 2. Only `http`, `https` and `file` schemes are accepted
/// 3. Lowercase the host (the `url` crate already does this for special schemes)
/// 4. An empty path becomes `/`
///
/// Fragments are kept: client-side applications often route on them.
///
/// # Examples
///
/// ```
/// use sumi_flow::url::normalize_landing_url;
///
/// let url = normalize_landing_url("http://EXAMPLE.com").unwrap();
/// assert_eq!(url.as_str(), "http://example.com/");
/// ```
pub fn normalize_landing_url(url_str: &str) -> Result<Url, UrlError> {
    let url = Url::parse(url_str.trim()).map_err(|e| UrlError::Parse(e.to_string()))?;

    match url.scheme() {
        "http" | "https" => {
            if url.host_str().map_or(true, str::is_empty) {
                return Err(UrlError::MissingHost);
            }
        }
        "file" => {}
        other => {
            return Err(UrlError::InvalidScheme(format!(
                "Only HTTP, HTTPS and file schemes are supported, got: {}",
                other
            )));
        }
    }

    Ok(url)
}
