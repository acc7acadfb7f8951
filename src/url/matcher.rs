/// Checks if a host belongs to an allowed-host pattern
///
/// `example.com` allows only that host. `*.example.com` allows the bare
/// domain and every subdomain below it. Hosts are expected in lowercase.
///
/// # Examples
///
/// ```
/// use sumi_flow::url::matches_host_pattern;
///
/// assert!(matches_host_pattern("*.example.com", "cdn.example.com"));
/// assert!(matches_host_pattern("*.example.com", "example.com"));
/// assert!(!matches_host_pattern("*.example.com", "badexample.com"));
/// ```
pub fn matches_host_pattern(pattern: &str, host: &str) -> bool {
    match pattern.strip_prefix("*.") {
        Some(domain) => host
            .strip_suffix(domain)
            .is_some_and(|prefix| prefix.is_empty() || prefix.ends_with('.')),
        None => host == pattern,
    }
}

/// Checks if a URL matches a wait-condition URL pattern
///
/// Patterns without `*` match as a substring of the URL, so a pattern such as
/// `testWaitCondition.html` applies to every URL that mentions that page.
/// Patterns containing `*` are globs over the whole URL, where `*` matches
/// any run of characters.
///
/// # Examples
///
/// ```
/// use sumi_flow::url::matches_url_pattern;
///
/// assert!(matches_url_pattern("slow.html", "http://localhost/site/slow.html?x=1"));
/// assert!(matches_url_pattern("http://localhost/*/slow.html", "http://localhost/site/slow.html"));
/// assert!(!matches_url_pattern("http://localhost/*.php", "http://localhost/site/slow.html"));
/// ```
pub fn matches_url_pattern(pattern: &str, url: &str) -> bool {
    if !pattern.contains('*') {
        return url.contains(pattern);
    }

    let parts: Vec<&str> = pattern.split('*').collect();
    let last = parts.len() - 1;
    let mut rest = url;

    for (i, part) in parts.iter().enumerate() {
        if i == 0 {
            match rest.strip_prefix(part) {
                Some(r) => rest = r,
                None => return false,
            }
        } else if i == last {
            return rest.ends_with(part);
        } else {
            match rest.find(part) {
                Some(idx) => rest = &rest[idx + part.len()..],
                None => return false,
            }
        }
    }

    true
}
