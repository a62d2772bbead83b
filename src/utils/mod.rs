//! Utility functions and helpers.

pub mod http;
pub mod log;
pub mod text;

use url::Url;

/// Resolve a potentially relative URL against a base URL.
pub fn resolve_url(base: &Url, href: &str) -> String {
    base.join(href)
        .map(|u| u.to_string())
        .unwrap_or_else(|_| href.to_string())
}

/// Resolve a URL string against a base URL string.
pub fn resolve(base_url: &str, href: &str) -> Option<String> {
    Url::parse(base_url)
        .ok()
        .map(|base| resolve_url(&base, href))
}

/// Extract the post ID from a permalink such as `/user/status/123?s=20`.
pub fn extract_status_id(href: &str) -> Option<String> {
    let tail = href.split("/status/").nth(1)?;
    let id: String = tail.chars().take_while(|c| c.is_ascii_digit()).collect();
    if id.is_empty() { None } else { Some(id) }
}

/// Extract the author handle that precedes `/status/` in a permalink.
pub fn extract_status_author(href: &str) -> Option<String> {
    let (head, _) = href.split_once("/status/")?;
    let handle = head.rsplit('/').next()?.trim_start_matches('@');
    if handle.is_empty() || handle == "i" || handle == "web" {
        None
    } else {
        Some(handle.to_string())
    }
}

/// Build the canonical permalink for a post.
pub fn permalink_url(base_url: &str, author: &str, id: &str) -> String {
    let base = base_url.trim_end_matches('/');
    if author.is_empty() {
        format!("{base}/i/web/status/{id}")
    } else {
        format!("{base}/{author}/status/{id}")
    }
}

/// Percent-encode a search query for use in a query string.
pub fn encode_query(query: &str) -> String {
    url::form_urlencoded::byte_serialize(query.as_bytes()).collect()
}

/// Whether a URL contains any of the given markers (e.g. login flow paths).
pub fn url_matches_any(url: &str, markers: &[String]) -> bool {
    markers.iter().any(|m| !m.is_empty() && url.contains(m.as_str()))
}
