//! URL canonicalization, the publisher allowlist, and the non-prose path
//! filter.
//!
//! The normalized form is the unique key of the whole pipeline: https
//! scheme, lowercased host, tracking parameters stripped, fragment removed,
//! AMP variants collapsed, trailing slash normalized. Normalization is
//! idempotent — `normalize(normalize(u)) == normalize(u)`.

use url::Url;

/// Publisher allowlist: (host suffix, canonical source label).
const SOURCE_ALLOWLIST: &[(&str, &str)] = &[
    ("nytimes.com", "nytimes"),
    ("reuters.com", "reuters"),
    ("washingtonpost.com", "washingtonpost"),
    ("apnews.com", "apnews"),
    ("wsj.com", "wsj"),
];

/// Query parameters that carry tracking state, not content identity.
const TRACKING_PARAMS: &[&str] = &["ref", "s", "ncid", "fbclid", "mc_cid"];

/// Path segments that mark non-prose content; such URLs are skipped
/// without a fetch.
const NON_PROSE_SEGMENTS: &[&str] = &[
    "video",
    "podcast",
    "interactive",
    "live",
    "slideshow",
    "graphic",
];

/// Canonicalize a raw URL. Returns `None` when the input cannot be parsed
/// as an absolute http(s) URL.
pub fn normalize_url(raw: &str) -> Option<String> {
    let mut url = Url::parse(raw.trim()).ok()?;
    if !matches!(url.scheme(), "http" | "https") {
        return None;
    }
    url.host_str()?;

    // Scheme forced to https. The url crate lowercases hosts on parse.
    let _ = url.set_scheme("https");
    url.set_fragment(None);

    // Drop tracking parameters and the ?amp=1 marker.
    let kept: Vec<(String, String)> = url
        .query_pairs()
        .filter(|(k, _)| !is_tracking_param(k))
        .map(|(k, v)| (k.into_owned(), v.into_owned()))
        .collect();
    if kept.is_empty() {
        url.set_query(None);
    } else {
        let query = kept
            .iter()
            .map(|(k, v)| {
                if v.is_empty() {
                    k.clone()
                } else {
                    format!("{k}={v}")
                }
            })
            .collect::<Vec<_>>()
            .join("&");
        url.set_query(Some(&query));
    }

    // Collapse the /amp suffix and normalize the trailing slash.
    let mut path = url.path().to_string();
    while path.ends_with('/') && path.len() > 1 {
        path.pop();
    }
    if path == "/amp" {
        path = "/".into();
    } else if let Some(stripped) = path.strip_suffix("/amp") {
        path = stripped.to_string();
    }
    url.set_path(&path);

    Some(url.to_string())
}

fn is_tracking_param(key: &str) -> bool {
    key.starts_with("utm_") || key == "amp" || TRACKING_PARAMS.contains(&key)
}

/// Canonical publisher label for a host, or `None` when the host is not on
/// the allowlist. Matching is on label boundaries: `jp.reuters.com` and
/// `reuters.com` match, `fakereuters.com` does not.
pub fn source_for_host(host: &str) -> Option<&'static str> {
    let host = host.to_ascii_lowercase();
    SOURCE_ALLOWLIST
        .iter()
        .find(|(suffix, _)| host == *suffix || host.ends_with(&format!(".{suffix}")))
        .map(|(_, label)| *label)
}

/// Canonical source label for a URL, or `None` if the URL is off-allowlist
/// or unparseable.
pub fn source_for_url(url: &str) -> Option<&'static str> {
    let parsed = Url::parse(url).ok()?;
    source_for_host(parsed.host_str()?)
}

/// Rate-limiting / paywall-matching key: the allowlisted suffix when the
/// host is a known publisher, otherwise the last two host labels.
pub fn registrable_domain(url: &str) -> Option<String> {
    let parsed = Url::parse(url).ok()?;
    let host = parsed.host_str()?.to_ascii_lowercase();
    if let Some((suffix, _)) = SOURCE_ALLOWLIST
        .iter()
        .find(|(suffix, _)| host == *suffix || host.ends_with(&format!(".{suffix}")))
    {
        return Some((*suffix).to_string());
    }
    let labels: Vec<&str> = host.split('.').collect();
    if labels.len() >= 2 {
        Some(labels[labels.len() - 2..].join("."))
    } else {
        Some(host)
    }
}

/// True when the URL's path contains a segment that marks non-prose
/// content (video, podcast, interactive, live, slideshow, graphic).
pub fn is_non_prose_path(url: &str) -> bool {
    let Ok(parsed) = Url::parse(url) else {
        return false;
    };
    parsed
        .path()
        .split('/')
        .any(|segment| NON_PROSE_SEGMENTS.contains(&segment))
}
