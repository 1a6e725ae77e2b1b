//! Article-body extraction.
//!
//! Two extractors with one contract: best-effort prose plus whatever
//! document metadata is visible (JSON-LD, OpenGraph, `<time>` elements).
//! The primary extractor runs readability's content scoring, tuned for
//! precision — navigation, comments, and tabular boilerplate score out.
//! The secondary is a paragraph harvest over progressively less specific
//! selectors, for documents whose markup defeats the scorer. Both decode
//! HTML entities as a side effect of DOM parsing.

use std::io::Cursor;

use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};
use scraper::{Html, Selector};
use url::Url;

use byline_core::traits::{ArticleExtractor, Extracted};
use byline_core::AcquireError;

/// Selector ladders for the paragraph harvest, most specific first.
const PARAGRAPH_SELECTORS: &[&str] = &["article p", "main p", "div[class*=\"article\"] p", "p"];

/// Joined-paragraph length at which a selector rung is accepted without
/// trying less specific ones.
const HARVEST_ACCEPT_CHARS: usize = 200;

/// Readability-based extractor (content scoring, link-density pruning).
#[derive(Clone, Default)]
pub struct PrimaryExtractor;

impl PrimaryExtractor {
    pub fn new() -> Self {
        Self
    }
}

impl ArticleExtractor for PrimaryExtractor {
    fn extract(&self, html: &str, url: &str) -> Result<Extracted, AcquireError> {
        let parsed_url =
            Url::parse(url).map_err(|e| AcquireError::Extraction(format!("bad url {url}: {e}")))?;
        let mut reader = Cursor::new(html.as_bytes());
        let product = readability::extractor::extract(&mut reader, &parsed_url)
            .map_err(|e| AcquireError::Extraction(format!("readability: {e:?}")))?;

        let document = Html::parse_document(html);
        let meta = PageMeta::parse(&document);
        let headline = meta.headline.clone().or_else(|| non_empty(product.title));

        Ok(Extracted {
            text: product.text,
            headline,
            authors: meta.authors,
            json_ld_date: meta.json_ld_date,
            og_date: meta.og_date,
            date_guess: meta.time_guess,
        })
    }
}

/// Paragraph-harvest extractor used when readability comes back empty.
#[derive(Clone, Default)]
pub struct SecondaryExtractor;

impl SecondaryExtractor {
    pub fn new() -> Self {
        Self
    }
}

impl ArticleExtractor for SecondaryExtractor {
    fn extract(&self, html: &str, _url: &str) -> Result<Extracted, AcquireError> {
        let document = Html::parse_document(html);
        let meta = PageMeta::parse(&document);

        let mut best = String::new();
        for selector_str in PARAGRAPH_SELECTORS {
            let text = harvest_paragraphs(&document, selector_str);
            if text.chars().count() >= HARVEST_ACCEPT_CHARS {
                best = text;
                break;
            }
            if text.chars().count() > best.chars().count() {
                best = text;
            }
        }

        Ok(Extracted {
            text: best,
            headline: meta.headline,
            authors: meta.authors,
            json_ld_date: meta.json_ld_date,
            og_date: meta.og_date,
            date_guess: meta.time_guess,
        })
    }
}

fn harvest_paragraphs(document: &Html, selector_str: &str) -> String {
    let selector = Selector::parse(selector_str).expect("static selector");
    document
        .select(&selector)
        .map(|p| {
            p.text()
                .collect::<Vec<_>>()
                .join(" ")
                .split_whitespace()
                .collect::<Vec<_>>()
                .join(" ")
        })
        .filter(|t| !t.is_empty())
        .collect::<Vec<_>>()
        .join("\n\n")
}

// ---------------------------------------------------------------------------
// Page metadata (shared by both extractors)
// ---------------------------------------------------------------------------

#[derive(Debug, Default)]
struct PageMeta {
    headline: Option<String>,
    authors: Vec<String>,
    json_ld_date: Option<DateTime<Utc>>,
    og_date: Option<DateTime<Utc>>,
    time_guess: Option<DateTime<Utc>>,
}

impl PageMeta {
    fn parse(document: &Html) -> Self {
        let mut meta = Self::default();

        let json_ld = Selector::parse(r#"script[type="application/ld+json"]"#)
            .expect("static selector");
        for script in document.select(&json_ld) {
            let raw: String = script.text().collect();
            if let Ok(value) = serde_json::from_str::<serde_json::Value>(&raw) {
                walk_json_ld(&value, &mut meta);
            }
        }

        if meta.og_date.is_none() {
            meta.og_date =
                meta_content(document, r#"meta[property="article:published_time"]"#)
                    .as_deref()
                    .and_then(parse_date);
        }
        if meta.headline.is_none() {
            meta.headline = meta_content(document, r#"meta[property="og:title"]"#);
        }
        if meta.authors.is_empty() {
            if let Some(author) = meta_content(document, r#"meta[name="author"]"#) {
                meta.authors.push(author);
            }
        }
        if meta.time_guess.is_none() {
            let time = Selector::parse("time[datetime]").expect("static selector");
            meta.time_guess = document
                .select(&time)
                .filter_map(|el| el.value().attr("datetime"))
                .find_map(parse_date);
        }
        if meta.time_guess.is_none() {
            meta.time_guess = meta_content(document, r#"meta[itemprop="datePublished"]"#)
                .as_deref()
                .and_then(parse_date);
        }

        meta
    }
}

fn meta_content(document: &Html, selector_str: &str) -> Option<String> {
    let selector = Selector::parse(selector_str).expect("static selector");
    document
        .select(&selector)
        .filter_map(|el| el.value().attr("content"))
        .map(str::trim)
        .find(|c| !c.is_empty())
        .map(String::from)
}

/// Recursively walk a JSON-LD document (including `@graph` wrappers) for
/// `datePublished`, `headline`, and `author`.
fn walk_json_ld(value: &serde_json::Value, meta: &mut PageMeta) {
    match value {
        serde_json::Value::Array(items) => {
            for item in items {
                walk_json_ld(item, meta);
            }
        }
        serde_json::Value::Object(map) => {
            if let Some(graph) = map.get("@graph") {
                walk_json_ld(graph, meta);
            }
            if meta.json_ld_date.is_none() {
                meta.json_ld_date = map
                    .get("datePublished")
                    .and_then(|v| v.as_str())
                    .and_then(parse_date);
            }
            if meta.headline.is_none() {
                meta.headline = map
                    .get("headline")
                    .and_then(|v| v.as_str())
                    .map(str::trim)
                    .filter(|s| !s.is_empty())
                    .map(String::from);
            }
            if meta.authors.is_empty() {
                if let Some(author) = map.get("author") {
                    meta.authors = author_names(author);
                }
            }
        }
        _ => {}
    }
}

fn author_names(value: &serde_json::Value) -> Vec<String> {
    match value {
        serde_json::Value::String(s) if !s.trim().is_empty() => vec![s.trim().to_string()],
        serde_json::Value::Object(map) => map
            .get("name")
            .and_then(|v| v.as_str())
            .map(|s| vec![s.trim().to_string()])
            .unwrap_or_default(),
        serde_json::Value::Array(items) => items.iter().flat_map(author_names).collect(),
        _ => Vec::new(),
    }
}

/// Lenient publish-date parsing: RFC 3339 first, then the shapes publishers
/// actually emit.
fn parse_date(raw: &str) -> Option<DateTime<Utc>> {
    let raw = raw.trim();
    if let Ok(dt) = DateTime::parse_from_rfc3339(raw) {
        return Some(dt.with_timezone(&Utc));
    }
    for format in ["%Y-%m-%dT%H:%M:%S%.f%z", "%Y-%m-%d %H:%M:%S%z"] {
        if let Ok(dt) = DateTime::parse_from_str(raw, format) {
            return Some(dt.with_timezone(&Utc));
        }
    }
    if let Ok(naive) = NaiveDateTime::parse_from_str(raw, "%Y-%m-%dT%H:%M:%S") {
        return Some(naive.and_utc());
    }
    if let Ok(date) = NaiveDate::parse_from_str(raw, "%Y-%m-%d") {
        return Some(date.and_hms_opt(0, 0, 0)?.and_utc());
    }
    None
}

fn non_empty(s: String) -> Option<String> {
    let trimmed = s.trim();
    if trimmed.is_empty() {
        None
    } else {
        Some(trimmed.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const ARTICLE_HTML: &str = r#"<!DOCTYPE html>
<html>
<head>
  <title>Fallback Title</title>
  <meta property="og:title" content="Markets Rally After Rate Decision">
  <meta property="article:published_time" content="2024-04-02T09:30:00Z">
  <script type="application/ld+json">
  {
    "@context": "https://schema.org",
    "@type": "NewsArticle",
    "headline": "Markets Rally After Rate Decision",
    "datePublished": "2024-04-02T09:15:00+00:00",
    "author": [{"@type": "Person", "name": "Jane Doe"}, {"@type": "Person", "name": "John Smith"}]
  }
  </script>
</head>
<body>
  <nav><p>Home</p></nav>
  <article>
    <p>Stocks surged on Tuesday after the central bank held rates steady, a decision that traders had largely anticipated but that nonetheless removed a cloud of uncertainty hanging over equity markets since the start of the quarter.</p>
    <p>Analysts said the move, paired with unusually dovish language in the accompanying statement, suggested policymakers now see inflation returning to target without further tightening, a scenario that would support risk assets through the remainder of the year.</p>
    <p>Bond yields fell across the curve &amp; the dollar weakened against a basket of major currencies, extending a slide that began last week when softer-than-expected labor data first raised hopes of an earlier pivot.</p>
  </article>
</body>
</html>"#;

    #[test]
    fn secondary_harvests_article_paragraphs() {
        let extracted = SecondaryExtractor::new()
            .extract(ARTICLE_HTML, "https://www.reuters.com/markets/x")
            .unwrap();

        assert!(extracted.text.contains("Stocks surged on Tuesday"));
        assert!(extracted.text.contains("Bond yields fell"));
        assert!(
            !extracted.text.contains("Home"),
            "nav content must not pass the specific selectors"
        );
        // Entities decoded by the DOM parser.
        assert!(extracted.text.contains("curve & the dollar"));
    }

    #[test]
    fn metadata_resolved_from_json_ld_and_opengraph() {
        let extracted = SecondaryExtractor::new()
            .extract(ARTICLE_HTML, "https://www.reuters.com/markets/x")
            .unwrap();

        assert_eq!(
            extracted.headline.as_deref(),
            Some("Markets Rally After Rate Decision")
        );
        assert_eq!(extracted.authors, vec!["Jane Doe", "John Smith"]);
        assert_eq!(
            extracted.json_ld_date.unwrap().to_rfc3339(),
            "2024-04-02T09:15:00+00:00"
        );
        assert_eq!(
            extracted.og_date.unwrap().to_rfc3339(),
            "2024-04-02T09:30:00+00:00"
        );
    }

    #[test]
    fn primary_extracts_prose_body() {
        let extracted = PrimaryExtractor::new()
            .extract(ARTICLE_HTML, "https://www.reuters.com/markets/x")
            .unwrap();

        assert!(extracted.text.contains("central bank held rates steady"));
        assert_eq!(
            extracted.headline.as_deref(),
            Some("Markets Rally After Rate Decision")
        );
    }

    #[test]
    fn paragraph_harvest_falls_back_to_bare_paragraphs() {
        let html = r#"<html><body>
            <div><p>First sentence of a story with no article element at all, padded out far enough to be counted as real prose rather than navigation chrome for the harvest threshold check.</p>
            <p>Second sentence continuing the story with more than enough length to matter.</p></div>
        </body></html>"#;
        let extracted = SecondaryExtractor::new()
            .extract(html, "https://apnews.com/x")
            .unwrap();
        assert!(extracted.text.contains("First sentence"));
        assert!(extracted.text.contains("Second sentence"));
    }

    #[test]
    fn time_element_feeds_the_date_guess() {
        let html = r#"<html><body>
            <time datetime="2024-06-01T08:00:00Z">June 1</time>
            <p>Body text.</p>
        </body></html>"#;
        let extracted = SecondaryExtractor::new()
            .extract(html, "https://apnews.com/x")
            .unwrap();
        assert_eq!(
            extracted.date_guess.unwrap().to_rfc3339(),
            "2024-06-01T08:00:00+00:00"
        );
    }

    #[test]
    fn date_parsing_accepts_common_shapes() {
        assert!(parse_date("2024-04-02T09:15:00+00:00").is_some());
        assert!(parse_date("2024-04-02T09:15:00.123Z").is_some());
        assert!(parse_date("2024-04-02T09:15:00").is_some());
        assert!(parse_date("2024-04-02").is_some());
        assert!(parse_date("yesterday").is_none());
    }

    #[test]
    fn json_ld_graph_wrapper_is_walked() {
        let html = r#"<html><head><script type="application/ld+json">
        {"@graph": [{"@type": "NewsArticle", "datePublished": "2024-01-15", "author": "Wire Desk"}]}
        </script></head><body><p>x</p></body></html>"#;
        let extracted = SecondaryExtractor::new()
            .extract(html, "https://apnews.com/x")
            .unwrap();
        assert!(extracted.json_ld_date.is_some());
        assert_eq!(extracted.authors, vec!["Wire Desk"]);
    }
}
