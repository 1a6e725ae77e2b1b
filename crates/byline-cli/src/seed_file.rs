//! Seed-file shim: adapts the upstream discovery export to [`SeedUrl`]
//! rows. The export is a tab-separated table with at least the columns
//! `url`, `publish_date`, `source`, `themes`, `tone_scores`; the upstream
//! loader owns the format, this module only normalizes, allowlists, and
//! carries the pass-through fields.

use std::path::Path;

use chrono::{DateTime, NaiveDateTime, Utc};

use byline_core::models::SeedUrl;
use byline_core::normalize;

pub struct LoadedSeeds {
    /// Data rows read (header excluded).
    pub read: usize,
    /// Normalized, allowlisted seed rows.
    pub records: Vec<SeedUrl>,
}

pub async fn load(path: &Path) -> anyhow::Result<LoadedSeeds> {
    let raw = tokio::fs::read_to_string(path).await?;
    let mut lines = raw.lines();

    let header = lines.next().unwrap_or_default();
    let columns: Vec<&str> = header.split('\t').map(str::trim).collect();
    let idx = |name: &str| columns.iter().position(|c| c.eq_ignore_ascii_case(name));
    let url_idx = idx("url")
        .ok_or_else(|| anyhow::anyhow!("seed file has no 'url' column in header"))?;
    let date_idx = idx("publish_date");
    let themes_idx = idx("themes");
    let tone_idx = idx("tone_scores");

    let mut read = 0usize;
    let mut records = Vec::new();
    for line in lines {
        if line.trim().is_empty() {
            continue;
        }
        read += 1;
        let fields: Vec<&str> = line.split('\t').collect();
        let Some(raw_url) = fields.get(url_idx) else {
            continue;
        };
        let Some(normalized_url) = normalize::normalize_url(raw_url) else {
            tracing::debug!(url = raw_url, "Discarding unparseable URL");
            continue;
        };
        // Off-allowlist hosts are discarded, never inserted.
        let Some(source) = normalize::source_for_url(&normalized_url) else {
            continue;
        };

        let field = |idx: Option<usize>| -> Option<String> {
            idx.and_then(|i| fields.get(i))
                .map(|s| s.trim())
                .filter(|s| !s.is_empty())
                .map(String::from)
        };

        records.push(SeedUrl {
            normalized_url,
            source: source.to_string(),
            gdelt_publish_date: field(date_idx).as_deref().and_then(parse_upstream_date),
            gdelt_themes: field(themes_idx),
            gdelt_tone: field(tone_idx),
        });
    }

    Ok(LoadedSeeds { read, records })
}

/// Upstream dates arrive either as RFC 3339 or as the compact
/// `YYYYMMDDHHMMSS` form.
fn parse_upstream_date(raw: &str) -> Option<DateTime<Utc>> {
    if let Ok(dt) = DateTime::parse_from_rfc3339(raw) {
        return Some(dt.with_timezone(&Utc));
    }
    if let Ok(naive) = NaiveDateTime::parse_from_str(raw, "%Y%m%d%H%M%S") {
        return Some(naive.and_utc());
    }
    None
}
