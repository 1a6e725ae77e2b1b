//! The per-URL extraction cascade.
//!
//! Five stages, evaluated in order: path pre-filter, HTTP fetch with
//! retries, primary extraction, secondary extraction, headless-browser
//! fallback for paywall domains. Every path ends in a classified
//! [`UrlOutcome`] — `run` is total and never raises to the orchestrator.

use std::sync::Arc;

use chrono::{DateTime, Utc};

use crate::backoff;
use crate::config::AcquireConfig;
use crate::error::AcquireError;
use crate::models::{
    content_hash, word_count, BlockReason, NewArticle, PublishDateSource, UrlOutcome, UrlRecord,
    UrlStatus,
};
use crate::normalize;
use crate::traits::{ArticleExtractor, BrowserFetcher, Extracted, FetchResponse, Fetcher};

/// Divergence tolerance between an extracted publish date and the
/// upstream-supplied one before the record is flagged.
const DATE_DIVERGENCE_DAYS: i64 = 7;

pub struct Cascade<F, B> {
    fetcher: F,
    primary: Arc<dyn ArticleExtractor>,
    secondary: Arc<dyn ArticleExtractor>,
    /// `None` disables the browser fallback entirely.
    browser: Option<B>,
    config: Arc<AcquireConfig>,
}

impl<F, B> Cascade<F, B>
where
    F: Fetcher,
    B: BrowserFetcher,
{
    pub fn new(
        fetcher: F,
        primary: Arc<dyn ArticleExtractor>,
        secondary: Arc<dyn ArticleExtractor>,
        browser: Option<B>,
        config: Arc<AcquireConfig>,
    ) -> Self {
        Self {
            fetcher,
            primary,
            secondary,
            browser,
            config,
        }
    }

    /// Process one claimed URL to a terminal outcome.
    pub async fn run(&self, record: &UrlRecord) -> UrlOutcome {
        let url = record.normalized_url.as_str();

        // Stage 1: pre-filter. No fetch for non-prose paths.
        if normalize::is_non_prose_path(url) {
            return UrlOutcome::failure(
                url,
                UrlStatus::Skipped,
                BlockReason::NonProsePath,
                "non-prose path segment",
            );
        }

        // Stage 2: HTTP fetch with retry on transient conditions.
        let body = match self.fetch_with_retries(url).await {
            Ok(body) => body,
            Err(outcome) => return outcome,
        };

        // Stage 3: primary extraction, configured for precision.
        let primary_out = self.extract_quietly(&self.primary, &body, url, "primary");
        if self.over_floor(&primary_out) {
            return self.validate(record, primary_out, "primary", &body);
        }

        // Stage 4: secondary extraction on the same HTML.
        let secondary_out = self.extract_quietly(&self.secondary, &body, url, "secondary");
        if self.over_floor(&secondary_out) {
            return self.validate(record, secondary_out, "secondary", &body);
        }

        // Stage 5: browser fallback, paywall domains only.
        let domain = normalize::registrable_domain(url).unwrap_or_default();
        if self.config.is_paywall_domain(&domain) {
            if let Some(browser) = &self.browser {
                return self
                    .browser_fallback(record, browser, url, &body, &secondary_out)
                    .await;
            }
        }

        self.classify_under_floor(url, &body, &best_text(&primary_out, &secondary_out))
    }

    /// Stage 5: render through the browser pool, re-feed the primary
    /// extractor on the rendered DOM.
    async fn browser_fallback(
        &self,
        record: &UrlRecord,
        browser: &B,
        url: &str,
        http_body: &str,
        secondary_out: &Extracted,
    ) -> UrlOutcome {
        tracing::debug!(%url, "Falling back to browser rendering");
        match browser.fetch_rendered(url).await {
            Ok(rendered) => {
                let rendered_out =
                    self.extract_quietly(&self.primary, &rendered, url, "browser+primary");
                if self.over_floor(&rendered_out) {
                    self.validate(record, rendered_out, "browser+primary", &rendered)
                } else {
                    self.classify_under_floor(
                        url,
                        &rendered,
                        &best_text(&rendered_out, secondary_out),
                    )
                }
            }
            Err(AcquireError::ProxyExhausted) => UrlOutcome::failure(
                url,
                UrlStatus::Skipped,
                BlockReason::NoProxy,
                "proxy pool empty for browser fallback",
            ),
            Err(e) => {
                // The browser path is best-effort; classify what the plain
                // HTTP response already told us rather than losing it.
                tracing::warn!(%url, error = %e, "Browser fallback failed");
                self.classify_under_floor(url, http_body, &secondary_out.text)
            }
        }
    }

    async fn fetch_with_retries(&self, url: &str) -> Result<String, UrlOutcome> {
        let max = self.config.max_attempts;
        let mut attempt = 1u32;
        loop {
            let transient = match self.fetcher.fetch(url).await {
                Ok(resp) if resp.is_success() => return Ok(resp.body),
                Ok(resp) if resp.status == 429 || resp.status >= 500 => {
                    if attempt >= max {
                        let reason = if resp.status == 429 {
                            BlockReason::RateLimited
                        } else {
                            BlockReason::Transport
                        };
                        return Err(UrlOutcome::failure(
                            url,
                            UrlStatus::ErrorNetwork,
                            reason,
                            format!("HTTP {} after {attempt} attempts", resp.status),
                        ));
                    }
                    format!("HTTP {}", resp.status)
                }
                Ok(resp) => return Err(classify_http_failure(url, &resp)),
                Err(e) if e.is_retryable() && attempt < max => e.to_string(),
                Err(e) => {
                    return Err(UrlOutcome::failure(
                        url,
                        UrlStatus::ErrorNetwork,
                        BlockReason::Transport,
                        e.to_string(),
                    ));
                }
            };

            let delay = backoff::retry_delay(attempt, self.config.retry_base);
            tracing::debug!(%url, attempt, cause = %transient, delay_ms = %delay.as_millis(), "Retrying fetch");
            tokio::time::sleep(delay).await;
            attempt += 1;
        }
    }

    /// Validation pass over a candidate extraction: length floor, text
    /// cleanup, date resolution, hashing.
    fn validate(
        &self,
        record: &UrlRecord,
        extracted: Extracted,
        extractor_used: &str,
        body: &str,
    ) -> UrlOutcome {
        let url = record.normalized_url.as_str();
        let text = clean_text(&extracted.text);
        if text.chars().count() < self.config.min_text_length {
            return self.classify_under_floor(url, body, &text);
        }

        let (publish_date, date_source, divergence_days) =
            resolve_publish_date(&extracted, record.gdelt_publish_date);

        let article = NewArticle {
            normalized_url: record.normalized_url.clone(),
            source: record.source.clone(),
            headline: extracted.headline.clone(),
            authors: extracted.authors.clone(),
            publish_date,
            publish_date_source: date_source,
            word_count: word_count(&text),
            content_hash: content_hash(&text),
            full_text: text,
        };

        let outcome = UrlOutcome::success(article, extractor_used);
        match divergence_days {
            Some(days) => outcome.with_note(format!("publish_date_divergence:{days}d")),
            None => outcome,
        }
    }

    /// HTTP 200 but nothing acceptable extracted: soft paywall if the page
    /// carries subscription keywords, otherwise a parse failure.
    fn classify_under_floor(&self, url: &str, body: &str, extracted_text: &str) -> UrlOutcome {
        let haystack = format!(
            "{} {}",
            body.to_lowercase(),
            extracted_text.to_lowercase()
        );
        if haystack.contains("subscribe") || haystack.contains("sign in") {
            UrlOutcome::failure(
                url,
                UrlStatus::PaywallSuspected,
                BlockReason::SoftPaywall,
                format!(
                    "extracted {} chars below floor {}, subscription keywords present",
                    extracted_text.chars().count(),
                    self.config.min_text_length
                ),
            )
        } else {
            UrlOutcome::failure(
                url,
                UrlStatus::ErrorParse,
                BlockReason::JsRequiredOrUnknown,
                format!(
                    "extracted {} chars below floor {}",
                    extracted_text.chars().count(),
                    self.config.min_text_length
                ),
            )
        }
    }

    fn over_floor(&self, extracted: &Extracted) -> bool {
        extracted.text.chars().count() >= self.config.extractor_floor
    }

    fn extract_quietly(
        &self,
        extractor: &Arc<dyn ArticleExtractor>,
        html: &str,
        url: &str,
        stage: &str,
    ) -> Extracted {
        match extractor.extract(html, url) {
            Ok(out) => out,
            Err(e) => {
                tracing::debug!(%url, stage, error = %e, "Extractor error, treating as empty");
                Extracted::default()
            }
        }
    }
}

/// Non-retryable HTTP statuses mapped to the failure taxonomy.
fn classify_http_failure(url: &str, resp: &FetchResponse) -> UrlOutcome {
    match resp.status {
        404 | 410 => UrlOutcome::failure(
            url,
            UrlStatus::Dead,
            BlockReason::Deleted,
            format!("HTTP {}", resp.status),
        ),
        403 => {
            let body = resp.body.to_lowercase();
            if resp.bot_header || body.contains("captcha") {
                UrlOutcome::failure(
                    url,
                    UrlStatus::ErrorNetwork,
                    BlockReason::BotDetection,
                    "HTTP 403 with anti-bot markers",
                )
            } else if body.contains("subscribe") || body.contains("log in") || body.contains("sign in")
            {
                UrlOutcome::failure(
                    url,
                    UrlStatus::PaywallSuspected,
                    BlockReason::Paywall,
                    "HTTP 403 with subscription markers",
                )
            } else {
                UrlOutcome::failure(
                    url,
                    UrlStatus::ErrorNetwork,
                    BlockReason::BotDetection,
                    "HTTP 403",
                )
            }
        }
        status => UrlOutcome::failure(
            url,
            UrlStatus::ErrorNetwork,
            BlockReason::Transport,
            format!("HTTP {status}"),
        ),
    }
}

/// Resolve the publish date in cascade priority: JSON-LD → OpenGraph →
/// secondary-extractor guess → upstream. Returns the divergence in days
/// when an extracted date and the upstream date disagree by more than the
/// tolerance.
fn resolve_publish_date(
    extracted: &Extracted,
    upstream: Option<DateTime<Utc>>,
) -> (
    Option<DateTime<Utc>>,
    Option<PublishDateSource>,
    Option<i64>,
) {
    let (date, source) = if let Some(d) = extracted.json_ld_date {
        (Some(d), Some(PublishDateSource::JsonLd))
    } else if let Some(d) = extracted.og_date {
        (Some(d), Some(PublishDateSource::OpenGraph))
    } else if let Some(d) = extracted.date_guess {
        (Some(d), Some(PublishDateSource::SecondaryExtractor))
    } else if let Some(d) = upstream {
        (Some(d), Some(PublishDateSource::Upstream))
    } else {
        (None, None)
    };

    let divergence = match (date, source, upstream) {
        (Some(chosen), Some(src), Some(up)) if src != PublishDateSource::Upstream => {
            let days = (chosen - up).num_days().abs();
            (days > DATE_DIVERGENCE_DAYS).then_some(days)
        }
        _ => None,
    };

    (date, source, divergence)
}

/// Strip NUL bytes, unescape leftover HTML entities, trim.
fn clean_text(text: &str) -> String {
    let without_nul: String = text.chars().filter(|c| *c != '\0').collect();
    unescape_entities(&without_nul).trim().to_string()
}

/// Best-effort unescape of the entities that survive extraction.
fn unescape_entities(s: &str) -> String {
    s.replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&quot;", "\"")
        .replace("&#39;", "'")
        .replace("&apos;", "'")
        .replace("&nbsp;", " ")
        .replace("&amp;", "&")
}

fn best_text(a: &Extracted, b: &Extracted) -> String {
    if a.text.chars().count() >= b.text.chars().count() {
        a.text.clone()
    } else {
        b.text.clone()
    }
}
