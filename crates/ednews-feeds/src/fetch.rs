//! Concurrent fetch of every configured source.
//!
//! Fetches overlap up to `max_concurrent` and are all drained before anything
//! is written; persisting and postprocessing then run one source at a time.
//! A failing source is recorded in its [`SourceReport`] and never stops the
//! run.

use std::collections::HashSet;
use std::time::Duration;

use ednews_core::{AppConfig, Entry};
use ednews_db::{
    list_items_for_feed, save_headlines, save_items, upsert_article, ArticleUpsert, ItemRow,
};
use futures::stream::{self, StreamExt};
use sqlx::SqlitePool;

use crate::error::FeedError;
use crate::processor::{FetchContext, PostContext, Postprocessor};
use crate::registry::ResolvedSource;

/// Rows handed to DB-level postprocessors per source.
pub(crate) const POST_ROW_LIMIT: i64 = 2000;

/// Build the HTTP client shared by every preprocessor.
///
/// # Errors
///
/// Returns [`FeedError::Http`] if the TLS backend cannot be initialized.
pub fn build_http_client(config: &AppConfig) -> Result<reqwest::Client, FeedError> {
    let timeout = Duration::from_secs(config.fetch_timeout_secs.max(1));
    let client = reqwest::Client::builder()
        .user_agent(config.user_agent.clone())
        .timeout(timeout)
        .connect_timeout(timeout.min(Duration::from_secs(10)))
        .build()?;
    Ok(client)
}

/// Where a run persists fetched entries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SaveTarget {
    /// Research feeds: `items`.
    #[default]
    Items,
    /// News sources: `headlines`.
    Headlines,
}

#[derive(Debug, Clone)]
pub struct FetchOptions {
    pub max_concurrent: usize,
    pub target: SaveTarget,
    pub title_filters: Vec<String>,
}

impl Default for FetchOptions {
    fn default() -> Self {
        Self {
            max_concurrent: 8,
            target: SaveTarget::Items,
            title_filters: Vec::new(),
        }
    }
}

impl FetchOptions {
    #[must_use]
    pub fn from_app_config(config: &AppConfig, target: SaveTarget) -> Self {
        Self {
            max_concurrent: config.fetch_max_concurrent,
            target,
            title_filters: config.title_filters.clone(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SourceStatus {
    Ok,
    Failed(String),
    /// Nothing to fetch (no usable URL).
    Skipped(String),
}

#[derive(Debug, Clone)]
pub struct SourceReport {
    pub source_key: String,
    /// Entries with content after merging every preprocessor's output.
    pub fetched: usize,
    /// Newly created rows.
    pub saved: usize,
    pub enriched: usize,
    pub post_failures: usize,
    pub status: SourceStatus,
}

impl SourceReport {
    fn new(source_key: &str) -> Self {
        Self {
            source_key: source_key.to_owned(),
            fetched: 0,
            saved: 0,
            enriched: 0,
            post_failures: 0,
            status: SourceStatus::Ok,
        }
    }

    #[must_use]
    pub fn is_failed(&self) -> bool {
        matches!(self.status, SourceStatus::Failed(_))
    }
}

#[derive(Debug, Clone, Default)]
pub struct FetchSummary {
    pub reports: Vec<SourceReport>,
    pub saved: usize,
    pub failed: usize,
}

impl FetchSummary {
    #[must_use]
    pub fn has_failures(&self) -> bool {
        self.failed > 0
    }

    /// Some sources failed and at least one did not.
    #[must_use]
    pub fn is_partial_failure(&self) -> bool {
        self.failed > 0 && self.failed < self.reports.len()
    }

    #[must_use]
    pub fn all_failed(&self) -> bool {
        !self.reports.is_empty() && self.failed == self.reports.len()
    }

    #[must_use]
    pub fn report(&self, source_key: &str) -> Option<&SourceReport> {
        self.reports.iter().find(|r| r.source_key == source_key)
    }
}

/// URL for a source: its `feed`, or its `link` when every preprocessor can
/// read a page URL.
fn source_url(resolved: &ResolvedSource) -> Option<String> {
    let feed = resolved
        .source
        .feed
        .as_deref()
        .map(str::trim)
        .filter(|f| !f.is_empty());
    if let Some(feed) = feed {
        return Some(feed.to_owned());
    }
    if !resolved.pre.is_empty() && resolved.pre.iter().all(|p| p.accepts_page_url()) {
        return resolved.source.fetch_url().map(str::to_owned);
    }
    None
}

/// Run each preprocessor in order and merge their output, dropping
/// duplicates by feed identity and entries without content.
async fn fetch_source(
    client: &reqwest::Client,
    resolved: &ResolvedSource,
    url: String,
) -> Result<Vec<Entry>, FeedError> {
    let ctx = FetchContext {
        client: client.clone(),
        source_key: resolved.source.key.clone(),
        url,
        publication_id: resolved.source.publication_id.clone(),
        issn: resolved.source.issn.clone(),
    };

    let mut seen = HashSet::new();
    let mut merged = Vec::new();
    for pre in &resolved.pre {
        for entry in pre.fetch(&ctx).await? {
            if !entry.has_content() {
                continue;
            }
            if let Some(id) = entry.identity() {
                if !seen.insert(id.to_owned()) {
                    continue;
                }
            }
            merged.push(entry);
        }
    }
    Ok(merged)
}

pub(crate) fn post_context(resolved: &ResolvedSource, options: &FetchOptions) -> PostContext {
    PostContext {
        source_key: resolved.source.key.clone(),
        publication_id: resolved.source.publication_id.clone(),
        issn: resolved.source.issn.clone(),
        title_filters: options.title_filters.clone(),
    }
}

/// Persist enriched entries through the article upsert path. Entries without
/// a DOI are left alone.
async fn persist_enriched(
    pool: &SqlitePool,
    entries: &[Entry],
    ctx: &PostContext,
) -> Result<usize, FeedError> {
    let mut written = 0usize;
    for entry in entries {
        let Some(doi) = entry.doi.as_deref().filter(|d| !d.trim().is_empty()) else {
            continue;
        };
        let article = ArticleUpsert {
            doi: doi.to_owned(),
            title: entry.title.clone(),
            authors: entry.authors.clone(),
            abstract_text: entry.abstract_text.clone(),
            crossref_raw: entry.crossref_raw.clone(),
            feed_id: Some(ctx.source_key.clone()),
            publication_id: ctx.publication_id.clone(),
            issn: ctx.issn.clone(),
            published: entry.published.clone(),
        };
        if upsert_article(pool, &article, &ctx.title_filters).await? {
            written += 1;
        }
    }
    Ok(written)
}

/// Run the source's postprocessors over what was just persisted. Failures are
/// counted on the report; they never fail the source.
async fn run_postprocessors(
    pool: &SqlitePool,
    resolved: &ResolvedSource,
    mut entries: Vec<Entry>,
    options: &FetchOptions,
    report: &mut SourceReport,
) {
    let ctx = post_context(resolved, options);
    for post in &resolved.post {
        let outcome = match post {
            Postprocessor::Db(p) => match list_items_for_feed(pool, &ctx.source_key, POST_ROW_LIMIT).await {
                Ok(rows) => p.run(pool, &rows, &ctx).await,
                Err(e) => Err(e.into()),
            },
            Postprocessor::InMemory(p) => match p.run(&entries, &ctx).await {
                Ok(Some(out)) => {
                    let written = persist_enriched(pool, &out, &ctx).await;
                    entries = out;
                    written
                }
                Ok(None) => Ok(0),
                Err(e) => Err(e),
            },
        };
        match outcome {
            Ok(n) => report.enriched += n,
            Err(e) => {
                report.post_failures += 1;
                tracing::warn!(
                    source = %ctx.source_key,
                    postprocessor = post.name(),
                    error = %e,
                    "postprocessor failed"
                );
            }
        }
    }
}

/// Fetch, persist and postprocess every source.
///
/// Per-source failures (network, HTTP status, parse, storage) are captured
/// in the returned summary; this function itself does not fail.
pub async fn run_fetch(
    pool: &SqlitePool,
    client: &reqwest::Client,
    sources: &[ResolvedSource],
    options: &FetchOptions,
) -> FetchSummary {
    let max_concurrent = options.max_concurrent.max(1);
    let mut summary = FetchSummary::default();

    // Slow writes or postprocessors must not hold up in-flight requests.
    let fetched: Vec<_> = stream::iter(sources)
        .map(|resolved| async move {
            let outcome = match source_url(resolved) {
                Some(url) => Some(fetch_source(client, resolved, url).await),
                None => None,
            };
            (resolved, outcome)
        })
        .buffer_unordered(max_concurrent)
        .collect()
        .await;

    for (resolved, outcome) in fetched {
        let key = resolved.source.key.as_str();
        let mut report = SourceReport::new(key);

        match outcome {
            None => {
                tracing::info!(source = key, "skipping source without a usable URL");
                report.status = SourceStatus::Skipped("no feed URL".to_owned());
            }
            Some(Err(e)) => {
                tracing::warn!(source = key, error = %e, "source fetch failed");
                report.status = SourceStatus::Failed(e.to_string());
            }
            Some(Ok(entries)) => {
                report.fetched = entries.len();
                let saved = match options.target {
                    SaveTarget::Items => save_items(pool, key, &entries, &options.title_filters).await,
                    SaveTarget::Headlines => save_headlines(pool, key, &entries).await,
                };
                match saved {
                    Ok(n) => {
                        report.saved = n;
                        run_postprocessors(pool, resolved, entries, options, &mut report).await;
                    }
                    Err(e) => {
                        tracing::error!(source = key, error = %e, "failed to persist source batch");
                        report.status = SourceStatus::Failed(FeedError::from(e).to_string());
                    }
                }
            }
        }

        tracing::info!(
            source = key,
            fetched = report.fetched,
            saved = report.saved,
            enriched = report.enriched,
            "source done"
        );
        summary.saved += report.saved;
        if report.is_failed() {
            summary.failed += 1;
        }
        summary.reports.push(report);
    }

    if summary.has_failures() {
        tracing::warn!(
            failed = summary.failed,
            total = summary.reports.len(),
            "some sources failed during fetch"
        );
    }
    summary
}

/// Re-run postprocessors over items already stored, without fetching.
///
/// Sources with no postprocessors are left out of the summary. `fetched`
/// on each report counts the stored rows that were offered.
pub async fn run_postprocess(
    pool: &SqlitePool,
    sources: &[ResolvedSource],
    options: &FetchOptions,
) -> FetchSummary {
    let mut summary = FetchSummary::default();
    for resolved in sources.iter().filter(|s| !s.post.is_empty()) {
        let key = resolved.source.key.as_str();
        let mut report = SourceReport::new(key);
        match list_items_for_feed(pool, key, POST_ROW_LIMIT).await {
            Ok(rows) => {
                report.fetched = rows.len();
                let entries = rows.iter().map(ItemRow::to_entry).collect();
                run_postprocessors(pool, resolved, entries, options, &mut report).await;
            }
            Err(e) => {
                tracing::error!(source = key, error = %e, "failed to load stored items");
                report.status = SourceStatus::Failed(FeedError::from(e).to_string());
                summary.failed += 1;
            }
        }
        tracing::info!(source = key, rows = report.fetched, enriched = report.enriched, "postprocess done");
        summary.reports.push(report);
    }
    summary
}
