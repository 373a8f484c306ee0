//! Crossref enrichment, as a DB-level postprocessor, an in-memory
//! postprocessor, and the legacy combined feed processor.

use async_trait::async_trait;
use ednews_core::Entry;
use ednews_crossref::{
    extract_doi_from_entry, normalize_doi, title_suitable_for_lookup, CrossrefClient, WorkMetadata,
};
use ednews_db::{article_exists, attach_doi_to_item, ensure_article, upsert_article, ArticleUpsert, ItemRow};
use sqlx::SqlitePool;

use super::rss::RssPreprocessor;
use crate::error::FeedError;
use crate::processor::{
    DbPostprocessor, EntryPostprocessor, FetchContext, PostContext, Preprocessor,
};

/// DOI for an entry: taken from the entry itself when present, else looked up
/// by title.
async fn resolve_doi(client: &CrossrefClient, entry: &Entry, ctx: &PostContext) -> Option<String> {
    if let Some(doi) = extract_doi_from_entry(entry, ctx.publication_id.as_deref()) {
        return Some(doi);
    }
    let title = entry.title.as_deref()?.trim();
    if !title_suitable_for_lookup(title) {
        tracing::debug!(source = %ctx.source_key, title, "title not suitable for DOI lookup");
        return None;
    }
    client
        .lookup_doi_by_title_or_none(title, ctx.publication_id.as_deref())
        .await
}

fn article_from_metadata(meta: &WorkMetadata, fallback_title: Option<&str>, ctx: &PostContext) -> ArticleUpsert {
    ArticleUpsert {
        doi: meta.doi.clone(),
        title: meta.title.clone().or_else(|| fallback_title.map(str::to_owned)),
        authors: meta.authors.clone(),
        abstract_text: meta.abstract_text.clone(),
        crossref_raw: Some(meta.raw.clone()),
        feed_id: Some(ctx.source_key.clone()),
        publication_id: ctx.publication_id.clone(),
        issn: ctx.issn.clone(),
        published: meta.published.clone(),
    }
}

/// Copy Crossref metadata onto an entry, keeping fields the feed already
/// supplied where Crossref has nothing.
fn merge_metadata(mut entry: Entry, meta: WorkMetadata) -> Entry {
    entry.doi = Some(meta.doi);
    if entry.title.as_deref().is_none_or(|t| t.trim().is_empty()) {
        entry.title = meta.title;
    }
    if meta.authors.is_some() {
        entry.authors = meta.authors;
    }
    if meta.abstract_text.is_some() {
        entry.abstract_text = meta.abstract_text;
    }
    if meta.published.is_some() {
        entry.published = meta.published;
    }
    entry.crossref_raw = Some(meta.raw);
    entry
}

/// Looks up DOIs for stored items, writes Articles, and links items to them.
#[derive(Debug, Clone)]
pub struct CrossrefDbPostprocessor {
    client: CrossrefClient,
}

impl CrossrefDbPostprocessor {
    #[must_use]
    pub fn new(client: CrossrefClient) -> Self {
        Self { client }
    }

    async fn enrich_row(
        &self,
        pool: &SqlitePool,
        row: &ItemRow,
        ctx: &PostContext,
    ) -> Result<bool, FeedError> {
        let entry = row.to_entry();
        let Some(doi) = resolve_doi(&self.client, &entry, ctx).await else {
            return Ok(false);
        };
        let Some(doi) = normalize_doi(&doi) else {
            return Ok(false);
        };

        if !article_exists(pool, &doi).await? {
            match self.client.fetch_metadata_or_none(&doi).await {
                Some(meta) => {
                    let article = article_from_metadata(&meta, entry.title.as_deref(), ctx);
                    if !upsert_article(pool, &article, &ctx.title_filters).await? {
                        return Ok(false);
                    }
                }
                None => {
                    ensure_article(
                        pool,
                        &doi,
                        entry.title.as_deref(),
                        Some(&ctx.source_key),
                        ctx.publication_id.as_deref(),
                        ctx.issn.as_deref(),
                    )
                    .await?;
                }
            }
        }

        attach_doi_to_item(pool, row.id, &doi).await?;
        tracing::debug!(source = %ctx.source_key, item_id = row.id, doi = %doi, "linked item to article");
        Ok(true)
    }
}

#[async_trait]
impl DbPostprocessor for CrossrefDbPostprocessor {
    fn name(&self) -> &str {
        "crossref"
    }

    async fn run(
        &self,
        pool: &SqlitePool,
        rows: &[ItemRow],
        ctx: &PostContext,
    ) -> Result<usize, FeedError> {
        let mut enriched = 0usize;
        for row in rows.iter().filter(|r| r.doi.as_deref().is_none_or(str::is_empty)) {
            if self.enrich_row(pool, row, ctx).await? {
                enriched += 1;
            }
        }
        tracing::info!(source = %ctx.source_key, enriched, rows = rows.len(), "crossref enrichment done");
        Ok(enriched)
    }
}

/// Enriches fetched entries in memory; the orchestrator persists the result.
#[derive(Debug, Clone)]
pub struct CrossrefEnricher {
    name: String,
    client: CrossrefClient,
}

impl CrossrefEnricher {
    #[must_use]
    pub fn new(name: &str, client: CrossrefClient) -> Self {
        Self {
            name: name.to_owned(),
            client,
        }
    }

    /// Enrich every entry; entries without a resolvable DOI pass through.
    pub async fn enrich(&self, entries: &[Entry], ctx: &PostContext) -> Vec<Entry> {
        let mut out = Vec::with_capacity(entries.len());
        for entry in entries {
            let meta = match resolve_doi(&self.client, entry, ctx).await {
                Some(doi) => self.client.fetch_metadata_or_none(&doi).await,
                None => None,
            };
            out.push(match meta {
                Some(meta) => merge_metadata(entry.clone(), meta),
                None => entry.clone(),
            });
        }
        out
    }
}

#[async_trait]
impl EntryPostprocessor for CrossrefEnricher {
    fn name(&self) -> &str {
        &self.name
    }

    async fn run(
        &self,
        entries: &[Entry],
        ctx: &PostContext,
    ) -> Result<Option<Vec<Entry>>, FeedError> {
        Ok(Some(self.enrich(entries, ctx).await))
    }
}

/// Legacy processor that fetched RSS and enriched it in one step.
#[derive(Debug, Clone)]
pub struct CrossrefFeedPreprocessor {
    rss: RssPreprocessor,
    enricher: CrossrefEnricher,
}

impl CrossrefFeedPreprocessor {
    #[must_use]
    pub fn new(client: CrossrefClient) -> Self {
        Self {
            rss: RssPreprocessor::new("crossref_feed_processor"),
            enricher: CrossrefEnricher::new("crossref_feed_processor", client),
        }
    }
}

#[async_trait]
impl Preprocessor for CrossrefFeedPreprocessor {
    fn name(&self) -> &str {
        self.rss.name()
    }

    async fn fetch(&self, ctx: &FetchContext) -> Result<Vec<Entry>, FeedError> {
        let entries = self.rss.fetch(ctx).await?;
        let post = PostContext {
            source_key: ctx.source_key.clone(),
            publication_id: ctx.publication_id.clone(),
            issn: ctx.issn.clone(),
            title_filters: Vec::new(),
        };
        Ok(self.enricher.enrich(&entries, &post).await)
    }
}
