//! Pull the latest works of each journal straight from Crossref by ISSN,
//! independent of what the journal's feed currently lists.

use ednews_core::FeedSource;
use ednews_crossref::{CrossrefClient, JournalWork, JournalWorksQuery, WorkMetadata};
use ednews_db::{article_exists, upsert_article, ArticleUpsert};
use serde::Serialize;
use sqlx::SqlitePool;

use crate::error::FeedError;

/// Outcome of an ISSN lookup across every journal.
#[derive(Debug, Clone, Default, Serialize)]
pub struct IssnLookupReport {
    /// Sources that carried an ISSN.
    pub journals: usize,
    /// Articles newly written.
    pub inserted: usize,
    /// Works already stored as articles.
    pub skipped: usize,
    /// Keys of sources whose listing could not be fetched.
    pub failed: Vec<String>,
}

fn article_for_work(
    work: &JournalWork,
    source: &FeedSource,
    issn: &str,
    meta: Option<&WorkMetadata>,
) -> ArticleUpsert {
    ArticleUpsert {
        doi: work.doi.clone(),
        title: work
            .title
            .clone()
            .or_else(|| meta.and_then(|m| m.title.clone())),
        authors: meta.and_then(|m| m.authors.clone()),
        abstract_text: meta
            .and_then(|m| m.abstract_text.clone())
            .or_else(|| work.abstract_text.clone()),
        crossref_raw: meta.map(|m| m.raw.clone()),
        feed_id: Some(source.key.clone()),
        publication_id: source.publication_id.clone().or_else(|| Some(issn.to_owned())),
        issn: Some(issn.to_owned()),
        published: meta.and_then(|m| m.published.clone()),
    }
}

/// Store the works of one journal that are not articles yet.
async fn ingest_journal(
    pool: &SqlitePool,
    client: &CrossrefClient,
    source: &FeedSource,
    issn: &str,
    query: &JournalWorksQuery,
    title_filters: &[String],
    report: &mut IssnLookupReport,
) -> Result<(), FeedError> {
    let works = client.fetch_journal_works(issn, query).await?;
    for work in &works {
        if article_exists(pool, &work.doi).await? {
            report.skipped += 1;
            continue;
        }
        let meta = client.fetch_metadata_or_none(&work.doi).await;
        let article = article_for_work(work, source, issn, meta.as_ref());
        match upsert_article(pool, &article, title_filters).await {
            Ok(true) => report.inserted += 1,
            Ok(false) => {}
            Err(e) => {
                tracing::warn!(source = %source.key, doi = %work.doi, error = %e, "failed to store journal work");
            }
        }
    }
    tracing::info!(source = %source.key, issn, works = works.len(), "journal works ingested");
    Ok(())
}

/// Fetch the newest `query.limit` works of every source that has an ISSN
/// and upsert the ones not yet stored as articles.
///
/// Each new work's full metadata is fetched when Crossref has it; the
/// listing's own title and abstract fill in otherwise. A journal whose
/// listing fails is logged, recorded in `failed`, and skipped.
pub async fn run_issn_lookup(
    pool: &SqlitePool,
    client: &CrossrefClient,
    sources: &[FeedSource],
    query: &JournalWorksQuery,
    title_filters: &[String],
) -> IssnLookupReport {
    let mut report = IssnLookupReport::default();
    for source in sources {
        let Some(issn) = source.issn.as_deref().map(str::trim).filter(|i| !i.is_empty()) else {
            continue;
        };
        report.journals += 1;
        if let Err(e) = ingest_journal(pool, client, source, issn, query, title_filters, &mut report).await {
            tracing::warn!(source = %source.key, issn, error = %e, "journal lookup failed");
            report.failed.push(source.key.clone());
        }
    }
    tracing::info!(
        journals = report.journals,
        inserted = report.inserted,
        skipped = report.skipped,
        failed = report.failed.len(),
        "ISSN lookup done"
    );
    report
}
