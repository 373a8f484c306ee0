//! Clear DOIs that do not belong to a source's publication and let the
//! Crossref postprocessor find them again.

use std::sync::Arc;

use ednews_crossref::doi_matches_publication;
use ednews_db::{clear_item_dois, list_items_for_feed, remove_orphan_articles, ItemRow};
use serde::Serialize;
use sqlx::SqlitePool;

use crate::error::FeedError;
use crate::fetch::{post_context, FetchOptions, POST_ROW_LIMIT};
use crate::processor::DbPostprocessor;
use crate::registry::ResolvedSource;

#[derive(Debug, Clone, Copy, Default)]
pub struct RematchOptions {
    /// Report what would be cleared without writing anything.
    pub dry_run: bool,
    /// Offer only items left without a DOI to the postprocessor, and skip
    /// sources where nothing was cleared.
    pub only_wrong: bool,
    /// Delete the source's articles that no item links to afterwards.
    pub remove_orphans: bool,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct SourceRematch {
    pub source_key: String,
    pub publication_id: Option<String>,
    /// Items whose DOI does not belong to the publication.
    pub would_clear: usize,
    pub cleared: u64,
    pub enriched: usize,
    pub removed_orphans: u64,
    pub error: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct RematchReport {
    pub sources: Vec<SourceRematch>,
    pub total_cleared: u64,
    pub total_enriched: usize,
    pub removed_orphan_articles: u64,
    pub failed: usize,
}

/// A stored DOI that the source's publication does not claim. Without a
/// publication every stored DOI is suspect.
fn mismatched(row: &ItemRow, publication_id: Option<&str>) -> bool {
    let Some(doi) = row.doi.as_deref().map(str::trim).filter(|d| !d.is_empty()) else {
        return false;
    };
    publication_id.is_none_or(|p| !doi_matches_publication(doi, p))
}

async fn rematch_source(
    pool: &SqlitePool,
    resolved: &ResolvedSource,
    enricher: &dyn DbPostprocessor,
    options: RematchOptions,
    fetch_options: &FetchOptions,
    out: &mut SourceRematch,
) -> Result<(), FeedError> {
    let key = resolved.source.key.as_str();
    let rows = list_items_for_feed(pool, key, POST_ROW_LIMIT).await?;
    let wrong: Vec<i64> = rows
        .iter()
        .filter(|r| mismatched(r, out.publication_id.as_deref()))
        .map(|r| r.id)
        .collect();
    out.would_clear = wrong.len();
    if options.dry_run || (options.only_wrong && wrong.is_empty()) {
        return Ok(());
    }

    out.cleared = clear_item_dois(pool, key, &wrong).await?;

    let mut rows = list_items_for_feed(pool, key, POST_ROW_LIMIT).await?;
    if options.only_wrong {
        rows.retain(|r| r.doi.as_deref().is_none_or(str::is_empty));
    }
    out.enriched = enricher.run(pool, &rows, &post_context(resolved, fetch_options)).await?;

    if options.remove_orphans {
        out.removed_orphans = remove_orphan_articles(pool, key).await?;
    }
    Ok(())
}

/// Re-derive DOIs for every source in `sources`.
///
/// A failing source is recorded on its entry and does not stop the others.
pub async fn run_rematch(
    pool: &SqlitePool,
    sources: &[ResolvedSource],
    enricher: &Arc<dyn DbPostprocessor>,
    options: RematchOptions,
    fetch_options: &FetchOptions,
) -> RematchReport {
    let mut report = RematchReport::default();
    for resolved in sources {
        let mut out = SourceRematch {
            source_key: resolved.source.key.clone(),
            publication_id: resolved
                .source
                .publication_id
                .as_deref()
                .map(str::trim)
                .filter(|p| !p.is_empty())
                .map(str::to_owned),
            ..SourceRematch::default()
        };
        if let Err(e) = rematch_source(pool, resolved, enricher.as_ref(), options, fetch_options, &mut out).await {
            tracing::warn!(source = %out.source_key, error = %e, "rematch failed");
            out.error = Some(e.to_string());
            report.failed += 1;
        }
        tracing::info!(
            source = %out.source_key,
            would_clear = out.would_clear,
            cleared = out.cleared,
            enriched = out.enriched,
            dry_run = options.dry_run,
            "rematch done"
        );
        report.total_cleared += out.cleared;
        report.total_enriched += out.enriched;
        report.removed_orphan_articles += out.removed_orphans;
        report.sources.push(out);
    }
    report
}
