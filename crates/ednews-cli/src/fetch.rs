//! `fetch` and `postprocess` command handlers.

use std::path::Path;

use anyhow::Context;
use clap::ValueEnum;
use ednews_core::{AppConfig, SourcesFile};
use ednews_crossref::{CrossrefClient, CrossrefConfig, DoiCache, JournalWorksQuery};
use ednews_feeds::{
    build_http_client, resolve_sources, run_fetch, run_issn_lookup, run_postprocess, FetchOptions,
    FetchSummary, ProcessorRegistry, ResolvedSource, SaveTarget, SourceStatus,
};
use serde_json::json;
use sqlx::SqlitePool;

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum SourceKind {
    /// Journal feeds, stored as items
    Research,
    /// News sources, stored as headlines
    News,
    All,
}

/// One sources file ready to run.
struct Batch {
    label: &'static str,
    target: SaveTarget,
    sources: Vec<ResolvedSource>,
}

fn load_file(path: &Path, required: bool) -> anyhow::Result<Option<SourcesFile>> {
    if !path.exists() && !required {
        tracing::info!(path = %path.display(), "sources file not found; skipping");
        return Ok(None);
    }
    let file = ednews_core::load_sources(path)?;
    Ok(Some(file))
}

/// Keep only the source keyed `only` (case-insensitive) when given.
fn filter_sources(sources: Vec<ResolvedSource>, only: Option<&str>) -> Vec<ResolvedSource> {
    match only {
        Some(key) => sources
            .into_iter()
            .filter(|s| s.source.key.eq_ignore_ascii_case(key))
            .collect(),
        None => sources,
    }
}

fn build_crossref(config: &AppConfig) -> anyhow::Result<CrossrefClient> {
    CrossrefClient::new(&CrossrefConfig::from_app_config(config), DoiCache::new())
        .context("failed to build Crossref client")
}

pub(crate) fn build_registry(config: &AppConfig) -> anyhow::Result<ProcessorRegistry> {
    Ok(ProcessorRegistry::with_builtins(&build_crossref(config)?))
}

/// Load, resolve and filter the sources files selected by `kind`.
///
/// Any processor name that does not resolve aborts here, before anything
/// is fetched.
fn load_batches(
    config: &AppConfig,
    registry: &ProcessorRegistry,
    kind: SourceKind,
    only: Option<&str>,
) -> anyhow::Result<Vec<Batch>> {
    let wanted: &[(SourceKind, &'static str, SaveTarget, &Path)] = &[
        (
            SourceKind::Research,
            "research",
            SaveTarget::Items,
            config.research_config_path.as_path(),
        ),
        (
            SourceKind::News,
            "news",
            SaveTarget::Headlines,
            config.news_config_path.as_path(),
        ),
    ];

    let mut batches = Vec::new();
    for &(file_kind, label, target, path) in wanted {
        if kind != SourceKind::All && kind != file_kind {
            continue;
        }
        let Some(file) = load_file(path, kind != SourceKind::All)? else {
            continue;
        };
        let sources = filter_sources(resolve_sources(&file, registry)?, only);
        batches.push(Batch {
            label,
            target,
            sources,
        });
    }

    if let Some(key) = only {
        if batches.iter().all(|b| b.sources.is_empty()) {
            anyhow::bail!("no configured source with key '{key}'");
        }
    }
    Ok(batches)
}

/// Resolved research sources, optionally narrowed to one key.
///
/// # Errors
///
/// Returns an error if the research sources file is missing or invalid, a
/// processor does not resolve, or `only` matches no source.
pub(crate) fn load_research_sources(
    config: &AppConfig,
    registry: &ProcessorRegistry,
    only: Option<&str>,
) -> anyhow::Result<Vec<ResolvedSource>> {
    let batches = load_batches(config, registry, SourceKind::Research, only)?;
    Ok(batches.into_iter().flat_map(|b| b.sources).collect())
}

fn print_summary(label: &str, summary: &FetchSummary) {
    for report in &summary.reports {
        let status = match &report.status {
            SourceStatus::Ok => "ok".to_owned(),
            SourceStatus::Failed(msg) => format!("FAILED: {msg}"),
            SourceStatus::Skipped(why) => format!("skipped: {why}"),
        };
        let post = if report.post_failures > 0 {
            format!(" ({} postprocessor failures)", report.post_failures)
        } else {
            String::new()
        };
        println!(
            "  {:<28} fetched {:>4}  new {:>4}  enriched {:>4}  {status}{post}",
            report.source_key, report.fetched, report.saved, report.enriched
        );
    }
    println!(
        "{label}: {} sources, {} new, {} failed",
        summary.reports.len(),
        summary.saved,
        summary.failed
    );
}

fn summary_details(label: &str, summary: &FetchSummary) -> serde_json::Value {
    let failed: Vec<&str> = summary
        .reports
        .iter()
        .filter(|r| r.is_failed())
        .map(|r| r.source_key.as_str())
        .collect();
    json!({
        "kind": label,
        "sources": summary.reports.len(),
        "saved": summary.saved,
        "failed": failed,
    })
}

fn run_status(summary: &FetchSummary) -> &'static str {
    if summary.all_failed() {
        "failed"
    } else if summary.has_failures() {
        "partial"
    } else {
        "ok"
    }
}

/// Fetch the selected sources. Returns `true` when any source failed.
///
/// # Errors
///
/// Returns an error if a sources file cannot be read, a processor name
/// does not resolve, or the HTTP clients cannot be built. Per-source fetch
/// failures are reported, not propagated.
pub(crate) async fn run_fetch_command(
    pool: &SqlitePool,
    config: &AppConfig,
    kind: SourceKind,
    only: Option<&str>,
    dry_run: bool,
) -> anyhow::Result<bool> {
    let registry = build_registry(config)?;
    let batches = load_batches(config, &registry, kind, only)?;

    if dry_run {
        for batch in &batches {
            println!("dry-run: {} ({} sources)", batch.label, batch.sources.len());
            for resolved in &batch.sources {
                println!(
                    "  {:<28} {}  pre={:?} post={:?}",
                    resolved.source.key,
                    resolved.source.fetch_url().unwrap_or("-"),
                    resolved.source.processor.pre,
                    resolved.source.processor.post
                );
            }
        }
        return Ok(false);
    }

    let client = build_http_client(config)?;
    let mut any_failed = false;

    for batch in batches {
        let started = chrono::Utc::now();
        if batch.target == SaveTarget::Items {
            let sources: Vec<_> = batch.sources.iter().map(|r| r.source.clone()).collect();
            if let Err(e) = ednews_db::sync_publications(pool, &sources).await {
                tracing::warn!(error = %e, "failed to sync publications");
            }
        }

        let options = FetchOptions::from_app_config(config, batch.target);
        let summary = run_fetch(pool, &client, &batch.sources, &options).await;
        print_summary(batch.label, &summary);

        let command = format!("fetch-{}", batch.label);
        crate::record_run_best_effort(
            pool,
            &command,
            run_status(&summary),
            started,
            &summary_details(batch.label, &summary),
        )
        .await;
        any_failed |= summary.has_failures();
    }

    Ok(any_failed)
}

/// Re-run research postprocessors over stored items. Returns `true` when any
/// source failed.
///
/// # Errors
///
/// Returns an error if the research sources file cannot be read or a
/// processor name does not resolve.
pub(crate) async fn run_postprocess_command(
    pool: &SqlitePool,
    config: &AppConfig,
    only: Option<&str>,
) -> anyhow::Result<bool> {
    let registry = build_registry(config)?;
    let batches = load_batches(config, &registry, SourceKind::Research, only)?;
    let mut any_failed = false;

    for batch in batches {
        let started = chrono::Utc::now();
        let options = FetchOptions::from_app_config(config, batch.target);
        let summary = run_postprocess(pool, &batch.sources, &options).await;
        print_summary("postprocess", &summary);
        crate::record_run_best_effort(
            pool,
            "postprocess",
            run_status(&summary),
            started,
            &summary_details(batch.label, &summary),
        )
        .await;
        any_failed |= summary.has_failures();
    }

    Ok(any_failed)
}

/// Pull recent works for every research source with an ISSN. Returns
/// `true` when any journal failed.
///
/// # Errors
///
/// Returns an error if the research sources file cannot be read, `only`
/// matches no source, or the Crossref client cannot be built.
pub(crate) async fn run_issn_lookup_command(
    pool: &SqlitePool,
    config: &AppConfig,
    only: Option<&str>,
    query: &JournalWorksQuery,
) -> anyhow::Result<bool> {
    let started = chrono::Utc::now();
    let research = ednews_core::load_sources(&config.research_config_path)?;
    let sources: Vec<_> = research
        .sources()
        .filter(|s| only.is_none_or(|key| s.key.eq_ignore_ascii_case(key)))
        .cloned()
        .collect();
    if let Some(key) = only {
        if sources.is_empty() {
            anyhow::bail!("no configured source with key '{key}'");
        }
    }

    let crossref = build_crossref(config)?;
    let report = run_issn_lookup(pool, &crossref, &sources, query, &config.title_filters).await;
    println!(
        "issn-lookup: {} journals, {} new articles, {} already stored, {} failed",
        report.journals,
        report.inserted,
        report.skipped,
        report.failed.len()
    );
    for key in &report.failed {
        println!("  {key:<28} FAILED");
    }

    let status = if report.failed.is_empty() {
        "ok"
    } else if report.failed.len() == report.journals {
        "failed"
    } else {
        "partial"
    };
    let details = serde_json::to_value(&report).unwrap_or_else(|_| json!({}));
    crate::record_run_best_effort(pool, "issn-lookup", status, started, &details).await;
    Ok(!report.failed.is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_reflects_failures() {
        let mut summary = FetchSummary::default();
        assert_eq!(run_status(&summary), "ok");

        summary.failed = 1;
        summary.reports = Vec::new();
        assert_eq!(run_status(&summary), "partial");
    }
}
