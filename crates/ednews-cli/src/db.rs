//! `db` subcommands: schema setup, cleanup, DOI rematch and the
//! maintenance log.

use anyhow::Context;
use clap::Subcommand;
use ednews_core::AppConfig;
use ednews_db::MigrationReport;
use ednews_feeds::{run_rematch, FetchOptions, Postprocessor, RematchOptions, RematchReport, SaveTarget};
use serde_json::json;
use sqlx::SqlitePool;

/// Sub-commands available under `db`.
#[derive(Debug, Subcommand)]
pub enum DbCommands {
    /// Create the schema and register research publications
    Init,
    /// Apply pending schema upgrades
    Migrate,
    /// Rebuild the database file to reclaim space
    Vacuum,
    /// Remove empty articles and rows with filtered titles
    Cleanup {
        /// Only remove empty articles older than this many days
        #[arg(long)]
        older_than_days: Option<u32>,
        /// Also remove items and articles whose title is filtered
        #[arg(long)]
        filtered_titles: bool,
        /// Count matching rows without deleting
        #[arg(long)]
        dry_run: bool,
    },
    /// Show recent maintenance runs
    Runs {
        #[arg(long, default_value = "20")]
        limit: i64,
    },
    /// Register research publications from the sources file
    SyncPublications,
    /// Clear item DOIs that do not belong to their source's publication and
    /// look them up again
    Rematch {
        /// Only rematch the source with this key
        #[arg(long)]
        source: Option<String>,
        /// Only rematch sources of this publication
        #[arg(long)]
        publication_id: Option<String>,
        /// Report what would be cleared without writing
        #[arg(long)]
        dry_run: bool,
        /// Only look up items left without a DOI
        #[arg(long)]
        only_wrong: bool,
        /// Delete articles no item links to afterwards
        #[arg(long)]
        remove_orphans: bool,
    },
    /// Migrate, sync publications, clean up and vacuum in one pass
    RunAll {
        /// Only remove empty articles older than this many days
        #[arg(long)]
        older_than_days: Option<u32>,
        /// Count what cleanup would remove and skip vacuum
        #[arg(long)]
        dry_run: bool,
    },
}

/// Dispatch a `db` subcommand. The schema has already been migrated by the
/// time this runs; `migration` describes what that pass changed.
///
/// # Errors
///
/// Returns an error if a database operation fails or, for `init`, if the
/// research sources file exists but cannot be parsed.
pub(crate) async fn run_db_command(
    pool: &SqlitePool,
    config: &AppConfig,
    migration: &MigrationReport,
    command: DbCommands,
) -> anyhow::Result<()> {
    match command {
        DbCommands::Init => run_init(pool, config, migration).await,
        DbCommands::Migrate => {
            print_migration(migration);
            Ok(())
        }
        DbCommands::Vacuum => run_vacuum(pool).await,
        DbCommands::Cleanup {
            older_than_days,
            filtered_titles,
            dry_run,
        } => run_cleanup(pool, config, older_than_days, filtered_titles, dry_run).await,
        DbCommands::Runs { limit } => run_list_runs(pool, limit).await,
        DbCommands::SyncPublications => run_sync_publications(pool, config).await,
        DbCommands::Rematch {
            source,
            publication_id,
            dry_run,
            only_wrong,
            remove_orphans,
        } => {
            let options = RematchOptions {
                dry_run,
                only_wrong,
                remove_orphans,
            };
            run_rematch_command(pool, config, source.as_deref(), publication_id.as_deref(), options).await
        }
        DbCommands::RunAll {
            older_than_days,
            dry_run,
        } => run_all(pool, config, migration, older_than_days, dry_run).await,
    }
}

fn print_migration(report: &MigrationReport) {
    if report.is_noop() {
        println!("schema is up to date");
        return;
    }
    for column in &report.columns_added {
        println!("added column {column}");
    }
    if report.hashes_backfilled > 0 {
        println!("backfilled {} url hashes", report.hashes_backfilled);
    }
    if report.duplicates_removed > 0 {
        println!("removed {} duplicate items", report.duplicates_removed);
    }
    if report.url_hash_index_created {
        println!("created unique url_hash index");
    }
}

/// Sync publications from the research sources file. `None` when the file
/// does not exist.
async fn sync_research_publications(
    pool: &SqlitePool,
    config: &AppConfig,
) -> anyhow::Result<Option<usize>> {
    let path = &config.research_config_path;
    if !path.exists() {
        println!("no research sources at {}; skipping publications", path.display());
        return Ok(None);
    }
    let research = ednews_core::load_sources(path)?;
    let sources: Vec<_> = research.sources().cloned().collect();
    let synced = ednews_db::sync_publications(pool, &sources).await?;
    println!("registered {synced} publications");
    Ok(Some(synced))
}

async fn run_init(
    pool: &SqlitePool,
    config: &AppConfig,
    migration: &MigrationReport,
) -> anyhow::Result<()> {
    print_migration(migration);
    sync_research_publications(pool, config).await?;
    Ok(())
}

async fn run_sync_publications(pool: &SqlitePool, config: &AppConfig) -> anyhow::Result<()> {
    let started = chrono::Utc::now();
    match sync_research_publications(pool, config).await {
        Ok(synced) => {
            let details = json!({ "synced": synced.unwrap_or(0) });
            crate::record_run_best_effort(pool, "sync-publications", "ok", started, &details).await;
            Ok(())
        }
        Err(e) => {
            let details = json!({ "error": format!("{e:#}") });
            crate::record_run_best_effort(pool, "sync-publications", "failed", started, &details)
                .await;
            Err(e)
        }
    }
}

fn print_rematch(report: &RematchReport, dry_run: bool) {
    for source in &report.sources {
        let outcome = match (&source.error, dry_run) {
            (Some(e), _) => format!("FAILED: {e}"),
            (None, true) => format!("would clear {}", source.would_clear),
            (None, false) => format!(
                "cleared {}  relinked {}  orphans removed {}",
                source.cleared, source.enriched, source.removed_orphans
            ),
        };
        println!(
            "  {:<28} {:<12} {outcome}",
            source.source_key,
            source.publication_id.as_deref().unwrap_or("-")
        );
    }
    println!(
        "rematch: {} sources, {} cleared, {} relinked, {} failed",
        report.sources.len(),
        report.total_cleared,
        report.total_enriched,
        report.failed
    );
}

async fn run_rematch_command(
    pool: &SqlitePool,
    config: &AppConfig,
    only: Option<&str>,
    publication_id: Option<&str>,
    options: RematchOptions,
) -> anyhow::Result<()> {
    let started = chrono::Utc::now();
    let registry = crate::fetch::build_registry(config)?;
    let Some(Postprocessor::Db(enricher)) = registry.resolve_postprocessor("crossref") else {
        anyhow::bail!("the crossref postprocessor is not registered");
    };

    let mut sources = crate::fetch::load_research_sources(config, &registry, only)?;
    if let Some(publication_id) = publication_id {
        sources.retain(|s| {
            s.source
                .publication_id
                .as_deref()
                .is_some_and(|p| p.trim().eq_ignore_ascii_case(publication_id.trim()))
        });
        if sources.is_empty() {
            anyhow::bail!("no configured source with publication_id '{publication_id}'");
        }
    }

    let fetch_options = FetchOptions::from_app_config(config, SaveTarget::Items);
    let report = run_rematch(pool, &sources, &enricher, options, &fetch_options).await;
    print_rematch(&report, options.dry_run);

    let status = match report.failed {
        0 => "ok",
        n if n == report.sources.len() => "failed",
        _ => "partial",
    };
    let mut details = serde_json::to_value(&report).context("failed to serialize rematch report")?;
    details["dry_run"] = json!(options.dry_run);
    crate::record_run_best_effort(pool, "rematch-dois", status, started, &details).await;

    if report.failed > 0 {
        anyhow::bail!("rematch failed for {} sources", report.failed);
    }
    Ok(())
}

/// Every maintenance step in order. A failing step is logged and the rest
/// still run; the command fails at the end if any step did.
async fn run_all(
    pool: &SqlitePool,
    config: &AppConfig,
    migration: &MigrationReport,
    older_than_days: Option<u32>,
    dry_run: bool,
) -> anyhow::Result<()> {
    let started = chrono::Utc::now();
    let mut failed: Vec<&str> = Vec::new();
    print_migration(migration);

    let synced = match sync_research_publications(pool, config).await {
        Ok(synced) => synced.unwrap_or(0),
        Err(e) => {
            tracing::error!(error = %format!("{e:#}"), "publication sync failed");
            failed.push("sync-publications");
            0
        }
    };

    let (empty, filtered) = match cleanup_rows(pool, config, older_than_days, true, dry_run).await {
        Ok(counts) => {
            print_cleanup(counts, dry_run);
            counts
        }
        Err(e) => {
            tracing::error!(error = %format!("{e:#}"), "cleanup failed");
            failed.push("cleanup");
            (0, 0)
        }
    };

    if dry_run {
        println!("dry-run: skipping vacuum");
    } else if let Err(e) = ednews_db::vacuum(pool).await {
        tracing::error!(error = %e, "vacuum failed");
        failed.push("vacuum");
    } else {
        println!("vacuum complete");
    }

    let details = json!({
        "columns_added": migration.columns_added,
        "synced": synced,
        "empty_articles": empty,
        "filtered_titles": filtered,
        "older_than_days": older_than_days,
        "dry_run": dry_run,
        "failed_steps": failed,
    });
    let status = if failed.is_empty() { "ok" } else { "partial" };
    crate::record_run_best_effort(pool, "run-all", status, started, &details).await;

    if !failed.is_empty() {
        anyhow::bail!("run-all finished with failed steps: {}", failed.join(", "));
    }
    Ok(())
}

async fn run_vacuum(pool: &SqlitePool) -> anyhow::Result<()> {
    let started = chrono::Utc::now();
    match ednews_db::vacuum(pool).await {
        Ok(()) => {
            crate::record_run_best_effort(pool, "vacuum", "ok", started, &json!({})).await;
            println!("vacuum complete");
            Ok(())
        }
        Err(e) => {
            let details = json!({ "error": e.to_string() });
            crate::record_run_best_effort(pool, "vacuum", "failed", started, &details).await;
            Err(e.into())
        }
    }
}

/// Empty articles removed and filtered-title rows removed (or matched, on a
/// dry run).
async fn cleanup_rows(
    pool: &SqlitePool,
    config: &AppConfig,
    older_than_days: Option<u32>,
    filtered_titles: bool,
    dry_run: bool,
) -> anyhow::Result<(u64, u64)> {
    let empty = if dry_run {
        0
    } else {
        ednews_db::cleanup_empty_articles(pool, older_than_days).await?
    };
    let filtered = if filtered_titles {
        ednews_db::cleanup_filtered_titles(pool, &config.title_filters, dry_run).await?
    } else {
        0
    };
    Ok((empty, filtered))
}

fn print_cleanup((empty, filtered): (u64, u64), dry_run: bool) {
    if dry_run {
        println!("dry-run: {filtered} rows match title filters");
    } else {
        println!("removed {empty} empty articles and {filtered} filtered rows");
    }
}

async fn run_cleanup(
    pool: &SqlitePool,
    config: &AppConfig,
    older_than_days: Option<u32>,
    filtered_titles: bool,
    dry_run: bool,
) -> anyhow::Result<()> {
    let started = chrono::Utc::now();

    match cleanup_rows(pool, config, older_than_days, filtered_titles, dry_run).await {
        Ok((empty, filtered)) => {
            let details = json!({
                "empty_articles": empty,
                "filtered_titles": filtered,
                "older_than_days": older_than_days,
                "dry_run": dry_run,
            });
            crate::record_run_best_effort(pool, "cleanup", "ok", started, &details).await;
            print_cleanup((empty, filtered), dry_run);
            Ok(())
        }
        Err(e) => {
            let details = json!({ "error": format!("{e:#}") });
            crate::record_run_best_effort(pool, "cleanup", "failed", started, &details).await;
            Err(e)
        }
    }
}

async fn run_list_runs(pool: &SqlitePool, limit: i64) -> anyhow::Result<()> {
    let runs = ednews_db::list_maintenance_runs(pool, limit).await?;
    if runs.is_empty() {
        println!("no maintenance runs recorded");
        return Ok(());
    }
    for run in runs {
        println!(
            "{:>5}  {:<12} {:<8} {}  {:.1}s  {}",
            run.id,
            run.command,
            run.status,
            run.started,
            run.duration,
            run.details.as_deref().unwrap_or("")
        );
    }
    Ok(())
}
