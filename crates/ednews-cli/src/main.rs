mod db;
mod embed;
mod fetch;
mod read;

use std::process::ExitCode;

use clap::{Parser, Subcommand};
use ednews_crossref::JournalWorksQuery;
use sqlx::SqlitePool;
use tracing_subscriber::EnvFilter;

use crate::db::DbCommands;
use crate::embed::TargetArg;
use crate::fetch::SourceKind;
use crate::read::RecentKind;

/// Exit status for a run that completed with failed sources.
const PARTIAL_FAILURE: u8 = 2;

#[derive(Debug, Parser)]
#[command(name = "ednews")]
#[command(about = "Education news and research ingestion pipeline")]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Database setup and maintenance
    Db {
        #[command(subcommand)]
        command: DbCommands,
    },
    /// Fetch every configured source and store new entries
    Fetch {
        /// Which sources file to fetch
        #[arg(long, value_enum, default_value = "all")]
        kind: SourceKind,
        /// Only fetch the source with this key
        #[arg(long)]
        source: Option<String>,
        /// List the resolved sources without fetching
        #[arg(long)]
        dry_run: bool,
    },
    /// Pull the latest works of each journal from Crossref by ISSN
    IssnLookup {
        /// Most works to read per journal
        #[arg(long, default_value = "30")]
        per_journal: usize,
        /// Only look up the source with this key
        #[arg(long)]
        source: Option<String>,
        /// Crossref sort field (newest first)
        #[arg(long, default_value = "created")]
        sort_by: String,
        /// Date field for --from-date/--until-date, e.g. created or pub
        #[arg(long)]
        date_filter_type: Option<String>,
        /// Earliest date, YYYY-MM-DD
        #[arg(long)]
        from_date: Option<String>,
        /// Latest date, YYYY-MM-DD
        #[arg(long)]
        until_date: Option<String>,
    },
    /// Re-run postprocessors over items already stored
    Postprocess {
        /// Only postprocess the source with this key
        #[arg(long)]
        source: Option<String>,
    },
    /// Compute embeddings for rows that do not have one yet
    Embed {
        #[arg(long, value_enum, default_value = "articles")]
        target: TargetArg,
        /// Texts per embedding request (defaults to `EDNEWS_EMBED_BATCH_SIZE`)
        #[arg(long)]
        batch_size: Option<usize>,
        /// Re-embed rows that already have a vector
        #[arg(long)]
        force: bool,
    },
    /// Show the rows nearest to a piece of text
    Similar {
        text: String,
        #[arg(long, value_enum, default_value = "articles")]
        target: TargetArg,
        #[arg(long, default_value = "10")]
        limit: usize,
    },
    /// Show the most recent articles or headlines
    Recent {
        #[arg(value_enum, default_value = "articles")]
        kind: RecentKind,
        #[arg(long, default_value = "20")]
        limit: i64,
        /// Print JSON instead of a text listing
        #[arg(long)]
        json: bool,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<ExitCode> {
    let config = ednews_core::load_app_config()?;
    let env_filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(config.log_level.clone()))?;
    tracing_subscriber::fmt().with_env_filter(env_filter).init();

    let cli = Cli::parse();
    let Some(command) = cli.command else {
        println!("ednews: see --help for available commands");
        return Ok(ExitCode::SUCCESS);
    };

    let (pool, migration) = open_store(&config).await?;

    match command {
        Commands::Db { command } => db::run_db_command(&pool, &config, &migration, command).await?,
        Commands::Fetch {
            kind,
            source,
            dry_run,
        } => {
            let failed = fetch::run_fetch_command(&pool, &config, kind, source.as_deref(), dry_run).await?;
            if failed {
                return Ok(ExitCode::from(PARTIAL_FAILURE));
            }
        }
        Commands::IssnLookup {
            per_journal,
            source,
            sort_by,
            date_filter_type,
            from_date,
            until_date,
        } => {
            let query = JournalWorksQuery {
                limit: per_journal,
                sort_by,
                date_filter_type,
                from_date,
                until_date,
            };
            let failed = fetch::run_issn_lookup_command(&pool, &config, source.as_deref(), &query).await?;
            if failed {
                return Ok(ExitCode::from(PARTIAL_FAILURE));
            }
        }
        Commands::Postprocess { source } => {
            let failed = fetch::run_postprocess_command(&pool, &config, source.as_deref()).await?;
            if failed {
                return Ok(ExitCode::from(PARTIAL_FAILURE));
            }
        }
        Commands::Embed {
            target,
            batch_size,
            force,
        } => {
            let batch_size = batch_size.unwrap_or(config.embed_batch_size);
            embed::run_embed(&pool, &config, target.into(), batch_size, force).await?;
        }
        Commands::Similar {
            text,
            target,
            limit,
        } => embed::run_similar(&pool, &config, target.into(), &text, limit).await?,
        Commands::Recent { kind, limit, json } => read::run_recent(&pool, kind, limit, json).await?,
    }

    Ok(ExitCode::SUCCESS)
}

/// Connect to the configured database and bring its schema up to date.
async fn open_store(
    config: &ednews_core::AppConfig,
) -> anyhow::Result<(SqlitePool, ednews_db::MigrationReport)> {
    let pool = ednews_db::connect_pool_from_config(config).await?;
    let report = ednews_db::run_migrations(&pool).await?;
    if !report.is_noop() {
        tracing::info!(
            columns_added = report.columns_added.len(),
            hashes_backfilled = report.hashes_backfilled,
            duplicates_removed = report.duplicates_removed,
            "schema upgraded"
        );
    }
    Ok((pool, report))
}

/// Append a `maintenance_runs` row, logging instead of failing when the
/// write itself goes wrong.
pub(crate) async fn record_run_best_effort(
    pool: &SqlitePool,
    command: &str,
    status: &str,
    started: chrono::DateTime<chrono::Utc>,
    details: &serde_json::Value,
) {
    let finished = chrono::Utc::now();
    if let Err(e) =
        ednews_db::log_maintenance_run(pool, command, status, started, finished, details).await
    {
        tracing::error!(command, error = %e, "failed to record maintenance run");
    }
}
