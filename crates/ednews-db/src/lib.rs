//! SQLite record store for items, articles, publications and headlines.

use std::str::FromStr;
use std::time::Duration;

use ednews_core::AppConfig;
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePool, SqlitePoolOptions};
use thiserror::Error;

const DEFAULT_MAX_CONNECTIONS: u32 = 4;
const DEFAULT_ACQUIRE_TIMEOUT_SECS: u64 = 10;
const BUSY_TIMEOUT_SECS: u64 = 5;

#[derive(Debug, Clone, Copy)]
pub struct PoolConfig {
    pub max_connections: u32,
    pub acquire_timeout_secs: u64,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            max_connections: DEFAULT_MAX_CONNECTIONS,
            acquire_timeout_secs: DEFAULT_ACQUIRE_TIMEOUT_SECS,
        }
    }
}

impl PoolConfig {
    #[must_use]
    pub fn from_app_config(config: &AppConfig) -> Self {
        Self {
            max_connections: config.db_max_connections.max(1),
            acquire_timeout_secs: config.db_acquire_timeout_secs,
        }
    }
}

#[derive(Debug, Error)]
pub enum DbError {
    #[error("record not found")]
    NotFound,
    #[error(transparent)]
    Sqlx(#[from] sqlx::Error),
    #[error("failed to prepare database directory: {0}")]
    Io(#[from] std::io::Error),
}

fn is_memory_url(database_url: &str) -> bool {
    database_url.contains(":memory:") || database_url.contains("mode=memory")
}

/// Connect to a SQLite pool using an explicit URL and config.
///
/// The database file and its parent directory are created if missing and
/// every connection runs in WAL mode. In-memory URLs are pinned to a single
/// long-lived connection so all callers see the same database.
///
/// # Errors
///
/// Returns [`DbError::Sqlx`] if the URL is invalid or the connection cannot
/// be established, or [`DbError::Io`] if the parent directory cannot be created.
pub async fn connect_pool(database_url: &str, config: PoolConfig) -> Result<SqlitePool, DbError> {
    let options = SqliteConnectOptions::from_str(database_url)?
        .create_if_missing(true)
        .journal_mode(SqliteJournalMode::Wal)
        .busy_timeout(Duration::from_secs(BUSY_TIMEOUT_SECS))
        .foreign_keys(true);

    let pool_options = if is_memory_url(database_url) {
        SqlitePoolOptions::new()
            .max_connections(1)
            .min_connections(1)
            .idle_timeout(None)
            .max_lifetime(None)
    } else {
        if let Some(parent) = options.get_filename().parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        SqlitePoolOptions::new().max_connections(config.max_connections)
    };

    let pool = pool_options
        .acquire_timeout(Duration::from_secs(config.acquire_timeout_secs))
        .connect_with(options)
        .await?;

    Ok(pool)
}

/// Connect using the database URL and pool settings from [`AppConfig`].
///
/// # Errors
///
/// See [`connect_pool`].
pub async fn connect_pool_from_config(config: &AppConfig) -> Result<SqlitePool, DbError> {
    connect_pool(&config.database_url, PoolConfig::from_app_config(config)).await
}

/// Send a `SELECT 1` to verify the pool has a live connection.
///
/// # Errors
///
/// Returns [`sqlx::Error`] if the query fails.
pub async fn ping(pool: &SqlitePool) -> Result<(), sqlx::Error> {
    sqlx::query_scalar::<_, i64>("SELECT 1")
        .fetch_one(pool)
        .await?;
    Ok(())
}

pub(crate) fn now_rfc3339() -> String {
    chrono::Utc::now().to_rfc3339()
}


pub mod articles;
pub mod headlines;
pub mod items;
pub mod maintenance;
pub mod publications;
pub mod read;
pub mod schema;

pub use articles::{
    article_exists, attach_doi_to_item, ensure_article, get_article_by_doi, get_article_by_title,
    upsert_article,
    ArticleRow, ArticleUpsert,
};
pub use headlines::{normalize_published, save_headlines, upsert_headline, HeadlineRow};
pub use items::{
    insert_item, list_items_for_feed, normalize_url, save_items, url_hash, ItemRow,
};
pub use maintenance::{
    cleanup_empty_articles, cleanup_filtered_titles, clear_item_dois, list_maintenance_runs,
    log_maintenance_run, remove_orphan_articles, vacuum, MaintenanceRunRow,
};
pub use publications::{list_publications, sync_publications, upsert_publication, PublicationRow};
pub use read::{recent_articles, recent_headlines, CombinedArticleRow};
pub use schema::{run_migrations, MigrationReport};
