//! Idempotent, additive schema management.
//!
//! Every statement is safe to run against an existing database: tables,
//! indexes and the view use `IF NOT EXISTS`, and column additions check
//! `pragma_table_info` first. Running [`run_migrations`] twice leaves the
//! schema unchanged and returns a report with nothing applied.

use ednews_core::MISSING_PUBLISHED_SENTINEL;
use sqlx::SqlitePool;

use crate::items::url_hash;
use crate::DbError;

const CREATE_TABLES: &[&str] = &[
    "CREATE TABLE IF NOT EXISTS items (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        doi TEXT,
        feed_id TEXT,
        guid TEXT,
        title TEXT,
        link TEXT,
        url_hash TEXT,
        published TEXT,
        summary TEXT,
        fetched_at TEXT,
        UNIQUE(guid, link, title, published)
    )",
    "CREATE TABLE IF NOT EXISTS articles (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        doi TEXT UNIQUE,
        title TEXT,
        authors TEXT,
        abstract TEXT,
        crossref_raw TEXT,
        feed_id TEXT,
        publication_id TEXT,
        issn TEXT,
        published TEXT,
        fetched_at TEXT
    )",
    "CREATE TABLE IF NOT EXISTS publications (
        feed_id TEXT,
        publication_id TEXT NOT NULL,
        feed_title TEXT,
        issn TEXT NOT NULL,
        PRIMARY KEY (publication_id, issn)
    )",
    "CREATE TABLE IF NOT EXISTS headlines (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        source TEXT NOT NULL,
        title TEXT NOT NULL DEFAULT '',
        text TEXT,
        link TEXT NOT NULL DEFAULT '',
        first_seen TEXT NOT NULL,
        published TEXT,
        UNIQUE(link, title)
    )",
    "CREATE TABLE IF NOT EXISTS maintenance_runs (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        command TEXT NOT NULL,
        status TEXT NOT NULL,
        started TEXT NOT NULL,
        finished TEXT NOT NULL,
        duration REAL NOT NULL,
        details TEXT
    )",
];

/// Columns that older databases may lack, added in place when missing.
const ADDITIVE_COLUMNS: &[(&str, &str, &str)] = &[
    ("items", "url_hash", "TEXT"),
    ("items", "doi", "TEXT"),
    ("articles", "crossref_raw", "TEXT"),
];

const CREATE_INDEXES: &[&str] = &[
    "CREATE INDEX IF NOT EXISTS idx_items_feed_id ON items(feed_id)",
    "CREATE INDEX IF NOT EXISTS idx_items_doi ON items(doi)",
    "CREATE INDEX IF NOT EXISTS idx_articles_feed_id ON articles(feed_id)",
    "CREATE INDEX IF NOT EXISTS idx_headlines_source_first_seen ON headlines(source, first_seen)",
];

const CREATE_VIEWS: &[&str] = &["CREATE VIEW IF NOT EXISTS combined_articles AS
    SELECT
        a.id AS id,
        a.doi AS doi,
        a.title AS title,
        'https://doi.org/' || a.doi AS link,
        p.feed_title AS feed_title,
        a.abstract AS content,
        COALESCE(a.published, a.fetched_at) AS published,
        a.authors AS authors
    FROM articles a
    LEFT JOIN publications p ON p.feed_id = a.feed_id
    WHERE a.doi IS NOT NULL"];

/// What a migration pass actually changed.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MigrationReport {
    /// `table.column` names added by this pass.
    pub columns_added: Vec<String>,
    /// Items whose `url_hash` was computed from their link.
    pub hashes_backfilled: u64,
    /// Duplicate items removed while enforcing `url_hash` uniqueness.
    pub duplicates_removed: u64,
    /// Whether the `url_hash` unique index was created by this pass.
    pub url_hash_index_created: bool,
}

impl MigrationReport {
    #[must_use]
    pub fn is_noop(&self) -> bool {
        self.columns_added.is_empty()
            && self.hashes_backfilled == 0
            && self.duplicates_removed == 0
            && !self.url_hash_index_created
    }
}

/// Create or upgrade the schema.
///
/// # Errors
///
/// Returns [`DbError::Sqlx`] if any DDL or backfill statement fails.
pub async fn run_migrations(pool: &SqlitePool) -> Result<MigrationReport, DbError> {
    let mut report = MigrationReport::default();

    for ddl in CREATE_TABLES {
        sqlx::query(ddl).execute(pool).await?;
    }

    for (table, column, decl) in ADDITIVE_COLUMNS {
        if ensure_column(pool, table, column, decl).await? {
            report.columns_added.push(format!("{table}.{column}"));
        }
    }

    report.hashes_backfilled = backfill_url_hashes(pool).await?;

    if !object_exists(pool, "index", "idx_items_url_hash").await? {
        report.duplicates_removed = resolve_url_hash_collisions(pool).await?;
        sqlx::query("CREATE UNIQUE INDEX IF NOT EXISTS idx_items_url_hash ON items(url_hash)")
            .execute(pool)
            .await?;
        report.url_hash_index_created = true;
    }

    for ddl in CREATE_INDEXES.iter().chain(CREATE_VIEWS) {
        sqlx::query(ddl).execute(pool).await?;
    }

    if report.is_noop() {
        tracing::debug!("schema already up to date");
    } else {
        tracing::info!(
            columns_added = ?report.columns_added,
            hashes_backfilled = report.hashes_backfilled,
            duplicates_removed = report.duplicates_removed,
            url_hash_index_created = report.url_hash_index_created,
            "schema migrated"
        );
    }

    Ok(report)
}

async fn object_exists(pool: &SqlitePool, kind: &str, name: &str) -> Result<bool, DbError> {
    let exists: bool =
        sqlx::query_scalar("SELECT COUNT(*) > 0 FROM sqlite_master WHERE type = ? AND name = ?")
            .bind(kind)
            .bind(name)
            .fetch_one(pool)
            .await?;
    Ok(exists)
}

/// Whether `table` currently has `column`.
///
/// # Errors
///
/// Returns [`DbError::Sqlx`] if the pragma query fails.
pub async fn column_exists(pool: &SqlitePool, table: &str, column: &str) -> Result<bool, DbError> {
    let exists: bool =
        sqlx::query_scalar("SELECT COUNT(*) > 0 FROM pragma_table_info(?) WHERE name = ?")
            .bind(table)
            .bind(column)
            .fetch_one(pool)
            .await?;
    Ok(exists)
}

/// Adds the column when missing. Returns `true` only when it was added.
async fn ensure_column(
    pool: &SqlitePool,
    table: &str,
    column: &str,
    decl: &str,
) -> Result<bool, DbError> {
    if column_exists(pool, table, column).await? {
        tracing::debug!(table, column, "column already present; skipping");
        return Ok(false);
    }

    // Identifiers come from the constant table above, never from input.
    sqlx::query(&format!("ALTER TABLE {table} ADD COLUMN {column} {decl}"))
        .execute(pool)
        .await?;
    tracing::info!(table, column, "added column");
    Ok(true)
}

async fn backfill_url_hashes(pool: &SqlitePool) -> Result<u64, DbError> {
    let rows: Vec<(i64, String)> = sqlx::query_as(
        "SELECT id, link FROM items \
         WHERE url_hash IS NULL AND link IS NOT NULL AND TRIM(link) != ''",
    )
    .fetch_all(pool)
    .await?;

    if rows.is_empty() {
        return Ok(0);
    }

    let mut tx = pool.begin().await?;
    let mut updated = 0u64;
    for (id, link) in rows {
        // OR IGNORE: with the unique index already in place a clashing hash
        // leaves the row unhashed instead of aborting the migration.
        let result = sqlx::query("UPDATE OR IGNORE items SET url_hash = ? WHERE id = ?")
            .bind(url_hash(&link))
            .bind(id)
            .execute(&mut *tx)
            .await?;
        updated += result.rows_affected();
    }
    tx.commit().await?;

    Ok(updated)
}

/// Collapse items sharing a `url_hash` onto the earliest one.
///
/// The kept row is the one with the oldest `COALESCE(published, fetched_at)`;
/// it inherits a DOI and a real publication date from the removed rows when
/// it lacks them.
async fn resolve_url_hash_collisions(pool: &SqlitePool) -> Result<u64, DbError> {
    let hashes: Vec<String> = sqlx::query_scalar(
        "SELECT url_hash FROM items WHERE url_hash IS NOT NULL \
         GROUP BY url_hash HAVING COUNT(*) > 1",
    )
    .fetch_all(pool)
    .await?;

    if hashes.is_empty() {
        return Ok(0);
    }

    let mut tx = pool.begin().await?;
    let mut removed = 0u64;

    for hash in hashes {
        let rows: Vec<(i64, Option<String>, Option<String>)> = sqlx::query_as(
            "SELECT id, doi, published FROM items WHERE url_hash = ? \
             ORDER BY COALESCE(published, fetched_at) ASC, id ASC",
        )
        .bind(&hash)
        .fetch_all(&mut *tx)
        .await?;

        let Some(((keep_id, keep_doi, keep_published), rest)) = rows.split_first() else {
            continue;
        };

        let merged_doi = keep_doi
            .clone()
            .or_else(|| rest.iter().find_map(|(_, doi, _)| doi.clone()));
        let keeper_has_date = keep_published
            .as_deref()
            .is_some_and(|p| p != MISSING_PUBLISHED_SENTINEL);
        let merged_published = if keeper_has_date {
            keep_published.clone()
        } else {
            rest.iter()
                .find_map(|(_, _, p)| p.clone().filter(|p| p != MISSING_PUBLISHED_SENTINEL))
                .or_else(|| keep_published.clone())
        };

        for (id, _, _) in rest {
            removed += sqlx::query("DELETE FROM items WHERE id = ?")
                .bind(id)
                .execute(&mut *tx)
                .await?
                .rows_affected();
        }

        sqlx::query("UPDATE OR IGNORE items SET doi = ?, published = ? WHERE id = ?")
            .bind(merged_doi)
            .bind(merged_published)
            .bind(keep_id)
            .execute(&mut *tx)
            .await?;

        tracing::info!(url_hash = %hash, kept = keep_id, removed = rest.len(), "merged duplicate items");
    }

    tx.commit().await?;
    Ok(removed)
}
