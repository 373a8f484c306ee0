//! Maintenance operations and the append-only `maintenance_runs` log.

use chrono::{DateTime, Duration, Utc};
use serde_json::Value;
use sqlx::SqlitePool;

use crate::DbError;

// ---------------------------------------------------------------------------
// Row type
// ---------------------------------------------------------------------------

/// A row from the `maintenance_runs` table.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct MaintenanceRunRow {
    pub id: i64,
    pub command: String,
    pub status: String,
    pub started: String,
    pub finished: String,
    /// Seconds.
    pub duration: f64,
    /// JSON text.
    pub details: Option<String>,
}

// ---------------------------------------------------------------------------
// Operations
// ---------------------------------------------------------------------------

/// Rebuild the database file to reclaim space.
///
/// # Errors
///
/// Returns [`DbError::Sqlx`] if `VACUUM` fails (for example inside an open
/// transaction).
pub async fn vacuum(pool: &SqlitePool) -> Result<(), DbError> {
    sqlx::query("VACUUM").execute(pool).await?;
    Ok(())
}

/// Delete articles whose title and abstract are both empty.
///
/// With `older_than_days = Some(n)` only articles whose
/// `COALESCE(fetched_at, published)` is older than `n` days are removed;
/// `None` removes every empty article. Articles with a non-empty title are
/// never touched. Returns the number of deleted rows.
///
/// # Errors
///
/// Returns [`DbError::Sqlx`] if the delete fails.
pub async fn cleanup_empty_articles(
    pool: &SqlitePool,
    older_than_days: Option<u32>,
) -> Result<u64, DbError> {
    let result = match older_than_days {
        Some(days) => {
            let cutoff = (Utc::now() - Duration::days(i64::from(days))).to_rfc3339();
            sqlx::query(
                "DELETE FROM articles \
                 WHERE COALESCE(TRIM(title), '') = '' \
                   AND COALESCE(TRIM(abstract), '') = '' \
                   AND COALESCE(fetched_at, published) IS NOT NULL \
                   AND COALESCE(fetched_at, published) < ?",
            )
            .bind(cutoff)
            .execute(pool)
            .await?
        }
        None => {
            sqlx::query(
                "DELETE FROM articles \
                 WHERE COALESCE(TRIM(title), '') = '' \
                   AND COALESCE(TRIM(abstract), '') = ''",
            )
            .execute(pool)
            .await?
        }
    };

    let deleted = result.rows_affected();
    tracing::info!(deleted, older_than_days = ?older_than_days, "cleaned up empty articles");
    Ok(deleted)
}

/// Remove items and articles whose title exactly matches a filter
/// (case-insensitive). With `dry_run` nothing is deleted and the number of
/// matching rows is returned instead.
///
/// # Errors
///
/// Returns [`DbError::Sqlx`] if a query fails.
pub async fn cleanup_filtered_titles(
    pool: &SqlitePool,
    title_filters: &[String],
    dry_run: bool,
) -> Result<u64, DbError> {
    let mut total = 0u64;
    let mut tx = pool.begin().await?;

    for filter in title_filters.iter().map(|f| f.trim().to_lowercase()) {
        if filter.is_empty() {
            continue;
        }
        for table in ["items", "articles"] {
            // `table` is one of two literals above.
            if dry_run {
                let count: i64 = sqlx::query_scalar(&format!(
                    "SELECT COUNT(*) FROM {table} WHERE LOWER(TRIM(title)) = ?"
                ))
                .bind(&filter)
                .fetch_one(&mut *tx)
                .await?;
                total += u64::try_from(count).unwrap_or(0);
            } else {
                total += sqlx::query(&format!(
                    "DELETE FROM {table} WHERE LOWER(TRIM(title)) = ?"
                ))
                .bind(&filter)
                .execute(&mut *tx)
                .await?
                .rows_affected();
            }
        }
    }

    tx.commit().await?;
    Ok(total)
}

/// Unset the DOI on the given items of one source, in one transaction.
/// Ids that belong to another source are left alone. Returns how many items
/// were cleared.
///
/// # Errors
///
/// Returns [`DbError::Sqlx`] if an update or the commit fails; nothing is
/// cleared in that case.
pub async fn clear_item_dois(
    pool: &SqlitePool,
    feed_id: &str,
    item_ids: &[i64],
) -> Result<u64, DbError> {
    let mut tx = pool.begin().await?;
    let mut cleared = 0u64;
    for id in item_ids {
        cleared += sqlx::query("UPDATE items SET doi = NULL WHERE id = ? AND feed_id = ? AND doi IS NOT NULL")
            .bind(id)
            .bind(feed_id)
            .execute(&mut *tx)
            .await?
            .rows_affected();
    }
    tx.commit().await?;

    tracing::info!(source = feed_id, cleared, "cleared item DOIs");
    Ok(cleared)
}

/// Delete articles attributed to `feed_id` that no item of that source
/// links to any more. Returns the number of deleted rows.
///
/// # Errors
///
/// Returns [`DbError::Sqlx`] if the delete fails.
pub async fn remove_orphan_articles(pool: &SqlitePool, feed_id: &str) -> Result<u64, DbError> {
    let deleted = sqlx::query(
        "DELETE FROM articles \
         WHERE feed_id = ? \
           AND doi NOT IN ( \
               SELECT doi FROM items WHERE feed_id = ? AND COALESCE(doi, '') != '' \
           )",
    )
    .bind(feed_id)
    .bind(feed_id)
    .execute(pool)
    .await?
    .rows_affected();

    tracing::info!(source = feed_id, deleted, "removed orphan articles");
    Ok(deleted)
}

/// Append one maintenance run record and return its id.
///
/// `duration` is derived from `started`/`finished` in seconds.
///
/// # Errors
///
/// Returns [`DbError::Sqlx`] if the insert fails.
pub async fn log_maintenance_run(
    pool: &SqlitePool,
    command: &str,
    status: &str,
    started: DateTime<Utc>,
    finished: DateTime<Utc>,
    details: &Value,
) -> Result<i64, DbError> {
    #[allow(clippy::cast_precision_loss)]
    let duration = (finished - started).num_milliseconds().max(0) as f64 / 1000.0;

    let id: i64 = sqlx::query_scalar(
        "INSERT INTO maintenance_runs (command, status, started, finished, duration, details) \
         VALUES (?, ?, ?, ?, ?, ?) \
         RETURNING id",
    )
    .bind(command)
    .bind(status)
    .bind(started.to_rfc3339())
    .bind(finished.to_rfc3339())
    .bind(duration)
    .bind(details.to_string())
    .fetch_one(pool)
    .await?;

    Ok(id)
}

/// Most recent maintenance runs, newest first.
///
/// # Errors
///
/// Returns [`DbError::Sqlx`] if the query fails.
pub async fn list_maintenance_runs(
    pool: &SqlitePool,
    limit: i64,
) -> Result<Vec<MaintenanceRunRow>, DbError> {
    let rows = sqlx::query_as::<_, MaintenanceRunRow>(
        "SELECT id, command, status, started, finished, duration, details \
         FROM maintenance_runs \
         ORDER BY id DESC \
         LIMIT ?",
    )
    .bind(limit)
    .fetch_all(pool)
    .await?;

    Ok(rows)
}
