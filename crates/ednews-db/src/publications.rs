//! Database operations for the `publications` table.
//!
//! Publications are never created independently: they mirror the sources
//! configuration and act as the join target for article display metadata.

use ednews_core::FeedSource;
use sqlx::{SqliteConnection, SqlitePool};

use crate::DbError;

/// A row from the `publications` table.
#[derive(Debug, Clone, PartialEq, Eq, sqlx::FromRow)]
pub struct PublicationRow {
    pub feed_id: Option<String>,
    pub publication_id: String,
    pub feed_title: Option<String>,
    pub issn: String,
}

async fn upsert_publication_on(
    conn: &mut SqliteConnection,
    feed_id: &str,
    publication_id: &str,
    feed_title: Option<&str>,
    issn: &str,
) -> Result<bool, DbError> {
    let result = sqlx::query(
        "INSERT INTO publications (feed_id, publication_id, feed_title, issn) \
         VALUES (?, ?, ?, ?) \
         ON CONFLICT(publication_id, issn) DO UPDATE SET \
             feed_id = COALESCE(excluded.feed_id, publications.feed_id), \
             feed_title = COALESCE(excluded.feed_title, publications.feed_title)",
    )
    .bind(feed_id)
    .bind(publication_id)
    .bind(feed_title)
    .bind(issn)
    .execute(&mut *conn)
    .await?;

    Ok(result.rows_affected() > 0)
}

/// Insert or refresh one publication keyed by `(publication_id, issn)`.
///
/// # Errors
///
/// Returns [`DbError::Sqlx`] if the upsert fails.
pub async fn upsert_publication(
    pool: &SqlitePool,
    feed_id: &str,
    publication_id: &str,
    feed_title: Option<&str>,
    issn: &str,
) -> Result<bool, DbError> {
    let mut conn = pool.acquire().await?;
    upsert_publication_on(&mut conn, feed_id, publication_id, feed_title, issn).await
}

/// Mirror the configured sources into `publications`.
///
/// Only sources that declare both a `publication_id` and an `issn` produce a
/// row. Rows for the same `feed_id` under a different key are stale and are
/// deleted. Returns the number of publications written.
///
/// # Errors
///
/// Returns [`DbError::Sqlx`] if any statement or the commit fails.
pub async fn sync_publications(pool: &SqlitePool, sources: &[FeedSource]) -> Result<usize, DbError> {
    let mut tx = pool.begin().await?;
    let mut written = 0usize;

    for source in sources {
        let publication_id = source
            .publication_id
            .as_deref()
            .map(str::trim)
            .filter(|p| !p.is_empty());
        let issn = source.issn.as_deref().map(str::trim).filter(|i| !i.is_empty());
        let (Some(publication_id), Some(issn)) = (publication_id, issn) else {
            continue;
        };

        if upsert_publication_on(
            &mut tx,
            &source.key,
            publication_id,
            source.title.as_deref(),
            issn,
        )
        .await?
        {
            written += 1;
        }

        let stale = sqlx::query(
            "DELETE FROM publications \
             WHERE feed_id = ? AND NOT (publication_id = ? AND issn = ?)",
        )
        .bind(&source.key)
        .bind(publication_id)
        .bind(issn)
        .execute(&mut *tx)
        .await?
        .rows_affected();
        if stale > 0 {
            tracing::info!(source = %source.key, stale, "removed stale publication rows");
        }
    }

    tx.commit().await?;
    Ok(written)
}

/// All publications ordered by feed id.
///
/// # Errors
///
/// Returns [`DbError::Sqlx`] if the query fails.
pub async fn list_publications(pool: &SqlitePool) -> Result<Vec<PublicationRow>, DbError> {
    let rows = sqlx::query_as::<_, PublicationRow>(
        "SELECT feed_id, publication_id, feed_title, issn FROM publications \
         ORDER BY feed_id, publication_id, issn",
    )
    .fetch_all(pool)
    .await?;
    Ok(rows)
}
