//! Read-only query surface consumed by the site renderer.

use serde::Serialize;
use sqlx::SqlitePool;

use crate::headlines::HeadlineRow;
use crate::DbError;

/// A row from the `combined_articles` view.
#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
pub struct CombinedArticleRow {
    pub id: i64,
    pub doi: String,
    pub title: Option<String>,
    pub link: String,
    pub feed_title: Option<String>,
    pub content: Option<String>,
    pub published: Option<String>,
    pub authors: Option<String>,
}

/// Most recent `limit` articles with their publication title, newest first.
///
/// # Errors
///
/// Returns [`DbError::Sqlx`] if the query fails.
pub async fn recent_articles(
    pool: &SqlitePool,
    limit: i64,
) -> Result<Vec<CombinedArticleRow>, DbError> {
    let rows = sqlx::query_as::<_, CombinedArticleRow>(
        "SELECT id, doi, title, link, feed_title, content, published, authors \
         FROM combined_articles \
         ORDER BY published DESC, id DESC \
         LIMIT ?",
    )
    .bind(limit)
    .fetch_all(pool)
    .await?;

    Ok(rows)
}

/// Most recent `limit` headlines, newest first by publication date, then by
/// when they were first seen.
///
/// # Errors
///
/// Returns [`DbError::Sqlx`] if the query fails.
pub async fn recent_headlines(pool: &SqlitePool, limit: i64) -> Result<Vec<HeadlineRow>, DbError> {
    let rows = sqlx::query_as::<_, HeadlineRow>(
        "SELECT id, source, title, text, link, first_seen, published \
         FROM headlines \
         ORDER BY published DESC, first_seen DESC, id DESC \
         LIMIT ?",
    )
    .bind(limit)
    .fetch_all(pool)
    .await?;

    Ok(rows)
}
