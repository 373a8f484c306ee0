//! Database operations for the `articles` table.

use ednews_core::title_is_filtered;
use sqlx::SqlitePool;

use crate::{now_rfc3339, DbError};

// ---------------------------------------------------------------------------
// Row types
// ---------------------------------------------------------------------------

/// A row from the `articles` table.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct ArticleRow {
    pub id: i64,
    pub doi: String,
    pub title: Option<String>,
    pub authors: Option<String>,
    pub abstract_text: Option<String>,
    pub crossref_raw: Option<String>,
    pub feed_id: Option<String>,
    pub publication_id: Option<String>,
    pub issn: Option<String>,
    pub published: Option<String>,
    pub fetched_at: Option<String>,
}

/// Values for [`upsert_article`].
#[derive(Debug, Clone, Default)]
pub struct ArticleUpsert {
    pub doi: String,
    pub title: Option<String>,
    pub authors: Option<String>,
    pub abstract_text: Option<String>,
    pub crossref_raw: Option<String>,
    pub feed_id: Option<String>,
    pub publication_id: Option<String>,
    pub issn: Option<String>,
    pub published: Option<String>,
}

const ARTICLE_COLUMNS: &str = "id, doi, title, authors, abstract AS abstract_text, crossref_raw, \
     feed_id, publication_id, issn, published, fetched_at";

// ---------------------------------------------------------------------------
// Writes
// ---------------------------------------------------------------------------

/// Insert or refresh the article for `article.doi`.
///
/// On a DOI conflict `title`, `authors`, `abstract` and `fetched_at` take the
/// new values; `crossref_raw`, `feed_id`, `publication_id`, `issn` and
/// `published` keep the stored value when the new one is `None`. Returns
/// `false` without touching the database when the DOI is blank or the title
/// is filtered.
///
/// # Errors
///
/// Returns [`DbError::Sqlx`] if the upsert fails.
pub async fn upsert_article(
    pool: &SqlitePool,
    article: &ArticleUpsert,
    title_filters: &[String],
) -> Result<bool, DbError> {
    let doi = article.doi.trim();
    if doi.is_empty() {
        return Ok(false);
    }
    if title_is_filtered(article.title.as_deref(), title_filters) {
        tracing::info!(doi, title = ?article.title, "skipping filtered article title");
        return Ok(false);
    }

    let result = sqlx::query(
        "INSERT INTO articles \
             (doi, title, authors, abstract, crossref_raw, feed_id, publication_id, issn, \
              published, fetched_at) \
         VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?) \
         ON CONFLICT(doi) DO UPDATE SET \
             title = excluded.title, \
             authors = excluded.authors, \
             abstract = excluded.abstract, \
             fetched_at = excluded.fetched_at, \
             crossref_raw = COALESCE(excluded.crossref_raw, articles.crossref_raw), \
             feed_id = COALESCE(excluded.feed_id, articles.feed_id), \
             publication_id = COALESCE(excluded.publication_id, articles.publication_id), \
             issn = COALESCE(excluded.issn, articles.issn), \
             published = COALESCE(excluded.published, articles.published)",
    )
    .bind(doi)
    .bind(article.title.as_deref())
    .bind(article.authors.as_deref())
    .bind(article.abstract_text.as_deref())
    .bind(article.crossref_raw.as_deref())
    .bind(article.feed_id.as_deref())
    .bind(article.publication_id.as_deref())
    .bind(article.issn.as_deref())
    .bind(article.published.as_deref().filter(|p| !p.is_empty()))
    .bind(now_rfc3339())
    .execute(pool)
    .await?;

    Ok(result.rows_affected() > 0)
}

/// Create a placeholder article for `doi` if none exists yet.
///
/// Returns `true` only when a row was created. Placeholders that never get
/// enriched are removed by [`crate::cleanup_empty_articles`].
///
/// # Errors
///
/// Returns [`DbError::Sqlx`] if the insert fails.
pub async fn ensure_article(
    pool: &SqlitePool,
    doi: &str,
    title: Option<&str>,
    feed_id: Option<&str>,
    publication_id: Option<&str>,
    issn: Option<&str>,
) -> Result<bool, DbError> {
    let doi = doi.trim();
    if doi.is_empty() {
        return Ok(false);
    }

    let result = sqlx::query(
        "INSERT INTO articles (doi, title, feed_id, publication_id, issn, fetched_at) \
         VALUES (?, ?, ?, ?, ?, ?) \
         ON CONFLICT(doi) DO NOTHING",
    )
    .bind(doi)
    .bind(title)
    .bind(feed_id)
    .bind(publication_id)
    .bind(issn)
    .bind(now_rfc3339())
    .execute(pool)
    .await?;

    Ok(result.rows_affected() > 0)
}

/// Set `doi` on an item and copy the article's publication date onto it.
///
/// The date copy is skipped when it would collide with another item under
/// the `(guid, link, title, published)` constraint.
///
/// # Errors
///
/// Returns [`DbError::NotFound`] if no item has `item_id`, or
/// [`DbError::Sqlx`] if an update fails.
pub async fn attach_doi_to_item(pool: &SqlitePool, item_id: i64, doi: &str) -> Result<(), DbError> {
    let mut tx = pool.begin().await?;

    let result = sqlx::query("UPDATE items SET doi = ? WHERE id = ?")
        .bind(doi)
        .bind(item_id)
        .execute(&mut *tx)
        .await?;
    if result.rows_affected() == 0 {
        return Err(DbError::NotFound);
    }

    sqlx::query(
        "UPDATE OR IGNORE items \
         SET published = ( \
             SELECT a.published FROM articles a \
             WHERE a.doi = ? AND COALESCE(a.published, '') != '') \
         WHERE id = ? \
           AND EXISTS ( \
             SELECT 1 FROM articles a \
             WHERE a.doi = ? AND COALESCE(a.published, '') != '')",
    )
    .bind(doi)
    .bind(item_id)
    .bind(doi)
    .execute(&mut *tx)
    .await?;

    tx.commit().await?;
    Ok(())
}

// ---------------------------------------------------------------------------
// Reads
// ---------------------------------------------------------------------------

/// Whether an article with this DOI is stored.
///
/// # Errors
///
/// Returns [`DbError::Sqlx`] if the query fails.
pub async fn article_exists(pool: &SqlitePool, doi: &str) -> Result<bool, DbError> {
    let exists: bool = sqlx::query_scalar("SELECT COUNT(*) > 0 FROM articles WHERE doi = ?")
        .bind(doi.trim())
        .fetch_one(pool)
        .await?;
    Ok(exists)
}

/// Return the article for `doi`, or `None` if none exists.
///
/// # Errors
///
/// Returns [`DbError::Sqlx`] if the query fails.
pub async fn get_article_by_doi(pool: &SqlitePool, doi: &str) -> Result<Option<ArticleRow>, DbError> {
    let row = sqlx::query_as::<_, ArticleRow>(&format!(
        "SELECT {ARTICLE_COLUMNS} FROM articles WHERE doi = ? LIMIT 1"
    ))
    .bind(doi.trim())
    .fetch_optional(pool)
    .await?;

    Ok(row)
}

/// Most recently fetched article whose title matches `title` exactly,
/// ignoring case and surrounding whitespace.
///
/// # Errors
///
/// Returns [`DbError::Sqlx`] if the query fails.
pub async fn get_article_by_title(
    pool: &SqlitePool,
    title: &str,
) -> Result<Option<ArticleRow>, DbError> {
    let title = title.trim();
    if title.is_empty() {
        return Ok(None);
    }
    let row = sqlx::query_as::<_, ArticleRow>(&format!(
        "SELECT {ARTICLE_COLUMNS} FROM articles \
         WHERE LOWER(TRIM(title)) = LOWER(?) \
         ORDER BY fetched_at DESC, id DESC \
         LIMIT 1"
    ))
    .bind(title)
    .fetch_optional(pool)
    .await?;

    Ok(row)
}
