//! Database operations for the `items` table.

use ednews_core::{title_is_filtered, Entry};
use sha2::{Digest, Sha256};
use sqlx::{SqliteConnection, SqlitePool};

use crate::{now_rfc3339, DbError};

// ---------------------------------------------------------------------------
// Row type
// ---------------------------------------------------------------------------

/// A row from the `items` table.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct ItemRow {
    pub id: i64,
    pub feed_id: Option<String>,
    pub doi: Option<String>,
    pub guid: Option<String>,
    pub title: Option<String>,
    pub link: Option<String>,
    pub url_hash: Option<String>,
    pub published: Option<String>,
    pub summary: Option<String>,
    pub fetched_at: Option<String>,
}

impl ItemRow {
    /// Rebuild the [`Entry`] view of a stored item for postprocessors.
    #[must_use]
    pub fn to_entry(&self) -> Entry {
        Entry {
            guid: self.guid.clone(),
            title: self.title.clone(),
            link: self.link.clone(),
            summary: self.summary.clone(),
            published: self.published.clone(),
            doi: self.doi.clone(),
            ..Entry::default()
        }
    }
}

// ---------------------------------------------------------------------------
// URL hashing
// ---------------------------------------------------------------------------

/// Canonical form of a link used for deduplication.
///
/// Trims whitespace, drops the fragment, lowercases the scheme and host, and
/// removes trailing slashes from the path. Query strings are kept: many
/// publisher links identify the article only by query parameters.
#[must_use]
pub fn normalize_url(link: &str) -> String {
    let trimmed = link.trim();
    let without_fragment = trimmed.split('#').next().unwrap_or(trimmed);

    let (head, tail) = match without_fragment.find("://") {
        Some(scheme_end) => {
            let after_scheme = scheme_end + 3;
            let host_end = without_fragment[after_scheme..]
                .find(['/', '?'])
                .map_or(without_fragment.len(), |i| after_scheme + i);
            (
                without_fragment[..host_end].to_lowercase(),
                &without_fragment[host_end..],
            )
        }
        None => (String::new(), without_fragment),
    };

    let (path, query) = match tail.find('?') {
        Some(q) => (&tail[..q], &tail[q..]),
        None => (tail, ""),
    };

    format!("{head}{}{query}", path.trim_end_matches('/'))
}

/// Hex SHA-256 of [`normalize_url`].
#[must_use]
pub fn url_hash(link: &str) -> String {
    let digest = Sha256::digest(normalize_url(link).as_bytes());
    digest.iter().map(|b| format!("{b:02x}")).collect()
}

// ---------------------------------------------------------------------------
// Writes
// ---------------------------------------------------------------------------

/// Insert on an existing connection; `true` only when a new row was created.
pub(crate) async fn insert_item_on(
    conn: &mut SqliteConnection,
    source_key: &str,
    entry: &Entry,
) -> Result<bool, DbError> {
    let link = entry
        .link
        .as_deref()
        .map(str::trim)
        .filter(|l| !l.is_empty());
    let guid = entry
        .guid
        .as_deref()
        .filter(|g| !g.trim().is_empty())
        .or_else(|| entry.identity());
    let published = entry.published_or_sentinel();

    // UNIQUE treats NULL links as distinct, so link-less entries are matched
    // on the tuple with `IS` before inserting.
    if link.is_none() {
        let exists: bool = sqlx::query_scalar(
            "SELECT COUNT(*) > 0 FROM items \
             WHERE guid IS ? AND link IS NULL AND title IS ? AND published IS ?",
        )
        .bind(guid)
        .bind(entry.title.as_deref())
        .bind(published)
        .fetch_one(&mut *conn)
        .await?;
        if exists {
            tracing::debug!(source = source_key, guid = ?guid, "item already stored");
            return Ok(false);
        }
    }

    let result = sqlx::query(
        "INSERT INTO items \
             (feed_id, doi, guid, title, link, url_hash, published, summary, fetched_at) \
         VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?) \
         ON CONFLICT DO NOTHING",
    )
    .bind(source_key)
    .bind(entry.doi.as_deref())
    .bind(guid)
    .bind(entry.title.as_deref())
    .bind(link)
    .bind(link.map(url_hash))
    .bind(published)
    .bind(entry.body_text())
    .bind(now_rfc3339())
    .execute(&mut *conn)
    .await?;

    let inserted = result.rows_affected() > 0;
    if !inserted {
        tracing::debug!(source = source_key, link = ?link, "item already stored");
    }
    Ok(inserted)
}

/// Insert a single entry as an item.
///
/// Conflicts on either uniqueness constraint (URL hash, or the
/// `(guid, link, title, published)` tuple) are absorbed and reported as
/// `false`; callers never need to check for existence first.
///
/// # Errors
///
/// Returns [`DbError::Sqlx`] on any storage fault other than a conflict.
pub async fn insert_item(pool: &SqlitePool, source_key: &str, entry: &Entry) -> Result<bool, DbError> {
    let mut conn = pool.acquire().await?;
    insert_item_on(&mut conn, source_key, entry).await
}

/// Persist a batch of entries in one transaction and return how many new
/// items were created.
///
/// Entries without content, or whose title matches `title_filters`, are
/// skipped. Entries are written in the order given. A storage fault rolls
/// back this batch only.
///
/// # Errors
///
/// Returns [`DbError::Sqlx`] if the transaction cannot be opened, a
/// non-conflict fault occurs, or the commit fails.
pub async fn save_items(
    pool: &SqlitePool,
    source_key: &str,
    entries: &[Entry],
    title_filters: &[String],
) -> Result<usize, DbError> {
    let mut tx = pool.begin().await?;
    let mut inserted = 0usize;

    for entry in entries {
        if !entry.has_content() {
            tracing::debug!(source = source_key, "skipping entry without content");
            continue;
        }
        if title_is_filtered(entry.title.as_deref(), title_filters) {
            tracing::info!(source = source_key, title = ?entry.title, "skipping filtered title");
            continue;
        }
        if insert_item_on(&mut tx, source_key, entry).await? {
            inserted += 1;
        }
    }

    tx.commit().await?;
    tracing::debug!(source = source_key, inserted, total = entries.len(), "saved items");
    Ok(inserted)
}

// ---------------------------------------------------------------------------
// Reads
// ---------------------------------------------------------------------------

/// The newest `limit` items stored for one source, returned oldest first.
///
/// These canonical rows are what DB-level postprocessors operate on.
///
/// # Errors
///
/// Returns [`DbError::Sqlx`] if the query fails.
pub async fn list_items_for_feed(
    pool: &SqlitePool,
    feed_id: &str,
    limit: i64,
) -> Result<Vec<ItemRow>, DbError> {
    let mut rows = sqlx::query_as::<_, ItemRow>(
        "SELECT id, feed_id, doi, guid, title, link, url_hash, published, summary, fetched_at \
         FROM items \
         WHERE feed_id = ? \
         ORDER BY id DESC \
         LIMIT ?",
    )
    .bind(feed_id)
    .bind(limit)
    .fetch_all(pool)
    .await?;
    rows.reverse();

    Ok(rows)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalize_url_lowercases_host_and_strips_noise() {
        assert_eq!(
            normalize_url("  HTTPS://Example.ORG/Path/To/Article/#section "),
            "https://example.org/Path/To/Article"
        );
    }

    #[test]
    fn normalize_url_keeps_query() {
        assert_eq!(
            normalize_url("https://Example.org/view/?id=42"),
            "https://example.org/view?id=42"
        );
        assert_eq!(
            normalize_url("https://example.org?id=42"),
            "https://example.org?id=42"
        );
    }

    #[test]
    fn normalize_url_handles_relative_input() {
        assert_eq!(normalize_url("/local/path/"), "/local/path");
    }

    #[test]
    fn url_hash_is_hex_sha256_and_stable_across_spellings() {
        let a = url_hash("https://example.org/a");
        let b = url_hash("HTTPS://EXAMPLE.org/a/");
        assert_eq!(a, b);
        assert_eq!(a.len(), 64);
        assert!(a.chars().all(|c| c.is_ascii_hexdigit()));
        assert_ne!(a, url_hash("https://example.org/b"));
    }
}
