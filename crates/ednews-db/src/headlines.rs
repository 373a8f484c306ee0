//! Database operations for the `headlines` table.

use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};
use ednews_core::{Entry, MISSING_PUBLISHED_SENTINEL};
use serde::Serialize;
use sqlx::{SqliteConnection, SqlitePool};

use crate::{now_rfc3339, DbError};

// ---------------------------------------------------------------------------
// Row type
// ---------------------------------------------------------------------------

/// A row from the `headlines` table.
#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
pub struct HeadlineRow {
    pub id: i64,
    pub source: String,
    pub title: String,
    pub text: Option<String>,
    pub link: String,
    pub first_seen: String,
    pub published: Option<String>,
}

/// Normalize a feed date to RFC 3339 (UTC) when it parses, else keep it as-is.
///
/// Accepts RFC 3339, RFC 2822, `YYYY-MM-DD HH:MM:SS` and `YYYY-MM-DD`.
#[must_use]
pub fn normalize_published(raw: &str) -> String {
    let raw = raw.trim();
    if let Ok(dt) = DateTime::parse_from_rfc3339(raw) {
        return dt.with_timezone(&Utc).to_rfc3339();
    }
    if let Ok(dt) = DateTime::parse_from_rfc2822(raw) {
        return dt.with_timezone(&Utc).to_rfc3339();
    }
    if let Ok(naive) = NaiveDateTime::parse_from_str(raw, "%Y-%m-%d %H:%M:%S") {
        return naive.and_utc().to_rfc3339();
    }
    if let Some(naive) = NaiveDate::parse_from_str(raw, "%Y-%m-%d")
        .ok()
        .and_then(|d| d.and_hms_opt(0, 0, 0))
    {
        return naive.and_utc().to_rfc3339();
    }
    raw.to_string()
}

// ---------------------------------------------------------------------------
// Writes
// ---------------------------------------------------------------------------

async fn upsert_headline_on(
    conn: &mut SqliteConnection,
    source: &str,
    title: &str,
    text: Option<&str>,
    link: &str,
    published: Option<&str>,
) -> Result<bool, DbError> {
    let exists: bool =
        sqlx::query_scalar("SELECT COUNT(*) > 0 FROM headlines WHERE link = ? AND title = ?")
            .bind(link)
            .bind(title)
            .fetch_one(&mut *conn)
            .await?;

    let published = published
        .map(str::trim)
        .filter(|p| !p.is_empty())
        .map(normalize_published);

    // Existing rows never lose their text, and a real date is never replaced.
    sqlx::query(
        "INSERT INTO headlines (source, title, text, link, first_seen, published) \
         VALUES (?, ?, ?, ?, ?, COALESCE(?, ?)) \
         ON CONFLICT(link, title) DO UPDATE SET \
             text = COALESCE(NULLIF(excluded.text, ''), headlines.text), \
             published = CASE \
                 WHEN headlines.published IS NULL OR headlines.published = ? \
                 THEN excluded.published \
                 ELSE headlines.published \
             END",
    )
    .bind(source)
    .bind(title)
    .bind(text)
    .bind(link)
    .bind(now_rfc3339())
    .bind(published.as_deref())
    .bind(MISSING_PUBLISHED_SENTINEL)
    .bind(MISSING_PUBLISHED_SENTINEL)
    .execute(&mut *conn)
    .await?;

    Ok(!exists)
}

/// Insert a headline, or fill in missing text/date on the existing
/// `(link, title)` row. Returns `true` only when a new row was created.
///
/// # Errors
///
/// Returns [`DbError::Sqlx`] if the query fails.
pub async fn upsert_headline(
    pool: &SqlitePool,
    source: &str,
    title: &str,
    text: Option<&str>,
    link: &str,
    published: Option<&str>,
) -> Result<bool, DbError> {
    let mut conn = pool.acquire().await?;
    upsert_headline_on(&mut conn, source, title, text, link, published).await
}

/// Persist news entries as headlines in one transaction.
///
/// Entries with neither a title nor a link are skipped. Returns the number of
/// newly created rows.
///
/// # Errors
///
/// Returns [`DbError::Sqlx`] if any statement or the commit fails; the
/// whole batch is rolled back in that case.
pub async fn save_headlines(
    pool: &SqlitePool,
    source_key: &str,
    entries: &[Entry],
) -> Result<usize, DbError> {
    let mut tx = pool.begin().await?;
    let mut inserted = 0usize;

    for entry in entries {
        let title = entry.title.as_deref().map(str::trim).unwrap_or_default();
        let link = entry.link.as_deref().map(str::trim).unwrap_or_default();
        if title.is_empty() && link.is_empty() {
            tracing::debug!(source = source_key, "skipping headline without title or link");
            continue;
        }

        if upsert_headline_on(
            &mut tx,
            source_key,
            title,
            entry.body_text(),
            link,
            entry.published.as_deref(),
        )
        .await?
        {
            inserted += 1;
        }
    }

    tx.commit().await?;
    tracing::debug!(source = source_key, inserted, total = entries.len(), "saved headlines");
    Ok(inserted)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalizes_rfc2822() {
        assert_eq!(
            normalize_published("Tue, 05 Nov 2024 14:30:00 GMT"),
            "2024-11-05T14:30:00+00:00"
        );
    }

    #[test]
    fn normalizes_offsets_to_utc() {
        assert_eq!(
            normalize_published("2024-11-05T09:30:00-05:00"),
            "2024-11-05T14:30:00+00:00"
        );
    }

    #[test]
    fn normalizes_plain_dates() {
        assert_eq!(normalize_published("2024-11-05"), "2024-11-05T00:00:00+00:00");
        assert_eq!(
            normalize_published("2024-11-05 08:00:00"),
            "2024-11-05T08:00:00+00:00"
        );
    }

    #[test]
    fn unparseable_dates_are_kept_verbatim() {
        assert_eq!(normalize_published(" Fall 2024 "), "Fall 2024");
    }
}
