//! `recent` command: the read-only listings the site renderer consumes.

use clap::ValueEnum;
use sqlx::SqlitePool;

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum RecentKind {
    Articles,
    Headlines,
}

/// The date part of `published`, or a dash when missing.
fn fmt_published(published: Option<&str>) -> &str {
    published.map_or("\u{2014}", |p| p.get(..10).unwrap_or(p))
}

/// # Errors
///
/// Returns an error if the query fails or the rows cannot be serialized.
pub(crate) async fn run_recent(
    pool: &SqlitePool,
    kind: RecentKind,
    limit: i64,
    json: bool,
) -> anyhow::Result<()> {
    match kind {
        RecentKind::Articles => {
            let rows = ednews_db::recent_articles(pool, limit).await?;
            if json {
                println!("{}", serde_json::to_string_pretty(&rows)?);
                return Ok(());
            }
            for row in rows {
                println!(
                    "{}  {}  [{}]",
                    fmt_published(row.published.as_deref()),
                    row.title.as_deref().unwrap_or("(untitled)"),
                    row.feed_title.as_deref().unwrap_or(&row.doi)
                );
            }
        }
        RecentKind::Headlines => {
            let rows = ednews_db::recent_headlines(pool, limit).await?;
            if json {
                println!("{}", serde_json::to_string_pretty(&rows)?);
                return Ok(());
            }
            for row in rows {
                println!(
                    "{}  {}  [{}]",
                    fmt_published(row.published.as_deref()),
                    row.title,
                    row.source
                );
            }
        }
    }
    Ok(())
}
