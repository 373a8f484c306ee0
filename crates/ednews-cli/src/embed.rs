//! `embed` and `similar` command handlers.

use std::sync::Arc;

use clap::ValueEnum;
use ednews_core::AppConfig;
use ednews_embed::{Embedder, HttpEmbedder, SimilarityIndex, VectorTarget};
use serde_json::json;
use sqlx::SqlitePool;

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum TargetArg {
    Articles,
    Headlines,
}

impl From<TargetArg> for VectorTarget {
    fn from(value: TargetArg) -> Self {
        match value {
            TargetArg::Articles => VectorTarget::Articles,
            TargetArg::Headlines => VectorTarget::Headlines,
        }
    }
}

async fn open_index(pool: &SqlitePool, config: &AppConfig) -> anyhow::Result<SimilarityIndex> {
    let embedder = HttpEmbedder::from_app_config(config)?
        .map(|e| Arc::new(e) as Arc<dyn Embedder>);
    Ok(SimilarityIndex::probe(pool, embedder).await)
}

/// Embed every row of `target` that has no vector yet.
///
/// An unavailable index is reported and treated as success.
///
/// # Errors
///
/// Returns an error if the embedding client cannot be built or pending rows
/// cannot be read.
pub(crate) async fn run_embed(
    pool: &SqlitePool,
    config: &AppConfig,
    target: VectorTarget,
    batch_size: usize,
    force: bool,
) -> anyhow::Result<()> {
    let index = open_index(pool, config).await?;
    if let Some(reason) = index.unavailable_reason() {
        println!("similarity index unavailable: {reason}");
        return Ok(());
    }

    let started = chrono::Utc::now();
    let written = index.embed_pending(target, batch_size, force).await?;
    let details = json!({ "target": target.to_string(), "written": written, "force": force });
    crate::record_run_best_effort(pool, "embed", "ok", started, &details).await;
    println!("embedded {written} {target}");
    Ok(())
}

/// Print the rows of `target` nearest to `text`, closest first.
///
/// # Errors
///
/// Returns an error if the embedding client cannot be built or the query
/// text cannot be embedded.
pub(crate) async fn run_similar(
    pool: &SqlitePool,
    config: &AppConfig,
    target: VectorTarget,
    text: &str,
    limit: usize,
) -> anyhow::Result<()> {
    let index = open_index(pool, config).await?;
    if let Some(reason) = index.unavailable_reason() {
        println!("similarity index unavailable: {reason}");
        return Ok(());
    }

    let hits = index.query_similar(target, text, limit).await?;
    if hits.is_empty() {
        println!("no embedded {target} yet");
        return Ok(());
    }
    for (row_id, distance) in hits {
        let title = sqlx::query_scalar::<_, Option<String>>(&format!(
            "SELECT title FROM {} WHERE id = ?",
            target.owner_table()
        ))
        .bind(row_id)
        .fetch_optional(pool)
        .await?
        .flatten();
        println!("{distance:.4}  {row_id:>6}  {}", title.as_deref().unwrap_or("(untitled)"));
    }
    Ok(())
}
