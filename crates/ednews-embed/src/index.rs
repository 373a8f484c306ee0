//! Vector tables and nearest-neighbour queries.

use std::fmt;
use std::sync::Arc;

use sqlx::SqlitePool;

use crate::embedder::Embedder;
use crate::error::EmbedError;
use crate::vector::{blob_to_vec, cosine_distance, vec_to_blob};

pub const DEFAULT_DIMS: usize = 768;

/// Which rows a vector table indexes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VectorTarget {
    Articles,
    Headlines,
}

impl VectorTarget {
    #[must_use]
    pub fn vec_table(self) -> &'static str {
        match self {
            VectorTarget::Articles => "articles_vec",
            VectorTarget::Headlines => "headlines_vec",
        }
    }

    #[must_use]
    pub fn owner_table(self) -> &'static str {
        match self {
            VectorTarget::Articles => "articles",
            VectorTarget::Headlines => "headlines",
        }
    }

    /// Rows without a vector for `model` (all rows when `force`), with their
    /// title and body columns.
    fn pending_sql(self, force: bool) -> String {
        let (body, owner) = match self {
            VectorTarget::Articles => ("o.abstract", "articles"),
            VectorTarget::Headlines => ("o.text", "headlines"),
        };
        let missing = if force { "" } else { "AND v.row_id IS NULL" };
        format!(
            "SELECT o.id, o.title, {body} FROM {owner} o \
             LEFT JOIN {vec} v ON v.row_id = o.id AND v.model = ? \
             WHERE (COALESCE(TRIM(o.title), '') != '' OR COALESCE(TRIM({body}), '') != '') {missing} \
             ORDER BY o.id \
             LIMIT ?",
            vec = self.vec_table(),
        )
    }
}

impl fmt::Display for VectorTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.owner_table())
    }
}

/// Title and body joined the way every embedded text is built.
fn embedding_text(title: Option<&str>, body: Option<&str>) -> String {
    let parts: Vec<&str> = [title, body]
        .into_iter()
        .flatten()
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .collect();
    parts.join("\n\n")
}

enum Capability {
    Available(Arc<dyn Embedder>),
    Unavailable(String),
}

/// Similarity index with its capability decided once by [`SimilarityIndex::probe`].
pub struct SimilarityIndex {
    pool: SqlitePool,
    capability: Capability,
}

impl fmt::Debug for SimilarityIndex {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.capability {
            Capability::Available(e) => write!(f, "SimilarityIndex::Available({})", e.model_name()),
            Capability::Unavailable(reason) => write!(f, "SimilarityIndex::Unavailable({reason})"),
        }
    }
}

impl SimilarityIndex {
    /// Decide whether similarity is usable: an embedder must be configured
    /// and both vector tables must be creatable.
    pub async fn probe(pool: &SqlitePool, embedder: Option<Arc<dyn Embedder>>) -> Self {
        let capability = match embedder {
            None => Capability::Unavailable("no embedding service configured".to_owned()),
            Some(embedder) => {
                let dims = embedder.dims();
                let mut created = Ok(());
                for target in [VectorTarget::Articles, VectorTarget::Headlines] {
                    if let Err(e) = create_vector_table(pool, target, dims).await {
                        created = Err(e);
                        break;
                    }
                }
                match created {
                    Ok(()) => Capability::Available(embedder),
                    Err(e) => {
                        tracing::warn!(error = %e, "vector tables unavailable, similarity disabled");
                        Capability::Unavailable(format!("vector tables unavailable: {e}"))
                    }
                }
            }
        };
        if let Capability::Unavailable(reason) = &capability {
            tracing::info!(reason = %reason, "similarity index unavailable");
        }
        Self {
            pool: pool.clone(),
            capability,
        }
    }

    #[must_use]
    pub fn is_available(&self) -> bool {
        matches!(self.capability, Capability::Available(_))
    }

    #[must_use]
    pub fn unavailable_reason(&self) -> Option<&str> {
        match &self.capability {
            Capability::Available(_) => None,
            Capability::Unavailable(reason) => Some(reason),
        }
    }

    fn embedder(&self) -> Option<&Arc<dyn Embedder>> {
        match &self.capability {
            Capability::Available(e) => Some(e),
            Capability::Unavailable(_) => None,
        }
    }

    /// Create the vector table for `target`. Returns `false` on an
    /// unavailable index.
    ///
    /// # Errors
    ///
    /// Returns [`EmbedError::Shape`] for zero `dims`, or [`EmbedError::Db`]
    /// if the DDL fails.
    pub async fn create_vector_table(&self, target: VectorTarget, dims: usize) -> Result<bool, EmbedError> {
        if !self.is_available() {
            return Ok(false);
        }
        create_vector_table(&self.pool, target, dims).await?;
        Ok(true)
    }

    /// Embed and store `(row_id, text)` pairs in batches of `batch_size`.
    ///
    /// Each batch is embedded and written in its own transaction. A batch
    /// that fails to embed or store is logged and skipped; batches already
    /// written stay committed. Returns the number of vectors written.
    pub async fn upsert_embeddings(
        &self,
        target: VectorTarget,
        items: &[(i64, String)],
        batch_size: usize,
    ) -> usize {
        let Some(embedder) = self.embedder() else {
            return 0;
        };

        let mut written = 0usize;
        for (n, batch) in items.chunks(batch_size.max(1)).enumerate() {
            let texts: Vec<String> = batch.iter().map(|(_, t)| t.clone()).collect();
            let vectors = match embedder.embed(&texts).await {
                Ok(v) => v,
                Err(e) => {
                    tracing::warn!(target_table = %target, batch = n, error = %e, "embedding batch failed, skipping");
                    continue;
                }
            };
            match store_batch(&self.pool, target, embedder.model_name(), batch, &vectors).await {
                Ok(count) => written += count,
                Err(e) => {
                    tracing::error!(target_table = %target, batch = n, error = %e, "failed to store embedding batch");
                }
            }
        }
        tracing::info!(target_table = %target, written, total = items.len(), "stored embeddings");
        written
    }

    /// Rows most similar to `text`, as `(row_id, cosine distance)` in
    /// ascending distance. Empty on an unavailable index or a missing table.
    ///
    /// # Errors
    ///
    /// Returns [`EmbedError`] if the query text cannot be embedded or the
    /// vector table cannot be read.
    pub async fn query_similar(
        &self,
        target: VectorTarget,
        text: &str,
        limit: usize,
    ) -> Result<Vec<(i64, f32)>, EmbedError> {
        let Some(embedder) = self.embedder() else {
            return Ok(Vec::new());
        };
        if limit == 0 || text.trim().is_empty() || !table_exists(&self.pool, target.vec_table()).await? {
            return Ok(Vec::new());
        }

        let query = embedder
            .embed(&[text.to_owned()])
            .await?
            .into_iter()
            .next()
            .ok_or_else(|| EmbedError::Shape("no embedding for query text".to_owned()))?;

        let rows: Vec<(i64, Vec<u8>)> = sqlx::query_as(&format!(
            "SELECT row_id, embedding FROM {} WHERE model = ?",
            target.vec_table()
        ))
        .bind(embedder.model_name())
        .fetch_all(&self.pool)
        .await?;

        let mut scored: Vec<(i64, f32)> = rows
            .into_iter()
            .map(|(id, blob)| (id, cosine_distance(&query, &blob_to_vec(&blob))))
            .collect();
        scored.sort_by(|a, b| a.1.total_cmp(&b.1).then(a.0.cmp(&b.0)));
        scored.truncate(limit);
        Ok(scored)
    }

    async fn pending_texts(
        &self,
        target: VectorTarget,
        limit: i64,
        force: bool,
    ) -> Result<Vec<(i64, String)>, EmbedError> {
        let Some(embedder) = self.embedder() else {
            return Ok(Vec::new());
        };
        let rows: Vec<(i64, Option<String>, Option<String>)> =
            sqlx::query_as(&target.pending_sql(force))
                .bind(embedder.model_name())
                .bind(limit)
                .fetch_all(&self.pool)
                .await?;
        Ok(rows
            .into_iter()
            .map(|(id, title, body)| (id, embedding_text(title.as_deref(), body.as_deref())))
            .collect())
    }

    /// Articles without a vector for the current model, as
    /// `(id, title + "\n\n" + abstract)`.
    ///
    /// # Errors
    ///
    /// Returns [`EmbedError::Db`] if the query fails.
    pub async fn pending_article_texts(&self, limit: i64) -> Result<Vec<(i64, String)>, EmbedError> {
        self.pending_texts(VectorTarget::Articles, limit, false).await
    }

    /// Headlines without a vector for the current model, as
    /// `(id, title + "\n\n" + text)`.
    ///
    /// # Errors
    ///
    /// Returns [`EmbedError::Db`] if the query fails.
    pub async fn pending_headline_texts(&self, limit: i64) -> Result<Vec<(i64, String)>, EmbedError> {
        self.pending_texts(VectorTarget::Headlines, limit, false).await
    }

    /// Embed every pending row for `target` (every row when `force`).
    ///
    /// # Errors
    ///
    /// Returns [`EmbedError::Db`] if the pending rows cannot be read.
    pub async fn embed_pending(
        &self,
        target: VectorTarget,
        batch_size: usize,
        force: bool,
    ) -> Result<usize, EmbedError> {
        let items = self.pending_texts(target, i64::MAX, force).await?;
        if items.is_empty() {
            return Ok(0);
        }
        Ok(self.upsert_embeddings(target, &items, batch_size).await)
    }
}

/// Create a vector table if it does not exist yet.
async fn create_vector_table(pool: &SqlitePool, target: VectorTarget, dims: usize) -> Result<(), EmbedError> {
    if dims == 0 {
        return Err(EmbedError::Shape("vector dimension must be positive".to_owned()));
    }
    sqlx::query(&format!(
        "CREATE TABLE IF NOT EXISTS {} (
            row_id INTEGER NOT NULL,
            model TEXT NOT NULL,
            dims INTEGER NOT NULL,
            embedding BLOB NOT NULL,
            updated_at TEXT NOT NULL,
            PRIMARY KEY (row_id, model)
        )",
        target.vec_table()
    ))
    .execute(pool)
    .await?;
    Ok(())
}

async fn table_exists(pool: &SqlitePool, name: &str) -> Result<bool, EmbedError> {
    let exists: bool =
        sqlx::query_scalar("SELECT COUNT(*) > 0 FROM sqlite_master WHERE type = 'table' AND name = ?")
            .bind(name)
            .fetch_one(pool)
            .await?;
    Ok(exists)
}

async fn store_batch(
    pool: &SqlitePool,
    target: VectorTarget,
    model: &str,
    batch: &[(i64, String)],
    vectors: &[Vec<f32>],
) -> Result<usize, EmbedError> {
    if vectors.len() != batch.len() {
        return Err(EmbedError::Shape(format!(
            "{} vectors for {} rows",
            vectors.len(),
            batch.len()
        )));
    }

    let sql = format!(
        "INSERT INTO {} (row_id, model, dims, embedding, updated_at) VALUES (?, ?, ?, ?, ?) \
         ON CONFLICT(row_id, model) DO UPDATE SET \
             dims = excluded.dims, embedding = excluded.embedding, updated_at = excluded.updated_at",
        target.vec_table()
    );
    let now = chrono::Utc::now().to_rfc3339();
    let mut tx = pool.begin().await?;
    for ((row_id, _), vector) in batch.iter().zip(vectors) {
        sqlx::query(&sql)
            .bind(*row_id)
            .bind(model)
            .bind(i64::try_from(vector.len()).unwrap_or(i64::MAX))
            .bind(vec_to_blob(vector))
            .bind(&now)
            .execute(&mut *tx)
            .await?;
    }
    tx.commit().await?;
    Ok(batch.len())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn embedding_text_joins_non_empty_parts() {
        assert_eq!(embedding_text(Some(" Title "), Some("Body")), "Title\n\nBody");
        assert_eq!(embedding_text(Some("Title"), None), "Title");
        assert_eq!(embedding_text(Some(""), Some("Body")), "Body");
    }

    #[test]
    fn targets_map_to_tables() {
        assert_eq!(VectorTarget::Articles.vec_table(), "articles_vec");
        assert_eq!(VectorTarget::Headlines.owner_table(), "headlines");
        assert!(VectorTarget::Headlines.pending_sql(false).contains("v.row_id IS NULL"));
        assert!(!VectorTarget::Articles.pending_sql(true).contains("v.row_id IS NULL"));
    }
}
