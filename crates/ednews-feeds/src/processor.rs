//! Processor traits.
//!
//! A source runs one or more preprocessors that turn a URL into entries,
//! then zero or more postprocessors over what was persisted. Postprocessors
//! come in two shapes: database-level ones that read the stored item rows
//! and write articles themselves, and in-memory ones that transform the
//! fetched entries and hand them back for persistence.

use std::sync::Arc;

use async_trait::async_trait;
use ednews_core::Entry;
use ednews_db::ItemRow;
use sqlx::SqlitePool;

use crate::error::FeedError;

/// Everything a preprocessor needs to fetch one source.
#[derive(Debug, Clone)]
pub struct FetchContext {
    pub client: reqwest::Client,
    pub source_key: String,
    pub url: String,
    pub publication_id: Option<String>,
    pub issn: Option<String>,
}

/// Source metadata passed to postprocessors.
#[derive(Debug, Clone, Default)]
pub struct PostContext {
    pub source_key: String,
    pub publication_id: Option<String>,
    pub issn: Option<String>,
    pub title_filters: Vec<String>,
}

#[async_trait]
pub trait Preprocessor: Send + Sync {
    fn name(&self) -> &str;

    /// HTML listing processors can fall back to a source's `link` when it
    /// has no `feed` URL; feed parsers cannot.
    fn accepts_page_url(&self) -> bool {
        false
    }

    /// Fetch and parse the source into entries.
    async fn fetch(&self, ctx: &FetchContext) -> Result<Vec<Entry>, FeedError>;
}

#[async_trait]
pub trait DbPostprocessor: Send + Sync {
    fn name(&self) -> &str;

    /// Enrich stored item rows for one source and return how many were
    /// enriched.
    async fn run(
        &self,
        pool: &SqlitePool,
        rows: &[ItemRow],
        ctx: &PostContext,
    ) -> Result<usize, FeedError>;
}

#[async_trait]
pub trait EntryPostprocessor: Send + Sync {
    fn name(&self) -> &str;

    /// Transform fetched entries. `None` keeps the originals.
    async fn run(
        &self,
        entries: &[Entry],
        ctx: &PostContext,
    ) -> Result<Option<Vec<Entry>>, FeedError>;
}

/// A resolved postprocessor of either shape.
#[derive(Clone)]
pub enum Postprocessor {
    Db(Arc<dyn DbPostprocessor>),
    InMemory(Arc<dyn EntryPostprocessor>),
}

impl Postprocessor {
    #[must_use]
    pub fn name(&self) -> &str {
        match self {
            Postprocessor::Db(p) => p.name(),
            Postprocessor::InMemory(p) => p.name(),
        }
    }
}

impl std::fmt::Debug for Postprocessor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Postprocessor::Db(p) => write!(f, "Postprocessor::Db({})", p.name()),
            Postprocessor::InMemory(p) => write!(f, "Postprocessor::InMemory({})", p.name()),
        }
    }
}

/// GET `url` and return the body, treating any non-2xx status as an error.
///
/// # Errors
///
/// Returns [`FeedError::Http`] on network failure or timeout, or
/// [`FeedError::Status`] for a non-success status.
pub(crate) async fn fetch_text(client: &reqwest::Client, url: &str) -> Result<String, FeedError> {
    let response = client.get(url).send().await?;
    let status = response.status();
    if !status.is_success() {
        return Err(FeedError::Status {
            status: status.as_u16(),
            url: url.to_owned(),
        });
    }
    Ok(response.text().await?)
}
