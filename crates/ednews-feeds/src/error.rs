use thiserror::Error;

/// Failure of one source during a fetch run.
///
/// The orchestrator records these per source; they never abort the run.
#[derive(Debug, Error)]
pub enum FeedError {
    /// Network failure or timeout from the shared HTTP client.
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("HTTP {status} fetching {url}")]
    Status { status: u16, url: String },

    /// The response body could not be read as a feed or listing page.
    #[error("failed to parse {url}: {message}")]
    Parse { url: String, message: String },

    #[error("processor '{name}' failed: {message}")]
    Processor { name: String, message: String },

    #[error("storage error: {0}")]
    Storage(#[from] ednews_db::DbError),

    #[error("Crossref error: {0}")]
    Crossref(#[from] ednews_crossref::CrossrefError),
}
