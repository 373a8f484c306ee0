use thiserror::Error;

#[derive(Debug, Error)]
pub enum EmbedError {
    #[error("embedding request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("embedding service returned HTTP {status} from {url}")]
    Status { status: u16, url: String },

    /// Wrong number of vectors, or vectors of the wrong dimension.
    #[error("unexpected embedding shape: {0}")]
    Shape(String),

    #[error("vector storage error: {0}")]
    Db(#[from] ednews_db::DbError),
}

impl From<sqlx::Error> for EmbedError {
    fn from(e: sqlx::Error) -> Self {
        Self::Db(ednews_db::DbError::Sqlx(e))
    }
}
