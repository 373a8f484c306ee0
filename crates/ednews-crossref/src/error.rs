use thiserror::Error;

/// Errors returned by the Crossref client.
#[derive(Debug, Error)]
pub enum CrossrefError {
    /// Network, TLS or timeout failure from the underlying HTTP client.
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// Crossref answered with a non-success status other than 404.
    #[error("Crossref returned HTTP {status} for {url}")]
    Status { status: u16, url: String },

    /// Every attempt failed with a retryable error.
    #[error("Crossref request failed after {attempts} attempts: {last_error}")]
    RetriesExhausted { attempts: u32, last_error: String },

    /// The response body was not the JSON shape we expect.
    #[error("JSON deserialization error for {context}: {source}")]
    Deserialize {
        context: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("invalid Crossref base URL '{0}'")]
    InvalidBaseUrl(String),
}
