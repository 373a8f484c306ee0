//! Embedding providers.

use std::time::Duration;

use async_trait::async_trait;
use ednews_core::AppConfig;
use serde::Serialize;

use crate::error::EmbedError;

#[async_trait]
pub trait Embedder: Send + Sync {
    /// Model identifier stored alongside every vector.
    fn model_name(&self) -> &str;

    fn dims(&self) -> usize;

    /// One vector per input, in input order.
    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, EmbedError>;
}

/// Client for a text-embeddings-inference style `/embed` endpoint.
#[derive(Debug, Clone)]
pub struct HttpEmbedder {
    client: reqwest::Client,
    url: String,
    model: String,
    dims: usize,
}

#[derive(Serialize)]
struct EmbedRequest<'a> {
    model: &'a str,
    inputs: &'a [String],
}

impl HttpEmbedder {
    /// # Errors
    ///
    /// Returns [`EmbedError::Http`] if the HTTP client cannot be built.
    pub fn new(base_url: &str, model: &str, dims: usize, timeout: Duration) -> Result<Self, EmbedError> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            client,
            url: format!("{}/embed", base_url.trim_end_matches('/')),
            model: model.to_owned(),
            dims,
        })
    }

    /// `None` when `EDNEWS_EMBED_URL` is unset.
    ///
    /// # Errors
    ///
    /// Same as [`HttpEmbedder::new`].
    pub fn from_app_config(config: &AppConfig) -> Result<Option<Self>, EmbedError> {
        let Some(url) = config.embed_url.as_deref().filter(|_| config.embeddings_enabled()) else {
            return Ok(None);
        };
        let timeout = Duration::from_secs(config.fetch_timeout_secs.max(30));
        Self::new(url, &config.embed_model, config.embed_dims, timeout).map(Some)
    }
}

#[async_trait]
impl Embedder for HttpEmbedder {
    fn model_name(&self) -> &str {
        &self.model
    }

    fn dims(&self) -> usize {
        self.dims
    }

    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, EmbedError> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }

        let response = self
            .client
            .post(&self.url)
            .json(&EmbedRequest {
                model: &self.model,
                inputs: texts,
            })
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            return Err(EmbedError::Status {
                status: status.as_u16(),
                url: self.url.clone(),
            });
        }

        let vectors: Vec<Vec<f32>> = response.json().await?;
        if vectors.len() != texts.len() {
            return Err(EmbedError::Shape(format!(
                "{} embeddings for {} inputs",
                vectors.len(),
                texts.len()
            )));
        }
        if let Some(bad) = vectors.iter().find(|v| v.len() != self.dims) {
            return Err(EmbedError::Shape(format!(
                "expected {} dimensions, got {}",
                self.dims,
                bad.len()
            )));
        }

        tracing::debug!(count = vectors.len(), model = %self.model, "embedded batch");
        Ok(vectors)
    }
}
