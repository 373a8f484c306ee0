use std::path::PathBuf;

#[derive(Clone)]
pub struct AppConfig {
    pub database_url: String,
    pub log_level: String,
    pub research_config_path: PathBuf,
    pub news_config_path: PathBuf,
    pub user_agent: String,
    pub fetch_timeout_secs: u64,
    pub fetch_max_concurrent: usize,
    pub db_max_connections: u32,
    pub db_acquire_timeout_secs: u64,
    pub crossref_base_url: String,
    pub crossref_connect_timeout_secs: u64,
    pub crossref_timeout_secs: u64,
    pub crossref_max_retries: u32,
    pub crossref_backoff_ms: u64,
    pub crossref_retry_statuses: Vec<u16>,
    pub crossref_mailto: Option<String>,
    pub embed_url: Option<String>,
    pub embed_model: String,
    pub embed_dims: usize,
    pub embed_batch_size: usize,
    pub title_filters: Vec<String>,
}

impl AppConfig {
    /// Whether an embedding endpoint is configured at all.
    #[must_use]
    pub fn embeddings_enabled(&self) -> bool {
        self.embed_url.as_deref().is_some_and(|u| !u.trim().is_empty())
    }
}

impl std::fmt::Debug for AppConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AppConfig")
            .field("database_url", &"[redacted]")
            .field("log_level", &self.log_level)
            .field("research_config_path", &self.research_config_path)
            .field("news_config_path", &self.news_config_path)
            .field("user_agent", &self.user_agent)
            .field("fetch_timeout_secs", &self.fetch_timeout_secs)
            .field("fetch_max_concurrent", &self.fetch_max_concurrent)
            .field("db_max_connections", &self.db_max_connections)
            .field("db_acquire_timeout_secs", &self.db_acquire_timeout_secs)
            .field("crossref_base_url", &self.crossref_base_url)
            .field(
                "crossref_connect_timeout_secs",
                &self.crossref_connect_timeout_secs,
            )
            .field("crossref_timeout_secs", &self.crossref_timeout_secs)
            .field("crossref_max_retries", &self.crossref_max_retries)
            .field("crossref_backoff_ms", &self.crossref_backoff_ms)
            .field("crossref_retry_statuses", &self.crossref_retry_statuses)
            .field(
                "crossref_mailto",
                &self.crossref_mailto.as_ref().map(|_| "[redacted]"),
            )
            .field("embed_url", &self.embed_url)
            .field("embed_model", &self.embed_model)
            .field("embed_dims", &self.embed_dims)
            .field("embed_batch_size", &self.embed_batch_size)
            .field("title_filters", &self.title_filters)
            .finish()
    }
}
