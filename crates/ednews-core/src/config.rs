use std::path::PathBuf;
use std::str::FromStr;

use crate::app_config::AppConfig;
use crate::ConfigError;

const DEFAULT_RETRY_STATUSES: &str = "429,500,502,503,504";
const DEFAULT_TITLE_FILTERS: &str = "editorial board";

/// Load application configuration from environment variables.
///
/// Calls `dotenvy::dotenv().ok()` to load `.env` files before reading env vars.
///
/// # Errors
///
/// Returns `ConfigError` if any value is present but invalid.
pub fn load_app_config() -> Result<AppConfig, ConfigError> {
    dotenvy::dotenv().ok();
    load_app_config_from_env()
}

/// Load application configuration from environment variables already in the process.
///
/// Unlike [`load_app_config`], this does NOT load `.env` files.
///
/// # Errors
///
/// Returns `ConfigError` if any value is present but invalid.
pub fn load_app_config_from_env() -> Result<AppConfig, ConfigError> {
    build_app_config(|key| std::env::var(key))
}

/// Build application configuration using the provided env-var lookup function.
///
/// Every variable has a default, so an empty environment yields a usable
/// configuration pointing at `sqlite://ednews.db`.
///
/// # Errors
///
/// Returns [`ConfigError::InvalidEnvVar`] when a value fails to parse or is
/// out of range.
pub fn build_app_config<F>(lookup: F) -> Result<AppConfig, ConfigError>
where
    F: Fn(&str) -> Result<String, std::env::VarError>,
{
    let or_default = |var: &str, default: &str| -> String {
        lookup(var).unwrap_or_else(|_| default.to_string())
    };

    let optional = |var: &str| -> Option<String> {
        lookup(var)
            .ok()
            .map(|v| v.trim().to_string())
            .filter(|v| !v.is_empty())
    };

    let parse_u32 = |var: &str, default: &str| -> Result<u32, ConfigError> {
        parse_number(var, &or_default(var, default))
    };

    let parse_u64 = |var: &str, default: &str| -> Result<u64, ConfigError> {
        parse_number(var, &or_default(var, default))
    };

    let parse_positive_usize = |var: &str, default: &str| -> Result<usize, ConfigError> {
        let value: usize = parse_number(var, &or_default(var, default))?;
        if value == 0 {
            return Err(ConfigError::InvalidEnvVar {
                var: var.to_string(),
                reason: "must be at least 1".to_string(),
            });
        }
        Ok(value)
    };

    let database_url = or_default("EDNEWS_DATABASE_URL", "sqlite://ednews.db");
    let log_level = or_default("EDNEWS_LOG_LEVEL", "info");
    let research_config_path =
        PathBuf::from(or_default("EDNEWS_RESEARCH_CONFIG", "research.json"));
    let news_config_path = PathBuf::from(or_default("EDNEWS_NEWS_CONFIG", "news.json"));
    let user_agent = or_default("EDNEWS_USER_AGENT", "ed-news-fetcher/1.0");

    let fetch_timeout_secs = parse_u64("EDNEWS_FETCH_TIMEOUT_SECS", "20")?;
    let fetch_max_concurrent = parse_positive_usize("EDNEWS_FETCH_MAX_CONCURRENT", "8")?;

    let db_max_connections = parse_u32("EDNEWS_DB_MAX_CONNECTIONS", "4")?;
    let db_acquire_timeout_secs = parse_u64("EDNEWS_DB_ACQUIRE_TIMEOUT_SECS", "10")?;

    let crossref_base_url = or_default("EDNEWS_CROSSREF_BASE_URL", "https://api.crossref.org");
    let crossref_connect_timeout_secs = parse_u64("EDNEWS_CROSSREF_CONNECT_TIMEOUT_SECS", "5")?;
    let crossref_timeout_secs = parse_u64("EDNEWS_CROSSREF_TIMEOUT_SECS", "30")?;
    let crossref_max_retries = parse_u32("EDNEWS_CROSSREF_MAX_RETRIES", "3")?;
    let crossref_backoff_ms = parse_u64("EDNEWS_CROSSREF_BACKOFF_MS", "300")?;
    let crossref_retry_statuses = parse_status_list(
        "EDNEWS_CROSSREF_RETRY_STATUSES",
        &or_default("EDNEWS_CROSSREF_RETRY_STATUSES", DEFAULT_RETRY_STATUSES),
    )?;
    let crossref_mailto = optional("EDNEWS_CROSSREF_MAILTO");

    let embed_url = optional("EDNEWS_EMBED_URL");
    let embed_model = or_default("EDNEWS_EMBED_MODEL", "nomic-embed-text-v1.5");
    let embed_dims = parse_positive_usize("EDNEWS_EMBED_DIMS", "768")?;
    let embed_batch_size = parse_positive_usize("EDNEWS_EMBED_BATCH_SIZE", "64")?;

    let title_filters = parse_title_filters(&or_default(
        "EDNEWS_TITLE_FILTERS",
        DEFAULT_TITLE_FILTERS,
    ));

    Ok(AppConfig {
        database_url,
        log_level,
        research_config_path,
        news_config_path,
        user_agent,
        fetch_timeout_secs,
        fetch_max_concurrent,
        db_max_connections,
        db_acquire_timeout_secs,
        crossref_base_url,
        crossref_connect_timeout_secs,
        crossref_timeout_secs,
        crossref_max_retries,
        crossref_backoff_ms,
        crossref_retry_statuses,
        crossref_mailto,
        embed_url,
        embed_model,
        embed_dims,
        embed_batch_size,
        title_filters,
    })
}

fn parse_number<T>(var: &str, raw: &str) -> Result<T, ConfigError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    raw.trim()
        .parse::<T>()
        .map_err(|e| ConfigError::InvalidEnvVar {
            var: var.to_string(),
            reason: e.to_string(),
        })
}

/// Parse a comma-separated list of HTTP status codes (`"429,500"`).
fn parse_status_list(var: &str, raw: &str) -> Result<Vec<u16>, ConfigError> {
    let mut statuses = Vec::new();
    for part in raw.split(',').map(str::trim).filter(|p| !p.is_empty()) {
        let code: u16 = parse_number(var, part)?;
        if !(100..=599).contains(&code) {
            return Err(ConfigError::InvalidEnvVar {
                var: var.to_string(),
                reason: format!("{code} is not an HTTP status code"),
            });
        }
        if !statuses.contains(&code) {
            statuses.push(code);
        }
    }
    Ok(statuses)
}

/// Comma-separated, trimmed, lowercased. Empty entries are dropped.
fn parse_title_filters(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(|f| f.trim().to_lowercase())
        .filter(|f| !f.is_empty())
        .collect()
}

#[cfg(test)]
#[path = "config_test.rs"]
mod tests;
