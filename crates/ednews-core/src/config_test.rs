use std::collections::HashMap;
use std::env::VarError;

use super::*;

fn lookup_from_map<'a>(
    map: &'a HashMap<&'a str, &'a str>,
) -> impl Fn(&str) -> Result<String, VarError> + 'a {
    move |key| {
        map.get(key)
            .map(|v| (*v).to_string())
            .ok_or(VarError::NotPresent)
    }
}

fn assert_invalid(map: &HashMap<&str, &str>, expected_var: &str) {
    let result = build_app_config(lookup_from_map(map));
    assert!(
        matches!(result, Err(ConfigError::InvalidEnvVar { ref var, .. }) if var == expected_var),
        "expected InvalidEnvVar({expected_var}), got: {result:?}"
    );
}

#[test]
fn empty_environment_yields_defaults() {
    let map: HashMap<&str, &str> = HashMap::new();
    let cfg = build_app_config(lookup_from_map(&map)).expect("defaults should parse");

    assert_eq!(cfg.database_url, "sqlite://ednews.db");
    assert_eq!(cfg.log_level, "info");
    assert_eq!(cfg.research_config_path, PathBuf::from("research.json"));
    assert_eq!(cfg.news_config_path, PathBuf::from("news.json"));
    assert_eq!(cfg.user_agent, "ed-news-fetcher/1.0");
    assert_eq!(cfg.fetch_timeout_secs, 20);
    assert_eq!(cfg.fetch_max_concurrent, 8);
    assert_eq!(cfg.db_max_connections, 4);
    assert_eq!(cfg.crossref_base_url, "https://api.crossref.org");
    assert_eq!(cfg.crossref_connect_timeout_secs, 5);
    assert_eq!(cfg.crossref_timeout_secs, 30);
    assert_eq!(cfg.crossref_max_retries, 3);
    assert_eq!(cfg.crossref_backoff_ms, 300);
    assert_eq!(cfg.crossref_retry_statuses, vec![429, 500, 502, 503, 504]);
    assert!(cfg.crossref_mailto.is_none());
    assert!(cfg.embed_url.is_none());
    assert!(!cfg.embeddings_enabled());
    assert_eq!(cfg.embed_model, "nomic-embed-text-v1.5");
    assert_eq!(cfg.embed_dims, 768);
    assert_eq!(cfg.embed_batch_size, 64);
    assert_eq!(cfg.title_filters, vec!["editorial board".to_string()]);
}

#[test]
fn overrides_are_applied() {
    let mut map = HashMap::new();
    map.insert("EDNEWS_DATABASE_URL", "sqlite::memory:");
    map.insert("EDNEWS_FETCH_MAX_CONCURRENT", "2");
    map.insert("EDNEWS_CROSSREF_MAX_RETRIES", "5");
    map.insert("EDNEWS_EMBED_URL", "http://localhost:8080");
    map.insert("EDNEWS_TITLE_FILTERS", " Editorial Board , Masthead,, ");
    let cfg = build_app_config(lookup_from_map(&map)).unwrap();

    assert_eq!(cfg.database_url, "sqlite::memory:");
    assert_eq!(cfg.fetch_max_concurrent, 2);
    assert_eq!(cfg.crossref_max_retries, 5);
    assert!(cfg.embeddings_enabled());
    assert_eq!(
        cfg.title_filters,
        vec!["editorial board".to_string(), "masthead".to_string()]
    );
}

#[test]
fn blank_embed_url_is_treated_as_unset() {
    let mut map = HashMap::new();
    map.insert("EDNEWS_EMBED_URL", "   ");
    let cfg = build_app_config(lookup_from_map(&map)).unwrap();
    assert!(cfg.embed_url.is_none());
}

#[test]
fn retry_statuses_are_deduplicated() {
    let mut map = HashMap::new();
    map.insert("EDNEWS_CROSSREF_RETRY_STATUSES", "503, 429,503");
    let cfg = build_app_config(lookup_from_map(&map)).unwrap();
    assert_eq!(cfg.crossref_retry_statuses, vec![503, 429]);
}

#[test]
fn retry_statuses_reject_non_numeric() {
    let mut map = HashMap::new();
    map.insert("EDNEWS_CROSSREF_RETRY_STATUSES", "429,teapot");
    assert_invalid(&map, "EDNEWS_CROSSREF_RETRY_STATUSES");
}

#[test]
fn retry_statuses_reject_out_of_range_codes() {
    let mut map = HashMap::new();
    map.insert("EDNEWS_CROSSREF_RETRY_STATUSES", "429,700");
    assert_invalid(&map, "EDNEWS_CROSSREF_RETRY_STATUSES");
}

#[test]
fn fetch_timeout_invalid() {
    let mut map = HashMap::new();
    map.insert("EDNEWS_FETCH_TIMEOUT_SECS", "not-a-number");
    assert_invalid(&map, "EDNEWS_FETCH_TIMEOUT_SECS");
}

#[test]
fn zero_concurrency_is_rejected() {
    let mut map = HashMap::new();
    map.insert("EDNEWS_FETCH_MAX_CONCURRENT", "0");
    assert_invalid(&map, "EDNEWS_FETCH_MAX_CONCURRENT");
}

#[test]
fn zero_batch_size_is_rejected() {
    let mut map = HashMap::new();
    map.insert("EDNEWS_EMBED_BATCH_SIZE", "0");
    assert_invalid(&map, "EDNEWS_EMBED_BATCH_SIZE");
}

#[test]
fn debug_output_redacts_secrets() {
    let mut map = HashMap::new();
    map.insert("EDNEWS_DATABASE_URL", "sqlite:///srv/private/ednews.db");
    map.insert("EDNEWS_CROSSREF_MAILTO", "ops@example.org");
    let cfg = build_app_config(lookup_from_map(&map)).unwrap();
    let rendered = format!("{cfg:?}");
    assert!(!rendered.contains("/srv/private"));
    assert!(!rendered.contains("ops@example.org"));
    assert!(rendered.contains("[redacted]"));
}
