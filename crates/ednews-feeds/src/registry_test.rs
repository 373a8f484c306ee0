use async_trait::async_trait;
use ednews_core::{parse_sources, Entry};
use ednews_crossref::{CrossrefConfig, DoiCache};

use super::*;
use crate::error::FeedError;
use crate::processor::{FetchContext, PostContext};

struct Named(&'static str);

#[async_trait]
impl Preprocessor for Named {
    fn name(&self) -> &str {
        self.0
    }

    async fn fetch(&self, _ctx: &FetchContext) -> Result<Vec<Entry>, FeedError> {
        Ok(Vec::new())
    }
}

#[async_trait]
impl EntryPostprocessor for Named {
    fn name(&self) -> &str {
        self.0
    }

    async fn run(
        &self,
        _entries: &[Entry],
        _ctx: &PostContext,
    ) -> Result<Option<Vec<Entry>>, FeedError> {
        Ok(None)
    }
}

fn crossref() -> CrossrefClient {
    CrossrefClient::new(&CrossrefConfig::default(), DoiCache::new()).expect("client builds")
}

#[test]
fn legacy_only_name_resolves_to_legacy() {
    let mut registry = ProcessorRegistry::new();
    registry.register_legacy_preprocessor("scholar_feed_processor", Arc::new(Named("legacy")));

    let resolved = registry.resolve_preprocessor("scholar").expect("legacy alias");
    assert_eq!(resolved.name(), "legacy");
    let exact = registry
        .resolve_preprocessor("scholar_feed_processor")
        .expect("legacy name");
    assert_eq!(exact.name(), "legacy");
}

#[test]
fn modern_name_wins_over_legacy() {
    let mut registry = ProcessorRegistry::new();
    registry.register_legacy_preprocessor("scholar", Arc::new(Named("legacy")));
    registry.register_preprocessor("scholar", Arc::new(Named("modern")));
    registry.register_legacy_postprocessor("scholar", Arc::new(Named("legacy-post")));
    registry.register_postprocessor("scholar", Arc::new(Named("modern-post")));

    assert_eq!(registry.resolve_preprocessor("scholar").unwrap().name(), "modern");
    assert_eq!(registry.resolve_postprocessor("scholar").unwrap().name(), "modern-post");
}

#[test]
fn legacy_postprocessor_alias() {
    let mut registry = ProcessorRegistry::new();
    registry.register_legacy_postprocessor("scholar_enricher", Arc::new(Named("legacy-post")));
    let resolved = registry.resolve_postprocessor("scholar").expect("alias");
    assert!(matches!(resolved, Postprocessor::InMemory(_)));
    assert_eq!(resolved.name(), "legacy-post");
}

#[test]
fn builtin_crossref_prefers_the_db_variant() {
    let registry = ProcessorRegistry::with_builtins(&crossref());
    assert!(matches!(
        registry.resolve_postprocessor("crossref"),
        Some(Postprocessor::Db(_))
    ));
    assert!(matches!(
        registry.resolve_postprocessor("crossref_enricher"),
        Some(Postprocessor::InMemory(_))
    ));
    assert_eq!(
        registry.resolve_preprocessor("crossref").map(|p| p.name().to_owned()),
        Some("crossref_feed_processor".to_owned())
    );
    assert!(registry.resolve_preprocessor("html-list").unwrap().accepts_page_url());
    assert!(!registry.resolve_preprocessor("rss").unwrap().accepts_page_url());
}

#[test]
fn resolve_sources_builds_every_chain() {
    let file = parse_sources(
        r#"{"feeds": {
            "aerj": {"feed": "https://example.org/aerj.rss", "processor": ["rss", "crossref"]},
            "district": {"link": "https://news.example.org", "processor": "html-list"},
            "plain": {"feed": "https://example.org/plain.rss"}
        }}"#,
        "test",
    )
    .unwrap();
    let resolved = resolve_sources(&file, &ProcessorRegistry::with_builtins(&crossref())).unwrap();

    assert_eq!(resolved.len(), 3);
    let aerj = &resolved[0];
    assert_eq!(aerj.source.key, "aerj");
    assert_eq!(aerj.pre.len(), 1);
    assert_eq!(aerj.post.len(), 1);
    assert_eq!(resolved[1].pre[0].name(), "html-list");
    assert_eq!(resolved[2].pre[0].name(), "rss");
    assert!(resolved[2].post.is_empty());
}

#[test]
fn unknown_processor_fails_resolution() {
    let file = parse_sources(
        r#"{"feeds": {"x": {"feed": "https://example.org", "processor": {"pre": "rss", "post": "nope"}}}}"#,
        "test",
    )
    .unwrap();
    let err = resolve_sources(&file, &ProcessorRegistry::with_builtins(&crossref())).unwrap_err();
    match err {
        ConfigError::UnknownProcessor {
            kind,
            name,
            source_key,
        } => {
            assert_eq!(kind, ProcessorKind::Post);
            assert_eq!(name, "nope");
            assert_eq!(source_key, "x");
        }
        other => panic!("expected UnknownProcessor, got {other:?}"),
    }
}
