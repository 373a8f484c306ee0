//! Name → processor lookup, resolved once when configuration is loaded.
//!
//! Modern processors are registered under their short name (`rss`,
//! `crossref`). Legacy names from older configuration files
//! (`rss_feed_processor`, `crossref_enricher`) live in separate tables and
//! are only consulted when no modern processor matches.

use std::collections::HashMap;
use std::sync::Arc;

use ednews_core::{ConfigError, FeedSource, ProcessorKind, SourcesFile};
use ednews_crossref::CrossrefClient;

use crate::processor::{DbPostprocessor, EntryPostprocessor, Postprocessor, Preprocessor};
use crate::processors::{
    CategoryRssPreprocessor, CrossrefDbPostprocessor, CrossrefEnricher, CrossrefFeedPreprocessor,
    HtmlListPreprocessor, RssPreprocessor,
};

const LEGACY_PRE_SUFFIX: &str = "_feed_processor";
const LEGACY_POST_SUFFIX: &str = "_enricher";

#[derive(Default)]
pub struct ProcessorRegistry {
    pre: HashMap<String, Arc<dyn Preprocessor>>,
    legacy_pre: HashMap<String, Arc<dyn Preprocessor>>,
    db_post: HashMap<String, Arc<dyn DbPostprocessor>>,
    post: HashMap<String, Arc<dyn EntryPostprocessor>>,
    legacy_post: HashMap<String, Arc<dyn EntryPostprocessor>>,
}

impl std::fmt::Debug for ProcessorRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut pre: Vec<_> = self.pre.keys().chain(self.legacy_pre.keys()).collect();
        let mut post: Vec<_> = self
            .db_post
            .keys()
            .chain(self.post.keys())
            .chain(self.legacy_post.keys())
            .collect();
        pre.sort();
        post.sort();
        f.debug_struct("ProcessorRegistry")
            .field("pre", &pre)
            .field("post", &post)
            .finish()
    }
}

impl ProcessorRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry with every built-in processor, sharing one Crossref client.
    #[must_use]
    pub fn with_builtins(crossref: &CrossrefClient) -> Self {
        let mut registry = Self::new();

        let rss: Arc<dyn Preprocessor> = Arc::new(RssPreprocessor::default());
        registry.register_preprocessor("rss", Arc::clone(&rss));
        registry.register_preprocessor("category-rss", Arc::new(CategoryRssPreprocessor::default()));
        registry.register_preprocessor("html-list", Arc::new(HtmlListPreprocessor::default()));

        registry.register_db_postprocessor(
            "crossref",
            Arc::new(CrossrefDbPostprocessor::new(crossref.clone())),
        );

        registry.register_legacy_preprocessor("rss_feed_processor", rss);
        registry.register_legacy_preprocessor(
            "crossref_feed_processor",
            Arc::new(CrossrefFeedPreprocessor::new(crossref.clone())),
        );
        registry.register_legacy_postprocessor(
            "crossref_enricher",
            Arc::new(CrossrefEnricher::new("crossref_enricher", crossref.clone())),
        );

        registry
    }

    /// Register under `name`, replacing any earlier processor of that name.
    pub fn register_preprocessor(&mut self, name: &str, processor: Arc<dyn Preprocessor>) {
        self.pre.insert(name.to_owned(), processor);
    }

    pub fn register_legacy_preprocessor(&mut self, name: &str, processor: Arc<dyn Preprocessor>) {
        self.legacy_pre.insert(name.to_owned(), processor);
    }

    pub fn register_db_postprocessor(&mut self, name: &str, processor: Arc<dyn DbPostprocessor>) {
        self.db_post.insert(name.to_owned(), processor);
    }

    pub fn register_postprocessor(&mut self, name: &str, processor: Arc<dyn EntryPostprocessor>) {
        self.post.insert(name.to_owned(), processor);
    }

    pub fn register_legacy_postprocessor(
        &mut self,
        name: &str,
        processor: Arc<dyn EntryPostprocessor>,
    ) {
        self.legacy_post.insert(name.to_owned(), processor);
    }

    /// Look up a preprocessor: modern `name`, then legacy `name`, then legacy
    /// `<name>_feed_processor`.
    #[must_use]
    pub fn resolve_preprocessor(&self, name: &str) -> Option<Arc<dyn Preprocessor>> {
        self.pre
            .get(name)
            .or_else(|| self.legacy_pre.get(name))
            .or_else(|| self.legacy_pre.get(&format!("{name}{LEGACY_PRE_SUFFIX}")))
            .cloned()
    }

    /// Look up a postprocessor: DB-level `name`, in-memory `name`, legacy
    /// `name`, then legacy `<name>_enricher`.
    #[must_use]
    pub fn resolve_postprocessor(&self, name: &str) -> Option<Postprocessor> {
        if let Some(p) = self.db_post.get(name) {
            return Some(Postprocessor::Db(Arc::clone(p)));
        }
        self.post
            .get(name)
            .or_else(|| self.legacy_post.get(name))
            .or_else(|| self.legacy_post.get(&format!("{name}{LEGACY_POST_SUFFIX}")))
            .map(|p| Postprocessor::InMemory(Arc::clone(p)))
    }
}

/// A configured source with its processors looked up.
#[derive(Clone)]
pub struct ResolvedSource {
    pub source: FeedSource,
    pub pre: Vec<Arc<dyn Preprocessor>>,
    pub post: Vec<Postprocessor>,
}

impl std::fmt::Debug for ResolvedSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let pre: Vec<&str> = self.pre.iter().map(|p| p.name()).collect();
        f.debug_struct("ResolvedSource")
            .field("key", &self.source.key)
            .field("pre", &pre)
            .field("post", &self.post)
            .finish()
    }
}

/// Resolve every processor named in `sources`.
///
/// # Errors
///
/// Returns [`ConfigError::UnknownProcessor`] for the first name the registry
/// cannot resolve.
pub fn resolve_sources(
    sources: &SourcesFile,
    registry: &ProcessorRegistry,
) -> Result<Vec<ResolvedSource>, ConfigError> {
    sources
        .sources()
        .map(|source| {
            let unknown = |kind, name: &str| ConfigError::UnknownProcessor {
                kind,
                name: name.to_owned(),
                source_key: source.key.clone(),
            };
            let pre = source
                .processor
                .pre
                .iter()
                .map(|name| {
                    registry
                        .resolve_preprocessor(name)
                        .ok_or_else(|| unknown(ProcessorKind::Pre, name))
                })
                .collect::<Result<Vec<_>, _>>()?;
            let post = source
                .processor
                .post
                .iter()
                .map(|name| {
                    registry
                        .resolve_postprocessor(name)
                        .ok_or_else(|| unknown(ProcessorKind::Post, name))
                })
                .collect::<Result<Vec<_>, _>>()?;
            Ok(ResolvedSource {
                source: source.clone(),
                pre,
                post,
            })
        })
        .collect()
}

#[cfg(test)]
#[path = "registry_test.rs"]
mod tests;
