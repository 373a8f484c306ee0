use std::collections::{BTreeMap, HashSet};
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::processor_spec::ProcessorSpec;
use crate::ConfigError;

/// One configured source (a journal feed, a news page, ...).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FeedSource {
    /// The map key this source was declared under. Filled in after parsing.
    #[serde(skip)]
    pub key: String,
    pub title: Option<String>,
    pub link: Option<String>,
    pub feed: Option<String>,
    pub publication_id: Option<String>,
    pub issn: Option<String>,
    #[serde(default)]
    pub processor: ProcessorSpec,
}

impl FeedSource {
    /// URL handed to the preprocessor: `feed`, falling back to `link`.
    #[must_use]
    pub fn fetch_url(&self) -> Option<&str> {
        [&self.feed, &self.link]
            .into_iter()
            .filter_map(|v| v.as_deref())
            .map(str::trim)
            .find(|v| !v.is_empty())
    }

    /// Human title, falling back to the key.
    #[must_use]
    pub fn display_title(&self) -> &str {
        self.title
            .as_deref()
            .filter(|t| !t.trim().is_empty())
            .unwrap_or(&self.key)
    }
}

/// Top-level shape of `research.json` / `news.json`.
#[derive(Debug, Clone, Deserialize)]
pub struct SourcesFile {
    pub title: Option<String>,
    #[serde(default)]
    pub feeds: BTreeMap<String, FeedSource>,
}

impl SourcesFile {
    /// Sources in key order.
    pub fn sources(&self) -> impl Iterator<Item = &FeedSource> {
        self.feeds.values()
    }
}

/// Load and validate a sources configuration file.
///
/// # Errors
///
/// Returns `ConfigError` if the file cannot be read, parsed, or fails validation.
pub fn load_sources(path: &Path) -> Result<SourcesFile, ConfigError> {
    let content = std::fs::read_to_string(path).map_err(|e| ConfigError::SourcesFileIo {
        path: path.display().to_string(),
        source: e,
    })?;

    parse_sources(&content, &path.display().to_string())
}

/// Parse and validate a sources configuration from a JSON string.
///
/// `origin` is only used in error messages.
///
/// # Errors
///
/// Returns [`ConfigError::SourcesFileParse`] on malformed JSON (including a
/// malformed `processor` field) or [`ConfigError::Validation`] on bad keys.
pub fn parse_sources(content: &str, origin: &str) -> Result<SourcesFile, ConfigError> {
    let mut file: SourcesFile =
        serde_json::from_str(content).map_err(|e| ConfigError::SourcesFileParse {
            path: origin.to_string(),
            source: e,
        })?;

    for (key, source) in &mut file.feeds {
        source.key.clone_from(key);
    }

    validate_sources(&file)?;

    Ok(file)
}

fn validate_sources(file: &SourcesFile) -> Result<(), ConfigError> {
    let mut seen_keys = HashSet::new();

    for source in file.feeds.values() {
        if source.key.trim().is_empty() {
            return Err(ConfigError::Validation(
                "source key must be non-empty".to_string(),
            ));
        }

        if !seen_keys.insert(source.key.trim().to_lowercase()) {
            return Err(ConfigError::Validation(format!(
                "duplicate source key (case-insensitive): '{}'",
                source.key
            )));
        }
    }

    Ok(())
}
