//! Shared configuration and record types for the ednews pipeline.

pub mod app_config;
pub mod config;
pub mod entry;
pub mod processor_spec;
pub mod sources;

use thiserror::Error;

pub use app_config::AppConfig;
pub use config::{load_app_config, load_app_config_from_env};
pub use entry::{title_is_filtered, Entry, MISSING_PUBLISHED_SENTINEL};
pub use processor_spec::ProcessorSpec;
pub use sources::{load_sources, parse_sources, FeedSource, SourcesFile};

/// Which side of a source's pipeline a processor name belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProcessorKind {
    Pre,
    Post,
}

impl std::fmt::Display for ProcessorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ProcessorKind::Pre => write!(f, "preprocessor"),
            ProcessorKind::Post => write!(f, "postprocessor"),
        }
    }
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid value for {var}: {reason}")]
    InvalidEnvVar { var: String, reason: String },

    #[error("failed to read sources file {path}: {source}")]
    SourcesFileIo {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse sources file {path}: {source}")]
    SourcesFileParse {
        path: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("config validation error: {0}")]
    Validation(String),

    #[error("unknown {kind} '{name}' configured for source '{source_key}'")]
    UnknownProcessor {
        kind: ProcessorKind,
        name: String,
        source_key: String,
    },
}
