//! Feed ingestion: processor registry, built-in processors and the fetch
//! orchestrator that persists their output.

pub mod error;
pub mod fetch;
pub mod journal;
pub mod processor;
pub mod processors;
pub mod registry;
pub mod rematch;

pub use error::FeedError;
pub use fetch::{
    build_http_client, run_fetch, run_postprocess, FetchOptions, FetchSummary, SaveTarget,
    SourceReport, SourceStatus,
};
pub use processor::{
    DbPostprocessor, EntryPostprocessor, FetchContext, PostContext, Postprocessor, Preprocessor,
};
pub use journal::{run_issn_lookup, IssnLookupReport};
pub use registry::{resolve_sources, ProcessorRegistry, ResolvedSource};
pub use rematch::{run_rematch, RematchOptions, RematchReport, SourceRematch};
