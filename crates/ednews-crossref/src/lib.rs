//! Crossref metadata enrichment: DOI lookup by title, work metadata, and
//! the helpers used to find DOIs inside feed entries.

pub mod cache;
pub mod client;
pub mod dates;
pub mod doi;
pub mod error;
pub(crate) mod retry;

pub use cache::DoiCache;
pub use client::{CrossrefClient, CrossrefConfig, JournalWork, JournalWorksQuery, WorkMetadata};
pub use dates::normalize_date_parts;
pub use doi::{
    doi_matches_publication, extract_doi_from_entry, extract_doi_from_text, normalize_doi,
    title_suitable_for_lookup,
};
pub use error::CrossrefError;
