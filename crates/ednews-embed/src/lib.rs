//! Optional vector-similarity layer over articles and headlines.
//!
//! Embeddings come from an [`Embedder`] (usually a text-embeddings HTTP
//! service) and are stored as little-endian `f32` blobs in `articles_vec` /
//! `headlines_vec`. Nearest-neighbour queries compute cosine distance in
//! process. When no embedder is configured, or the vector tables cannot be
//! created, the [`SimilarityIndex`] reports itself unavailable and every
//! operation degrades to an empty result.

pub mod embedder;
pub mod error;
pub mod index;
pub mod vector;

pub use embedder::{Embedder, HttpEmbedder};
pub use error::EmbedError;
pub use index::{SimilarityIndex, VectorTarget, DEFAULT_DIMS};
pub use vector::{blob_to_vec, cosine_distance, cosine_similarity, vec_to_blob};
