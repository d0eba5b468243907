//! Semantic models: the text-to-vector side of the index.
//!
//! The index only sees the [`SemanticModel`] trait. Two implementations ship
//! with the crate: a feature-hashing model that is always available, and a
//! fastembed sentence-embedding model behind the `fastembed` cargo feature.

#[cfg(feature = "fastembed")]
mod fastembed_model;
mod hashing;
mod model;

#[cfg(feature = "fastembed")]
pub use fastembed_model::FastEmbedModel;
pub use hashing::{HashingModel, tokenize};
pub use model::{ModelError, SemanticModel, model_from_settings};
