//! The text-to-vector contract the index consumes.

use thiserror::Error;

use crate::Document;
use crate::config::{ModelConfig, ModelKind};

/// Errors raised by a semantic model.
#[derive(Error, Debug)]
pub enum ModelError {
    #[error("Failed to generate embeddings: {0}")]
    EmbeddingFailed(String),

    #[error("Model returned {actual} vectors for {expected} documents")]
    BatchSize { expected: usize, actual: usize },

    #[error("Unknown model '{0}'\nSuggestion: Check the model name in the [model] section")]
    UnknownModel(String),

    #[error(
        "Model '{0}' is not available in this build\nSuggestion: Rebuild with `--features fastembed` or use kind = \"hashing\""
    )]
    Unavailable(String),

    #[error("Invalid model configuration: {0}")]
    InvalidConfig(String),
}

/// Converts documents into dense vectors.
///
/// Implementations must be deterministic for a given document and return one
/// vector of length [`dimension`](Self::dimension) per input, in input order.
pub trait SemanticModel: Send + Sync {
    /// Stable name recorded in the index manifest.
    fn name(&self) -> &str;

    /// Length of every produced vector.
    fn dimension(&self) -> usize;

    /// Batch conversion.
    fn docs2vecs(&self, docs: &[&Document]) -> Result<Vec<Vec<f32>>, ModelError>;

    /// Single-document conversion.
    fn doc2vec(&self, doc: &Document) -> Result<Vec<f32>, ModelError> {
        let mut vectors = self.docs2vecs(&[doc])?;
        match vectors.pop() {
            Some(vector) if vectors.is_empty() => Ok(vector),
            _ => Err(ModelError::BatchSize {
                expected: 1,
                actual: vectors.len() + 1,
            }),
        }
    }
}

/// Builds the model selected in the configuration.
pub fn model_from_settings(config: &ModelConfig) -> Result<Box<dyn SemanticModel>, ModelError> {
    match config.kind {
        ModelKind::Hashing => Ok(Box::new(super::HashingModel::new(config.dimension)?)),
        #[cfg(feature = "fastembed")]
        ModelKind::Fastembed => Ok(Box::new(super::FastEmbedModel::new(
            &config.fastembed_model,
            false,
        )?)),
        #[cfg(not(feature = "fastembed"))]
        ModelKind::Fastembed => Err(ModelError::Unavailable(config.fastembed_model.clone())),
    }
}
