//! Sentence-embedding model backed by fastembed.
//!
//! Produces normalised embeddings from an ONNX model. The model is downloaded
//! on first use, so the first call needs network access.

use std::sync::Mutex;

use fastembed::{EmbeddingModel, InitOptions, TextEmbedding};

use super::model::{ModelError, SemanticModel};
use crate::Document;

/// Supported model names and their output dimension.
const MODELS: &[(&str, usize)] = &[
    ("AllMiniLML6V2", 384),
    ("AllMiniLML12V2", 384),
    ("BGESmallENV15", 384),
    ("BGEBaseENV15", 768),
    ("MultilingualE5Small", 384),
];

fn parse_model(name: &str) -> Result<(EmbeddingModel, usize), ModelError> {
    let model = match name {
        "AllMiniLML6V2" => EmbeddingModel::AllMiniLML6V2,
        "AllMiniLML12V2" => EmbeddingModel::AllMiniLML12V2,
        "BGESmallENV15" => EmbeddingModel::BGESmallENV15,
        "BGEBaseENV15" => EmbeddingModel::BGEBaseENV15,
        "MultilingualE5Small" => EmbeddingModel::MultilingualE5Small,
        other => return Err(ModelError::UnknownModel(other.to_string())),
    };
    let dimension = MODELS
        .iter()
        .find(|(known, _)| *known == name)
        .map(|(_, dim)| *dim)
        .ok_or_else(|| ModelError::UnknownModel(name.to_string()))?;
    Ok((model, dimension))
}

/// fastembed wrapper implementing [`SemanticModel`].
pub struct FastEmbedModel {
    model: Mutex<TextEmbedding>,
    name: String,
    dimension: usize,
}

impl FastEmbedModel {
    /// Loads (downloading if needed) the named model.
    pub fn new(name: &str, show_download_progress: bool) -> Result<Self, ModelError> {
        let (kind, dimension) = parse_model(name)?;
        let model = TextEmbedding::try_new(
            InitOptions::new(kind).with_show_download_progress(show_download_progress),
        )
        .map_err(|e| {
            ModelError::EmbeddingFailed(format!(
                "Failed to initialize embedding model: {e}. Ensure you have internet connection for first-time model download"
            ))
        })?;

        Ok(Self {
            model: Mutex::new(model),
            name: name.to_string(),
            dimension,
        })
    }
}

impl SemanticModel for FastEmbedModel {
    fn name(&self) -> &str {
        &self.name
    }

    fn dimension(&self) -> usize {
        self.dimension
    }

    fn docs2vecs(&self, docs: &[&Document]) -> Result<Vec<Vec<f32>>, ModelError> {
        if docs.is_empty() {
            return Ok(Vec::new());
        }

        let texts: Vec<String> = docs.iter().map(|doc| doc.embedding_text()).collect();
        let embeddings = self
            .model
            .lock()
            .map_err(|_| {
                ModelError::EmbeddingFailed(
                    "Failed to acquire embedding model lock - model may be poisoned".to_string(),
                )
            })?
            .embed(texts, None)
            .map_err(|e| ModelError::EmbeddingFailed(e.to_string()))?;

        if embeddings.len() != docs.len() {
            return Err(ModelError::BatchSize {
                expected: docs.len(),
                actual: embeddings.len(),
            });
        }
        Ok(embeddings)
    }
}
