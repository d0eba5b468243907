//! Shared helpers for the integration tests.

use std::collections::BTreeMap;

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use simdex::config::IndexConfig;
use simdex::semantic::{ModelError, SemanticModel};
use simdex::{Document, DocumentId};

/// Reads a document's text as whitespace-separated vector components.
pub struct VectorTextModel {
    pub dimension: usize,
}

impl SemanticModel for VectorTextModel {
    fn name(&self) -> &str {
        "vector-text"
    }

    fn dimension(&self) -> usize {
        self.dimension
    }

    fn docs2vecs(&self, docs: &[&Document]) -> Result<Vec<Vec<f32>>, ModelError> {
        docs.iter()
            .map(|doc| {
                doc.text
                    .split_whitespace()
                    .map(|x| {
                        x.parse::<f32>()
                            .map_err(|e| ModelError::EmbeddingFailed(e.to_string()))
                    })
                    .collect()
            })
            .collect()
    }
}

pub fn vector_text(vector: &[f32]) -> String {
    vector
        .iter()
        .map(f32::to_string)
        .collect::<Vec<_>>()
        .join(" ")
}

pub fn batch(docs: &[(String, Vec<f32>)]) -> BTreeMap<DocumentId, Document> {
    docs.iter()
        .map(|(id, vector)| {
            (
                DocumentId::new(id.clone()),
                Document::new(id.as_str(), vector_text(vector)),
            )
        })
        .collect()
}

pub fn random_vectors(count: usize, dimension: usize, seed: u64) -> Vec<(String, Vec<f32>)> {
    let mut rng = StdRng::seed_from_u64(seed);
    (0..count)
        .map(|i| {
            let vector = (0..dimension)
                .map(|_| rng.random_range(-1.0f32..1.0))
                .collect();
            (format!("doc_{i}"), vector)
        })
        .collect()
}

pub fn small_config(shard_size: usize, top_sims: usize) -> IndexConfig {
    IndexConfig {
        shard_size,
        top_sims,
        chunk_size: 7,
        ..IndexConfig::default()
    }
}

pub fn cosine(a: &[f32], b: &[f32]) -> f32 {
    let dot: f32 = a.iter().zip(b).map(|(x, y)| x * y).sum();
    let na: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let nb: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();
    dot / (na * nb)
}
