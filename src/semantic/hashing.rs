//! Feature-hashing model.
//!
//! Deterministic, dependency-free embeddings: every token hashes (FNV-1a) to
//! one signed bucket. Captures lexical overlap only, which is enough for tests
//! and for corpora where shared vocabulary is the similarity signal.

use super::model::{ModelError, SemanticModel};
use crate::Document;
use crate::vector::normalize_in_place;

/// FNV-1a offset basis (64-bit).
const FNV_OFFSET: u64 = 0xcbf2_9ce4_8422_2325;

/// FNV-1a prime (64-bit).
const FNV_PRIME: u64 = 0x0100_0000_01b3;

const MIN_TOKEN_LEN: usize = 2;
const MAX_TOKEN_LEN: usize = 15;

/// Hashing model with a fixed number of buckets.
#[derive(Debug, Clone)]
pub struct HashingModel {
    dimension: usize,
    name: String,
}

impl HashingModel {
    pub fn new(dimension: usize) -> Result<Self, ModelError> {
        if dimension == 0 {
            return Err(ModelError::InvalidConfig(
                "hashing model dimension must be at least 1".to_string(),
            ));
        }
        Ok(Self {
            dimension,
            name: format!("hashing-{dimension}"),
        })
    }

    /// Embeds raw text.
    pub fn embed_text(&self, text: &str) -> Vec<f32> {
        let mut embedding = vec![0.0_f32; self.dimension];
        for token in tokenize(text) {
            let hash = fnv1a_hash(token.as_bytes());
            let index = (hash % self.dimension as u64) as usize;
            let sign = if (hash >> 63) == 1 { 1.0 } else { -1.0 };
            embedding[index] += sign;
        }
        normalize_in_place(&mut embedding);
        embedding
    }
}

impl SemanticModel for HashingModel {
    fn name(&self) -> &str {
        &self.name
    }

    fn dimension(&self) -> usize {
        self.dimension
    }

    fn docs2vecs(&self, docs: &[&Document]) -> Result<Vec<Vec<f32>>, ModelError> {
        Ok(docs
            .iter()
            .map(|doc| self.embed_text(&doc.embedding_text()))
            .collect())
    }
}

/// Lowercased alphabetic tokens of 2 to 15 characters, skipping `_`-prefixed ones.
pub fn tokenize(text: &str) -> Vec<String> {
    text.split(|c: char| !(c.is_alphabetic() || c == '_'))
        .filter(|token| !token.starts_with('_'))
        .filter(|token| (MIN_TOKEN_LEN..=MAX_TOKEN_LEN).contains(&token.chars().count()))
        .map(str::to_lowercase)
        .collect()
}

fn fnv1a_hash(bytes: &[u8]) -> u64 {
    let mut hash = FNV_OFFSET;
    for &byte in bytes {
        hash ^= u64::from(byte);
        hash = hash.wrapping_mul(FNV_PRIME);
    }
    hash
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::vector::{cosine_similarity, l2_norm};

    #[test]
    fn test_tokenize_filters_like_simple_preprocess() {
        let tokens = tokenize("The quick_fox x _private 42abc Supercalifragilistic!");
        assert_eq!(tokens, vec!["the", "quick_fox", "abc"]);
    }

    #[test]
    fn test_embedding_is_deterministic_and_unit_length() {
        let model = HashingModel::new(64).unwrap();
        let a = model.embed_text("graph minors survey");
        let b = model.embed_text("graph minors survey");
        assert_eq!(a, b);
        assert_eq!(a.len(), 64);
        assert!((l2_norm(&a) - 1.0).abs() < 1e-5);
    }

    #[test]
    fn test_shared_vocabulary_scores_higher() {
        let model = HashingModel::new(512).unwrap();
        let base = model.embed_text("human computer interaction interface");
        let close = model.embed_text("computer interface for human users");
        let far = model.embed_text("trees graph minors paths");

        assert!(cosine_similarity(&base, &close) > cosine_similarity(&base, &far));
    }

    #[test]
    fn test_empty_text_gives_zero_vector() {
        let model = HashingModel::new(8).unwrap();
        assert_eq!(model.embed_text("a 1 _"), vec![0.0; 8]);
    }

    #[test]
    fn test_docs2vecs_uses_title() {
        let model = HashingModel::new(32).unwrap();
        let plain = Document::new("a", "body");
        let titled = Document::new("a", "body").with_title("heading");

        let vecs = model.docs2vecs(&[&plain, &titled]).unwrap();
        assert_eq!(vecs.len(), 2);
        assert_ne!(vecs[0], vecs[1]);
        assert!(HashingModel::new(0).is_err());
    }
}
