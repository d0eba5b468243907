//! Durable vector storage.
//!
//! Vectors live in fixed-capacity, memory-mapped shard files and are scanned
//! brute-force: every query is scored against every stored vector, one shard
//! per rayon task.

mod shard;
mod similarity;
mod store;
mod types;

// Re-export core types for public API
pub use shard::{Shard, VectorStorageError};
pub use similarity::{cosine_similarity, dot, l2_norm, normalize_in_place, unit_vector};
pub use store::{ChunkIter, QueryNorm, VectorChunk, VectorStore};
pub use types::{Position, ShardId, VectorDimension, VectorError};
