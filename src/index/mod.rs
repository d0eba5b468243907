//! The similarity index and the pieces it is built from.

mod cache;
mod identity;
pub mod manifest;
pub mod persistence;
mod rank;
mod sim_index;

pub use cache::{SimilarityCache, merge_sims};
pub use identity::IdentityMap;
pub use manifest::IndexManifest;
pub use rank::{ScoreMode, apply_find_filter, rank_scores};
pub use sim_index::{SimilarityIndex, StagedBatch};
