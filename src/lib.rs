//! Incremental document similarity index.
//!
//! Every document gets a precomputed list of its most similar peers, so
//! "find documents like X" is a lookup instead of a corpus scan. Adding a
//! batch updates existing lists in place rather than recomputing all pairs.

pub mod config;
pub mod display;
pub mod error;
pub mod index;
pub mod logging;
pub mod semantic;
pub mod server;
pub mod types;
pub mod vector;

pub use config::Settings;
pub use error::{IndexError, IndexResult};
pub use index::{ScoreMode, SimilarityIndex};
pub use semantic::{HashingModel, SemanticModel};
pub use server::{IndexServer, ServerStatus};
pub use types::{Document, DocumentId, Query, Sims};
