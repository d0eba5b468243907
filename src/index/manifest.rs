//! Index manifest: the commit record of a persisted index.
//!
//! The manifest is the last thing written on every save. Its `length` is the
//! committed store length and its state reference names the state file that
//! belongs to that length.

use std::path::Path;

use chrono::Utc;
use serde::{Deserialize, Serialize};

use crate::error::{ErrorContext, IndexError, IndexResult};
use crate::index::persistence::{StateFile, write_atomic};
use crate::index::rank::ScoreMode;

const MANIFEST_FILE: &str = "manifest.json";

/// Unix timestamp in seconds.
pub fn get_utc_timestamp() -> u64 {
    Utc::now().timestamp() as u64
}

/// Persisted description of an index directory
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IndexManifest {
    /// Version of the manifest format
    pub version: u32,

    /// Dimension of stored vectors
    pub dimension: usize,

    /// Vectors per shard file
    pub shard_size: usize,

    /// Committed store length, ghosts included
    pub length: u64,

    /// Live documents at commit time
    pub live_count: usize,

    pub precompute: bool,
    pub score_mode: ScoreMode,
    pub top_sims: usize,
    pub include_self: bool,

    /// Name of the semantic model that produced the vectors
    pub model_name: Option<String>,

    /// Unix timestamp when created
    pub created_at: u64,

    /// Unix timestamp when last updated
    pub updated_at: u64,

    /// Incremented on every save
    pub generation: u64,

    pub state_file: String,
    pub state_checksum: String,
}

impl IndexManifest {
    /// Current manifest version
    pub const CURRENT_VERSION: u32 = 1;

    #[allow(clippy::too_many_arguments)]
    pub fn new(
        dimension: usize,
        shard_size: usize,
        precompute: bool,
        score_mode: ScoreMode,
        top_sims: usize,
        include_self: bool,
        model_name: Option<String>,
    ) -> Self {
        let now = get_utc_timestamp();
        Self {
            version: Self::CURRENT_VERSION,
            dimension,
            shard_size,
            length: 0,
            live_count: 0,
            precompute,
            score_mode,
            top_sims,
            include_self,
            model_name,
            created_at: now,
            updated_at: now,
            generation: 0,
            state_file: String::new(),
            state_checksum: String::new(),
        }
    }

    /// Records a new commit.
    pub fn commit(&mut self, length: u64, live_count: usize, state: StateFile) {
        self.length = length;
        self.live_count = live_count;
        self.state_file = state.file_name;
        self.state_checksum = state.checksum;
        self.updated_at = get_utc_timestamp();
    }

    /// Reference to the committed state file.
    pub fn state(&self) -> StateFile {
        StateFile {
            file_name: self.state_file.clone(),
            checksum: self.state_checksum.clone(),
        }
    }

    /// Save the manifest to `<dir>/manifest.json`
    pub fn save(&self, dir: &Path) -> IndexResult<()> {
        let json = serde_json::to_string_pretty(self).map_err(|e| IndexError::Serialization {
            what: "manifest",
            reason: e.to_string(),
        })?;
        write_atomic(&dir.join(MANIFEST_FILE), json.as_bytes())
    }

    /// Load the manifest from `<dir>/manifest.json`
    pub fn load(dir: &Path) -> IndexResult<Self> {
        let path = dir.join(MANIFEST_FILE);
        let json = std::fs::read_to_string(&path).with_path(&path)?;

        let manifest: Self = serde_json::from_str(&json).map_err(|e| IndexError::Corrupted {
            reason: format!("Failed to parse manifest: {e}"),
        })?;

        // Check version compatibility
        if manifest.version > Self::CURRENT_VERSION {
            return Err(IndexError::Corrupted {
                reason: format!(
                    "Manifest version {} is newer than supported version {}",
                    manifest.version,
                    Self::CURRENT_VERSION
                ),
            });
        }

        Ok(manifest)
    }

    /// Check if a manifest exists in `dir`
    pub fn exists(dir: &Path) -> bool {
        dir.join(MANIFEST_FILE).exists()
    }
}
