//! On-disk encoding of the identity map and similarity cache.
//!
//! The state file is bincode, lz4-compressed, and written under a
//! generation-specific name. A manifest pointing at it (with its SHA-256) is
//! written afterwards, so the manifest always names a complete state file.

use std::io::Write;
use std::path::Path;

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tempfile::NamedTempFile;

use crate::error::{ErrorContext, IndexError, IndexResult};
use crate::index::cache::SimilarityCache;
use crate::index::identity::IdentityMap;

#[derive(Serialize)]
struct StateRef<'a> {
    ids: &'a IdentityMap,
    sims: &'a SimilarityCache,
}

#[derive(Deserialize)]
struct StateOwned {
    ids: IdentityMap,
    sims: SimilarityCache,
}

/// Reference to a written state file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StateFile {
    pub file_name: String,
    pub checksum: String,
}

/// File name of the state written for `generation`.
pub fn state_file_name(generation: u64) -> String {
    format!("state_{generation}.bin")
}

/// Writes `bytes` to `path` through a temp file in the same directory.
pub fn write_atomic(path: &Path, bytes: &[u8]) -> IndexResult<()> {
    let dir = path.parent().unwrap_or_else(|| Path::new("."));
    std::fs::create_dir_all(dir).with_path(dir)?;

    let mut tmp = NamedTempFile::new_in(dir).with_path(dir)?;
    tmp.write_all(bytes).with_path(tmp.path())?;
    tmp.as_file().sync_all().with_path(tmp.path())?;
    tmp.persist(path).map_err(|e| IndexError::Io {
        path: path.to_path_buf(),
        source: e.error,
    })?;
    Ok(())
}

/// Hex SHA-256 of `bytes`.
pub fn checksum(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    format!("{:x}", hasher.finalize())
}

/// Encodes and writes the state for `generation` under `root`.
pub fn save_state(
    root: &Path,
    generation: u64,
    ids: &IdentityMap,
    sims: &SimilarityCache,
) -> IndexResult<StateFile> {
    let encoded = bincode::serde::encode_to_vec(StateRef { ids, sims }, bincode::config::standard())
        .map_err(|e| IndexError::Serialization {
            what: "index state",
            reason: e.to_string(),
        })?;
    let compressed = lz4_flex::compress_prepend_size(&encoded);

    let file_name = state_file_name(generation);
    write_atomic(&root.join(&file_name), &compressed)?;

    Ok(StateFile {
        file_name,
        checksum: checksum(&compressed),
    })
}

/// Reads and verifies a state file written by [`save_state`].
pub fn load_state(root: &Path, state: &StateFile) -> IndexResult<(IdentityMap, SimilarityCache)> {
    let path = root.join(&state.file_name);
    let compressed = std::fs::read(&path).with_path(&path)?;

    let actual = checksum(&compressed);
    if actual != state.checksum {
        return Err(IndexError::Corrupted {
            reason: format!(
                "checksum mismatch for {}: expected {}, found {actual}",
                state.file_name, state.checksum
            ),
        });
    }

    let encoded =
        lz4_flex::decompress_size_prepended(&compressed).map_err(|e| IndexError::Corrupted {
            reason: format!("{} does not decompress: {e}", state.file_name),
        })?;
    let (decoded, _): (StateOwned, usize) =
        bincode::serde::decode_from_slice(&encoded, bincode::config::standard()).map_err(
            |e| IndexError::Corrupted {
                reason: format!("{} does not decode: {e}", state.file_name),
            },
        )?;

    Ok((decoded.ids, decoded.sims))
}
