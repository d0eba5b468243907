//! Append-only vector store spread over fixed-capacity shards.
//!
//! Positions are global: shard `n` holds positions
//! `n * shard_size .. (n + 1) * shard_size`, and every shard except the last is
//! full. Vectors are stored unit-normalised, so a raw dot product against a
//! unit query is the cosine similarity.

use std::ops::Range;
use std::path::{Path, PathBuf};

use rayon::prelude::*;
use tracing::{debug, warn};

use crate::vector::shard::{Shard, VectorStorageError};
use crate::vector::similarity::unit_vector;
use crate::vector::types::{Position, ShardId, VectorDimension, VectorError};

/// How query vectors are treated by [`VectorStore::score_against`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueryNorm {
    /// Queries are scaled to unit length first; scores are cosine similarities.
    Normalize,
    /// Queries are used as given; scores are raw dot products.
    AsIs,
}

/// A run of consecutive stored vectors, never crossing a shard boundary.
#[derive(Debug, Clone)]
pub struct VectorChunk {
    start: Position,
    dimension: usize,
    data: Vec<f32>,
}

impl VectorChunk {
    /// Position of the first row.
    #[must_use]
    pub fn start(&self) -> Position {
        self.start
    }

    /// Number of rows in the chunk.
    #[must_use]
    pub fn len(&self) -> usize {
        self.data.len() / self.dimension
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Flat row-major data.
    #[must_use]
    pub fn data(&self) -> &[f32] {
        &self.data
    }

    #[must_use]
    pub fn dimension(&self) -> usize {
        self.dimension
    }
}

/// Disk-resident collection of fixed-dimension vectors.
#[derive(Debug)]
pub struct VectorStore {
    base_path: PathBuf,
    dimension: VectorDimension,
    shard_size: usize,
    shards: Vec<Shard>,
    len: u64,
}

impl VectorStore {
    /// Creates an empty store in `base_path`.
    ///
    /// Leftover shard files from an earlier store are removed.
    pub fn create(
        base_path: impl AsRef<Path>,
        dimension: VectorDimension,
        shard_size: usize,
    ) -> Result<Self, VectorStorageError> {
        let base_path = base_path.as_ref().to_path_buf();
        std::fs::create_dir_all(&base_path)?;
        let shard_size = Self::checked_shard_size(shard_size)?;

        let mut ordinal = 0u32;
        loop {
            let path = Shard::shard_path(&base_path, ShardId::new(ordinal));
            if !path.exists() {
                break;
            }
            std::fs::remove_file(&path)?;
            ordinal += 1;
        }

        Ok(Self {
            base_path,
            dimension,
            shard_size,
            shards: Vec::new(),
            len: 0,
        })
    }

    /// Opens the store in `base_path` at its last committed length.
    ///
    /// Rows past `committed_len` belong to an append that never committed and
    /// are discarded, as are shard files that only hold such rows.
    pub fn open(
        base_path: impl AsRef<Path>,
        dimension: VectorDimension,
        shard_size: usize,
        committed_len: u64,
    ) -> Result<Self, VectorStorageError> {
        let base_path = base_path.as_ref().to_path_buf();
        let shard_size = Self::checked_shard_size(shard_size)?;
        let mut shards = Vec::new();
        let mut remaining = committed_len;

        let mut ordinal = 0u32;
        loop {
            let id = ShardId::new(ordinal);
            let path = Shard::shard_path(&base_path, id);
            if !path.exists() {
                break;
            }
            ordinal += 1;

            if remaining == 0 {
                warn!("Removing uncommitted shard file {}", path.display());
                std::fs::remove_file(&path)?;
                continue;
            }

            let mut shard = Shard::open(&base_path, id)?;
            if shard.dimension() != dimension {
                return Err(VectorError::DimensionMismatch {
                    expected: dimension.get(),
                    actual: shard.dimension().get(),
                }
                .into());
            }

            let expected = remaining.min(shard_size as u64) as usize;
            if shard.len() < expected {
                return Err(VectorStorageError::InvalidFormat(format!(
                    "Shard {id} holds {} vectors but {expected} were committed",
                    shard.len()
                )));
            }
            if shard.len() > expected {
                warn!(
                    "Discarding {} uncommitted vectors from shard {id}",
                    shard.len() - expected
                );
                shard.truncate(expected)?;
            }
            remaining -= expected as u64;
            shards.push(shard);
        }

        if remaining > 0 {
            return Err(VectorStorageError::InvalidFormat(format!(
                "Store is missing {remaining} committed vectors"
            )));
        }

        debug!(
            "Opened vector store with {committed_len} vectors in {} shards",
            shards.len()
        );

        Ok(Self {
            base_path,
            dimension,
            shard_size,
            shards,
            len: committed_len,
        })
    }

    /// Appends vectors in order, filling the last shard before starting a new one.
    ///
    /// Every vector is validated before anything is written. Vectors are
    /// normalised to unit length on the way in. Returns the positions taken.
    pub fn append_batch(
        &mut self,
        vectors: &[Vec<f32>],
    ) -> Result<Range<Position>, VectorStorageError> {
        for vector in vectors {
            self.dimension.validate_vector(vector)?;
        }

        let start = Position::new(self.len);
        let normalized: Vec<Vec<f32>> = vectors.iter().map(|v| unit_vector(v)).collect();

        let mut pending = normalized.as_slice();
        while !pending.is_empty() {
            let needs_shard = self
                .shards
                .last()
                .is_none_or(|shard| shard.len() >= self.shard_size);
            if needs_shard {
                let id = ShardId::new(self.shards.len() as u32);
                self.shards
                    .push(Shard::create(&self.base_path, id, self.dimension)?);
            }

            let shard_size = self.shard_size;
            let Some(shard) = self.shards.last_mut() else {
                break;
            };
            let room = shard_size - shard.len();
            let (head, tail) = pending.split_at(room.min(pending.len()));
            shard.append(head.iter().map(Vec::as_slice))?;
            self.len += head.len() as u64;
            pending = tail;
        }

        Ok(start..Position::new(self.len))
    }

    /// Rolls the store back to `len` vectors.
    pub fn truncate(&mut self, len: u64) -> Result<(), VectorStorageError> {
        if len >= self.len {
            return Ok(());
        }

        let keep_shards = len.div_ceil(self.shard_size as u64) as usize;
        while self.shards.len() > keep_shards {
            if let Some(shard) = self.shards.pop() {
                std::fs::remove_file(shard.path())?;
            }
        }
        if let Some(last) = self.shards.last_mut() {
            let in_last = len - (keep_shards as u64 - 1) * self.shard_size as u64;
            last.truncate(in_last as usize)?;
        }

        self.len = len;
        Ok(())
    }

    /// Replays every stored vector in position order.
    ///
    /// Chunks hold at most `chunk_size` rows. The iterator reads lazily and
    /// can be started again at any time.
    pub fn iter_chunks(&self, chunk_size: usize) -> ChunkIter<'_> {
        ChunkIter {
            store: self,
            chunk_size: chunk_size.max(1),
            shard: 0,
            row: 0,
        }
    }

    /// Scores each query against every stored vector.
    ///
    /// Returns, per query, one score per position. Shards are scanned in
    /// parallel.
    pub fn score_against(
        &self,
        queries: &[Vec<f32>],
        norm: QueryNorm,
    ) -> Result<Vec<Vec<f32>>, VectorStorageError> {
        for query in queries {
            self.dimension.validate_vector(query)?;
        }

        let prepared: Vec<Vec<f32>> = match norm {
            QueryNorm::Normalize => queries.iter().map(|q| unit_vector(q)).collect(),
            QueryNorm::AsIs => queries.to_vec(),
        };
        let refs: Vec<&[f32]> = prepared.iter().map(Vec::as_slice).collect();

        let per_shard: Vec<Vec<Vec<f32>>> = self
            .shards
            .par_iter()
            .map(|shard| shard.score(&refs))
            .collect::<Result<_, _>>()?;

        let mut scores: Vec<Vec<f32>> = queries
            .iter()
            .map(|_| Vec::with_capacity(self.len as usize))
            .collect();
        for shard_scores in per_shard {
            for (out, part) in scores.iter_mut().zip(shard_scores) {
                out.extend(part);
            }
        }
        Ok(scores)
    }

    /// Reads the stored (unit-length) vector at `position`.
    pub fn vector(&self, position: Position) -> Result<Vec<f32>, VectorStorageError> {
        if position.get() >= self.len {
            return Err(VectorError::PositionOutOfRange {
                position: position.get(),
                length: self.len,
            }
            .into());
        }
        let shard = position.index() / self.shard_size;
        let row = position.index() % self.shard_size;
        self.shards[shard].read_row(row)
    }

    /// Number of stored vectors, ghosts included.
    #[must_use]
    pub fn len(&self) -> u64 {
        self.len
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    #[must_use]
    pub fn dimension(&self) -> VectorDimension {
        self.dimension
    }

    #[must_use]
    pub fn shard_size(&self) -> usize {
        self.shard_size
    }

    #[must_use]
    pub fn shard_count(&self) -> usize {
        self.shards.len()
    }

    #[must_use]
    pub fn base_path(&self) -> &Path {
        &self.base_path
    }

    fn checked_shard_size(shard_size: usize) -> Result<usize, VectorStorageError> {
        if shard_size == 0 {
            return Err(VectorStorageError::InvalidFormat(
                "Shard size must be at least 1".to_string(),
            ));
        }
        Ok(shard_size)
    }
}

/// Lazy chunked replay of a [`VectorStore`].
pub struct ChunkIter<'a> {
    store: &'a VectorStore,
    chunk_size: usize,
    shard: usize,
    row: usize,
}

impl Iterator for ChunkIter<'_> {
    type Item = Result<VectorChunk, VectorStorageError>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            let shard = self.store.shards.get(self.shard)?;
            if self.row >= shard.len() {
                self.shard += 1;
                self.row = 0;
                continue;
            }

            let end = (self.row + self.chunk_size).min(shard.len());
            let start = Position::new((self.shard * self.store.shard_size + self.row) as u64);
            let mut data = Vec::new();
            if let Err(e) = shard.read_rows_into(self.row, end, &mut data) {
                self.shard = self.store.shards.len();
                return Some(Err(e));
            }
            self.row = end;

            return Some(Ok(VectorChunk {
                start,
                dimension: self.store.dimension.get(),
                data,
            }));
        }
    }
}
