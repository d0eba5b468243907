//! Memory-mapped shard files holding a fixed-capacity block of vectors.
//!
//! # Storage Format
//!
//! Each shard is one file, `shard_<n>.vec`:
//! - Header (16 bytes): magic `SVEC`, version, dimension, vector count
//! - Vectors: contiguous f32 rows in little-endian format
//!
//! Rows are appended with plain writes, fsync'ed, and only then counted in the
//! header. Readers go through a read-only memory map that is refreshed after
//! every append or truncation.

use std::fs::{File, OpenOptions};
use std::io::{self, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use memmap2::{Mmap, MmapOptions};
use thiserror::Error;

use crate::vector::similarity::dot;
use crate::vector::types::{ShardId, VectorDimension, VectorError};

/// Current storage format version.
const STORAGE_VERSION: u32 = 1;

/// Size of the storage header in bytes.
pub(crate) const HEADER_SIZE: usize = 16;

/// Magic bytes to identify shard files.
const MAGIC_BYTES: &[u8; 4] = b"SVEC";

/// Number of bytes per f32 value.
const BYTES_PER_F32: usize = 4;

/// Offset of the vector count inside the header.
const COUNT_OFFSET: u64 = 12;

/// Errors specific to vector storage operations.
#[derive(Error, Debug)]
pub enum VectorStorageError {
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    #[error("Invalid storage format: {0}")]
    InvalidFormat(String),

    #[error("Vector error: {0}")]
    Vector(#[from] VectorError),
}

/// A single shard file of the vector store.
#[derive(Debug)]
pub struct Shard {
    /// Path to the shard file.
    path: PathBuf,

    /// Read-only map of the whole file, header included.
    mmap: Option<Mmap>,

    /// Vector dimension (all rows share it).
    dimension: VectorDimension,

    /// Number of committed rows.
    count: usize,

    /// Ordinal of this shard inside the store.
    id: ShardId,
}

impl Shard {
    /// Creates a new, empty shard file. An existing file is overwritten.
    pub fn create(
        base_path: impl AsRef<Path>,
        id: ShardId,
        dimension: VectorDimension,
    ) -> Result<Self, VectorStorageError> {
        let path = Self::shard_path(base_path.as_ref(), id);
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let mut file = File::create(&path)?;
        Self::write_header(&mut file, dimension, 0)?;
        file.sync_all()?;

        let mut shard = Self {
            path,
            mmap: None,
            dimension,
            count: 0,
            id,
        };
        shard.remap()?;
        Ok(shard)
    }

    /// Opens an existing shard file.
    ///
    /// The row count is the smaller of the header count and the number of
    /// complete rows physically present, so a torn trailing row is ignored.
    pub fn open(base_path: impl AsRef<Path>, id: ShardId) -> Result<Self, VectorStorageError> {
        let path = Self::shard_path(base_path.as_ref(), id);

        if !path.exists() {
            return Err(VectorStorageError::Io(io::Error::new(
                io::ErrorKind::NotFound,
                format!("Shard file not found: {path:?}"),
            )));
        }

        let file = File::open(&path)?;
        let mmap = unsafe { MmapOptions::new().map(&file)? };

        let (version, dimension, header_count) = Self::read_header(&mmap)?;
        if version != STORAGE_VERSION {
            return Err(VectorError::VersionMismatch {
                expected: STORAGE_VERSION,
                actual: version,
            }
            .into());
        }

        let row_bytes = dimension.get() * BYTES_PER_F32;
        let physical_rows = (mmap.len() - HEADER_SIZE) / row_bytes;

        Ok(Self {
            path,
            mmap: Some(mmap),
            dimension,
            count: header_count.min(physical_rows),
            id,
        })
    }

    /// Appends rows to the shard and makes them durable.
    ///
    /// Rows must already be validated against the shard dimension.
    pub fn append<'a, I>(&mut self, rows: I) -> Result<usize, VectorStorageError>
    where
        I: IntoIterator<Item = &'a [f32]>,
    {
        let row_bytes = self.row_bytes();
        let mut buffer = Vec::new();
        let mut appended = 0usize;
        for row in rows {
            self.dimension.validate_vector(row)?;
            buffer.reserve(row_bytes);
            for &value in row {
                buffer.extend_from_slice(&value.to_le_bytes());
            }
            appended += 1;
        }
        if appended == 0 {
            return Ok(0);
        }

        self.mmap = None;
        let mut file = OpenOptions::new().write(true).open(&self.path)?;
        let data_end = (HEADER_SIZE + self.count * row_bytes) as u64;
        file.set_len(data_end)?;
        file.seek(SeekFrom::Start(data_end))?;
        file.write_all(&buffer)?;
        file.sync_data()?;

        self.count += appended;
        Self::write_count(&mut file, self.count)?;
        file.sync_all()?;

        self.remap()?;
        Ok(appended)
    }

    /// Discards every row at or beyond `len`.
    pub fn truncate(&mut self, len: usize) -> Result<(), VectorStorageError> {
        if len >= self.count {
            return Ok(());
        }

        self.mmap = None;
        let mut file = OpenOptions::new().write(true).open(&self.path)?;
        file.set_len((HEADER_SIZE + len * self.row_bytes()) as u64)?;
        self.count = len;
        Self::write_count(&mut file, self.count)?;
        file.sync_all()?;

        self.remap()
    }

    /// Reads one row.
    pub fn read_row(&self, row: usize) -> Result<Vec<f32>, VectorStorageError> {
        if row >= self.count {
            return Err(VectorError::PositionOutOfRange {
                position: row as u64,
                length: self.count as u64,
            }
            .into());
        }
        let mut out = Vec::with_capacity(self.dimension.get());
        self.read_rows_into(row, row + 1, &mut out)?;
        Ok(out)
    }

    /// Appends rows `start..end` to `out` as a flat row-major buffer.
    pub fn read_rows_into(
        &self,
        start: usize,
        end: usize,
        out: &mut Vec<f32>,
    ) -> Result<(), VectorStorageError> {
        let end = end.min(self.count);
        if start >= end {
            return Ok(());
        }
        let bytes = self.row_range_bytes(start, end)?;
        out.reserve((end - start) * self.dimension.get());
        out.extend(
            bytes
                .chunks_exact(BYTES_PER_F32)
                .map(|b| f32::from_le_bytes([b[0], b[1], b[2], b[3]])),
        );
        Ok(())
    }

    /// Scores every row of the shard against each query.
    ///
    /// Returns one vector per query with one raw dot product per row.
    pub fn score(&self, queries: &[&[f32]]) -> Result<Vec<Vec<f32>>, VectorStorageError> {
        let mut scores: Vec<Vec<f32>> = queries
            .iter()
            .map(|_| Vec::with_capacity(self.count))
            .collect();
        if self.count == 0 {
            return Ok(scores);
        }

        let dim = self.dimension.get();
        let bytes = self.row_range_bytes(0, self.count)?;
        let mut row = vec![0.0f32; dim];
        for raw in bytes.chunks_exact(dim * BYTES_PER_F32) {
            for (slot, b) in row.iter_mut().zip(raw.chunks_exact(BYTES_PER_F32)) {
                *slot = f32::from_le_bytes([b[0], b[1], b[2], b[3]]);
            }
            for (query, out) in queries.iter().zip(scores.iter_mut()) {
                out.push(dot(query, &row));
            }
        }
        Ok(scores)
    }

    /// Returns the number of committed rows.
    #[must_use]
    pub fn len(&self) -> usize {
        self.count
    }

    /// Returns true when the shard holds no rows.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.count == 0
    }

    /// Returns the vector dimension.
    #[must_use]
    pub fn dimension(&self) -> VectorDimension {
        self.dimension
    }

    /// Returns the ordinal of this shard.
    #[must_use]
    pub fn id(&self) -> ShardId {
        self.id
    }

    /// Returns the path of the shard file.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Returns the file name used for shard `id` under `base_path`.
    pub fn shard_path(base_path: &Path, id: ShardId) -> PathBuf {
        base_path.join(format!("shard_{}.vec", id.get()))
    }

    // Private helper methods

    fn row_bytes(&self) -> usize {
        self.dimension.get() * BYTES_PER_F32
    }

    fn row_range_bytes(&self, start: usize, end: usize) -> Result<&[u8], VectorStorageError> {
        let mmap = self.mmap.as_ref().ok_or_else(|| {
            VectorStorageError::InvalidFormat(format!("Shard {} is not mapped", self.id))
        })?;
        let from = HEADER_SIZE + start * self.row_bytes();
        let to = HEADER_SIZE + end * self.row_bytes();
        mmap.get(from..to).ok_or_else(|| {
            VectorStorageError::InvalidFormat(format!(
                "Shard {} is shorter than its row count {}",
                self.id, self.count
            ))
        })
    }

    fn remap(&mut self) -> Result<(), VectorStorageError> {
        let file = File::open(&self.path)?;
        self.mmap = Some(unsafe { MmapOptions::new().map(&file)? });
        Ok(())
    }

    fn write_header(
        file: &mut File,
        dimension: VectorDimension,
        count: usize,
    ) -> Result<(), io::Error> {
        file.write_all(MAGIC_BYTES)?;
        file.write_all(&STORAGE_VERSION.to_le_bytes())?;
        file.write_all(&(dimension.get() as u32).to_le_bytes())?;
        file.write_all(&(count as u32).to_le_bytes())?;
        Ok(())
    }

    fn write_count(file: &mut File, count: usize) -> Result<(), io::Error> {
        file.seek(SeekFrom::Start(COUNT_OFFSET))?;
        file.write_all(&(count as u32).to_le_bytes())?;
        Ok(())
    }

    fn read_header(mmap: &Mmap) -> Result<(u32, VectorDimension, usize), VectorStorageError> {
        if mmap.len() < HEADER_SIZE {
            return Err(VectorStorageError::InvalidFormat(
                "File too small to contain header".to_string(),
            ));
        }

        if &mmap[0..4] != MAGIC_BYTES {
            return Err(VectorStorageError::InvalidFormat(
                "Invalid magic bytes".to_string(),
            ));
        }

        let version = u32::from_le_bytes([mmap[4], mmap[5], mmap[6], mmap[7]]);
        let dim_value = u32::from_le_bytes([mmap[8], mmap[9], mmap[10], mmap[11]]);
        let dimension = VectorDimension::new(dim_value as usize)?;
        let count = u32::from_le_bytes([mmap[12], mmap[13], mmap[14], mmap[15]]) as usize;

        Ok((version, dimension, count))
    }
}
