//! Error types for the similarity index
//!
//! This module provides structured error types using thiserror for better
//! error handling and actionable error messages.

use crate::DocumentId;
use crate::semantic::ModelError;
use crate::vector::{VectorError, VectorStorageError};
use std::path::PathBuf;
use thiserror::Error;

/// Main error type for index operations
#[derive(Error, Debug)]
pub enum IndexError {
    /// Vector length differs from the index dimension
    #[error(
        "Vector dimension mismatch: index expects {expected}, got {actual}. The semantic model does not match the index."
    )]
    DimensionMismatch { expected: usize, actual: usize },

    /// Precondition errors
    #[error("No semantic model is loaded. Set a model before indexing documents.")]
    NoModel,

    #[error("The index has not been created yet. Index some documents first.")]
    Uninitialized,

    #[error("Documents not found in index: {}", join_ids(.ids))]
    NotFound { ids: Vec<DocumentId> },

    /// Identity map invariants
    #[error(
        "Identity map is inconsistent: {id_count} ids but {position_count} positions after rebuild"
    )]
    ConsistencyViolation {
        id_count: usize,
        position_count: usize,
    },

    #[error(
        "Index changed while the batch was being prepared (expected {expected} vectors, found {actual})"
    )]
    StaleBatch { expected: u64, actual: u64 },

    /// Storage errors
    #[error("Vector storage failed: {0}")]
    Storage(#[from] VectorStorageError),

    #[error("Failed to access '{path}': {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Failed to serialize {what}: {reason}")]
    Serialization { what: &'static str, reason: String },

    #[error("Index appears to be corrupted: {reason}")]
    Corrupted { reason: String },

    /// Collaborator errors
    #[error("Semantic model failed: {0}")]
    Model(#[from] ModelError),

    /// Configuration errors
    #[error("Invalid configuration: {reason}")]
    Config { reason: String },
}

fn join_ids(ids: &[DocumentId]) -> String {
    ids.iter()
        .map(DocumentId::as_str)
        .collect::<Vec<_>>()
        .join(", ")
}

impl From<VectorError> for IndexError {
    fn from(err: VectorError) -> Self {
        match err {
            VectorError::DimensionMismatch { expected, actual } => {
                Self::DimensionMismatch { expected, actual }
            }
            other => Self::Storage(VectorStorageError::Vector(other)),
        }
    }
}

impl IndexError {
    /// Get a stable status code for this error type.
    ///
    /// Returns a string identifier that can be used in JSON responses
    /// for programmatic error handling.
    pub fn status_code(&self) -> String {
        match self {
            Self::DimensionMismatch { .. } => "DIMENSION_MISMATCH",
            Self::Storage(VectorStorageError::Vector(VectorError::DimensionMismatch { .. })) => {
                "DIMENSION_MISMATCH"
            }
            Self::NoModel => "NO_MODEL",
            Self::Uninitialized => "UNINITIALIZED",
            Self::NotFound { .. } => "NOT_FOUND",
            Self::ConsistencyViolation { .. } => "CONSISTENCY_VIOLATION",
            Self::StaleBatch { .. } => "STALE_BATCH",
            Self::Storage(_) => "STORAGE_ERROR",
            Self::Io { .. } => "IO_ERROR",
            Self::Serialization { .. } => "SERIALIZATION_ERROR",
            Self::Corrupted { .. } => "INDEX_CORRUPTED",
            Self::Model(_) => "MODEL_ERROR",
            Self::Config { .. } => "CONFIG_ERROR",
        }
        .to_string()
    }

    /// True for errors that leave the index unusable until rebuilt.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            Self::DimensionMismatch { .. }
                | Self::ConsistencyViolation { .. }
                | Self::Corrupted { .. }
        )
    }

    /// Get recovery suggestions for this error
    pub fn recovery_suggestions(&self) -> Vec<&'static str> {
        match self {
            Self::DimensionMismatch { .. } => vec![
                "Use the same semantic model that built the index",
                "Or drop the index and rebuild it with 'simdex index'",
            ],
            Self::NoModel => vec![
                "Configure a model in .simdex/settings.toml under [model]",
                "Run 'simdex init' to create a default configuration",
            ],
            Self::Uninitialized => vec!["Run 'simdex index <FILE>' to create the index"],
            Self::NotFound { .. } => vec![
                "Check the document ids with 'simdex status'",
                "Documents must be indexed before they can be queried or deleted",
            ],
            Self::ConsistencyViolation { .. } | Self::Corrupted { .. } => vec![
                "Drop the index directory and rebuild from the source documents",
                "Check for disk errors or filesystem corruption",
            ],
            Self::StaleBatch { .. } => vec!["Retry the operation, the batch was not applied"],
            Self::Storage(_) | Self::Io { .. } => vec![
                "Check disk space and permissions in the index directory",
                "The last committed state is kept, retry the operation",
            ],
            Self::Model(_) => vec!["Check the [model] section of the configuration"],
            _ => vec![],
        }
    }
}

/// Result type alias for index operations
pub type IndexResult<T> = Result<T, IndexError>;

/// Helper trait for attaching a path to I/O errors
pub trait ErrorContext<T> {
    fn with_path(self, path: &std::path::Path) -> Result<T, IndexError>;
}

impl<T> ErrorContext<T> for Result<T, std::io::Error> {
    fn with_path(self, path: &std::path::Path) -> Result<T, IndexError> {
        self.map_err(|source| IndexError::Io {
            path: path.to_path_buf(),
            source,
        })
    }
}
