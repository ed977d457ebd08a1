//! Shard store error types.

use std::path::{Path, PathBuf};

use thiserror::Error;

use crate::shardlines::predicate::PredicateError;

pub type StoreResult<T> = Result<T, StoreError>;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("shard I/O failed at '{path}': {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("segment line {line} in '{path}' is not a valid record: {source}")]
    CorruptSegment {
        path: PathBuf,
        line: u64,
        #[source]
        source: serde_json::Error,
    },

    #[error("shard metadata at '{path}' is unusable: {reason}")]
    Metadata { path: PathBuf, reason: String },

    #[error("row {row_index} out of bounds for a shard holding {len} records")]
    RowOutOfBounds { row_index: u64, len: u64 },

    #[error("expected a JSON object record, found {found}")]
    NotAnObject { found: &'static str },

    #[error("shard at '{path}' is read-only")]
    ReadOnly { path: PathBuf },

    #[error(transparent)]
    Predicate(#[from] PredicateError),
}

impl StoreError {
    pub fn io(path: impl AsRef<Path>, source: std::io::Error) -> Self {
        StoreError::Io {
            path: path.as_ref().to_path_buf(),
            source,
        }
    }

    pub fn metadata(path: impl AsRef<Path>, reason: impl Into<String>) -> Self {
        StoreError::Metadata {
            path: path.as_ref().to_path_buf(),
            reason: reason.into(),
        }
    }
}
