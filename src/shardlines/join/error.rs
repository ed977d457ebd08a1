//! Join error kinds and cohort error codes.

use thiserror::Error;

use crate::shardlines::comm::CommError;
use crate::shardlines::predicate::PredicateError;
use crate::shardlines::store::StoreError;

pub type JoinResult<T> = Result<T, JoinError>;

#[derive(Debug, Error)]
pub enum JoinError {
    #[error("invalid join configuration: {reason}")]
    Config { reason: String },

    #[error("selection predicate rejected: {source}")]
    Filter {
        #[from]
        source: PredicateError,
    },

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error("malformed record shape: {reason}")]
    Shape { reason: String },

    #[error(transparent)]
    Transport(#[from] CommError),
}

impl JoinError {
    pub fn config(reason: impl Into<String>) -> Self {
        JoinError::Config {
            reason: reason.into(),
        }
    }

    pub fn shape(reason: impl Into<String>) -> Self {
        JoinError::Shape {
            reason: reason.into(),
        }
    }

    /// Error code carried into the final reduction; the cohort reports the
    /// maximum across peers. Zero is success.
    pub fn code(&self) -> u64 {
        match self {
            JoinError::Config { .. } => 1,
            JoinError::Filter { .. } => 2,
            JoinError::Store(StoreError::Predicate(_)) => 2,
            JoinError::Store(_) => 3,
            JoinError::Shape { .. } => 4,
            JoinError::Transport(_) => 5,
        }
    }
}
