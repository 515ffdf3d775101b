//! error types for the commitment tree

use thiserror::Error;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum TreeError {
    #[error("tree is full: capacity {capacity}")]
    CapacityExceeded { capacity: u64 },

    #[error("leaf index {index} out of range (tree has {len} leaves)")]
    IndexOutOfRange { index: u64, len: u64 },

    /// structural invariant violated; never repaired automatically
    #[error("tree corruption: {0}")]
    TreeCorruption(String),

    #[error("invalid tree depth {0}, must be between 1 and 32")]
    InvalidLevels(usize),

    #[error("serialization error: {0}")]
    Serialization(String),
}

pub type Result<T> = std::result::Result<T, TreeError>;
