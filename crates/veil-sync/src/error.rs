//! error types for ingestion and reconstruction

use thiserror::Error;
use veil_notes::NoteError;
use veil_tree::TreeError;

use crate::progress::{BlockRange, RunId};

#[derive(Debug, Error)]
pub enum SyncError {
    #[error("tree error: {0}")]
    Tree(#[from] TreeError),

    #[error("note error: {0}")]
    Note(#[from] NoteError),

    #[error("provider failed for blocks {range}: {cause}")]
    ProviderRange { range: BlockRange, cause: String },

    #[error("reconstruction failed: {0}")]
    ReconstructionFailed(String),

    #[error("reconstruction in progress on chain {chain_id}")]
    ReconstructionInProgress { chain_id: u64 },

    #[error("sync failed: {0}")]
    SyncFailed(String),

    #[error("leaf gap in {pool}: expected leaf {expected}, got {found}")]
    LeafGap { pool: String, expected: u64, found: u64 },

    #[error("invalid log: {0}")]
    InvalidLog(String),

    #[error("unknown pool: {0}")]
    UnknownPool(String),

    #[error("unknown run: {0}")]
    UnknownRun(RunId),

    #[error("invalid config: {0}")]
    InvalidConfig(String),

    #[error("rpc error: {0}")]
    Rpc(String),

    #[error("storage error: {0}")]
    Storage(String),

    #[error("serialization error: {0}")]
    Serialization(String),
}

pub type Result<T> = std::result::Result<T, SyncError>;
