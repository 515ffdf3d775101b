//! error types for the note store

use thiserror::Error;

use crate::note::NoteStatus;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum NoteError {
    #[error("invalid transition: {from:?} -> {to:?}")]
    InvalidTransition { from: NoteStatus, to: NoteStatus },

    #[error("unknown note: {0}")]
    UnknownNote(String),

    #[error("invalid note: {0}")]
    InvalidNote(String),

    #[error("serialization error: {0}")]
    Serialization(String),
}

pub type Result<T> = std::result::Result<T, NoteError>;
