//! veil notes
//!
//! one note per deposit into a privacy pool. the store tracks each note
//! through its lifecycle:
//!
//! ```text
//! PendingDeposit ──► Deposited ──► PendingWithdrawal ──► Withdrawn
//!       │                                  │
//!       └──────────────► Failed ◄──────────┘
//! ```
//!
//! withdrawals are matched by nullifier hash only. a withdrawal nobody here
//! owns is an orphan: recorded, never an error.

pub mod error;
pub mod note;
pub mod pool;
pub mod secret;
pub mod store;

pub use error::{NoteError, Result};
pub use note::{Commitment, Direction, Note, NoteStatus, NullifierHash};
pub use pool::PoolId;
pub use secret::NoteSecret;
pub use store::{DepositOutcome, NoteStore, OrphanedNullifier, PoolSnapshot, WithdrawalOutcome};

/// domain separator for note commitments
pub const NOTE_DOMAIN: &[u8] = b"veil.shielded-pool.note.v1";
/// domain separator for nullifier hashes
pub const NULLIFIER_DOMAIN: &[u8] = b"veil.shielded-pool.nullifier.v1";

/// prefix of note backup strings
pub const BACKUP_PREFIX: &str = "veil";
