//! notes and their on-chain identifiers

use serde::{Deserialize, Serialize};

use crate::pool::PoolId;
use crate::secret::NoteSecret;

/// commitment to a note (the leaf that goes in the pool's tree)
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Commitment(pub [u8; 32]);

impl Commitment {
    pub fn to_bytes(&self) -> [u8; 32] {
        self.0
    }

    pub fn from_bytes(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }
}

impl AsRef<[u8]> for Commitment {
    fn as_ref(&self) -> &[u8] {
        &self.0
    }
}

impl std::fmt::Display for Commitment {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "0x{}", hex::encode(self.0))
    }
}

/// published at withdrawal time; unlinkable to the commitment without the
/// note's nullifier
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct NullifierHash(pub [u8; 32]);

impl NullifierHash {
    pub fn to_bytes(&self) -> [u8; 32] {
        self.0
    }

    pub fn from_bytes(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }
}

impl std::fmt::Display for NullifierHash {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "0x{}", hex::encode(self.0))
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum NoteStatus {
    PendingDeposit,
    Deposited,
    PendingWithdrawal,
    Withdrawn,
    Failed,
}

impl NoteStatus {
    pub fn is_pending(&self) -> bool {
        matches!(self, NoteStatus::PendingDeposit | NoteStatus::PendingWithdrawal)
    }

    /// has the deposit been observed on chain
    pub fn is_confirmed(&self) -> bool {
        matches!(
            self,
            NoteStatus::Deposited | NoteStatus::PendingWithdrawal | NoteStatus::Withdrawn
        )
    }
}

/// which transaction a pending mark refers to
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum Direction {
    Deposit,
    Withdrawal,
}

/// one deposit into one pool
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Note {
    pub pool_id: PoolId,
    pub commitment: Commitment,
    /// known only for notes this wallet owns
    pub nullifier_hash: Option<NullifierHash>,
    /// private material; absent for notes observed but not owned
    pub secret: Option<NoteSecret>,
    /// position in the pool's tree, assigned by chain order
    pub leaf_index: Option<u64>,
    pub deposit_block: Option<u64>,
    pub withdrawal_block: Option<u64>,
    /// amount in the pool currency's base unit
    pub amount: u128,
    pub status: NoteStatus,
    /// unix seconds at which the note entered its current pending state
    pub pending_since: Option<u64>,
}

impl Note {
    /// fresh note for owned key material, before any chain event
    pub fn owned(pool_id: PoolId, secret: NoteSecret, amount: u128, status: NoteStatus) -> Self {
        Self {
            pool_id,
            commitment: secret.commitment(),
            nullifier_hash: Some(secret.nullifier_hash()),
            secret: Some(secret),
            leaf_index: None,
            deposit_block: None,
            withdrawal_block: None,
            amount,
            status,
            pending_since: None,
        }
    }

    /// note seen on chain without private material
    pub fn foreign(pool_id: PoolId, commitment: Commitment, amount: u128) -> Self {
        Self {
            pool_id,
            commitment,
            nullifier_hash: None,
            secret: None,
            leaf_index: None,
            deposit_block: None,
            withdrawal_block: None,
            amount,
            status: NoteStatus::Deposited,
            pending_since: None,
        }
    }

    pub fn is_owned(&self) -> bool {
        self.secret.is_some()
    }
}
