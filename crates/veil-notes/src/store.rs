//! the note store
//!
//! keyed by commitment, with a nullifier-hash index for matching
//! withdrawals. chain events are applied idempotently so a rescan can replay
//! history over an existing store.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::error::{NoteError, Result};
use crate::note::{Commitment, Direction, Note, NoteStatus, NullifierHash};
use crate::pool::PoolId;
use crate::secret::NoteSecret;

/// key material the wallet holds for a commitment it may not have seen yet
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
struct OwnedSecret {
    pool_id: PoolId,
    secret: NoteSecret,
    amount: u128,
}

/// a withdrawal nobody in this store could be matched to
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrphanedNullifier {
    pub pool_id: PoolId,
    pub nullifier_hash: NullifierHash,
    pub block: u64,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DepositOutcome {
    /// new note in `Deposited`
    Created,
    /// pending note confirmed
    Upgraded,
    /// replay of an already applied deposit
    Unchanged,
    /// same commitment seen at a new position (reorg)
    Moved { from: Option<u64> },
    /// not ours and foreign deposits are not retained
    Ignored,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum WithdrawalOutcome {
    Withdrawn(Commitment),
    /// replay of an already applied withdrawal
    AlreadyWithdrawn(Commitment),
    /// no note matches; recorded as an observation
    Orphaned,
}

/// one pool's notes and orphans at a point in time
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PoolSnapshot {
    pool_id: PoolId,
    notes: Vec<Note>,
    orphaned: Vec<OrphanedNullifier>,
}

impl PoolSnapshot {
    pub fn pool_id(&self) -> &PoolId {
        &self.pool_id
    }
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct NoteStore {
    notes: HashMap<Commitment, Note>,
    by_nullifier: HashMap<NullifierHash, Commitment>,
    secrets: HashMap<Commitment, OwnedSecret>,
    orphaned: HashMap<NullifierHash, OrphanedNullifier>,
    /// keep deposits we hold no key material for
    retain_foreign: bool,
}

impl NoteStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// store that also records every deposit it is shown, owned or not
    pub fn retaining_foreign() -> Self {
        Self {
            retain_foreign: true,
            ..Self::default()
        }
    }

    /// register key material; the note appears once a deposit is observed or
    /// marked pending
    pub fn import_secret(&mut self, pool_id: PoolId, secret: NoteSecret, amount: u128) -> Commitment {
        let commitment = secret.commitment();
        self.by_nullifier.insert(secret.nullifier_hash(), commitment);
        self.secrets.insert(commitment, OwnedSecret { pool_id, secret, amount });

        // upgrade a foreign note we already saw
        if let Some(note) = self.notes.get_mut(&commitment) {
            if note.secret.is_none() {
                note.secret = Some(secret);
                note.nullifier_hash = Some(secret.nullifier_hash());
            }
        }
        commitment
    }

    /// apply a deposit event.
    ///
    /// replaying the same commitment at the same leaf and block is a no-op.
    pub fn record_deposit(
        &mut self,
        pool_id: &PoolId,
        commitment: Commitment,
        leaf_index: u64,
        block: u64,
        amount: u128,
    ) -> Result<DepositOutcome> {
        let Some(note) = self.notes.get_mut(&commitment) else {
            let mut note = match self.secrets.get(&commitment) {
                Some(owned) => Note::owned(owned.pool_id.clone(), owned.secret, amount, NoteStatus::Deposited),
                None if self.retain_foreign => Note::foreign(pool_id.clone(), commitment, amount),
                None => return Ok(DepositOutcome::Ignored),
            };
            note.leaf_index = Some(leaf_index);
            note.deposit_block = Some(block);
            debug!("deposit {} at leaf {} (block {})", commitment, leaf_index, block);
            self.notes.insert(commitment, note);
            return Ok(DepositOutcome::Created);
        };

        match note.status {
            NoteStatus::PendingDeposit => {
                note.status = NoteStatus::Deposited;
                note.leaf_index = Some(leaf_index);
                note.deposit_block = Some(block);
                note.amount = amount;
                note.pending_since = None;
                info!("pending deposit {} confirmed at leaf {}", commitment, leaf_index);
                Ok(DepositOutcome::Upgraded)
            }
            NoteStatus::Deposited | NoteStatus::PendingWithdrawal | NoteStatus::Withdrawn => {
                if note.leaf_index == Some(leaf_index) && note.deposit_block == Some(block) {
                    return Ok(DepositOutcome::Unchanged);
                }
                let from = note.leaf_index;
                warn!(
                    "deposit {} moved from leaf {:?} (block {:?}) to leaf {} (block {})",
                    commitment, from, note.deposit_block, leaf_index, block
                );
                note.leaf_index = Some(leaf_index);
                note.deposit_block = Some(block);
                Ok(DepositOutcome::Moved { from })
            }
            NoteStatus::Failed => Err(NoteError::InvalidTransition {
                from: NoteStatus::Failed,
                to: NoteStatus::Deposited,
            }),
        }
    }

    /// apply a withdrawal event by nullifier hash
    pub fn record_withdrawal(
        &mut self,
        pool_id: &PoolId,
        nullifier_hash: NullifierHash,
        block: u64,
    ) -> Result<WithdrawalOutcome> {
        let note = self
            .by_nullifier
            .get(&nullifier_hash)
            .and_then(|commitment| self.notes.get_mut(commitment));

        let Some(note) = note else {
            // ownership of withdrawals is opportunistic
            self.orphaned.entry(nullifier_hash).or_insert_with(|| {
                debug!("orphaned nullifier {} in {} (block {})", nullifier_hash, pool_id, block);
                OrphanedNullifier {
                    pool_id: pool_id.clone(),
                    nullifier_hash,
                    block,
                }
            });
            return Ok(WithdrawalOutcome::Orphaned);
        };

        match note.status {
            NoteStatus::Deposited | NoteStatus::PendingWithdrawal => {
                note.status = NoteStatus::Withdrawn;
                note.withdrawal_block = Some(block);
                note.pending_since = None;
                info!("note {} withdrawn at block {}", note.commitment, block);
                Ok(WithdrawalOutcome::Withdrawn(note.commitment))
            }
            NoteStatus::Withdrawn => Ok(WithdrawalOutcome::AlreadyWithdrawn(note.commitment)),
            from => Err(NoteError::InvalidTransition {
                from,
                to: NoteStatus::Withdrawn,
            }),
        }
    }

    /// mark a transaction as submitted but not yet observed on chain
    pub fn mark_pending(&mut self, commitment: Commitment, direction: Direction, now: u64) -> Result<()> {
        match direction {
            Direction::Deposit => {
                if let Some(note) = self.notes.get(&commitment) {
                    return match note.status {
                        NoteStatus::PendingDeposit => Ok(()),
                        from => Err(NoteError::InvalidTransition {
                            from,
                            to: NoteStatus::PendingDeposit,
                        }),
                    };
                }
                let owned = self
                    .secrets
                    .get(&commitment)
                    .ok_or_else(|| NoteError::UnknownNote(commitment.to_string()))?;
                let mut note = Note::owned(
                    owned.pool_id.clone(),
                    owned.secret,
                    owned.amount,
                    NoteStatus::PendingDeposit,
                );
                note.pending_since = Some(now);
                self.notes.insert(commitment, note);
                Ok(())
            }
            Direction::Withdrawal => {
                let note = self
                    .notes
                    .get_mut(&commitment)
                    .ok_or_else(|| NoteError::UnknownNote(commitment.to_string()))?;
                match note.status {
                    NoteStatus::PendingWithdrawal => Ok(()),
                    NoteStatus::Deposited if note.is_owned() => {
                        note.status = NoteStatus::PendingWithdrawal;
                        note.pending_since = Some(now);
                        Ok(())
                    }
                    from => Err(NoteError::InvalidTransition {
                        from,
                        to: NoteStatus::PendingWithdrawal,
                    }),
                }
            }
        }
    }

    /// explicit failure signal for a pending transaction (e.g. reverted)
    pub fn mark_failed(&mut self, commitment: Commitment) -> Result<()> {
        let note = self
            .notes
            .get_mut(&commitment)
            .ok_or_else(|| NoteError::UnknownNote(commitment.to_string()))?;
        if !note.status.is_pending() {
            return Err(NoteError::InvalidTransition {
                from: note.status,
                to: NoteStatus::Failed,
            });
        }
        warn!("note {} failed while {:?}", commitment, note.status);
        note.status = NoteStatus::Failed;
        note.pending_since = None;
        Ok(())
    }

    /// settle pending notes older than `timeout` seconds.
    ///
    /// a deposit never observed fails; a withdrawal never observed reverts to
    /// `Deposited`. returns the notes that changed with their new status.
    pub fn reconcile_pending(&mut self, now: u64, timeout: u64) -> Vec<(Commitment, NoteStatus)> {
        let mut changed = Vec::new();
        for note in self.notes.values_mut() {
            let Some(since) = note.pending_since else {
                continue;
            };
            if now.saturating_sub(since) < timeout {
                continue;
            }
            let next = match note.status {
                NoteStatus::PendingDeposit => NoteStatus::Failed,
                NoteStatus::PendingWithdrawal => NoteStatus::Deposited,
                _ => continue,
            };
            warn!("pending note {} timed out: {:?} -> {:?}", note.commitment, note.status, next);
            note.status = next;
            note.pending_since = None;
            changed.push((note.commitment, next));
        }
        changed.sort_by_key(|(c, _)| *c);
        changed
    }

    /// forget chain-derived state for a pool before a from-genesis rebuild.
    ///
    /// confirmed notes are dropped (they come back from the replay), pending
    /// and failed notes plus imported key material are kept.
    pub fn clear_chain_state(&mut self, pool_id: &PoolId) -> usize {
        let before = self.notes.len();
        self.notes
            .retain(|_, note| &note.pool_id != pool_id || !matches!(note.status, NoteStatus::Deposited | NoteStatus::Withdrawn));
        self.orphaned.retain(|_, o| &o.pool_id != pool_id);
        let dropped = before - self.notes.len();
        debug!("cleared {} confirmed notes for {}", dropped, pool_id);
        dropped
    }

    pub fn get(&self, commitment: &Commitment) -> Option<&Note> {
        self.notes.get(commitment)
    }

    /// pool a commitment belongs to, from its note or imported secret
    pub fn pool_of(&self, commitment: &Commitment) -> Option<&PoolId> {
        self.notes
            .get(commitment)
            .map(|n| &n.pool_id)
            .or_else(|| self.secrets.get(commitment).map(|s| &s.pool_id))
    }

    /// notes of one pool, ordered by leaf index (unplaced notes last)
    pub fn list_by_pool(&self, pool_id: &PoolId) -> Vec<Note> {
        let mut notes: Vec<Note> = self
            .notes
            .values()
            .filter(|n| &n.pool_id == pool_id)
            .cloned()
            .collect();
        notes.sort_by_key(|n| (n.leaf_index.unwrap_or(u64::MAX), n.commitment));
        notes
    }

    pub fn list_by_status(&self, status: NoteStatus) -> Vec<Note> {
        let mut notes: Vec<Note> = self
            .notes
            .values()
            .filter(|n| n.status == status)
            .cloned()
            .collect();
        notes.sort_by(|a, b| {
            (&a.pool_id, a.leaf_index.unwrap_or(u64::MAX), a.commitment)
                .cmp(&(&b.pool_id, b.leaf_index.unwrap_or(u64::MAX), b.commitment))
        });
        notes
    }

    /// sum of owned, deposited, unspent notes in a pool
    pub fn spendable_balance(&self, pool_id: &PoolId) -> u128 {
        self.notes
            .values()
            .filter(|n| &n.pool_id == pool_id && n.is_owned() && n.status == NoteStatus::Deposited)
            .map(|n| n.amount)
            .sum()
    }

    /// orphans in chain order
    pub fn orphaned_nullifiers(&self) -> Vec<OrphanedNullifier> {
        let mut orphaned: Vec<OrphanedNullifier> = self.orphaned.values().cloned().collect();
        orphaned.sort_by_key(|o| (o.block, o.nullifier_hash));
        orphaned
    }

    /// copy of one pool's notes and orphans, for [`restore_pool`](Self::restore_pool)
    pub fn snapshot_pool(&self, pool_id: &PoolId) -> PoolSnapshot {
        PoolSnapshot {
            pool_id: pool_id.clone(),
            notes: self
                .notes
                .values()
                .filter(|n| &n.pool_id == pool_id)
                .cloned()
                .collect(),
            orphaned: self
                .orphaned
                .values()
                .filter(|o| &o.pool_id == pool_id)
                .cloned()
                .collect(),
        }
    }

    /// replace everything known about a pool with an earlier snapshot.
    /// imported key material is left alone.
    pub fn restore_pool(&mut self, snapshot: PoolSnapshot) {
        let PoolSnapshot { pool_id, notes, orphaned } = snapshot;
        self.notes.retain(|_, n| n.pool_id != pool_id);
        self.orphaned.retain(|_, o| o.pool_id != pool_id);
        info!("restoring {} notes for {}", notes.len(), pool_id);
        for note in notes {
            if let Some(nf) = note.nullifier_hash {
                self.by_nullifier.insert(nf, note.commitment);
            }
            self.notes.insert(note.commitment, note);
        }
        for o in orphaned {
            self.orphaned.insert(o.nullifier_hash, o);
        }
    }

    pub fn len(&self) -> usize {
        self.notes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.notes.is_empty()
    }

    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        bincode::serialize(self).map_err(|e| NoteError::Serialization(e.to_string()))
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        bincode::deserialize(bytes).map_err(|e| NoteError::Serialization(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pool() -> PoolId {
        PoolId::new(1, "eth", "0.1")
    }

    fn owned_store(n: u8) -> (NoteStore, Vec<NoteSecret>) {
        let mut store = NoteStore::new();
        let secrets: Vec<NoteSecret> = (0..n).map(|i| NoteSecret::new([i; 31], [i + 100; 31])).collect();
        for s in &secrets {
            store.import_secret(pool(), *s, 100);
        }
        (store, secrets)
    }

    #[test]
    fn test_deposit_creates_owned_note() {
        let (mut store, secrets) = owned_store(1);
        let c = secrets[0].commitment();

        assert_eq!(store.record_deposit(&pool(), c, 0, 10, 100).unwrap(), DepositOutcome::Created);
        let note = store.get(&c).unwrap();
        assert_eq!(note.status, NoteStatus::Deposited);
        assert_eq!(note.leaf_index, Some(0));
        assert_eq!(note.nullifier_hash, Some(secrets[0].nullifier_hash()));
    }

    #[test]
    fn test_deposit_replay_is_noop() {
        let (mut store, secrets) = owned_store(1);
        let c = secrets[0].commitment();
        store.record_deposit(&pool(), c, 4, 10, 100).unwrap();
        let snapshot = store.clone();

        assert_eq!(store.record_deposit(&pool(), c, 4, 10, 100).unwrap(), DepositOutcome::Unchanged);
        assert_eq!(store, snapshot);
    }

    #[test]
    fn test_foreign_deposits() {
        let mut store = NoteStore::new();
        let c = Commitment([9u8; 32]);
        assert_eq!(store.record_deposit(&pool(), c, 0, 1, 1).unwrap(), DepositOutcome::Ignored);
        assert!(store.is_empty());

        let mut retaining = NoteStore::retaining_foreign();
        assert_eq!(retaining.record_deposit(&pool(), c, 0, 1, 1).unwrap(), DepositOutcome::Created);
        assert!(!retaining.get(&c).unwrap().is_owned());
    }

    #[test]
    fn test_reorg_moves_note() {
        let (mut store, secrets) = owned_store(1);
        let c = secrets[0].commitment();
        store.record_deposit(&pool(), c, 3, 10, 100).unwrap();
        assert_eq!(
            store.record_deposit(&pool(), c, 5, 12, 100).unwrap(),
            DepositOutcome::Moved { from: Some(3) }
        );
        assert_eq!(store.get(&c).unwrap().leaf_index, Some(5));
    }

    #[test]
    fn test_full_lifecycle() {
        let (mut store, secrets) = owned_store(1);
        let c = secrets[0].commitment();
        let nf = secrets[0].nullifier_hash();

        store.mark_pending(c, Direction::Deposit, 1_000).unwrap();
        assert_eq!(store.get(&c).unwrap().status, NoteStatus::PendingDeposit);
        assert_eq!(store.get(&c).unwrap().leaf_index, None);

        assert_eq!(store.record_deposit(&pool(), c, 0, 10, 100).unwrap(), DepositOutcome::Upgraded);
        store.mark_pending(c, Direction::Withdrawal, 2_000).unwrap();
        assert_eq!(store.get(&c).unwrap().status, NoteStatus::PendingWithdrawal);

        assert_eq!(
            store.record_withdrawal(&pool(), nf, 20).unwrap(),
            WithdrawalOutcome::Withdrawn(c)
        );
        let note = store.get(&c).unwrap();
        assert_eq!(note.status, NoteStatus::Withdrawn);
        assert_eq!(note.withdrawal_block, Some(20));
        // leaf stays put after withdrawal
        assert_eq!(note.leaf_index, Some(0));

        assert_eq!(
            store.record_withdrawal(&pool(), nf, 20).unwrap(),
            WithdrawalOutcome::AlreadyWithdrawn(c)
        );
    }

    #[test]
    fn test_orphaned_nullifier() {
        let (mut store, secrets) = owned_store(2);
        store.record_deposit(&pool(), secrets[0].commitment(), 0, 1, 100).unwrap();
        let count = store.len();

        let stranger = NullifierHash([0xee; 32]);
        assert_eq!(
            store.record_withdrawal(&pool(), stranger, 50).unwrap(),
            WithdrawalOutcome::Orphaned
        );
        assert_eq!(store.len(), count);
        assert_eq!(store.orphaned_nullifiers().len(), 1);
        assert_eq!(store.orphaned_nullifiers()[0].nullifier_hash, stranger);

        // a replayed orphan keeps its first sighting
        store.record_withdrawal(&pool(), stranger, 90).unwrap();
        assert_eq!(store.orphaned_nullifiers().len(), 1);
        assert_eq!(store.orphaned_nullifiers()[0].block, 50);
    }

    #[test]
    fn test_many_orphans_stay_unique() {
        let mut store = NoteStore::new();
        for round in 0..2u64 {
            for i in 0..1_000u64 {
                let mut nf = [0u8; 32];
                nf[..8].copy_from_slice(&i.to_be_bytes());
                store.record_withdrawal(&pool(), NullifierHash(nf), i + round).unwrap();
            }
        }
        let orphans = store.orphaned_nullifiers();
        assert_eq!(orphans.len(), 1_000);
        assert!(orphans.windows(2).all(|w| w[0].block <= w[1].block));

        store.clear_chain_state(&pool());
        assert!(store.orphaned_nullifiers().is_empty());
    }

    #[test]
    fn test_restore_pool_undoes_rescan() {
        let (mut store, secrets) = owned_store(2);
        let (a, b) = (secrets[0].commitment(), secrets[1].commitment());
        let other = PoolId::new(1, "eth", "1");
        store.record_deposit(&pool(), a, 0, 10, 100).unwrap();
        store.record_withdrawal(&pool(), secrets[0].nullifier_hash(), 20).unwrap();
        store.record_withdrawal(&pool(), NullifierHash([0xee; 32]), 21).unwrap();
        store.import_secret(other.clone(), secrets[1], 1_000);
        store.record_deposit(&other, b, 0, 11, 1_000).unwrap();
        let before = store.clone();

        let snapshot = store.snapshot_pool(&pool());
        assert_eq!(snapshot.pool_id(), &pool());
        store.clear_chain_state(&pool());
        // half a replay: the deposit but not the withdrawal
        store.record_deposit(&pool(), a, 0, 10, 100).unwrap();
        assert_eq!(store.spendable_balance(&pool()), 100);

        store.restore_pool(snapshot);
        assert_eq!(store, before);
        assert_eq!(store.get(&a).unwrap().status, NoteStatus::Withdrawn);
        assert_eq!(store.spendable_balance(&pool()), 0);
        assert_eq!(store.get(&b).unwrap().status, NoteStatus::Deposited);
    }

    #[test]
    fn test_failed_is_terminal() {
        let (mut store, secrets) = owned_store(1);
        let c = secrets[0].commitment();
        store.mark_pending(c, Direction::Deposit, 0).unwrap();
        store.mark_failed(c).unwrap();

        let note = store.get(&c).unwrap();
        assert_eq!(note.status, NoteStatus::Failed);
        assert_eq!(note.leaf_index, None);

        assert!(store.mark_failed(c).is_err());
        assert!(store.mark_pending(c, Direction::Deposit, 5).is_err());
        assert!(matches!(
            store.record_deposit(&pool(), c, 0, 1, 100),
            Err(NoteError::InvalidTransition { from: NoteStatus::Failed, .. })
        ));
    }

    #[test]
    fn test_withdrawal_requires_deposit() {
        let (mut store, secrets) = owned_store(1);
        let c = secrets[0].commitment();
        assert_eq!(store.pool_of(&c), Some(&pool()));
        assert!(matches!(
            store.mark_pending(c, Direction::Withdrawal, 0),
            Err(NoteError::UnknownNote(_))
        ));
        store.mark_pending(c, Direction::Deposit, 0).unwrap();
        assert!(store.mark_pending(c, Direction::Withdrawal, 0).is_err());
    }

    #[test]
    fn test_reconcile_pending() {
        let (mut store, secrets) = owned_store(3);
        let (a, b, c) = (secrets[0].commitment(), secrets[1].commitment(), secrets[2].commitment());

        store.mark_pending(a, Direction::Deposit, 100).unwrap();
        store.record_deposit(&pool(), b, 0, 1, 100).unwrap();
        store.mark_pending(b, Direction::Withdrawal, 100).unwrap();
        store.mark_pending(c, Direction::Deposit, 900).unwrap();

        let mut changed = store.reconcile_pending(1_000, 600);
        changed.sort_by_key(|(commitment, _)| *commitment);
        let mut expected = vec![(a, NoteStatus::Failed), (b, NoteStatus::Deposited)];
        expected.sort_by_key(|(commitment, _)| *commitment);
        assert_eq!(changed, expected);
        assert_eq!(store.get(&c).unwrap().status, NoteStatus::PendingDeposit);
    }

    #[test]
    fn test_listing_order() {
        let (mut store, secrets) = owned_store(3);
        store.record_deposit(&pool(), secrets[0].commitment(), 7, 3, 100).unwrap();
        store.record_deposit(&pool(), secrets[1].commitment(), 2, 1, 100).unwrap();
        store.mark_pending(secrets[2].commitment(), Direction::Deposit, 0).unwrap();

        let listed: Vec<Option<u64>> = store.list_by_pool(&pool()).iter().map(|n| n.leaf_index).collect();
        assert_eq!(listed, vec![Some(2), Some(7), None]);
        assert_eq!(store.list_by_status(NoteStatus::Deposited).len(), 2);
        assert_eq!(store.spendable_balance(&pool()), 200);
        assert!(store.list_by_pool(&PoolId::new(5, "eth", "0.1")).is_empty());
    }

    #[test]
    fn test_clear_chain_state_keeps_secrets() {
        let (mut store, secrets) = owned_store(2);
        store.record_deposit(&pool(), secrets[0].commitment(), 0, 1, 100).unwrap();
        store.mark_pending(secrets[1].commitment(), Direction::Deposit, 0).unwrap();

        assert_eq!(store.clear_chain_state(&pool()), 1);
        assert!(store.get(&secrets[0].commitment()).is_none());
        assert!(store.get(&secrets[1].commitment()).is_some());

        // replay brings it back
        assert_eq!(
            store.record_deposit(&pool(), secrets[0].commitment(), 0, 1, 100).unwrap(),
            DepositOutcome::Created
        );
    }

    #[test]
    fn test_bytes_roundtrip() {
        let (mut store, secrets) = owned_store(2);
        store.record_deposit(&pool(), secrets[0].commitment(), 0, 1, 100).unwrap();
        let restored = NoteStore::from_bytes(&store.to_bytes().unwrap()).unwrap();
        assert_eq!(restored, store);
    }
}
