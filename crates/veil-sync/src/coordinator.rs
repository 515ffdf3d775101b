//! reconstruction coordinator
//!
//! owns the shielded state of every configured pool (one commitment tree
//! each, plus the shared note store) and the two ways of advancing it:
//!
//! - incremental: [`ReconstructionCoordinator::sync`] and
//!   [`ReconstructionCoordinator::apply_event`] append with single inserts
//! - reconstruction: a full or checkpointed rescan whose trees are
//!   bulk-built on the side and swapped in when the chain's scan ends
//!
//! a chain under reconstruction is restricted. incremental updates, note
//! marks and further runs on it are rejected until the run ends.

use std::collections::hash_map::Entry;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use tokio::sync::{watch, Mutex as AsyncMutex, RwLock};
use tracing::{debug, error, info, warn};
use veil_notes::{
    Commitment, Direction, Note, NoteError, NoteSecret, NoteStatus, NoteStore, PoolId,
    PoolSnapshot, WithdrawalOutcome,
};
use veil_tree::{short_hex, CommitmentTree, Hash, MerklePath, TreeError, TreeHasher};

use crate::config::{PoolConfig, SyncConfig};
use crate::error::{Result, SyncError};
use crate::ingest::EventIngestor;
use crate::progress::{BlockRange, ImportProgress, RangeError, RunId, RunProgress, RunStatus};
use crate::sink::{StateSink, StateUpdate};
use crate::source::{EventKind, LogSource, PoolEvent};
use crate::storage::{Checkpoint, CheckpointStore};

/// finished runs still answerable by `progress` and `wait`
const FINISHED_RUNS_KEPT: u64 = 16;

/// trees and notes guarded together
pub struct ShieldedState<H> {
    pub trees: HashMap<PoolId, CommitmentTree<H>>,
    pub notes: NoteStore,
}

struct RunState {
    id: RunId,
    cancel: AtomicBool,
    progress: watch::Sender<RunProgress>,
}

impl RunState {
    fn is_cancelled(&self) -> bool {
        self.cancel.load(Ordering::Acquire)
    }

    fn update(&self, f: impl FnOnce(&mut RunProgress)) {
        self.progress.send_modify(f);
    }

    fn snapshot(&self) -> RunProgress {
        self.progress.borrow().clone()
    }
}

/// chains held restricted until dropped
struct Restriction {
    chains: Vec<u64>,
    restricted: Arc<Mutex<HashSet<u64>>>,
    sink: Arc<dyn StateSink>,
}

impl Drop for Restriction {
    fn drop(&mut self) {
        {
            let mut set = lock(&self.restricted);
            for chain_id in &self.chains {
                set.remove(chain_id);
            }
        }
        for chain_id in &self.chains {
            info!("chain {} unrestricted", chain_id);
            self.sink.publish(StateUpdate::Restriction {
                chain_id: *chain_id,
                restricted: false,
            });
        }
    }
}

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// one pool's scan: the tree prefix it resumes from plus the leaves found
struct PoolScan<H> {
    config: PoolConfig,
    progress: ImportProgress,
    base: CommitmentTree<H>,
    /// new leaves with their deposit block
    appended: Vec<(Hash, u64)>,
    /// block the scan resumed after
    floor: u64,
    last_block: u64,
    resumed: bool,
    gap: bool,
    halted: Option<String>,
    /// notes as they were before the run, put back if the pool fails
    rollback: Option<PoolSnapshot>,
}

impl<H: TreeHasher> PoolScan<H> {
    fn new(config: PoolConfig, base: CommitmentTree<H>, from: u64, head: u64, resumed: bool) -> Self {
        let floor = from.saturating_sub(1);
        Self {
            progress: ImportProgress::new(config.pool_id.clone(), from, head),
            config,
            base,
            appended: Vec::new(),
            floor,
            last_block: floor,
            resumed,
            gap: false,
            halted: None,
            rollback: None,
        }
    }

    fn leaf_count(&self) -> u64 {
        self.base.len() + self.appended.len() as u64
    }

    fn leaf(&self, index: u64) -> Option<Hash> {
        let base = self.base.len();
        if index < base {
            self.base.elements().get(index as usize).copied()
        } else {
            self.appended.get((index - base) as usize).map(|(c, _)| *c)
        }
    }

    /// place a deposit by its chain leaf index.
    ///
    /// `Ok(true)` when the leaf is (or already was) in the contiguous prefix,
    /// `Ok(false)` when it lies past a gap and stays out of the tree.
    fn accept_deposit(&mut self, commitment: Hash, leaf_index: u64, block: u64) -> std::result::Result<bool, TreeError> {
        if self.gap {
            return Ok(false);
        }

        let expected = self.leaf_count();
        if leaf_index < expected {
            return match self.leaf(leaf_index) {
                Some(existing) if existing == commitment => Ok(true),
                existing => Err(TreeError::TreeCorruption(format!(
                    "leaf {} holds {} but chain reports {}",
                    leaf_index,
                    existing.map(|h| short_hex(&h)).unwrap_or_default(),
                    short_hex(&commitment)
                ))),
            };
        }

        if leaf_index > expected {
            self.gap = true;
            let window = BlockRange::new(self.last_block, block);
            let explained = self
                .progress
                .errors
                .iter()
                .any(|e| e.range.from <= window.to && window.from <= e.range.to);
            warn!(
                "{}: leaf {} at block {} but expected {}, building from the contiguous prefix",
                self.config.pool_id, leaf_index, block, expected
            );
            if !explained {
                // provider dropped logs without reporting a failure
                self.progress.errors.push(RangeError {
                    range: window,
                    cause: format!("missing leaf indices {}..{}", expected, leaf_index),
                });
            }
            return Ok(false);
        }

        if expected >= self.base.capacity() {
            return Err(TreeError::CapacityExceeded {
                capacity: self.base.capacity(),
            });
        }
        self.appended.push((commitment, block));
        self.last_block = block;
        Ok(true)
    }

    /// final block and leaf count safe to resume from
    fn checkpoint(&self, head: u64, reorg_depth: u64) -> Checkpoint {
        let mut block = self
            .progress
            .processed_block
            .min(head.saturating_sub(reorg_depth));
        if let Some(first_error) = self.progress.errors.iter().map(|e| e.range.from).min() {
            block = block.min(first_error.saturating_sub(1));
        }
        let block = block.max(self.floor);
        let leaf_count = self.base.len()
            + self.appended.iter().take_while(|(_, b)| *b <= block).count() as u64;
        Checkpoint { block, leaf_count }
    }

    fn build(&self, incremental: bool) -> std::result::Result<CommitmentTree<H>, TreeError> {
        let mut tree = self.base.clone();
        if incremental {
            for (commitment, _) in &self.appended {
                tree.insert(*commitment)?;
            }
        } else {
            let mut leaves = self.base.elements().to_vec();
            leaves.extend(self.appended.iter().map(|(c, _)| *c));
            tree.bulk_insert(&leaves)?;
        }
        Ok(tree)
    }
}

fn apply_events<H: TreeHasher>(
    notes: &mut NoteStore,
    scans: &mut [PoolScan<H>],
    events: Vec<(usize, PoolEvent)>,
) {
    for (i, event) in events {
        let scan = &mut scans[i];
        if scan.halted.is_some() {
            continue;
        }
        let pool_id = scan.config.pool_id.clone();

        match event.kind {
            EventKind::Deposit { commitment, leaf_index, .. } => {
                match scan.accept_deposit(commitment.0, leaf_index, event.block) {
                    Ok(placed) => {
                        if !placed {
                            debug!("{}: leaf {} past a gap, note only", pool_id, leaf_index);
                        }
                        // the chain's leaf index is authoritative even past a gap
                        scan.progress.deposits += 1;
                        if let Err(e) = notes.record_deposit(
                            &pool_id,
                            commitment,
                            leaf_index,
                            event.block,
                            scan.config.amount,
                        ) {
                            warn!("{}: deposit {} not recorded: {}", pool_id, commitment, e);
                        }
                    }
                    Err(e) => {
                        error!("{}: halting scan: {}", pool_id, e);
                        scan.halted = Some(e.to_string());
                    }
                }
            }
            EventKind::Withdrawal { nullifier_hash, .. } => {
                scan.progress.withdrawals += 1;
                match notes.record_withdrawal(&pool_id, nullifier_hash, event.block) {
                    Ok(WithdrawalOutcome::Orphaned) => scan.progress.orphaned += 1,
                    Ok(_) => {}
                    Err(e) => warn!("{}: withdrawal {} not recorded: {}", pool_id, nullifier_hash, e),
                }
            }
        }
    }
}

struct Inner<H> {
    pools: BTreeMap<PoolId, PoolConfig>,
    hasher: H,
    config: SyncConfig,
    ingestor: EventIngestor,
    store: Arc<dyn CheckpointStore>,
    sink: Arc<dyn StateSink>,
    state: RwLock<ShieldedState<H>>,
    restricted: Arc<Mutex<HashSet<u64>>>,
    chain_locks: Mutex<HashMap<u64, Arc<AsyncMutex<()>>>>,
    runs: Mutex<HashMap<RunId, Arc<RunState>>>,
    next_run: AtomicU64,
}

/// drives scans and owns the shielded state; cheap to clone
#[derive(Clone)]
pub struct ReconstructionCoordinator<H> {
    inner: Arc<Inner<H>>,
}

impl<H: TreeHasher + 'static> ReconstructionCoordinator<H> {
    pub fn new(
        pools: Vec<PoolConfig>,
        hasher: H,
        config: SyncConfig,
        source: Arc<dyn LogSource>,
        store: Arc<dyn CheckpointStore>,
        sink: Arc<dyn StateSink>,
    ) -> Result<Self> {
        config.validate()?;

        let mut by_id = BTreeMap::new();
        for pool in pools {
            // reject bad shapes up front
            CommitmentTree::new(pool.levels, pool.zero_element, hasher.clone())?;
            if by_id.insert(pool.pool_id.clone(), pool).is_some() {
                return Err(SyncError::InvalidConfig("duplicate pool".into()));
            }
        }

        let notes = if config.retain_foreign {
            NoteStore::retaining_foreign()
        } else {
            NoteStore::new()
        };

        Ok(Self {
            inner: Arc::new(Inner {
                pools: by_id,
                hasher,
                ingestor: EventIngestor::new(source, config.clone()),
                config,
                store,
                sink,
                state: RwLock::new(ShieldedState {
                    trees: HashMap::new(),
                    notes,
                }),
                restricted: Arc::new(Mutex::new(HashSet::new())),
                chain_locks: Mutex::new(HashMap::new()),
                runs: Mutex::new(HashMap::new()),
                next_run: AtomicU64::new(1),
            }),
        })
    }

    pub fn pools(&self) -> Vec<PoolId> {
        self.inner.pools.keys().cloned().collect()
    }

    pub fn config(&self) -> &SyncConfig {
        &self.inner.config
    }

    /// load trees and notes persisted by earlier sessions
    pub async fn restore(&self) -> Result<()> {
        let notes = match self.inner.store.load_notes()? {
            Some(bytes) => Some(NoteStore::from_bytes(&bytes)?),
            None => None,
        };

        let mut trees = HashMap::new();
        for (pool_id, config) in &self.inner.pools {
            let Some(bytes) = self.inner.store.load_tree(pool_id)? else {
                continue;
            };
            let tree = CommitmentTree::from_bytes(&bytes, self.inner.hasher.clone())?;
            if tree.levels() != config.levels || tree.zero_element() != config.zero_element {
                return Err(TreeError::TreeCorruption(format!(
                    "{}: stored tree shape does not match pool config",
                    pool_id
                ))
                .into());
            }
            trees.insert(pool_id.clone(), tree);
        }

        let mut state = self.inner.state.write().await;
        if let Some(notes) = notes {
            state.notes = notes;
        }
        info!("restored {} trees and {} notes", trees.len(), state.notes.len());
        state.trees.extend(trees);
        Ok(())
    }

    pub fn is_restricted(&self, chain_id: u64) -> bool {
        lock(&self.inner.restricted).contains(&chain_id)
    }

    /// start a reconstruction in the background.
    ///
    /// the affected chains are restricted before this returns; a second call
    /// touching any of them fails with `ReconstructionInProgress`.
    pub fn start_reconstruction(&self, pool_ids: &[PoolId], from_checkpoint: bool) -> Result<RunId> {
        let (run, guard, chains) = self.begin_run(pool_ids)?;
        let id = run.id;
        let this = self.clone();
        tokio::spawn(async move {
            if let Err(e) = this.drive(run, guard, chains, from_checkpoint).await {
                error!("{} failed: {}", id, e);
            }
        });
        Ok(id)
    }

    /// run a reconstruction to completion
    pub async fn reconstruct(&self, pool_ids: &[PoolId], from_checkpoint: bool) -> Result<RunProgress> {
        let (run, guard, chains) = self.begin_run(pool_ids)?;
        self.drive(run, guard, chains, from_checkpoint).await
    }

    pub fn progress(&self, run_id: RunId) -> Result<RunProgress> {
        Ok(self.run(run_id)?.snapshot())
    }

    /// ask a run to stop after its current chunk
    pub fn cancel(&self, run_id: RunId) -> Result<()> {
        let run = self.run(run_id)?;
        info!("{} cancellation requested", run_id);
        run.cancel.store(true, Ordering::Release);
        Ok(())
    }

    /// wait for a run to finish
    pub async fn wait(&self, run_id: RunId) -> Result<RunProgress> {
        let run = self.run(run_id)?;
        let mut rx = run.progress.subscribe();
        let progress = rx
            .wait_for(|p| p.status.is_finished())
            .await
            .map_err(|_| SyncError::UnknownRun(run_id))?
            .clone();
        Ok(progress)
    }

    /// bring pools up to head with single inserts, from their checkpoints
    pub async fn sync(&self, pool_ids: &[PoolId]) -> Result<Vec<ImportProgress>> {
        let chains = self.group_by_chain(pool_ids)?;
        let mut report = Vec::new();

        for (chain_id, pools) in chains {
            self.ensure_unrestricted(chain_id)?;
            let chain_lock = self.chain_lock(chain_id);
            let _held = chain_lock.lock().await;
            self.ensure_unrestricted(chain_id)?;

            let head = self.inner.ingestor.source().head(chain_id).await?;
            let mut scans = Vec::with_capacity(pools.len());
            for config in &pools {
                scans.push(self.prepare(config, head, true).await?);
            }
            debug!("syncing {} pools on chain {} to block {}", scans.len(), chain_id, head);

            self.scan_chain(None, head, &mut scans).await;
            report.extend(scans.iter().map(|s| s.progress.clone()));

            let failures = self.commit(scans, head, true).await?;
            if !failures.is_empty() {
                return Err(SyncError::SyncFailed(failures.join("; ")));
            }
        }

        Ok(report)
    }

    /// apply one observed event on top of the live tree
    pub async fn apply_event(&self, pool_id: &PoolId, event: PoolEvent) -> Result<()> {
        let config = self.pool_config(pool_id)?.clone();
        let chain_id = config.chain_id();
        self.ensure_unrestricted(chain_id)?;
        let chain_lock = self.chain_lock(chain_id);
        let _held = chain_lock.lock().await;
        self.ensure_unrestricted(chain_id)?;

        let mut state = self.inner.state.write().await;
        let ShieldedState { trees, notes } = &mut *state;

        match event.kind {
            EventKind::Deposit { commitment, leaf_index, .. } => {
                let tree = match trees.entry(pool_id.clone()) {
                    Entry::Occupied(e) => e.into_mut(),
                    Entry::Vacant(e) => e.insert(self.empty_tree(&config)?),
                };

                let len = tree.len();
                if leaf_index > len {
                    return Err(SyncError::LeafGap {
                        pool: pool_id.to_string(),
                        expected: len,
                        found: leaf_index,
                    });
                }
                if leaf_index < len {
                    if tree.elements()[leaf_index as usize] != commitment.0 {
                        return Err(TreeError::TreeCorruption(format!(
                            "{}: leaf {} conflicts with {}",
                            pool_id, leaf_index, commitment
                        ))
                        .into());
                    }
                    debug!("{}: leaf {} already applied", pool_id, leaf_index);
                } else {
                    tree.insert(commitment.0)?;
                }

                if let Err(e) =
                    notes.record_deposit(pool_id, commitment, leaf_index, event.block, config.amount)
                {
                    warn!("{}: deposit {} not recorded: {}", pool_id, commitment, e);
                }

                self.inner.store.save_tree(pool_id, &tree.to_bytes()?)?;
                self.inner.sink.publish(StateUpdate::TreeRoot {
                    pool_id: pool_id.clone(),
                    root: tree.root(),
                    leaf_count: tree.len(),
                });
            }
            EventKind::Withdrawal { nullifier_hash, .. } => {
                let outcome = notes.record_withdrawal(pool_id, nullifier_hash, event.block)?;
                debug!("{}: withdrawal {}: {:?}", pool_id, nullifier_hash, outcome);
            }
        }

        self.persist_and_publish(notes, pool_id)
    }

    pub async fn notes(&self, pool_id: &PoolId) -> Vec<Note> {
        self.inner.state.read().await.notes.list_by_pool(pool_id)
    }

    pub async fn notes_by_status(&self, status: NoteStatus) -> Vec<Note> {
        self.inner.state.read().await.notes.list_by_status(status)
    }

    pub async fn spendable_balance(&self, pool_id: &PoolId) -> u128 {
        self.inner.state.read().await.notes.spendable_balance(pool_id)
    }

    /// current root, `None` before the pool's first scan
    pub async fn root(&self, pool_id: &PoolId) -> Option<Hash> {
        self.inner.state.read().await.trees.get(pool_id).map(|t| t.root())
    }

    pub async fn leaf_count(&self, pool_id: &PoolId) -> Option<u64> {
        self.inner.state.read().await.trees.get(pool_id).map(|t| t.len())
    }

    /// authentication path for a withdrawal proof
    pub async fn path(&self, pool_id: &PoolId, leaf_index: u64) -> Result<MerklePath> {
        let state = self.inner.state.read().await;
        let tree = state
            .trees
            .get(pool_id)
            .ok_or_else(|| SyncError::UnknownPool(pool_id.to_string()))?;
        Ok(tree.path(leaf_index)?)
    }

    /// register owned key material for a pool
    pub async fn import_secret(&self, pool_id: &PoolId, secret: NoteSecret) -> Result<Commitment> {
        let amount = self.pool_config(pool_id)?.amount;
        let mut state = self.inner.state.write().await;
        let commitment = state.notes.import_secret(pool_id.clone(), secret, amount);
        self.persist_and_publish(&state.notes, pool_id)?;
        Ok(commitment)
    }

    pub async fn mark_pending(&self, commitment: Commitment, direction: Direction, now: u64) -> Result<()> {
        let mut state = self.inner.state.write().await;
        let pool_id = state
            .notes
            .pool_of(&commitment)
            .cloned()
            .ok_or_else(|| NoteError::UnknownNote(commitment.to_string()))?;
        self.ensure_unrestricted(pool_id.chain_id)?;
        state.notes.mark_pending(commitment, direction, now)?;
        self.persist_and_publish(&state.notes, &pool_id)
    }

    pub async fn mark_failed(&self, commitment: Commitment) -> Result<()> {
        let mut state = self.inner.state.write().await;
        let pool_id = state
            .notes
            .pool_of(&commitment)
            .cloned()
            .ok_or_else(|| NoteError::UnknownNote(commitment.to_string()))?;
        state.notes.mark_failed(commitment)?;
        self.persist_and_publish(&state.notes, &pool_id)
    }

    /// settle pending notes older than the configured timeout
    pub async fn reconcile_pending(&self, now: u64) -> Result<Vec<(Commitment, NoteStatus)>> {
        if let Some(chain_id) = lock(&self.inner.restricted).iter().next().copied() {
            return Err(SyncError::ReconstructionInProgress { chain_id });
        }

        let mut state = self.inner.state.write().await;
        let changed = state
            .notes
            .reconcile_pending(now, self.inner.config.pending_timeout_secs);
        if changed.is_empty() {
            return Ok(changed);
        }

        let pools: HashSet<PoolId> = changed
            .iter()
            .filter_map(|(c, _)| state.notes.pool_of(c).cloned())
            .collect();
        for pool_id in &pools {
            self.persist_and_publish(&state.notes, pool_id)?;
        }
        Ok(changed)
    }

    fn run(&self, run_id: RunId) -> Result<Arc<RunState>> {
        lock(&self.inner.runs)
            .get(&run_id)
            .cloned()
            .ok_or(SyncError::UnknownRun(run_id))
    }

    fn pool_config(&self, pool_id: &PoolId) -> Result<&PoolConfig> {
        self.inner
            .pools
            .get(pool_id)
            .ok_or_else(|| SyncError::UnknownPool(pool_id.to_string()))
    }

    fn group_by_chain(&self, pool_ids: &[PoolId]) -> Result<BTreeMap<u64, Vec<PoolConfig>>> {
        if pool_ids.is_empty() {
            return Err(SyncError::InvalidConfig("no pools selected".into()));
        }
        let mut chains: BTreeMap<u64, Vec<PoolConfig>> = BTreeMap::new();
        for pool_id in pool_ids {
            let config = self.pool_config(pool_id)?;
            let pools = chains.entry(config.chain_id()).or_default();
            if !pools.iter().any(|p| &p.pool_id == pool_id) {
                pools.push(config.clone());
            }
        }
        Ok(chains)
    }

    fn empty_tree(&self, config: &PoolConfig) -> Result<CommitmentTree<H>> {
        Ok(CommitmentTree::new(
            config.levels,
            config.zero_element,
            self.inner.hasher.clone(),
        )?)
    }

    fn ensure_unrestricted(&self, chain_id: u64) -> Result<()> {
        if self.is_restricted(chain_id) {
            return Err(SyncError::ReconstructionInProgress { chain_id });
        }
        Ok(())
    }

    fn chain_lock(&self, chain_id: u64) -> Arc<AsyncMutex<()>> {
        lock(&self.inner.chain_locks)
            .entry(chain_id)
            .or_default()
            .clone()
    }

    fn restrict(&self, chains: Vec<u64>) -> Result<Restriction> {
        {
            let mut set = lock(&self.inner.restricted);
            if let Some(chain_id) = chains.iter().find(|c| set.contains(*c)) {
                return Err(SyncError::ReconstructionInProgress { chain_id: *chain_id });
            }
            set.extend(chains.iter().copied());
        }
        for chain_id in &chains {
            info!("chain {} restricted", chain_id);
            self.inner.sink.publish(StateUpdate::Restriction {
                chain_id: *chain_id,
                restricted: true,
            });
        }
        Ok(Restriction {
            chains,
            restricted: self.inner.restricted.clone(),
            sink: self.inner.sink.clone(),
        })
    }

    fn begin_run(
        &self,
        pool_ids: &[PoolId],
    ) -> Result<(Arc<RunState>, Restriction, BTreeMap<u64, Vec<PoolConfig>>)> {
        let chains = self.group_by_chain(pool_ids)?;
        let guard = self.restrict(chains.keys().copied().collect())?;

        let id = RunId(self.inner.next_run.fetch_add(1, Ordering::Relaxed));
        let (progress, _) = watch::channel(RunProgress::new(id));
        let run = Arc::new(RunState {
            id,
            cancel: AtomicBool::new(false),
            progress,
        });
        {
            let mut runs = lock(&self.inner.runs);
            runs.retain(|old, r| {
                !r.progress.borrow().status.is_finished() || old.0 + FINISHED_RUNS_KEPT > id.0
            });
            runs.insert(id, run.clone());
        }
        info!("{} started for {} pools", id, pool_ids.len());
        Ok((run, guard, chains))
    }

    async fn drive(
        &self,
        run: Arc<RunState>,
        guard: Restriction,
        chains: BTreeMap<u64, Vec<PoolConfig>>,
        from_checkpoint: bool,
    ) -> Result<RunProgress> {
        let result = self.execute(&run, chains, from_checkpoint).await;

        // lift the restriction before anyone can observe the final status
        drop(guard);

        let status = match &result {
            Ok(false) => RunStatus::Completed,
            Ok(true) => RunStatus::Cancelled,
            Err(e) => RunStatus::Failed(e.to_string()),
        };
        info!("{} finished: {:?}", run.id, status);
        run.update(|p| p.status = status);

        let progress = run.snapshot();
        self.inner.sink.publish(StateUpdate::Progress(progress.clone()));
        result.map(|_| progress)
    }

    /// returns whether the run was cancelled
    async fn execute(
        &self,
        run: &RunState,
        chains: BTreeMap<u64, Vec<PoolConfig>>,
        from_checkpoint: bool,
    ) -> Result<bool> {
        let mut failures = Vec::new();
        let mut cancelled = false;

        for (chain_id, pools) in chains {
            let chain_lock = self.chain_lock(chain_id);
            let _held = chain_lock.lock().await;

            let head = self
                .inner
                .ingestor
                .source()
                .head(chain_id)
                .await
                .map_err(|e| {
                    SyncError::ReconstructionFailed(format!("chain {}: head unavailable: {}", chain_id, e))
                })?;
            info!("{}: chain {} head at block {}", run.id, chain_id, head);

            let mut scans = Vec::with_capacity(pools.len());
            for config in &pools {
                scans.push(self.prepare(config, head, from_checkpoint).await?);
            }
            {
                let mut state = self.inner.state.write().await;
                for scan in scans.iter_mut() {
                    let pool_id = &scan.config.pool_id;
                    scan.rollback = Some(state.notes.snapshot_pool(pool_id));
                    if !scan.resumed {
                        let dropped = state.notes.clear_chain_state(pool_id);
                        debug!("{}: cleared {} notes before full rescan", pool_id, dropped);
                    }
                }
            }
            run.update(|p| {
                for scan in &scans {
                    p.pools.insert(scan.config.pool_id.clone(), scan.progress.clone());
                }
            });

            cancelled = self.scan_chain(Some(run), head, &mut scans).await;
            failures.extend(self.commit(scans, head, false).await?);
            if cancelled {
                break;
            }
        }

        if !failures.is_empty() {
            return Err(SyncError::ReconstructionFailed(failures.join("; ")));
        }
        Ok(cancelled)
    }

    async fn prepare(&self, config: &PoolConfig, head: u64, resume: bool) -> Result<PoolScan<H>> {
        let checkpoint = if resume {
            self.inner.store.load_checkpoint(&config.pool_id)?
        } else {
            None
        };
        let live = self
            .inner
            .state
            .read()
            .await
            .trees
            .get(&config.pool_id)
            .cloned();

        let resumed = match (checkpoint, live) {
            (Some(cp), Some(mut tree)) if tree.len() >= cp.leaf_count => {
                tree.truncate(cp.leaf_count)?;
                Some((tree, cp.block + 1))
            }
            (Some(cp), _) => {
                warn!(
                    "{}: no tree matches checkpoint at block {}, scanning from deployment",
                    config.pool_id, cp.block
                );
                None
            }
            (None, _) => None,
        };

        Ok(match resumed {
            Some((tree, from)) => {
                PoolScan::new(config.clone(), tree, from.max(config.deployment_block), head, true)
            }
            None => PoolScan::new(
                config.clone(),
                self.empty_tree(config)?,
                config.deployment_block,
                head,
                false,
            ),
        })
    }

    /// scan every pool of one chain up to `head`, chunk by chunk.
    /// returns whether the run was cancelled.
    async fn scan_chain(&self, run: Option<&RunState>, head: u64, scans: &mut [PoolScan<H>]) -> bool {
        let Some(mut cursor) = scans.iter().map(|s| s.progress.from_block).min() else {
            return false;
        };
        let start = cursor;
        let chunk = self.inner.config.chunk_size.max(1);

        while cursor <= head {
            if run.is_some_and(|r| r.is_cancelled()) {
                info!("scan cancelled before block {}", cursor);
                return true;
            }
            let end = head.min(cursor.saturating_add(chunk - 1));

            let mut merged = Vec::new();
            for (i, scan) in scans.iter_mut().enumerate() {
                if scan.halted.is_some() || scan.progress.from_block > end {
                    continue;
                }
                let from = cursor.max(scan.progress.from_block);
                let events = self
                    .inner
                    .ingestor
                    .fetch_range(&scan.config, from, end, &mut scan.progress)
                    .await;
                scan.progress.processed_block = end;
                merged.extend(events.into_iter().map(|e| (i, e)));
            }

            // pools on one chain share (block, log index) space
            merged.sort_by_key(|(_, e)| e.position());
            {
                let mut state = self.inner.state.write().await;
                apply_events(&mut state.notes, scans, merged);
            }

            if let Some(run) = run {
                run.update(|p| {
                    for scan in scans.iter() {
                        p.pools.insert(scan.config.pool_id.clone(), scan.progress.clone());
                    }
                });
                self.inner.sink.publish(StateUpdate::Progress(run.snapshot()));
            }

            let pct = (end - start + 1) as f64 / (head - start + 1) as f64 * 100.0;
            info!("scan progress: {}/{} ({:.1}%)", end, head, pct);

            if end >= head {
                break;
            }
            cursor = end + 1;
        }
        false
    }

    /// build and swap in each healthy pool's tree, save checkpoints.
    /// returns the failures of unhealthy pools.
    async fn commit(&self, scans: Vec<PoolScan<H>>, head: u64, incremental: bool) -> Result<Vec<String>> {
        let mut failures = Vec::new();

        for mut scan in scans {
            let pool_id = scan.config.pool_id.clone();
            let failure = if let Some(reason) = &scan.halted {
                Some(reason.clone())
            } else if scan.progress.failed_fraction() > self.inner.config.max_failed_fraction {
                Some(format!(
                    "{} blocks failed in {} ranges",
                    scan.progress.failed_blocks(),
                    scan.progress.errors.len()
                ))
            } else {
                None
            };
            let built = match failure {
                Some(reason) => Err(reason),
                None => scan.build(incremental).map_err(|e| e.to_string()),
            };
            let tree = match built {
                Ok(tree) => tree,
                Err(reason) => {
                    failures.push(format!("{}: {}", pool_id, reason));
                    // the old tree stays, so do the notes that match it
                    if let Some(snapshot) = scan.rollback.take() {
                        let mut state = self.inner.state.write().await;
                        state.notes.restore_pool(snapshot);
                        let notes = state.notes.list_by_pool(&pool_id);
                        drop(state);
                        self.inner.sink.publish(StateUpdate::Notes { pool_id, notes });
                    }
                    continue;
                }
            };

            let checkpoint = scan.checkpoint(head, self.inner.config.reorg_depth);
            self.inner.store.save_tree(&pool_id, &tree.to_bytes()?)?;
            self.inner.store.save_checkpoint(&pool_id, checkpoint)?;

            let (root, leaf_count) = (tree.root(), tree.len());
            let notes = {
                let mut state = self.inner.state.write().await;
                state.trees.insert(pool_id.clone(), tree);
                state.notes.list_by_pool(&pool_id)
            };
            info!(
                "{}: root {} with {} leaves, checkpoint at block {}",
                pool_id,
                short_hex(&root),
                leaf_count,
                checkpoint.block
            );
            self.inner.sink.publish(StateUpdate::TreeRoot {
                pool_id: pool_id.clone(),
                root,
                leaf_count,
            });
            self.inner.sink.publish(StateUpdate::Notes { pool_id, notes });
        }

        let bytes = self.inner.state.read().await.notes.to_bytes()?;
        self.inner.store.save_notes(&bytes)?;
        Ok(failures)
    }

    fn persist_and_publish(&self, notes: &NoteStore, pool_id: &PoolId) -> Result<()> {
        self.inner.store.save_notes(&notes.to_bytes()?)?;
        self.inner.sink.publish(StateUpdate::Notes {
            pool_id: pool_id.clone(),
            notes: notes.list_by_pool(pool_id),
        });
        Ok(())
    }
}
