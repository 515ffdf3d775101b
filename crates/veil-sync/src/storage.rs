//! checkpoint and snapshot persistence

use std::collections::HashMap;
use std::sync::Mutex;

use serde::{Deserialize, Serialize};
use tracing::{debug, info};
use veil_notes::PoolId;

use crate::error::{Result, SyncError};

/// last final block of a pool and the tree size at that block
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Checkpoint {
    pub block: u64,
    pub leaf_count: u64,
}

pub trait CheckpointStore: Send + Sync {
    fn load_checkpoint(&self, pool: &PoolId) -> Result<Option<Checkpoint>>;
    fn save_checkpoint(&self, pool: &PoolId, checkpoint: Checkpoint) -> Result<()>;

    /// serialized commitment tree of a pool
    fn load_tree(&self, pool: &PoolId) -> Result<Option<Vec<u8>>>;
    fn save_tree(&self, pool: &PoolId, bytes: &[u8]) -> Result<()>;

    /// serialized note store (all pools)
    fn load_notes(&self) -> Result<Option<Vec<u8>>>;
    fn save_notes(&self, bytes: &[u8]) -> Result<()>;
}

/// in-memory store for tests and ephemeral sessions
#[derive(Default)]
pub struct MemoryStore {
    entries: Mutex<HashMap<Vec<u8>, Vec<u8>>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn get(&self, key: Vec<u8>) -> Result<Option<Vec<u8>>> {
        let entries = self
            .entries
            .lock()
            .map_err(|_| SyncError::Storage("memory store poisoned".into()))?;
        Ok(entries.get(&key).cloned())
    }

    fn put(&self, key: Vec<u8>, value: Vec<u8>) -> Result<()> {
        self.entries
            .lock()
            .map_err(|_| SyncError::Storage("memory store poisoned".into()))?
            .insert(key, value);
        Ok(())
    }
}

impl CheckpointStore for MemoryStore {
    fn load_checkpoint(&self, pool: &PoolId) -> Result<Option<Checkpoint>> {
        self.get(checkpoint_key(pool))?
            .map(|bytes| decode_checkpoint(&bytes))
            .transpose()
    }

    fn save_checkpoint(&self, pool: &PoolId, checkpoint: Checkpoint) -> Result<()> {
        self.put(checkpoint_key(pool), encode_checkpoint(checkpoint)?)
    }

    fn load_tree(&self, pool: &PoolId) -> Result<Option<Vec<u8>>> {
        self.get(tree_key(pool))
    }

    fn save_tree(&self, pool: &PoolId, bytes: &[u8]) -> Result<()> {
        self.put(tree_key(pool), bytes.to_vec())
    }

    fn load_notes(&self) -> Result<Option<Vec<u8>>> {
        self.get(NOTES_KEY.to_vec())
    }

    fn save_notes(&self, bytes: &[u8]) -> Result<()> {
        self.put(NOTES_KEY.to_vec(), bytes.to_vec())
    }
}

/// sled-backed store
pub struct SledStore {
    db: sled::Db,
}

impl SledStore {
    pub fn open(path: &str) -> Result<Self> {
        info!("opening storage at {}", path);
        let db = sled::open(path).map_err(|e| SyncError::Storage(format!("sled: {}", e)))?;
        Ok(Self { db })
    }

    fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>> {
        self.db
            .get(key)
            .map(|v| v.map(|iv| iv.to_vec()))
            .map_err(|e| SyncError::Storage(format!("sled: {}", e)))
    }

    fn put(&self, key: &[u8], value: &[u8]) -> Result<()> {
        self.db
            .insert(key, value)
            .map_err(|e| SyncError::Storage(format!("sled: {}", e)))?;
        self.db
            .flush()
            .map_err(|e| SyncError::Storage(format!("sled: {}", e)))?;
        Ok(())
    }
}

impl CheckpointStore for SledStore {
    fn load_checkpoint(&self, pool: &PoolId) -> Result<Option<Checkpoint>> {
        self.get(&checkpoint_key(pool))?
            .map(|bytes| decode_checkpoint(&bytes))
            .transpose()
    }

    fn save_checkpoint(&self, pool: &PoolId, checkpoint: Checkpoint) -> Result<()> {
        debug!("checkpoint {}: block {} leaves {}", pool, checkpoint.block, checkpoint.leaf_count);
        self.put(&checkpoint_key(pool), &encode_checkpoint(checkpoint)?)
    }

    fn load_tree(&self, pool: &PoolId) -> Result<Option<Vec<u8>>> {
        self.get(&tree_key(pool))
    }

    fn save_tree(&self, pool: &PoolId, bytes: &[u8]) -> Result<()> {
        self.put(&tree_key(pool), bytes)
    }

    fn load_notes(&self) -> Result<Option<Vec<u8>>> {
        self.get(NOTES_KEY)
    }

    fn save_notes(&self, bytes: &[u8]) -> Result<()> {
        self.put(NOTES_KEY, bytes)
    }
}

const NOTES_KEY: &[u8] = b"notes";

fn checkpoint_key(pool: &PoolId) -> Vec<u8> {
    format!("checkpoint:{}", pool).into_bytes()
}

fn tree_key(pool: &PoolId) -> Vec<u8> {
    format!("tree:{}", pool).into_bytes()
}

fn encode_checkpoint(checkpoint: Checkpoint) -> Result<Vec<u8>> {
    bincode::serialize(&checkpoint).map_err(|e| SyncError::Serialization(e.to_string()))
}

fn decode_checkpoint(bytes: &[u8]) -> Result<Checkpoint> {
    bincode::deserialize(bytes).map_err(|e| SyncError::Serialization(e.to_string()))
}
