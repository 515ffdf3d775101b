//! veil sync
//!
//! keeps local commitment trees and notes in step with pool contracts:
//!
//! - [`source`]: log source trait and pool event parsing
//! - [`rpc`]: JSON-RPC log source
//! - [`ingest`]: batched, retried, ordered fetching for one pool
//! - [`coordinator`]: incremental sync and full reconstruction
//! - [`storage`]: checkpoints and snapshots
//! - [`sink`]: state publication

pub mod config;
pub mod coordinator;
pub mod error;
pub mod ingest;
pub mod progress;
pub mod rpc;
pub mod sink;
pub mod source;
pub mod storage;

pub use config::{PoolConfig, SyncConfig};
pub use coordinator::{ReconstructionCoordinator, ShieldedState};
pub use error::{Result, SyncError};
pub use ingest::EventIngestor;
pub use progress::{BlockRange, ImportProgress, RangeError, RunId, RunProgress, RunStatus};
pub use rpc::{RpcClient, RpcLogSource};
pub use sink::{ChannelSink, NullSink, StateSink, StateUpdate};
pub use source::{
    EventKind, LogFilter, LogSource, MemoryLogSource, PoolEvent, RawLog, DEPOSIT_TOPIC,
    WITHDRAWAL_TOPIC,
};
pub use storage::{Checkpoint, CheckpointStore, MemoryStore, SledStore};
