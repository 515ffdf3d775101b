//! publishing state to subscribers

use tokio::sync::mpsc;
use veil_notes::{Note, PoolId};
use veil_tree::Hash;

use crate::progress::RunProgress;

#[derive(Clone, Debug, PartialEq)]
pub enum StateUpdate {
    /// a chain entered or left restricted mode
    Restriction { chain_id: u64, restricted: bool },
    Progress(RunProgress),
    Notes { pool_id: PoolId, notes: Vec<Note> },
    TreeRoot { pool_id: PoolId, root: Hash, leaf_count: u64 },
}

/// fire-and-forget state publication
pub trait StateSink: Send + Sync {
    fn publish(&self, update: StateUpdate);
}

/// drops every update
pub struct NullSink;

impl StateSink for NullSink {
    fn publish(&self, _update: StateUpdate) {}
}

/// forwards updates over an unbounded channel
pub struct ChannelSink {
    tx: mpsc::UnboundedSender<StateUpdate>,
}

impl ChannelSink {
    pub fn new() -> (Self, mpsc::UnboundedReceiver<StateUpdate>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }
}

impl StateSink for ChannelSink {
    fn publish(&self, update: StateUpdate) {
        // receiver gone means nobody is listening
        let _ = self.tx.send(update);
    }
}
