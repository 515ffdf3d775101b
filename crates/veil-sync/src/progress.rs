//! per-pool scan reports and run progress

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use veil_notes::PoolId;

/// inclusive block range
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct BlockRange {
    pub from: u64,
    pub to: u64,
}

impl BlockRange {
    pub fn new(from: u64, to: u64) -> Self {
        Self { from, to }
    }

    pub fn len(&self) -> u64 {
        if self.to < self.from {
            0
        } else {
            self.to - self.from + 1
        }
    }

    pub fn is_empty(&self) -> bool {
        self.to < self.from
    }
}

impl std::fmt::Display for BlockRange {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}-{}", self.from, self.to)
    }
}

/// a block range the provider could not serve
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct RangeError {
    pub range: BlockRange,
    pub cause: String,
}

/// scan report for one pool in one run
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImportProgress {
    pub pool_id: PoolId,
    pub from_block: u64,
    pub to_block: u64,
    /// last block whose events have been applied
    pub processed_block: u64,
    /// failed ranges in ascending order, adjacent ranges merged
    pub errors: Vec<RangeError>,
    /// queries issued, splits included
    pub ranges_total: u64,
    /// sub-ranges given up on
    pub ranges_failed: u64,
    pub deposits: u64,
    pub withdrawals: u64,
    pub orphaned: u64,
}

impl ImportProgress {
    pub fn new(pool_id: PoolId, from_block: u64, to_block: u64) -> Self {
        Self {
            pool_id,
            from_block,
            to_block,
            processed_block: from_block.saturating_sub(1),
            errors: Vec::new(),
            ranges_total: 0,
            ranges_failed: 0,
            deposits: 0,
            withdrawals: 0,
            orphaned: 0,
        }
    }

    /// record a failed range, merging it into the previous one when adjacent
    pub fn record_error(&mut self, range: BlockRange, cause: String) {
        self.ranges_failed += 1;
        if let Some(last) = self.errors.last_mut() {
            if last.range.to.saturating_add(1) >= range.from && range.to >= last.range.to {
                last.range.to = range.to;
                return;
            }
        }
        self.errors.push(RangeError { range, cause });
    }

    pub fn failed_blocks(&self) -> u64 {
        self.errors.iter().map(|e| e.range.len()).sum()
    }

    /// failed share of the blocks scanned so far
    pub fn failed_fraction(&self) -> f64 {
        let scanned = BlockRange::new(self.from_block, self.processed_block).len();
        if scanned == 0 {
            return 0.0;
        }
        self.failed_blocks() as f64 / scanned as f64
    }

    pub fn is_complete(&self) -> bool {
        self.processed_block >= self.to_block
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct RunId(pub u64);

impl std::fmt::Display for RunId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "run-{}", self.0)
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum RunStatus {
    Running,
    Completed,
    Cancelled,
    Failed(String),
}

impl RunStatus {
    pub fn is_finished(&self) -> bool {
        !matches!(self, RunStatus::Running)
    }
}

/// snapshot of a reconstruction run
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunProgress {
    pub run_id: RunId,
    pub status: RunStatus,
    pub pools: BTreeMap<PoolId, ImportProgress>,
}

impl RunProgress {
    pub fn new(run_id: RunId) -> Self {
        Self {
            run_id,
            status: RunStatus::Running,
            pools: BTreeMap::new(),
        }
    }

    pub fn pool(&self, pool_id: &PoolId) -> Option<&ImportProgress> {
        self.pools.get(pool_id)
    }
}
