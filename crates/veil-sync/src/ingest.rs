//! batched, retried, ordered event fetching for one pool

use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, warn};

use crate::config::{PoolConfig, SyncConfig};
use crate::error::Result;
use crate::progress::{BlockRange, ImportProgress};
use crate::source::{LogFilter, LogSource, PoolEvent, RawLog, DEPOSIT_TOPIC, WITHDRAWAL_TOPIC};

pub struct EventIngestor {
    source: Arc<dyn LogSource>,
    config: SyncConfig,
}

impl EventIngestor {
    pub fn new(source: Arc<dyn LogSource>, config: SyncConfig) -> Self {
        Self { source, config }
    }

    pub fn source(&self) -> &Arc<dyn LogSource> {
        &self.source
    }

    /// all events of `pool` in `[from, to]`, ordered by (block, log index).
    ///
    /// provider failures never abort the scan: a range that keeps failing is
    /// halved until single blocks (or the split budget) are reached, and
    /// whatever still fails lands in `progress.errors`.
    pub async fn fetch_range(
        &self,
        pool: &PoolConfig,
        from: u64,
        to: u64,
        progress: &mut ImportProgress,
    ) -> Vec<PoolEvent> {
        let mut events = Vec::new();
        if to < from {
            return events;
        }

        let page = self.config.page_size.max(1);
        let mut start = from;
        loop {
            let end = to.min(start.saturating_add(page - 1));
            self.fetch_page(pool, start, end, progress, &mut events).await;
            if end >= to {
                break;
            }
            start = end + 1;
        }

        events.sort_by_key(PoolEvent::position);
        events.dedup_by_key(|e| e.position());
        events
    }

    async fn fetch_page(
        &self,
        pool: &PoolConfig,
        from: u64,
        to: u64,
        progress: &mut ImportProgress,
        events: &mut Vec<PoolEvent>,
    ) {
        // left half on top so errors are recorded in block order
        let mut stack = vec![(from, to, 0u32)];
        while let Some((lo, hi, depth)) = stack.pop() {
            progress.ranges_total += 1;
            match self.query(pool, lo, hi).await {
                Ok(logs) => self.accept(pool, lo, hi, logs, progress, events),
                Err(e) if lo < hi && depth < self.config.max_split_depth => {
                    let mid = lo + (hi - lo) / 2;
                    debug!("{}: splitting {}-{} after: {}", pool.pool_id, lo, hi, e);
                    stack.push((mid + 1, hi, depth + 1));
                    stack.push((lo, mid, depth + 1));
                }
                Err(e) => {
                    warn!("{}: giving up on blocks {}-{}: {}", pool.pool_id, lo, hi, e);
                    progress.record_error(BlockRange::new(lo, hi), e.to_string());
                }
            }
        }
    }

    fn accept(
        &self,
        pool: &PoolConfig,
        lo: u64,
        hi: u64,
        logs: Vec<RawLog>,
        progress: &mut ImportProgress,
        events: &mut Vec<PoolEvent>,
    ) {
        for log in logs {
            if log.block_number < lo || log.block_number > hi {
                warn!(
                    "{}: provider returned log at block {} for query {}-{}",
                    pool.pool_id, log.block_number, lo, hi
                );
                continue;
            }
            match PoolEvent::parse(&log) {
                Ok(event) => events.push(event),
                Err(e) => {
                    warn!("{}: {}", pool.pool_id, e);
                    progress.record_error(
                        BlockRange::new(log.block_number, log.block_number),
                        e.to_string(),
                    );
                }
            }
        }
    }

    /// one query with retries and exponential backoff
    async fn query(&self, pool: &PoolConfig, from: u64, to: u64) -> Result<Vec<RawLog>> {
        let filter = LogFilter {
            chain_id: pool.chain_id(),
            address: pool.address.clone(),
            topics: vec![DEPOSIT_TOPIC.to_string(), WITHDRAWAL_TOPIC.to_string()],
            from_block: from,
            to_block: to,
        };

        let attempts = self.config.max_attempts.max(1);
        let mut attempt = 0;
        loop {
            match self.source.get_logs(&filter).await {
                Ok(logs) => return Ok(logs),
                Err(e) if attempt + 1 < attempts => {
                    debug!("get_logs {}-{} attempt {} failed: {}", from, to, attempt + 1, e);
                    if self.config.retry_backoff_ms > 0 {
                        let backoff = self.config.retry_backoff_ms.saturating_mul(1 << attempt.min(16));
                        tokio::time::sleep(Duration::from_millis(backoff)).await;
                    }
                    attempt += 1;
                }
                Err(e) => return Err(e),
            }
        }
    }
}
