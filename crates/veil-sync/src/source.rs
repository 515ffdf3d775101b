//! chain log source and pool event parsing
//!
//! pool contracts emit
//!
//! ```text
//! Deposit(bytes32 indexed commitment, uint32 leafIndex, uint256 timestamp)
//! Withdrawal(address to, bytes32 nullifierHash, address indexed relayer, uint256 fee)
//! ```
//!
//! logs arrive as hex topics and data; they are parsed into [`PoolEvent`]s
//! here and nowhere else.

use std::collections::HashMap;
use std::ops::RangeInclusive;
use std::str::FromStr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use alloy_primitives::{Address, B256, U256};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;
use veil_notes::{Commitment, NullifierHash};

use crate::error::{Result, SyncError};

/// topic0 of `Deposit(bytes32,uint32,uint256)`
pub const DEPOSIT_TOPIC: &str = "0xa945e51eec50ab98c161376f0db4cf2aeba3ec92755fe2fcd388bdbbb80ff196";
/// topic0 of `Withdrawal(address,bytes32,address,uint256)`
pub const WITHDRAWAL_TOPIC: &str = "0xe9e508bad6d4c3227e881ca19068f099da81b5164dd6d62b2eaf1e8bc6c34931";

const WORD: usize = 32;

/// `eth_getLogs`-style query; `topics` are alternatives for topic0
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct LogFilter {
    pub chain_id: u64,
    pub address: String,
    pub topics: Vec<String>,
    pub from_block: u64,
    pub to_block: u64,
}

/// log as returned by the provider
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct RawLog {
    pub address: String,
    pub topics: Vec<String>,
    pub data: String,
    pub block_number: u64,
    pub log_index: u64,
    pub transaction_hash: Option<String>,
}

impl RawLog {
    /// encode a deposit log the way the pool contract emits it
    pub fn deposit(
        address: &str,
        commitment: Commitment,
        leaf_index: u32,
        timestamp: u64,
        block_number: u64,
        log_index: u64,
    ) -> Self {
        let mut data = Vec::with_capacity(2 * WORD);
        data.extend_from_slice(&U256::from(leaf_index).to_be_bytes::<WORD>());
        data.extend_from_slice(&U256::from(timestamp).to_be_bytes::<WORD>());
        Self {
            address: address.to_lowercase(),
            topics: vec![DEPOSIT_TOPIC.to_string(), format!("{:#x}", B256::from(commitment.0))],
            data: format!("0x{}", hex::encode(data)),
            block_number,
            log_index,
            transaction_hash: None,
        }
    }

    /// encode a withdrawal log the way the pool contract emits it
    pub fn withdrawal(
        address: &str,
        to: Address,
        nullifier_hash: NullifierHash,
        relayer: Address,
        fee: u128,
        block_number: u64,
        log_index: u64,
    ) -> Self {
        let mut data = Vec::with_capacity(3 * WORD);
        data.extend_from_slice(to.into_word().as_slice());
        data.extend_from_slice(&nullifier_hash.0);
        data.extend_from_slice(&U256::from(fee).to_be_bytes::<WORD>());
        Self {
            address: address.to_lowercase(),
            topics: vec![WITHDRAWAL_TOPIC.to_string(), format!("{:#x}", relayer.into_word())],
            data: format!("0x{}", hex::encode(data)),
            block_number,
            log_index,
            transaction_hash: None,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum EventKind {
    Deposit {
        commitment: Commitment,
        leaf_index: u64,
        timestamp: u64,
    },
    Withdrawal {
        nullifier_hash: NullifierHash,
        to: Address,
        relayer: Address,
        fee: u128,
    },
}

/// parsed pool event with its chain position
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PoolEvent {
    pub block: u64,
    pub log_index: u64,
    pub tx_hash: Option<String>,
    pub kind: EventKind,
}

impl PoolEvent {
    /// ordering key on chain
    pub fn position(&self) -> (u64, u64) {
        (self.block, self.log_index)
    }

    pub fn parse(log: &RawLog) -> Result<Self> {
        let topic0 = log
            .topics
            .first()
            .ok_or_else(|| invalid(log, "no topics"))?
            .to_lowercase();
        let data = hex::decode(log.data.strip_prefix("0x").unwrap_or(&log.data))
            .map_err(|e| invalid(log, &format!("hex: {}", e)))?;

        let kind = if topic0 == DEPOSIT_TOPIC {
            let commitment = log
                .topics
                .get(1)
                .ok_or_else(|| invalid(log, "deposit without commitment topic"))?;
            let commitment = topic(commitment).map_err(|e| invalid(log, &e))?;
            let leaf_index: u32 = word_uint(&data, 0).map_err(|e| invalid(log, &e))?;
            EventKind::Deposit {
                commitment: Commitment(commitment.0),
                leaf_index: leaf_index as u64,
                timestamp: word_uint(&data, 1).map_err(|e| invalid(log, &e))?,
            }
        } else if topic0 == WITHDRAWAL_TOPIC {
            let relayer = log
                .topics
                .get(1)
                .ok_or_else(|| invalid(log, "withdrawal without relayer topic"))?;
            let relayer = topic(relayer).map_err(|e| invalid(log, &e))?;
            let nullifier_hash = word(&data, 1).map_err(|e| invalid(log, &e))?;
            EventKind::Withdrawal {
                nullifier_hash: NullifierHash(nullifier_hash.0),
                to: Address::from_word(word(&data, 0).map_err(|e| invalid(log, &e))?),
                relayer: Address::from_word(relayer),
                fee: word_uint(&data, 2).map_err(|e| invalid(log, &e))?,
            }
        } else {
            return Err(invalid(log, &format!("unknown topic {}", topic0)));
        };

        Ok(Self {
            block: log.block_number,
            log_index: log.log_index,
            tx_hash: log.transaction_hash.clone(),
            kind,
        })
    }
}

fn invalid(log: &RawLog, msg: &str) -> SyncError {
    SyncError::InvalidLog(format!("block {} log {}: {}", log.block_number, log.log_index, msg))
}

fn topic(s: &str) -> std::result::Result<B256, String> {
    B256::from_str(s).map_err(|e| format!("topic {}: {}", s, e))
}

fn word(data: &[u8], i: usize) -> std::result::Result<B256, String> {
    data.get(i * WORD..(i + 1) * WORD)
        .map(B256::from_slice)
        .ok_or_else(|| format!("data too short for word {}", i))
}

/// uint word narrowed to `T`, rejecting values that do not fit
fn word_uint<T: TryFrom<U256>>(data: &[u8], i: usize) -> std::result::Result<T, String> {
    let value = U256::from_be_slice(word(data, i)?.as_slice());
    T::try_from(value).map_err(|_| format!("word {} out of range: {}", i, value))
}

/// where pool logs come from
#[async_trait]
pub trait LogSource: Send + Sync {
    /// latest block number on `chain_id`
    async fn head(&self, chain_id: u64) -> Result<u64>;

    /// logs matching `filter`, in any order
    async fn get_logs(&self, filter: &LogFilter) -> Result<Vec<RawLog>>;
}

#[derive(Default)]
struct MemoryChain {
    head: Option<u64>,
    logs: Vec<RawLog>,
    failing: Vec<RangeInclusive<u64>>,
}

/// in-memory log source, with injectable provider failures
#[derive(Default)]
pub struct MemoryLogSource {
    chains: RwLock<HashMap<u64, MemoryChain>>,
    latency: Option<Duration>,
    queries: AtomicUsize,
}

impl MemoryLogSource {
    pub fn new() -> Self {
        Self::default()
    }

    /// delay every query by `latency`
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = Some(latency);
        self
    }

    pub async fn set_head(&self, chain_id: u64, head: u64) {
        self.chains.write().await.entry(chain_id).or_default().head = Some(head);
    }

    pub async fn push(&self, chain_id: u64, log: RawLog) {
        self.chains.write().await.entry(chain_id).or_default().logs.push(log);
    }

    /// make every query touching `blocks` fail
    pub async fn fail_blocks(&self, chain_id: u64, blocks: RangeInclusive<u64>) {
        self.chains.write().await.entry(chain_id).or_default().failing.push(blocks);
    }

    /// drop every log at or above `from_block`, as a reorg would
    pub async fn rewind(&self, chain_id: u64, from_block: u64) {
        if let Some(chain) = self.chains.write().await.get_mut(&chain_id) {
            chain.logs.retain(|log| log.block_number < from_block);
        }
    }

    pub async fn heal(&self, chain_id: u64) {
        if let Some(chain) = self.chains.write().await.get_mut(&chain_id) {
            chain.failing.clear();
        }
    }

    /// number of `get_logs` calls served or failed
    pub fn queries(&self) -> usize {
        self.queries.load(Ordering::Relaxed)
    }
}

#[async_trait]
impl LogSource for MemoryLogSource {
    async fn head(&self, chain_id: u64) -> Result<u64> {
        self.chains
            .read()
            .await
            .get(&chain_id)
            .and_then(|c| c.head)
            .ok_or_else(|| SyncError::Rpc(format!("no head for chain {}", chain_id)))
    }

    async fn get_logs(&self, filter: &LogFilter) -> Result<Vec<RawLog>> {
        self.queries.fetch_add(1, Ordering::Relaxed);
        if let Some(latency) = self.latency {
            tokio::time::sleep(latency).await;
        }

        let chains = self.chains.read().await;
        let Some(chain) = chains.get(&filter.chain_id) else {
            return Ok(Vec::new());
        };
        if chain
            .failing
            .iter()
            .any(|r| *r.start() <= filter.to_block && filter.from_block <= *r.end())
        {
            return Err(SyncError::Rpc(format!(
                "query {}-{} failed",
                filter.from_block, filter.to_block
            )));
        }

        let address = filter.address.to_lowercase();
        Ok(chain
            .logs
            .iter()
            .filter(|log| {
                log.address == address
                    && (filter.from_block..=filter.to_block).contains(&log.block_number)
                    && (filter.topics.is_empty()
                        || log
                            .topics
                            .first()
                            .map(|t| filter.topics.iter().any(|f| f.eq_ignore_ascii_case(t)))
                            .unwrap_or(false))
            })
            .cloned()
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const POOL: &str = "0x12D66f87A04A9E220743712cE6d9bB1B5616B8Fc";

    #[test]
    fn test_parse_deposit() {
        let log = RawLog::deposit(POOL, Commitment([7u8; 32]), 41, 1_600_000_000, 101, 3);
        let event = PoolEvent::parse(&log).unwrap();
        assert_eq!(event.position(), (101, 3));
        assert_eq!(
            event.kind,
            EventKind::Deposit {
                commitment: Commitment([7u8; 32]),
                leaf_index: 41,
                timestamp: 1_600_000_000,
            }
        );
    }

    #[test]
    fn test_parse_withdrawal() {
        let to = Address::repeat_byte(0xaa);
        let relayer = Address::repeat_byte(0xbb);
        let log = RawLog::withdrawal(POOL, to, NullifierHash([5u8; 32]), relayer, 12345, 7, 0);
        assert_eq!(log.topics[1], format!("0x{}{}", "00".repeat(12), "bb".repeat(20)));

        let event = PoolEvent::parse(&log).unwrap();
        match event.kind {
            EventKind::Withdrawal { nullifier_hash, to: parsed_to, relayer: parsed_relayer, fee } => {
                assert_eq!(nullifier_hash, NullifierHash([5u8; 32]));
                assert_eq!(parsed_to, to);
                assert_eq!(parsed_relayer, relayer);
                assert_eq!(fee, 12345);
            }
            other => panic!("unexpected event {:?}", other),
        }
    }

    #[test]
    fn test_parse_rejects_malformed() {
        let mut log = RawLog::deposit(POOL, Commitment([1u8; 32]), 0, 0, 1, 0);
        log.data = "0x00".into();
        assert!(matches!(PoolEvent::parse(&log), Err(SyncError::InvalidLog(_))));

        let mut log = RawLog::deposit(POOL, Commitment([1u8; 32]), 0, 0, 1, 0);
        log.topics[0] = "0xdeadbeef".into();
        assert!(PoolEvent::parse(&log).is_err());

        let mut log = RawLog::deposit(POOL, Commitment([1u8; 32]), 0, 0, 1, 0);
        log.topics.truncate(1);
        assert!(PoolEvent::parse(&log).is_err());

        // leaf index wider than uint32
        let mut log = RawLog::deposit(POOL, Commitment([1u8; 32]), 0, 0, 1, 0);
        let mut data = U256::from(u64::MAX).to_be_bytes::<WORD>().to_vec();
        data.extend_from_slice(&[0u8; WORD]);
        log.data = format!("0x{}", hex::encode(data));
        assert!(PoolEvent::parse(&log).is_err());
    }

    #[tokio::test]
    async fn test_memory_source_filters() {
        let source = MemoryLogSource::new();
        source.set_head(1, 100).await;
        source.push(1, RawLog::deposit(POOL, Commitment([1u8; 32]), 0, 0, 10, 0)).await;
        source.push(1, RawLog::deposit("0xother", Commitment([2u8; 32]), 0, 0, 10, 1)).await;
        source.push(1, RawLog::deposit(POOL, Commitment([3u8; 32]), 1, 0, 90, 0)).await;

        let filter = LogFilter {
            chain_id: 1,
            address: POOL.into(),
            topics: vec![DEPOSIT_TOPIC.into()],
            from_block: 0,
            to_block: 50,
        };
        let logs = source.get_logs(&filter).await.unwrap();
        assert_eq!(logs.len(), 1);
        assert_eq!(source.head(1).await.unwrap(), 100);

        source.fail_blocks(1, 40..=45).await;
        assert!(source.get_logs(&filter).await.is_err());
        assert_eq!(source.queries(), 2);
    }
}
