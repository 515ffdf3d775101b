//! sync and pool configuration

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use veil_notes::PoolId;
use veil_tree::{Hash, DEFAULT_LEVELS};

use crate::error::{Result, SyncError};

/// tuning for scans and reconstruction runs
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncConfig {
    /// blocks per `get_logs` query
    pub page_size: u64,
    /// blocks per coordinator chunk (progress and cancellation granularity)
    pub chunk_size: u64,
    /// attempts per query before splitting the range
    pub max_attempts: u32,
    /// base backoff between attempts, doubled each retry
    pub retry_backoff_ms: u64,
    /// how many times a failing range may be halved
    pub max_split_depth: u32,
    /// failed blocks / scanned blocks above which a pool's run fails
    pub max_failed_fraction: f64,
    /// blocks below head considered final
    pub reorg_depth: u64,
    /// seconds before a pending note is settled by `reconcile_pending`
    pub pending_timeout_secs: u64,
    /// keep deposits the wallet holds no key material for
    pub retain_foreign: bool,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            page_size: 5_000,
            chunk_size: 50_000,
            max_attempts: 3,
            retry_backoff_ms: 100,
            max_split_depth: 16,
            max_failed_fraction: 0.05,
            reorg_depth: 12,
            pending_timeout_secs: 3_600,
            retain_foreign: false,
        }
    }
}

impl SyncConfig {
    pub fn validate(&self) -> Result<()> {
        if self.page_size == 0 || self.chunk_size == 0 {
            return Err(SyncError::InvalidConfig("page_size and chunk_size must be > 0".into()));
        }
        if self.max_attempts == 0 {
            return Err(SyncError::InvalidConfig("max_attempts must be > 0".into()));
        }
        if !(0.0..=1.0).contains(&self.max_failed_fraction) {
            return Err(SyncError::InvalidConfig(format!(
                "max_failed_fraction {} outside [0, 1]",
                self.max_failed_fraction
            )));
        }
        Ok(())
    }
}

/// one pool contract to track
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PoolConfig {
    pub pool_id: PoolId,
    /// contract address, 0x-prefixed
    pub address: String,
    /// first block worth scanning
    pub deployment_block: u64,
    #[serde(default = "default_levels")]
    pub levels: usize,
    /// leaf value of empty positions, as 0x-prefixed hex
    #[serde(default, with = "hex_hash")]
    pub zero_element: Hash,
    /// value of one note in base units
    #[serde(default)]
    pub amount: u128,
}

fn default_levels() -> usize {
    DEFAULT_LEVELS
}

impl PoolConfig {
    pub fn new(pool_id: PoolId, address: &str, deployment_block: u64) -> Self {
        Self {
            pool_id,
            address: address.to_lowercase(),
            deployment_block,
            levels: DEFAULT_LEVELS,
            zero_element: [0u8; 32],
            amount: 0,
        }
    }

    pub fn chain_id(&self) -> u64 {
        self.pool_id.chain_id
    }
}

mod hex_hash {
    use super::*;

    pub fn serialize<S: Serializer>(hash: &Hash, s: S) -> std::result::Result<S::Ok, S::Error> {
        s.serialize_str(&format!("0x{}", hex::encode(hash)))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> std::result::Result<Hash, D::Error> {
        let s = String::deserialize(d)?;
        let bytes = hex::decode(s.trim_start_matches("0x")).map_err(serde::de::Error::custom)?;
        bytes
            .try_into()
            .map_err(|b: Vec<u8>| serde::de::Error::custom(format!("expected 32 bytes, got {}", b.len())))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        SyncConfig::default().validate().unwrap();
    }

    #[test]
    fn test_rejects_bad_config() {
        let cfg = SyncConfig { page_size: 0, ..Default::default() };
        assert!(cfg.validate().is_err());
        let cfg = SyncConfig { max_failed_fraction: 1.5, ..Default::default() };
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn test_pool_config_json() {
        let json = r#"{
            "pool_id": { "chain_id": 1, "currency": "eth", "denomination": "0.1" },
            "address": "0x12d66f87a04a9e220743712ce6d9bb1b5616b8fc",
            "deployment_block": 9116966,
            "zero_element": "0x2fe54c60d3acabf3343a35b6eba15db4821b340f76e741e2249685ed4899af6c"
        }"#;
        let cfg: PoolConfig = serde_json::from_str(json).unwrap();
        assert_eq!(cfg.levels, DEFAULT_LEVELS);
        assert_eq!(cfg.zero_element[0], 0x2f);
        assert_eq!(cfg.chain_id(), 1);
    }
}
