//! pool identifiers

use serde::{Deserialize, Serialize};

/// one pool contract instance: a currency at a fixed denomination on one chain
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct PoolId {
    pub chain_id: u64,
    /// lowercase currency symbol (e.g. "eth")
    pub currency: String,
    /// denomination as written in note strings (e.g. "0.1")
    pub denomination: String,
}

impl PoolId {
    pub fn new(chain_id: u64, currency: &str, denomination: &str) -> Self {
        Self {
            chain_id,
            currency: currency.to_lowercase(),
            denomination: denomination.to_string(),
        }
    }
}

impl std::fmt::Display for PoolId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}-{}@{}", self.currency, self.denomination, self.chain_id)
    }
}
