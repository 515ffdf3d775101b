//! ethereum JSON-RPC log source

use std::collections::HashMap;

use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::debug;

use crate::error::{Result, SyncError};
use crate::source::{LogFilter, LogSource, RawLog};

#[derive(Clone)]
pub struct RpcClient {
    url: String,
    client: Client,
}

#[derive(Debug, Deserialize)]
struct RpcResponse {
    result: Option<Value>,
    error: Option<RpcError>,
}

#[derive(Debug, Deserialize)]
struct RpcError {
    code: i64,
    message: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RpcLog {
    address: String,
    topics: Vec<String>,
    data: String,
    block_number: String,
    log_index: String,
    transaction_hash: Option<String>,
    #[serde(default)]
    removed: bool,
}

impl RpcClient {
    pub fn new(url: &str) -> Self {
        Self {
            url: url.to_string(),
            client: Client::new(),
        }
    }

    async fn call(&self, method: &str, params: Vec<Value>) -> Result<Value> {
        let payload = json!({
            "jsonrpc": "2.0",
            "id": 1,
            "method": method,
            "params": params,
        });

        let response = self
            .client
            .post(&self.url)
            .json(&payload)
            .send()
            .await
            .map_err(|e| SyncError::Rpc(e.to_string()))?;

        let json: RpcResponse = response
            .json()
            .await
            .map_err(|e| SyncError::Rpc(e.to_string()))?;

        if let Some(error) = json.error {
            return Err(SyncError::Rpc(format!(
                "RPC error {}: {}",
                error.code, error.message
            )));
        }

        json.result
            .ok_or_else(|| SyncError::Rpc("no result in response".into()))
    }

    pub async fn chain_id(&self) -> Result<u64> {
        let result = self.call("eth_chainId", vec![]).await?;
        parse_quantity_value(&result)
    }

    pub async fn block_number(&self) -> Result<u64> {
        let result = self.call("eth_blockNumber", vec![]).await?;
        parse_quantity_value(&result)
    }

    pub async fn get_logs(&self, filter: &LogFilter) -> Result<Vec<RawLog>> {
        let params = json!({
            "address": filter.address,
            "topics": [filter.topics],
            "fromBlock": format!("0x{:x}", filter.from_block),
            "toBlock": format!("0x{:x}", filter.to_block),
        });
        let result = self.call("eth_getLogs", vec![params]).await?;
        let logs: Vec<RpcLog> =
            serde_json::from_value(result).map_err(|e| SyncError::Rpc(e.to_string()))?;
        debug!(
            "eth_getLogs {}-{}: {} logs",
            filter.from_block,
            filter.to_block,
            logs.len()
        );
        convert_logs(logs)
    }
}

fn convert_logs(logs: Vec<RpcLog>) -> Result<Vec<RawLog>> {
    logs.into_iter()
        .filter(|log| !log.removed)
        .map(|log| {
            Ok(RawLog {
                address: log.address.to_lowercase(),
                topics: log.topics,
                data: log.data,
                block_number: parse_quantity(&log.block_number)?,
                log_index: parse_quantity(&log.log_index)?,
                transaction_hash: log.transaction_hash,
            })
        })
        .collect()
}

/// parse a hex quantity such as `"0x1b4"`
pub fn parse_quantity(s: &str) -> Result<u64> {
    let digits = s
        .strip_prefix("0x")
        .ok_or_else(|| SyncError::Rpc(format!("quantity without 0x: {:?}", s)))?;
    u64::from_str_radix(digits, 16).map_err(|e| SyncError::Rpc(format!("quantity {:?}: {}", s, e)))
}

fn parse_quantity_value(v: &Value) -> Result<u64> {
    let s = v
        .as_str()
        .ok_or_else(|| SyncError::Rpc(format!("expected quantity string, got {}", v)))?;
    parse_quantity(s)
}

/// log source backed by one JSON-RPC endpoint per chain
#[derive(Clone, Default)]
pub struct RpcLogSource {
    endpoints: HashMap<u64, RpcClient>,
}

impl RpcLogSource {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_endpoint(mut self, chain_id: u64, url: &str) -> Self {
        self.endpoints.insert(chain_id, RpcClient::new(url));
        self
    }

    fn client(&self, chain_id: u64) -> Result<&RpcClient> {
        self.endpoints
            .get(&chain_id)
            .ok_or_else(|| SyncError::Rpc(format!("no endpoint for chain {}", chain_id)))
    }
}

#[async_trait]
impl LogSource for RpcLogSource {
    async fn head(&self, chain_id: u64) -> Result<u64> {
        self.client(chain_id)?.block_number().await
    }

    async fn get_logs(&self, filter: &LogFilter) -> Result<Vec<RawLog>> {
        self.client(filter.chain_id)?.get_logs(filter).await
    }
}
