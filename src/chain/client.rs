use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use serde_json::json;
use std::time::Duration;
use tracing::warn;

use crate::chain::decode::{
    address_from_topic, normalize_amount, parse_hex_u64, parse_hex_value, topic_for_address,
    TRANSFER_TOPIC,
};
use crate::chain::models::TransferEvent;
use crate::error::{AppResult, ChainError};

/// Read access to the chain, as required by the watcher
#[async_trait]
pub trait ChainClient: Send + Sync {
    /// Current chain tip height
    async fn tip(&self) -> AppResult<u64>;

    /// Token transfers into the service wallet within the inclusive block
    /// range, in no particular order
    async fn transfer_logs(&self, from_block: u64, to_block: u64)
        -> AppResult<Vec<TransferEvent>>;
}

/// JSON-RPC client for an EVM-compatible chain
pub struct EvmRpcClient {
    client: Client,
    rpc_url: String,
    token_contract: String,
    recipient_topic: String,
    token_decimals: u32,
}

#[derive(Deserialize)]
struct RpcResponse<T> {
    result: Option<T>,
    error: Option<RpcError>,
}

#[derive(Deserialize)]
struct RpcError {
    code: i64,
    message: String,
}

#[derive(Deserialize)]
struct LogEntry {
    #[serde(rename = "transactionHash")]
    transaction_hash: String,
    #[serde(rename = "blockNumber")]
    block_number: String,
    topics: Vec<String>,
    data: String,
}

impl EvmRpcClient {
    pub fn new(
        rpc_url: &str,
        token_contract: &str,
        service_wallet: &str,
        token_decimals: u32,
        timeout: Duration,
    ) -> AppResult<Self> {
        Ok(Self {
            client: Client::builder()
                .timeout(timeout)
                .build()
                .unwrap_or_else(|_| Client::new()),
            rpc_url: rpc_url.to_string(),
            token_contract: token_contract.to_lowercase(),
            recipient_topic: topic_for_address(service_wallet)?,
            token_decimals,
        })
    }

    async fn call<T: serde::de::DeserializeOwned>(
        &self,
        method: &str,
        params: serde_json::Value,
    ) -> AppResult<T> {
        let body = json!({
            "jsonrpc": "2.0",
            "id": 1,
            "method": method,
            "params": params,
        });

        let response = self
            .client
            .post(&self.rpc_url)
            .json(&body)
            .send()
            .await
            .map_err(|e| ChainError::Rpc(format!("{}: {}", method, e)))?;

        let parsed: RpcResponse<T> = response
            .json()
            .await
            .map_err(|e| ChainError::MalformedResponse(format!("{}: {}", method, e)))?;

        if let Some(err) = parsed.error {
            return Err(ChainError::Rpc(format!(
                "{} returned {}: {}",
                method, err.code, err.message
            ))
            .into());
        }

        parsed.result.ok_or_else(|| {
            ChainError::MalformedResponse(format!("{}: missing result", method)).into()
        })
    }

    fn decode_log(&self, log: &LogEntry) -> Result<TransferEvent, ChainError> {
        if log.topics.len() < 3 {
            return Err(ChainError::Decode(format!(
                "transfer log with {} topics",
                log.topics.len()
            )));
        }

        let raw = parse_hex_value(&log.data)?;
        Ok(TransferEvent {
            tx_hash: log.transaction_hash.to_lowercase(),
            from: address_from_topic(&log.topics[1])?,
            amount: normalize_amount(raw, self.token_decimals)?,
            block_height: parse_hex_u64(&log.block_number)?,
        })
    }
}

#[async_trait]
impl ChainClient for EvmRpcClient {
    async fn tip(&self) -> AppResult<u64> {
        let raw: String = self.call("eth_blockNumber", json!([])).await?;
        Ok(parse_hex_u64(&raw)?)
    }

    async fn transfer_logs(
        &self,
        from_block: u64,
        to_block: u64,
    ) -> AppResult<Vec<TransferEvent>> {
        let filter = json!([{
            "fromBlock": format!("0x{:x}", from_block),
            "toBlock": format!("0x{:x}", to_block),
            "address": &self.token_contract,
            "topics": [TRANSFER_TOPIC, serde_json::Value::Null, &self.recipient_topic],
        }]);

        let logs: Vec<LogEntry> = self.call("eth_getLogs", filter).await?;

        // Logs from third-party nodes are noisy; a malformed entry is logged
        // and skipped rather than poisoning the whole range.
        let mut events = Vec::with_capacity(logs.len());
        for log in &logs {
            match self.decode_log(log) {
                Ok(event) => events.push(event),
                Err(e) => warn!("Skipping undecodable transfer log {}: {}", log.transaction_hash, e),
            }
        }

        Ok(events)
    }
}
