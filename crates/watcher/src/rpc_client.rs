use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use serde_json::Value;
use tracing::debug;
use tssbridge_types::{format_address, Address, BlockNumber, H256};

use crate::backoff::{retry_forever, BackoffPolicy};
use crate::chain_client::{AccessListItem, ChainClient, Log, LogFilter, TransactionInfo};
use crate::config::ChainConfig;

/// JSON-RPC client over HTTP. Transport failures and node errors are retried
/// forever; a chain read is never abandoned halfway.
pub struct RpcClient {
    client: reqwest::Client,
    url: String,
    backoff: BackoffPolicy,
}

impl RpcClient {
    pub fn new(config: &ChainConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.rpc_timeout_seconds))
            .build()
            .context("failed to create HTTP client")?;

        Ok(Self {
            client,
            url: config.rpc_url.clone(),
            backoff: config.backoff(),
        })
    }

    /// Returns the `result` member of the reply.
    pub async fn request(&self, method: &str, params: Value) -> Value {
        let payload = serde_json::json!({
            "jsonrpc": "2.0",
            "method": method,
            "params": params,
            "id": 1
        });

        retry_forever(self.backoff, method, || self.try_request(&payload)).await
    }

    async fn try_request(&self, payload: &Value) -> Result<Value> {
        let response: Value = self
            .client
            .post(&self.url)
            .json(payload)
            .send()
            .await?
            .json()
            .await?;

        if let Some(error) = response.get("error") {
            let error_msg = error
                .get("message")
                .and_then(|v| v.as_str())
                .unwrap_or("Unknown RPC error");
            let error_code = error.get("code").and_then(|v| v.as_i64()).unwrap_or(-1);

            if error_code == -32005 || error_code == 429 {
                return Err(anyhow!("Rate limited: {}", error_msg));
            }

            return Err(anyhow!("RPC error ({}): {}", error_code, error_msg));
        }

        response
            .get("result")
            .cloned()
            .ok_or_else(|| anyhow!("Invalid response format: missing result"))
    }
}

fn quantity(hex_str: &str) -> Result<u128> {
    let digits = hex_str.trim_start_matches("0x");
    if digits.is_empty() {
        return Ok(0);
    }
    u128::from_str_radix(digits, 16).map_err(|e| anyhow!("bad quantity {}: {}", hex_str, e))
}

fn block_tag(block: Option<BlockNumber>) -> Value {
    match block {
        Some(n) => Value::String(format!("0x{:x}", n)),
        None => Value::String("latest".to_string()),
    }
}

fn field<'a>(value: &'a Value, name: &str) -> Result<&'a str> {
    value
        .get(name)
        .and_then(|v| v.as_str())
        .ok_or_else(|| anyhow!("missing {}", name))
}

fn opt_field<'a>(value: &'a Value, name: &str) -> Option<&'a str> {
    value.get(name).and_then(|v| v.as_str())
}

pub(crate) fn parse_u64(value: &Value, name: &str) -> Result<u64> {
    let n = quantity(field(value, name)?)?;
    u64::try_from(n).map_err(|_| anyhow!("{} out of range", name))
}

fn parse_u128(value: &Value, name: &str) -> Result<Option<u128>> {
    opt_field(value, name).map(quantity).transpose()
}

pub(crate) fn parse_bytes(hex_str: &str) -> Result<Vec<u8>> {
    hex::decode(hex_str.trim_start_matches("0x")).map_err(|e| anyhow!("bad hex: {}", e))
}

fn parse_fixed<const N: usize>(hex_str: &str) -> Result<[u8; N]> {
    let bytes = parse_bytes(hex_str)?;
    bytes
        .try_into()
        .map_err(|b: Vec<u8>| anyhow!("expected {} bytes, got {}", N, b.len()))
}

/// Left-pads a quantity such as `r` or `value` to 32 bytes.
fn parse_word(hex_str: &str) -> Result<H256> {
    let digits = hex_str.trim_start_matches("0x");
    let padded = if digits.len() % 2 == 1 {
        format!("0{}", digits)
    } else {
        digits.to_string()
    };
    let bytes = hex::decode(padded).map_err(|e| anyhow!("bad hex: {}", e))?;
    if bytes.len() > 32 {
        return Err(anyhow!("word longer than 32 bytes"));
    }
    let mut word = [0u8; 32];
    word[32 - bytes.len()..].copy_from_slice(&bytes);
    Ok(word)
}

pub(crate) fn parse_log(value: &Value) -> Result<Option<Log>> {
    if value.get("removed").and_then(|v| v.as_bool()).unwrap_or(false) {
        return Ok(None);
    }

    let topics = value
        .get("topics")
        .and_then(|v| v.as_array())
        .ok_or_else(|| anyhow!("Missing topics in log"))?
        .iter()
        .map(|t| {
            t.as_str()
                .ok_or_else(|| anyhow!("topic is not a string"))
                .and_then(parse_fixed::<32>)
        })
        .collect::<Result<Vec<_>>>()?;

    Ok(Some(Log {
        address: parse_fixed(field(value, "address")?)?,
        topics,
        data: parse_bytes(field(value, "data")?)?,
        block_number: parse_u64(value, "blockNumber")?,
        log_index: parse_u64(value, "logIndex")?,
        transaction_hash: parse_fixed(field(value, "transactionHash")?)?,
    }))
}

/// Logs of an `eth_getLogs` result, ordered by position in the chain. Anything
/// but an array is an error; an empty range is `[]`.
pub(crate) fn parse_logs(result: &Value) -> Result<Vec<Log>> {
    let raw = result
        .as_array()
        .ok_or_else(|| anyhow!("Invalid response format: logs are not an array: {}", result))?;
    let mut logs = Vec::with_capacity(raw.len());
    for entry in raw {
        if let Some(log) = parse_log(entry)? {
            logs.push(log);
        }
    }
    logs.sort_by_key(|log| (log.block_number, log.log_index));
    Ok(logs)
}

pub(crate) fn parse_transaction(value: &Value) -> Result<TransactionInfo> {
    let tx_type = opt_field(value, "type")
        .map(quantity)
        .transpose()?
        .unwrap_or(0) as u8;

    let access_list = match value.get("accessList").and_then(|v| v.as_array()) {
        Some(items) => items
            .iter()
            .map(|item| {
                let storage_keys = item
                    .get("storageKeys")
                    .and_then(|v| v.as_array())
                    .map(|keys| {
                        keys.iter()
                            .map(|k| {
                                k.as_str()
                                    .ok_or_else(|| anyhow!("storage key is not a string"))
                                    .and_then(parse_fixed::<32>)
                            })
                            .collect::<Result<Vec<_>>>()
                    })
                    .transpose()?
                    .unwrap_or_default();
                Ok(AccessListItem {
                    address: parse_fixed(field(item, "address")?)?,
                    storage_keys,
                })
            })
            .collect::<Result<Vec<_>>>()?,
        None => Vec::new(),
    };

    let chain_id = parse_u128(value, "chainId")?
        .map(u64::try_from)
        .transpose()
        .map_err(|_| anyhow!("chainId out of range"))?;

    Ok(TransactionInfo {
        hash: parse_fixed(field(value, "hash")?)?,
        tx_type,
        chain_id,
        nonce: parse_u64(value, "nonce")?,
        gas_price: parse_u128(value, "gasPrice")?,
        max_priority_fee_per_gas: parse_u128(value, "maxPriorityFeePerGas")?,
        max_fee_per_gas: parse_u128(value, "maxFeePerGas")?,
        gas: parse_u64(value, "gas")?,
        to: opt_field(value, "to").map(parse_fixed).transpose()?,
        value: parse_word(field(value, "value")?)?,
        input: parse_bytes(field(value, "input")?)?,
        access_list,
        v: parse_u64(value, "v")?,
        r: parse_word(field(value, "r")?)?,
        s: parse_word(field(value, "s")?)?,
    })
}

#[async_trait]
impl ChainClient for RpcClient {
    async fn block_number(&self) -> Result<BlockNumber> {
        let result = self.request("eth_blockNumber", serde_json::json!([])).await;
        let hex_str = result
            .as_str()
            .ok_or_else(|| anyhow!("Invalid response format: block number"))?;
        u64::try_from(quantity(hex_str)?).map_err(|_| anyhow!("block number out of range"))
    }

    async fn get_logs(&self, filter: &LogFilter) -> Result<Vec<Log>> {
        let mut params = serde_json::json!({
            "fromBlock": format!("0x{:x}", filter.from_block),
            "toBlock": format!("0x{:x}", filter.to_block),
            "address": format_address(&filter.address),
        });
        if let Some(topic0) = &filter.topic0 {
            let any: Vec<String> = topic0
                .iter()
                .map(|t| format!("0x{}", hex::encode(t)))
                .collect();
            params["topics"] = serde_json::json!([any]);
        }

        let result = self.request("eth_getLogs", serde_json::json!([params])).await;
        let logs = parse_logs(&result)?;

        debug!(
            from = filter.from_block,
            to = filter.to_block,
            count = logs.len(),
            "fetched logs"
        );
        Ok(logs)
    }

    async fn get_transaction(&self, hash: &H256) -> Result<TransactionInfo> {
        let result = self
            .request(
                "eth_getTransactionByHash",
                serde_json::json!([format!("0x{}", hex::encode(hash))]),
            )
            .await;
        if result.is_null() {
            return Err(anyhow!("transaction 0x{} not found", hex::encode(hash)));
        }
        parse_transaction(&result)
    }

    async fn block_timestamp(&self, block: BlockNumber) -> Result<u64> {
        let result = self
            .request(
                "eth_getBlockByNumber",
                serde_json::json!([block_tag(Some(block)), false]),
            )
            .await;
        if result.is_null() {
            return Err(anyhow!("block {} not found", block));
        }
        parse_u64(&result, "timestamp")
    }

    async fn call(&self, to: &Address, data: &[u8], block: Option<BlockNumber>) -> Result<Vec<u8>> {
        let result = self
            .request(
                "eth_call",
                serde_json::json!([
                    {
                        "to": format_address(to),
                        "data": format!("0x{}", hex::encode(data)),
                    },
                    block_tag(block)
                ]),
            )
            .await;
        let hex_str = result
            .as_str()
            .ok_or_else(|| anyhow!("Invalid response format: call result"))?;
        parse_bytes(hex_str)
    }
}
