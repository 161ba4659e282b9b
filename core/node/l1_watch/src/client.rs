//! The L1 JSON-RPC collaborator: the three calls the follower needs, behind
//! a trait so tests can feed canned chains.

use std::fmt;

use async_trait::async_trait;
use cdk_basic_types::{Address, L1BlockNumber, H256};
use cdk_config::L1BlockTag;
use serde_json::{json, Value};

#[derive(Debug, thiserror::Error)]
pub enum L1ClientError {
    #[error("transport failure: {0}")]
    Transport(#[from] reqwest::Error),
    #[error("RPC error {code}: {message}")]
    Rpc { code: i64, message: String },
    #[error("malformed response: {0}")]
    Malformed(String),
}

/// One log as returned by `eth_getLogs`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct L1Log {
    pub address: Address,
    pub topics: Vec<H256>,
    pub data: Vec<u8>,
    pub block_number: L1BlockNumber,
    pub tx_hash: H256,
}

/// Header fields the follower resolves per info-tree update.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct L1BlockHeader {
    pub number: L1BlockNumber,
    pub hash: H256,
    pub parent_hash: H256,
    pub timestamp: u64,
}

#[async_trait]
pub trait L1Client: 'static + fmt::Debug + Send + Sync {
    async fn get_highest_block(&self, tag: L1BlockTag) -> Result<L1BlockNumber, L1ClientError>;

    async fn get_logs(
        &self,
        from: L1BlockNumber,
        to: L1BlockNumber,
    ) -> Result<Vec<L1Log>, L1ClientError>;

    async fn get_block_header(
        &self,
        number: L1BlockNumber,
    ) -> Result<Option<L1BlockHeader>, L1ClientError>;
}

/// `reqwest`-backed JSON-RPC client.
#[derive(Debug, Clone)]
pub struct HttpL1Client {
    url: String,
    client: reqwest::Client,
}

impl HttpL1Client {
    pub fn new(url: String) -> Self {
        Self {
            url,
            client: reqwest::Client::new(),
        }
    }

    async fn request(&self, method: &str, params: Value) -> Result<Value, L1ClientError> {
        let body = json!({
            "jsonrpc": "2.0",
            "id": 1,
            "method": method,
            "params": params,
        });
        let response: Value = self
            .client
            .post(&self.url)
            .json(&body)
            .send()
            .await?
            .json()
            .await?;
        if let Some(error) = response.get("error") {
            return Err(L1ClientError::Rpc {
                code: error.get("code").and_then(Value::as_i64).unwrap_or(0),
                message: error
                    .get("message")
                    .and_then(Value::as_str)
                    .unwrap_or("unknown")
                    .to_string(),
            });
        }
        response
            .get("result")
            .cloned()
            .ok_or_else(|| L1ClientError::Malformed("missing result".to_string()))
    }
}

fn parse_quantity(value: &Value) -> Result<u64, L1ClientError> {
    let text = value
        .as_str()
        .ok_or_else(|| L1ClientError::Malformed(format!("expected a quantity, got {value}")))?;
    u64::from_str_radix(text.trim_start_matches("0x"), 16)
        .map_err(|err| L1ClientError::Malformed(format!("bad quantity {text}: {err}")))
}

fn parse_hash(value: &Value) -> Result<H256, L1ClientError> {
    let text = value
        .as_str()
        .ok_or_else(|| L1ClientError::Malformed(format!("expected a hash, got {value}")))?;
    text.trim_start_matches("0x")
        .parse()
        .map_err(|err| L1ClientError::Malformed(format!("bad hash {text}: {err}")))
}

fn parse_bytes(value: &Value) -> Result<Vec<u8>, L1ClientError> {
    let text = value
        .as_str()
        .ok_or_else(|| L1ClientError::Malformed(format!("expected bytes, got {value}")))?;
    hex_decode(text.trim_start_matches("0x"))
        .map_err(|err| L1ClientError::Malformed(format!("bad bytes {text}: {err}")))
}

fn hex_decode(text: &str) -> Result<Vec<u8>, String> {
    if text.len() % 2 != 0 {
        return Err("odd hex length".to_string());
    }
    (0..text.len())
        .step_by(2)
        .map(|i| u8::from_str_radix(&text[i..i + 2], 16).map_err(|err| err.to_string()))
        .collect()
}

#[async_trait]
impl L1Client for HttpL1Client {
    async fn get_highest_block(&self, tag: L1BlockTag) -> Result<L1BlockNumber, L1ClientError> {
        let result = self
            .request("eth_getBlockByNumber", json!([tag.as_str(), false]))
            .await?;
        let number = result
            .get("number")
            .ok_or_else(|| L1ClientError::Malformed("block without a number".to_string()))?;
        Ok(L1BlockNumber(parse_quantity(number)?))
    }

    async fn get_logs(
        &self,
        from: L1BlockNumber,
        to: L1BlockNumber,
    ) -> Result<Vec<L1Log>, L1ClientError> {
        let filter = json!([{
            "fromBlock": format!("{:#x}", from.0),
            "toBlock": format!("{:#x}", to.0),
        }]);
        let result = self.request("eth_getLogs", filter).await?;
        let entries = result
            .as_array()
            .ok_or_else(|| L1ClientError::Malformed("logs are not an array".to_string()))?;
        entries
            .iter()
            .map(|entry| {
                let topics = entry
                    .get("topics")
                    .and_then(Value::as_array)
                    .ok_or_else(|| L1ClientError::Malformed("log without topics".to_string()))?
                    .iter()
                    .map(parse_hash)
                    .collect::<Result<Vec<_>, _>>()?;
                let address_raw = entry
                    .get("address")
                    .ok_or_else(|| L1ClientError::Malformed("log without address".to_string()))?;
                Ok(L1Log {
                    address: Address::from_slice(&parse_hash_h160(address_raw)?),
                    topics,
                    data: parse_bytes(entry.get("data").unwrap_or(&Value::Null))?,
                    block_number: L1BlockNumber(parse_quantity(
                        entry.get("blockNumber").unwrap_or(&Value::Null),
                    )?),
                    tx_hash: parse_hash(entry.get("transactionHash").unwrap_or(&Value::Null))?,
                })
            })
            .collect()
    }

    async fn get_block_header(
        &self,
        number: L1BlockNumber,
    ) -> Result<Option<L1BlockHeader>, L1ClientError> {
        let result = self
            .request(
                "eth_getBlockByNumber",
                json!([format!("{:#x}", number.0), false]),
            )
            .await?;
        if result.is_null() {
            return Ok(None);
        }
        Ok(Some(L1BlockHeader {
            number,
            hash: parse_hash(result.get("hash").unwrap_or(&Value::Null))?,
            parent_hash: parse_hash(result.get("parentHash").unwrap_or(&Value::Null))?,
            timestamp: parse_quantity(result.get("timestamp").unwrap_or(&Value::Null))?,
        }))
    }
}

fn parse_hash_h160(value: &Value) -> Result<[u8; 20], L1ClientError> {
    let text = value
        .as_str()
        .ok_or_else(|| L1ClientError::Malformed(format!("expected an address, got {value}")))?;
    let bytes = hex_decode(text.trim_start_matches("0x"))
        .map_err(|err| L1ClientError::Malformed(format!("bad address {text}: {err}")))?;
    bytes
        .try_into()
        .map_err(|_| L1ClientError::Malformed(format!("address {text} is not 20 bytes")))
}
