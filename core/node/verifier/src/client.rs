//! Prover collaborators: the HTTP client speaking the executor's JSON
//! protocol, and a local shadow verifier for deployments without a remote
//! executor.

use std::{
    fmt,
    sync::atomic::{AtomicUsize, Ordering},
};

use async_trait::async_trait;
use cdk_basic_types::{Address, BatchNumber, H256};
use cdk_dal::{ConnectionPool, CoreDal};
use serde::{Deserialize, Serialize};

/// Payload POSTed to a remote executor.
#[derive(Debug, Clone, Serialize)]
pub struct ProverPayload {
    pub witness: String,
    pub coinbase: String,
    pub old_acc_input_hash: String,
    pub timestamp_limit: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub forced_l1_block_hash: Option<String>,
}

#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
pub struct ProverResponse {
    pub valid: bool,
    pub new_state_root: Option<H256>,
    pub error: Option<String>,
}

/// Inputs a client needs to verify one batch.
#[derive(Debug, Clone)]
pub struct VerifyInputs {
    pub batch_number: BatchNumber,
    pub state_root: H256,
    pub witness: Vec<u8>,
    pub coinbase: Address,
    pub old_acc_input_hash: H256,
    pub timestamp_limit: u64,
    pub forced_l1_block_hash: Option<H256>,
}

#[async_trait]
pub trait ProverClient: 'static + fmt::Debug + Send + Sync {
    async fn verify(&self, inputs: &VerifyInputs) -> anyhow::Result<ProverResponse>;
}

/// Round-robins verification requests over the configured executor URLs.
#[derive(Debug)]
pub struct HttpProverClient {
    urls: Vec<String>,
    next_url: AtomicUsize,
    client: reqwest::Client,
}

impl HttpProverClient {
    pub fn new(urls: Vec<String>) -> anyhow::Result<Self> {
        anyhow::ensure!(!urls.is_empty(), "at least one executor URL is required");
        Ok(Self {
            urls,
            next_url: AtomicUsize::new(0),
            client: reqwest::Client::new(),
        })
    }

    fn pick_url(&self) -> &str {
        let index = self.next_url.fetch_add(1, Ordering::Relaxed);
        &self.urls[index % self.urls.len()]
    }
}

#[async_trait]
impl ProverClient for HttpProverClient {
    async fn verify(&self, inputs: &VerifyInputs) -> anyhow::Result<ProverResponse> {
        let payload = ProverPayload {
            witness: format!("0x{}", hex::encode(&inputs.witness)),
            coinbase: format!("{:?}", inputs.coinbase),
            old_acc_input_hash: format!("{:?}", inputs.old_acc_input_hash),
            timestamp_limit: inputs.timestamp_limit,
            forced_l1_block_hash: inputs.forced_l1_block_hash.map(|hash| format!("{hash:?}")),
        };
        let url = self.pick_url();
        let response = self
            .client
            .post(url)
            .json(&payload)
            .send()
            .await?
            .error_for_status()?;
        Ok(response.json().await?)
    }
}

/// Re-derives the batch's final state root from the sealed blocks in the
/// store and compares it with the submitted one. A stand-in for a remote
/// executor in single-process deployments and tests.
#[derive(Debug)]
pub struct LocalShadowVerifier {
    pool: ConnectionPool,
}

impl LocalShadowVerifier {
    pub fn new(pool: ConnectionPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl ProverClient for LocalShadowVerifier {
    async fn verify(&self, inputs: &VerifyInputs) -> anyhow::Result<ProverResponse> {
        let mut storage = self.pool.connection_tagged("shadow_verifier").await?;
        let Some(last_block) = storage
            .blocks_dal()
            .highest_block_in_batch(inputs.batch_number)
            .await?
        else {
            return Ok(ProverResponse {
                valid: false,
                new_state_root: None,
                error: Some(format!("batch {} has no sealed blocks", inputs.batch_number)),
            });
        };
        let Some(sealed) = storage.blocks_dal().get_sealed_block(last_block).await? else {
            return Ok(ProverResponse {
                valid: false,
                new_state_root: None,
                error: Some(format!("block {last_block} is not sealed")),
            });
        };
        let valid = sealed.header.state_root == inputs.state_root;
        Ok(ProverResponse {
            valid,
            new_state_root: Some(sealed.header.state_root),
            error: (!valid).then(|| "state root mismatch against sealed blocks".to_string()),
        })
    }
}
