//! The bridge itself: a dispatcher task fans requests out to the prover
//! client under a concurrency cap; responses land in an ordered buffer that
//! `poll` drains strictly by batch number, so batch N is never acted on
//! before N−1.

use std::{
    collections::{BTreeMap, HashMap},
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc, Mutex,
    },
    time::Duration,
};

use cdk_basic_types::{BatchNumber, ForkId, L2BlockNumber, H256};
use cdk_config::ExecutorConfig;
use tokio::{
    sync::{mpsc, Semaphore},
    task::JoinHandle,
};

use crate::{
    client::{ProverClient, VerifyInputs},
    metrics::METRICS,
};

/// Everything the sequencer submits for one sealed batch.
#[derive(Debug, Clone)]
pub struct VerificationRequest {
    pub batch_number: BatchNumber,
    pub fork_id: ForkId,
    pub state_root: H256,
    pub counters: HashMap<String, u64>,
    pub blocks: Vec<L2BlockNumber>,
    pub witness: Vec<u8>,
    pub coinbase: cdk_basic_types::Address,
    pub old_acc_input_hash: H256,
    pub timestamp_limit: u64,
    pub forced_l1_block_hash: Option<H256>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Verdict {
    Valid,
    Invalid,
    /// Transport failure or timeout; the batch should be resubmitted.
    Errored(String),
}

#[derive(Debug, Clone)]
pub struct VerificationOutcome {
    pub request: VerificationRequest,
    pub verdict: Verdict,
    pub state_root_observed: Option<H256>,
}

#[derive(Debug)]
pub struct VerifierBridge {
    sender: mpsc::UnboundedSender<(u64, VerificationRequest)>,
    results: Arc<Mutex<BTreeMap<u64, VerificationOutcome>>>,
    generation: Arc<AtomicU64>,
    /// Next batch number `poll` may release.
    next_expected: Option<BatchNumber>,
    _dispatcher: JoinHandle<()>,
}

impl VerifierBridge {
    pub fn new(client: Arc<dyn ProverClient>, config: &ExecutorConfig) -> Self {
        let (sender, receiver) = mpsc::unbounded_channel();
        let results = Arc::new(Mutex::new(BTreeMap::new()));
        let generation = Arc::new(AtomicU64::new(0));
        let dispatcher = tokio::spawn(dispatch_loop(
            client,
            receiver,
            Arc::clone(&results),
            Arc::clone(&generation),
            config.request_timeout(),
            config.executor_max_concurrent_requests as usize,
        ));
        Self {
            sender,
            results,
            generation,
            next_expected: None,
            _dispatcher: dispatcher,
        }
    }

    /// Enqueues a verification without blocking the caller. Resubmitting an
    /// already-drained batch (after a transport error) rewinds the release
    /// cursor so ordering still holds.
    pub fn start_async(&mut self, request: VerificationRequest) {
        self.next_expected = Some(match self.next_expected {
            Some(expected) => expected.min(request.batch_number),
            None => request.batch_number,
        });
        METRICS.requests_submitted.inc();
        let generation = self.generation.load(Ordering::SeqCst);
        // The dispatcher only dies at shutdown; a send failure then is moot.
        let _ = self.sender.send((generation, request));
    }

    /// Completed outcomes in strict batch order. An outcome for batch N+1
    /// stays buffered until N has been drained.
    pub fn poll(&mut self) -> Vec<VerificationOutcome> {
        let mut drained = Vec::new();
        let mut results = self.results.lock().expect("verifier results lock is poisoned");
        while let Some(expected) = self.next_expected {
            match results.remove(&expected.0) {
                Some(outcome) => {
                    self.next_expected = Some(expected.next());
                    drained.push(outcome);
                }
                None => break,
            }
        }
        drained
    }

    /// Drops every in-flight request and discards any buffered response.
    pub fn cancel_all(&mut self) {
        self.generation.fetch_add(1, Ordering::SeqCst);
        self.results
            .lock()
            .expect("verifier results lock is poisoned")
            .clear();
        self.next_expected = None;
        METRICS.cancellations.inc();
        tracing::info!("cancelled all in-flight verification requests");
    }

    pub fn has_pending(&self) -> bool {
        self.next_expected.is_some()
    }
}

async fn dispatch_loop(
    client: Arc<dyn ProverClient>,
    mut receiver: mpsc::UnboundedReceiver<(u64, VerificationRequest)>,
    results: Arc<Mutex<BTreeMap<u64, VerificationOutcome>>>,
    generation: Arc<AtomicU64>,
    timeout: Duration,
    max_concurrent: usize,
) {
    let semaphore = Arc::new(Semaphore::new(max_concurrent.max(1)));
    while let Some((request_generation, request)) = receiver.recv().await {
        if generation.load(Ordering::SeqCst) != request_generation {
            tracing::debug!(
                batch = %request.batch_number,
                "dropping a verification request from a cancelled generation"
            );
            continue;
        }
        let permit = Arc::clone(&semaphore)
            .acquire_owned()
            .await
            .expect("verifier semaphore closed");
        let client = Arc::clone(&client);
        let results = Arc::clone(&results);
        let generation = Arc::clone(&generation);
        tokio::spawn(async move {
            let _permit = permit;
            let inputs = VerifyInputs {
                batch_number: request.batch_number,
                state_root: request.state_root,
                witness: request.witness.clone(),
                coinbase: request.coinbase,
                old_acc_input_hash: request.old_acc_input_hash,
                timestamp_limit: request.timestamp_limit,
                forced_l1_block_hash: request.forced_l1_block_hash,
            };

            let verdict = match tokio::time::timeout(timeout, client.verify(&inputs)).await {
                Ok(Ok(response)) if response.valid => (Verdict::Valid, response.new_state_root),
                Ok(Ok(response)) => {
                    tracing::warn!(
                        batch = %request.batch_number,
                        error = ?response.error,
                        "prover rejected the batch"
                    );
                    (Verdict::Invalid, response.new_state_root)
                }
                Ok(Err(err)) => (Verdict::Errored(err.to_string()), None),
                Err(_) => (Verdict::Errored("verification timed out".to_string()), None),
            };

            // A cancellation may have raced the verification; stale results
            // must not resurface.
            if generation.load(Ordering::SeqCst) != request_generation {
                return;
            }
            METRICS.responses_received.inc();
            let batch = request.batch_number.0;
            let outcome = VerificationOutcome {
                request,
                verdict: verdict.0,
                state_root_observed: verdict.1,
            };
            results
                .lock()
                .expect("verifier results lock is poisoned")
                .insert(batch, outcome);
        });
    }
}
