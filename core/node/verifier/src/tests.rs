use std::{
    collections::HashMap,
    sync::{Arc, Mutex},
    time::Duration,
};

use async_trait::async_trait;
use cdk_basic_types::{Address, BatchNumber, ForkId, L2BlockNumber, H256};
use cdk_config::ExecutorConfig;

use super::{client::VerifyInputs, *};

/// Programmable prover: per-batch verdicts and delays.
#[derive(Debug, Default)]
struct StubProver {
    invalid: Mutex<Vec<u64>>,
    delays: Mutex<HashMap<u64, Duration>>,
    hang: Mutex<Vec<u64>>,
}

impl StubProver {
    fn mark_invalid(&self, batch: u64) {
        self.invalid.lock().unwrap().push(batch);
    }

    fn delay(&self, batch: u64, delay: Duration) {
        self.delays.lock().unwrap().insert(batch, delay);
    }

    fn hang(&self, batch: u64) {
        self.hang.lock().unwrap().push(batch);
    }
}

#[async_trait]
impl ProverClient for StubProver {
    async fn verify(&self, inputs: &VerifyInputs) -> anyhow::Result<ProverResponse> {
        let batch = inputs.batch_number.0;
        if self.hang.lock().unwrap().contains(&batch) {
            tokio::time::sleep(Duration::from_secs(3_600)).await;
        }
        let delay = self.delays.lock().unwrap().get(&batch).copied();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        let valid = !self.invalid.lock().unwrap().contains(&batch);
        Ok(ProverResponse {
            valid,
            new_state_root: Some(inputs.state_root),
            error: (!valid).then(|| "verification failed".to_string()),
        })
    }
}

fn request(batch: u64) -> VerificationRequest {
    VerificationRequest {
        batch_number: BatchNumber(batch),
        fork_id: ForkId(9),
        state_root: H256::repeat_byte(batch as u8),
        counters: HashMap::new(),
        blocks: vec![L2BlockNumber(batch * 10)],
        witness: vec![0xab; 8],
        coinbase: Address::repeat_byte(0x42),
        old_acc_input_hash: H256::zero(),
        timestamp_limit: 1_700_000_000,
        forced_l1_block_hash: None,
    }
}

async fn drain(bridge: &mut VerifierBridge, expected: usize) -> Vec<VerificationOutcome> {
    let mut outcomes = Vec::new();
    for _ in 0..500 {
        outcomes.extend(bridge.poll());
        if outcomes.len() >= expected {
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    outcomes
}

#[tokio::test]
async fn responses_arrive_in_batch_order() {
    let prover = Arc::new(StubProver::default());
    // Batch 1 is slower than batch 2.
    prover.delay(1, Duration::from_millis(150));
    let mut bridge = VerifierBridge::new(prover, &ExecutorConfig::for_tests());

    bridge.start_async(request(1));
    bridge.start_async(request(2));

    let outcomes = drain(&mut bridge, 2).await;
    assert_eq!(outcomes.len(), 2);
    assert_eq!(outcomes[0].request.batch_number, BatchNumber(1));
    assert_eq!(outcomes[1].request.batch_number, BatchNumber(2));
    assert_eq!(outcomes[0].verdict, Verdict::Valid);
}

#[tokio::test]
async fn later_batch_is_held_until_the_earlier_one_finishes() {
    let prover = Arc::new(StubProver::default());
    prover.hang(1);
    let mut bridge = VerifierBridge::new(prover, &ExecutorConfig::for_tests());

    bridge.start_async(request(1));
    bridge.start_async(request(2));

    tokio::time::sleep(Duration::from_millis(100)).await;
    // Batch 2 is done, but batch 1 is not; nothing may surface.
    assert!(bridge.poll().is_empty());
}

#[tokio::test]
async fn invalid_batches_surface_as_invalid() {
    let prover = Arc::new(StubProver::default());
    prover.mark_invalid(1);
    let mut bridge = VerifierBridge::new(prover, &ExecutorConfig::for_tests());

    bridge.start_async(request(1));
    let outcomes = drain(&mut bridge, 1).await;
    assert_eq!(outcomes[0].verdict, Verdict::Invalid);
}

#[tokio::test]
async fn timeouts_surface_as_errors() {
    let prover = Arc::new(StubProver::default());
    prover.hang(1);
    let mut config = ExecutorConfig::for_tests();
    config.executor_request_timeout_ms = 50;
    let mut bridge = VerifierBridge::new(prover, &config);

    bridge.start_async(request(1));
    let outcomes = drain(&mut bridge, 1).await;
    assert!(matches!(outcomes[0].verdict, Verdict::Errored(_)));
}

#[tokio::test]
async fn cancel_all_discards_everything() {
    let prover = Arc::new(StubProver::default());
    prover.delay(1, Duration::from_millis(100));
    let mut bridge = VerifierBridge::new(prover, &ExecutorConfig::for_tests());

    bridge.start_async(request(1));
    bridge.cancel_all();
    assert!(!bridge.has_pending());

    // Even after the stale verification completes, nothing surfaces.
    tokio::time::sleep(Duration::from_millis(200)).await;
    assert!(bridge.poll().is_empty());

    // A fresh generation works normally.
    bridge.start_async(request(5));
    let outcomes = drain(&mut bridge, 1).await;
    assert_eq!(outcomes[0].request.batch_number, BatchNumber(5));
}
