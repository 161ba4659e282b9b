//! Scenario tests for the sequencer loop, driven through the paused tokio
//! clock.

use std::{
    sync::{Arc, Mutex},
    time::Duration,
};

use async_trait::async_trait;
use cdk_basic_types::{
    Address, BatchNumber, ForkId, L1BlockNumber, L1InfoTreeIndex, L2BlockNumber, H256, U256,
};
use cdk_config::{ExecutorConfig, SequencerConfig};
use cdk_dal::{ConnectionPool, CoreDal};
use cdk_datastream::{Entry, StreamReader, StreamWriter};
use cdk_mempool::MempoolGuard;
use cdk_types::{
    batch_l2_data, l1_events::InjectedBatchRecord, transaction::TransactionRequest, Batch,
    L1InfoTreeUpdate, Transaction,
};
use cdk_verifier::{ProverClient, ProverResponse, VerifierBridge};
use secp256k1::SecretKey;
use tempfile::TempDir;
use tokio::sync::watch;

use super::{
    keeper::{KeeperMode, StateKeeper, EXECUTION_STAGE},
    TokioClock,
};

const BASE_TIMESTAMP: u64 = 1_700_000_000;
const CHAIN_ID: u64 = 1001;

fn secret() -> SecretKey {
    SecretKey::from_slice(&[0x42; 32]).unwrap()
}

fn sender() -> Address {
    Transaction::sign(
        TransactionRequest {
            gas: 21_000,
            ..TransactionRequest::default()
        },
        CHAIN_ID,
        &secret(),
    )
    .from
}

fn transfer(nonce: u64, data_len: usize) -> Transaction {
    Transaction::sign(
        TransactionRequest {
            nonce,
            gas_price: U256::from(1_000u64),
            gas: 21_000 + 16 * data_len as u64 * 2,
            to: Some(Address::repeat_byte(0x99)),
            value: U256::from(1u64),
            data: vec![0xdd; data_len],
            effective_gas_price_pct: 255,
        },
        CHAIN_ID,
        &secret(),
    )
}

/// Prover stub: rejects each configured batch on its first submission and
/// accepts everything afterwards, so a re-closed batch verifies clean.
#[derive(Debug, Default)]
struct RejectingProver {
    reject_once: Mutex<Vec<u64>>,
}

#[async_trait]
impl ProverClient for RejectingProver {
    async fn verify(
        &self,
        inputs: &cdk_verifier::VerifyInputs,
    ) -> anyhow::Result<ProverResponse> {
        let mut pending = self.reject_once.lock().unwrap();
        let valid = match pending
            .iter()
            .position(|batch| *batch == inputs.batch_number.0)
        {
            Some(index) => {
                pending.remove(index);
                false
            }
            None => true,
        };
        Ok(ProverResponse {
            valid,
            new_state_root: Some(inputs.state_root),
            error: (!valid).then(|| "rejected by test prover".to_string()),
        })
    }
}

struct Tester {
    pool: ConnectionPool,
    mempool: MempoolGuard,
    dir: TempDir,
    config_tx: watch::Sender<SequencerConfig>,
}

struct RunningKeeper {
    handle: tokio::task::JoinHandle<anyhow::Result<()>>,
    stop_tx: watch::Sender<bool>,
}

impl RunningKeeper {
    async fn stop(self) -> anyhow::Result<()> {
        self.stop_tx.send_replace(true);
        self.handle.await.expect("keeper panicked")
    }
}

impl Tester {
    fn new(config: SequencerConfig) -> Self {
        let (config_tx, _) = watch::channel(config);
        Self {
            pool: ConnectionPool::new_in_memory(),
            mempool: MempoolGuard::new(),
            dir: TempDir::new().expect("tempdir"),
            config_tx,
        }
    }

    fn stream_path(&self) -> std::path::PathBuf {
        self.dir.path().join("stream.bin")
    }

    fn build_keeper(
        &self,
        mode: KeeperMode,
        limbo_enabled: bool,
        prover: Arc<dyn ProverClient>,
    ) -> StateKeeper {
        let stream = StreamWriter::open(&self.stream_path()).expect("stream");
        let bridge = VerifierBridge::new(prover, &ExecutorConfig::for_tests());
        StateKeeper::new(
            self.pool.clone(),
            Arc::new(self.mempool.clone()),
            bridge,
            stream,
            Arc::new(TokioClock::starting_at(BASE_TIMESTAMP)),
            self.config_tx.subscribe(),
            mode,
            limbo_enabled,
        )
    }

    fn spawn(&self, keeper: StateKeeper) -> RunningKeeper {
        let (stop_tx, stop_rx) = watch::channel(false);
        let handle = tokio::spawn(keeper.run(stop_rx));
        RunningKeeper { handle, stop_tx }
    }

    fn fund(&self, keeper: &mut StateKeeper, address: Address) {
        keeper
            .state_mut()
            .set_balance(address, U256::from(10u64).pow(U256::from(20u8)));
        keeper.state_mut().commit();
    }

    async fn seed_info_tree_update(&self, index: u64, timestamp: u64) {
        let update = L1InfoTreeUpdate {
            index: L1InfoTreeIndex(index),
            ger: H256::repeat_byte(0xe9),
            mainnet_exit_root: H256::repeat_byte(1),
            rollup_exit_root: H256::repeat_byte(2),
            parent_hash: H256::repeat_byte(3),
            timestamp,
            l1_block_number: L1BlockNumber(100),
        };
        let mut storage = self.pool.connection().await.unwrap();
        storage
            .l1_info_dal()
            .write_l1_info_tree_update(&update, H256::repeat_byte(4))
            .await
            .unwrap();
        storage.commit().await.unwrap();
    }
}

fn config_with_timers(block_ms: u64, batch_ms: u64, fork: u16) -> SequencerConfig {
    SequencerConfig {
        genesis_fork_id: fork,
        block_seal_time_ms: block_ms,
        batch_seal_time_ms: batch_ms,
        non_empty_batch_seal_time_ms: batch_ms,
        mempool_empty_backoff_ms: 50,
        ..SequencerConfig::for_tests()
    }
}

fn stream_entries(path: &std::path::Path) -> Vec<Entry> {
    let mut reader = StreamReader::open(path).expect("reader");
    let mut entries = Vec::new();
    while let Some((_, entry)) = reader.next_entry().expect("entry") {
        entries.push(entry);
    }
    entries
}

#[tokio::test(start_paused = true)]
async fn empty_batch_seals_on_timers() {
    let tester = Tester::new(config_with_timers(2_000, 6_000, 7));
    let keeper = tester.build_keeper(
        KeeperMode::Normal,
        false,
        Arc::new(RejectingProver::default()),
    );
    let running = tester.spawn(keeper);

    tokio::time::sleep(Duration::from_millis(6_500)).await;
    running.stop().await.unwrap();

    let mut storage = tester.pool.connection().await.unwrap();
    assert!(storage.batches_dal().highest_seen_batch().await.unwrap() >= BatchNumber(1));
    let blocks = storage
        .blocks_dal()
        .blocks_of_batch(BatchNumber(1))
        .await
        .unwrap();
    assert_eq!(
        blocks,
        vec![L2BlockNumber(1), L2BlockNumber(2), L2BlockNumber(3)]
    );

    // Empty blocks, two seconds apart.
    let mut timestamps = Vec::new();
    for block in blocks {
        let sealed = storage
            .blocks_dal()
            .get_sealed_block(block)
            .await
            .unwrap()
            .unwrap();
        assert!(sealed.transactions.is_empty());
        timestamps.push(sealed.header.timestamp);
    }
    assert_eq!(timestamps[1] - timestamps[0], 2);
    assert_eq!(timestamps[2] - timestamps[1], 2);

    // The stream brackets batch 1 with a start and an end.
    let entries = stream_entries(&tester.stream_path());
    assert!(entries
        .iter()
        .any(|entry| matches!(entry, Entry::BatchStart(batch) if batch.batch_number == 1)));
    assert!(entries
        .iter()
        .any(|entry| matches!(entry, Entry::BatchEnd(batch) if batch.batch_number == 1)));
}

#[tokio::test(start_paused = true)]
async fn solitary_overflowing_tx_is_discarded() {
    let tester = Tester::new(config_with_timers(2_000, 6_000, 9));
    let mut keeper = tester.build_keeper(
        KeeperMode::Normal,
        false,
        Arc::new(RejectingProver::default()),
    );
    tester.fund(&mut keeper, sender());

    // Its L2-data footprint alone exceeds the batch byte budget.
    let fat_tx = transfer(0, 130_000);
    let fat_hash = fat_tx.hash();
    tester.mempool.insert(fat_tx);

    let running = tester.spawn(keeper);
    tokio::time::sleep(Duration::from_millis(3_000)).await;
    running.stop().await.unwrap();

    assert!(tester.mempool.is_discarded(fat_hash));

    // The batch sealed without the transaction.
    let entries = stream_entries(&tester.stream_path());
    assert!(entries
        .iter()
        .any(|entry| matches!(entry, Entry::BatchEnd(batch) if batch.batch_number == 1)));
    assert!(!entries.iter().any(|entry| matches!(entry, Entry::L2Tx(_))));
}

#[tokio::test(start_paused = true)]
async fn transactions_flow_into_sealed_blocks() {
    let tester = Tester::new(config_with_timers(500, 4_000, 9));
    let mut keeper = tester.build_keeper(
        KeeperMode::Normal,
        false,
        Arc::new(RejectingProver::default()),
    );
    tester.fund(&mut keeper, sender());
    for nonce in 0..3 {
        tester.mempool.insert(transfer(nonce, 0));
    }

    let running = tester.spawn(keeper);
    tokio::time::sleep(Duration::from_millis(4_500)).await;
    running.stop().await.unwrap();

    let mut storage = tester.pool.connection().await.unwrap();
    let block = storage
        .blocks_dal()
        .get_sealed_block(L2BlockNumber(1))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(block.transactions.len(), 3);
    // Nonce order within the sender survived the yield.
    let nonces: Vec<u64> = block.transactions.iter().map(|tx| tx.nonce).collect();
    assert_eq!(nonces, vec![0, 1, 2]);
    assert!(block.header.block_info_root.is_some());

    // Effective gas price percentages are persisted per tx.
    for tx in &block.transactions {
        assert_eq!(
            storage
                .blocks_dal()
                .get_effective_gas_price_pct(tx.hash())
                .await
                .unwrap(),
            Some(255)
        );
    }
}

#[tokio::test(start_paused = true)]
async fn bad_recovery_batch_is_marked_invalid() {
    let tester = Tester::new(config_with_timers(2_000, 6_000, 9));

    // A downloaded batch whose replayed timestamps overshoot the L1 ceiling.
    {
        let mut storage = tester.pool.connection().await.unwrap();
        storage
            .forks_dal()
            .write_fork(ForkId(9), BatchNumber(1))
            .await
            .unwrap();
        let blocks = vec![
            batch_l2_data::L2DataBlock {
                delta_timestamp: 100,
                l1_info_tree_index: L1InfoTreeIndex::UNUSED,
                transactions: vec![],
            },
            batch_l2_data::L2DataBlock {
                delta_timestamp: 100,
                l1_info_tree_index: L1InfoTreeIndex::UNUSED,
                transactions: vec![],
            },
        ];
        let mut batch = Batch::open(BatchNumber(1), ForkId(9));
        batch.l2_data = batch_l2_data::encode(&blocks);
        storage.batches_dal().write_batch(&batch).await.unwrap();
        storage
            .l1_info_dal()
            .write_sequenced_batch(&cdk_types::l1_events::SequencedBatch {
                batch_number: BatchNumber(1),
                l1_block_number: L1BlockNumber(10),
                l1_tx_hash: H256::repeat_byte(1),
                state_root: None,
                l1_info_root: None,
                timestamp_limit: Some(50),
            })
            .await
            .unwrap();
        storage.commit().await.unwrap();
    }

    let keeper = tester.build_keeper(
        KeeperMode::L1Recovery,
        false,
        Arc::new(RejectingProver::default()),
    );
    let (_, stop_rx) = watch::channel(false);
    // Recovery runs to completion on its own.
    keeper.run(stop_rx).await.unwrap();

    let mut storage = tester.pool.connection().await.unwrap();
    assert!(storage
        .batches_dal()
        .is_invalid_batch(BatchNumber(1))
        .await
        .unwrap());
    assert_eq!(
        storage
            .batches_dal()
            .get_batch_counters(L2BlockNumber(2))
            .await
            .unwrap(),
        Some(Default::default())
    );
    assert_eq!(
        storage.batches_dal().highest_seen_batch().await.unwrap(),
        BatchNumber(1)
    );
    // No block was executed.
    assert!(storage
        .blocks_dal()
        .blocks_of_batch(BatchNumber(1))
        .await
        .unwrap()
        .is_empty());
}

#[tokio::test(start_paused = true)]
async fn recovery_replays_downloaded_batches_verbatim() {
    let tester = Tester::new(config_with_timers(2_000, 6_000, 9));
    {
        let mut storage = tester.pool.connection().await.unwrap();
        storage
            .forks_dal()
            .write_fork(ForkId(9), BatchNumber(1))
            .await
            .unwrap();
        let blocks = vec![batch_l2_data::L2DataBlock {
            delta_timestamp: 7,
            l1_info_tree_index: L1InfoTreeIndex::UNUSED,
            transactions: vec![],
        }];
        let mut batch = Batch::open(BatchNumber(1), ForkId(9));
        batch.l2_data = batch_l2_data::encode(&blocks);
        storage.batches_dal().write_batch(&batch).await.unwrap();
        storage.commit().await.unwrap();
    }

    let keeper = tester.build_keeper(
        KeeperMode::L1Recovery,
        false,
        Arc::new(RejectingProver::default()),
    );
    let (_, stop_rx) = watch::channel(false);
    keeper.run(stop_rx).await.unwrap();

    let mut storage = tester.pool.connection().await.unwrap();
    let sealed = storage
        .blocks_dal()
        .get_sealed_block(L2BlockNumber(1))
        .await
        .unwrap()
        .unwrap();
    // The forced delta reproduces the historical timestamp exactly.
    assert_eq!(sealed.header.timestamp, 7);
    assert_eq!(
        storage
            .blocks_dal()
            .batch_of_block(L2BlockNumber(1))
            .await
            .unwrap(),
        Some(BatchNumber(1))
    );
}

#[tokio::test(start_paused = true)]
async fn verifier_rejection_unwinds_to_the_parent_block() {
    let tester = Tester::new(config_with_timers(2_000, 6_000, 9));
    let keeper = tester.build_keeper(
        KeeperMode::Normal,
        false,
        Arc::new(RejectingProver { reject_once: Mutex::new(vec![1]) }),
    );
    let running = tester.spawn(keeper);

    // Batch 1 seals at 6s with blocks [1, 2, 3]; the rejection unwinds
    // block 3, which a follow-up batch then re-produces.
    tokio::time::sleep(Duration::from_millis(15_000)).await;
    running.stop().await.unwrap();

    let mut storage = tester.pool.connection().await.unwrap();
    assert_eq!(
        storage
            .blocks_dal()
            .highest_block_in_batch(BatchNumber(1))
            .await
            .unwrap(),
        Some(L2BlockNumber(2))
    );
    // Block 3 was re-produced under the follow-up batch.
    assert_eq!(
        storage
            .blocks_dal()
            .batch_of_block(L2BlockNumber(3))
            .await
            .unwrap(),
        Some(BatchNumber(2))
    );

    // The datastream was truncated before the state store: its view of
    // batch 1 also ends at block 2.
    let entries = stream_entries(&tester.stream_path());
    let batch1_blocks: Vec<u64> = entries
        .iter()
        .filter_map(|entry| match entry {
            Entry::L2BlockStart(block) if block.batch_number == 1 => Some(block.block_number),
            _ => None,
        })
        .collect();
    assert_eq!(batch1_blocks, vec![1, 2]);
}

#[tokio::test(start_paused = true)]
async fn rejected_batch_goes_to_limbo_when_enabled() {
    let tester = Tester::new(config_with_timers(2_000, 4_000, 9));
    let keeper = tester.build_keeper(
        KeeperMode::Normal,
        true,
        Arc::new(RejectingProver { reject_once: Mutex::new(vec![1]) }),
    );
    let running = tester.spawn(keeper);

    tokio::time::sleep(Duration::from_millis(7_000)).await;
    running.stop().await.unwrap();

    let mut storage = tester.pool.connection().await.unwrap();
    assert!(storage
        .batches_dal()
        .get_limbo_batch(BatchNumber(1))
        .await
        .unwrap()
        .is_some());
    // No unwind happened: batch 1 kept its blocks.
    assert_eq!(
        storage
            .blocks_dal()
            .highest_block_in_batch(BatchNumber(1))
            .await
            .unwrap(),
        Some(L2BlockNumber(2))
    );
}

#[tokio::test(start_paused = true)]
async fn future_info_tree_index_is_reused_as_zero() {
    let tester = Tester::new(config_with_timers(2_000, 4_000, 9));
    // The only update sits far in this chain's future.
    tester
        .seed_info_tree_update(1, BASE_TIMESTAMP + 1_000_000)
        .await;

    let keeper = tester.build_keeper(
        KeeperMode::Normal,
        false,
        Arc::new(RejectingProver::default()),
    );
    let running = tester.spawn(keeper);
    tokio::time::sleep(Duration::from_millis(2_500)).await;
    running.stop().await.unwrap();

    let mut storage = tester.pool.connection().await.unwrap();
    assert_eq!(
        storage
            .blocks_dal()
            .get_block_l1_info_tree_index(L2BlockNumber(1))
            .await
            .unwrap(),
        Some(L1InfoTreeIndex::UNUSED)
    );
    assert!(storage
        .blocks_dal()
        .is_reused_l1_info_tree_index(L2BlockNumber(1))
        .await
        .unwrap());
    // The GER stays visible in the store and on the stream.
    assert!(storage
        .blocks_dal()
        .get_block_global_exit_root(L2BlockNumber(1))
        .await
        .unwrap()
        .is_some());
    let entries = stream_entries(&tester.stream_path());
    assert!(entries
        .iter()
        .any(|entry| matches!(entry, Entry::GerUpdate(_))));
}

#[tokio::test(start_paused = true)]
async fn usable_info_tree_index_is_consumed() {
    let tester = Tester::new(config_with_timers(2_000, 4_000, 9));
    tester.seed_info_tree_update(1, BASE_TIMESTAMP - 10).await;

    let keeper = tester.build_keeper(
        KeeperMode::Normal,
        false,
        Arc::new(RejectingProver::default()),
    );
    let running = tester.spawn(keeper);
    tokio::time::sleep(Duration::from_millis(2_500)).await;
    running.stop().await.unwrap();

    let mut storage = tester.pool.connection().await.unwrap();
    assert_eq!(
        storage
            .blocks_dal()
            .get_block_l1_info_tree_index(L2BlockNumber(1))
            .await
            .unwrap(),
        Some(L1InfoTreeIndex(1))
    );
    assert!(!storage
        .blocks_dal()
        .is_reused_l1_info_tree_index(L2BlockNumber(1))
        .await
        .unwrap());
}

#[tokio::test(start_paused = true)]
async fn injected_batch_seeds_the_chain() {
    let tester = Tester::new(config_with_timers(2_000, 6_000, 9));
    let coinbase = Address::repeat_byte(0x77);
    let seed_tx = Transaction::sign(
        TransactionRequest {
            nonce: 0,
            gas_price: U256::zero(),
            gas: 21_000,
            to: Some(Address::repeat_byte(0x88)),
            value: U256::zero(),
            data: vec![],
            effective_gas_price_pct: 255,
        },
        CHAIN_ID,
        &secret(),
    );
    {
        let mut storage = tester.pool.connection().await.unwrap();
        storage
            .l1_info_dal()
            .write_injected_batch(&InjectedBatchRecord {
                l1_block_number: L1BlockNumber(5),
                l1_block_hash: H256::repeat_byte(0x55),
                timestamp: BASE_TIMESTAMP - 3_600,
                sequencer: coinbase,
                transaction: seed_tx.rlp_bytes(),
            })
            .await
            .unwrap();
        storage.commit().await.unwrap();
    }

    let keeper = tester.build_keeper(
        KeeperMode::Normal,
        false,
        Arc::new(RejectingProver::default()),
    );
    let running = tester.spawn(keeper);
    tokio::time::sleep(Duration::from_millis(500)).await;
    running.stop().await.unwrap();

    let mut storage = tester.pool.connection().await.unwrap();
    assert!(storage.batches_dal().highest_seen_batch().await.unwrap() >= BatchNumber(1));
    let blocks = storage
        .blocks_dal()
        .blocks_of_batch(BatchNumber(1))
        .await
        .unwrap();
    assert_eq!(blocks, vec![L2BlockNumber(1)]);
    let sealed = storage
        .blocks_dal()
        .get_sealed_block(L2BlockNumber(1))
        .await
        .unwrap()
        .unwrap();
    // L1 dictates the genesis timestamp and coinbase.
    assert_eq!(sealed.header.timestamp, BASE_TIMESTAMP - 3_600);
    assert_eq!(sealed.header.coinbase, coinbase);
    assert_eq!(sealed.transactions.len(), 1);
    let batch = storage
        .batches_dal()
        .get_batch(BatchNumber(1))
        .await
        .unwrap()
        .unwrap();
    assert!(batch.is_closed);
}

#[tokio::test(start_paused = true)]
async fn crash_between_state_and_stream_is_healed_at_boot() {
    let tester = Tester::new(config_with_timers(2_000, 4_000, 9));

    // First life: seal a couple of blocks.
    let keeper = tester.build_keeper(
        KeeperMode::Normal,
        false,
        Arc::new(RejectingProver::default()),
    );
    let running = tester.spawn(keeper);
    tokio::time::sleep(Duration::from_millis(4_500)).await;
    running.stop().await.unwrap();

    let exec_before = {
        let mut storage = tester.pool.connection().await.unwrap();
        storage
            .sync_dal()
            .get_stage_progress(EXECUTION_STAGE)
            .await
            .unwrap()
            .unwrap()
    };

    // Simulate the crash: the stream lost its tail block.
    {
        let mut stream = StreamWriter::open(&tester.stream_path()).unwrap();
        stream.unwind_to_block(exec_before.0).unwrap();
    }

    // Second life: alignment unwinds the state down to the stream.
    let keeper = tester.build_keeper(
        KeeperMode::Normal,
        false,
        Arc::new(RejectingProver::default()),
    );
    let running = tester.spawn(keeper);
    tokio::time::sleep(Duration::from_millis(100)).await;
    running.stop().await.unwrap();

    let mut storage = tester.pool.connection().await.unwrap();
    let exec_after = storage
        .sync_dal()
        .get_stage_progress(EXECUTION_STAGE)
        .await
        .unwrap()
        .unwrap();
    assert!(exec_after < exec_before);
}
