//! The keeper: boot, alignment against the datastream, injected genesis,
//! batch/block production, verification drain and unwind.

use std::{
    collections::{BTreeMap, HashMap, HashSet},
    sync::Arc,
    time::Duration,
};

use anyhow::Context as _;
use cdk_basic_types::{
    conversions::u256_to_h256, Address, BatchNumber, ForkId, L1InfoTreeIndex, L2BlockNumber, H256,
    U256,
};
use cdk_config::SequencerConfig;
use cdk_counters::{BatchCounterCollector, TransactionCounter};
use cdk_dal::{ConnectionPool, CoreDal};
use cdk_datastream::{
    BatchEnd, BatchStart, BookmarkKind, Entry, GerUpdate, L2BlockEnd, L2BlockStart, L2Tx,
    StreamWriter,
};
use cdk_info_tree::{BlockInfoTree, BlockPreamble, BlockTxLeaf};
use cdk_mempool::MempoolProvider;
use cdk_types::{
    batch::compute_acc_input_hash, batch_l2_data, block::L2BlockHeader, receipt::receipts_root,
    Batch, SealedL2Block, Transaction, TxReceipt,
};
use cdk_verifier::{VerificationRequest, Verdict, VerifierBridge};
use cdk_vm::{
    apply_transaction, BlockContext, InMemoryState, KeccakCommitment, Snapshot, StateCommitment,
    TxError, TxOutput, VmConfig, GER_MANAGER_ADDRESS,
};
use tokio::sync::watch;

use crate::{
    clock::Clock,
    metrics::METRICS,
    seal_criteria::{resolve, SealData, SealResolution},
};

/// Progress key of the execution stage.
pub const EXECUTION_STAGE: &str = "execution";

/// Base depth of the state tree used for poseidon estimation.
const BASE_SMT_DEPTH: u64 = 32;

/// Storage slot of the local exit root inside the GER manager.
const LER_SLOT: u64 = 1;

/// How the keeper sources transactions and timestamps.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeeperMode {
    /// Mempool-driven production.
    Normal,
    /// Replay of batches decoded from L1 data; counters are unlimited and
    /// timestamps are forced.
    L1Recovery,
    /// Reprocessing of a quarantined transaction under its recorded
    /// timestamp; any failure is a programmer error.
    Limbo,
}

#[derive(Debug)]
struct OpenBatch {
    number: BatchNumber,
    fork_id: ForkId,
    config: SequencerConfig,
    collector: BatchCounterCollector,
    l2_data: Vec<u8>,
    blocks: Vec<L2BlockNumber>,
    txs_in_batch: u64,
    deadline: tokio::time::Instant,
    non_empty_deadline: Option<tokio::time::Instant>,
    start_emitted: bool,
    used_ger: Option<H256>,
    has_info_index: bool,
    timestamp_limit: u64,
    /// 0 = regular, 1 = injected, 2 = recovery replay.
    batch_type: u8,
}

impl OpenBatch {
    fn effective_deadline(&self) -> tokio::time::Instant {
        match self.non_empty_deadline {
            Some(non_empty) => self.deadline.min(non_empty),
            None => self.deadline,
        }
    }
}

/// Inputs of one block about to be produced.
#[derive(Debug)]
struct BlockPlan {
    timestamp: u64,
    info_index: L1InfoTreeIndex,
    ger: Option<H256>,
    l1_block_hash: H256,
    reused_index: bool,
}

#[derive(Debug)]
enum ExecOutcome {
    Executed(Box<TxOutput>),
    /// The tx failed a validity check; mode policy decides what happens.
    Rejected(TxError),
    /// Rolled off after a post-execution counter overflow.
    RolledBack(SealResolution),
    /// Overflowed before execution.
    PreOverflow(SealResolution),
}

#[derive(Debug)]
pub struct StateKeeper {
    pool: ConnectionPool,
    mempool: Arc<dyn MempoolProvider>,
    bridge: VerifierBridge,
    stream: StreamWriter,
    clock: Arc<dyn Clock>,
    config_rx: watch::Receiver<SequencerConfig>,
    mode: KeeperMode,
    limbo_enabled: bool,

    state: InMemoryState,
    committer: KeccakCommitment,
    /// State snapshots taken right after sealing each block; the unwind path
    /// reverts through them.
    block_snapshots: BTreeMap<u64, Snapshot>,

    exec_progress: L2BlockNumber,
    last_block_time: u64,
    last_state_root: H256,
    last_used_l1_index: L1InfoTreeIndex,
}

impl StateKeeper {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        pool: ConnectionPool,
        mempool: Arc<dyn MempoolProvider>,
        bridge: VerifierBridge,
        stream: StreamWriter,
        clock: Arc<dyn Clock>,
        config_rx: watch::Receiver<SequencerConfig>,
        mode: KeeperMode,
        limbo_enabled: bool,
    ) -> Self {
        Self {
            pool,
            mempool,
            bridge,
            stream,
            clock,
            config_rx,
            mode,
            limbo_enabled,
            state: InMemoryState::new(),
            committer: KeccakCommitment,
            block_snapshots: BTreeMap::new(),
            exec_progress: L2BlockNumber(0),
            last_block_time: 0,
            last_state_root: H256::zero(),
            last_used_l1_index: L1InfoTreeIndex::UNUSED,
        }
    }

    /// Mutable access to the execution state, for seeding balances before
    /// the keeper starts.
    pub fn state_mut(&mut self) -> &mut InMemoryState {
        &mut self.state
    }

    pub async fn run(mut self, mut stop_receiver: watch::Receiver<bool>) -> anyhow::Result<()> {
        self.align()
            .await
            .context("failed aligning to the datastream")?;
        self.load_tip().await.context("failed loading the chain tip")?;

        while !*stop_receiver.borrow_and_update() {
            self.handle_verifier_outcomes().await?;

            let config = self.config_rx.borrow().clone();
            let Some(fork_id) = self.resolve_fork(&config).await? else {
                // Fork 0: L1 has not reached finality yet.
                tokio::select! {
                    _ = tokio::time::sleep(Duration::from_millis(500)) => continue,
                    _ = stop_receiver.changed() => break,
                }
            };

            let mut storage = self.pool.connection_tagged("state_keeper").await?;
            let highest_seen = storage.batches_dal().highest_seen_batch().await?;
            if highest_seen == BatchNumber(0) && self.exec_progress == L2BlockNumber(0) {
                if let Some(record) = storage.l1_info_dal().get_injected_batch().await? {
                    drop(storage);
                    self.process_injected_genesis(&config, fork_id, record).await?;
                    continue;
                }
            }
            drop(storage);

            match self.mode {
                KeeperMode::Normal | KeeperMode::Limbo => {
                    self.produce_batch(&config, fork_id, highest_seen.next(), &mut stop_receiver)
                        .await?;
                }
                KeeperMode::L1Recovery => {
                    if !self
                        .replay_next_batch(&config, highest_seen.next())
                        .await?
                    {
                        tracing::info!("L1 recovery caught up with the sequenced batches");
                        return Ok(());
                    }
                }
            }
        }

        tracing::info!("Stop signal received, state_keeper is shutting down");
        Ok(())
    }

    /// The datastream is the authoritative ordering witness: execution
    /// progress ahead of the stream tail is rolled back.
    async fn align(&mut self) -> anyhow::Result<()> {
        let stream_tail = L2BlockNumber(self.stream.highest_block().unwrap_or(0));
        let mut storage = self.pool.connection_tagged("state_keeper").await?;
        let exec_progress = storage
            .sync_dal()
            .get_stage_progress(EXECUTION_STAGE)
            .await?
            .unwrap_or(L2BlockNumber(0));
        if exec_progress > stream_tail {
            tracing::warn!(
                %exec_progress,
                %stream_tail,
                "execution is ahead of the datastream, unwinding state"
            );
            storage.unwind_dal().unwind_to_block(stream_tail).await?;
            storage
                .sync_dal()
                .set_stage_progress(EXECUTION_STAGE, stream_tail)
                .await?;
            storage.commit().await?;
        }
        Ok(())
    }

    async fn load_tip(&mut self) -> anyhow::Result<()> {
        let mut storage = self.pool.connection_tagged("state_keeper").await?;
        self.exec_progress = storage
            .sync_dal()
            .get_stage_progress(EXECUTION_STAGE)
            .await?
            .unwrap_or(L2BlockNumber(0));
        if self.exec_progress == L2BlockNumber(0) {
            return Ok(());
        }
        let tip = storage
            .blocks_dal()
            .get_sealed_block(self.exec_progress)
            .await?
            .with_context(|| format!("sealed block {} is missing", self.exec_progress))?;
        self.last_block_time = tip.header.timestamp;
        self.last_state_root = tip.header.state_root;
        self.last_used_l1_index = tip.header.l1_info_tree_index;
        Ok(())
    }

    async fn resolve_fork(&mut self, config: &SequencerConfig) -> anyhow::Result<Option<ForkId>> {
        let mut storage = self.pool.connection_tagged("state_keeper").await?;
        if let Some(fork) = storage.forks_dal().latest_fork_id().await? {
            return Ok((fork.0 != 0).then_some(fork));
        }
        if self.mode == KeeperMode::Normal && config.genesis_fork_id != 0 {
            let fork = ForkId(config.genesis_fork_id);
            storage.forks_dal().write_fork(fork, BatchNumber(1)).await?;
            storage.commit().await?;
            return Ok(Some(fork));
        }
        Ok(None)
    }

    fn smt_depth(&self, config: &SequencerConfig) -> u64 {
        BASE_SMT_DEPTH * (100 + config.smt_depth_margin_pct as u64) / 100
    }

    fn open_batch(
        &self,
        config: &SequencerConfig,
        fork_id: ForkId,
        number: BatchNumber,
        unlimited: bool,
    ) -> OpenBatch {
        let collector = BatchCounterCollector::start_new_batch(
            fork_id,
            self.smt_depth(config),
            config.virtual_counters_smt_reduction,
            unlimited || config.disable_virtual_counters,
        );
        OpenBatch {
            number,
            fork_id,
            config: config.clone(),
            collector,
            l2_data: Vec::new(),
            blocks: Vec::new(),
            txs_in_batch: 0,
            deadline: tokio::time::Instant::now() + config.batch_seal_time(),
            non_empty_deadline: None,
            start_emitted: false,
            used_ger: None,
            has_info_index: false,
            timestamp_limit: 0,
            batch_type: 0,
        }
    }

    fn vm_config(&self, batch: &OpenBatch) -> VmConfig {
        VmConfig::new(
            batch.config.chain_id,
            batch.fork_id,
            batch.collector.effective_smt_depth(),
        )
    }

    /// The local exit root as the rollup-side exit contract currently holds
    /// it in execution state.
    fn current_local_exit_root(&self) -> H256 {
        self.state
            .storage(GER_MANAGER_ADDRESS, u256_to_h256(U256::from(LER_SLOT)))
    }

    // === Injected genesis ===

    async fn process_injected_genesis(
        &mut self,
        config: &SequencerConfig,
        fork_id: ForkId,
        record: cdk_types::l1_events::InjectedBatchRecord,
    ) -> anyhow::Result<()> {
        tracing::info!(
            l1_block = %record.l1_block_number,
            "producing the injected genesis batch"
        );
        let tx = Transaction::from_rlp(&record.transaction, u8::MAX)
            .context("the injected transaction is malformed")?;

        // The injected batch is L1-dictated: its counters may not overflow.
        let mut batch = self.open_batch(config, fork_id, BatchNumber(1), true);
        batch.batch_type = 1;
        batch.collector.start_new_block(false);

        let plan = BlockPlan {
            timestamp: record.timestamp,
            info_index: L1InfoTreeIndex::UNUSED,
            ger: None,
            l1_block_hash: record.l1_block_hash,
            reused_index: false,
        };
        batch_l2_data::append_block_start(
            &mut batch.l2_data,
            plan.timestamp.saturating_sub(self.last_block_time) as u32,
            plan.info_index,
        );

        let block_ctx = BlockContext {
            number: self.exec_progress.next(),
            timestamp: plan.timestamp,
            coinbase: record.sequencer,
            gas_limit: fork_id.block_gas_limit(),
            base_fee: U256::zero(),
        };
        block_ctx.apply_preamble(&mut self.state, None);

        let vm_config = self.vm_config(&batch);
        let mut counter = TransactionCounter::new(&tx);
        let output = apply_transaction(
            &vm_config,
            &block_ctx,
            &mut self.state,
            &tx,
            tx.effective_gas_price_pct,
            &mut counter,
            0,
            0,
            false,
        )
        .map_err(|err| anyhow::anyhow!("the injected transaction is invalid: {err}"))?;
        counter.process_tx(&output.return_data, tx.to.is_none(), vm_config.poseidon_depth);
        batch.collector.add_execution_counters(counter.execution());
        batch_l2_data::append_transaction(&mut batch.l2_data, &tx);
        batch.txs_in_batch = 1;
        batch.timestamp_limit = record.timestamp;

        self.seal_block(&mut batch, &block_ctx, &plan, vec![tx], vec![output.receipt])
            .await?;
        self.close_batch(&mut batch, Some(record.l1_block_hash))
            .await?;
        tracing::info!(root = ?self.last_state_root, "injected genesis batch sealed");
        Ok(())
    }

    // === Normal / limbo production ===

    async fn produce_batch(
        &mut self,
        config: &SequencerConfig,
        fork_id: ForkId,
        number: BatchNumber,
        stop_receiver: &mut watch::Receiver<bool>,
    ) -> anyhow::Result<()> {
        let mut batch = self.open_batch(config, fork_id, number, false);
        let mut yielded: HashSet<H256> = HashSet::new();

        let limbo = match self.mode {
            KeeperMode::Limbo => {
                let limbo = self.mempool.get_limbo_tx(number).await;
                anyhow::ensure!(limbo.is_some(), "limbo mode without a limbo record");
                limbo
            }
            _ => None,
        };

        let mut run_loop_blocks = true;
        while run_loop_blocks {
            if !batch.blocks.is_empty()
                && tokio::time::Instant::now() >= batch.effective_deadline()
            {
                break;
            }
            let close_batch = self
                .produce_block(&mut batch, &mut yielded, limbo, stop_receiver)
                .await?;
            if close_batch || *stop_receiver.borrow() {
                run_loop_blocks = false;
            }
        }

        self.close_batch(&mut batch, None).await?;

        if self.mode == KeeperMode::Limbo {
            if let Some((_, tx_hash)) = limbo {
                self.mempool
                    .update_limbo_root(tx_hash, self.last_state_root)
                    .await;
            }
        } else {
            self.submit_verification(&batch).await?;
        }
        Ok(())
    }

    async fn plan_block(&mut self, timestamp: u64) -> anyhow::Result<BlockPlan> {
        let mut storage = self.pool.connection_tagged("state_keeper").await?;
        let usable = storage
            .l1_info_dal()
            .find_usable_index(self.last_used_l1_index, timestamp)
            .await?;
        let plan = match usable {
            Some(update) => BlockPlan {
                timestamp,
                info_index: update.index,
                ger: Some(update.ger),
                l1_block_hash: update.parent_hash,
                reused_index: false,
            },
            None => {
                let latest = storage.l1_info_dal().get_latest_l1_info_tree_update().await?;
                match latest {
                    // An update exists but its timestamp is still in this
                    // block's future: the index is re-used (0), the GER is
                    // still surfaced for stream visibility.
                    Some(update) if update.index > self.last_used_l1_index => BlockPlan {
                        timestamp,
                        info_index: L1InfoTreeIndex::UNUSED,
                        ger: Some(update.ger),
                        l1_block_hash: update.parent_hash,
                        reused_index: true,
                    },
                    _ => BlockPlan {
                        timestamp,
                        info_index: L1InfoTreeIndex::UNUSED,
                        ger: None,
                        l1_block_hash: H256::zero(),
                        reused_index: false,
                    },
                }
            }
        };
        Ok(plan)
    }

    /// Produces one block. Returns whether the batch must close afterwards.
    async fn produce_block(
        &mut self,
        batch: &mut OpenBatch,
        yielded: &mut HashSet<H256>,
        limbo: Option<(u64, H256)>,
        stop_receiver: &mut watch::Receiver<bool>,
    ) -> anyhow::Result<bool> {
        let config = batch.config.clone();
        let block_deadline = tokio::time::Instant::now() + config.block_seal_time();

        let timestamp = match limbo {
            Some((limbo_timestamp, _)) => limbo_timestamp,
            None => self.clock.now().max(self.last_block_time + 1),
        };
        let plan = self.plan_block(timestamp).await?;

        let overflow = batch.collector.start_new_block(!plan.info_index.is_unused());
        if overflow && !batch.blocks.is_empty() {
            // This block does not fit the batch anymore; it will open the
            // next one.
            tracing::debug!(batch = %batch.number, "block preamble overflowed the batch");
            return Ok(true);
        }
        batch.has_info_index = !plan.info_index.is_unused();
        batch_l2_data::append_block_start(
            &mut batch.l2_data,
            timestamp.saturating_sub(self.last_block_time) as u32,
            plan.info_index,
        );

        let block_ctx = BlockContext {
            number: self.exec_progress.next(),
            timestamp,
            coinbase: config.coinbase,
            gas_limit: batch.fork_id.block_gas_limit(),
            base_fee: U256::zero(),
        };
        // The GER map entry is only written when the index was consumed.
        let consumed_ger = if plan.info_index.is_unused() { None } else { plan.ger };
        block_ctx.apply_preamble(&mut self.state, consumed_ger);

        let vm_config = self.vm_config(batch);
        let mut txs: Vec<Transaction> = Vec::new();
        let mut receipts: Vec<TxReceipt> = Vec::new();
        let mut cumulative_gas = 0u64;
        let mut log_index = 0u64;
        let mut close_batch = false;

        'tx_loop: loop {
            // The batch deadline wins a tie so a spent batch never grows an
            // extra empty block.
            let now = tokio::time::Instant::now();
            if now >= batch.effective_deadline() {
                close_batch = true;
                break;
            }
            if now >= block_deadline {
                break;
            }

            let (candidates, _pool_ok) = self
                .mempool
                .yield_best(
                    config.mempool_yield_size,
                    yielded,
                    block_ctx.gas_limit - cumulative_gas,
                    self.exec_progress,
                )
                .await;
            let candidates: Vec<Transaction> = match limbo {
                Some((_, tx_hash)) => candidates
                    .into_iter()
                    .filter(|tx| tx.hash() == tx_hash)
                    .collect(),
                None => candidates,
            };

            if candidates.is_empty() {
                // Race the three wake sources; the checks at the loop head
                // decide what a timer firing means.
                tokio::select! {
                    _ = tokio::time::sleep_until(block_deadline) => continue 'tx_loop,
                    _ = tokio::time::sleep_until(batch.effective_deadline()) => continue 'tx_loop,
                    _ = tokio::time::sleep(config.mempool_empty_backoff()) => continue 'tx_loop,
                    _ = stop_receiver.changed() => {
                        close_batch = true;
                        break 'tx_loop;
                    }
                }
            }

            for tx in candidates {
                let now = tokio::time::Instant::now();
                if now >= batch.effective_deadline() {
                    close_batch = true;
                    break 'tx_loop;
                }
                if now >= block_deadline {
                    break 'tx_loop;
                }
                yielded.insert(tx.hash());

                let outcome = self.weigh_and_execute(
                    batch,
                    &vm_config,
                    &block_ctx,
                    &tx,
                    txs.len() as u64,
                    cumulative_gas,
                    log_index,
                );
                let pre_overflow = matches!(outcome, ExecOutcome::PreOverflow(_));
                match outcome {
                    ExecOutcome::Executed(output) => {
                        cumulative_gas = output.receipt.cumulative_gas_used;
                        log_index += output.receipt.logs.len() as u64;
                        batch_l2_data::append_transaction(&mut batch.l2_data, &tx);
                        batch.txs_in_batch += 1;
                        if batch.non_empty_deadline.is_none() {
                            batch.non_empty_deadline = Some(
                                tokio::time::Instant::now()
                                    + config.non_empty_batch_seal_time(),
                            );
                        }
                        METRICS.txs_executed.inc();
                        receipts.push(output.receipt);
                        txs.push(tx);
                    }
                    ExecOutcome::Rejected(err) => match self.mode {
                        KeeperMode::Normal => {
                            // Stays in the yielded set: retried in a later
                            // batch, not this one.
                            tracing::debug!(tx = ?tx.hash(), %err, "tx rejected, kept for retry");
                        }
                        KeeperMode::L1Recovery => {
                            tracing::warn!(tx = ?tx.hash(), %err, "recovery tx skipped");
                        }
                        KeeperMode::Limbo => {
                            panic!("limbo transaction {:?} failed: {err}", tx.hash());
                        }
                    },
                    ExecOutcome::RolledBack(resolution) | ExecOutcome::PreOverflow(resolution) => {
                        match resolution {
                            SealResolution::Unexecutable => {
                                if self.mode == KeeperMode::Limbo {
                                    panic!("limbo transaction {:?} overflowed", tx.hash());
                                }
                                METRICS.txs_discarded.inc();
                                self.mempool.mark_for_discard(tx.hash()).await;
                                close_batch = true;
                                break 'tx_loop;
                            }
                            SealResolution::ExcludeAndSeal => {
                                METRICS.txs_rolled_back.inc();
                                if pre_overflow {
                                    // Nothing more fits the batch.
                                    close_batch = true;
                                }
                                break 'tx_loop;
                            }
                            SealResolution::NoSeal | SealResolution::IncludeAndSeal => {}
                        }
                    }
                }
            }
        }

        self.seal_block(batch, &block_ctx, &plan, txs, receipts).await?;
        Ok(close_batch)
    }

    #[allow(clippy::too_many_arguments)]
    fn weigh_and_execute(
        &mut self,
        batch: &mut OpenBatch,
        vm_config: &VmConfig,
        block_ctx: &BlockContext,
        tx: &Transaction,
        txs_in_block: u64,
        cumulative_gas: u64,
        log_index: u64,
    ) -> ExecOutcome {
        let state_snapshot = self.state.snapshot();
        let collector_snapshot = batch.collector.clone();

        let mut counter = TransactionCounter::new(tx);
        if batch.collector.add_new_transaction_counters(&counter) {
            batch.collector = collector_snapshot;
            return ExecOutcome::PreOverflow(resolve(SealData {
                overflow: true,
                txs_in_batch: batch.txs_in_batch,
                txs_in_block,
            }));
        }

        let output = match apply_transaction(
            vm_config,
            block_ctx,
            &mut self.state,
            tx,
            tx.effective_gas_price_pct,
            &mut counter,
            cumulative_gas,
            log_index,
            false,
        ) {
            Ok(output) => output,
            Err(err) => {
                batch.collector = collector_snapshot;
                return ExecOutcome::Rejected(err);
            }
        };

        counter.process_tx(&output.return_data, tx.to.is_none(), vm_config.poseidon_depth);
        batch.collector.add_execution_counters(counter.execution());

        if batch.collector.check_for_overflow(batch.has_info_index) {
            self.state.revert_to_snapshot(state_snapshot);
            batch.collector = collector_snapshot;
            return ExecOutcome::RolledBack(resolve(SealData {
                overflow: true,
                txs_in_batch: batch.txs_in_batch,
                txs_in_block,
            }));
        }
        ExecOutcome::Executed(Box::new(output))
    }

    // === Sealing ===

    async fn seal_block(
        &mut self,
        batch: &mut OpenBatch,
        block_ctx: &BlockContext,
        plan: &BlockPlan,
        txs: Vec<Transaction>,
        receipts: Vec<TxReceipt>,
    ) -> anyhow::Result<()> {
        let number = block_ctx.number;
        let gas_used = receipts.last().map_or(0, |receipt| receipt.cumulative_gas_used);
        let state_root = self.committer.state_root(&self.state);

        // Block info tree over the preamble, the tx outcomes and gas used.
        let mut info_tree = BlockInfoTree::new();
        info_tree.init_block_header(&BlockPreamble {
            parent_state_root: self.last_state_root,
            coinbase: block_ctx.coinbase,
            number: number.0,
            gas_limit: block_ctx.gas_limit,
            timestamp: block_ctx.timestamp,
            ger: plan.ger.unwrap_or_default(),
            l1_block_hash: plan.l1_block_hash,
        });
        for (index, receipt) in receipts.iter().enumerate() {
            info_tree
                .set_block_tx(&BlockTxLeaf {
                    l2_tx_hash: receipt.l2_tx_hash,
                    index: index as u32,
                    status: receipt.status,
                    log_index: receipt.first_log_index,
                    cumulative_gas_used: receipt.cumulative_gas_used,
                    effective_gas_price_pct: txs[index].effective_gas_price_pct,
                })
                .map_err(|err| anyhow::anyhow!("block info tree: {err}"))?;
        }
        let block_info_root = info_tree
            .set_block_gas_used(gas_used)
            .map_err(|err| anyhow::anyhow!("block info tree: {err}"))?;

        let mut header = L2BlockHeader::new(
            number,
            block_ctx.timestamp,
            block_ctx.coinbase,
            batch.fork_id,
        );
        header.parent_hash = block_hash(self.exec_progress, self.last_state_root);
        header.state_root = state_root;
        header.receipts_root = receipts_root(&receipts);
        header.l1_info_tree_index = plan.info_index;
        header.l1_block_hash = plan.l1_block_hash;
        header.block_info_root = batch
            .fork_id
            .supports_block_info_root()
            .then_some(block_info_root);

        // Everything block-scoped lands in one store transaction.
        let mut storage = self.pool.connection_tagged("state_keeper").await?;
        storage
            .blocks_dal()
            .write_sealed_block(&SealedL2Block {
                header: header.clone(),
                transactions: txs.clone(),
            })
            .await?;
        storage.blocks_dal().write_block_batch(number, batch.number).await?;
        storage
            .blocks_dal()
            .write_block_l1_info_tree_index(number, plan.info_index)
            .await?;
        storage.blocks_dal().write_block_info_root(number, block_info_root).await?;
        if let Some(ger) = plan.ger {
            storage.blocks_dal().write_block_global_exit_root(number, ger).await?;
        }
        if plan.reused_index {
            storage.blocks_dal().write_reused_l1_info_tree_index(number).await?;
        }
        for tx in &txs {
            storage
                .blocks_dal()
                .write_effective_gas_price_pct(tx.hash(), tx.effective_gas_price_pct)
                .await?;
        }
        storage
            .sync_dal()
            .set_stage_progress(EXECUTION_STAGE, number)
            .await?;
        storage.commit().await?;

        // Stream emission strictly after the store commit.
        self.stream.start_atomic_op()?;
        if !batch.start_emitted {
            self.stream.add_bookmark(BookmarkKind::Batch, batch.number.0)?;
            self.stream.add_entry(Entry::BatchStart(BatchStart {
                batch_number: batch.number.0,
                batch_type: batch.batch_type,
                fork_id: batch.fork_id.0,
                chain_id: batch.config.chain_id,
            }))?;
            batch.start_emitted = true;
        }
        self.stream.add_bookmark(BookmarkKind::L2Block, number.0)?;
        self.stream.add_entry(Entry::L2BlockStart(L2BlockStart {
            batch_number: batch.number.0,
            block_number: number.0,
            timestamp: block_ctx.timestamp,
            delta_timestamp: block_ctx.timestamp.saturating_sub(self.last_block_time) as u32,
            l1_info_tree_index: plan.info_index.0 as u32,
            l1_block_hash: plan.l1_block_hash,
            ger: plan.ger.unwrap_or_default(),
            coinbase: block_ctx.coinbase,
            fork_id: batch.fork_id.0,
            chain_id: batch.config.chain_id,
            block_info_root,
        }))?;
        for (tx, receipt) in txs.iter().zip(&receipts) {
            self.stream.add_entry(Entry::L2Tx(L2Tx {
                effective_gas_price_pct: tx.effective_gas_price_pct,
                is_valid: receipt.status,
                state_root,
                encoded: tx.rlp_bytes(),
            }))?;
        }
        if plan.reused_index {
            // The GER stays visible to stream consumers even though the
            // index was not consumed.
            self.stream.add_entry(Entry::GerUpdate(GerUpdate {
                batch_number: batch.number.0,
                timestamp: block_ctx.timestamp,
                ger: plan.ger.unwrap_or_default(),
                coinbase: block_ctx.coinbase,
                fork_id: batch.fork_id.0,
                chain_id: batch.config.chain_id,
                state_root,
            }))?;
        }
        self.stream.add_entry(Entry::L2BlockEnd(L2BlockEnd {
            block_number: number.0,
        }))?;
        self.stream.commit()?;

        // Advance the in-memory tip.
        self.state.record_block_root(number.0, state_root);
        self.block_snapshots.insert(number.0, self.state.snapshot());
        self.exec_progress = number;
        self.last_block_time = block_ctx.timestamp;
        self.last_state_root = state_root;
        if !plan.info_index.is_unused() {
            self.last_used_l1_index = plan.info_index;
        }
        if let Some(ger) = plan.ger {
            if !plan.info_index.is_unused() {
                batch.used_ger = Some(ger);
            }
        }
        batch.blocks.push(number);
        batch.timestamp_limit = batch.timestamp_limit.max(block_ctx.timestamp);
        METRICS.blocks_sealed.inc();
        tracing::info!(
            block = %number,
            batch = %batch.number,
            txs = txs.len(),
            root = ?state_root,
            "block sealed"
        );
        Ok(())
    }

    async fn close_batch(
        &mut self,
        batch: &mut OpenBatch,
        forced_l1_block_hash: Option<H256>,
    ) -> anyhow::Result<()> {
        let last_block = *batch
            .blocks
            .last()
            .context("a batch cannot close without blocks")?;
        let local_exit_root = self.current_local_exit_root();

        let mut storage = self.pool.connection_tagged("state_keeper").await?;
        let old_acc_input_hash = match batch.number.checked_sub(1) {
            Some(previous) if previous.0 > 0 => storage
                .batches_dal()
                .get_batch(previous)
                .await?
                .map(|batch| batch.acc_input_hash)
                .unwrap_or_default(),
            _ => H256::zero(),
        };
        let acc_input_hash = compute_acc_input_hash(
            old_acc_input_hash,
            &batch.l2_data,
            H256::zero(),
            batch.timestamp_limit,
            batch.config.coinbase,
            forced_l1_block_hash.unwrap_or_default(),
        );

        let record = Batch {
            number: batch.number,
            fork_id: batch.fork_id,
            acc_input_hash,
            local_exit_root,
            global_exit_root: batch.used_ger,
            is_closed: true,
            l2_data: batch.l2_data.clone(),
        };
        storage.batches_dal().write_batch(&record).await?;
        storage
            .batches_dal()
            .write_batch_counters(last_block, &batch.collector.combine(batch.has_info_index))
            .await?;
        if let Some(ger) = batch.used_ger {
            storage.batches_dal().write_latest_used_ger(batch.number, ger).await?;
        }
        storage.batches_dal().write_local_exit_root(batch.number, local_exit_root).await?;
        storage.batches_dal().set_highest_seen_batch(batch.number).await?;
        storage.commit().await?;

        self.stream.start_atomic_op()?;
        if !batch.start_emitted {
            self.stream.add_bookmark(BookmarkKind::Batch, batch.number.0)?;
            self.stream.add_entry(Entry::BatchStart(BatchStart {
                batch_number: batch.number.0,
                batch_type: batch.batch_type,
                fork_id: batch.fork_id.0,
                chain_id: batch.config.chain_id,
            }))?;
            batch.start_emitted = true;
        }
        self.stream.add_entry(Entry::BatchEnd(BatchEnd {
            batch_number: batch.number.0,
            state_root: self.last_state_root,
            local_exit_root,
        }))?;
        self.stream.commit()?;

        METRICS.batches_sealed.inc();
        METRICS.highest_batch.set(batch.number.0);
        tracing::info!(
            batch = %batch.number,
            blocks = batch.blocks.len(),
            txs = batch.txs_in_batch,
            "batch sealed"
        );
        Ok(())
    }

    async fn submit_verification(&mut self, batch: &OpenBatch) -> anyhow::Result<()> {
        self.submit_batch_verification(
            batch.number,
            batch.collector.combine(batch.has_info_index),
            batch.blocks.clone(),
            batch.config.coinbase,
            batch.timestamp_limit,
        )
        .await
    }

    /// Fires a verification for an already-closed batch, reading its record
    /// from the store. Also serves re-closed batches after an unwind.
    async fn submit_batch_verification(
        &mut self,
        number: BatchNumber,
        counters: HashMap<String, u64>,
        blocks: Vec<L2BlockNumber>,
        coinbase: Address,
        timestamp_limit: u64,
    ) -> anyhow::Result<()> {
        let mut storage = self.pool.connection_tagged("state_keeper").await?;
        let record = storage
            .batches_dal()
            .get_batch(number)
            .await?
            .context("sealed batch vanished before verification")?;
        let old_acc_input_hash = match number.checked_sub(1) {
            Some(previous) if previous.0 > 0 => storage
                .batches_dal()
                .get_batch(previous)
                .await?
                .map(|batch| batch.acc_input_hash)
                .unwrap_or_default(),
            _ => H256::zero(),
        };
        // The batch blob doubles as the witness payload until a dedicated
        // witness generator is wired in.
        storage
            .batches_dal()
            .write_witness(number, &record.l2_data)
            .await?;
        storage.commit().await?;

        let node_values: Vec<Vec<u8>> = record.l2_data.chunks(56).map(<[u8]>::to_vec).collect();
        let witness_hash_cost = cdk_counters::precompute_hash_costs(&node_values);
        tracing::debug!(
            batch = %number,
            witness_hash_cost,
            "estimated poseidon cost of hashing the witness"
        );

        self.bridge.start_async(VerificationRequest {
            batch_number: number,
            fork_id: record.fork_id,
            state_root: self.last_state_root,
            counters,
            blocks,
            witness: record.l2_data,
            coinbase,
            old_acc_input_hash,
            timestamp_limit,
            forced_l1_block_hash: None,
        });
        Ok(())
    }

    // === L1 recovery ===

    /// Replays one batch decoded from L1 data. Returns `false` when there is
    /// nothing left to replay.
    async fn replay_next_batch(
        &mut self,
        config: &SequencerConfig,
        number: BatchNumber,
    ) -> anyhow::Result<bool> {
        let mut storage = self.pool.connection_tagged("state_keeper").await?;
        let Some(downloaded) = storage.batches_dal().get_batch(number).await? else {
            return Ok(false);
        };
        let sequenced = storage.l1_info_dal().get_sequenced_batch(number).await?;
        drop(storage);

        let limit_timestamp = sequenced
            .and_then(|batch| batch.timestamp_limit)
            .unwrap_or(u64::MAX);
        let blocks =
            batch_l2_data::decode(&downloaded.l2_data).context("undecodable batch L2 data")?;

        // The decoded timestamps must stay under the sequencing ceiling;
        // otherwise the whole batch is unplayable and marked invalid.
        let mut replay_time = self.last_block_time;
        for block in &blocks {
            replay_time += block.delta_timestamp as u64;
        }
        if replay_time > limit_timestamp {
            tracing::warn!(
                batch = %number,
                replay_time,
                limit_timestamp,
                "decoded batch exceeds its timestamp ceiling, marking invalid"
            );
            let last_block = L2BlockNumber(self.exec_progress.0 + blocks.len().max(1) as u64);
            let mut storage = self.pool.connection_tagged("state_keeper").await?;
            storage.batches_dal().write_invalid_batch(number).await?;
            storage
                .batches_dal()
                .write_batch_counters(last_block, &Default::default())
                .await?;
            storage.batches_dal().set_highest_seen_batch(number).await?;
            storage.commit().await?;
            return Ok(true);
        }

        let mut batch = self.open_batch(config, downloaded.fork_id, number, true);
        batch.batch_type = 2;
        let vm_config = self.vm_config(&batch);

        for decoded in blocks {
            let timestamp = self.last_block_time + decoded.delta_timestamp as u64;
            let mut plan = self.plan_block(timestamp).await?;
            // Recovery replays the recorded index verbatim.
            plan.info_index = decoded.l1_info_tree_index;
            plan.reused_index = false;

            batch.collector.start_new_block(!plan.info_index.is_unused());
            batch.has_info_index = !plan.info_index.is_unused();
            batch_l2_data::append_block_start(
                &mut batch.l2_data,
                decoded.delta_timestamp,
                plan.info_index,
            );

            let block_ctx = BlockContext {
                number: self.exec_progress.next(),
                timestamp,
                coinbase: config.coinbase,
                gas_limit: batch.fork_id.block_gas_limit(),
                base_fee: U256::zero(),
            };
            let consumed_ger = if plan.info_index.is_unused() { None } else { plan.ger };
            block_ctx.apply_preamble(&mut self.state, consumed_ger);

            let mut txs = Vec::new();
            let mut receipts = Vec::new();
            let mut cumulative_gas = 0u64;
            let mut log_index = 0u64;
            for tx in decoded.transactions {
                let mut counter = TransactionCounter::new(&tx);
                batch.collector.add_new_transaction_counters(&counter);
                match apply_transaction(
                    &vm_config,
                    &block_ctx,
                    &mut self.state,
                    &tx,
                    tx.effective_gas_price_pct,
                    &mut counter,
                    cumulative_gas,
                    log_index,
                    false,
                ) {
                    Ok(output) => {
                        counter.process_tx(
                            &output.return_data,
                            tx.to.is_none(),
                            vm_config.poseidon_depth,
                        );
                        batch.collector.add_execution_counters(counter.execution());
                        cumulative_gas = output.receipt.cumulative_gas_used;
                        log_index += output.receipt.logs.len() as u64;
                        batch_l2_data::append_transaction(&mut batch.l2_data, &tx);
                        batch.txs_in_batch += 1;
                        receipts.push(output.receipt);
                        txs.push(tx);
                    }
                    Err(err) => {
                        tracing::warn!(tx = ?tx.hash(), %err, "recovery tx skipped");
                    }
                }
            }
            self.seal_block(&mut batch, &block_ctx, &plan, txs, receipts).await?;
        }

        self.close_batch(&mut batch, None).await?;
        Ok(true)
    }

    // === Verification drain and unwind ===

    async fn handle_verifier_outcomes(&mut self) -> anyhow::Result<()> {
        for outcome in self.bridge.poll() {
            let batch_number = outcome.request.batch_number;
            match outcome.verdict {
                Verdict::Valid => {
                    tracing::info!(batch = %batch_number, "batch verified");
                }
                Verdict::Errored(reason) => {
                    tracing::warn!(batch = %batch_number, reason, "verification errored, resubmitting");
                    self.bridge.start_async(outcome.request);
                }
                Verdict::Invalid => {
                    tracing::error!(batch = %batch_number, "verifier rejected the batch");
                    if self.limbo_enabled {
                        self.hand_off_to_limbo(&outcome.request).await?;
                    } else {
                        self.unwind_after_rejection(&outcome.request).await?;
                    }
                }
            }
        }
        Ok(())
    }

    async fn hand_off_to_limbo(&mut self, request: &VerificationRequest) -> anyhow::Result<()> {
        let last_block = request.blocks.last().copied().unwrap_or(self.exec_progress);
        let mut storage = self.pool.connection_tagged("state_keeper").await?;
        let sealed = storage.blocks_dal().get_sealed_block(last_block).await?;
        let (timestamp, tx_hash) = match sealed {
            Some(block) => (
                block.header.timestamp,
                block
                    .transactions
                    .last()
                    .map(|tx| tx.hash())
                    .unwrap_or_default(),
            ),
            None => (request.timestamp_limit, H256::zero()),
        };
        storage
            .batches_dal()
            .write_limbo_batch(request.batch_number, timestamp, tx_hash)
            .await?;
        storage.commit().await?;
        tracing::warn!(
            batch = %request.batch_number,
            ?tx_hash,
            "batch handed off to limbo for reprocessing"
        );
        Ok(())
    }

    async fn unwind_after_rejection(
        &mut self,
        request: &VerificationRequest,
    ) -> anyhow::Result<()> {
        let last_block = request
            .blocks
            .last()
            .copied()
            .context("a rejected batch carries no blocks")?;
        let keep = last_block.saturating_sub(1);
        tracing::warn!(
            batch = %request.batch_number,
            %last_block,
            %keep,
            "unwinding after a verifier rejection"
        );
        METRICS.unwinds.inc();

        // Nothing in flight may outlive the rollback, and the re-closed
        // batch below must land in a fresh generation.
        self.bridge.cancel_all();

        // Stream first, store second: the stream is the ordering witness.
        // The store unwind also re-derives the shrunk batch's closing record
        // (blob, acc-input-hash link) from the surviving blocks.
        self.stream.unwind_to_block(last_block.0)?;
        let mut storage = self.pool.connection_tagged("state_keeper").await?;
        let kept_batch = storage.unwind_dal().unwind_to_block(keep).await?;
        storage.sync_dal().set_stage_progress(EXECUTION_STAGE, keep).await?;
        storage.commit().await?;

        // Roll the in-memory state back through the per-block snapshots.
        if let Some(snapshot) = self.block_snapshots.get(&keep.0).copied() {
            self.state.revert_to_snapshot(snapshot);
        }
        self.block_snapshots.split_off(&(keep.0 + 1));
        self.exec_progress = keep;
        self.load_tip().await?;

        // The truncation swallowed the kept batch's closing entry; re-close
        // it against the reverted state and send it back through Verify.
        // When the rejected batch held a single block, the previous batch's
        // end survived the cut and it was already verified as-is.
        if kept_batch.0 > 0 && self.stream.highest_closed_batch() != Some(kept_batch.0) {
            let local_exit_root = self.current_local_exit_root();
            let mut storage = self.pool.connection_tagged("state_keeper").await?;
            if let Some(mut record) = storage.batches_dal().get_batch(kept_batch).await? {
                record.local_exit_root = local_exit_root;
                storage.batches_dal().write_batch(&record).await?;
            }
            storage
                .batches_dal()
                .write_local_exit_root(kept_batch, local_exit_root)
                .await?;
            let counters = storage
                .batches_dal()
                .get_batch_counters(keep)
                .await?
                .unwrap_or_default();
            let blocks = storage.blocks_dal().blocks_of_batch(kept_batch).await?;
            storage.commit().await?;

            self.stream.start_atomic_op()?;
            self.stream.add_entry(Entry::BatchEnd(BatchEnd {
                batch_number: kept_batch.0,
                state_root: self.last_state_root,
                local_exit_root,
            }))?;
            self.stream.commit()?;

            let coinbase = self.config_rx.borrow().coinbase;
            self.submit_batch_verification(
                kept_batch,
                counters,
                blocks,
                coinbase,
                self.last_block_time,
            )
            .await?;
        }
        Ok(())
    }
}

fn block_hash(number: L2BlockNumber, state_root: H256) -> H256 {
    cdk_types::hasher::keccak256_concat([&number.0.to_be_bytes()[..], state_root.as_bytes()])
}
