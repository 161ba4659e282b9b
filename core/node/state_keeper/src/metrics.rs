//! Metrics for the sequencer loop.

use vise::{Counter, Gauge, Metrics};

#[derive(Debug, Metrics)]
#[metrics(prefix = "cdk_state_keeper")]
pub(crate) struct StateKeeperMetrics {
    /// Batches sealed since startup.
    pub batches_sealed: Counter,

    /// Blocks sealed since startup.
    pub blocks_sealed: Counter,

    /// Transactions executed successfully.
    pub txs_executed: Counter,

    /// Transactions rolled off a block after a counter overflow.
    pub txs_rolled_back: Counter,

    /// Transactions handed to the mempool for permanent discard.
    pub txs_discarded: Counter,

    /// Unwinds driven by verifier rejections.
    pub unwinds: Counter,

    /// Highest sealed batch number.
    pub highest_batch: Gauge<u64>,
}

#[vise::register]
pub(crate) static METRICS: vise::Global<StateKeeperMetrics> = vise::Global::new();
