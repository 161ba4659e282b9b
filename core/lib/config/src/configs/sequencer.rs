use std::time::Duration;

use cdk_basic_types::Address;
use serde::{Deserialize, Serialize};

/// Configuration for the batch sequencer loop.
#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
pub struct SequencerConfig {
    /// Chain id of the L2 network.
    pub chain_id: u64,

    /// Fork id configured at genesis; later transitions are learned from L1.
    pub genesis_fork_id: u16,

    /// Address credited with block rewards and fees.
    pub coinbase: Address,

    /// How long a block may stay open before it is sealed.
    /// Value in milliseconds.
    pub block_seal_time_ms: u64,

    /// How long a batch may stay open before it is sealed.
    /// Value in milliseconds.
    pub batch_seal_time_ms: u64,

    /// Seal deadline applied once a batch holds at least one transaction.
    /// Value in milliseconds.
    pub non_empty_batch_seal_time_ms: u64,

    /// Number of transactions requested from the mempool per yield.
    pub mempool_yield_size: usize,

    /// Backoff applied when the mempool comes back empty.
    /// Value in milliseconds.
    pub mempool_empty_backoff_ms: u64,

    /// Divisor applied to the poseidon estimation paths of the virtual
    /// counters.
    pub virtual_counters_smt_reduction: u32,

    /// Relative bump applied to the SMT depth read from state, in percent.
    pub smt_depth_margin_pct: u32,

    /// Disables virtual-counter overflow checks entirely.
    pub disable_virtual_counters: bool,
}

impl SequencerConfig {
    pub fn block_seal_time(&self) -> Duration {
        Duration::from_millis(self.block_seal_time_ms)
    }

    pub fn batch_seal_time(&self) -> Duration {
        Duration::from_millis(self.batch_seal_time_ms)
    }

    pub fn non_empty_batch_seal_time(&self) -> Duration {
        Duration::from_millis(self.non_empty_batch_seal_time_ms)
    }

    pub fn mempool_empty_backoff(&self) -> Duration {
        Duration::from_millis(self.mempool_empty_backoff_ms)
    }
}

impl SequencerConfig {
    /// Creates a mock configuration object suitable for unit tests.
    /// Values inside match the config used for localhost development.
    pub fn for_tests() -> Self {
        Self {
            chain_id: 1001,
            genesis_fork_id: 9,
            coinbase: Address::repeat_byte(0x42),
            block_seal_time_ms: 2_000,
            batch_seal_time_ms: 6_000,
            non_empty_batch_seal_time_ms: 4_000,
            mempool_yield_size: 1000,
            mempool_empty_backoff_ms: 50,
            virtual_counters_smt_reduction: 1,
            smt_depth_margin_pct: 10,
            disable_virtual_counters: false,
        }
    }
}
