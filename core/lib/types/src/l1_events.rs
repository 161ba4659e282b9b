//! Records the L1 follower distills from rollup-manager logs and persists
//! through the store.

use cdk_basic_types::{Address, BatchNumber, ForkId, L1BlockNumber, H256};
use serde::{Deserialize, Serialize};

/// A batch sequenced on L1 (`SequenceBatches`, pre-Etrog or Etrog form).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SequencedBatch {
    pub batch_number: BatchNumber,
    pub l1_block_number: L1BlockNumber,
    pub l1_tx_hash: H256,
    /// Present only in the forms that publish it.
    pub state_root: Option<H256>,
    pub l1_info_root: Option<H256>,
    /// Timestamp of the sequencing L1 block; replayed blocks must not get
    /// ahead of it.
    pub timestamp_limit: Option<u64>,
}

/// A batch verified on L1 (`Verification` in any of its three forms).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BatchVerification {
    pub batch_number: BatchNumber,
    pub state_root: H256,
}

/// The genesis seed decoded from `InitialSequenceBatches`: the only batch
/// whose block timestamp is dictated by L1 rather than wall clock.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InjectedBatchRecord {
    pub l1_block_number: L1BlockNumber,
    pub l1_block_hash: H256,
    pub timestamp: u64,
    pub sequencer: Address,
    /// Raw RLP of the single seed transaction.
    pub transaction: Vec<u8>,
}

/// Rollup administration events that drive fork-id history.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum RollupAdminEvent {
    AddNewRollupType {
        rollup_type_id: u64,
        fork_id: ForkId,
        genesis_root: H256,
    },
    CreateNewRollup {
        rollup_id: u64,
        rollup_type_id: u64,
        fork_id: ForkId,
        chain_id: u64,
    },
    UpdateRollup {
        rollup_id: u64,
        new_rollup_type_id: u64,
        new_fork_id: ForkId,
        /// Batch the new fork takes effect from.
        from_batch: BatchNumber,
    },
}
