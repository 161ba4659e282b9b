//! L2 block definitions.

use cdk_basic_types::{Address, ForkId, L1InfoTreeIndex, L2BlockNumber, H256};
use serde::{Deserialize, Serialize};

use crate::transaction::Transaction;

/// Header of an L2 block. Ordered inside exactly one batch.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct L2BlockHeader {
    pub number: L2BlockNumber,
    /// Seconds. Non-decreasing within a batch.
    pub timestamp: u64,
    pub coinbase: Address,
    /// Fork-dependent; see [`ForkId::block_gas_limit`].
    pub gas_limit: u64,
    pub parent_hash: H256,
    pub state_root: H256,
    pub receipts_root: H256,
    /// Index of the consumed L1 info tree update, 0 when none was usable.
    pub l1_info_tree_index: L1InfoTreeIndex,
    pub l1_block_hash: H256,
    /// Commitment over the block's tx outcomes; stamped from fork 7 on.
    pub block_info_root: Option<H256>,
}

impl L2BlockHeader {
    pub fn new(number: L2BlockNumber, timestamp: u64, coinbase: Address, fork_id: ForkId) -> Self {
        Self {
            number,
            timestamp,
            coinbase,
            gas_limit: fork_id.block_gas_limit(),
            parent_hash: H256::zero(),
            state_root: H256::zero(),
            receipts_root: H256::zero(),
            l1_info_tree_index: L1InfoTreeIndex::UNUSED,
            l1_block_hash: H256::zero(),
            block_info_root: None,
        }
    }
}

/// A block finalized inside a batch, together with its transactions.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SealedL2Block {
    pub header: L2BlockHeader,
    pub transactions: Vec<Transaction>,
}

impl SealedL2Block {
    pub fn number(&self) -> L2BlockNumber {
        self.header.number
    }
}
