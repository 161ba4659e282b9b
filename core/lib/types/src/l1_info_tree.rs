//! L1 info tree updates: the GER publications the follower ingests from the
//! rollup manager.

use cdk_basic_types::{L1BlockNumber, L1InfoTreeIndex, H256};
use serde::{Deserialize, Serialize};

use crate::hasher::keccak256_concat;

/// One leaf of the L1 info tree. Indices are dense from 1; index 0 is the
/// "unused" sentinel and never stored.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct L1InfoTreeUpdate {
    pub index: L1InfoTreeIndex,
    pub ger: H256,
    pub mainnet_exit_root: H256,
    pub rollup_exit_root: H256,
    pub parent_hash: H256,
    pub timestamp: u64,
    pub l1_block_number: L1BlockNumber,
}

impl L1InfoTreeUpdate {
    /// Hash identifying this leaf inside the info tree.
    pub fn leaf_hash(&self) -> H256 {
        keccak256_concat([
            self.ger.as_bytes(),
            self.parent_hash.as_bytes(),
            &self.timestamp.to_be_bytes(),
        ])
    }
}

/// `GER = keccak(mainnet_exit_root ∥ rollup_exit_root)`.
pub fn compute_ger(mainnet_exit_root: H256, rollup_exit_root: H256) -> H256 {
    keccak256_concat([mainnet_exit_root.as_bytes(), rollup_exit_root.as_bytes()])
}
