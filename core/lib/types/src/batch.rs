//! Batch definitions and the accumulated-input-hash chain.

use cdk_basic_types::{Address, BatchNumber, ForkId, H256};
use serde::{Deserialize, Serialize};

use crate::hasher::{keccak256, keccak256_concat};

/// A monotonically numbered unit of sequenced blocks, sealed together for
/// proving. Never mutated after close except to record the verification
/// outcome.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Batch {
    pub number: BatchNumber,
    pub fork_id: ForkId,
    /// Chained commitment over every sequenced batch up to this one.
    pub acc_input_hash: H256,
    pub local_exit_root: H256,
    pub global_exit_root: Option<H256>,
    pub is_closed: bool,
    /// Encoded blocks + transactions; see [`crate::batch_l2_data`].
    pub l2_data: Vec<u8>,
}

impl Batch {
    pub fn open(number: BatchNumber, fork_id: ForkId) -> Self {
        Self {
            number,
            fork_id,
            acc_input_hash: H256::zero(),
            local_exit_root: H256::zero(),
            global_exit_root: None,
            is_closed: false,
            l2_data: Vec::new(),
        }
    }
}

/// Chains a batch into the accumulated input hash consumed by the prover:
/// `keccak(old ∥ keccak(l2_data) ∥ l1_info_root ∥ limit_ts ∥ sequencer ∥ forced_hash)`.
pub fn compute_acc_input_hash(
    old_acc_input_hash: H256,
    l2_data: &[u8],
    l1_info_root: H256,
    limit_timestamp: u64,
    sequencer: Address,
    forced_block_hash: H256,
) -> H256 {
    let data_hash = keccak256(l2_data);
    keccak256_concat([
        old_acc_input_hash.as_bytes(),
        data_hash.as_bytes(),
        l1_info_root.as_bytes(),
        &limit_timestamp.to_be_bytes(),
        sequencer.as_bytes(),
        forced_block_hash.as_bytes(),
    ])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn acc_input_hash_chains() {
        let first = compute_acc_input_hash(
            H256::zero(),
            b"batch-1",
            H256::repeat_byte(1),
            100,
            Address::repeat_byte(2),
            H256::zero(),
        );
        let second = compute_acc_input_hash(
            first,
            b"batch-2",
            H256::repeat_byte(1),
            200,
            Address::repeat_byte(2),
            H256::zero(),
        );
        assert_ne!(first, second);
        // Same inputs reproduce the same chain.
        let replay = compute_acc_input_hash(
            first,
            b"batch-2",
            H256::repeat_byte(1),
            200,
            Address::repeat_byte(2),
            H256::zero(),
        );
        assert_eq!(second, replay);
    }
}
