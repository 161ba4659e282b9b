//! Transaction receipts and logs.

use cdk_basic_types::{Address, H256};
use serde::{Deserialize, Serialize};

use crate::hasher::keccak256_concat;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Log {
    pub address: Address,
    pub topics: Vec<H256>,
    pub data: Vec<u8>,
}

impl Log {
    pub fn is_empty(&self) -> bool {
        self.topics.is_empty() && self.data.is_empty()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TxReceipt {
    pub tx_hash: H256,
    pub l2_tx_hash: H256,
    /// 1 on success, 0 on revert.
    pub status: u8,
    pub gas_used: u64,
    pub cumulative_gas_used: u64,
    /// Index of the first log of this tx within the block.
    pub first_log_index: u64,
    pub logs: Vec<Log>,
}

/// Commitment over a block's receipts, in order.
pub fn receipts_root(receipts: &[TxReceipt]) -> H256 {
    let mut leaves = Vec::with_capacity(receipts.len() * 32);
    for receipt in receipts {
        let leaf = keccak256_concat([
            receipt.tx_hash.as_bytes(),
            &[receipt.status],
            &receipt.cumulative_gas_used.to_be_bytes(),
            &(receipt.logs.len() as u64).to_be_bytes(),
        ]);
        leaves.extend_from_slice(leaf.as_bytes());
    }
    keccak256_concat([leaves.as_slice()])
}

#[cfg(test)]
mod tests {
    use super::*;

    fn receipt(status: u8, gas: u64) -> TxReceipt {
        TxReceipt {
            tx_hash: H256::repeat_byte(1),
            l2_tx_hash: H256::repeat_byte(2),
            status,
            gas_used: gas,
            cumulative_gas_used: gas,
            first_log_index: 0,
            logs: vec![],
        }
    }

    #[test]
    fn root_is_order_sensitive() {
        let a = receipt(1, 21_000);
        let b = receipt(0, 50_000);
        assert_ne!(
            receipts_root(&[a.clone(), b.clone()]),
            receipts_root(&[b, a])
        );
    }
}
