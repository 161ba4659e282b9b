//! Fixed-arity commitment over a single block's outcomes.
//!
//! Leaves, in order: the block preamble (parent root, coinbase, number, gas
//! limit, timestamp, GER, L1 block hash), one leaf per transaction, then the
//! gas-used trailer. The tree is strictly sequential: header, txs, trailer.

use cdk_basic_types::{Address, H256};
use cdk_types::hasher::{keccak256, keccak256_concat};

// Leaf domain tags keep differently-shaped leaves from colliding.
const TAG_PARENT_ROOT: u8 = 0x01;
const TAG_COINBASE: u8 = 0x02;
const TAG_NUMBER: u8 = 0x03;
const TAG_GAS_LIMIT: u8 = 0x04;
const TAG_TIMESTAMP: u8 = 0x05;
const TAG_GER: u8 = 0x06;
const TAG_L1_BLOCK_HASH: u8 = 0x07;
const TAG_TX: u8 = 0x08;
const TAG_GAS_USED: u8 = 0x09;

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum BlockInfoTreeError {
    #[error("the block header has not been initialized")]
    NotInitialized,
    #[error("the tree is already finalized")]
    AlreadyFinalized,
}

/// Block-level inputs committed by the preamble leaves.
#[derive(Debug, Clone)]
pub struct BlockPreamble {
    pub parent_state_root: H256,
    pub coinbase: Address,
    pub number: u64,
    pub gas_limit: u64,
    pub timestamp: u64,
    pub ger: H256,
    pub l1_block_hash: H256,
}

/// Per-transaction leaf inputs.
#[derive(Debug, Clone)]
pub struct BlockTxLeaf {
    pub l2_tx_hash: H256,
    pub index: u32,
    pub status: u8,
    pub log_index: u64,
    pub cumulative_gas_used: u64,
    pub effective_gas_price_pct: u8,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    Empty,
    Open,
    Finalized,
}

#[derive(Debug)]
pub struct BlockInfoTree {
    leaves: Vec<H256>,
    phase: Phase,
}

impl Default for BlockInfoTree {
    fn default() -> Self {
        Self::new()
    }
}

impl BlockInfoTree {
    pub fn new() -> Self {
        Self {
            leaves: Vec::new(),
            phase: Phase::Empty,
        }
    }

    /// Resets the tree and commits the block preamble.
    pub fn init_block_header(&mut self, preamble: &BlockPreamble) {
        self.leaves.clear();
        self.leaves.extend([
            tagged_leaf(TAG_PARENT_ROOT, preamble.parent_state_root.as_bytes()),
            tagged_leaf(TAG_COINBASE, preamble.coinbase.as_bytes()),
            tagged_leaf(TAG_NUMBER, &preamble.number.to_be_bytes()),
            tagged_leaf(TAG_GAS_LIMIT, &preamble.gas_limit.to_be_bytes()),
            tagged_leaf(TAG_TIMESTAMP, &preamble.timestamp.to_be_bytes()),
            tagged_leaf(TAG_GER, preamble.ger.as_bytes()),
            tagged_leaf(TAG_L1_BLOCK_HASH, preamble.l1_block_hash.as_bytes()),
        ]);
        self.phase = Phase::Open;
    }

    /// Appends one transaction leaf, in block order.
    pub fn set_block_tx(&mut self, leaf: &BlockTxLeaf) -> Result<(), BlockInfoTreeError> {
        match self.phase {
            Phase::Empty => return Err(BlockInfoTreeError::NotInitialized),
            Phase::Finalized => return Err(BlockInfoTreeError::AlreadyFinalized),
            Phase::Open => {}
        }
        self.leaves.push(keccak256_concat([
            &[TAG_TX][..],
            leaf.l2_tx_hash.as_bytes(),
            &leaf.index.to_be_bytes(),
            &[leaf.status],
            &leaf.log_index.to_be_bytes(),
            &leaf.cumulative_gas_used.to_be_bytes(),
            &[leaf.effective_gas_price_pct],
        ]));
        Ok(())
    }

    /// Appends the gas-used trailer and returns the root.
    pub fn set_block_gas_used(&mut self, gas_used: u64) -> Result<H256, BlockInfoTreeError> {
        match self.phase {
            Phase::Empty => return Err(BlockInfoTreeError::NotInitialized),
            Phase::Finalized => return Err(BlockInfoTreeError::AlreadyFinalized),
            Phase::Open => {}
        }
        self.leaves
            .push(tagged_leaf(TAG_GAS_USED, &gas_used.to_be_bytes()));
        self.phase = Phase::Finalized;
        Ok(merkle_root(&self.leaves))
    }
}

fn tagged_leaf(tag: u8, data: &[u8]) -> H256 {
    keccak256_concat([&[tag][..], data])
}

/// Binary keccak Merkle over the ordered leaves; odd tails pair with a zero
/// leaf.
fn merkle_root(leaves: &[H256]) -> H256 {
    if leaves.is_empty() {
        return keccak256(&[]);
    }
    let mut level = leaves.to_vec();
    while level.len() > 1 {
        let mut next = Vec::with_capacity(level.len().div_ceil(2));
        for pair in level.chunks(2) {
            let right = pair.get(1).copied().unwrap_or_else(H256::zero);
            next.push(keccak256_concat([pair[0].as_bytes(), right.as_bytes()]));
        }
        level = next;
    }
    level[0]
}
