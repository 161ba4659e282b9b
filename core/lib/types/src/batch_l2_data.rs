//! Codec for the batch L2-data blob: the byte stream a batch commits to and
//! the follower decodes back into blocks during recovery.
//!
//! Layout, per block:
//! `0x0B ∥ delta_timestamp (u32 BE) ∥ l1_info_tree_index (u32 BE)` followed
//! by the block's transactions, each as
//! `0x0C ∥ rlp_len (u32 BE) ∥ rlp ∥ effective_gas_price_pct (u8)`.

use cdk_basic_types::L1InfoTreeIndex;
use serde::{Deserialize, Serialize};

use crate::transaction::{Transaction, TransactionError};

const BLOCK_MARKER: u8 = 0x0b;
const TX_MARKER: u8 = 0x0c;

/// Fixed bytes a block start contributes to the blob.
pub const BLOCK_START_BYTES: usize = 9;
/// Fixed bytes a transaction contributes on top of its RLP.
pub const TX_OVERHEAD_BYTES: usize = 6;

#[derive(Debug, thiserror::Error)]
pub enum L2DataError {
    #[error("truncated L2 data at offset {0}")]
    Truncated(usize),
    #[error("unexpected marker {marker:#04x} at offset {offset}")]
    UnexpectedMarker { marker: u8, offset: usize },
    #[error("transaction at offset {offset} is malformed: {source}")]
    Transaction {
        offset: usize,
        #[source]
        source: TransactionError,
    },
}

/// A block as it appears inside the blob. Timestamps are deltas against the
/// previous block so the blob stays replayable at any wall-clock moment.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct L2DataBlock {
    pub delta_timestamp: u32,
    pub l1_info_tree_index: L1InfoTreeIndex,
    pub transactions: Vec<Transaction>,
}

/// Appends a block start to the blob.
pub fn append_block_start(
    data: &mut Vec<u8>,
    delta_timestamp: u32,
    l1_info_tree_index: L1InfoTreeIndex,
) {
    data.push(BLOCK_MARKER);
    data.extend_from_slice(&delta_timestamp.to_be_bytes());
    data.extend_from_slice(&(l1_info_tree_index.0 as u32).to_be_bytes());
}

/// Appends a transaction to the blob.
pub fn append_transaction(data: &mut Vec<u8>, tx: &Transaction) {
    let rlp = tx.rlp_bytes();
    data.push(TX_MARKER);
    data.extend_from_slice(&(rlp.len() as u32).to_be_bytes());
    data.extend_from_slice(&rlp);
    data.push(tx.effective_gas_price_pct);
}

/// Encodes a full block list; the inverse of [`decode`].
pub fn encode(blocks: &[L2DataBlock]) -> Vec<u8> {
    let mut data = Vec::new();
    for block in blocks {
        append_block_start(&mut data, block.delta_timestamp, block.l1_info_tree_index);
        for tx in &block.transactions {
            append_transaction(&mut data, tx);
        }
    }
    data
}

/// Decodes a blob back into blocks, recovering every tx sender.
pub fn decode(data: &[u8]) -> Result<Vec<L2DataBlock>, L2DataError> {
    let mut blocks: Vec<L2DataBlock> = Vec::new();
    let mut offset = 0;
    while offset < data.len() {
        match data[offset] {
            BLOCK_MARKER => {
                let fixed = data
                    .get(offset + 1..offset + BLOCK_START_BYTES)
                    .ok_or(L2DataError::Truncated(offset))?;
                blocks.push(L2DataBlock {
                    delta_timestamp: u32::from_be_bytes(fixed[..4].try_into().unwrap()),
                    l1_info_tree_index: L1InfoTreeIndex(u32::from_be_bytes(
                        fixed[4..].try_into().unwrap(),
                    ) as u64),
                    transactions: Vec::new(),
                });
                offset += BLOCK_START_BYTES;
            }
            TX_MARKER => {
                let block = blocks
                    .last_mut()
                    .ok_or(L2DataError::UnexpectedMarker { marker: TX_MARKER, offset })?;
                let len_bytes = data
                    .get(offset + 1..offset + 5)
                    .ok_or(L2DataError::Truncated(offset))?;
                let rlp_len = u32::from_be_bytes(len_bytes.try_into().unwrap()) as usize;
                let rlp_end = offset + 5 + rlp_len;
                let rlp = data
                    .get(offset + 5..rlp_end)
                    .ok_or(L2DataError::Truncated(offset))?;
                let pct = *data.get(rlp_end).ok_or(L2DataError::Truncated(offset))?;
                let tx = Transaction::from_rlp(rlp, pct)
                    .map_err(|source| L2DataError::Transaction { offset, source })?;
                block.transactions.push(tx);
                offset = rlp_end + 1;
            }
            marker => return Err(L2DataError::UnexpectedMarker { marker, offset }),
        }
    }
    Ok(blocks)
}
