//! Typed entries and their payload codecs.

use cdk_basic_types::{Address, H256};

use crate::types::{BookmarkKind, EntryType, StreamError};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BatchStart {
    pub batch_number: u64,
    /// 0 = regular, 1 = injected, 2 = invalid (recovery).
    pub batch_type: u8,
    pub fork_id: u16,
    pub chain_id: u64,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BatchEnd {
    pub batch_number: u64,
    pub state_root: H256,
    pub local_exit_root: H256,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct L2BlockStart {
    pub batch_number: u64,
    pub block_number: u64,
    pub timestamp: u64,
    pub delta_timestamp: u32,
    pub l1_info_tree_index: u32,
    pub l1_block_hash: H256,
    pub ger: H256,
    pub coinbase: Address,
    pub fork_id: u16,
    pub chain_id: u64,
    pub block_info_root: H256,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct L2Tx {
    pub effective_gas_price_pct: u8,
    pub is_valid: u8,
    pub state_root: H256,
    pub encoded: Vec<u8>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct L2BlockEnd {
    pub block_number: u64,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GerUpdate {
    pub batch_number: u64,
    pub timestamp: u64,
    pub ger: H256,
    pub coinbase: Address,
    pub fork_id: u16,
    pub chain_id: u64,
    pub state_root: H256,
}

/// A decoded data entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Entry {
    Bookmark { kind: BookmarkKind, value: u64 },
    BatchStart(BatchStart),
    L2BlockStart(L2BlockStart),
    L2Tx(L2Tx),
    L2BlockEnd(L2BlockEnd),
    BatchEnd(BatchEnd),
    GerUpdate(GerUpdate),
}

impl Entry {
    pub fn entry_type(&self) -> EntryType {
        match self {
            Entry::Bookmark { .. } => EntryType::Bookmark,
            Entry::BatchStart(_) => EntryType::BatchStart,
            Entry::L2BlockStart(_) => EntryType::L2Block,
            Entry::L2Tx(_) => EntryType::L2Tx,
            Entry::L2BlockEnd(_) => EntryType::L2BlockEnd,
            Entry::BatchEnd(_) => EntryType::BatchEnd,
            Entry::GerUpdate(_) => EntryType::GerUpdate,
        }
    }

    pub fn encode_payload(&self) -> Vec<u8> {
        let mut out = Vec::new();
        match self {
            Entry::Bookmark { kind, value } => {
                // Bookmarks keep their value big-endian so byte order equals
                // numeric order.
                out.push(*kind as u8);
                out.extend_from_slice(&value.to_be_bytes());
            }
            Entry::BatchStart(entry) => {
                out.extend_from_slice(&entry.batch_number.to_le_bytes());
                out.push(entry.batch_type);
                out.extend_from_slice(&entry.fork_id.to_le_bytes());
                out.extend_from_slice(&entry.chain_id.to_le_bytes());
            }
            Entry::L2BlockStart(entry) => {
                out.extend_from_slice(&entry.batch_number.to_le_bytes());
                out.extend_from_slice(&entry.block_number.to_le_bytes());
                out.extend_from_slice(&entry.timestamp.to_le_bytes());
                out.extend_from_slice(&entry.delta_timestamp.to_le_bytes());
                out.extend_from_slice(&entry.l1_info_tree_index.to_le_bytes());
                out.extend_from_slice(entry.l1_block_hash.as_bytes());
                out.extend_from_slice(entry.ger.as_bytes());
                out.extend_from_slice(entry.coinbase.as_bytes());
                out.extend_from_slice(&entry.fork_id.to_le_bytes());
                out.extend_from_slice(&entry.chain_id.to_le_bytes());
                out.extend_from_slice(entry.block_info_root.as_bytes());
            }
            Entry::L2Tx(entry) => {
                out.push(entry.effective_gas_price_pct);
                out.push(entry.is_valid);
                out.extend_from_slice(entry.state_root.as_bytes());
                out.extend_from_slice(&(entry.encoded.len() as u32).to_le_bytes());
                out.extend_from_slice(&entry.encoded);
            }
            Entry::L2BlockEnd(entry) => {
                out.extend_from_slice(&entry.block_number.to_le_bytes());
            }
            Entry::BatchEnd(entry) => {
                out.extend_from_slice(&entry.batch_number.to_le_bytes());
                out.extend_from_slice(entry.state_root.as_bytes());
                out.extend_from_slice(entry.local_exit_root.as_bytes());
            }
            Entry::GerUpdate(entry) => {
                out.extend_from_slice(&entry.batch_number.to_le_bytes());
                out.extend_from_slice(&entry.timestamp.to_le_bytes());
                out.extend_from_slice(entry.ger.as_bytes());
                out.extend_from_slice(entry.coinbase.as_bytes());
                out.extend_from_slice(&entry.fork_id.to_le_bytes());
                out.extend_from_slice(&entry.chain_id.to_le_bytes());
                out.extend_from_slice(entry.state_root.as_bytes());
            }
        }
        out
    }

    pub fn decode_payload(
        entry_type: EntryType,
        payload: &[u8],
        offset: u64,
    ) -> Result<Self, StreamError> {
        let mut reader = PayloadReader::new(payload, offset);
        let entry = match entry_type {
            EntryType::Bookmark => {
                let raw_kind = reader.u8()?;
                let kind = BookmarkKind::from_u8(raw_kind).ok_or_else(|| {
                    StreamError::Malformed {
                        offset,
                        reason: format!("unknown bookmark kind {raw_kind}"),
                    }
                })?;
                let value = u64::from_be_bytes(reader.array()?);
                Entry::Bookmark { kind, value }
            }
            EntryType::BatchStart => Entry::BatchStart(BatchStart {
                batch_number: reader.u64()?,
                batch_type: reader.u8()?,
                fork_id: reader.u16()?,
                chain_id: reader.u64()?,
            }),
            EntryType::L2Block => Entry::L2BlockStart(L2BlockStart {
                batch_number: reader.u64()?,
                block_number: reader.u64()?,
                timestamp: reader.u64()?,
                delta_timestamp: reader.u32()?,
                l1_info_tree_index: reader.u32()?,
                l1_block_hash: reader.h256()?,
                ger: reader.h256()?,
                coinbase: reader.address()?,
                fork_id: reader.u16()?,
                chain_id: reader.u64()?,
                block_info_root: reader.h256()?,
            }),
            EntryType::L2Tx => {
                let effective_gas_price_pct = reader.u8()?;
                let is_valid = reader.u8()?;
                let state_root = reader.h256()?;
                let len = reader.u32()? as usize;
                let encoded = reader.bytes(len)?;
                Entry::L2Tx(L2Tx {
                    effective_gas_price_pct,
                    is_valid,
                    state_root,
                    encoded,
                })
            }
            EntryType::L2BlockEnd => Entry::L2BlockEnd(L2BlockEnd {
                block_number: reader.u64()?,
            }),
            EntryType::BatchEnd => Entry::BatchEnd(BatchEnd {
                batch_number: reader.u64()?,
                state_root: reader.h256()?,
                local_exit_root: reader.h256()?,
            }),
            EntryType::GerUpdate => Entry::GerUpdate(GerUpdate {
                batch_number: reader.u64()?,
                timestamp: reader.u64()?,
                ger: reader.h256()?,
                coinbase: reader.address()?,
                fork_id: reader.u16()?,
                chain_id: reader.u64()?,
                state_root: reader.h256()?,
            }),
        };
        Ok(entry)
    }
}

struct PayloadReader<'a> {
    payload: &'a [u8],
    cursor: usize,
    offset: u64,
}

impl<'a> PayloadReader<'a> {
    fn new(payload: &'a [u8], offset: u64) -> Self {
        Self {
            payload,
            cursor: 0,
            offset,
        }
    }

    fn take(&mut self, n: usize) -> Result<&'a [u8], StreamError> {
        let end = self.cursor + n;
        let slice = self
            .payload
            .get(self.cursor..end)
            .ok_or_else(|| StreamError::Malformed {
                offset: self.offset,
                reason: format!("payload truncated at byte {}", self.cursor),
            })?;
        self.cursor = end;
        Ok(slice)
    }

    fn array<const N: usize>(&mut self) -> Result<[u8; N], StreamError> {
        Ok(self.take(N)?.try_into().expect("slice length checked"))
    }

    fn u8(&mut self) -> Result<u8, StreamError> {
        Ok(self.take(1)?[0])
    }

    fn u16(&mut self) -> Result<u16, StreamError> {
        Ok(u16::from_le_bytes(self.array()?))
    }

    fn u32(&mut self) -> Result<u32, StreamError> {
        Ok(u32::from_le_bytes(self.array()?))
    }

    fn u64(&mut self) -> Result<u64, StreamError> {
        Ok(u64::from_le_bytes(self.array()?))
    }

    fn h256(&mut self) -> Result<H256, StreamError> {
        Ok(H256::from_slice(self.take(32)?))
    }

    fn address(&mut self) -> Result<Address, StreamError> {
        Ok(Address::from_slice(self.take(20)?))
    }

    fn bytes(&mut self, n: usize) -> Result<Vec<u8>, StreamError> {
        Ok(self.take(n)?.to_vec())
    }
}
