//! Wire-level constants and errors.
//!
//! Every frame starts with a 1-byte packet type and a 4-byte big-endian
//! length. Data frames carry a 4-byte entry type and an 8-byte entry number
//! before the payload; payload integers are little-endian. The 29-byte file
//! header (stream type, total length, total entries) is rewritten on every
//! commit.

use std::io;

/// Protocol version 3 adds a block-end entry after every block.
pub const PROTOCOL_VERSION: u8 = 3;

pub const PACKET_PADDING: u8 = 0;
pub const PACKET_HEADER: u8 = 1;
pub const PACKET_DATA: u8 = 2;
pub const PACKET_RESULT: u8 = 0xff;

/// Stream type recorded in the header; 1 is the sequencer stream.
pub const STREAM_TYPE_SEQUENCER: u64 = 1;

/// Byte length of the file header.
pub const HEADER_SIZE: u64 = 29;
/// Fixed bytes of a data frame before the payload.
pub const FRAME_OVERHEAD: u64 = 1 + 4 + 4 + 8;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u32)]
pub enum EntryType {
    Bookmark = 0xb0,
    BatchStart = 1,
    L2Block = 2,
    L2Tx = 3,
    L2BlockEnd = 4,
    BatchEnd = 5,
    GerUpdate = 6,
}

impl EntryType {
    pub fn from_u32(value: u32) -> Option<Self> {
        Some(match value {
            0xb0 => EntryType::Bookmark,
            1 => EntryType::BatchStart,
            2 => EntryType::L2Block,
            3 => EntryType::L2Tx,
            4 => EntryType::L2BlockEnd,
            5 => EntryType::BatchEnd,
            6 => EntryType::GerUpdate,
            _ => return None,
        })
    }
}

/// What a bookmark points at: `(kind, value)` resolves to the offset of the
/// next entry of the matching type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum BookmarkKind {
    Batch = 1,
    L2Block = 2,
}

impl BookmarkKind {
    pub fn from_u8(value: u8) -> Option<Self> {
        match value {
            1 => Some(BookmarkKind::Batch),
            2 => Some(BookmarkKind::L2Block),
            _ => None,
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum StreamError {
    #[error("I/O failure on the stream file: {0}")]
    Io(#[from] io::Error),
    #[error("malformed entry at offset {offset}: {reason}")]
    Malformed { offset: u64, reason: String },
    #[error("unknown bookmark ({kind:?}, {value})")]
    UnknownBookmark { kind: BookmarkKind, value: u64 },
    #[error("no atomic operation is in progress")]
    NoAtomicOp,
    #[error("an atomic operation is already in progress")]
    AtomicOpInProgress,
    #[error("header mismatch: {0}")]
    Header(String),
}
