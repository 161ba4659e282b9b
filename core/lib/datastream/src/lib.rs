//! The datastream: a single-writer, offset-addressed, bookmarked append log
//! of batch, block and transaction entries. It is the authoritative ordering
//! witness of the node: execution progress is unwound down to it after a
//! crash, never the other way around.

pub use self::{
    entries::{
        BatchEnd, BatchStart, Entry, GerUpdate, L2BlockEnd, L2BlockStart, L2Tx,
    },
    reader::StreamReader,
    types::{BookmarkKind, EntryType, StreamError, PROTOCOL_VERSION},
    writer::StreamWriter,
};

mod entries;
mod reader;
mod types;
mod writer;

#[cfg(test)]
mod tests;
