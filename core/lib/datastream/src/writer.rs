//! The single writer of the stream file.
//!
//! Entries are buffered inside an atomic op and durably appended at commit;
//! the header (and with it the committed length) is rewritten last, so a
//! crash mid-append is healed on reopen by truncating to the last committed
//! header. Bookmark offsets live in an in-memory side index rebuilt on open,
//! making bookmark resolution O(1).

use std::{
    collections::HashMap,
    fs::{File, OpenOptions},
    io::{Seek, SeekFrom, Write},
    path::{Path, PathBuf},
};

use crate::{
    entries::Entry,
    reader::{read_entry_at, read_header},
    types::{
        BookmarkKind, EntryType, StreamError, FRAME_OVERHEAD, HEADER_SIZE, PACKET_DATA,
        PACKET_HEADER, STREAM_TYPE_SEQUENCER,
    },
};

#[derive(Debug)]
pub struct StreamWriter {
    file: File,
    path: PathBuf,
    total_length: u64,
    total_entries: u64,
    /// Offsets of every committed entry, in order.
    entry_offsets: Vec<u64>,
    bookmarks: HashMap<(BookmarkKind, u64), u64>,
    highest_block: Option<u64>,
    highest_batch: Option<u64>,
    highest_closed_batch: Option<u64>,
    pending: Option<Vec<Entry>>,
}

impl StreamWriter {
    /// Opens (or creates) the stream file, healing a torn tail and
    /// rebuilding the side indexes.
    pub fn open(path: &Path) -> Result<Self, StreamError> {
        let mut file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(path)?;

        let file_len = file.metadata()?.len();
        let mut writer = Self {
            file,
            path: path.to_path_buf(),
            total_length: HEADER_SIZE,
            total_entries: 0,
            entry_offsets: Vec::new(),
            bookmarks: HashMap::new(),
            highest_block: None,
            highest_batch: None,
            highest_closed_batch: None,
            pending: None,
        };

        if file_len == 0 {
            writer.write_header()?;
            return Ok(writer);
        }

        let header = read_header(&mut writer.file)?;
        if header.stream_type != STREAM_TYPE_SEQUENCER {
            return Err(StreamError::Header(format!(
                "unexpected stream type {}",
                header.stream_type
            )));
        }
        writer.total_length = header.total_length;
        writer.total_entries = header.total_entries;

        // Entries past the committed length are a torn append; drop them.
        if file_len > header.total_length {
            tracing::warn!(
                committed = header.total_length,
                file_len,
                "stream file is longer than its committed length, truncating"
            );
            writer.file.set_len(header.total_length)?;
        } else if file_len < header.total_length {
            return Err(StreamError::Header(format!(
                "committed length {} exceeds the file length {file_len}",
                header.total_length
            )));
        }

        writer.rebuild_indexes()?;
        Ok(writer)
    }

    fn rebuild_indexes(&mut self) -> Result<(), StreamError> {
        self.entry_offsets.clear();
        self.bookmarks.clear();
        self.highest_block = None;
        self.highest_batch = None;
        self.highest_closed_batch = None;

        let mut offset = HEADER_SIZE;
        while offset < self.total_length {
            let (entry, next) = read_entry_at(&mut self.file, offset)?;
            self.entry_offsets.push(offset);
            self.index_entry(&entry, offset);
            offset = next;
        }
        Ok(())
    }

    fn index_entry(&mut self, entry: &Entry, offset: u64) {
        match entry {
            Entry::Bookmark { kind, value } => {
                self.bookmarks.insert((*kind, *value), offset);
            }
            Entry::BatchStart(batch) => self.highest_batch = Some(batch.batch_number),
            Entry::L2BlockStart(block) => self.highest_block = Some(block.block_number),
            Entry::BatchEnd(batch) => self.highest_closed_batch = Some(batch.batch_number),
            Entry::L2Tx(_) | Entry::L2BlockEnd(_) | Entry::GerUpdate(_) => {}
        }
    }

    pub fn start_atomic_op(&mut self) -> Result<(), StreamError> {
        if self.pending.is_some() {
            return Err(StreamError::AtomicOpInProgress);
        }
        self.pending = Some(Vec::new());
        Ok(())
    }

    pub fn add_entry(&mut self, entry: Entry) -> Result<(), StreamError> {
        self.pending
            .as_mut()
            .ok_or(StreamError::NoAtomicOp)?
            .push(entry);
        Ok(())
    }

    pub fn add_bookmark(&mut self, kind: BookmarkKind, value: u64) -> Result<(), StreamError> {
        self.add_entry(Entry::Bookmark { kind, value })
    }

    /// Discards the buffered entries.
    pub fn rollback(&mut self) -> Result<(), StreamError> {
        if self.pending.take().is_none() {
            return Err(StreamError::NoAtomicOp);
        }
        Ok(())
    }

    /// Durably appends the buffered entries and republishes the header.
    pub fn commit(&mut self) -> Result<(), StreamError> {
        let pending = self.pending.take().ok_or(StreamError::NoAtomicOp)?;

        self.file.seek(SeekFrom::Start(self.total_length))?;
        let mut staged: Vec<(Entry, u64)> = Vec::with_capacity(pending.len());
        let mut buffer = Vec::new();
        let mut offset = self.total_length;
        for entry in pending {
            let payload = entry.encode_payload();
            let frame_length = FRAME_OVERHEAD + payload.len() as u64;
            buffer.push(PACKET_DATA);
            buffer.extend_from_slice(&(frame_length as u32).to_be_bytes());
            buffer.extend_from_slice(&(entry.entry_type() as u32).to_be_bytes());
            buffer.extend_from_slice(&self.total_entries.to_be_bytes());
            buffer.extend_from_slice(&payload);

            staged.push((entry, offset));
            offset += frame_length;
            self.total_entries += 1;
        }
        self.file.write_all(&buffer)?;
        self.file.sync_data()?;

        self.total_length = offset;
        for (entry, offset) in staged {
            self.entry_offsets.push(offset);
            self.index_entry(&entry, offset);
        }
        self.write_header()?;
        Ok(())
    }

    fn write_header(&mut self) -> Result<(), StreamError> {
        let mut header = Vec::with_capacity(HEADER_SIZE as usize);
        header.push(PACKET_HEADER);
        header.extend_from_slice(&(HEADER_SIZE as u32).to_be_bytes());
        header.extend_from_slice(&STREAM_TYPE_SEQUENCER.to_be_bytes());
        header.extend_from_slice(&self.total_length.to_be_bytes());
        header.extend_from_slice(&self.total_entries.to_be_bytes());
        self.file.seek(SeekFrom::Start(0))?;
        self.file.write_all(&header)?;
        self.file.sync_data()?;
        Ok(())
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn total_entries(&self) -> u64 {
        self.total_entries
    }

    /// Next offset an appended entry would land at.
    pub fn current_offset(&self) -> u64 {
        self.total_length
    }

    pub fn highest_block(&self) -> Option<u64> {
        self.highest_block
    }

    pub fn highest_batch(&self) -> Option<u64> {
        self.highest_batch
    }

    pub fn highest_closed_batch(&self) -> Option<u64> {
        self.highest_closed_batch
    }

    /// O(1) bookmark resolution through the side index.
    pub fn bookmark_offset(&self, kind: BookmarkKind, value: u64) -> Option<u64> {
        self.bookmarks.get(&(kind, value)).copied()
    }

    /// Removes every entry at or beyond `offset`. The only destructive
    /// operation on the stream.
    pub fn truncate_to(&mut self, offset: u64) -> Result<(), StreamError> {
        if self.pending.is_some() {
            return Err(StreamError::AtomicOpInProgress);
        }
        if offset >= self.total_length {
            return Ok(());
        }
        let keep = self.entry_offsets.partition_point(|entry| *entry < offset);
        if self.entry_offsets.get(keep) != Some(&offset) && offset != HEADER_SIZE {
            return Err(StreamError::Malformed {
                offset,
                reason: "truncation target is not an entry boundary".to_string(),
            });
        }

        self.file.set_len(offset)?;
        self.total_length = offset;
        self.total_entries = keep as u64;
        self.entry_offsets.truncate(keep);
        self.bookmarks.retain(|_, bookmark| *bookmark < offset);
        self.recompute_caches()?;
        self.write_header()?;
        Ok(())
    }

    /// Truncates at the bookmark of block `block_number`, removing it and
    /// everything after it.
    pub fn unwind_to_block(&mut self, block_number: u64) -> Result<(), StreamError> {
        let offset = self
            .bookmark_offset(BookmarkKind::L2Block, block_number)
            .ok_or(StreamError::UnknownBookmark {
                kind: BookmarkKind::L2Block,
                value: block_number,
            })?;
        self.truncate_to(offset)
    }

    /// Truncates at the bookmark of batch `batch_number`, removing it and
    /// everything after it.
    pub fn unwind_to_batch_start(&mut self, batch_number: u64) -> Result<(), StreamError> {
        let offset = self
            .bookmark_offset(BookmarkKind::Batch, batch_number)
            .ok_or(StreamError::UnknownBookmark {
                kind: BookmarkKind::Batch,
                value: batch_number,
            })?;
        self.truncate_to(offset)
    }

    /// Scans backward from the tail until the first entry of each cached
    /// type is seen again.
    fn recompute_caches(&mut self) -> Result<(), StreamError> {
        self.highest_block = None;
        self.highest_batch = None;
        self.highest_closed_batch = None;

        for offset in self.entry_offsets.clone().into_iter().rev() {
            if self.highest_block.is_some()
                && self.highest_batch.is_some()
                && self.highest_closed_batch.is_some()
            {
                break;
            }
            let (entry, _) = read_entry_at(&mut self.file, offset)?;
            match entry {
                Entry::L2BlockStart(block) if self.highest_block.is_none() => {
                    self.highest_block = Some(block.block_number);
                }
                Entry::BatchStart(batch) if self.highest_batch.is_none() => {
                    self.highest_batch = Some(batch.batch_number);
                }
                Entry::BatchEnd(batch) if self.highest_closed_batch.is_none() => {
                    self.highest_closed_batch = Some(batch.batch_number);
                }
                _ => {}
            }
        }
        Ok(())
    }
}
