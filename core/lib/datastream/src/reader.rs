//! Forward reader over the stream file. Readers may attach at any entry
//! offset and identify batch boundaries purely from entry types; they never
//! see past the last committed header.

use std::{
    fs::File,
    io::{Read, Seek, SeekFrom},
    path::Path,
};

use crate::{
    entries::Entry,
    types::{EntryType, StreamError, FRAME_OVERHEAD, HEADER_SIZE, PACKET_DATA, PACKET_HEADER},
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StreamHeader {
    pub stream_type: u64,
    pub total_length: u64,
    pub total_entries: u64,
}

#[derive(Debug)]
pub struct StreamReader {
    file: File,
    offset: u64,
    header: StreamHeader,
}

impl StreamReader {
    pub fn open(path: &Path) -> Result<Self, StreamError> {
        let mut file = File::open(path)?;
        let header = read_header(&mut file)?;
        Ok(Self {
            file,
            offset: HEADER_SIZE,
            header,
        })
    }

    pub fn header(&self) -> StreamHeader {
        self.header
    }

    /// Re-reads the header, picking up entries committed since open.
    pub fn refresh(&mut self) -> Result<(), StreamError> {
        self.header = read_header(&mut self.file)?;
        Ok(())
    }

    /// Positions the reader at an entry offset.
    pub fn seek_to(&mut self, offset: u64) {
        self.offset = offset.max(HEADER_SIZE);
    }

    pub fn offset(&self) -> u64 {
        self.offset
    }

    /// Reads the next committed entry, or `None` at the committed tail.
    pub fn next_entry(&mut self) -> Result<Option<(u64, Entry)>, StreamError> {
        if self.offset >= self.header.total_length {
            return Ok(None);
        }
        let (entry, next) = read_entry_at(&mut self.file, self.offset)?;
        let offset = self.offset;
        self.offset = next;
        Ok(Some((offset, entry)))
    }
}

pub(crate) fn read_header(file: &mut File) -> Result<StreamHeader, StreamError> {
    file.seek(SeekFrom::Start(0))?;
    let mut buf = [0u8; HEADER_SIZE as usize];
    file.read_exact(&mut buf)?;
    if buf[0] != PACKET_HEADER {
        return Err(StreamError::Header(format!(
            "unexpected packet type {}",
            buf[0]
        )));
    }
    let head_length = u32::from_be_bytes(buf[1..5].try_into().expect("sized"));
    if head_length as u64 != HEADER_SIZE {
        return Err(StreamError::Header(format!(
            "unexpected header length {head_length}"
        )));
    }
    Ok(StreamHeader {
        stream_type: u64::from_be_bytes(buf[5..13].try_into().expect("sized")),
        total_length: u64::from_be_bytes(buf[13..21].try_into().expect("sized")),
        total_entries: u64::from_be_bytes(buf[21..29].try_into().expect("sized")),
    })
}

/// Reads one data frame; returns the entry and the offset right after it.
pub(crate) fn read_entry_at(file: &mut File, offset: u64) -> Result<(Entry, u64), StreamError> {
    file.seek(SeekFrom::Start(offset))?;
    let mut fixed = [0u8; FRAME_OVERHEAD as usize];
    file.read_exact(&mut fixed)?;
    if fixed[0] != PACKET_DATA {
        return Err(StreamError::Malformed {
            offset,
            reason: format!("unexpected packet type {}", fixed[0]),
        });
    }
    let frame_length = u32::from_be_bytes(fixed[1..5].try_into().expect("sized")) as u64;
    if frame_length < FRAME_OVERHEAD {
        return Err(StreamError::Malformed {
            offset,
            reason: format!("frame length {frame_length} is below the fixed overhead"),
        });
    }
    let raw_type = u32::from_be_bytes(fixed[5..9].try_into().expect("sized"));
    let entry_type = EntryType::from_u32(raw_type).ok_or_else(|| StreamError::Malformed {
        offset,
        reason: format!("unknown entry type {raw_type}"),
    })?;

    let mut payload = vec![0u8; (frame_length - FRAME_OVERHEAD) as usize];
    file.read_exact(&mut payload)?;
    let entry = Entry::decode_payload(entry_type, &payload, offset)?;
    Ok((entry, offset + frame_length))
}
