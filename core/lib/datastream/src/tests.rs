use std::{fs::OpenOptions, io::Write as _};

use cdk_basic_types::{Address, H256};
use tempfile::TempDir;

use super::*;

fn block_entry(batch: u64, block: u64) -> Entry {
    Entry::L2BlockStart(L2BlockStart {
        batch_number: batch,
        block_number: block,
        timestamp: 1_700_000_000 + block,
        delta_timestamp: 2,
        l1_info_tree_index: 0,
        l1_block_hash: H256::repeat_byte(1),
        ger: H256::zero(),
        coinbase: Address::repeat_byte(2),
        fork_id: 9,
        chain_id: 1001,
        block_info_root: H256::repeat_byte(3),
    })
}

fn write_batch(writer: &mut StreamWriter, batch: u64, blocks: &[u64]) {
    writer.start_atomic_op().unwrap();
    writer.add_bookmark(BookmarkKind::Batch, batch).unwrap();
    writer
        .add_entry(Entry::BatchStart(BatchStart {
            batch_number: batch,
            batch_type: 0,
            fork_id: 9,
            chain_id: 1001,
        }))
        .unwrap();
    for block in blocks {
        writer.add_bookmark(BookmarkKind::L2Block, *block).unwrap();
        writer.add_entry(block_entry(batch, *block)).unwrap();
        writer
            .add_entry(Entry::L2Tx(L2Tx {
                effective_gas_price_pct: 255,
                is_valid: 1,
                state_root: H256::repeat_byte(*block as u8),
                encoded: vec![0xaa; 16],
            }))
            .unwrap();
        writer
            .add_entry(Entry::L2BlockEnd(L2BlockEnd {
                block_number: *block,
            }))
            .unwrap();
    }
    writer
        .add_entry(Entry::BatchEnd(BatchEnd {
            batch_number: batch,
            state_root: H256::repeat_byte(0xee),
            local_exit_root: H256::zero(),
        }))
        .unwrap();
    writer.commit().unwrap();
}

#[test]
fn batches_bracket_blocks_in_order() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("stream.bin");
    let mut writer = StreamWriter::open(&path).unwrap();
    write_batch(&mut writer, 1, &[1, 2]);
    write_batch(&mut writer, 2, &[3]);

    let mut reader = StreamReader::open(&path).unwrap();
    let mut batch_events = Vec::new();
    let mut blocks = Vec::new();
    while let Some((_, entry)) = reader.next_entry().unwrap() {
        match entry {
            Entry::BatchStart(batch) => batch_events.push(("start", batch.batch_number)),
            Entry::BatchEnd(batch) => batch_events.push(("end", batch.batch_number)),
            Entry::L2BlockStart(block) => blocks.push(block.block_number),
            _ => {}
        }
    }
    assert_eq!(
        batch_events,
        vec![("start", 1), ("end", 1), ("start", 2), ("end", 2)]
    );
    assert_eq!(blocks, vec![1, 2, 3]);
}

#[test]
fn bookmarks_resolve_to_preceding_offsets() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("stream.bin");
    let mut writer = StreamWriter::open(&path).unwrap();
    write_batch(&mut writer, 1, &[1, 2]);

    let bookmark = writer.bookmark_offset(BookmarkKind::L2Block, 2).unwrap();
    let mut reader = StreamReader::open(&path).unwrap();
    reader.seek_to(bookmark);
    let (_, entry) = reader.next_entry().unwrap().unwrap();
    assert_eq!(
        entry,
        Entry::Bookmark {
            kind: BookmarkKind::L2Block,
            value: 2
        }
    );
    let (_, entry) = reader.next_entry().unwrap().unwrap();
    assert!(matches!(entry, Entry::L2BlockStart(block) if block.block_number == 2));
}

#[test]
fn caches_track_commits_and_survive_reopen() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("stream.bin");
    let mut writer = StreamWriter::open(&path).unwrap();
    write_batch(&mut writer, 1, &[1, 2]);

    assert_eq!(writer.highest_block(), Some(2));
    assert_eq!(writer.highest_batch(), Some(1));
    assert_eq!(writer.highest_closed_batch(), Some(1));
    let entries = writer.total_entries();
    drop(writer);

    let writer = StreamWriter::open(&path).unwrap();
    assert_eq!(writer.highest_block(), Some(2));
    assert_eq!(writer.highest_closed_batch(), Some(1));
    assert_eq!(writer.total_entries(), entries);
}

#[test]
fn unwind_to_block_truncates_at_its_bookmark() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("stream.bin");
    let mut writer = StreamWriter::open(&path).unwrap();
    write_batch(&mut writer, 1, &[1, 2, 3]);

    writer.unwind_to_block(3).unwrap();
    assert_eq!(writer.highest_block(), Some(2));
    assert_eq!(writer.highest_batch(), Some(1));
    // The batch end went with the truncated tail.
    assert_eq!(writer.highest_closed_batch(), None);
    assert_eq!(writer.bookmark_offset(BookmarkKind::L2Block, 3), None);

    // The stream stays appendable after a truncation.
    writer.start_atomic_op().unwrap();
    writer.add_bookmark(BookmarkKind::L2Block, 3).unwrap();
    writer.add_entry(block_entry(1, 3)).unwrap();
    writer.commit().unwrap();
    assert_eq!(writer.highest_block(), Some(3));
}

#[test]
fn unwind_to_batch_start_removes_the_whole_batch() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("stream.bin");
    let mut writer = StreamWriter::open(&path).unwrap();
    write_batch(&mut writer, 1, &[1]);
    write_batch(&mut writer, 2, &[2, 3]);

    writer.unwind_to_batch_start(2).unwrap();
    assert_eq!(writer.highest_batch(), Some(1));
    assert_eq!(writer.highest_closed_batch(), Some(1));
    assert_eq!(writer.highest_block(), Some(1));
}

#[test]
fn rollback_discards_buffered_entries() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("stream.bin");
    let mut writer = StreamWriter::open(&path).unwrap();
    writer.start_atomic_op().unwrap();
    writer.add_bookmark(BookmarkKind::Batch, 1).unwrap();
    writer.rollback().unwrap();
    assert_eq!(writer.total_entries(), 0);
    assert_eq!(writer.bookmark_offset(BookmarkKind::Batch, 1), None);
}

#[test]
fn appends_require_an_atomic_op() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("stream.bin");
    let mut writer = StreamWriter::open(&path).unwrap();
    assert!(matches!(
        writer.add_bookmark(BookmarkKind::Batch, 1),
        Err(StreamError::NoAtomicOp)
    ));
}

#[test]
fn torn_tail_is_healed_on_reopen() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("stream.bin");
    let mut writer = StreamWriter::open(&path).unwrap();
    write_batch(&mut writer, 1, &[1]);
    let committed = writer.current_offset();
    drop(writer);

    // Simulate a crash mid-append: garbage past the committed length.
    let mut file = OpenOptions::new().append(true).open(&path).unwrap();
    file.write_all(&[0xde, 0xad, 0xbe, 0xef]).unwrap();
    drop(file);

    let writer = StreamWriter::open(&path).unwrap();
    assert_eq!(writer.current_offset(), committed);
    assert_eq!(writer.highest_block(), Some(1));
}

#[test]
fn tx_payload_round_trips() {
    let entry = Entry::L2Tx(L2Tx {
        effective_gas_price_pct: 37,
        is_valid: 1,
        state_root: H256::repeat_byte(0x42),
        encoded: vec![1, 2, 3, 4, 5],
    });
    let payload = entry.encode_payload();
    let decoded = Entry::decode_payload(EntryType::L2Tx, &payload, 0).unwrap();
    assert_eq!(decoded, entry);
}
