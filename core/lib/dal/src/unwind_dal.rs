use std::collections::HashMap;

use cdk_basic_types::{BatchNumber, L2BlockNumber, H256};
use cdk_storage::u64_key;
use cdk_types::{batch::compute_acc_input_hash, batch_l2_data};

use crate::{tables, Connection, CoreDal, DalResult};

/// Block-keyed tables swept by an unwind.
const BLOCK_SCOPED_TABLES: &[&str] = &[
    tables::BLOCK_BATCHES,
    tables::BLOCKS,
    tables::BLOCK_GLOBAL_EXIT_ROOTS,
    tables::BLOCK_L1_INFO_TREE_INDICES,
    tables::REUSED_L1_INFO_TREE_INDICES,
    tables::BLOCK_INFO_ROOTS,
    tables::BATCH_COUNTERS,
];

/// Batch-keyed tables swept by an unwind.
const BATCH_SCOPED_TABLES: &[&str] = &[
    tables::BATCHES,
    tables::BATCH_BLOCKS,
    tables::BATCH_WITNESSES,
    tables::LATEST_USED_GERS,
    tables::LOCAL_EXIT_ROOTS,
    tables::INVALID_BATCHES,
    tables::LIMBO_BATCHES,
];

#[derive(Debug)]
pub struct UnwindDal<'a> {
    pub(crate) storage: &'a mut Connection,
}

impl UnwindDal<'_> {
    /// Removes every record above `target`, truncates the batch holding
    /// `target` to it, and rewinds the highest-seen-batch watermark. When
    /// the boundary batch loses blocks, its closing record is re-derived
    /// from the surviving ones so the acc-input-hash chain stays intact.
    /// Returns the batch that remains at the tip.
    pub async fn unwind_to_block(&mut self, target: L2BlockNumber) -> DalResult<BatchNumber> {
        let kept_batch = self
            .storage
            .blocks_dal()
            .batch_of_block(target)
            .await?
            .unwrap_or(BatchNumber(0));

        for table in BLOCK_SCOPED_TABLES {
            self.storage
                .tx()
                .delete_range(table, u64_key(target.0 + 1)..);
        }
        for table in BATCH_SCOPED_TABLES {
            self.storage
                .tx()
                .delete_range(table, u64_key(kept_batch.0 + 1)..);
        }

        // The kept batch may have owned blocks above the target.
        let mut shrunk = false;
        let mut blocks_dal = self.storage.blocks_dal();
        if let Some((first, last)) = blocks_dal.block_window_of_batch(kept_batch).await? {
            if last > target {
                blocks_dal
                    .set_block_window_of_batch(kept_batch, Some((first, target)))
                    .await?;
                shrunk = true;
            }
        }

        self.storage
            .batches_dal()
            .set_highest_seen_batch(kept_batch)
            .await?;

        if shrunk && kept_batch.0 > 0 {
            self.rebuild_boundary_batch(kept_batch).await?;
        }
        Ok(kept_batch)
    }

    /// Re-derives a shrunk batch's closing record from its surviving sealed
    /// blocks: the L2-data blob, the acc-input-hash link, and the used-GER
    /// bookkeeping. The stale witness is dropped and the counters key moves
    /// to the new boundary block. The local exit root lives in execution
    /// state, so refreshing it is the caller's job.
    async fn rebuild_boundary_batch(&mut self, batch: BatchNumber) -> DalResult<()> {
        let Some(mut record) = self.storage.batches_dal().get_batch(batch).await? else {
            return Ok(());
        };
        let Some((first, last)) = self
            .storage
            .blocks_dal()
            .block_window_of_batch(batch)
            .await?
        else {
            return Ok(());
        };

        let mut prev_timestamp = match first.checked_sub(1) {
            Some(parent) if parent.0 > 0 => self
                .storage
                .blocks_dal()
                .get_sealed_block(parent)
                .await?
                .map(|block| block.header.timestamp)
                .unwrap_or(0),
            _ => 0,
        };

        let mut l2_data = Vec::new();
        let mut used_ger = None;
        let mut tail_header = None;
        for number in (first.0..=last.0).map(L2BlockNumber) {
            let Some(sealed) = self.storage.blocks_dal().get_sealed_block(number).await? else {
                continue;
            };
            batch_l2_data::append_block_start(
                &mut l2_data,
                sealed.header.timestamp.saturating_sub(prev_timestamp) as u32,
                sealed.header.l1_info_tree_index,
            );
            for tx in &sealed.transactions {
                batch_l2_data::append_transaction(&mut l2_data, tx);
            }
            if !sealed.header.l1_info_tree_index.is_unused() {
                used_ger = self
                    .storage
                    .blocks_dal()
                    .get_block_global_exit_root(number)
                    .await?;
            }
            prev_timestamp = sealed.header.timestamp;
            tail_header = Some(sealed.header);
        }
        let Some(tail_header) = tail_header else {
            return Ok(());
        };

        let old_acc_input_hash = match batch.checked_sub(1) {
            Some(previous) if previous.0 > 0 => self
                .storage
                .batches_dal()
                .get_batch(previous)
                .await?
                .map(|batch| batch.acc_input_hash)
                .unwrap_or_default(),
            _ => H256::zero(),
        };
        record.acc_input_hash = compute_acc_input_hash(
            old_acc_input_hash,
            &l2_data,
            H256::zero(),
            tail_header.timestamp,
            tail_header.coinbase,
            H256::zero(),
        );
        record.l2_data = l2_data;
        record.global_exit_root = used_ger;
        self.storage.batches_dal().write_batch(&record).await?;

        match used_ger {
            Some(ger) => {
                self.storage
                    .batches_dal()
                    .write_latest_used_ger(batch, ger)
                    .await?;
            }
            None => self
                .storage
                .tx()
                .delete(tables::LATEST_USED_GERS, &u64_key(batch.0)),
        }
        // The witness covered the discarded blocks.
        self.storage
            .tx()
            .delete(tables::BATCH_WITNESSES, &u64_key(batch.0));
        // The counters keyed by the discarded tail went with the block sweep.
        if self
            .storage
            .batches_dal()
            .get_batch_counters(last)
            .await?
            .is_none()
        {
            self.storage
                .batches_dal()
                .write_batch_counters(last, &HashMap::new())
                .await?;
        }
        Ok(())
    }
}
