use cdk_basic_types::{BatchNumber, L1InfoTreeIndex, H256};
use cdk_storage::{u64_from_key, u64_key};
use cdk_types::{
    l1_events::{BatchVerification, InjectedBatchRecord, SequencedBatch},
    L1InfoTreeUpdate,
};

use crate::{decode_json, encode_json, tables, tables::meta_keys, Connection, DalResult};

#[derive(Debug)]
pub struct L1InfoDal<'a> {
    pub(crate) storage: &'a mut Connection,
}

impl L1InfoDal<'_> {
    /// Persists an info-tree leaf together with the root the tree had after
    /// appending it. Also indexes the leaf hash for duplicate detection.
    pub async fn write_l1_info_tree_update(
        &mut self,
        update: &L1InfoTreeUpdate,
        root: H256,
    ) -> DalResult<()> {
        let encoded = encode_json("l1 info tree update", update)?;
        self.storage
            .tx()
            .put(tables::L1_INFO_TREE_UPDATES, u64_key(update.index.0), encoded);
        self.storage.tx().put(
            tables::L1_INFO_TREE_ROOTS,
            u64_key(update.index.0),
            root.as_bytes().to_vec(),
        );
        self.storage.tx().put(
            tables::L1_INFO_TREE_LEAF_HASHES,
            update.leaf_hash().as_bytes().to_vec(),
            u64_key(update.index.0),
        );
        Ok(())
    }

    pub async fn get_l1_info_tree_update(
        &mut self,
        index: L1InfoTreeIndex,
    ) -> DalResult<Option<L1InfoTreeUpdate>> {
        self.storage
            .tx()
            .get(tables::L1_INFO_TREE_UPDATES, &u64_key(index.0))
            .map(|raw| decode_json("l1 info tree update", &raw))
            .transpose()
    }

    pub async fn get_latest_l1_info_tree_update(
        &mut self,
    ) -> DalResult<Option<L1InfoTreeUpdate>> {
        self.storage
            .tx()
            .last(tables::L1_INFO_TREE_UPDATES)
            .map(|(_, raw)| decode_json("l1 info tree update", &raw))
            .transpose()
    }

    pub async fn get_l1_info_root(&mut self, index: L1InfoTreeIndex) -> DalResult<Option<H256>> {
        Ok(self
            .storage
            .tx()
            .get(tables::L1_INFO_TREE_ROOTS, &u64_key(index.0))
            .map(|raw| H256::from_slice(&raw)))
    }

    pub async fn contains_l1_info_leaf(&mut self, leaf_hash: H256) -> DalResult<bool> {
        Ok(self
            .storage
            .tx()
            .get(tables::L1_INFO_TREE_LEAF_HASHES, leaf_hash.as_bytes())
            .is_some())
    }

    /// Smallest stored index above `last_used` whose timestamp does not
    /// exceed `max_timestamp`.
    pub async fn find_usable_index(
        &mut self,
        last_used: L1InfoTreeIndex,
        max_timestamp: u64,
    ) -> DalResult<Option<L1InfoTreeUpdate>> {
        let entries = self
            .storage
            .tx()
            .range(tables::L1_INFO_TREE_UPDATES, u64_key(last_used.0 + 1)..);
        for (_, raw) in entries {
            let update: L1InfoTreeUpdate = decode_json("l1 info tree update", &raw)?;
            if update.timestamp <= max_timestamp {
                return Ok(Some(update));
            }
            // Timestamps grow with the index; nothing further can qualify.
            break;
        }
        Ok(None)
    }

    pub async fn write_injected_batch(&mut self, record: &InjectedBatchRecord) -> DalResult<()> {
        let encoded = encode_json("injected batch", record)?;
        self.storage.tx().put(
            tables::META,
            meta_keys::INJECTED_BATCH.as_bytes().to_vec(),
            encoded,
        );
        Ok(())
    }

    pub async fn get_injected_batch(&mut self) -> DalResult<Option<InjectedBatchRecord>> {
        self.storage
            .tx()
            .get(tables::META, meta_keys::INJECTED_BATCH.as_bytes())
            .map(|raw| decode_json("injected batch", &raw))
            .transpose()
    }

    pub async fn write_sequenced_batch(&mut self, batch: &SequencedBatch) -> DalResult<()> {
        let encoded = encode_json("sequenced batch", batch)?;
        self.storage
            .tx()
            .put(tables::SEQUENCED_BATCHES, u64_key(batch.batch_number.0), encoded);
        Ok(())
    }

    pub async fn get_sequenced_batch(
        &mut self,
        batch: BatchNumber,
    ) -> DalResult<Option<SequencedBatch>> {
        self.storage
            .tx()
            .get(tables::SEQUENCED_BATCHES, &u64_key(batch.0))
            .map(|raw| decode_json("sequenced batch", &raw))
            .transpose()
    }

    pub async fn highest_sequenced_batch(&mut self) -> DalResult<Option<BatchNumber>> {
        Ok(self
            .storage
            .tx()
            .last(tables::SEQUENCED_BATCHES)
            .map(|(key, _)| BatchNumber(u64_from_key(&key))))
    }

    pub async fn write_batch_verification(
        &mut self,
        verification: &BatchVerification,
    ) -> DalResult<()> {
        let encoded = encode_json("batch verification", verification)?;
        self.storage.tx().put(
            tables::VERIFIED_BATCHES,
            u64_key(verification.batch_number.0),
            encoded,
        );

        // The watermark only ever moves forward.
        if verification.batch_number > self.highest_verified_batch().await? {
            self.storage.tx().put(
                tables::META,
                meta_keys::HIGHEST_VERIFIED_BATCH.as_bytes().to_vec(),
                u64_key(verification.batch_number.0),
            );
        }
        Ok(())
    }

    pub async fn get_batch_verification(
        &mut self,
        batch: BatchNumber,
    ) -> DalResult<Option<BatchVerification>> {
        self.storage
            .tx()
            .get(tables::VERIFIED_BATCHES, &u64_key(batch.0))
            .map(|raw| decode_json("batch verification", &raw))
            .transpose()
    }

    pub async fn highest_verified_batch(&mut self) -> DalResult<BatchNumber> {
        Ok(self
            .storage
            .tx()
            .get(tables::META, meta_keys::HIGHEST_VERIFIED_BATCH.as_bytes())
            .map(|raw| BatchNumber(u64_from_key(&raw)))
            .unwrap_or(BatchNumber(0)))
    }
}
