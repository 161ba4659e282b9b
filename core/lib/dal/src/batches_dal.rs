use std::collections::HashMap;

use cdk_basic_types::{BatchNumber, L2BlockNumber, H256};
use cdk_storage::{u64_from_key, u64_key};
use cdk_types::Batch;

use crate::{decode_json, encode_json, tables, tables::meta_keys, Connection, DalResult};

#[derive(Debug)]
pub struct BatchesDal<'a> {
    pub(crate) storage: &'a mut Connection,
}

impl BatchesDal<'_> {
    pub async fn write_batch(&mut self, batch: &Batch) -> DalResult<()> {
        let encoded = encode_json("batch", batch)?;
        self.storage
            .tx()
            .put(tables::BATCHES, u64_key(batch.number.0), encoded);
        Ok(())
    }

    pub async fn get_batch(&mut self, number: BatchNumber) -> DalResult<Option<Batch>> {
        self.storage
            .tx()
            .get(tables::BATCHES, &u64_key(number.0))
            .map(|raw| decode_json("batch", &raw))
            .transpose()
    }

    /// The highest batch number the sequencer has produced or learned about.
    pub async fn highest_seen_batch(&mut self) -> DalResult<BatchNumber> {
        Ok(self
            .storage
            .tx()
            .get(tables::META, meta_keys::HIGHEST_SEEN_BATCH.as_bytes())
            .map(|raw| BatchNumber(u64_from_key(&raw)))
            .unwrap_or(BatchNumber(0)))
    }

    pub async fn set_highest_seen_batch(&mut self, batch: BatchNumber) -> DalResult<()> {
        self.storage.tx().put(
            tables::META,
            meta_keys::HIGHEST_SEEN_BATCH.as_bytes().to_vec(),
            u64_key(batch.0),
        );
        Ok(())
    }

    /// Marks a recovery batch whose decoded contents cannot be replayed.
    pub async fn write_invalid_batch(&mut self, batch: BatchNumber) -> DalResult<()> {
        self.storage
            .tx()
            .put(tables::INVALID_BATCHES, u64_key(batch.0), vec![1]);
        Ok(())
    }

    pub async fn is_invalid_batch(&mut self, batch: BatchNumber) -> DalResult<bool> {
        Ok(self
            .storage
            .tx()
            .get(tables::INVALID_BATCHES, &u64_key(batch.0))
            .is_some())
    }

    pub async fn write_witness(&mut self, batch: BatchNumber, witness: &[u8]) -> DalResult<()> {
        self.storage
            .tx()
            .put(tables::BATCH_WITNESSES, u64_key(batch.0), witness.to_vec());
        Ok(())
    }

    pub async fn get_witness(&mut self, batch: BatchNumber) -> DalResult<Option<Vec<u8>>> {
        Ok(self.storage.tx().get(tables::BATCH_WITNESSES, &u64_key(batch.0)))
    }

    /// Counters are keyed by the batch's last block so that unwind can sweep
    /// them with the same contiguous block window as everything else.
    pub async fn write_batch_counters(
        &mut self,
        block: L2BlockNumber,
        counters: &HashMap<String, u64>,
    ) -> DalResult<()> {
        let encoded = encode_json("batch counters", counters)?;
        self.storage
            .tx()
            .put(tables::BATCH_COUNTERS, u64_key(block.0), encoded);
        Ok(())
    }

    pub async fn get_batch_counters(
        &mut self,
        block: L2BlockNumber,
    ) -> DalResult<Option<HashMap<String, u64>>> {
        self.storage
            .tx()
            .get(tables::BATCH_COUNTERS, &u64_key(block.0))
            .map(|raw| decode_json("batch counters", &raw))
            .transpose()
    }

    pub async fn write_latest_used_ger(&mut self, batch: BatchNumber, ger: H256) -> DalResult<()> {
        self.storage.tx().put(
            tables::LATEST_USED_GERS,
            u64_key(batch.0),
            ger.as_bytes().to_vec(),
        );
        Ok(())
    }

    pub async fn get_latest_used_ger(&mut self, batch: BatchNumber) -> DalResult<Option<H256>> {
        Ok(self
            .storage
            .tx()
            .get(tables::LATEST_USED_GERS, &u64_key(batch.0))
            .map(|raw| H256::from_slice(&raw)))
    }

    pub async fn write_local_exit_root(
        &mut self,
        batch: BatchNumber,
        root: H256,
    ) -> DalResult<()> {
        self.storage.tx().put(
            tables::LOCAL_EXIT_ROOTS,
            u64_key(batch.0),
            root.as_bytes().to_vec(),
        );
        Ok(())
    }

    pub async fn get_local_exit_root(&mut self, batch: BatchNumber) -> DalResult<Option<H256>> {
        Ok(self
            .storage
            .tx()
            .get(tables::LOCAL_EXIT_ROOTS, &u64_key(batch.0))
            .map(|raw| H256::from_slice(&raw)))
    }

    /// Records the limbo handoff for a batch rejected by the verifier.
    pub async fn write_limbo_batch(
        &mut self,
        batch: BatchNumber,
        timestamp: u64,
        tx_hash: H256,
    ) -> DalResult<()> {
        let encoded = encode_json("limbo batch", &(timestamp, tx_hash))?;
        self.storage
            .tx()
            .put(tables::LIMBO_BATCHES, u64_key(batch.0), encoded);
        Ok(())
    }

    pub async fn get_limbo_batch(
        &mut self,
        batch: BatchNumber,
    ) -> DalResult<Option<(u64, H256)>> {
        self.storage
            .tx()
            .get(tables::LIMBO_BATCHES, &u64_key(batch.0))
            .map(|raw| decode_json("limbo batch", &raw))
            .transpose()
    }
}
