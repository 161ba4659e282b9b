use cdk_basic_types::{BatchNumber, L1InfoTreeIndex, L2BlockNumber, H256};
use cdk_storage::{u64_from_key, u64_key};
use cdk_types::SealedL2Block;

use crate::{decode_json, encode_json, tables, Connection, DalResult};

#[derive(Debug)]
pub struct BlocksDal<'a> {
    pub(crate) storage: &'a mut Connection,
}

impl BlocksDal<'_> {
    /// Records that `block` belongs to `batch` and extends the batch's block
    /// window.
    pub async fn write_block_batch(
        &mut self,
        block: L2BlockNumber,
        batch: BatchNumber,
    ) -> DalResult<()> {
        self.storage
            .tx()
            .put(tables::BLOCK_BATCHES, u64_key(block.0), u64_key(batch.0));

        let window = match self.block_window_of_batch(batch).await? {
            Some((first, last)) => (first.min(block), last.max(block)),
            None => (block, block),
        };
        let encoded = encode_json("batch block window", &(window.0 .0, window.1 .0))?;
        self.storage
            .tx()
            .put(tables::BATCH_BLOCKS, u64_key(batch.0), encoded);
        Ok(())
    }

    pub async fn batch_of_block(&mut self, block: L2BlockNumber) -> DalResult<Option<BatchNumber>> {
        Ok(self
            .storage
            .tx()
            .get(tables::BLOCK_BATCHES, &u64_key(block.0))
            .map(|value| BatchNumber(u64_from_key(&value))))
    }

    /// Ordered list of blocks sealed into `batch`.
    pub async fn blocks_of_batch(&mut self, batch: BatchNumber) -> DalResult<Vec<L2BlockNumber>> {
        Ok(match self.block_window_of_batch(batch).await? {
            Some((first, last)) => (first.0..=last.0).map(L2BlockNumber).collect(),
            None => Vec::new(),
        })
    }

    pub async fn highest_block_in_batch(
        &mut self,
        batch: BatchNumber,
    ) -> DalResult<Option<L2BlockNumber>> {
        Ok(self.block_window_of_batch(batch).await?.map(|(_, last)| last))
    }

    pub(crate) async fn block_window_of_batch(
        &mut self,
        batch: BatchNumber,
    ) -> DalResult<Option<(L2BlockNumber, L2BlockNumber)>> {
        let Some(raw) = self.storage.tx().get(tables::BATCH_BLOCKS, &u64_key(batch.0)) else {
            return Ok(None);
        };
        let (first, last): (u64, u64) = decode_json("batch block window", &raw)?;
        Ok(Some((L2BlockNumber(first), L2BlockNumber(last))))
    }

    pub(crate) async fn set_block_window_of_batch(
        &mut self,
        batch: BatchNumber,
        window: Option<(L2BlockNumber, L2BlockNumber)>,
    ) -> DalResult<()> {
        match window {
            Some((first, last)) => {
                let encoded = encode_json("batch block window", &(first.0, last.0))?;
                self.storage
                    .tx()
                    .put(tables::BATCH_BLOCKS, u64_key(batch.0), encoded);
            }
            None => self.storage.tx().delete(tables::BATCH_BLOCKS, &u64_key(batch.0)),
        }
        Ok(())
    }

    pub async fn write_sealed_block(&mut self, block: &SealedL2Block) -> DalResult<()> {
        let encoded = encode_json("sealed block", block)?;
        self.storage
            .tx()
            .put(tables::BLOCKS, u64_key(block.number().0), encoded);
        Ok(())
    }

    pub async fn get_sealed_block(
        &mut self,
        block: L2BlockNumber,
    ) -> DalResult<Option<SealedL2Block>> {
        self.storage
            .tx()
            .get(tables::BLOCKS, &u64_key(block.0))
            .map(|raw| decode_json("sealed block", &raw))
            .transpose()
    }

    pub async fn highest_sealed_block(&mut self) -> DalResult<Option<L2BlockNumber>> {
        Ok(self
            .storage
            .tx()
            .last(tables::BLOCKS)
            .map(|(key, _)| L2BlockNumber(u64_from_key(&key))))
    }

    pub async fn write_effective_gas_price_pct(
        &mut self,
        tx_hash: H256,
        pct: u8,
    ) -> DalResult<()> {
        self.storage.tx().put(
            tables::EFFECTIVE_GAS_PRICE_PCTS,
            tx_hash.as_bytes().to_vec(),
            vec![pct],
        );
        Ok(())
    }

    pub async fn get_effective_gas_price_pct(&mut self, tx_hash: H256) -> DalResult<Option<u8>> {
        Ok(self
            .storage
            .tx()
            .get(tables::EFFECTIVE_GAS_PRICE_PCTS, tx_hash.as_bytes())
            .and_then(|value| value.first().copied()))
    }

    pub async fn write_block_global_exit_root(
        &mut self,
        block: L2BlockNumber,
        ger: H256,
    ) -> DalResult<()> {
        self.storage.tx().put(
            tables::BLOCK_GLOBAL_EXIT_ROOTS,
            u64_key(block.0),
            ger.as_bytes().to_vec(),
        );
        Ok(())
    }

    pub async fn get_block_global_exit_root(
        &mut self,
        block: L2BlockNumber,
    ) -> DalResult<Option<H256>> {
        Ok(self
            .storage
            .tx()
            .get(tables::BLOCK_GLOBAL_EXIT_ROOTS, &u64_key(block.0))
            .map(|raw| H256::from_slice(&raw)))
    }

    pub async fn write_block_l1_info_tree_index(
        &mut self,
        block: L2BlockNumber,
        index: L1InfoTreeIndex,
    ) -> DalResult<()> {
        self.storage.tx().put(
            tables::BLOCK_L1_INFO_TREE_INDICES,
            u64_key(block.0),
            u64_key(index.0),
        );
        Ok(())
    }

    pub async fn get_block_l1_info_tree_index(
        &mut self,
        block: L2BlockNumber,
    ) -> DalResult<Option<L1InfoTreeIndex>> {
        Ok(self
            .storage
            .tx()
            .get(tables::BLOCK_L1_INFO_TREE_INDICES, &u64_key(block.0))
            .map(|raw| L1InfoTreeIndex(u64_from_key(&raw))))
    }

    /// Marks that `block` re-used an info-tree index instead of consuming the
    /// next one (its timestamp was behind the next update).
    pub async fn write_reused_l1_info_tree_index(
        &mut self,
        block: L2BlockNumber,
    ) -> DalResult<()> {
        self.storage
            .tx()
            .put(tables::REUSED_L1_INFO_TREE_INDICES, u64_key(block.0), vec![1]);
        Ok(())
    }

    pub async fn is_reused_l1_info_tree_index(&mut self, block: L2BlockNumber) -> DalResult<bool> {
        Ok(self
            .storage
            .tx()
            .get(tables::REUSED_L1_INFO_TREE_INDICES, &u64_key(block.0))
            .is_some())
    }

    pub async fn write_block_info_root(
        &mut self,
        block: L2BlockNumber,
        root: H256,
    ) -> DalResult<()> {
        self.storage.tx().put(
            tables::BLOCK_INFO_ROOTS,
            u64_key(block.0),
            root.as_bytes().to_vec(),
        );
        Ok(())
    }

    pub async fn get_block_info_root(&mut self, block: L2BlockNumber) -> DalResult<Option<H256>> {
        Ok(self
            .storage
            .tx()
            .get(tables::BLOCK_INFO_ROOTS, &u64_key(block.0))
            .map(|raw| H256::from_slice(&raw)))
    }
}
