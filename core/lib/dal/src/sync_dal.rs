use cdk_basic_types::{L1BlockNumber, L2BlockNumber};
use cdk_storage::{u64_from_key, u64_key};

use crate::{tables, tables::meta_keys, Connection, DalResult};

#[derive(Debug)]
pub struct SyncDal<'a> {
    pub(crate) storage: &'a mut Connection,
}

impl SyncDal<'_> {
    pub async fn get_stage_progress(
        &mut self,
        stage: &'static str,
    ) -> DalResult<Option<L2BlockNumber>> {
        Ok(self
            .storage
            .tx()
            .get(tables::STAGE_PROGRESS, stage.as_bytes())
            .map(|raw| L2BlockNumber(u64_from_key(&raw))))
    }

    pub async fn set_stage_progress(
        &mut self,
        stage: &'static str,
        block: L2BlockNumber,
    ) -> DalResult<()> {
        self.storage
            .tx()
            .put(tables::STAGE_PROGRESS, stage.as_bytes().to_vec(), u64_key(block.0));
        Ok(())
    }

    /// Last L1 block the follower fully processed.
    pub async fn get_l1_watch_progress(&mut self) -> DalResult<Option<L1BlockNumber>> {
        Ok(self
            .storage
            .tx()
            .get(tables::META, meta_keys::L1_WATCH_PROGRESS.as_bytes())
            .map(|raw| L1BlockNumber(u64_from_key(&raw))))
    }

    pub async fn set_l1_watch_progress(&mut self, block: L1BlockNumber) -> DalResult<()> {
        self.storage.tx().put(
            tables::META,
            meta_keys::L1_WATCH_PROGRESS.as_bytes().to_vec(),
            u64_key(block.0),
        );
        Ok(())
    }
}
