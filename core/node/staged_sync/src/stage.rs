use std::fmt;

use cdk_basic_types::L2BlockNumber;
use cdk_dal::Connection;

/// The fixed stage vocabulary, in forward order. Follower-only stages are
/// simply absent from a sequencer's stage list.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StageId {
    L1Watch,
    L1InfoTree,
    L1SequencerSync,
    BatchesDownload,
    Execution,
    Hashing,
    History,
    Datastream,
    Finish,
}

impl StageId {
    /// Key the stage's progress is persisted under.
    pub fn as_str(self) -> &'static str {
        match self {
            StageId::L1Watch => "l1_watch",
            StageId::L1InfoTree => "l1_info_tree",
            StageId::L1SequencerSync => "l1_sequencer_sync",
            StageId::BatchesDownload => "batches_download",
            StageId::Execution => "execution",
            StageId::Hashing => "hashing",
            StageId::History => "history",
            StageId::Datastream => "datastream",
            StageId::Finish => "finish",
        }
    }
}

impl fmt::Display for StageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[async_trait::async_trait]
pub trait Stage: 'static + fmt::Debug + Send + Sync {
    fn id(&self) -> StageId;

    /// Advances the stage from its persisted progress; returns the new
    /// progress block.
    async fn forward(
        &mut self,
        storage: &mut Connection,
        from: L2BlockNumber,
    ) -> anyhow::Result<L2BlockNumber>;

    /// Rolls the stage back so nothing above `to` remains.
    async fn unwind(&mut self, storage: &mut Connection, to: L2BlockNumber)
        -> anyhow::Result<()>;

    /// Drops data below `keep_from`. Optional.
    async fn prune(
        &mut self,
        _storage: &mut Connection,
        _keep_from: L2BlockNumber,
    ) -> anyhow::Result<()> {
        Ok(())
    }
}
