//! Stock stage implementations. Externally-driven stages (the L1 watcher
//! task, the keeper) surface through [`PassiveStage`], which only mirrors a
//! progress value; [`ExecutionStage`] and [`DatastreamStage`] own the real
//! unwind machinery.

use cdk_basic_types::L2BlockNumber;
use cdk_dal::{Connection, CoreDal};
use cdk_datastream::StreamWriter;

use crate::stage::{Stage, StageId};

/// A stage whose forward progress is produced by an external task; the
/// orchestrator only tracks and clamps it.
#[derive(Debug)]
pub struct PassiveStage {
    id: StageId,
}

impl PassiveStage {
    pub fn new(id: StageId) -> Self {
        Self { id }
    }
}

#[async_trait::async_trait]
impl Stage for PassiveStage {
    fn id(&self) -> StageId {
        self.id
    }

    async fn forward(
        &mut self,
        _storage: &mut Connection,
        from: L2BlockNumber,
    ) -> anyhow::Result<L2BlockNumber> {
        Ok(from)
    }

    async fn unwind(
        &mut self,
        _storage: &mut Connection,
        _to: L2BlockNumber,
    ) -> anyhow::Result<()> {
        Ok(())
    }
}

/// The execution stage: progress is written by the keeper; unwind sweeps the
/// block-scoped store tables.
#[derive(Debug, Default)]
pub struct ExecutionStage;

#[async_trait::async_trait]
impl Stage for ExecutionStage {
    fn id(&self) -> StageId {
        StageId::Execution
    }

    async fn forward(
        &mut self,
        _storage: &mut Connection,
        from: L2BlockNumber,
    ) -> anyhow::Result<L2BlockNumber> {
        Ok(from)
    }

    async fn unwind(&mut self, storage: &mut Connection, to: L2BlockNumber) -> anyhow::Result<()> {
        storage.unwind_dal().unwind_to_block(to).await?;
        Ok(())
    }
}

/// The datastream stage. Its reverse-order position guarantees the stream is
/// truncated before the execution stage's state unwind runs.
#[derive(Debug)]
pub struct DatastreamStage {
    stream: StreamWriter,
}

impl DatastreamStage {
    pub fn new(stream: StreamWriter) -> Self {
        Self { stream }
    }

    pub fn stream(&self) -> &StreamWriter {
        &self.stream
    }
}

#[async_trait::async_trait]
impl Stage for DatastreamStage {
    fn id(&self) -> StageId {
        StageId::Datastream
    }

    async fn forward(
        &mut self,
        _storage: &mut Connection,
        _from: L2BlockNumber,
    ) -> anyhow::Result<L2BlockNumber> {
        Ok(L2BlockNumber(self.stream.highest_block().unwrap_or(0)))
    }

    async fn unwind(
        &mut self,
        _storage: &mut Connection,
        to: L2BlockNumber,
    ) -> anyhow::Result<()> {
        // Remove every block above the target; the bookmark of `to + 1` is
        // the cut point.
        if self.stream.highest_block().unwrap_or(0) > to.0 {
            self.stream.unwind_to_block(to.0 + 1)?;
        }
        Ok(())
    }
}
