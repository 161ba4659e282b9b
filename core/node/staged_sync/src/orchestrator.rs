use cdk_basic_types::L2BlockNumber;
use cdk_dal::{ConnectionPool, CoreDal};

use crate::stage::Stage;

#[derive(Debug)]
pub struct StagedSync {
    pool: ConnectionPool,
    stages: Vec<Box<dyn Stage>>,
}

impl StagedSync {
    pub fn new(pool: ConnectionPool, stages: Vec<Box<dyn Stage>>) -> Self {
        Self { pool, stages }
    }

    /// One forward sweep, bottom-up. Each stage starts from its persisted
    /// progress; the new progress is persisted before the next stage runs.
    pub async fn run_once(&mut self) -> anyhow::Result<()> {
        for stage in &mut self.stages {
            let mut storage = self.pool.connection_tagged("staged_sync").await?;
            let from = storage
                .sync_dal()
                .get_stage_progress(stage.id().as_str())
                .await?
                .unwrap_or(L2BlockNumber(0));
            let to = stage.forward(&mut storage, from).await?;
            if to != from {
                tracing::info!(stage = %stage.id(), %from, %to, "stage advanced");
            }
            storage
                .sync_dal()
                .set_stage_progress(stage.id().as_str(), to)
                .await?;
            storage.commit().await?;
        }
        Ok(())
    }

    /// Unwinds every stage to `target`, in reverse stage order, clamping the
    /// persisted progress as it goes.
    pub async fn unwind_to(&mut self, target: L2BlockNumber) -> anyhow::Result<()> {
        for stage in self.stages.iter_mut().rev() {
            let mut storage = self.pool.connection_tagged("staged_sync").await?;
            let progress = storage
                .sync_dal()
                .get_stage_progress(stage.id().as_str())
                .await?
                .unwrap_or(L2BlockNumber(0));
            if progress > target {
                tracing::info!(stage = %stage.id(), %progress, %target, "stage unwinding");
                stage.unwind(&mut storage, target).await?;
                storage
                    .sync_dal()
                    .set_stage_progress(stage.id().as_str(), target)
                    .await?;
            }
            storage.commit().await?;
        }
        Ok(())
    }

    /// Prunes every stage below `keep_from`, bottom-up.
    pub async fn prune(&mut self, keep_from: L2BlockNumber) -> anyhow::Result<()> {
        for stage in &mut self.stages {
            let mut storage = self.pool.connection_tagged("staged_sync").await?;
            stage.prune(&mut storage, keep_from).await?;
            storage.commit().await?;
        }
        Ok(())
    }
}
