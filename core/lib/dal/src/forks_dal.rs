use cdk_basic_types::{BatchNumber, ForkId};
use cdk_storage::{u64_from_key, u64_key};

use crate::{tables, Connection, DalError, DalResult};

#[derive(Debug)]
pub struct ForksDal<'a> {
    pub(crate) storage: &'a mut Connection,
}

impl ForksDal<'_> {
    /// Records that `fork_id` takes effect from `from_batch`. Fork ids are
    /// non-decreasing; re-announcing a known fork is a no-op as long as the
    /// activation batch matches.
    pub async fn write_fork(&mut self, fork_id: ForkId, from_batch: BatchNumber) -> DalResult<()> {
        if let Some(existing) = self.fork_activation(fork_id).await? {
            if existing != from_batch {
                return Err(DalError::Constraint(format!(
                    "fork {fork_id} already active from batch {existing}, refusing to move it to {from_batch}"
                )));
            }
            return Ok(());
        }
        if let Some(latest) = self.latest_fork_id().await? {
            if fork_id < latest {
                return Err(DalError::Constraint(format!(
                    "fork ids are non-decreasing: got {fork_id} after {latest}"
                )));
            }
        }
        self.storage
            .tx()
            .put(tables::FORKS, u64_key(fork_id.0 as u64), u64_key(from_batch.0));
        Ok(())
    }

    pub async fn fork_activation(&mut self, fork_id: ForkId) -> DalResult<Option<BatchNumber>> {
        Ok(self
            .storage
            .tx()
            .get(tables::FORKS, &u64_key(fork_id.0 as u64))
            .map(|raw| BatchNumber(u64_from_key(&raw))))
    }

    /// The fork in force for `batch`: the highest fork activated at or below
    /// it.
    pub async fn fork_id_for_batch(&mut self, batch: BatchNumber) -> DalResult<Option<ForkId>> {
        let mut result = None;
        for (key, raw) in self.storage.tx().range(tables::FORKS, ..) {
            let activation = BatchNumber(u64_from_key(&raw));
            if activation <= batch {
                result = Some(ForkId(u64_from_key(&key) as u16));
            }
        }
        Ok(result)
    }

    pub async fn latest_fork_id(&mut self) -> DalResult<Option<ForkId>> {
        Ok(self
            .storage
            .tx()
            .last(tables::FORKS)
            .map(|(key, _)| ForkId(u64_from_key(&key) as u16)))
    }
}
