use std::collections::HashMap;

use cdk_basic_types::{BatchNumber, ForkId};
use cdk_dal::{Connection, CoreDal};
use cdk_types::l1_events::RollupAdminEvent;

use super::{EventProcessor, EventProcessorError};
use crate::{
    client::{L1Client, L1Log},
    events,
};

/// Ingests rollup administration events and maintains the fork-id history.
#[derive(Debug)]
pub(crate) struct RollupAdminProcessor {
    rollup_id: u64,
    /// Fork ids per announced rollup type.
    rollup_types: HashMap<u64, ForkId>,
}

impl RollupAdminProcessor {
    pub fn new(rollup_id: u64) -> Self {
        Self {
            rollup_id,
            rollup_types: HashMap::new(),
        }
    }
}

#[async_trait::async_trait]
impl EventProcessor for RollupAdminProcessor {
    async fn process_events(
        &mut self,
        storage: &mut Connection,
        _client: &dyn L1Client,
        logs: &[L1Log],
    ) -> Result<(), EventProcessorError> {
        for log in logs {
            let Some(topic0) = log.topics.first() else {
                continue;
            };
            let event = if *topic0 == *events::ADD_NEW_ROLLUP_TYPE {
                events::decode_add_new_rollup_type(log)
                    .map_err(|err| EventProcessorError::log_parse(err, "AddNewRollupType"))?
            } else if *topic0 == *events::CREATE_NEW_ROLLUP {
                events::decode_create_new_rollup(log)
                    .map_err(|err| EventProcessorError::log_parse(err, "CreateNewRollup"))?
            } else if *topic0 == *events::UPDATE_ROLLUP {
                events::decode_update_rollup(log)
                    .map_err(|err| EventProcessorError::log_parse(err, "UpdateRollup"))?
            } else {
                continue;
            };

            match event {
                RollupAdminEvent::AddNewRollupType {
                    rollup_type_id,
                    fork_id,
                    ..
                } => {
                    self.rollup_types.insert(rollup_type_id, fork_id);
                }
                RollupAdminEvent::CreateNewRollup {
                    rollup_id, fork_id, ..
                } => {
                    if rollup_id != self.rollup_id {
                        continue;
                    }
                    storage
                        .forks_dal()
                        .write_fork(fork_id, BatchNumber(1))
                        .await
                        .map_err(|err| EventProcessorError::Database(err.to_string()))?;
                    tracing::info!(%fork_id, "rollup created on L1 with its genesis fork");
                }
                RollupAdminEvent::UpdateRollup {
                    rollup_id,
                    new_fork_id,
                    from_batch,
                    ..
                } => {
                    if rollup_id != self.rollup_id {
                        continue;
                    }
                    storage
                        .forks_dal()
                        .write_fork(new_fork_id, from_batch)
                        .await
                        .map_err(|err| EventProcessorError::Database(err.to_string()))?;
                    tracing::info!(
                        fork_id = %new_fork_id,
                        %from_batch,
                        "fork transition learned from L1"
                    );
                }
            }
        }
        Ok(())
    }
}
