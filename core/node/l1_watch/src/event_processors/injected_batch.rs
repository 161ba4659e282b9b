use cdk_dal::{Connection, CoreDal};
use cdk_types::l1_events::InjectedBatchRecord;

use super::{EventProcessor, EventProcessorError};
use crate::{
    client::{L1Client, L1Log},
    events,
};

/// Ingests `InitialSequenceBatches`: the genesis seed transaction whose
/// block timestamp is dictated by L1.
#[derive(Debug, Default)]
pub(crate) struct InjectedBatchProcessor;

#[async_trait::async_trait]
impl EventProcessor for InjectedBatchProcessor {
    async fn process_events(
        &mut self,
        storage: &mut Connection,
        client: &dyn L1Client,
        logs: &[L1Log],
    ) -> Result<(), EventProcessorError> {
        for log in logs {
            if log.topics.first() != Some(&*events::INITIAL_SEQUENCE_BATCHES) {
                continue;
            }
            if storage
                .l1_info_dal()
                .get_injected_batch()
                .await
                .map_err(|err| EventProcessorError::Database(err.to_string()))?
                .is_some()
            {
                tracing::warn!("injected batch already recorded, skipping re-announcement");
                continue;
            }

            let (transaction, sequencer) = events::decode_initial_sequence_batches(log)
                .map_err(|err| EventProcessorError::log_parse(err, "InitialSequenceBatches"))?;
            let header = client
                .get_block_header(log.block_number)
                .await
                .map_err(|err| EventProcessorError::Internal(err.into()))?
                .ok_or_else(|| {
                    EventProcessorError::Internal(anyhow::anyhow!(
                        "L1 block {} vanished while resolving the injected batch",
                        log.block_number
                    ))
                })?;

            let record = InjectedBatchRecord {
                l1_block_number: log.block_number,
                l1_block_hash: header.hash,
                timestamp: header.timestamp,
                sequencer,
                transaction,
            };
            storage
                .l1_info_dal()
                .write_injected_batch(&record)
                .await
                .map_err(|err| EventProcessorError::Database(err.to_string()))?;
            tracing::info!(
                l1_block = %record.l1_block_number,
                sequencer = ?record.sequencer,
                "injected batch recorded"
            );
        }
        Ok(())
    }
}
