use cdk_dal::{Connection, CoreDal};

use super::{EventProcessor, EventProcessorError};
use crate::{
    client::{L1Client, L1Log},
    events,
    metrics::METRICS,
};

/// Ingests `SequenceBatches` in both its pre-Etrog and Etrog forms.
#[derive(Debug, Default)]
pub(crate) struct SequenceBatchesProcessor;

#[async_trait::async_trait]
impl EventProcessor for SequenceBatchesProcessor {
    async fn process_events(
        &mut self,
        storage: &mut Connection,
        client: &dyn L1Client,
        logs: &[L1Log],
    ) -> Result<(), EventProcessorError> {
        for log in logs {
            let Some(topic0) = log.topics.first() else {
                continue;
            };
            let mut sequenced = if *topic0 == *events::SEQUENCE_BATCHES_PRE_ETROG {
                events::decode_sequence_batches_pre_etrog(log)
                    .map_err(|err| EventProcessorError::log_parse(err, "SequenceBatches"))?
            } else if *topic0 == *events::SEQUENCE_BATCHES_ETROG {
                events::decode_sequence_batches_etrog(log)
                    .map_err(|err| EventProcessorError::log_parse(err, "SequenceBatches"))?
            } else {
                continue;
            };

            // The replay timestamp ceiling is the sequencing block's own
            // timestamp.
            let header = client
                .get_block_header(log.block_number)
                .await
                .map_err(|err| EventProcessorError::Internal(err.into()))?;
            sequenced.timestamp_limit = header.map(|header| header.timestamp);

            tracing::debug!(
                batch = %sequenced.batch_number,
                l1_block = %sequenced.l1_block_number,
                "sequenced batch observed on L1"
            );
            storage
                .l1_info_dal()
                .write_sequenced_batch(&sequenced)
                .await
                .map_err(|err| EventProcessorError::Database(err.to_string()))?;
            METRICS.sequenced_batches.inc();
        }
        Ok(())
    }
}
