use cdk_dal::{Connection, CoreDal};

use super::{EventProcessor, EventProcessorError};
use crate::{
    client::{L1Client, L1Log},
    events,
    metrics::METRICS,
};

/// Ingests batch verifications (pre-Etrog, Etrog and Validium-Etrog; the
/// Etrog forms are filtered by rollup id) and cross-validates local state
/// roots against the verified ones.
#[derive(Debug)]
pub(crate) struct VerificationProcessor {
    rollup_id: u64,
}

impl VerificationProcessor {
    pub fn new(rollup_id: u64) -> Self {
        Self { rollup_id }
    }
}

#[async_trait::async_trait]
impl EventProcessor for VerificationProcessor {
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
            let verification = if *topic0 == *events::VERIFY_BATCHES_PRE_ETROG {
                events::decode_verify_batches_pre_etrog(log)
                    .map_err(|err| EventProcessorError::log_parse(err, "Verification"))?
            } else if *topic0 == *events::VERIFY_BATCHES_ETROG
                || *topic0 == *events::VERIFY_BATCHES_VALIDIUM_ETROG
            {
                let (rollup_id, verification) = events::decode_verify_batches_etrog(log)
                    .map_err(|err| EventProcessorError::log_parse(err, "Verification"))?;
                if rollup_id != self.rollup_id {
                    continue;
                }
                verification
            } else {
                continue;
            };

            storage
                .l1_info_dal()
                .write_batch_verification(&verification)
                .await
                .map_err(|err| EventProcessorError::Database(err.to_string()))?;
            METRICS.verifications.inc();

            // Compare against the locally hashed block, if we produced one.
            let local_block = storage
                .blocks_dal()
                .highest_block_in_batch(verification.batch_number)
                .await
                .map_err(|err| EventProcessorError::Database(err.to_string()))?;
            if let Some(block) = local_block {
                let sealed = storage
                    .blocks_dal()
                    .get_sealed_block(block)
                    .await
                    .map_err(|err| EventProcessorError::Database(err.to_string()))?;
                if let Some(sealed) = sealed {
                    if sealed.header.state_root != verification.state_root {
                        return Err(EventProcessorError::Fatal(format!(
                            "state root of batch {} diverges from L1: local {:?}, verified {:?}",
                            verification.batch_number,
                            sealed.header.state_root,
                            verification.state_root,
                        )));
                    }
                    tracing::info!(
                        batch = %verification.batch_number,
                        "local state root matches the L1 verification"
                    );
                }
            }
        }
        Ok(())
    }
}
