use std::fmt;

use cdk_dal::Connection;

use crate::client::{L1Client, L1Log};

pub(crate) use self::{
    info_tree::InfoTreeProcessor, injected_batch::InjectedBatchProcessor,
    rollup_admin::RollupAdminProcessor, sequence_batches::SequenceBatchesProcessor,
    verification::VerificationProcessor,
};

mod info_tree;
mod injected_batch;
mod rollup_admin;
mod sequence_batches;
mod verification;

#[derive(Debug, thiserror::Error)]
pub(crate) enum EventProcessorError {
    #[error("failed parsing a log into {msg_kind}: {source:?}")]
    LogParse {
        msg_kind: &'static str,
        #[source]
        source: anyhow::Error,
    },
    #[error("database error: {0}")]
    Database(String),
    /// Divergence from L1 truth; the node must stop rather than continue.
    #[error("fatal divergence: {0}")]
    Fatal(String),
    #[error("internal processing error: {0:?}")]
    Internal(#[from] anyhow::Error),
}

impl EventProcessorError {
    pub fn log_parse(source: impl Into<anyhow::Error>, msg_kind: &'static str) -> Self {
        Self::LogParse {
            msg_kind,
            source: source.into(),
        }
    }
}

#[async_trait::async_trait]
pub(crate) trait EventProcessor: 'static + fmt::Debug + Send + Sync {
    async fn process_events(
        &mut self,
        storage: &mut Connection,
        client: &dyn L1Client,
        logs: &[L1Log],
    ) -> Result<(), EventProcessorError>;
}
