//! The L1 follower: idempotently ingests rollup events into the store.

use std::{sync::Arc, time::Duration};

use anyhow::Context as _;
use cdk_basic_types::{L1BlockNumber, L1InfoTreeIndex};
use cdk_config::L1WatchConfig;
use cdk_dal::{Connection, ConnectionPool, CoreDal};
use cdk_info_tree::L1InfoTree;
use tokio::sync::watch;

pub use self::client::{HttpL1Client, L1BlockHeader, L1Client, L1ClientError, L1Log};
use self::event_processors::{
    EventProcessor, EventProcessorError, InfoTreeProcessor, InjectedBatchProcessor,
    RollupAdminProcessor, SequenceBatchesProcessor, VerificationProcessor,
};
use self::metrics::METRICS;

mod client;
pub mod events;
mod event_processors;
mod metrics;

#[cfg(test)]
mod tests;

#[derive(Debug)]
struct L1WatchState {
    last_processed_l1_block: L1BlockNumber,
}

#[derive(Debug)]
pub struct L1Watch {
    client: Arc<dyn L1Client>,
    config: L1WatchConfig,
    pool: ConnectionPool,
    last_processed_l1_block: L1BlockNumber,
    event_processors: Vec<Box<dyn EventProcessor>>,
}

impl L1Watch {
    pub async fn new(
        client: Arc<dyn L1Client>,
        config: L1WatchConfig,
        pool: ConnectionPool,
    ) -> anyhow::Result<Self> {
        let mut storage = pool.connection_tagged("l1_watch").await?;
        let state = Self::initialize_state(&config, &mut storage).await?;
        tracing::info!("initialized state: {state:?}");

        let tree = Self::load_info_tree(&mut storage).await?;
        drop(storage);

        let event_processors: Vec<Box<dyn EventProcessor>> = vec![
            Box::new(SequenceBatchesProcessor),
            Box::new(VerificationProcessor::new(config.rollup_id)),
            Box::new(InfoTreeProcessor::new(tree)),
            Box::new(InjectedBatchProcessor),
            Box::new(RollupAdminProcessor::new(config.rollup_id)),
        ];

        Ok(Self {
            client,
            last_processed_l1_block: state.last_processed_l1_block,
            config,
            pool,
            event_processors,
        })
    }

    async fn initialize_state(
        config: &L1WatchConfig,
        storage: &mut Connection,
    ) -> anyhow::Result<L1WatchState> {
        let last_processed_l1_block = match storage.sync_dal().get_l1_watch_progress().await? {
            Some(block) => block,
            None => L1BlockNumber(config.l1_first_block.saturating_sub(1)),
        };
        Ok(L1WatchState {
            last_processed_l1_block,
        })
    }

    async fn load_info_tree(storage: &mut Connection) -> anyhow::Result<L1InfoTree> {
        let mut updates = Vec::new();
        if let Some(latest) = storage.l1_info_dal().get_latest_l1_info_tree_update().await? {
            for index in 1..=latest.index.0 {
                let update = storage
                    .l1_info_dal()
                    .get_l1_info_tree_update(L1InfoTreeIndex(index))
                    .await?
                    .with_context(|| format!("info tree index {index} is missing"))?;
                updates.push(update);
            }
        }
        L1InfoTree::from_updates(&updates).context("failed rebuilding the L1 info tree")
    }

    pub async fn run(mut self, mut stop_receiver: watch::Receiver<bool>) -> anyhow::Result<()> {
        let mut timer = tokio::time::interval(self.config.query_delay());
        let pool = self.pool.clone();

        while !*stop_receiver.borrow_and_update() {
            tokio::select! {
                _ = timer.tick() => { /* continue iterations */ }
                _ = stop_receiver.changed() => break,
            }

            let mut storage = pool.connection_tagged("l1_watch").await?;
            match self.loop_iteration(&mut storage).await {
                Ok(()) => storage.commit().await?,
                Err(EventProcessorError::Fatal(reason)) => {
                    METRICS.errors.inc();
                    anyhow::bail!("L1 follower hit a fatal divergence: {reason}");
                }
                Err(EventProcessorError::Internal(err)) => {
                    METRICS.errors.inc();
                    tracing::error!("Internal error processing new logs: {err:?}");
                    return Err(err);
                }
                Err(err) => {
                    METRICS.errors.inc();
                    tracing::error!("Failed to process new logs: {err}");
                    // The writes of the failed iteration are discarded with
                    // the connection; rewind the in-memory watermark too.
                    self.last_processed_l1_block =
                        Self::initialize_state(&self.config, &mut storage)
                            .await?
                            .last_processed_l1_block;
                }
            }
        }

        tracing::info!("Stop signal received, l1_watch is shutting down");
        Ok(())
    }

    async fn loop_iteration(
        &mut self,
        storage: &mut Connection,
    ) -> Result<(), EventProcessorError> {
        METRICS.l1_poll.inc();
        let to_block = self
            .client
            .get_highest_block(self.config.l1_highest_block_type)
            .await
            .map_err(|err| EventProcessorError::Internal(err.into()))?;
        if to_block <= self.last_processed_l1_block {
            return Ok(());
        }

        let mut from = self.last_processed_l1_block + 1;
        while from <= to_block {
            let chunk_end = L1BlockNumber(
                (from.0 + self.config.l1_block_range - 1).min(to_block.0),
            );
            let logs = self
                .client
                .get_logs(from, chunk_end)
                .await
                .map_err(|err| EventProcessorError::Internal(err.into()))?;

            for processor in &mut self.event_processors {
                processor
                    .process_events(storage, self.client.as_ref(), &logs)
                    .await?;
            }
            storage
                .sync_dal()
                .set_l1_watch_progress(chunk_end)
                .await
                .map_err(|err| EventProcessorError::Database(err.to_string()))?;

            self.last_processed_l1_block = chunk_end;
            from = chunk_end + 1;
        }
        Ok(())
    }

    /// Scans one explicit window; the caller owns the commit. Used by the
    /// recovery tooling and tests.
    pub async fn process_window(
        &mut self,
        storage: &mut Connection,
        from: L1BlockNumber,
        to: L1BlockNumber,
    ) -> anyhow::Result<()> {
        let logs = self
            .client
            .get_logs(from, to)
            .await
            .context("failed fetching the log window")?;
        for processor in &mut self.event_processors {
            processor
                .process_events(storage, self.client.as_ref(), &logs)
                .await
                .map_err(|err| anyhow::anyhow!("{err}"))?;
        }
        Ok(())
    }
}

/// Canned chain for tests.
pub mod testonly {
    use std::sync::Mutex;

    use async_trait::async_trait;
    use cdk_config::L1BlockTag;
    use cdk_types::hasher::keccak256;

    use super::*;

    #[derive(Debug, Default)]
    pub struct MockL1Client {
        inner: Mutex<MockChain>,
    }

    #[derive(Debug, Default)]
    struct MockChain {
        head: u64,
        logs: Vec<L1Log>,
    }

    impl MockL1Client {
        pub fn new() -> Self {
            Self::default()
        }

        pub fn set_head(&self, head: u64) {
            self.inner.lock().expect("mock lock").head = head;
        }

        pub fn push_log(&self, log: L1Log) {
            let mut inner = self.inner.lock().expect("mock lock");
            inner.head = inner.head.max(log.block_number.0);
            inner.logs.push(log);
        }
    }

    #[async_trait]
    impl L1Client for MockL1Client {
        async fn get_highest_block(
            &self,
            _tag: L1BlockTag,
        ) -> Result<L1BlockNumber, L1ClientError> {
            Ok(L1BlockNumber(self.inner.lock().expect("mock lock").head))
        }

        async fn get_logs(
            &self,
            from: L1BlockNumber,
            to: L1BlockNumber,
        ) -> Result<Vec<L1Log>, L1ClientError> {
            Ok(self
                .inner
                .lock()
                .expect("mock lock")
                .logs
                .iter()
                .filter(|log| log.block_number >= from && log.block_number <= to)
                .cloned()
                .collect())
        }

        async fn get_block_header(
            &self,
            number: L1BlockNumber,
        ) -> Result<Option<L1BlockHeader>, L1ClientError> {
            // Deterministic synthetic headers keyed by the block number.
            Ok(Some(L1BlockHeader {
                number,
                hash: keccak256(&number.0.to_be_bytes()),
                parent_hash: keccak256(&number.0.saturating_sub(1).to_be_bytes()),
                timestamp: 1_600_000_000 + number.0 * 12,
            }))
        }
    }

}
