use cdk_basic_types::L1InfoTreeIndex;
use cdk_dal::{Connection, CoreDal};
use cdk_info_tree::L1InfoTree;
use cdk_types::{l1_info_tree::compute_ger, L1InfoTreeUpdate};

use super::{EventProcessor, EventProcessorError};
use crate::{
    client::{L1Client, L1Log},
    events,
    metrics::METRICS,
};

/// Ingests `UpdateL1InfoTree`: composes the GER, assigns the next dense
/// index, appends the leaf and persists leaf + root.
#[derive(Debug)]
pub(crate) struct InfoTreeProcessor {
    tree: L1InfoTree,
}

impl InfoTreeProcessor {
    pub fn new(tree: L1InfoTree) -> Self {
        Self { tree }
    }
}

#[async_trait::async_trait]
impl EventProcessor for InfoTreeProcessor {
    async fn process_events(
        &mut self,
        storage: &mut Connection,
        client: &dyn L1Client,
        logs: &[L1Log],
    ) -> Result<(), EventProcessorError> {
        for log in logs {
            if log.topics.first() != Some(&*events::UPDATE_L1_INFO_TREE) {
                continue;
            }
            let (mainnet_exit_root, rollup_exit_root) = events::decode_update_l1_info_tree(log)
                .map_err(|err| EventProcessorError::log_parse(err, "UpdateL1InfoTree"))?;

            let header = client
                .get_block_header(log.block_number)
                .await
                .map_err(|err| EventProcessorError::Internal(err.into()))?
                .ok_or_else(|| {
                    EventProcessorError::Internal(anyhow::anyhow!(
                        "L1 block {} vanished while resolving an info-tree update",
                        log.block_number
                    ))
                })?;

            let mut update = L1InfoTreeUpdate {
                index: L1InfoTreeIndex(self.tree.leaf_count() + 1),
                ger: compute_ger(mainnet_exit_root, rollup_exit_root),
                mainnet_exit_root,
                rollup_exit_root,
                parent_hash: header.parent_hash,
                timestamp: header.timestamp,
                l1_block_number: log.block_number,
            };

            let leaf_hash = update.leaf_hash();
            if self.tree.contains_leaf(leaf_hash) {
                tracing::warn!(
                    ?leaf_hash,
                    l1_block = %log.block_number,
                    "duplicate info-tree leaf, skipping"
                );
                continue;
            }

            let root = self
                .tree
                .add_leaf(leaf_hash)
                .map_err(|err| EventProcessorError::Internal(err.into()))?;
            update.index = L1InfoTreeIndex(self.tree.leaf_count());
            storage
                .l1_info_dal()
                .write_l1_info_tree_update(&update, root)
                .await
                .map_err(|err| EventProcessorError::Database(err.to_string()))?;
            METRICS.info_tree_updates.inc();
            tracing::info!(index = %update.index, ger = ?update.ger, "info tree update stored");
        }
        Ok(())
    }
}
