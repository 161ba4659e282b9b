//! Table names. Keys of block- and batch-scoped tables are big-endian u64
//! numbers so that range deletes over a contiguous window stay cheap.

pub const BLOCK_BATCHES: &str = "block_batches";
pub const BATCH_BLOCKS: &str = "batch_blocks";
pub const BLOCKS: &str = "blocks";
pub const EFFECTIVE_GAS_PRICE_PCTS: &str = "effective_gas_price_pcts";
pub const BLOCK_GLOBAL_EXIT_ROOTS: &str = "block_global_exit_roots";
pub const BLOCK_L1_INFO_TREE_INDICES: &str = "block_l1_info_tree_indices";
pub const REUSED_L1_INFO_TREE_INDICES: &str = "reused_l1_info_tree_indices";
pub const BLOCK_INFO_ROOTS: &str = "block_info_roots";

pub const BATCHES: &str = "batches";
pub const BATCH_WITNESSES: &str = "batch_witnesses";
pub const BATCH_COUNTERS: &str = "batch_counters";
pub const LATEST_USED_GERS: &str = "latest_used_gers";
pub const LOCAL_EXIT_ROOTS: &str = "local_exit_roots";
pub const INVALID_BATCHES: &str = "invalid_batches";
pub const LIMBO_BATCHES: &str = "limbo_batches";

pub const L1_INFO_TREE_UPDATES: &str = "l1_info_tree_updates";
pub const L1_INFO_TREE_ROOTS: &str = "l1_info_tree_roots";
pub const L1_INFO_TREE_LEAF_HASHES: &str = "l1_info_tree_leaf_hashes";
pub const SEQUENCED_BATCHES: &str = "sequenced_batches";
pub const VERIFIED_BATCHES: &str = "verified_batches";

pub const FORKS: &str = "forks";
pub const STAGE_PROGRESS: &str = "stage_progress";
pub const META: &str = "meta";

/// Keys inside the [`META`] table.
pub mod meta_keys {
    pub const HIGHEST_SEEN_BATCH: &str = "highest_seen_batch";
    pub const HIGHEST_VERIFIED_BATCH: &str = "highest_verified_batch";
    pub const INJECTED_BATCH: &str = "injected_batch";
    pub const L1_WATCH_PROGRESS: &str = "l1_watch_progress";
}
