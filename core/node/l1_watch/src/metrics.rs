//! Metrics for the L1 follower.

use vise::{Counter, Metrics};

#[derive(Debug, Metrics)]
#[metrics(prefix = "cdk_l1_watch")]
pub(crate) struct L1WatchMetrics {
    /// Number of times L1 was polled.
    pub l1_poll: Counter,

    /// Number of sequenced-batch events processed.
    pub sequenced_batches: Counter,

    /// Number of verification events processed.
    pub verifications: Counter,

    /// Number of info-tree updates stored.
    pub info_tree_updates: Counter,

    /// Number of errors encountered (e.g., network failures, internal issues).
    pub errors: Counter,
}

#[vise::register]
pub(crate) static METRICS: vise::Global<L1WatchMetrics> = vise::Global::new();
