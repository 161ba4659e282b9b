use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Block tag used when resolving the highest L1 block to follow.
#[derive(Debug, Deserialize, Serialize, Clone, Copy, PartialEq, Default)]
#[serde(rename_all = "lowercase")]
pub enum L1BlockTag {
    Latest,
    Safe,
    #[default]
    Finalized,
}

impl L1BlockTag {
    pub fn as_str(self) -> &'static str {
        match self {
            L1BlockTag::Latest => "latest",
            L1BlockTag::Safe => "safe",
            L1BlockTag::Finalized => "finalized",
        }
    }
}

/// Configuration for the L1 follower.
#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
pub struct L1WatchConfig {
    /// URL of the L1 JSON-RPC endpoint.
    pub rpc_url: String,

    /// First L1 block the follower scans from on a fresh database.
    pub l1_first_block: u64,

    /// Size of the block window requested per `eth_getLogs` call.
    pub l1_block_range: u64,

    /// Delay between follower iterations.
    /// Value in milliseconds.
    pub l1_query_delay_ms: u64,

    /// Tag resolving the upper bound of a scan window.
    pub l1_highest_block_type: L1BlockTag,

    /// Rollup id the verification events are filtered by.
    pub rollup_id: u64,
}

impl L1WatchConfig {
    pub fn query_delay(&self) -> Duration {
        Duration::from_millis(self.l1_query_delay_ms)
    }
}

impl L1WatchConfig {
    /// Creates a mock configuration object suitable for unit tests.
    pub fn for_tests() -> Self {
        Self {
            rpc_url: "http://localhost:8545".to_string(),
            l1_first_block: 1,
            l1_block_range: 1000,
            l1_query_delay_ms: 100,
            l1_highest_block_type: L1BlockTag::Latest,
            rollup_id: 1,
        }
    }
}
