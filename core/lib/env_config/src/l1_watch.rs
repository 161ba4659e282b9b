use cdk_config::L1WatchConfig;

use crate::{envy_load, FromEnv};

impl FromEnv for L1WatchConfig {
    fn from_env() -> anyhow::Result<Self> {
        envy_load("l1_watch", "CDK_L1_WATCH_")
    }
}
