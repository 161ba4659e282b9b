use cdk_config::ExecutorConfig;

use crate::{envy_load, FromEnv};

impl FromEnv for ExecutorConfig {
    fn from_env() -> anyhow::Result<Self> {
        envy_load("executor", "CDK_EXECUTOR_")
    }
}
