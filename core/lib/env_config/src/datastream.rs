use cdk_config::DatastreamConfig;

use crate::{envy_load, FromEnv};

impl FromEnv for DatastreamConfig {
    fn from_env() -> anyhow::Result<Self> {
        envy_load("datastream", "CDK_DATASTREAM_")
    }
}
