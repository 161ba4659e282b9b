use cdk_config::SequencerConfig;

use crate::{envy_load, FromEnv};

impl FromEnv for SequencerConfig {
    fn from_env() -> anyhow::Result<Self> {
        envy_load("sequencer", "CDK_SEQUENCER_")
    }
}
