use cdk_config::EffectiveGasPriceConfig;

use crate::{envy_load, FromEnv};

impl FromEnv for EffectiveGasPriceConfig {
    fn from_env() -> anyhow::Result<Self> {
        let config: EffectiveGasPriceConfig = envy_load("effective_gas_price", "CDK_EFFECTIVE_GAS_PRICE_")?;
        config.validate()?;
        Ok(config)
    }
}
