use serde::{Deserialize, Serialize};

/// Effective-gas-price factors per transaction category, each in `[0.0, 1.0]`
/// and mapped to the on-chain percentage byte by `round(x * 255)`.
#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
pub struct EffectiveGasPriceConfig {
    pub eth_transfer: f64,
    pub erc20_transfer: f64,
    pub contract_invocation: f64,
    pub contract_deployment: f64,
}

impl EffectiveGasPriceConfig {
    pub fn validate(&self) -> anyhow::Result<()> {
        for (name, value) in [
            ("eth_transfer", self.eth_transfer),
            ("erc20_transfer", self.erc20_transfer),
            ("contract_invocation", self.contract_invocation),
            ("contract_deployment", self.contract_deployment),
        ] {
            anyhow::ensure!(
                (0.0..=1.0).contains(&value),
                "effective gas price factor `{name}` = {value} is out of [0.0, 1.0]"
            );
        }
        Ok(())
    }

    /// Maps a factor to the byte that travels with the transaction.
    pub fn to_pct(value: f64) -> u8 {
        (value * 255.0).round() as u8
    }
}

impl EffectiveGasPriceConfig {
    /// Creates a mock configuration object suitable for unit tests.
    pub fn for_tests() -> Self {
        Self {
            eth_transfer: 1.0,
            erc20_transfer: 1.0,
            contract_invocation: 1.0,
            contract_deployment: 1.0,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pct_mapping_hits_byte_bounds() {
        assert_eq!(EffectiveGasPriceConfig::to_pct(0.0), 0);
        assert_eq!(EffectiveGasPriceConfig::to_pct(1.0), 255);
        assert_eq!(EffectiveGasPriceConfig::to_pct(0.5), 128);
    }

    #[test]
    fn out_of_range_factor_is_rejected() {
        let mut config = EffectiveGasPriceConfig::for_tests();
        config.erc20_transfer = 1.5;
        assert!(config.validate().is_err());
    }
}
