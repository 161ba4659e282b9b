//! The declaration of the most primitive types used in the CDK node.
//!
//! Most of them are just re-exported from the `ethabi` crate to keep a
//! single source of truth for Ethereum-compatible primitives.

use std::{fmt, num::ParseIntError, ops, str::FromStr};

pub use ethabi::{
    self,
    ethereum_types::{Address, Bloom, H160, H256, U256, U64},
};
use serde::{Deserialize, Serialize};

pub mod conversions;

/// Produces a u64-backed domain number newtype with the arithmetic and
/// formatting impls the node relies on.
macro_rules! basic_type {
    ($(#[$attr:meta])* $name:ident, $type:ty) => {
        $(#[$attr])*
        #[derive(
            Debug, Clone, Copy, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
        )]
        pub struct $name(pub $type);

        impl $name {
            pub fn next(self) -> $name {
                $name(self.0 + 1)
            }

            pub fn checked_sub(self, other: $type) -> Option<$name> {
                self.0.checked_sub(other).map($name)
            }

            pub fn saturating_sub(self, other: $type) -> $name {
                $name(self.0.saturating_sub(other))
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                fmt::Display::fmt(&self.0, f)
            }
        }

        impl FromStr for $name {
            type Err = ParseIntError;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                s.parse::<$type>().map(Self)
            }
        }

        impl From<$type> for $name {
            fn from(value: $type) -> Self {
                Self(value)
            }
        }

        impl From<$name> for $type {
            fn from(value: $name) -> Self {
                value.0
            }
        }

        impl ops::Add<$type> for $name {
            type Output = Self;

            fn add(self, other: $type) -> Self {
                Self(self.0 + other)
            }
        }

        impl ops::AddAssign<$type> for $name {
            fn add_assign(&mut self, other: $type) {
                self.0 += other;
            }
        }

        impl ops::Sub<$type> for $name {
            type Output = Self;

            fn sub(self, other: $type) -> Self {
                Self(self.0 - other)
            }
        }
    };
}

basic_type!(
    /// Number of a batch, the unit a zk proof is produced for.
    BatchNumber,
    u64
);

basic_type!(
    /// Number of an L2 block inside a batch.
    L2BlockNumber,
    u64
);

basic_type!(
    /// Number of a block on the settlement layer.
    L1BlockNumber,
    u64
);

basic_type!(
    /// Dense index into the L1 info tree. Index 0 is the "unused" sentinel.
    L1InfoTreeIndex,
    u64
);

impl L1InfoTreeIndex {
    /// The sentinel meaning "this block consumed no info-tree update".
    pub const UNUSED: L1InfoTreeIndex = L1InfoTreeIndex(0);

    pub fn is_unused(self) -> bool {
        self.0 == 0
    }
}

/// Identifier of the execution rules in force from a given batch onward.
/// Transitions are non-decreasing.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
pub struct ForkId(pub u16);

impl ForkId {
    /// Block info roots are only committed to headers from this fork on.
    pub const BLOCK_INFO_ROOT: ForkId = ForkId(7);
    /// Empty `LOG*` elision stops and the large block gas limit starts here.
    pub const EXTENDED_GAS_LIMIT: ForkId = ForkId(8);
    /// The SHA-256 virtual counter exists from this fork on.
    pub const SHA256_COUNTER: ForkId = ForkId(9);

    /// Gas limit of a block under this fork's rules.
    pub fn block_gas_limit(self) -> u64 {
        if self >= Self::EXTENDED_GAS_LIMIT {
            1_125_899_906_842_624
        } else {
            30_000_000
        }
    }

    pub fn supports_block_info_root(self) -> bool {
        self >= Self::BLOCK_INFO_ROOT
    }

    pub fn supports_sha256_counter(self) -> bool {
        self >= Self::SHA256_COUNTER
    }

    pub fn elides_empty_logs(self) -> bool {
        self < Self::EXTENDED_GAS_LIMIT
    }
}

impl fmt::Display for ForkId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&self.0, f)
    }
}

impl From<u16> for ForkId {
    fn from(value: u16) -> Self {
        Self(value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn basic_number_arithmetic() {
        let batch = BatchNumber(41);
        assert_eq!(batch.next(), BatchNumber(42));
        assert_eq!(batch + 2, BatchNumber(43));
        assert_eq!(batch - 1, BatchNumber(40));
        assert_eq!(BatchNumber(0).checked_sub(1), None);
        assert_eq!(BatchNumber(0).saturating_sub(1), BatchNumber(0));
    }

    #[test]
    fn fork_gas_limits() {
        assert_eq!(ForkId(6).block_gas_limit(), 30_000_000);
        assert_eq!(ForkId(7).block_gas_limit(), 30_000_000);
        assert_eq!(ForkId(8).block_gas_limit(), 1_125_899_906_842_624);
        assert_eq!(ForkId(12).block_gas_limit(), 1_125_899_906_842_624);
    }

    #[test]
    fn fork_feature_gates() {
        assert!(!ForkId(6).supports_block_info_root());
        assert!(ForkId(7).supports_block_info_root());
        assert!(ForkId(7).elides_empty_logs());
        assert!(!ForkId(8).elides_empty_logs());
        assert!(!ForkId(8).supports_sha256_counter());
        assert!(ForkId(9).supports_sha256_counter());
    }

    #[test]
    fn numbers_serialize_transparently() {
        let number: L2BlockNumber = serde_json::from_str("7").unwrap();
        assert_eq!(number, L2BlockNumber(7));
        assert_eq!(serde_json::to_string(&number).unwrap(), "7");
    }
}
