use cdk_basic_types::ForkId;

use crate::kind::{CounterKind, Counters};

/// Per-batch capacity of the prover, as a counter vector plus the L2-data
/// byte budget.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CounterLimits {
    pub counters: Counters,
    pub l2_data_bytes: u64,
}

impl CounterLimits {
    /// The batch constraints in force under `fork_id`. The SHA-256 row only
    /// exists from fork 9 on; before that the limit is 0 and the collector
    /// asserts the counter never moves.
    pub fn for_fork(fork_id: ForkId) -> Self {
        let sha256 = if fork_id.supports_sha256_counter() {
            1_596
        } else {
            0
        };
        let counters = [
            (CounterKind::Steps, 7_570_538),
            (CounterKind::Arith, 236_585),
            (CounterKind::Binary, 473_170),
            (CounterKind::MemAlign, 236_585),
            (CounterKind::Keccak, 2_145),
            (CounterKind::PoseidonHashes, 252_357),
            (CounterKind::PoseidonPaddings, 135_191),
            (CounterKind::Sha256, sha256),
        ]
        .into_iter()
        .collect();
        Self {
            counters,
            l2_data_bytes: 120_000,
        }
    }

    /// Limits that can never overflow. Only the L1-recovery path constructs
    /// these: historical batches were sealed under the constraints of their
    /// day and must replay verbatim.
    pub fn unlimited() -> Self {
        let counters = CounterKind::ALL
            .into_iter()
            .map(|kind| (kind, u64::MAX))
            .collect();
        Self {
            counters,
            l2_data_bytes: u64::MAX,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sha256_limit_is_fork_gated() {
        assert_eq!(
            CounterLimits::for_fork(ForkId(8)).counters.get(CounterKind::Sha256),
            0
        );
        assert_eq!(
            CounterLimits::for_fork(ForkId(9)).counters.get(CounterKind::Sha256),
            1_596
        );
    }
}
