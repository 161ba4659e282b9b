use std::collections::HashMap;

use cdk_basic_types::ForkId;

use crate::{
    kind::{CounterKind, Counters},
    limits::CounterLimits,
    transaction::TransactionCounter,
};

// Fixed work of opening a batch: the prover's setup rows.
const BATCH_STEPS: u64 = 100_000;
const BATCH_KECCAK: u64 = 2;

// Fixed work of a block preamble (timestamp bookkeeping and the block-hash
// registry write).
const BLOCK_STEPS: u64 = 36_000;
const BLOCK_ARITH: u64 = 2;
const BLOCK_BINARY: u64 = 2;
const BLOCK_MEM_ALIGN: u64 = 2;
const BLOCK_KECCAK: u64 = 1;

// Extra work when a block's info-index presence differs from the previous
// block's: the GER and L1-block-hash slots get (re)written.
const INFO_CHANGE_STEPS: u64 = 8_000;
const INFO_CHANGE_BINARY: u64 = 4;
const INFO_CHANGE_KECCAK: u64 = 2;

/// Aggregated counter state of an open batch.
///
/// `Clone` is the snapshot: callers clone before a tentative transaction and
/// assign the clone back to roll it off.
#[derive(Debug, Clone)]
pub struct BatchCounterCollector {
    fork_id: ForkId,
    limits: CounterLimits,
    /// Depth estimate of the state tree, already margin-adjusted and divided
    /// by the virtual-counters reduction.
    effective_smt_depth: u64,
    unlimited: bool,
    used: Counters,
    l2_data_bytes: u64,
    block_count: u64,
    tx_count: u64,
    prev_block_had_info_index: Option<bool>,
}

impl BatchCounterCollector {
    pub fn start_new_batch(
        fork_id: ForkId,
        smt_depth: u64,
        virtual_reduction: u32,
        unlimited: bool,
    ) -> Self {
        let limits = if unlimited {
            CounterLimits::unlimited()
        } else {
            CounterLimits::for_fork(fork_id)
        };
        let effective_smt_depth = (smt_depth / virtual_reduction.max(1) as u64).max(1);
        let mut collector = Self {
            fork_id,
            limits,
            effective_smt_depth,
            unlimited,
            used: Counters::default(),
            l2_data_bytes: 0,
            block_count: 0,
            tx_count: 0,
            prev_block_had_info_index: None,
        };
        collector.used.add(CounterKind::Steps, BATCH_STEPS);
        collector.used.add(CounterKind::Keccak, BATCH_KECCAK);
        collector
    }

    /// Charges a block preamble. Returns whether the batch overflowed.
    pub fn start_new_block(&mut self, has_l1_info_index: bool) -> bool {
        self.used.add(CounterKind::Steps, BLOCK_STEPS);
        self.used.add(CounterKind::Arith, BLOCK_ARITH);
        self.used.add(CounterKind::Binary, BLOCK_BINARY);
        self.used.add(CounterKind::MemAlign, BLOCK_MEM_ALIGN);
        self.used.add(CounterKind::Keccak, BLOCK_KECCAK);
        self.used
            .add(CounterKind::PoseidonHashes, self.effective_smt_depth);

        if self.prev_block_had_info_index != Some(has_l1_info_index) {
            self.used.add(CounterKind::Steps, INFO_CHANGE_STEPS);
            self.used.add(CounterKind::Binary, INFO_CHANGE_BINARY);
            self.used.add(CounterKind::Keccak, INFO_CHANGE_KECCAK);
            self.used
                .add(CounterKind::PoseidonHashes, self.effective_smt_depth);
        }
        self.prev_block_had_info_index = Some(has_l1_info_index);
        self.block_count += 1;
        self.l2_data_bytes += cdk_types::batch_l2_data::BLOCK_START_BYTES as u64;

        self.check_for_overflow(has_l1_info_index)
    }

    /// Charges a transaction's pre-execution overheads (decode, signature
    /// recovery, preparation) and its L2-data bytes. Returns whether the
    /// batch overflowed.
    pub fn add_new_transaction_counters(&mut self, tx_counter: &TransactionCounter) -> bool {
        self.used += &tx_counter.pre_execution_total();
        self.l2_data_bytes += tx_counter.l2_data_bytes();
        self.tx_count += 1;
        self.check_for_overflow(self.prev_block_had_info_index.unwrap_or(false))
    }

    /// Merges the counters the execution engine accumulated for one
    /// transaction.
    pub fn add_execution_counters(&mut self, execution: &Counters) {
        self.used += execution;
    }

    /// Recomputes the overflow verdict. `with_l1_info` reserves the extra
    /// charges a following info-index block flip would incur, so a batch is
    /// never sealed into a state it cannot legally extend.
    pub fn check_for_overflow(&self, with_l1_info: bool) -> bool {
        if self.unlimited {
            return false;
        }
        if !self.fork_id.supports_sha256_counter() && self.used.get(CounterKind::Sha256) > 0 {
            tracing::error!(
                fork_id = %self.fork_id,
                "SHA-256 counter moved below its activation fork"
            );
            return true;
        }

        let mut projected = self.used;
        if with_l1_info {
            projected.add(CounterKind::Steps, INFO_CHANGE_STEPS);
            projected.add(CounterKind::Binary, INFO_CHANGE_BINARY);
            projected.add(CounterKind::Keccak, INFO_CHANGE_KECCAK);
            projected.add(CounterKind::PoseidonHashes, self.effective_smt_depth);
        }

        let exceeding = projected.exceeding(&self.limits.counters);
        if !exceeding.is_empty() {
            tracing::debug!(?exceeding, "batch counters overflowed");
            return true;
        }
        if self.l2_data_bytes > self.limits.l2_data_bytes {
            tracing::debug!(
                used = self.l2_data_bytes,
                limit = self.limits.l2_data_bytes,
                "batch L2 data overflowed"
            );
            return true;
        }
        false
    }

    /// Snapshot of the totals, keyed by the prover's counter names.
    pub fn combine(&self, with_l1_info: bool) -> HashMap<String, u64> {
        let mut projected = self.used;
        if with_l1_info {
            projected.add(CounterKind::Steps, INFO_CHANGE_STEPS);
            projected.add(CounterKind::Binary, INFO_CHANGE_BINARY);
            projected.add(CounterKind::Keccak, INFO_CHANGE_KECCAK);
            projected.add(CounterKind::PoseidonHashes, self.effective_smt_depth);
        }
        let mut snapshot: HashMap<String, u64> = CounterKind::ALL
            .into_iter()
            .map(|kind| (kind.short_name().to_string(), projected.get(kind)))
            .collect();
        snapshot.insert("L2_DATA".to_string(), self.l2_data_bytes);
        snapshot
    }

    pub fn used(&self) -> &Counters {
        &self.used
    }

    pub fn l2_data_bytes(&self) -> u64 {
        self.l2_data_bytes
    }

    pub fn tx_count(&self) -> u64 {
        self.tx_count
    }

    pub fn block_count(&self) -> u64 {
        self.block_count
    }

    pub fn effective_smt_depth(&self) -> u64 {
        self.effective_smt_depth
    }

    pub fn is_unlimited(&self) -> bool {
        self.unlimited
    }
}

#[cfg(test)]
mod tests {
    use cdk_basic_types::{Address, U256};
    use cdk_types::{transaction::TransactionRequest, Transaction};
    use secp256k1::SecretKey;

    use super::*;

    fn collector() -> BatchCounterCollector {
        BatchCounterCollector::start_new_batch(ForkId(9), 32, 1, false)
    }

    fn tx_counter_with_data(data_len: usize) -> TransactionCounter {
        let tx = Transaction::sign(
            TransactionRequest {
                nonce: 0,
                gas_price: U256::from(1u64),
                gas: 21_000,
                to: Some(Address::repeat_byte(1)),
                value: U256::zero(),
                data: vec![0xee; data_len],
                effective_gas_price_pct: 255,
            },
            1001,
            &SecretKey::from_slice(&[0x29; 32]).unwrap(),
        );
        TransactionCounter::new(&tx)
    }

    fn tx_counter() -> TransactionCounter {
        tx_counter_with_data(0)
    }

    #[test]
    fn batch_and_block_overheads_are_charged() {
        let mut collector = collector();
        let steps_before = collector.used().get(CounterKind::Steps);
        assert!(steps_before > 0);
        assert!(!collector.start_new_block(false));
        assert!(collector.used().get(CounterKind::Steps) > steps_before);
        assert_eq!(collector.block_count(), 1);
    }

    #[test]
    fn info_index_flip_charges_extra() {
        let mut flip = collector();
        flip.start_new_block(true);
        flip.start_new_block(false);

        let mut steady = collector();
        steady.start_new_block(true);
        steady.start_new_block(true);

        assert!(flip.used().get(CounterKind::Steps) > steady.used().get(CounterKind::Steps));
    }

    #[test]
    fn snapshot_revert_restores_exact_vector() {
        let mut collector = collector();
        collector.start_new_block(false);
        let snapshot = collector.clone();
        let before = *collector.used();

        assert!(!collector.add_new_transaction_counters(&tx_counter()));
        assert_ne!(*collector.used(), before);

        collector = snapshot;
        assert_eq!(*collector.used(), before);
    }

    #[test]
    fn used_vector_only_grows() {
        let mut collector = collector();
        collector.start_new_block(false);
        let mut previous = *collector.used();
        for _ in 0..5 {
            collector.add_new_transaction_counters(&tx_counter());
            let current = *collector.used();
            for kind in CounterKind::ALL {
                assert!(current.get(kind) >= previous.get(kind));
            }
            previous = current;
        }
    }

    #[test]
    fn unlimited_collector_never_overflows() {
        let mut collector = BatchCounterCollector::start_new_batch(ForkId(9), 32, 1, true);
        for _ in 0..10_000 {
            assert!(!collector.start_new_block(true));
        }
    }

    #[test]
    fn l2_data_budget_is_enforced() {
        let mut collector = collector();
        collector.start_new_block(false);
        let mut overflowed = false;
        // Fat calldata trips the byte budget long before the step rows do.
        for _ in 0..100 {
            if collector.add_new_transaction_counters(&tx_counter_with_data(4_096)) {
                overflowed = true;
                break;
            }
        }
        assert!(overflowed);
        assert!(collector.l2_data_bytes() > CounterLimits::for_fork(ForkId(9)).l2_data_bytes);
    }

    #[test]
    fn combine_reports_all_counters() {
        let mut collector = collector();
        collector.start_new_block(true);
        let snapshot = collector.combine(true);
        assert!(snapshot.contains_key("S"));
        assert!(snapshot.contains_key("SHA"));
        assert!(snapshot.contains_key("L2_DATA"));
        assert!(snapshot["S"] >= collector.used().get(CounterKind::Steps));
    }
}
