use cdk_types::Transaction;

use crate::kind::{CounterKind, Counters};

// Fixed costs of decoding a transaction out of batch L2 data.
const RLP_BASE_STEPS: u64 = 250;
const RLP_STEPS_PER_BYTE: u64 = 4;
const RLP_BASE_BINARY: u64 = 2;
const KECCAK_BLOCK_BYTES: u64 = 136;

// Fixed costs of preparing a decoded transaction for execution: signature
// recovery dominates.
const PROCESSING_STEPS: u64 = 6_800;
const PROCESSING_ARITH: u64 = 1_100;
const PROCESSING_BINARY: u64 = 1_100;
const PROCESSING_KECCAK: u64 = 2;
const PROCESSING_MEM_ALIGN: u64 = 12;

// Post-execution finalization of a deployment charges poseidon work for
// hashing the deployed bytecode into the state tree.
const BYTECODE_CHUNK_BYTES: u64 = 56;

/// Per-transaction counter bookkeeping: three sub-collectors charged at the
/// stages the pipeline walks through (decode, prepare, execute).
#[derive(Debug, Clone, Default)]
pub struct TransactionCounter {
    rlp: Counters,
    processing: Counters,
    execution: Counters,
    l2_data_bytes: u64,
}

impl TransactionCounter {
    /// Charges the decode and preparation overheads up front; execution
    /// counters accumulate later through [`Self::execution_mut`].
    pub fn new(tx: &Transaction) -> Self {
        let rlp_len = tx.rlp_bytes().len() as u64;

        let mut rlp = Counters::default();
        rlp.add(CounterKind::Steps, RLP_BASE_STEPS + rlp_len * RLP_STEPS_PER_BYTE);
        rlp.add(CounterKind::Binary, RLP_BASE_BINARY);
        rlp.add(CounterKind::Keccak, keccak_blocks(rlp_len));

        let mut processing = Counters::default();
        processing.add(CounterKind::Steps, PROCESSING_STEPS);
        processing.add(CounterKind::Arith, PROCESSING_ARITH);
        processing.add(CounterKind::Binary, PROCESSING_BINARY);
        processing.add(CounterKind::Keccak, PROCESSING_KECCAK);
        processing.add(CounterKind::MemAlign, PROCESSING_MEM_ALIGN);

        Self {
            rlp,
            processing,
            execution: Counters::default(),
            l2_data_bytes: rlp_len + cdk_types::batch_l2_data::TX_OVERHEAD_BYTES as u64 + 1,
        }
    }

    /// Handle the execution engine accumulates opcode costs into.
    pub fn execution_mut(&mut self) -> &mut Counters {
        &mut self.execution
    }

    pub fn execution(&self) -> &Counters {
        &self.execution
    }

    /// Finalizes counter deltas tied to post-execution state: hashing the
    /// deployed bytecode for contract creations.
    pub fn process_tx(&mut self, return_data: &[u8], is_deploy: bool, smt_depth: u64) {
        if is_deploy && !return_data.is_empty() {
            let chunks = (return_data.len() as u64).div_ceil(BYTECODE_CHUNK_BYTES);
            self.execution.add(CounterKind::PoseidonHashes, chunks + smt_depth);
            self.execution.add(CounterKind::PoseidonPaddings, chunks);
        }
    }

    /// Bytes this transaction occupies inside the batch L2 data.
    pub fn l2_data_bytes(&self) -> u64 {
        self.l2_data_bytes
    }

    /// The decode + preparation share, charged before execution starts.
    pub fn pre_execution_total(&self) -> Counters {
        let mut total = self.rlp;
        total += &self.processing;
        total
    }

    pub fn total(&self) -> Counters {
        let mut total = self.pre_execution_total();
        total += &self.execution;
        total
    }
}

pub(crate) fn keccak_blocks(len: u64) -> u64 {
    (len + 1).div_ceil(KECCAK_BLOCK_BYTES)
}

#[cfg(test)]
mod tests {
    use cdk_basic_types::{Address, U256};
    use cdk_types::transaction::TransactionRequest;
    use secp256k1::SecretKey;

    use super::*;

    fn tx(data_len: usize) -> Transaction {
        Transaction::sign(
            TransactionRequest {
                nonce: 0,
                gas_price: U256::from(1_000u64),
                gas: 100_000,
                to: Some(Address::repeat_byte(0x11)),
                value: U256::zero(),
                data: vec![0xfe; data_len],
                effective_gas_price_pct: 255,
            },
            1001,
            &SecretKey::from_slice(&[0x33; 32]).unwrap(),
        )
    }

    #[test]
    fn larger_payloads_cost_more() {
        let small = TransactionCounter::new(&tx(0));
        let large = TransactionCounter::new(&tx(4_096));
        assert!(
            large.pre_execution_total().get(CounterKind::Steps)
                > small.pre_execution_total().get(CounterKind::Steps)
        );
        assert!(
            large.pre_execution_total().get(CounterKind::Keccak)
                > small.pre_execution_total().get(CounterKind::Keccak)
        );
        assert!(large.l2_data_bytes() > small.l2_data_bytes());
    }

    #[test]
    fn deploy_finalization_charges_poseidon() {
        let mut counter = TransactionCounter::new(&tx(0));
        counter.process_tx(&[0u8; 300], true, 32);
        assert!(counter.total().get(CounterKind::PoseidonHashes) > 32);
        assert!(counter.total().get(CounterKind::PoseidonPaddings) > 0);

        let mut call_counter = TransactionCounter::new(&tx(0));
        call_counter.process_tx(&[0u8; 300], false, 32);
        assert_eq!(call_counter.total().get(CounterKind::PoseidonHashes), 0);
    }
}
