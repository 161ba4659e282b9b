//! Transaction application: validity checks, gas purchase, message
//! execution, fee payment and receipt construction.

use cdk_basic_types::{Address, U256};
use cdk_counters::{CounterKind, TransactionCounter};
use cdk_types::{Transaction, TxReceipt};

use crate::{
    config::{BlockContext, VmConfig},
    errors::{TxError, VmError},
    gas,
    interpreter::{execute_message, FrameResult, Interpreter},
    state::InMemoryState,
    tracer::InnerTx,
};

/// Everything a successfully applied (included) transaction produces.
#[derive(Debug, Clone)]
pub struct TxOutput {
    pub receipt: TxReceipt,
    pub success: bool,
    pub gas_used: u64,
    pub return_data: Vec<u8>,
    pub created_address: Option<Address>,
    /// Abnormal termination, if any; the transaction is still included.
    pub vm_error: Option<VmError>,
    pub inner_txs: Vec<InnerTx>,
}

/// Applies `tx` against `state`. A `TxError` means the transaction cannot be
/// included at all and the state is untouched; a returned [`TxOutput`] means
/// it was included, successfully or not.
#[allow(clippy::too_many_arguments)]
pub fn apply_transaction(
    cfg: &VmConfig,
    block: &BlockContext,
    state: &mut InMemoryState,
    tx: &Transaction,
    effective_gas_price_pct: u8,
    counter: &mut TransactionCounter,
    cumulative_gas_before: u64,
    first_log_index: u64,
    collect_trace: bool,
) -> Result<TxOutput, TxError> {
    let sender = tx.from;
    if !state.code(sender).is_empty() {
        return Err(TxError::SenderIsContract(sender));
    }

    let expected_nonce = state.nonce(sender);
    if tx.nonce < expected_nonce {
        return Err(TxError::NonceTooLow {
            expected: expected_nonce,
            got: tx.nonce,
        });
    }
    if tx.nonce > expected_nonce {
        return Err(TxError::NonceTooHigh {
            expected: expected_nonce,
            got: tx.nonce,
        });
    }

    let effective_price = tx.gas_price * U256::from(effective_gas_price_pct as u16 + 1)
        / U256::from(cdk_types::transaction::EFFECTIVE_GAS_PRICE_MAX);
    let gas_cost = effective_price * U256::from(tx.gas);
    let required = gas_cost + tx.value;
    let balance = state.balance(sender);
    if balance < required {
        return Err(TxError::InsufficientBalance { balance, required });
    }

    let intrinsic = gas::intrinsic_gas(&tx.data, tx.to.is_none());
    if intrinsic > tx.gas {
        return Err(TxError::IntrinsicGas {
            required: intrinsic,
            limit: tx.gas,
        });
    }

    let block_gas_remaining = block.gas_limit.saturating_sub(cumulative_gas_before);
    if tx.gas > block_gas_remaining {
        return Err(TxError::BlockGasExceeded {
            gas: tx.gas,
            remaining: block_gas_remaining,
        });
    }

    // The transaction is now included whatever execution does: buy gas and
    // bump the nonce outside the execution snapshot. Creations bump the
    // nonce inside the creation path, off the pre-increment value.
    let paid = state.sub_balance(sender, gas_cost);
    debug_assert!(paid, "balance was checked above");
    if tx.to.is_some() {
        state.increment_nonce(sender);
    }

    let mut interpreter = Interpreter {
        state,
        cfg,
        block,
        counters: counter.execution_mut(),
        origin: sender,
        gas_price: effective_price,
        logs: Vec::new(),
        trace: Vec::new(),
        collect_trace,
    };
    // Both balance legs of the value transfer touch the state tree.
    interpreter
        .counters
        .add(CounterKind::PoseidonHashes, cfg.poseidon_depth * 2);

    let (result, created_address) = execute_message(
        &mut interpreter,
        sender,
        tx.to,
        tx.value,
        tx.data.clone(),
        tx.gas - intrinsic,
    );

    let logs = std::mem::take(&mut interpreter.logs);
    let inner_txs = std::mem::take(&mut interpreter.trace);

    let (success, gas_left, return_data, vm_error) = match result {
        FrameResult::Return { gas_left, data } => (true, gas_left, data, None),
        FrameResult::Revert { gas_left, data } => (false, gas_left, data, None),
        FrameResult::Error(err) => (false, 0, Vec::new(), Some(err)),
    };
    let gas_used = tx.gas - gas_left;

    // Refund the unused gas, pay the coinbase.
    state.add_balance(sender, effective_price * U256::from(gas_left));
    state.add_balance(block.coinbase, effective_price * U256::from(gas_used));

    let receipt = TxReceipt {
        tx_hash: tx.hash(),
        l2_tx_hash: tx.l2_hash(),
        status: success as u8,
        gas_used,
        cumulative_gas_used: cumulative_gas_before + gas_used,
        first_log_index,
        logs,
    };

    Ok(TxOutput {
        receipt,
        success,
        gas_used,
        return_data,
        created_address,
        vm_error,
        inner_txs,
    })
}
