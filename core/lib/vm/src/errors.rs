use cdk_basic_types::U256;

/// Failures local to one transaction; the caller decides (per mode) whether
/// to retry, skip, or abort.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TxError {
    #[error("nonce too low: expected {expected}, got {got}")]
    NonceTooLow { expected: u64, got: u64 },
    #[error("nonce too high: expected {expected}, got {got}")]
    NonceTooHigh { expected: u64, got: u64 },
    #[error("insufficient balance: have {balance}, need {required}")]
    InsufficientBalance { balance: U256, required: U256 },
    #[error("intrinsic gas {required} exceeds the gas limit {limit}")]
    IntrinsicGas { required: u64, limit: u64 },
    #[error("transaction gas {gas} exceeds the remaining block gas {remaining}")]
    BlockGasExceeded { gas: u64, remaining: u64 },
    #[error("sender {0} is a contract")]
    SenderIsContract(cdk_basic_types::Address),
}

/// Abnormal interpreter terminations. These surface as a failed execution
/// result (the transaction is still included, gas is consumed), never as a
/// process error.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum VmError {
    #[error("out of gas")]
    OutOfGas,
    #[error("stack underflow")]
    StackUnderflow,
    #[error("stack overflow")]
    StackOverflow,
    #[error("invalid jump destination")]
    InvalidJump,
    #[error("invalid opcode {0:#04x}")]
    InvalidOpcode(u8),
    #[error("call depth exceeded")]
    CallDepthExceeded,
    #[error("write attempted in a static context")]
    StaticViolation,
    #[error("return data out of bounds")]
    ReturnDataOutOfBounds,
}
