use cdk_basic_types::{Address, U256};

/// One node of the inner-transaction trace: every call-like opcode appends
/// one, successful or not.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InnerTx {
    pub depth: usize,
    pub opcode: &'static str,
    pub caller: Address,
    pub callee: Address,
    pub value: U256,
    pub gas: u64,
    pub input: Vec<u8>,
    pub success: bool,
}
