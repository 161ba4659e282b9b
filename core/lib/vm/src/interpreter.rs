//! The bytecode interpreter.
//!
//! Stock EVM semantics with the rollup's divergences:
//! - `BLOCKHASH` resolves state roots by number from the in-state registry;
//! - `NUMBER` and `TIMESTAMP` read the sysrom registers;
//! - `DIFFICULTY` is zero;
//! - `SELFDESTRUCT` transfers the balance but keeps the account;
//! - `LOG*` with no topics and no data is elided below fork 8;
//! - `CREATE`/`CREATE2` leave empty return data on non-revert failures;
//! - calldata reads over empty calldata fall back to the contract code below
//!   fork 7.

use std::collections::HashSet;

use cdk_basic_types::{
    conversions::{address_to_u256, h256_to_u256, u256_to_address, u256_to_h256},
    Address, H256, U256,
};
use cdk_counters::{CounterKind, Counters};
use cdk_types::{hasher::keccak256, Log};

use crate::{
    config::{BlockContext, VmConfig, SYSROM_ADDRESS, SYSROM_SLOT_BLOCK_NUMBER},
    errors::VmError,
    gas,
    precompiles,
    state::InMemoryState,
    tracer::InnerTx,
};

const MAX_STACK: usize = 1024;
const MAX_CALL_DEPTH: usize = 1024;
const KECCAK_BLOCK_BYTES: u64 = 136;

pub(crate) struct Interpreter<'a> {
    pub state: &'a mut InMemoryState,
    pub cfg: &'a VmConfig,
    pub block: &'a BlockContext,
    pub counters: &'a mut Counters,
    pub origin: Address,
    pub gas_price: U256,
    pub logs: Vec<Log>,
    pub trace: Vec<InnerTx>,
    pub collect_trace: bool,
}

#[derive(Debug)]
pub(crate) struct CallParams {
    pub caller: Address,
    /// Account whose storage the frame runs against.
    pub address: Address,
    /// Account whose code runs (differs from `address` for delegate calls).
    pub code_address: Address,
    pub value: U256,
    pub apply_value: bool,
    pub input: Vec<u8>,
    pub gas: u64,
    pub is_static: bool,
    pub depth: usize,
}

#[derive(Debug)]
pub(crate) enum FrameResult {
    Return { gas_left: u64, data: Vec<u8> },
    Revert { gas_left: u64, data: Vec<u8> },
    Error(VmError),
}

impl FrameResult {
    pub fn is_success(&self) -> bool {
        matches!(self, FrameResult::Return { .. })
    }
}

struct Frame {
    code: Vec<u8>,
    jumpdests: HashSet<usize>,
    pc: usize,
    stack: Vec<U256>,
    memory: Vec<u8>,
    memory_words: u64,
    gas: u64,
    input: Vec<u8>,
    caller: Address,
    address: Address,
    value: U256,
    is_static: bool,
    depth: usize,
    return_data: Vec<u8>,
}

impl Frame {
    fn new(params: &CallParams, code: Vec<u8>) -> Self {
        let jumpdests = scan_jumpdests(&code);
        Self {
            code,
            jumpdests,
            pc: 0,
            stack: Vec::new(),
            memory: Vec::new(),
            memory_words: 0,
            gas: params.gas,
            input: params.input.clone(),
            caller: params.caller,
            address: params.address,
            value: params.value,
            is_static: params.is_static,
            depth: params.depth,
            return_data: Vec::new(),
        }
    }

    fn charge_gas(&mut self, amount: u64) -> Result<(), VmError> {
        if self.gas < amount {
            return Err(VmError::OutOfGas);
        }
        self.gas -= amount;
        Ok(())
    }

    fn push(&mut self, value: U256) -> Result<(), VmError> {
        if self.stack.len() >= MAX_STACK {
            return Err(VmError::StackOverflow);
        }
        self.stack.push(value);
        Ok(())
    }

    fn pop(&mut self) -> Result<U256, VmError> {
        self.stack.pop().ok_or(VmError::StackUnderflow)
    }

    fn expand_memory(&mut self, offset: U256, len: U256) -> Result<u64, VmError> {
        if len.is_zero() {
            return Ok(0);
        }
        let (offset, len) = (as_u64(offset)?, as_u64(len)?);
        let (words, cost) = gas::memory_expansion_cost(self.memory_words, offset, len);
        self.charge_gas(cost)?;
        self.memory_words = words;
        let needed = (offset + len) as usize;
        if self.memory.len() < needed {
            self.memory.resize(words as usize * 32, 0);
        }
        Ok(offset)
    }

    fn read_memory(&self, offset: u64, len: u64) -> Vec<u8> {
        if len == 0 {
            return Vec::new();
        }
        self.memory[offset as usize..(offset + len) as usize].to_vec()
    }
}

fn scan_jumpdests(code: &[u8]) -> HashSet<usize> {
    let mut dests = HashSet::new();
    let mut pc = 0;
    while pc < code.len() {
        let op = code[pc];
        if op == 0x5b {
            dests.insert(pc);
        }
        pc += if (0x60..=0x7f).contains(&op) {
            (op - 0x5f) as usize + 1
        } else {
            1
        };
    }
    dests
}

fn as_u64(value: U256) -> Result<u64, VmError> {
    if value > U256::from(u64::MAX) {
        return Err(VmError::OutOfGas);
    }
    Ok(value.as_u64())
}

impl Interpreter<'_> {
    /// Runs a message call: value transfer, precompile dispatch, code
    /// execution, state revert on failure.
    pub fn call(&mut self, params: CallParams) -> FrameResult {
        if params.depth > MAX_CALL_DEPTH {
            return FrameResult::Error(VmError::CallDepthExceeded);
        }
        let snapshot = self.state.snapshot();
        let logs_mark = self.logs.len();

        if params.apply_value && !params.value.is_zero() {
            if !self.state.sub_balance(params.caller, params.value) {
                return FrameResult::Error(VmError::OutOfGas);
            }
            self.state.add_balance(params.address, params.value);
        }

        let result = if precompiles::is_precompile(params.code_address) {
            self.charge(CounterKind::Steps, 32);
            let (cost, output) = precompiles::execute(params.code_address, &params.input, self.counters);
            if cost > params.gas {
                FrameResult::Error(VmError::OutOfGas)
            } else {
                FrameResult::Return {
                    gas_left: params.gas - cost,
                    data: output,
                }
            }
        } else {
            let code = self.state.code(params.code_address).to_vec();
            if code.is_empty() {
                FrameResult::Return {
                    gas_left: params.gas,
                    data: Vec::new(),
                }
            } else {
                let mut frame = Frame::new(&params, code);
                self.run(&mut frame)
            }
        };

        if !result.is_success() {
            self.state.revert_to_snapshot(snapshot);
            self.logs.truncate(logs_mark);
        }
        result
    }

    /// Runs a contract creation. On any failure that is not an explicit
    /// revert the returned data is empty.
    pub fn create(
        &mut self,
        caller: Address,
        value: U256,
        init_code: Vec<u8>,
        gas: u64,
        depth: usize,
        salt: Option<H256>,
    ) -> (FrameResult, Option<Address>) {
        if depth > MAX_CALL_DEPTH {
            return (FrameResult::Error(VmError::CallDepthExceeded), None);
        }
        let nonce = self.state.nonce(caller);
        let new_address = match salt {
            Some(salt) => {
                let code_hash = keccak256(&init_code);
                let mut buf = Vec::with_capacity(85);
                buf.push(0xff);
                buf.extend_from_slice(caller.as_bytes());
                buf.extend_from_slice(salt.as_bytes());
                buf.extend_from_slice(code_hash.as_bytes());
                Address::from_slice(&keccak256(&buf).as_bytes()[12..])
            }
            None => {
                let encoded = rlp_address_nonce(caller, nonce);
                Address::from_slice(&keccak256(&encoded).as_bytes()[12..])
            }
        };

        // The caller's nonce bump survives a failed creation.
        self.state.increment_nonce(caller);
        let snapshot = self.state.snapshot();
        let logs_mark = self.logs.len();

        // Address collision: an account with code or nonce already lives there.
        if self.state.nonce(new_address) != 0 || !self.state.code(new_address).is_empty() {
            return (FrameResult::Error(VmError::InvalidOpcode(0xf0)), None);
        }

        if !value.is_zero() {
            if !self.state.sub_balance(caller, value) {
                self.state.revert_to_snapshot(snapshot);
                return (FrameResult::Error(VmError::OutOfGas), None);
            }
            self.state.add_balance(new_address, value);
        }
        self.state.set_nonce(new_address, 1);

        let params = CallParams {
            caller,
            address: new_address,
            code_address: new_address,
            value,
            apply_value: false,
            input: Vec::new(),
            gas,
            is_static: false,
            depth,
        };
        let mut frame = Frame::new(&params, init_code);
        let result = self.run(&mut frame);

        match result {
            FrameResult::Return { gas_left, data } => {
                let deposit = data.len() as u64 * gas::G_CODE_DEPOSIT_BYTE;
                if data.len() > gas::MAX_CODE_SIZE || gas_left < deposit {
                    self.state.revert_to_snapshot(snapshot);
                    self.logs.truncate(logs_mark);
                    (FrameResult::Error(VmError::OutOfGas), None)
                } else {
                    self.state.set_code(new_address, data);
                    (
                        FrameResult::Return {
                            gas_left: gas_left - deposit,
                            data: Vec::new(),
                        },
                        Some(new_address),
                    )
                }
            }
            FrameResult::Revert { gas_left, data } => {
                self.state.revert_to_snapshot(snapshot);
                self.logs.truncate(logs_mark);
                (FrameResult::Revert { gas_left, data }, None)
            }
            FrameResult::Error(err) => {
                self.state.revert_to_snapshot(snapshot);
                self.logs.truncate(logs_mark);
                (FrameResult::Error(err), None)
            }
        }
    }

    fn charge(&mut self, kind: CounterKind, amount: u64) {
        self.counters.add(kind, amount);
    }

    #[allow(clippy::too_many_arguments)]
    fn record_inner_tx(
        &mut self,
        depth: usize,
        opcode: &'static str,
        caller: Address,
        callee: Address,
        value: U256,
        gas: u64,
        input: &[u8],
        success: bool,
    ) {
        if self.collect_trace {
            self.trace.push(InnerTx {
                depth,
                opcode,
                caller,
                callee,
                value,
                gas,
                input: input.to_vec(),
                success,
            });
        }
    }

    #[allow(clippy::too_many_lines)]
    fn run(&mut self, frame: &mut Frame) -> FrameResult {
        loop {
            let Some(&op) = frame.code.get(frame.pc) else {
                return FrameResult::Return {
                    gas_left: frame.gas,
                    data: Vec::new(),
                };
            };
            frame.pc += 1;
            self.charge(CounterKind::Steps, 1);

            let step = self.step(frame, op);
            match step {
                Ok(Some(result)) => return result,
                Ok(None) => {}
                Err(err) => return FrameResult::Error(err),
            }
        }
    }

    /// Executes one opcode. `Ok(Some(_))` terminates the frame.
    fn step(&mut self, frame: &mut Frame, op: u8) -> Result<Option<FrameResult>, VmError> {
        match op {
            // STOP
            0x00 => {
                return Ok(Some(FrameResult::Return {
                    gas_left: frame.gas,
                    data: Vec::new(),
                }))
            }
            // Arithmetic.
            0x01..=0x0b => self.op_arith(frame, op)?,
            // Comparison and bitwise.
            0x10..=0x1d => self.op_binary(frame, op)?,
            // KECCAK256
            0x20 => {
                let offset = frame.pop()?;
                let len = frame.pop()?;
                let byte_len = as_u64(len)?;
                frame.charge_gas(gas::G_KECCAK + byte_len.div_ceil(32) * gas::G_KECCAK_WORD)?;
                let offset = frame.expand_memory(offset, len)?;
                let data = frame.read_memory(offset, byte_len);
                self.charge(CounterKind::Keccak, (byte_len + 1).div_ceil(KECCAK_BLOCK_BYTES));
                frame.push(h256_to_u256(keccak256(&data)))?;
            }
            // ADDRESS
            0x30 => {
                frame.charge_gas(gas::G_BASE)?;
                frame.push(address_to_u256(&frame.address))?;
            }
            // BALANCE
            0x31 => {
                frame.charge_gas(gas::G_BALANCE)?;
                let address = u256_to_address(&frame.pop()?);
                self.charge(CounterKind::PoseidonHashes, self.cfg.poseidon_depth);
                frame.push(self.state.balance(address))?;
            }
            // ORIGIN
            0x32 => {
                frame.charge_gas(gas::G_BASE)?;
                frame.push(address_to_u256(&self.origin))?;
            }
            // CALLER
            0x33 => {
                frame.charge_gas(gas::G_BASE)?;
                frame.push(address_to_u256(&frame.caller))?;
            }
            // CALLVALUE
            0x34 => {
                frame.charge_gas(gas::G_BASE)?;
                frame.push(frame.value)?;
            }
            // CALLDATALOAD
            0x35 => {
                frame.charge_gas(gas::G_VERY_LOW)?;
                let offset = frame.pop()?;
                let source = self.calldata_source(frame);
                let mut word = [0u8; 32];
                if offset <= U256::from(u64::MAX) {
                    let offset = offset.as_u64() as usize;
                    for (i, slot) in word.iter_mut().enumerate() {
                        *slot = source.get(offset + i).copied().unwrap_or(0);
                    }
                }
                frame.push(U256::from_big_endian(&word))?;
            }
            // CALLDATASIZE
            0x36 => {
                frame.charge_gas(gas::G_BASE)?;
                frame.push(U256::from(frame.input.len()))?;
            }
            // CALLDATACOPY
            0x37 => {
                let dest = frame.pop()?;
                let src = frame.pop()?;
                let len = frame.pop()?;
                frame.charge_gas(gas::G_VERY_LOW + gas::copy_cost(as_u64(len)?))?;
                self.charge(CounterKind::MemAlign, as_u64(len)?.div_ceil(32));
                let source = self.calldata_source(frame);
                copy_to_memory(frame, dest, src, len, &source)?;
            }
            // CODESIZE
            0x38 => {
                frame.charge_gas(gas::G_BASE)?;
                frame.push(U256::from(frame.code.len()))?;
            }
            // CODECOPY
            0x39 => {
                let dest = frame.pop()?;
                let src = frame.pop()?;
                let len = frame.pop()?;
                frame.charge_gas(gas::G_VERY_LOW + gas::copy_cost(as_u64(len)?))?;
                self.charge(CounterKind::MemAlign, as_u64(len)?.div_ceil(32));
                let code = frame.code.clone();
                copy_to_memory(frame, dest, src, len, &code)?;
            }
            // GASPRICE
            0x3a => {
                frame.charge_gas(gas::G_BASE)?;
                frame.push(self.gas_price)?;
            }
            // EXTCODESIZE
            0x3b => {
                frame.charge_gas(gas::G_EXTCODE)?;
                let address = u256_to_address(&frame.pop()?);
                self.charge(CounterKind::PoseidonHashes, self.cfg.poseidon_depth);
                frame.push(U256::from(self.state.code(address).len()))?;
            }
            // EXTCODECOPY
            0x3c => {
                frame.charge_gas(gas::G_EXTCODE)?;
                let address = u256_to_address(&frame.pop()?);
                let dest = frame.pop()?;
                let src = frame.pop()?;
                let len = frame.pop()?;
                frame.charge_gas(gas::copy_cost(as_u64(len)?))?;
                self.charge(CounterKind::PoseidonHashes, self.cfg.poseidon_depth);
                self.charge(CounterKind::MemAlign, as_u64(len)?.div_ceil(32));
                let code = self.state.code(address).to_vec();
                copy_to_memory(frame, dest, src, len, &code)?;
            }
            // RETURNDATASIZE
            0x3d => {
                frame.charge_gas(gas::G_BASE)?;
                frame.push(U256::from(frame.return_data.len()))?;
            }
            // RETURNDATACOPY
            0x3e => {
                let dest = frame.pop()?;
                let src = frame.pop()?;
                let len = frame.pop()?;
                frame.charge_gas(gas::G_VERY_LOW + gas::copy_cost(as_u64(len)?))?;
                let (src_u, len_u) = (as_u64(src)?, as_u64(len)?);
                if src_u.saturating_add(len_u) > frame.return_data.len() as u64 {
                    return Err(VmError::ReturnDataOutOfBounds);
                }
                self.charge(CounterKind::MemAlign, len_u.div_ceil(32));
                let data = frame.return_data.clone();
                copy_to_memory(frame, dest, src, len, &data)?;
            }
            // EXTCODEHASH
            0x3f => {
                frame.charge_gas(gas::G_EXTCODEHASH)?;
                let address = u256_to_address(&frame.pop()?);
                self.charge(CounterKind::PoseidonHashes, self.cfg.poseidon_depth);
                let hash = if self.state.exists(address) {
                    self.state.code_hash(address)
                } else {
                    H256::zero()
                };
                frame.push(h256_to_u256(hash))?;
            }
            // BLOCKHASH: the state root of the requested block, from the
            // in-state registry.
            0x40 => {
                frame.charge_gas(gas::G_BLOCKHASH)?;
                let number = frame.pop()?;
                let root = if number <= U256::from(u64::MAX) {
                    self.state.block_root(number.as_u64()).unwrap_or_default()
                } else {
                    H256::zero()
                };
                frame.push(h256_to_u256(root))?;
            }
            // COINBASE
            0x41 => {
                frame.charge_gas(gas::G_BASE)?;
                frame.push(address_to_u256(&self.block.coinbase))?;
            }
            // TIMESTAMP
            0x42 => {
                frame.charge_gas(gas::G_BASE)?;
                frame.push(U256::from(self.block.timestamp))?;
            }
            // NUMBER: read from the sysrom, not from the context.
            0x43 => {
                frame.charge_gas(gas::G_BASE)?;
                let number = self.state.storage(
                    SYSROM_ADDRESS,
                    u256_to_h256(U256::from(SYSROM_SLOT_BLOCK_NUMBER)),
                );
                frame.push(h256_to_u256(number))?;
            }
            // DIFFICULTY
            0x44 => {
                frame.charge_gas(gas::G_BASE)?;
                frame.push(U256::zero())?;
            }
            // GASLIMIT
            0x45 => {
                frame.charge_gas(gas::G_BASE)?;
                frame.push(U256::from(self.block.gas_limit))?;
            }
            // CHAINID
            0x46 => {
                frame.charge_gas(gas::G_BASE)?;
                frame.push(U256::from(self.cfg.chain_id))?;
            }
            // SELFBALANCE
            0x47 => {
                frame.charge_gas(gas::G_LOW)?;
                self.charge(CounterKind::PoseidonHashes, self.cfg.poseidon_depth);
                frame.push(self.state.balance(frame.address))?;
            }
            // BASEFEE
            0x48 => {
                frame.charge_gas(gas::G_BASE)?;
                frame.push(self.block.base_fee)?;
            }
            // POP
            0x50 => {
                frame.charge_gas(gas::G_BASE)?;
                frame.pop()?;
            }
            // MLOAD
            0x51 => {
                frame.charge_gas(gas::G_VERY_LOW)?;
                self.charge(CounterKind::MemAlign, 1);
                let offset = frame.pop()?;
                let offset = frame.expand_memory(offset, U256::from(32u8))?;
                let word = frame.read_memory(offset, 32);
                frame.push(U256::from_big_endian(&word))?;
            }
            // MSTORE
            0x52 => {
                frame.charge_gas(gas::G_VERY_LOW)?;
                self.charge(CounterKind::MemAlign, 1);
                let offset = frame.pop()?;
                let value = frame.pop()?;
                let offset = frame.expand_memory(offset, U256::from(32u8))?;
                let mut word = [0u8; 32];
                value.to_big_endian(&mut word);
                frame.memory[offset as usize..offset as usize + 32].copy_from_slice(&word);
            }
            // MSTORE8
            0x53 => {
                frame.charge_gas(gas::G_VERY_LOW)?;
                self.charge(CounterKind::MemAlign, 1);
                let offset = frame.pop()?;
                let value = frame.pop()?;
                let offset = frame.expand_memory(offset, U256::from(1u8))?;
                frame.memory[offset as usize] = value.byte(0);
            }
            // SLOAD
            0x54 => {
                frame.charge_gas(gas::G_SLOAD)?;
                self.charge(CounterKind::PoseidonHashes, self.cfg.poseidon_depth);
                let key = u256_to_h256(frame.pop()?);
                frame.push(h256_to_u256(self.state.storage(frame.address, key)))?;
            }
            // SSTORE
            0x55 => {
                if frame.is_static {
                    return Err(VmError::StaticViolation);
                }
                let key = u256_to_h256(frame.pop()?);
                let value = u256_to_h256(frame.pop()?);
                let current = self.state.storage(frame.address, key);
                let cost = if current.is_zero() && !value.is_zero() {
                    gas::G_SSTORE_SET
                } else {
                    gas::G_SSTORE_RESET
                };
                frame.charge_gas(cost)?;
                self.charge(CounterKind::PoseidonHashes, self.cfg.poseidon_depth);
                self.charge(CounterKind::PoseidonPaddings, 1);
                self.state.set_storage(frame.address, key, value);
            }
            // JUMP
            0x56 => {
                frame.charge_gas(gas::G_MID)?;
                let dest = as_u64(frame.pop()?)? as usize;
                if !frame.jumpdests.contains(&dest) {
                    return Err(VmError::InvalidJump);
                }
                frame.pc = dest;
            }
            // JUMPI
            0x57 => {
                frame.charge_gas(gas::G_HIGH)?;
                let dest = frame.pop()?;
                let condition = frame.pop()?;
                if !condition.is_zero() {
                    let dest = as_u64(dest)? as usize;
                    if !frame.jumpdests.contains(&dest) {
                        return Err(VmError::InvalidJump);
                    }
                    frame.pc = dest;
                }
            }
            // PC
            0x58 => {
                frame.charge_gas(gas::G_BASE)?;
                frame.push(U256::from(frame.pc - 1))?;
            }
            // MSIZE
            0x59 => {
                frame.charge_gas(gas::G_BASE)?;
                frame.push(U256::from(frame.memory_words * 32))?;
            }
            // GAS
            0x5a => {
                frame.charge_gas(gas::G_BASE)?;
                frame.push(U256::from(frame.gas))?;
            }
            // JUMPDEST
            0x5b => {
                frame.charge_gas(gas::G_JUMPDEST)?;
            }
            // PUSH0
            0x5f => {
                frame.charge_gas(gas::G_BASE)?;
                frame.push(U256::zero())?;
            }
            // PUSH1..PUSH32
            0x60..=0x7f => {
                frame.charge_gas(gas::G_VERY_LOW)?;
                let n = (op - 0x5f) as usize;
                let end = (frame.pc + n).min(frame.code.len());
                let mut bytes = frame.code[frame.pc..end].to_vec();
                bytes.resize(n, 0);
                frame.pc += n;
                frame.push(U256::from_big_endian(&bytes))?;
            }
            // DUP1..DUP16
            0x80..=0x8f => {
                frame.charge_gas(gas::G_VERY_LOW)?;
                let n = (op - 0x80) as usize + 1;
                if frame.stack.len() < n {
                    return Err(VmError::StackUnderflow);
                }
                let value = frame.stack[frame.stack.len() - n];
                frame.push(value)?;
            }
            // SWAP1..SWAP16
            0x90..=0x9f => {
                frame.charge_gas(gas::G_VERY_LOW)?;
                let n = (op - 0x90) as usize + 1;
                let len = frame.stack.len();
                if len < n + 1 {
                    return Err(VmError::StackUnderflow);
                }
                frame.stack.swap(len - 1, len - 1 - n);
            }
            // LOG0..LOG4
            0xa0..=0xa4 => {
                if frame.is_static {
                    return Err(VmError::StaticViolation);
                }
                let topic_count = (op - 0xa0) as usize;
                let offset = frame.pop()?;
                let len = frame.pop()?;
                let byte_len = as_u64(len)?;
                frame.charge_gas(
                    gas::G_LOG
                        + gas::G_LOG_TOPIC * topic_count as u64
                        + gas::G_LOG_DATA_BYTE * byte_len,
                )?;
                let mut topics = Vec::with_capacity(topic_count);
                for _ in 0..topic_count {
                    topics.push(u256_to_h256(frame.pop()?));
                }
                let offset = frame.expand_memory(offset, len)?;
                let data = frame.read_memory(offset, byte_len);
                let log = Log {
                    address: frame.address,
                    topics,
                    data,
                };
                // Empty logs are invisible to the prover below fork 8.
                if !(log.is_empty() && self.cfg.fork_id.elides_empty_logs()) {
                    self.logs.push(log);
                }
            }
            // CREATE / CREATE2
            0xf0 | 0xf5 => {
                if frame.is_static {
                    return Err(VmError::StaticViolation);
                }
                let value = frame.pop()?;
                let offset = frame.pop()?;
                let len = frame.pop()?;
                let salt = if op == 0xf5 {
                    Some(u256_to_h256(frame.pop()?))
                } else {
                    None
                };
                let byte_len = as_u64(len)?;
                let mut cost = gas::G_CREATE;
                if op == 0xf5 {
                    cost += byte_len.div_ceil(32) * gas::G_KECCAK_WORD;
                }
                frame.charge_gas(cost)?;
                let offset = frame.expand_memory(offset, len)?;
                let init_code = frame.read_memory(offset, byte_len);
                self.charge(CounterKind::Keccak, (byte_len + 1).div_ceil(KECCAK_BLOCK_BYTES));

                let gas_for_child = frame.gas - frame.gas / 64;
                frame.gas -= gas_for_child;
                let opcode = if op == 0xf0 { "CREATE" } else { "CREATE2" };
                let (result, created) = self.create(
                    frame.address,
                    value,
                    init_code.clone(),
                    gas_for_child,
                    frame.depth + 1,
                    salt,
                );
                self.record_inner_tx(
                    frame.depth + 1,
                    opcode,
                    frame.address,
                    created.unwrap_or_default(),
                    value,
                    gas_for_child,
                    &init_code,
                    result.is_success(),
                );
                match result {
                    FrameResult::Return { gas_left, .. } => {
                        frame.gas += gas_left;
                        frame.return_data = Vec::new();
                        frame.push(address_to_u256(&created.unwrap_or_default()))?;
                    }
                    FrameResult::Revert { gas_left, data } => {
                        frame.gas += gas_left;
                        frame.return_data = data;
                        frame.push(U256::zero())?;
                    }
                    FrameResult::Error(_) => {
                        // Child gas is consumed; non-revert failures leave no
                        // return data.
                        frame.return_data = Vec::new();
                        frame.push(U256::zero())?;
                    }
                }
            }
            // CALL / CALLCODE / DELEGATECALL / STATICCALL
            0xf1 | 0xf2 | 0xf4 | 0xfa => self.op_call(frame, op)?,
            // RETURN
            0xf3 => {
                let offset = frame.pop()?;
                let len = frame.pop()?;
                let byte_len = as_u64(len)?;
                let offset = frame.expand_memory(offset, len)?;
                let data = frame.read_memory(offset, byte_len);
                return Ok(Some(FrameResult::Return {
                    gas_left: frame.gas,
                    data,
                }));
            }
            // REVERT
            0xfd => {
                let offset = frame.pop()?;
                let len = frame.pop()?;
                let byte_len = as_u64(len)?;
                let offset = frame.expand_memory(offset, len)?;
                let data = frame.read_memory(offset, byte_len);
                return Ok(Some(FrameResult::Revert {
                    gas_left: frame.gas,
                    data,
                }));
            }
            // INVALID
            0xfe => return Err(VmError::InvalidOpcode(0xfe)),
            // SELFDESTRUCT: transfers the balance, keeps the account.
            0xff => {
                if frame.is_static {
                    return Err(VmError::StaticViolation);
                }
                frame.charge_gas(gas::G_SELFDESTRUCT)?;
                self.charge(CounterKind::PoseidonHashes, self.cfg.poseidon_depth * 2);
                let beneficiary = u256_to_address(&frame.pop()?);
                let balance = self.state.balance(frame.address);
                if !balance.is_zero() && beneficiary != frame.address {
                    let drained = self.state.sub_balance(frame.address, balance);
                    debug_assert!(drained, "draining own balance cannot fail");
                    self.state.add_balance(beneficiary, balance);
                }
                return Ok(Some(FrameResult::Return {
                    gas_left: frame.gas,
                    data: Vec::new(),
                }));
            }
            other => return Err(VmError::InvalidOpcode(other)),
        }
        Ok(None)
    }

    fn op_arith(&mut self, frame: &mut Frame, op: u8) -> Result<(), VmError> {
        self.charge(CounterKind::Arith, 1);
        match op {
            // ADD
            0x01 => {
                frame.charge_gas(gas::G_VERY_LOW)?;
                let (a, b) = (frame.pop()?, frame.pop()?);
                frame.push(a.overflowing_add(b).0)?;
            }
            // MUL
            0x02 => {
                frame.charge_gas(gas::G_LOW)?;
                let (a, b) = (frame.pop()?, frame.pop()?);
                frame.push(a.overflowing_mul(b).0)?;
            }
            // SUB
            0x03 => {
                frame.charge_gas(gas::G_VERY_LOW)?;
                let (a, b) = (frame.pop()?, frame.pop()?);
                frame.push(a.overflowing_sub(b).0)?;
            }
            // DIV
            0x04 => {
                frame.charge_gas(gas::G_LOW)?;
                let (a, b) = (frame.pop()?, frame.pop()?);
                frame.push(if b.is_zero() { U256::zero() } else { a / b })?;
            }
            // SDIV
            0x05 => {
                frame.charge_gas(gas::G_LOW)?;
                let (a, b) = (frame.pop()?, frame.pop()?);
                frame.push(signed_div(a, b))?;
            }
            // MOD
            0x06 => {
                frame.charge_gas(gas::G_LOW)?;
                let (a, b) = (frame.pop()?, frame.pop()?);
                frame.push(if b.is_zero() { U256::zero() } else { a % b })?;
            }
            // SMOD
            0x07 => {
                frame.charge_gas(gas::G_LOW)?;
                let (a, b) = (frame.pop()?, frame.pop()?);
                frame.push(signed_mod(a, b))?;
            }
            // ADDMOD
            0x08 => {
                frame.charge_gas(gas::G_MID)?;
                let (a, b, n) = (frame.pop()?, frame.pop()?, frame.pop()?);
                frame.push(if n.is_zero() {
                    U256::zero()
                } else {
                    // Widen through u512-style splitting is overkill here;
                    // reduce operands first to keep the sum in range.
                    let a = a % n;
                    let b = b % n;
                    let (sum, overflow) = a.overflowing_add(b);
                    if overflow || sum >= n {
                        sum.overflowing_sub(n).0
                    } else {
                        sum
                    }
                })?;
            }
            // MULMOD
            0x09 => {
                frame.charge_gas(gas::G_MID)?;
                let (a, b, n) = (frame.pop()?, frame.pop()?, frame.pop()?);
                frame.push(mulmod(a, b, n))?;
            }
            // EXP
            0x0a => {
                let (base, exponent) = (frame.pop()?, frame.pop()?);
                let exp_bytes = (exponent.bits() as u64).div_ceil(8);
                frame.charge_gas(gas::G_EXP + gas::G_EXP_BYTE * exp_bytes)?;
                self.charge(CounterKind::Arith, exp_bytes);
                frame.push(base.overflowing_pow(exponent).0)?;
            }
            // SIGNEXTEND
            0x0b => {
                frame.charge_gas(gas::G_LOW)?;
                let (index, value) = (frame.pop()?, frame.pop()?);
                frame.push(sign_extend(index, value))?;
            }
            other => return Err(VmError::InvalidOpcode(other)),
        }
        Ok(())
    }

    fn op_binary(&mut self, frame: &mut Frame, op: u8) -> Result<(), VmError> {
        self.charge(CounterKind::Binary, 1);
        frame.charge_gas(gas::G_VERY_LOW)?;
        match op {
            // LT
            0x10 => {
                let (a, b) = (frame.pop()?, frame.pop()?);
                frame.push(bool_word(a < b))?;
            }
            // GT
            0x11 => {
                let (a, b) = (frame.pop()?, frame.pop()?);
                frame.push(bool_word(a > b))?;
            }
            // SLT
            0x12 => {
                let (a, b) = (frame.pop()?, frame.pop()?);
                frame.push(bool_word(signed_lt(a, b)))?;
            }
            // SGT
            0x13 => {
                let (a, b) = (frame.pop()?, frame.pop()?);
                frame.push(bool_word(signed_lt(b, a)))?;
            }
            // EQ
            0x14 => {
                let (a, b) = (frame.pop()?, frame.pop()?);
                frame.push(bool_word(a == b))?;
            }
            // ISZERO
            0x15 => {
                let a = frame.pop()?;
                frame.push(bool_word(a.is_zero()))?;
            }
            // AND
            0x16 => {
                let (a, b) = (frame.pop()?, frame.pop()?);
                frame.push(a & b)?;
            }
            // OR
            0x17 => {
                let (a, b) = (frame.pop()?, frame.pop()?);
                frame.push(a | b)?;
            }
            // XOR
            0x18 => {
                let (a, b) = (frame.pop()?, frame.pop()?);
                frame.push(a ^ b)?;
            }
            // NOT
            0x19 => {
                let a = frame.pop()?;
                frame.push(!a)?;
            }
            // BYTE
            0x1a => {
                let (index, value) = (frame.pop()?, frame.pop()?);
                let result = if index < U256::from(32u8) {
                    U256::from(value.byte(31 - index.as_u32() as usize))
                } else {
                    U256::zero()
                };
                frame.push(result)?;
            }
            // SHL
            0x1b => {
                let (shift, value) = (frame.pop()?, frame.pop()?);
                frame.push(if shift >= U256::from(256u16) {
                    U256::zero()
                } else {
                    value << shift.as_u32() as usize
                })?;
            }
            // SHR
            0x1c => {
                let (shift, value) = (frame.pop()?, frame.pop()?);
                frame.push(if shift >= U256::from(256u16) {
                    U256::zero()
                } else {
                    value >> shift.as_u32() as usize
                })?;
            }
            // SAR
            0x1d => {
                let (shift, value) = (frame.pop()?, frame.pop()?);
                frame.push(sar(shift, value))?;
            }
            other => return Err(VmError::InvalidOpcode(other)),
        }
        Ok(())
    }

    fn op_call(&mut self, frame: &mut Frame, op: u8) -> Result<(), VmError> {
        let gas_requested = frame.pop()?;
        let callee = u256_to_address(&frame.pop()?);
        let value = if op == 0xf1 || op == 0xf2 {
            frame.pop()?
        } else {
            U256::zero()
        };
        let in_offset = frame.pop()?;
        let in_len = frame.pop()?;
        let out_offset = frame.pop()?;
        let out_len = frame.pop()?;

        if op == 0xf1 && frame.is_static && !value.is_zero() {
            return Err(VmError::StaticViolation);
        }

        let mut cost = gas::G_CALL;
        let transfers_value = op == 0xf1 && !value.is_zero();
        if transfers_value {
            cost += gas::G_CALL_VALUE;
            if !self.state.exists(callee) && !precompiles::is_precompile(callee) {
                cost += gas::G_NEW_ACCOUNT;
            }
        }
        frame.charge_gas(cost)?;

        let in_offset = frame.expand_memory(in_offset, in_len)?;
        let input = frame.read_memory(in_offset, as_u64(in_len)?);
        // Reserve output space up front so a successful child can be copied
        // out without re-expanding.
        let out_offset_u = frame.expand_memory(out_offset, out_len)?;
        let out_len_u = as_u64(out_len)?;

        let max_forward = frame.gas - frame.gas / 64;
        let mut gas_for_child = as_u64(gas_requested.min(U256::from(u64::MAX)))?.min(max_forward);
        frame.gas -= gas_for_child;
        if transfers_value {
            gas_for_child += gas::G_CALL_STIPEND;
        }

        let (opcode, address, code_address, call_value, caller, is_static, apply_value) = match op {
            // CALL
            0xf1 => ("CALL", callee, callee, value, frame.address, frame.is_static, true),
            // CALLCODE: runs callee code against our storage.
            0xf2 => ("CALLCODE", frame.address, callee, value, frame.address, frame.is_static, false),
            // DELEGATECALL: keeps caller and value.
            0xf4 => ("DELEGATECALL", frame.address, callee, frame.value, frame.caller, frame.is_static, false),
            // STATICCALL
            0xfa => ("STATICCALL", callee, callee, U256::zero(), frame.address, true, false),
            _ => unreachable!("checked by the dispatcher"),
        };

        let params = CallParams {
            caller,
            address,
            code_address,
            value: call_value,
            apply_value,
            input: input.clone(),
            gas: gas_for_child,
            is_static,
            depth: frame.depth + 1,
        };
        let result = self.call(params);
        self.record_inner_tx(
            frame.depth + 1,
            opcode,
            frame.address,
            callee,
            call_value,
            gas_for_child,
            &input,
            result.is_success(),
        );

        match result {
            FrameResult::Return { gas_left, data } => {
                frame.gas += gas_left;
                write_call_output(frame, out_offset_u, out_len_u, &data);
                frame.return_data = data;
                frame.push(U256::one())?;
            }
            FrameResult::Revert { gas_left, data } => {
                frame.gas += gas_left;
                write_call_output(frame, out_offset_u, out_len_u, &data);
                frame.return_data = data;
                frame.push(U256::zero())?;
            }
            FrameResult::Error(_) => {
                frame.return_data = Vec::new();
                frame.push(U256::zero())?;
            }
        }
        Ok(())
    }

    /// Below fork 7 a contract invoked with empty calldata reads its own code
    /// through the calldata opcodes instead of zero padding.
    fn calldata_source(&self, frame: &Frame) -> Vec<u8> {
        if frame.input.is_empty() && !self.cfg.fork_id.supports_block_info_root() {
            frame.code.clone()
        } else {
            frame.input.clone()
        }
    }
}

fn write_call_output(frame: &mut Frame, out_offset: u64, out_len: u64, data: &[u8]) {
    if out_len == 0 {
        return;
    }
    let n = (out_len as usize).min(data.len());
    frame.memory[out_offset as usize..out_offset as usize + n].copy_from_slice(&data[..n]);
}

fn copy_to_memory(
    frame: &mut Frame,
    dest: U256,
    src: U256,
    len: U256,
    source: &[u8],
) -> Result<(), VmError> {
    if len.is_zero() {
        return Ok(());
    }
    let dest = frame.expand_memory(dest, len)?;
    let (src, len) = (as_u64(src)?, as_u64(len)?);
    for i in 0..len {
        let byte = source.get((src + i) as usize).copied().unwrap_or(0);
        frame.memory[(dest + i) as usize] = byte;
    }
    Ok(())
}

fn bool_word(value: bool) -> U256 {
    if value {
        U256::one()
    } else {
        U256::zero()
    }
}

const SIGN_BIT: u32 = 255;

fn is_negative(value: U256) -> bool {
    value.bit(SIGN_BIT as usize)
}

fn twos_complement(value: U256) -> U256 {
    (!value).overflowing_add(U256::one()).0
}

fn signed_lt(a: U256, b: U256) -> bool {
    match (is_negative(a), is_negative(b)) {
        (true, false) => true,
        (false, true) => false,
        _ => a < b,
    }
}

fn signed_div(a: U256, b: U256) -> U256 {
    if b.is_zero() {
        return U256::zero();
    }
    let negative = is_negative(a) != is_negative(b);
    let a_abs = if is_negative(a) { twos_complement(a) } else { a };
    let b_abs = if is_negative(b) { twos_complement(b) } else { b };
    let quotient = a_abs / b_abs;
    if negative {
        twos_complement(quotient)
    } else {
        quotient
    }
}

fn signed_mod(a: U256, b: U256) -> U256 {
    if b.is_zero() {
        return U256::zero();
    }
    let a_abs = if is_negative(a) { twos_complement(a) } else { a };
    let b_abs = if is_negative(b) { twos_complement(b) } else { b };
    let remainder = a_abs % b_abs;
    if is_negative(a) {
        twos_complement(remainder)
    } else {
        remainder
    }
}

fn mulmod(a: U256, b: U256, n: U256) -> U256 {
    if n.is_zero() {
        return U256::zero();
    }
    // Schoolbook double-and-add keeps everything inside 256 bits.
    let mut result = U256::zero();
    let mut a = a % n;
    let mut b = b % n;
    while !b.is_zero() {
        if b.bit(0) {
            let (sum, overflow) = result.overflowing_add(a);
            result = if overflow || sum >= n {
                sum.overflowing_sub(n).0
            } else {
                sum
            };
        }
        let (doubled, overflow) = a.overflowing_add(a);
        a = if overflow || doubled >= n {
            doubled.overflowing_sub(n).0
        } else {
            doubled
        };
        b = b >> 1;
    }
    result
}

fn sign_extend(index: U256, value: U256) -> U256 {
    if index >= U256::from(31u8) {
        return value;
    }
    let bit = index.as_u32() as usize * 8 + 7;
    if value.bit(bit) {
        let mask = (U256::one() << (bit + 1)) - U256::one();
        value | !mask
    } else {
        let mask = (U256::one() << (bit + 1)) - U256::one();
        value & mask
    }
}

fn sar(shift: U256, value: U256) -> U256 {
    let negative = is_negative(value);
    if shift >= U256::from(256u16) {
        return if negative { !U256::zero() } else { U256::zero() };
    }
    let shift = shift.as_u32() as usize;
    let shifted = value >> shift;
    if negative && shift > 0 {
        let mask = !(U256::MAX >> shift);
        shifted | mask
    } else {
        shifted
    }
}

fn rlp_address_nonce(address: Address, nonce: u64) -> Vec<u8> {
    // Minimal RLP of `[address, nonce]` for the classic CREATE address rule.
    let mut nonce_bytes = nonce.to_be_bytes().to_vec();
    while nonce_bytes.first() == Some(&0) {
        nonce_bytes.remove(0);
    }
    let mut payload = Vec::with_capacity(24);
    payload.push(0x80 + 20);
    payload.extend_from_slice(address.as_bytes());
    match nonce_bytes.len() {
        0 => payload.push(0x80),
        1 if nonce_bytes[0] < 0x80 => payload.push(nonce_bytes[0]),
        n => {
            payload.push(0x80 + n as u8);
            payload.extend_from_slice(&nonce_bytes);
        }
    }
    let mut out = Vec::with_capacity(payload.len() + 1);
    out.push(0xc0 + payload.len() as u8);
    out.extend_from_slice(&payload);
    out
}

pub(crate) use self::entrypoint::execute_message;

mod entrypoint {
    use super::*;

    /// Top-level message execution used by `apply_transaction`.
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn execute_message(
        interpreter: &mut Interpreter<'_>,
        from: Address,
        to: Option<Address>,
        value: U256,
        data: Vec<u8>,
        gas: u64,
    ) -> (FrameResult, Option<Address>) {
        match to {
            Some(to) => {
                let params = CallParams {
                    caller: from,
                    address: to,
                    code_address: to,
                    value,
                    apply_value: true,
                    input: data,
                    gas,
                    is_static: false,
                    depth: 0,
                };
                (interpreter.call(params), None)
            }
            None => interpreter.create(from, value, data, gas, 0, None),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn signed_ops_handle_negatives() {
        let minus_one = twos_complement(U256::one());
        assert!(signed_lt(minus_one, U256::one()));
        assert!(!signed_lt(U256::one(), minus_one));
        assert_eq!(signed_div(minus_one, U256::one()), minus_one);
        assert_eq!(
            signed_div(twos_complement(U256::from(10u64)), U256::from(2u64)),
            twos_complement(U256::from(5u64))
        );
    }

    #[test]
    fn mulmod_matches_small_cases() {
        assert_eq!(
            mulmod(U256::from(10u64), U256::from(10u64), U256::from(8u64)),
            U256::from(4u64)
        );
        assert_eq!(
            mulmod(U256::MAX, U256::MAX, U256::from(7u64)),
            (U256::MAX % U256::from(7u64)) * (U256::MAX % U256::from(7u64)) % U256::from(7u64)
        );
        assert_eq!(mulmod(U256::one(), U256::one(), U256::zero()), U256::zero());
    }

    #[test]
    fn sar_fills_sign_bits() {
        let minus_eight = twos_complement(U256::from(8u64));
        assert_eq!(
            sar(U256::from(1u8), minus_eight),
            twos_complement(U256::from(4u64))
        );
        assert_eq!(sar(U256::from(300u16), minus_eight), !U256::zero());
        assert_eq!(sar(U256::from(300u16), U256::from(8u64)), U256::zero());
    }

    #[test]
    fn jumpdest_scan_skips_push_payloads() {
        // PUSH2 0x5b5b JUMPDEST
        let code = [0x61, 0x5b, 0x5b, 0x5b];
        let dests = scan_jumpdests(&code);
        assert!(dests.contains(&3));
        assert!(!dests.contains(&1));
        assert!(!dests.contains(&2));
    }
}
