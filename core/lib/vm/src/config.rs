use cdk_basic_types::{conversions::u256_to_h256, Address, ForkId, L2BlockNumber, H256, U256};

use crate::state::InMemoryState;

/// System contract the block preamble writes the current block number and
/// timestamp into; `NUMBER` and friends read them back from here.
pub const SYSROM_ADDRESS: Address = Address::repeat_byte(0x5c);
/// Storage slot of the block number inside the sysrom.
pub const SYSROM_SLOT_BLOCK_NUMBER: u64 = 0;
/// Storage slot of the block timestamp inside the sysrom.
pub const SYSROM_SLOT_TIMESTAMP: u64 = 1;

/// System contract holding the map of published global exit roots.
pub const GER_MANAGER_ADDRESS: Address = Address::repeat_byte(0xa4);

/// Execution parameters fixed for a batch.
#[derive(Debug, Clone)]
pub struct VmConfig {
    pub chain_id: u64,
    pub fork_id: ForkId,
    /// Poseidon cost charged per state access, derived from the SMT depth.
    pub poseidon_depth: u64,
}

impl VmConfig {
    pub fn new(chain_id: u64, fork_id: ForkId, poseidon_depth: u64) -> Self {
        Self {
            chain_id,
            fork_id,
            poseidon_depth,
        }
    }
}

/// Per-block execution context.
#[derive(Debug, Clone)]
pub struct BlockContext {
    pub number: L2BlockNumber,
    pub timestamp: u64,
    pub coinbase: Address,
    pub gas_limit: u64,
    pub base_fee: U256,
}

impl BlockContext {
    /// Writes the block preamble into state: the sysrom block registers and,
    /// when the block consumed an info-tree update, the GER map entry.
    pub fn apply_preamble(&self, state: &mut InMemoryState, ger: Option<H256>) {
        state.set_storage(
            SYSROM_ADDRESS,
            u256_to_h256(U256::from(SYSROM_SLOT_BLOCK_NUMBER)),
            u256_to_h256(U256::from(self.number.0)),
        );
        state.set_storage(
            SYSROM_ADDRESS,
            u256_to_h256(U256::from(SYSROM_SLOT_TIMESTAMP)),
            u256_to_h256(U256::from(self.timestamp)),
        );
        if let Some(ger) = ger {
            state.set_storage(
                GER_MANAGER_ADDRESS,
                ger,
                u256_to_h256(U256::from(self.timestamp)),
            );
        }
    }
}
