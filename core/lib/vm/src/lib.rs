//! The state executor: deterministic application of a transaction against
//! intra-block state, producing a receipt, an execution result, counter
//! deltas and (through the committer) the post-root.
//!
//! The interpreter follows stock EVM semantics except where the proving
//! system dictates otherwise (block hashes, block number, difficulty,
//! selfdestruct, empty logs, creation return data, empty-calldata reads).
//! Trie math itself stays behind the [`StateCommitment`] seam.

pub use self::{
    apply::{apply_transaction, TxOutput},
    commitment::{KeccakCommitment, StateCommitment},
    config::{BlockContext, VmConfig, GER_MANAGER_ADDRESS, SYSROM_ADDRESS},
    errors::{TxError, VmError},
    state::{Account, InMemoryState, Snapshot},
    tracer::InnerTx,
};

mod apply;
mod commitment;
mod config;
mod errors;
mod gas;
mod interpreter;
mod precompiles;
mod state;
mod tracer;
