//! Definitions of the data structures flowing through the sequencing
//! pipeline: batches, L2 blocks, transactions, L1 info tree updates and the
//! records the L1 follower distills from rollup-manager events.

pub use cdk_basic_types::{
    Address, BatchNumber, ForkId, L1BlockNumber, L1InfoTreeIndex, L2BlockNumber, H160, H256, U256,
};

pub mod batch;
pub mod batch_l2_data;
pub mod block;
pub mod hasher;
pub mod l1_events;
pub mod l1_info_tree;
pub mod receipt;
pub mod transaction;

pub use self::{
    batch::Batch,
    block::{L2BlockHeader, SealedL2Block},
    l1_info_tree::L1InfoTreeUpdate,
    receipt::{Log, TxReceipt},
    transaction::Transaction,
};
