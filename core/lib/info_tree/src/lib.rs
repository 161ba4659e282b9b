//! The two Merkle commitments the sequencing pipeline maintains: the
//! per-block info tree over transaction outcomes, and the dense L1 info
//! tree over global-exit-root publications.

pub use self::{
    block_info_tree::{BlockInfoTree, BlockInfoTreeError, BlockPreamble, BlockTxLeaf},
    l1_info_tree::{L1InfoTree, L1InfoTreeError},
};

mod block_info_tree;
mod l1_info_tree;
