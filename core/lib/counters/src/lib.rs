//! Accounting of the prover's bounded virtual resources.
//!
//! Every transaction and every batch carries a vector of counters (steps,
//! arithmetics, binaries, mem-aligns, keccaks, poseidons, paddings, SHA-256)
//! plus the L2-data byte budget. A batch collector aggregates transaction
//! collectors and fixed per-block/per-batch overheads; overflow of any single
//! counter seals the batch. Collectors are plain values: cloning one is the
//! snapshot, dropping the clone is the rollback.

pub use self::{
    batch::BatchCounterCollector,
    kind::{CounterKind, Counters},
    limits::CounterLimits,
    smt::precompute_hash_costs,
    transaction::TransactionCounter,
};

mod batch;
mod kind;
mod limits;
mod smt;
mod transaction;
