//! The sequencer loop: a batch → block → transaction state machine that
//! pulls from the mempool, executes against intra-block state under counter
//! accounting, and emits the ordered batch stream.

pub use self::{
    clock::{Clock, SystemClock, TokioClock},
    keeper::{KeeperMode, StateKeeper},
    seal_criteria::{SealData, SealResolution},
};

mod clock;
mod keeper;
mod metrics;
mod seal_criteria;

#[cfg(test)]
mod tests;
