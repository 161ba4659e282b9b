//! The staged-sync orchestrator: a fixed stage list with forward, unwind
//! and prune hooks and persisted per-stage block progress. Forward proceeds
//! bottom-up; unwind is triggered upward from execution and propagates in
//! reverse stage order, which is what keeps the datastream truncation ahead
//! of the state unwind.

pub use self::{
    orchestrator::StagedSync,
    stage::{Stage, StageId},
    stages::{DatastreamStage, ExecutionStage, PassiveStage},
};

mod orchestrator;
mod stage;
mod stages;

#[cfg(test)]
mod tests;
