//! The verifier bridge: fire-and-forget submission of sealed batches to an
//! external prover, with responses surfaced strictly in batch order.

pub use self::{
    bridge::{VerificationOutcome, VerificationRequest, Verdict, VerifierBridge},
    client::{HttpProverClient, LocalShadowVerifier, ProverClient, ProverResponse, VerifyInputs},
};

mod bridge;
mod client;
mod metrics;

#[cfg(test)]
mod tests;
