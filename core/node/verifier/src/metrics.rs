//! Metrics for the verifier bridge.

use vise::{Counter, Metrics};

#[derive(Debug, Metrics)]
#[metrics(prefix = "cdk_verifier")]
pub(crate) struct VerifierMetrics {
    /// Number of verification requests submitted.
    pub requests_submitted: Counter,

    /// Number of prover responses received.
    pub responses_received: Counter,

    /// Number of cancel-all sweeps.
    pub cancellations: Counter,
}

#[vise::register]
pub(crate) static METRICS: vise::Global<VerifierMetrics> = vise::Global::new();
