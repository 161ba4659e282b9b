use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Configuration for the verifier bridge and its remote executors.
#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
pub struct ExecutorConfig {
    /// Prover endpoints, tried round-robin.
    pub executor_urls: Vec<String>,

    /// Treat any executor disagreement as fatal instead of unwinding.
    pub executor_strict_mode: bool,

    /// Per-request timeout.
    /// Value in milliseconds.
    pub executor_request_timeout_ms: u64,

    /// Upper bound on concurrently outstanding verification requests.
    pub executor_max_concurrent_requests: u32,

    /// Send full witnesses rather than trimmed ones.
    pub witness_full: bool,
}

impl ExecutorConfig {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.executor_request_timeout_ms)
    }
}

impl ExecutorConfig {
    /// Creates a mock configuration object suitable for unit tests.
    pub fn for_tests() -> Self {
        Self {
            executor_urls: vec!["http://localhost:50071".to_string()],
            executor_strict_mode: false,
            executor_request_timeout_ms: 5_000,
            executor_max_concurrent_requests: 4,
            witness_full: false,
        }
    }
}
