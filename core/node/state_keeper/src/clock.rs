//! Shared readable view on wall-clock time, so tests can drive timestamps
//! through the paused tokio clock.

use std::{
    fmt,
    time::{SystemTime, UNIX_EPOCH},
};

pub trait Clock: 'static + fmt::Debug + Send + Sync {
    /// Current timestamp in seconds.
    fn now(&self) -> u64;
}

/// Real wall clock.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> u64 {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .expect("time went backwards")
            .as_secs()
    }
}

/// Clock anchored to the tokio runtime; advances with `tokio::time`, which
/// makes it deterministic under `start_paused` tests.
#[derive(Debug, Clone)]
pub struct TokioClock {
    origin_timestamp: u64,
    origin: tokio::time::Instant,
}

impl TokioClock {
    pub fn starting_at(origin_timestamp: u64) -> Self {
        Self {
            origin_timestamp,
            origin: tokio::time::Instant::now(),
        }
    }
}

impl Clock for TokioClock {
    fn now(&self) -> u64 {
        self.origin_timestamp + self.origin.elapsed().as_secs()
    }
}
