#![allow(clippy::upper_case_acronyms, clippy::derive_partial_eq_without_eq)]

pub use crate::configs::{
    DatastreamConfig, EffectiveGasPriceConfig, ExecutorConfig, L1WatchConfig, L1BlockTag,
    SequencerConfig,
};

pub mod configs;
