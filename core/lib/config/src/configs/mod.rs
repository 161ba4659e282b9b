pub use self::{
    datastream::DatastreamConfig,
    effective_gas_price::EffectiveGasPriceConfig,
    executor::ExecutorConfig,
    l1_watch::{L1BlockTag, L1WatchConfig},
    sequencer::SequencerConfig,
};

mod datastream;
mod effective_gas_price;
mod executor;
mod l1_watch;
mod sequencer;
