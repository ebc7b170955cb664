//! Real-time signal-graph construction

pub mod builder;
pub mod stages;

pub use builder::{
    noise_reduction_cutoff_hz, select_latency_mode, ChainTopology, LatencyMode, SignalChain,
};

use parking_lot::Mutex;
use std::sync::Arc;

/// Chain handle shared between the engine and the playback callback
pub type SharedChain = Arc<Mutex<SignalChain>>;

/// Creates a shared, initially empty chain
pub fn shared_chain(sample_rate: u32) -> SharedChain {
    Arc::new(Mutex::new(SignalChain::empty(sample_rate)))
}
