//! pqscope Core - Trigger and framing engine for a power-quality monitor
//!
//! This library turns an unbounded stream of 4-channel samples (voltage,
//! current, power, earth-leakage current) into fixed-length frames anchored
//! on a trigger event, the way an oscilloscope trigger circuit does.

pub mod scope;
pub mod settings;
pub mod stats;

pub use scope::{
    config::ScopeConfig, engine::Engine, sample::Sample, scheduler::FrameScheduler,
    store::SampleStore,
};
pub use settings::Settings;
pub use stats::counters::EngineStats;

/// Library version from Cargo.toml
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Build date stamped by build.rs
pub const BUILD_DATE: &str = env!("BUILD_DATE");

/// Number of channels carried by every sample
pub const CHANNELS: usize = 4;

/// Default ring buffer capacity in samples (several seconds at typical rates)
pub const DEFAULT_CAPACITY: usize = 65536;

/// Default acquisition sample rate in Hz
pub const DEFAULT_SAMPLE_RATE: f64 = 8000.0;
