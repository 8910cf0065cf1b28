//! pqscope - Trigger and framing engine for a power-quality monitor
//!
//! This library re-exports the engine, settings, and statistics from
//! `pqscope-core`. The `pqscope` binary wires them to stdin/stdout.

pub use pqscope_core::scope;
pub use pqscope_core::settings;
pub use pqscope_core::stats;

pub use pqscope_core::{Engine, EngineStats, FrameScheduler, Sample, SampleStore, ScopeConfig, Settings};
pub use pqscope_core::{BUILD_DATE, CHANNELS, DEFAULT_CAPACITY, DEFAULT_SAMPLE_RATE, VERSION};
