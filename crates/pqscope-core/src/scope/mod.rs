//! Scope trigger-and-framing pipeline
//!
//! Data flows one sample at a time:
//! - Line parsing into a 4-channel [`sample::Sample`] ([`sample`])
//! - Append into the ring buffer ([`store`])
//! - Trigger evaluation on the newest sample pair ([`trigger`])
//! - Window computation and frame emission ([`scheduler`])
//! - Frame formatting ([`output`])
//!
//! Reconfiguration is applied between samples through [`config`], and
//! [`engine`] drives the whole loop from a line-oriented input stream.

pub mod config;
pub mod engine;
pub mod output;
pub mod sample;
pub mod scheduler;
pub mod store;
pub mod trigger;
