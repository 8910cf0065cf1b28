//! Engine statistics
//!
//! Counters for lines, triggers, and frames, logged on exit.

pub mod counters;
