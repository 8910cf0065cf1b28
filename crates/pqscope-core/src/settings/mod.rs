//! External settings collaborator boundary
//!
//! The engine never reads global state. It pulls a [`Settings`] record from
//! a [`SettingsSource`] when notified that settings changed, and derives
//! its own parameters from it (see [`crate::scope::config`]).
//!
//! - [`file`]: JSON settings file on disk
//! - [`watch`]: file watcher that delivers change notifications

pub mod file;
pub mod watch;

pub use file::JsonSettingsFile;
pub use watch::SettingsWatcher;

use crate::scope::sample::{CURRENT, LEAKAGE, POWER, VOLTAGE};
use crate::scope::scheduler::RunState;
use crate::scope::trigger::Slope;
use crate::CHANNELS;
use serde::{Deserialize, Serialize};
use std::sync::{Arc, Mutex};
use thiserror::Error;

/// Errors raised while pulling settings from a source
#[derive(Error, Debug)]
pub enum SettingsError {
    #[error("settings I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("malformed settings: {0}")]
    Json(#[from] serde_json::Error),

    #[error("settings watcher error: {0}")]
    Watch(#[from] notify::Error),

    #[error("settings source unavailable")]
    Unavailable,
}

/// Trigger mode selected by the operator
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TriggerMode {
    Freerun,
    #[default]
    Sync,
    Inrush,
}

fn default_sample_rate() -> f64 {
    crate::DEFAULT_SAMPLE_RATE
}

fn default_time_per_division() -> f64 {
    0.004
}

fn default_horizontal_divisions() -> u32 {
    10
}

fn default_pre_trigger_percent() -> f64 {
    50.0
}

fn default_trigger_channel() -> usize {
    VOLTAGE
}

fn default_inrush_threshold() -> f64 {
    10.0
}

fn default_inrush_channel() -> usize {
    CURRENT
}

fn default_holdoff_margin_ms() -> f64 {
    2.0
}

/// Operator-facing settings from which all engine parameters are derived
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Settings {
    /// Acquisition sample rate in Hz
    #[serde(default = "default_sample_rate")]
    pub sample_rate: f64,
    /// Timebase in seconds per horizontal division
    #[serde(default = "default_time_per_division")]
    pub time_per_division: f64,
    /// Number of horizontal divisions in one frame
    #[serde(default = "default_horizontal_divisions")]
    pub horizontal_divisions: u32,
    /// Share of the frame before the trigger instant (0-100)
    #[serde(default = "default_pre_trigger_percent")]
    pub pre_trigger_percent: f64,
    #[serde(default)]
    pub trigger_mode: TriggerMode,
    #[serde(default)]
    pub trigger_slope: Slope,
    /// Level-crossing threshold in physical units
    #[serde(default)]
    pub trigger_level: f64,
    #[serde(default = "default_trigger_channel")]
    pub trigger_channel: usize,
    /// Magnitude that fires the single-shot inrush capture
    #[serde(default = "default_inrush_threshold")]
    pub inrush_threshold: f64,
    #[serde(default = "default_inrush_channel")]
    pub inrush_channel: usize,
    /// Margin subtracted from the frame length to form the sync hold-off
    #[serde(default = "default_holdoff_margin_ms")]
    pub holdoff_margin_ms: f64,
    /// Requested run state; a change of this field is a run/stop command
    #[serde(default)]
    pub run_state: RunState,
    #[serde(default)]
    pub display: DisplaySettings,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            sample_rate: default_sample_rate(),
            time_per_division: default_time_per_division(),
            horizontal_divisions: default_horizontal_divisions(),
            pre_trigger_percent: default_pre_trigger_percent(),
            trigger_mode: TriggerMode::default(),
            trigger_slope: Slope::default(),
            trigger_level: 0.0,
            trigger_channel: default_trigger_channel(),
            inrush_threshold: default_inrush_threshold(),
            inrush_channel: default_inrush_channel(),
            holdoff_margin_ms: default_holdoff_margin_ms(),
            run_state: RunState::default(),
            display: DisplaySettings::default(),
        }
    }
}

/// Display geometry for the pixel-mapped output format
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DisplaySettings {
    /// Plot width in pixels
    pub width: u32,
    /// Plot height in pixels
    pub height: u32,
    pub vertical_divisions: u32,
    /// Physical units per vertical division, per channel
    pub channel_scales: [f64; CHANNELS],
}

impl Default for DisplaySettings {
    fn default() -> Self {
        let mut channel_scales = [1.0; CHANNELS];
        channel_scales[VOLTAGE] = 100.0;
        channel_scales[CURRENT] = 10.0;
        channel_scales[POWER] = 1000.0;
        channel_scales[LEAKAGE] = 0.01;
        Self {
            width: 700,
            height: 480,
            vertical_divisions: 8,
            channel_scales,
        }
    }
}

/// Something the engine can re-pull settings from
pub trait SettingsSource {
    /// Load the current settings
    fn load(&self) -> Result<Settings, SettingsError>;
}

/// Fixed in-memory settings
impl SettingsSource for Settings {
    fn load(&self) -> Result<Settings, SettingsError> {
        Ok(self.clone())
    }
}

/// In-memory settings that another owner may update between notifications
impl SettingsSource for Arc<Mutex<Settings>> {
    fn load(&self) -> Result<Settings, SettingsError> {
        self.lock()
            .map(|s| s.clone())
            .map_err(|_| SettingsError::Unavailable)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_settings() {
        let settings = Settings::default();
        assert_eq!(settings.sample_rate, 8000.0);
        assert_eq!(settings.trigger_mode, TriggerMode::Sync);
        assert_eq!(settings.trigger_slope, Slope::Rising);
        assert_eq!(settings.run_state, RunState::Running);
        assert_eq!(settings.holdoff_margin_ms, 2.0);
    }

    #[test]
    fn test_empty_json_uses_defaults() {
        let settings: Settings = serde_json::from_str("{}").unwrap();
        assert_eq!(settings, Settings::default());
    }

    #[test]
    fn test_partial_json() {
        let json = r#"{"trigger_mode": "inrush", "inrush_threshold": 0.2, "display": {"width": 320}}"#;
        let settings: Settings = serde_json::from_str(json).unwrap();
        assert_eq!(settings.trigger_mode, TriggerMode::Inrush);
        assert_eq!(settings.inrush_threshold, 0.2);
        assert_eq!(settings.display.width, 320);
        assert_eq!(settings.display.height, 480);
        assert_eq!(settings.time_per_division, 0.004);
    }

    #[test]
    fn test_enum_spelling() {
        let json = r#"{"trigger_slope": "falling", "run_state": "stopped"}"#;
        let settings: Settings = serde_json::from_str(json).unwrap();
        assert_eq!(settings.trigger_slope, Slope::Falling);
        assert_eq!(settings.run_state, RunState::Stopped);

        let bad = r#"{"trigger_mode": "sideways"}"#;
        assert!(serde_json::from_str::<Settings>(bad).is_err());
    }

    #[test]
    fn test_shared_source_sees_updates() {
        let shared = Arc::new(Mutex::new(Settings::default()));
        shared.lock().unwrap().trigger_level = 3.5;
        assert_eq!(shared.load().unwrap().trigger_level, 3.5);
    }
}
