//! Configuration Port: derived parameters and their atomic swap
//!
//! Operator settings (timebase, pre-trigger share, trigger mode/slope/level)
//! are turned into the integer sample counts the engine works with by
//! [`ScopeConfig::derive`], a pure function of its inputs.
//!
//! Reconfiguration is signalled out-of-band. A notification lands in a
//! single-slot channel ([`notification_channel`]); repeated notifications
//! before the engine gets to them coalesce into one. The engine checks the
//! slot with [`ConfigPort::poll`] between two samples only, re-pulls the
//! settings, and swaps the whole [`ScopeConfig`] in one step.

use super::output::PixelMap;
use super::scheduler::{RunCommand, RunState};
use super::trigger::{InrushParams, SyncParams, TriggerPolicy};
use crate::settings::{Settings, SettingsError, SettingsSource, TriggerMode};
use crate::CHANNELS;
use crossbeam_channel::{Receiver, Sender, TryRecvError, TrySendError};
use thiserror::Error;

/// Tolerance for snapping a samples-per-frame ratio to an integer
const SNAP_TOLERANCE: f64 = 1e-9;

/// Errors raised while deriving or re-pulling configuration
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("frame of {frame_samples} samples exceeds the limit of {limit} for this ring capacity")]
    FrameExceedsCapacity { frame_samples: u64, limit: u64 },

    #[error(transparent)]
    Settings(#[from] SettingsError),
}

/// Integer sample counts and timing derived from [`Settings`]
#[derive(Debug, Clone, PartialEq)]
pub struct DerivedParams {
    /// Seconds between samples
    pub interval: f64,
    /// Samples per frame
    pub frame_samples: u64,
    /// Samples before the trigger instant
    pub pre_trigger_samples: u64,
    /// Samples after the trigger instant
    pub post_trigger_samples: u64,
    /// Samples after a confirmed trigger before another Sync trigger is recognised
    pub sync_holdoff: u64,
    /// Samples after arming before the Inrush trigger is recognised
    pub inrush_holdoff: u64,
    /// Fractional samples per frame carried by the Freerun drift clock
    pub freerun_increment: f64,
    pub pixels: PixelMap,
}

impl DerivedParams {
    /// Derive parameters for a ring buffer of `capacity` samples
    ///
    /// Frames longer than half the capacity minus two samples are rejected.
    /// With the stopped-mode look-ahead of half the capacity, this keeps the
    /// full lookback of a frozen frame resident (including the extra sample
    /// before the trigger when the fraction is below 0.5), and leaves room
    /// to store the whole post-trigger tail before the look-ahead is reached.
    ///
    /// # Example
    /// ```
    /// use pqscope_core::scope::config::DerivedParams;
    /// use pqscope_core::Settings;
    ///
    /// let settings = Settings {
    ///     sample_rate: 1000.0,
    ///     time_per_division: 0.01,
    ///     horizontal_divisions: 10,
    ///     pre_trigger_percent: 25.0,
    ///     ..Settings::default()
    /// };
    /// let params = DerivedParams::derive(&settings, 4096).unwrap();
    /// assert_eq!(params.frame_samples, 100);
    /// assert_eq!(params.pre_trigger_samples, 25);
    /// assert_eq!(params.post_trigger_samples, 75);
    /// assert_eq!(params.freerun_increment, 0.0);
    /// ```
    pub fn derive(settings: &Settings, capacity: usize) -> Result<Self, ConfigError> {
        let sample_rate = settings.sample_rate;
        let interval = 1.0 / sample_rate;

        let frame_duration = settings.time_per_division * f64::from(settings.horizontal_divisions);
        let mut exact = frame_duration * sample_rate;
        if (exact - exact.round()).abs() < SNAP_TOLERANCE {
            exact = exact.round();
        }
        let whole = exact.floor();
        let frame_samples = whole as u64;
        let freerun_increment = exact - whole;

        let limit = (capacity / 2).saturating_sub(2) as u64;
        if frame_samples > limit {
            return Err(ConfigError::FrameExceedsCapacity {
                frame_samples,
                limit,
            });
        }

        let pre_trigger_samples =
            ((frame_samples as f64 * settings.pre_trigger_percent / 100.0).round() as u64)
                .min(frame_samples);
        let post_trigger_samples = frame_samples - pre_trigger_samples;

        let margin = (settings.holdoff_margin_ms * sample_rate / 1000.0).round() as u64;

        let pixels = PixelMap::new(
            &settings.display,
            pre_trigger_samples as f64 * interval,
            frame_samples as f64 * interval,
        );

        Ok(Self {
            interval,
            frame_samples,
            pre_trigger_samples,
            post_trigger_samples,
            sync_holdoff: frame_samples.saturating_sub(margin),
            inrush_holdoff: pre_trigger_samples,
            freerun_increment,
            pixels,
        })
    }
}

/// Everything the scheduler needs, swapped as one unit
#[derive(Debug, Clone, PartialEq)]
pub struct ScopeConfig {
    pub params: DerivedParams,
    pub policy: TriggerPolicy,
    /// Run state requested by the settings
    pub run_state: RunState,
}

impl ScopeConfig {
    /// Derive the full configuration from settings
    pub fn derive(settings: &Settings, capacity: usize) -> Result<Self, ConfigError> {
        let params = DerivedParams::derive(settings, capacity)?;
        check_channels(settings);
        let sync = SyncParams {
            slope: settings.trigger_slope,
            level: settings.trigger_level,
            channel: settings.trigger_channel,
        };
        let policy = match settings.trigger_mode {
            TriggerMode::Freerun => TriggerPolicy::Freerun,
            TriggerMode::Sync => TriggerPolicy::Sync(sync),
            TriggerMode::Inrush => TriggerPolicy::Inrush {
                sync,
                inrush: InrushParams {
                    threshold: settings.inrush_threshold,
                    channel: settings.inrush_channel,
                },
            },
        };
        Ok(Self {
            params,
            policy,
            run_state: settings.run_state,
        })
    }
}

/// Warn about trigger channels no sample carries
///
/// Such a channel reads as 0.0 on every sample. Returns false if any
/// channel used by the selected mode is out of range.
fn check_channels(settings: &Settings) -> bool {
    let mut used = Vec::with_capacity(2);
    match settings.trigger_mode {
        TriggerMode::Freerun => {}
        TriggerMode::Sync => used.push(("trigger_channel", settings.trigger_channel)),
        TriggerMode::Inrush => {
            used.push(("trigger_channel", settings.trigger_channel));
            used.push(("inrush_channel", settings.inrush_channel));
        }
    }
    let mut valid = true;
    for (field, channel) in used {
        if channel >= CHANNELS {
            tracing::warn!(
                field = field,
                channel = channel,
                channels = CHANNELS,
                "Trigger channel out of range, it reads as 0.0"
            );
            valid = false;
        }
    }
    valid
}

/// A configuration ready to apply at the next safe point
#[derive(Debug, Clone)]
pub struct Update {
    pub config: ScopeConfig,
    /// Run/stop command implied by a change of the requested run state
    pub command: Option<RunCommand>,
}

/// Sending half of the single-slot notification channel
#[derive(Debug, Clone)]
pub struct ConfigNotifier {
    tx: Sender<()>,
}

impl ConfigNotifier {
    /// Signal that settings changed
    ///
    /// Never blocks. A notification already waiting in the slot absorbs this one.
    pub fn notify(&self) {
        match self.tx.try_send(()) {
            Ok(()) | Err(TrySendError::Full(())) => {}
            Err(TrySendError::Disconnected(())) => {
                tracing::trace!("config_port_closed");
            }
        }
    }
}

/// Receives change notifications and re-pulls settings at the safe point
pub struct ConfigPort<S: SettingsSource> {
    source: S,
    notifications: Option<Receiver<()>>,
    capacity: usize,
    /// Run state of the last applied settings
    applied_run_state: RunState,
}

/// Create the single-slot notification channel
pub fn notification_channel() -> (ConfigNotifier, Receiver<()>) {
    let (tx, rx) = crossbeam_channel::bounded(1);
    (ConfigNotifier { tx }, rx)
}

impl<S: SettingsSource> ConfigPort<S> {
    /// Create a port over `source`
    ///
    /// # Arguments
    /// * `source` - Where settings are re-pulled from
    /// * `notifications` - Receiving half from [`notification_channel`] (None = never reconfigure)
    /// * `capacity` - Ring capacity the derived frames must fit
    pub fn new(source: S, notifications: Option<Receiver<()>>, capacity: usize) -> Self {
        Self {
            source,
            notifications,
            capacity,
            applied_run_state: RunState::Running,
        }
    }

    /// Load and derive the startup configuration
    ///
    /// Unreadable settings fall back to defaults; a configuration that does
    /// not fit the ring capacity is an error.
    pub fn initial(&mut self) -> Result<ScopeConfig, ConfigError> {
        let settings = self.source.load().unwrap_or_else(|e| {
            tracing::warn!(error = %e, "Failed to load settings, using defaults");
            Settings::default()
        });
        let config = ScopeConfig::derive(&settings, self.capacity)?;
        self.applied_run_state = config.run_state;
        Ok(config)
    }

    /// Check the notification slot without blocking
    ///
    /// # Returns
    /// `Ok(None)` when nothing changed, `Ok(Some(update))` with the freshly
    /// derived configuration, or an error when the new settings cannot be
    /// loaded or derived (the caller keeps its current configuration).
    pub fn poll(&mut self) -> Result<Option<Update>, ConfigError> {
        let Some(rx) = &self.notifications else {
            return Ok(None);
        };
        match rx.try_recv() {
            Ok(()) => {}
            Err(TryRecvError::Empty) => return Ok(None),
            Err(TryRecvError::Disconnected) => {
                tracing::debug!("Settings notifier dropped, reconfiguration disabled");
                self.notifications = None;
                return Ok(None);
            }
        }

        let settings = self.source.load()?;
        let config = ScopeConfig::derive(&settings, self.capacity)?;
        let command = if config.run_state != self.applied_run_state {
            Some(match config.run_state {
                RunState::Running => RunCommand::Run,
                RunState::Stopped => RunCommand::Stop,
            })
        } else {
            None
        };
        self.applied_run_state = config.run_state;
        Ok(Some(Update { config, command }))
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }
}
