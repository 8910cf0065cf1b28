//! Running engine counters
//!
//! Collected by the sample loop and reported once when it returns.

use crate::scope::scheduler::{EmittedFrame, FrameScheduler, LineOutcome};
use crate::scope::trigger::TriggerKind;
use chrono::{DateTime, Utc};
use serde::Serialize;

/// Counters describing one engine run
#[derive(Debug, Clone, Serialize)]
pub struct EngineStats {
    /// When the engine started
    pub started_at: DateTime<Utc>,
    /// Input lines read (including discarded and malformed ones)
    pub lines_read: u64,
    /// Lines stored as zero samples because they failed to parse
    pub parse_failures: u64,
    /// Lines discarded by the stopped-mode cap
    pub dropped_while_stopped: u64,
    pub freerun_triggers: u64,
    pub sync_triggers: u64,
    pub inrush_triggers: u64,
    /// Frames written to the output (re-renders included)
    pub frames_emitted: u64,
    /// Frames re-rendered from frozen data while stopped
    pub rerenders: u64,
    /// Configurations applied after startup
    pub reconfigurations: u64,
    /// Configurations rejected (previous one kept)
    pub rejected_reconfigurations: u64,
}

impl Default for EngineStats {
    fn default() -> Self {
        Self::new()
    }
}

impl EngineStats {
    pub fn new() -> Self {
        Self {
            started_at: Utc::now(),
            lines_read: 0,
            parse_failures: 0,
            dropped_while_stopped: 0,
            freerun_triggers: 0,
            sync_triggers: 0,
            inrush_triggers: 0,
            frames_emitted: 0,
            rerenders: 0,
            reconfigurations: 0,
            rejected_reconfigurations: 0,
        }
    }

    /// Account for one processed input line
    pub fn record_line(&mut self, outcome: &LineOutcome) {
        self.lines_read += 1;
        if !outcome.stored {
            self.dropped_while_stopped += 1;
        }
        if let Some(frame) = &outcome.emitted {
            self.record_frame(frame);
        }
        if let Some(trigger) = &outcome.confirmed {
            match trigger.kind {
                TriggerKind::Freerun => self.freerun_triggers += 1,
                TriggerKind::Sync => self.sync_triggers += 1,
                TriggerKind::Inrush => self.inrush_triggers += 1,
            }
        }
    }

    pub fn record_frame(&mut self, frame: &EmittedFrame) {
        self.frames_emitted += 1;
        if frame.rerender {
            self.rerenders += 1;
        }
    }

    /// Copy counters owned by the scheduler
    pub fn sync_from(&mut self, scheduler: &FrameScheduler) {
        self.parse_failures = scheduler.store().parse_failures();
    }

    /// Total confirmed triggers of any kind
    pub fn total_triggers(&self) -> u64 {
        self.freerun_triggers + self.sync_triggers + self.inrush_triggers
    }

    /// Seconds since the engine started
    pub fn uptime_seconds(&self) -> i64 {
        (Utc::now() - self.started_at).num_seconds()
    }

    /// Log a one-line summary
    pub fn log_summary(&self) {
        tracing::info!(
            lines = self.lines_read,
            parse_failures = self.parse_failures,
            dropped = self.dropped_while_stopped,
            triggers = self.total_triggers(),
            frames = self.frames_emitted,
            rerenders = self.rerenders,
            reconfigurations = self.reconfigurations,
            rejected = self.rejected_reconfigurations,
            uptime_s = self.uptime_seconds(),
            "Engine finished"
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scope::scheduler::FrameWindow;
    use crate::scope::output::Terminator;
    use crate::scope::trigger::TriggerEvent;

    fn frame(rerender: bool) -> EmittedFrame {
        EmittedFrame {
            trigger: TriggerEvent {
                pointer: 10,
                fraction: 0.0,
                kind: TriggerKind::Sync,
            },
            window: FrameWindow { start: 0, end: 10 },
            terminator: Terminator::Fast,
            rerender,
        }
    }

    #[test]
    fn test_record_line() {
        let mut stats = EngineStats::new();
        stats.record_line(&LineOutcome {
            stored: true,
            emitted: Some(frame(false)),
            confirmed: Some(TriggerEvent {
                pointer: 11,
                fraction: 0.5,
                kind: TriggerKind::Inrush,
            }),
        });
        stats.record_line(&LineOutcome::default());

        assert_eq!(stats.lines_read, 2);
        assert_eq!(stats.dropped_while_stopped, 1);
        assert_eq!(stats.frames_emitted, 1);
        assert_eq!(stats.inrush_triggers, 1);
        assert_eq!(stats.total_triggers(), 1);
    }

    #[test]
    fn test_rerender_counted() {
        let mut stats = EngineStats::new();
        stats.record_frame(&frame(false));
        stats.record_frame(&frame(true));
        assert_eq!(stats.frames_emitted, 2);
        assert_eq!(stats.rerenders, 1);
    }

    #[test]
    fn test_uptime_non_negative() {
        let stats = EngineStats::new();
        assert!(stats.uptime_seconds() >= 0);
    }
}
