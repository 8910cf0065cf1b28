//! Frame scheduling: trigger confirmation, window math, emission
//!
//! The scheduler owns the sample store, the trigger detector, and the
//! trigger pointer `tp`. For every accepted input line it:
//! 1. appends the sample (`sp` advances by one)
//! 2. emits the pending frame once its whole window has been stored
//! 3. evaluates the trigger on the newest sample pair and confirms it
//!
//! ## Window anchoring
//!
//! For a trigger at `tp` with interpolation fraction `f`, the trigger
//! instant lies at `tp - 1 + f`. The window is
//!
//! ```text
//! frame_start = tp - pre - 1   if f < 0.5
//! frame_start = tp - pre       otherwise
//! frame_end   = frame_start + frame_samples
//! ```
//!
//! so the rendered trigger position stays within half a sample of the same
//! screen column across repeated triggers. Emitted timestamps are
//! `interval * (index - (tp - 1 + f))`, which centers every frame's time
//! axis on the sub-sample trigger instant.
//!
//! ## Run state
//!
//! `Running -> Stopped` on an Inrush frame being emitted or an external
//! stop command. `Stopped -> Running` only on an external run command,
//! which re-arms every latch. While stopped, no trigger is evaluated and
//! the last window can be re-rendered after a configuration change.

use super::config::ScopeConfig;
use super::output::{FrameWriter, Terminator};
use super::store::SampleStore;
use super::trigger::{TriggerDetector, TriggerEvent, TriggerKind, TriggerPolicy};
use serde::{Deserialize, Serialize};
use std::io::{self, Write};

/// Top-level acquisition state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RunState {
    #[default]
    Running,
    Stopped,
}

/// External run/stop command
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunCommand {
    Run,
    Stop,
}

/// Logical sample range `[start, end)` of one frame
///
/// Signed so a window anchored near the start of the stream may reach
/// into the pre-history before index 0.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameWindow {
    pub start: i64,
    pub end: i64,
}

impl FrameWindow {
    /// Anchor a window on a trigger
    ///
    /// # Example
    /// ```
    /// use pqscope_core::scope::scheduler::FrameWindow;
    ///
    /// let early = FrameWindow::anchored(1000, 0.25, 40, 100);
    /// assert_eq!((early.start, early.end), (959, 1059));
    ///
    /// let late = FrameWindow::anchored(1000, 0.75, 40, 100);
    /// assert_eq!((late.start, late.end), (960, 1060));
    /// ```
    pub fn anchored(tp: u64, fraction: f64, pre_trigger_samples: u64, frame_samples: u64) -> Self {
        let tp = tp as i64;
        let pre = pre_trigger_samples as i64;
        let start = if fraction < 0.5 { tp - pre - 1 } else { tp - pre };
        Self {
            start,
            end: start + frame_samples as i64,
        }
    }

    pub fn len(&self) -> u64 {
        (self.end - self.start) as u64
    }

    pub fn is_empty(&self) -> bool {
        self.end <= self.start
    }
}

/// Summary of one emitted frame
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct EmittedFrame {
    pub trigger: TriggerEvent,
    pub window: FrameWindow,
    pub terminator: Terminator,
    /// True when this window had already been emitted before (stopped re-render)
    pub rerender: bool,
}

/// What happened while processing one input line
#[derive(Debug, Clone, Copy, Default)]
pub struct LineOutcome {
    /// False when the line was discarded by the stopped-mode cap
    pub stored: bool,
    pub emitted: Option<EmittedFrame>,
    pub confirmed: Option<TriggerEvent>,
}

/// Trigger-anchored frame scheduler
pub struct FrameScheduler {
    store: SampleStore,
    config: ScopeConfig,
    detector: TriggerDetector,
    run_state: RunState,
    /// Most recent confirmed trigger (`tp` and its fraction)
    trigger: Option<TriggerEvent>,
    window: Option<FrameWindow>,
    /// A confirmed window is awaiting (re-)emission
    frame_pending: bool,
    /// The pending window has been written out since it was last (re)computed
    emitted: bool,
    /// Times the current trigger's window has been written out
    emissions: u32,
    /// Transition to Stopped once the pending frame is emitted
    stop_after_frame: bool,
    /// Stopped-mode acquisition limit past `freeze_anchor`
    lookahead: u64,
    freeze_anchor: u64,
    dropped_while_stopped: u64,
}

impl FrameScheduler {
    /// Create a scheduler over a ring buffer of `capacity` samples
    ///
    /// The initial run state is taken from `config.run_state`.
    pub fn new(capacity: usize, config: ScopeConfig) -> Self {
        let store = SampleStore::new(capacity);
        let lookahead = (store.capacity() / 2) as u64;
        let detector =
            TriggerDetector::new(config.params.inrush_holdoff, config.params.freerun_increment);
        let run_state = config.run_state;
        Self {
            store,
            config,
            detector,
            run_state,
            trigger: None,
            window: None,
            frame_pending: false,
            emitted: false,
            emissions: 0,
            stop_after_frame: false,
            lookahead,
            freeze_anchor: 0,
            dropped_while_stopped: 0,
        }
    }

    /// Process one raw input line end to end
    ///
    /// # Returns
    /// What was stored, emitted, and confirmed. Only write errors are
    /// returned as errors; a malformed line is stored as a zero sample.
    pub fn process_line<W: Write>(
        &mut self,
        raw_line: &str,
        out: &mut FrameWriter<W>,
    ) -> io::Result<LineOutcome> {
        let mut outcome = LineOutcome::default();
        if !self.accept(raw_line) {
            return Ok(outcome);
        }
        outcome.stored = true;
        outcome.emitted = self.flush_ready(out)?;
        outcome.confirmed = self.evaluate_trigger();
        Ok(outcome)
    }

    /// Append a line to the store unless the stopped-mode cap is reached
    pub fn accept(&mut self, raw_line: &str) -> bool {
        if self.run_state == RunState::Stopped
            && self.store.written() >= self.freeze_anchor + self.lookahead
        {
            self.dropped_while_stopped += 1;
            if self.dropped_while_stopped == 1 {
                tracing::debug!(
                    anchor = self.freeze_anchor,
                    lookahead = self.lookahead,
                    "Stopped look-ahead reached, discarding input"
                );
            }
            return false;
        }
        self.store.store(raw_line);
        true
    }

    /// Evaluate the trigger on the newest sample pair and confirm it
    ///
    /// Does nothing while stopped or before any sample was stored. Signal
    /// triggers also wait for a second sample, since the slot before the
    /// first one is pre-history rather than input.
    pub fn evaluate_trigger(&mut self) -> Option<TriggerEvent> {
        if self.run_state == RunState::Stopped || self.store.is_empty() {
            return None;
        }
        if self.store.written() < 2 && !matches!(self.config.policy, TriggerPolicy::Freerun) {
            return None;
        }
        let prev = self.store.previous();
        let cur = self.store.latest();
        let event = self.detector.evaluate(
            &self.config.policy,
            &prev,
            &cur,
            self.store.sp(),
            self.frame_pending,
            self.config.params.frame_samples,
        )?;
        self.confirm(event);
        Some(event)
    }

    /// Capture `tp`, anchor the window, and start the Sync hold-off
    fn confirm(&mut self, event: TriggerEvent) {
        let params = &self.config.params;
        let window = FrameWindow::anchored(
            event.pointer,
            event.fraction,
            params.pre_trigger_samples,
            params.frame_samples,
        );
        let elapsed = self.store.sp() - event.pointer;
        self.detector
            .arm_sync_holdoff(params.sync_holdoff.saturating_sub(elapsed));

        if event.kind == TriggerKind::Inrush {
            self.stop_after_frame = true;
            tracing::info!(pointer = event.pointer, "Inrush trigger fired, stopping after this frame");
        }

        tracing::debug!(
            pointer = event.pointer,
            fraction = %format!("{:.4}", event.fraction),
            kind = ?event.kind,
            start = window.start,
            end = window.end,
            "trigger_confirmed"
        );

        self.trigger = Some(event);
        self.window = Some(window);
        self.frame_pending = true;
        self.emitted = false;
        self.emissions = 0;
    }

    /// Whether the pending window has been fully stored and not yet emitted
    pub fn ready(&self) -> bool {
        match self.window {
            Some(window) if self.frame_pending && !self.emitted && !self.store.is_empty() => {
                self.store.sp() as i64 > window.end
            }
            _ => false,
        }
    }

    /// Emit the pending frame if it is ready, then reprime
    pub fn flush_ready<W: Write>(
        &mut self,
        out: &mut FrameWriter<W>,
    ) -> io::Result<Option<EmittedFrame>> {
        if !self.ready() {
            return Ok(None);
        }
        let frame = self.emit(out)?;
        self.reprime();
        Ok(frame)
    }

    /// Write the pending window and its terminator
    ///
    /// Returns `None` when there is no window to write.
    pub fn emit<W: Write>(&mut self, out: &mut FrameWriter<W>) -> io::Result<Option<EmittedFrame>> {
        let (Some(trigger), Some(window)) = (self.trigger, self.window) else {
            return Ok(None);
        };
        let params = &self.config.params;
        let instant = trigger.pointer as f64 - 1.0 + trigger.fraction;

        for index in window.start..window.end {
            let timestamp = params.interval * (index as f64 - instant);
            out.write_sample(timestamp, &self.store.read(index), &params.pixels)?;
        }

        let terminator = if self.run_state == RunState::Stopped || self.stop_after_frame {
            Terminator::Flush
        } else {
            Terminator::Fast
        };
        out.end_frame(terminator)?;

        let rerender = self.emissions > 0;
        self.emitted = true;
        self.emissions += 1;
        tracing::trace!(
            start = window.start,
            end = window.end,
            rerender = rerender,
            "frame_emitted"
        );

        if self.stop_after_frame {
            self.stop_after_frame = false;
            self.enter_stopped();
            tracing::info!(pointer = trigger.pointer, "Inrush frame emitted, acquisition stopped");
        }

        Ok(Some(EmittedFrame {
            trigger,
            window,
            terminator,
            rerender,
        }))
    }

    /// Prepare for the next cycle after an emission
    ///
    /// While running the pending flags are cleared so the next trigger can
    /// start a new frame. While stopped they are left set so the same
    /// window can be recomputed and emitted again after reconfiguration.
    pub fn reprime(&mut self) {
        if self.run_state == RunState::Running {
            self.frame_pending = false;
            self.emitted = false;
        }
    }

    /// Swap in a new configuration between two samples
    ///
    /// The window is recomputed from the existing `tp`. While stopped, a
    /// change of the derived parameters schedules a re-render of the frozen
    /// window under the new settings.
    pub fn reconfigure(&mut self, config: ScopeConfig) {
        let params_changed = config.params != self.config.params;
        self.detector.reconfigure(
            config.params.sync_holdoff,
            config.params.inrush_holdoff,
            config.params.freerun_increment,
        );
        self.config = config;

        if let Some(trigger) = self.trigger {
            let params = &self.config.params;
            self.window = Some(FrameWindow::anchored(
                trigger.pointer,
                trigger.fraction,
                params.pre_trigger_samples,
                params.frame_samples,
            ));
            if self.run_state == RunState::Stopped && self.frame_pending && params_changed {
                self.emitted = false;
            }
        }

        tracing::info!(
            policy = self.config.policy.name(),
            frame_samples = self.config.params.frame_samples,
            pre = self.config.params.pre_trigger_samples,
            post = self.config.params.post_trigger_samples,
            run_state = ?self.run_state,
            "Configuration applied"
        );
    }

    /// Apply an external run/stop command
    pub fn command(&mut self, command: RunCommand) {
        match (command, self.run_state) {
            (RunCommand::Run, RunState::Stopped) => {
                self.run_state = RunState::Running;
                self.detector.arm(self.config.params.inrush_holdoff);
                self.frame_pending = false;
                self.emitted = false;
                self.stop_after_frame = false;
                self.dropped_while_stopped = 0;
                tracing::info!(sp = self.store.sp(), "Acquisition re-armed");
            }
            (RunCommand::Stop, RunState::Running) => {
                self.stop_after_frame = false;
                self.enter_stopped();
                tracing::info!(sp = self.store.sp(), "Acquisition stopped");
            }
            _ => {}
        }
    }

    /// Freeze the current trigger for re-rendering
    fn enter_stopped(&mut self) {
        self.run_state = RunState::Stopped;
        let sp = self.store.written();

        match self.trigger {
            Some(trigger) if sp.saturating_sub(trigger.pointer) <= self.lookahead => {
                // A window reprimed while running was already emitted
                if !self.frame_pending {
                    self.frame_pending = true;
                    self.emitted = true;
                }
                self.freeze_anchor = trigger.pointer;
            }
            Some(trigger) => {
                tracing::debug!(
                    pointer = trigger.pointer,
                    sp = sp,
                    "Last trigger too old to re-render, discarding it"
                );
                self.trigger = None;
                self.window = None;
                self.frame_pending = false;
                self.emitted = false;
                self.freeze_anchor = sp;
            }
            None => {
                self.freeze_anchor = sp;
            }
        }
    }

    pub fn run_state(&self) -> RunState {
        self.run_state
    }

    /// Logical pointer of the newest stored sample
    pub fn sp(&self) -> u64 {
        self.store.sp()
    }

    /// Most recent confirmed trigger (`tp`)
    pub fn trigger(&self) -> Option<&TriggerEvent> {
        self.trigger.as_ref()
    }

    pub fn window(&self) -> Option<FrameWindow> {
        self.window
    }

    pub fn frame_pending(&self) -> bool {
        self.frame_pending
    }

    pub fn store(&self) -> &SampleStore {
        &self.store
    }

    pub fn config(&self) -> &ScopeConfig {
        &self.config
    }

    pub fn detector(&self) -> &TriggerDetector {
        &self.detector
    }

    /// Lines discarded by the stopped-mode cap since the last run command
    pub fn dropped_while_stopped(&self) -> u64 {
        self.dropped_while_stopped
    }

    /// Samples accepted past the frozen trigger while stopped
    pub fn lookahead(&self) -> u64 {
        self.lookahead
    }
}
