//! Trigger policies and per-sample trigger detection
//!
//! Three mutually exclusive policies anchor frames in time:
//! - [`TriggerPolicy::Freerun`]: unconditional periodic re-capture
//! - [`TriggerPolicy::Sync`]: level crossing on one channel
//! - [`TriggerPolicy::Inrush`]: single-shot threshold exceedance that can
//!   pre-empt the level-crossing trigger running alongside it
//!
//! The comparators are pure functions of the newest sample pair. The
//! [`TriggerDetector`] owns the state around them: hold-off counters, the
//! inrush latch, the latched-but-unconfirmed candidate, and the Freerun
//! drift clock.

use super::sample::Sample;
use serde::{Deserialize, Serialize};

/// Largest interpolation fraction that is still strictly below 1.0
pub const MAX_FRACTION: f64 = 1.0 - f64::EPSILON;

/// Edge direction for the level-crossing trigger
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Slope {
    #[default]
    Rising,
    Falling,
}

/// Level-crossing trigger parameters
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SyncParams {
    pub slope: Slope,
    pub level: f64,
    pub channel: usize,
}

/// Threshold-exceedance trigger parameters
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct InrushParams {
    /// Magnitude at or above which the trigger fires
    pub threshold: f64,
    pub channel: usize,
}

/// Active trigger policy
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum TriggerPolicy {
    /// Re-trigger every frame length without looking at the signal
    Freerun,
    /// Trigger on a level crossing
    Sync(SyncParams),
    /// Level-crossing capture until a threshold exceedance fires once
    Inrush {
        sync: SyncParams,
        inrush: InrushParams,
    },
}

impl TriggerPolicy {
    /// Short name used in logs
    pub fn name(&self) -> &'static str {
        match self {
            TriggerPolicy::Freerun => "freerun",
            TriggerPolicy::Sync(_) => "sync",
            TriggerPolicy::Inrush { .. } => "inrush",
        }
    }
}

/// Which comparator produced a trigger
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TriggerKind {
    Freerun,
    Sync,
    Inrush,
}

/// A detected trigger
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TriggerEvent {
    /// Logical pointer of the newer sample of the triggering pair
    pub pointer: u64,
    /// Sub-sample position of the trigger instant between `pointer - 1` and `pointer`
    pub fraction: f64,
    pub kind: TriggerKind,
}

/// Fraction of the way from `v1` to `v2` at which `level` is crossed
///
/// Defined as 0.0 when both values are equal, and kept strictly below 1.0.
///
/// # Example
/// ```
/// use pqscope_core::scope::trigger::crossing_fraction;
///
/// assert_eq!(crossing_fraction(0.0, -1.0, 1.0), 0.5);
/// assert_eq!(crossing_fraction(3.0, 3.0, 3.0), 0.0);
/// ```
pub fn crossing_fraction(level: f64, v1: f64, v2: f64) -> f64 {
    if v1 == v2 {
        return 0.0;
    }
    ((level - v1) / (v2 - v1)).clamp(0.0, MAX_FRACTION)
}

/// Level-crossing comparator over the pair (`s1` older, `s2` newer)
///
/// Returns the interpolation fraction when the crossing matches the slope.
/// Hold-off is enforced by the caller.
pub fn sync_test(params: &SyncParams, s1: &Sample, s2: &Sample) -> Option<f64> {
    let v1 = s1.channel(params.channel);
    let v2 = s2.channel(params.channel);
    let level = params.level;

    let crossed = match params.slope {
        Slope::Rising => v1 <= level && level <= v2,
        Slope::Falling => v1 >= level && level >= v2,
    };

    crossed.then(|| crossing_fraction(level, v1, v2))
}

/// Threshold-exceedance comparator on a single sample
pub fn inrush_test(params: &InrushParams, sample: &Sample) -> bool {
    sample.channel(params.channel).abs() >= params.threshold
}

/// Freerun trigger clock with fractional drift correction
///
/// A frame duration rarely equals an integer number of sample periods.
/// The fractional remainder is accumulated across firings; each time it
/// reaches a whole sample the next firing is pushed one sample later.
/// Frames keep their fixed length, only the trigger spacing absorbs the
/// correction.
#[derive(Debug, Clone, Default)]
pub struct FreerunClock {
    /// Pointer of the next firing (None = fire on the next sample)
    next: Option<u64>,
    /// Accumulated fractional samples, always in [0, 1)
    accumulator: f64,
    /// Fractional samples added per firing, in [0, 1)
    increment: f64,
}

impl FreerunClock {
    /// Create a clock that fires on the first sample it sees
    pub fn new(increment: f64) -> Self {
        Self {
            next: None,
            accumulator: 0.0,
            increment,
        }
    }

    /// Whether the clock fires at `sp`
    pub fn due(&self, sp: u64) -> bool {
        self.next.is_none_or(|next| sp >= next)
    }

    /// Fire at `sp` and schedule the next firing
    pub fn fire(&mut self, sp: u64, frame_samples: u64) -> u64 {
        self.accumulator += self.increment;
        let extra = if self.accumulator >= 1.0 {
            self.accumulator -= 1.0;
            1
        } else {
            0
        };
        self.next = Some(sp + frame_samples + extra);
        sp
    }

    /// Change the per-firing increment, keeping the accumulated drift
    pub fn set_increment(&mut self, increment: f64) {
        self.increment = increment;
    }

    /// Forget the schedule and the accumulated drift
    pub fn reset(&mut self) {
        self.next = None;
        self.accumulator = 0.0;
    }

    pub fn accumulator(&self) -> f64 {
        self.accumulator
    }

    pub fn next(&self) -> Option<u64> {
        self.next
    }
}

/// Stateful trigger detector
///
/// Evaluation order, once per sample:
/// 1. Inrush comparator (may pre-empt anything else, fires once per arm)
/// 2. A Sync/Freerun trigger latched while a frame was pending
/// 3. A fresh Sync or Freerun test
#[derive(Debug, Clone)]
pub struct TriggerDetector {
    /// Samples remaining before a Sync trigger may be recognised
    sync_holdoff: u64,
    /// Samples remaining before the Inrush trigger may be recognised
    inrush_holdoff: u64,
    /// Set once the Inrush trigger has fired in this arm cycle
    inrush_latched: bool,
    /// Trigger found while a frame was still pending
    candidate: Option<TriggerEvent>,
    freerun: FreerunClock,
}

impl TriggerDetector {
    /// Create an armed detector
    ///
    /// # Arguments
    /// * `inrush_holdoff` - Samples to wait before the Inrush trigger may fire
    /// * `freerun_increment` - Fractional samples per Freerun frame
    pub fn new(inrush_holdoff: u64, freerun_increment: f64) -> Self {
        Self {
            sync_holdoff: 0,
            inrush_holdoff,
            inrush_latched: false,
            candidate: None,
            freerun: FreerunClock::new(freerun_increment),
        }
    }

    /// Re-arm after an external run command
    ///
    /// Clears the inrush latch and any latched candidate, restarts the
    /// Freerun clock, and starts the inrush hold-off afresh.
    pub fn arm(&mut self, inrush_holdoff: u64) {
        self.sync_holdoff = 0;
        self.inrush_holdoff = inrush_holdoff;
        self.inrush_latched = false;
        self.candidate = None;
        self.freerun.reset();
    }

    /// Evaluate the newest sample pair
    ///
    /// # Arguments
    /// * `policy` - Active trigger policy
    /// * `prev` - Sample at `sp - 1`
    /// * `cur` - Sample at `sp`
    /// * `sp` - Logical pointer of `cur`
    /// * `frame_pending` - Whether a confirmed frame is still waiting to be emitted
    /// * `frame_samples` - Frame length, used to schedule Freerun firings
    ///
    /// # Returns
    /// A trigger to confirm now. Sync/Freerun triggers found while a frame is
    /// pending are latched and returned once `frame_pending` is false.
    pub fn evaluate(
        &mut self,
        policy: &TriggerPolicy,
        prev: &Sample,
        cur: &Sample,
        sp: u64,
        frame_pending: bool,
        frame_samples: u64,
    ) -> Option<TriggerEvent> {
        self.sync_holdoff = self.sync_holdoff.saturating_sub(1);
        self.inrush_holdoff = self.inrush_holdoff.saturating_sub(1);

        if let TriggerPolicy::Inrush { inrush, .. } = policy {
            if !self.inrush_latched && self.inrush_holdoff == 0 && inrush_test(inrush, cur) {
                self.inrush_latched = true;
                self.candidate = None;
                return Some(TriggerEvent {
                    pointer: sp,
                    fraction: 0.0,
                    kind: TriggerKind::Inrush,
                });
            }
        }

        if self.candidate.is_some() {
            if frame_pending {
                return None;
            }
            return self.candidate.take();
        }

        let event = match policy {
            TriggerPolicy::Freerun => self.freerun.due(sp).then(|| TriggerEvent {
                pointer: self.freerun.fire(sp, frame_samples),
                fraction: 0.0,
                kind: TriggerKind::Freerun,
            }),
            TriggerPolicy::Sync(sync) | TriggerPolicy::Inrush { sync, .. } => {
                if self.sync_holdoff == 0 {
                    sync_test(sync, prev, cur).map(|fraction| TriggerEvent {
                        pointer: sp,
                        fraction,
                        kind: TriggerKind::Sync,
                    })
                } else {
                    None
                }
            }
        }?;

        if frame_pending {
            tracing::trace!(pointer = event.pointer, kind = ?event.kind, "trigger_latched");
            self.candidate = Some(event);
            return None;
        }

        Some(event)
    }

    /// Start the Sync hold-off after a confirmed trigger
    pub fn arm_sync_holdoff(&mut self, samples: u64) {
        self.sync_holdoff = samples;
    }

    /// Update derived parameters after reconfiguration
    ///
    /// Running hold-off counters are clamped to the new thresholds, and a
    /// candidate found under the old parameters is discarded.
    pub fn reconfigure(&mut self, sync_holdoff: u64, inrush_holdoff: u64, freerun_increment: f64) {
        self.sync_holdoff = self.sync_holdoff.min(sync_holdoff);
        self.inrush_holdoff = self.inrush_holdoff.min(inrush_holdoff);
        self.candidate = None;
        self.freerun.set_increment(freerun_increment);
    }

    pub fn sync_holdoff(&self) -> u64 {
        self.sync_holdoff
    }

    pub fn inrush_holdoff(&self) -> u64 {
        self.inrush_holdoff
    }

    pub fn inrush_latched(&self) -> bool {
        self.inrush_latched
    }

    pub fn candidate(&self) -> Option<&TriggerEvent> {
        self.candidate.as_ref()
    }

    pub fn freerun(&self) -> &FreerunClock {
        &self.freerun
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn on_ch0(v: f64) -> Sample {
        Sample::new(v, 0.0, 0.0, 0.0)
    }

    fn rising(level: f64) -> SyncParams {
        SyncParams {
            slope: Slope::Rising,
            level,
            channel: 0,
        }
    }

    #[test]
    fn test_rising_crossing_midpoint() {
        let f = sync_test(&rising(0.0), &on_ch0(-1.0), &on_ch0(1.0));
        assert_eq!(f, Some(0.5));
    }

    #[test]
    fn test_rising_ignores_falling_edge() {
        assert!(sync_test(&rising(0.0), &on_ch0(1.0), &on_ch0(-1.0)).is_none());
        assert!(sync_test(&rising(0.0), &on_ch0(0.5), &on_ch0(1.0)).is_none());
    }

    #[test]
    fn test_falling_crossing() {
        let params = SyncParams {
            slope: Slope::Falling,
            level: 1.0,
            channel: 1,
        };
        let s1 = Sample::new(0.0, 4.0, 0.0, 0.0);
        let s2 = Sample::new(0.0, 0.0, 0.0, 0.0);
        let f = sync_test(&params, &s1, &s2).unwrap();
        assert_relative_eq!(f, 0.75);
    }

    #[test]
    fn test_equal_samples_fraction_zero() {
        let f = sync_test(&rising(2.0), &on_ch0(2.0), &on_ch0(2.0));
        assert_eq!(f, Some(0.0));
    }

    #[test]
    fn test_fraction_stays_below_one() {
        let f = sync_test(&rising(1.0), &on_ch0(0.0), &on_ch0(1.0)).unwrap();
        assert!(f < 1.0);
        assert_relative_eq!(f, 1.0, epsilon = 1e-12);
    }

    #[test]
    fn test_inrush_magnitude() {
        let params = InrushParams {
            threshold: 0.2,
            channel: 2,
        };
        assert!(inrush_test(&params, &Sample::new(0.0, 0.0, -0.3, 0.0)));
        assert!(inrush_test(&params, &Sample::new(0.0, 0.0, 0.2, 0.0)));
        assert!(!inrush_test(&params, &Sample::new(5.0, 0.0, 0.1, 0.0)));
    }

    #[test]
    fn test_freerun_exact_ratio_no_drift() {
        let mut clock = FreerunClock::new(0.0);
        let mut fired = Vec::new();
        for sp in 0..350 {
            if clock.due(sp) {
                fired.push(clock.fire(sp, 100));
            }
        }
        assert_eq!(fired, vec![0, 100, 200, 300]);
        assert_eq!(clock.accumulator(), 0.0);
    }

    #[test]
    fn test_freerun_fractional_drift() {
        let mut clock = FreerunClock::new(0.5);
        let mut fired = Vec::new();
        for sp in 0..500 {
            if clock.due(sp) {
                fired.push(clock.fire(sp, 100));
            }
        }
        assert_eq!(fired, vec![0, 100, 201, 301, 402]);
        let spacings: Vec<u64> = fired.windows(2).map(|w| w[1] - w[0]).collect();
        assert_eq!(spacings, vec![100, 101, 100, 101]);
    }

    #[test]
    fn test_sync_holdoff_blocks_retrigger() {
        let policy = TriggerPolicy::Sync(rising(0.0));
        let mut detector = TriggerDetector::new(0, 0.0);
        let lo = on_ch0(-1.0);
        let hi = on_ch0(1.0);

        let event = detector.evaluate(&policy, &lo, &hi, 10, false, 100).unwrap();
        assert_eq!(event.pointer, 10);
        detector.arm_sync_holdoff(5);

        // Blocked for the next four samples
        for sp in 11..15 {
            assert!(detector.evaluate(&policy, &lo, &hi, sp, false, 100).is_none());
        }
        // Holdoff reaches zero on the fifth
        assert!(detector.evaluate(&policy, &lo, &hi, 15, false, 100).is_some());
    }

    #[test]
    fn test_candidate_latched_while_pending() {
        let policy = TriggerPolicy::Sync(rising(0.0));
        let mut detector = TriggerDetector::new(0, 0.0);
        let lo = on_ch0(-1.0);
        let hi = on_ch0(1.0);

        assert!(detector.evaluate(&policy, &lo, &hi, 20, true, 100).is_none());
        assert_eq!(detector.candidate().map(|c| c.pointer), Some(20));

        // Persists while the frame is pending, even without a new crossing
        assert!(detector.evaluate(&policy, &hi, &hi, 21, true, 100).is_none());

        // Released with its original pointer once the frame is consumed
        let event = detector.evaluate(&policy, &hi, &hi, 22, false, 100).unwrap();
        assert_eq!(event.pointer, 20);
        assert_relative_eq!(event.fraction, 0.5);
        assert!(detector.candidate().is_none());
    }

    #[test]
    fn test_inrush_preempts_and_latches_once() {
        let policy = TriggerPolicy::Inrush {
            sync: rising(0.0),
            inrush: InrushParams {
                threshold: 0.2,
                channel: 2,
            },
        };
        let mut detector = TriggerDetector::new(0, 0.0);
        let quiet = Sample::new(-1.0, 0.0, 0.0, 0.0);
        let surge = Sample::new(1.0, 0.0, 1.0, 0.0);

        // A sync crossing and an inrush in the same pair: inrush wins
        let event = detector
            .evaluate(&policy, &quiet, &surge, 500, true, 100)
            .unwrap();
        assert_eq!(event.kind, TriggerKind::Inrush);
        assert!(detector.inrush_latched());

        // No second inrush until re-armed
        for sp in 501..600 {
            if let Some(e) = detector.evaluate(&policy, &surge, &surge, sp, true, 100) {
                assert_ne!(e.kind, TriggerKind::Inrush);
            }
        }

        detector.arm(0);
        let again = detector
            .evaluate(&policy, &surge, &surge, 700, false, 100)
            .unwrap();
        assert_eq!(again.kind, TriggerKind::Inrush);
    }

    #[test]
    fn test_inrush_holdoff() {
        let policy = TriggerPolicy::Inrush {
            sync: rising(10.0),
            inrush: InrushParams {
                threshold: 0.2,
                channel: 0,
            },
        };
        let mut detector = TriggerDetector::new(3, 0.0);
        let surge = on_ch0(1.0);
        assert!(detector.evaluate(&policy, &surge, &surge, 0, false, 100).is_none());
        assert!(detector.evaluate(&policy, &surge, &surge, 1, false, 100).is_none());
        assert!(detector.evaluate(&policy, &surge, &surge, 2, false, 100).is_some());
    }

    #[test]
    fn test_reconfigure_drops_candidate() {
        let policy = TriggerPolicy::Sync(rising(0.0));
        let mut detector = TriggerDetector::new(0, 0.0);
        detector.evaluate(&policy, &on_ch0(-1.0), &on_ch0(1.0), 5, true, 100);
        assert!(detector.candidate().is_some());
        detector.arm_sync_holdoff(80);

        detector.reconfigure(40, 0, 0.25);
        assert!(detector.candidate().is_none());
        assert_eq!(detector.sync_holdoff(), 40);
    }
}
