//! Heart-rate anomaly classification with debounced entry and exit.
//!
//! The detector is ticked at a fixed rate, independent of new data arriving,
//! so its sustain, clear and no-signal timers keep advancing when the signal
//! stops. The flags are rate/stability heuristics, not a diagnosis.

use crate::ring::Ring;
use crate::{AlarmEvent, AlarmKind, BpmReading};

const HISTORY_SLOTS: usize = 8;

/// Classifier tuning. All durations are hysteresis against flapping.
#[derive(Clone, Debug)]
pub struct AnomalyConfig {
    /// BPM below this is bradycardia territory.
    pub brady_bpm: i32,
    /// BPM above this is tachycardia territory.
    pub tachy_bpm: i32,
    /// How long BPM must stay abnormal before alarming.
    pub sustain_ms: i64,
    /// Readings below this quality are unusable.
    pub min_quality: f32,
    /// How long the signal must be unusable before `NoSignal`.
    pub no_signal_ms: i64,
    /// BPM jump that counts as a rapid change.
    pub rapid_delta_bpm: i32,
    /// Window the rapid-change scan looks back over.
    pub rapid_window_ms: i64,
    /// Continuous normality required before an active alarm clears.
    pub clear_ms: i64,
}

impl Default for AnomalyConfig {
    fn default() -> Self {
        Self {
            brady_bpm: 45,
            tachy_bpm: 130,
            sustain_ms: 5000,
            min_quality: 0.25,
            no_signal_ms: 3000,
            rapid_delta_bpm: 35,
            rapid_window_ms: 5000,
            clear_ms: 3000,
        }
    }
}

#[derive(Clone, Copy, Default)]
struct RatePoint {
    bpm: i32,
    t_ms: i64,
}

/// Classifies periodic BPM readings into alarm state transitions.
///
/// [`update`](Self::update) returns `Some` exactly when the active alarm
/// changes; repeated ticks in the same resolved state return `None`.
pub struct AnomalyDetector {
    cfg: AnomalyConfig,
    active: AlarmKind,
    no_signal_since: Option<i64>,
    abnormal_since: Option<(AlarmKind, i64)>,
    clear_since: Option<i64>,
    history: Ring<RatePoint, HISTORY_SLOTS>,
}

impl AnomalyDetector {
    pub fn new(cfg: AnomalyConfig) -> Self {
        Self {
            cfg,
            active: AlarmKind::None,
            no_signal_since: None,
            abnormal_since: None,
            clear_since: None,
            history: Ring::new(),
        }
    }

    pub fn active_alarm(&self) -> AlarmKind {
        self.active
    }

    /// One fixed-rate tick with the current (possibly synthesized) reading.
    pub fn update(&mut self, reading: BpmReading) -> Option<AlarmEvent> {
        let t = reading.t_ms;

        if reading.quality < self.cfg.min_quality || reading.bpm <= 0 {
            if self.no_signal_since.is_none() {
                self.no_signal_since = Some(t);
            }
        } else {
            self.no_signal_since = None;
        }

        // The rapid-change scan wants raw continuity, usable or not.
        self.history.push(RatePoint {
            bpm: reading.bpm,
            t_ms: t,
        });

        let mut candidate = AlarmKind::None;

        if self
            .no_signal_since
            .is_some_and(|since| t - since >= self.cfg.no_signal_ms)
        {
            // Signal loss pre-empts every rate judgement.
            candidate = AlarmKind::NoSignal;
        } else {
            let usable = reading.quality >= self.cfg.min_quality && reading.stable;
            if usable {
                if reading.bpm > 0 && reading.bpm < self.cfg.brady_bpm {
                    candidate = self.sustain(AlarmKind::Bradycardia, t);
                } else if reading.bpm > self.cfg.tachy_bpm {
                    candidate = self.sustain(AlarmKind::Tachycardia, t);
                } else {
                    self.abnormal_since = None;
                }

                if candidate == AlarmKind::None && self.rapid_change() {
                    candidate = AlarmKind::RapidChange;
                }
            } else {
                // No brady/tachy claim stands on unusable data.
                self.abnormal_since = None;
            }
        }

        // Exit hysteresis: an active alarm clears only after clear_ms of
        // continuous normality. A re-arming sustain timer counts as abnormal
        // and restarts the wait.
        if self.active != AlarmKind::None && candidate == AlarmKind::None {
            if self.abnormal_since.is_some() {
                self.clear_since = None;
                candidate = self.active;
            } else {
                let since = match self.clear_since {
                    Some(since) => since,
                    None => {
                        self.clear_since = Some(t);
                        t
                    }
                };
                if t - since < self.cfg.clear_ms {
                    candidate = self.active;
                } else {
                    self.clear_since = None;
                }
            }
        } else {
            self.clear_since = None;
        }

        if candidate != self.active {
            self.active = candidate;
            return Some(AlarmEvent {
                kind: candidate,
                bpm: reading.bpm,
                quality: reading.quality,
                t_ms: t,
            });
        }
        None
    }

    // Arms or continues the sustain timer for `kind`; switching kinds
    // restarts it.
    fn sustain(&mut self, kind: AlarmKind, t_ms: i64) -> AlarmKind {
        let since = match self.abnormal_since {
            Some((armed, since)) if armed == kind => since,
            _ => {
                self.abnormal_since = Some((kind, t_ms));
                t_ms
            }
        };
        if t_ms - since >= self.cfg.sustain_ms {
            kind
        } else {
            AlarmKind::None
        }
    }

    // Scans the history newest-first; stops once past the window, since the
    // history is time-ordered.
    fn rapid_change(&self) -> bool {
        let Some(newest) = self.history.nth_newest(0) else {
            return false;
        };
        for n in 1..self.history.len() {
            let Some(older) = self.history.nth_newest(n) else {
                break;
            };
            let dt = newest.t_ms - older.t_ms;
            if dt <= 0 {
                continue;
            }
            if dt > self.cfg.rapid_window_ms {
                break;
            }
            if (newest.bpm - older.bpm).abs() >= self.cfg.rapid_delta_bpm {
                return true;
            }
        }
        false
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const TICK_MS: i64 = 100;

    fn reading(bpm: i32, quality: f32, stable: bool, t_ms: i64) -> BpmReading {
        BpmReading {
            bpm,
            quality,
            stable,
            t_ms,
        }
    }

    fn good(bpm: i32, t_ms: i64) -> BpmReading {
        reading(bpm, 0.9, true, t_ms)
    }

    // Drives `ticks` updates starting at `from_ms`, collecting transitions.
    fn drive(
        det: &mut AnomalyDetector,
        make: impl Fn(i64) -> BpmReading,
        from_ms: i64,
        ticks: usize,
    ) -> Vec<AlarmEvent> {
        (0..ticks as i64)
            .filter_map(|n| det.update(make(from_ms + n * TICK_MS)))
            .collect()
    }

    #[test]
    fn no_signal_debounced_single_event() {
        let mut det = AnomalyDetector::new(AnomalyConfig::default());

        let events = drive(&mut det, |t| reading(0, 0.1, false, t), 0, 100);

        assert_eq!(events.len(), 1);
        assert_eq!(events[0].kind, AlarmKind::NoSignal);
        assert!(events[0].t_ms >= 3000);
        assert_eq!(det.active_alarm(), AlarmKind::NoSignal);
    }

    #[test]
    fn brady_needs_sustain_then_alarm() {
        let mut det = AnomalyDetector::new(AnomalyConfig::default());

        let events = drive(&mut det, |t| good(40, t), 0, 80);

        assert_eq!(events.len(), 1);
        assert_eq!(events[0].kind, AlarmKind::Bradycardia);
        assert_eq!(events[0].t_ms, 5000);
        assert_eq!(events[0].bpm, 40);
    }

    #[test]
    fn alarm_clears_after_sustained_normality() {
        let mut det = AnomalyDetector::new(AnomalyConfig::default());
        drive(&mut det, |t| good(40, t), 0, 60);
        assert_eq!(det.active_alarm(), AlarmKind::Bradycardia);

        // back to 70 BPM; held for clear_ms, then a single clear transition
        let events = drive(&mut det, |t| good(70, t), 6000, 40);
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].kind, AlarmKind::None);
        assert_eq!(events[0].t_ms, 9000);
        assert_eq!(det.active_alarm(), AlarmKind::None);
    }

    #[test]
    fn short_normality_does_not_clear() {
        let mut det = AnomalyDetector::new(AnomalyConfig::default());
        drive(&mut det, |t| good(40, t), 0, 60);
        assert_eq!(det.active_alarm(), AlarmKind::Bradycardia);

        // only 2000 ms of normality, then abnormal again: alarm is held
        let mut events = drive(&mut det, |t| good(70, t), 6000, 20);
        events.extend(drive(&mut det, |t| good(40, t), 8000, 100));

        assert!(events.is_empty());
        assert_eq!(det.active_alarm(), AlarmKind::Bradycardia);
    }

    #[test]
    fn kind_switch_restarts_sustain() {
        let mut det = AnomalyDetector::new(AnomalyConfig::default());

        // 4 s of brady, then tachy: the earlier sustain must not count.
        // The instantaneous 40 -> 140 jump is itself a rapid change, so that
        // edge fires first; tachycardia then needs its own full 5 s.
        drive(&mut det, |t| good(40, t), 0, 40);
        let events = drive(&mut det, |t| good(140, t), 4000, 60);

        assert_eq!(events.len(), 2);
        assert_eq!(events[0].kind, AlarmKind::RapidChange);
        assert_eq!(events[1].kind, AlarmKind::Tachycardia);
        assert_eq!(events[1].t_ms, 9000);
    }

    #[test]
    fn rapid_jump_fires_on_the_tick() {
        let mut det = AnomalyDetector::new(AnomalyConfig::default());
        drive(&mut det, |t| good(70, t), 0, 10);

        let event = det.update(good(110, 1000));

        let event = event.expect("jump of 40 BPM inside the window must fire");
        assert_eq!(event.kind, AlarmKind::RapidChange);
        assert_eq!(event.bpm, 110);
    }

    #[test]
    fn slow_drift_is_not_rapid_change() {
        let mut det = AnomalyDetector::new(AnomalyConfig::default());

        // 70 -> 110 BPM over 40 s: every in-window delta stays small
        let mut events = Vec::new();
        for n in 0..400_i64 {
            let bpm = 70 + (n / 10) as i32;
            events.extend(det.update(good(bpm, n * TICK_MS)));
        }
        assert!(events.is_empty());
    }

    #[test]
    fn unusable_reading_drops_brady_claim() {
        let mut det = AnomalyDetector::new(AnomalyConfig::default());

        // 4.9 s of brady, then an unusable reading resets the sustain timer
        drive(&mut det, |t| good(40, t), 0, 49);
        det.update(reading(40, 0.1, false, 4900));
        let events = drive(&mut det, |t| good(40, t), 5000, 60);

        // the alarm needs a fresh 5 s of sustained abnormality
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].t_ms, 10_000);
    }

    #[test]
    fn stale_synthetic_ticks_are_idempotent() {
        let mut det = AnomalyDetector::new(AnomalyConfig::default());

        // same zeroed reading re-presented every tick, as the staleness glue
        // does: exactly one NoSignal edge, then silence
        let events = drive(&mut det, |t| reading(0, 0.0, false, t), 0, 200);
        assert_eq!(events.len(), 1);

        let more = drive(&mut det, |t| reading(0, 0.0, false, t), 20_000, 200);
        assert!(more.is_empty());
    }
}
