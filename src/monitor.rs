//! Glue between the periodic loops and the mailboxes that connect them.
//!
//! Neither type sleeps or blocks: the embedding firmware owns the task loops
//! and calls [`SamplerPipeline::service`] once per sample period and
//! [`AnomalyTicker::service`] once per tick period, with plain periodic
//! sleeps in between.

use embassy_sync::blocking_mutex::raw::RawMutex;

use crate::anomaly::{AnomalyConfig, AnomalyDetector};
use crate::beat::{BeatConfig, BeatDetector, BeatResult};
use crate::contact::{ContactConfig, ContactController, SampleGate};
use crate::mailbox::Mailbox;
use crate::{AlarmEvent, AlarmKind, BpmReading};

/// Suggested cadence of the sampling loop.
pub const SAMPLE_PERIOD_MS: i64 = 10;
/// Suggested cadence of the anomaly tick loop.
pub const TICK_PERIOD_MS: i64 = 100;
/// Readings older than this are treated as absent by their consumers.
pub const READING_STALE_MS: i64 = 3000;

/// The sampling-loop side of the pipeline: contact gating, beat detection
/// and publication of accepted readings.
///
/// # Example
/// ```rust
/// use pulse_monitor::{BeatConfig, ContactConfig, SamplerPipeline};
///
/// // seed_raw is the first raw sample, read before the loop starts
/// let mut pipeline =
///     SamplerPipeline::new(ContactConfig::default(), BeatConfig::default(), 0, 2048);
///
/// // still warming up: nothing to publish
/// assert_eq!(pipeline.on_sample(2048, 10), None);
/// ```
pub struct SamplerPipeline {
    contact: ContactController,
    detector: BeatDetector,
}

impl SamplerPipeline {
    pub fn new(
        contact_cfg: ContactConfig,
        beat_cfg: BeatConfig,
        now_ms: i64,
        seed_raw: i32,
    ) -> Self {
        Self {
            contact: ContactController::new(contact_cfg, now_ms, seed_raw),
            detector: BeatDetector::new(beat_cfg, seed_raw),
        }
    }

    pub fn detector(&self) -> &BeatDetector {
        &self.detector
    }

    /// True once samples are flowing into the beat detector.
    pub fn is_running(&self) -> bool {
        self.contact.is_running()
    }

    /// One iteration of the sampling loop. Returns a reading on each
    /// accepted beat.
    pub fn on_sample(&mut self, raw: i32, t_ms: i64) -> Option<BpmReading> {
        match self.contact.update(raw, t_ms) {
            SampleGate::Discard => None,
            SampleGate::Reseed => {
                self.detector.reset(raw);
                None
            }
            SampleGate::Forward => match self.detector.update(raw, t_ms) {
                BeatResult::None => None,
                BeatResult::Provisional { bpm, quality } => Some(BpmReading {
                    bpm,
                    quality,
                    stable: false,
                    t_ms,
                }),
                BeatResult::Stable { bpm, quality } => Some(BpmReading {
                    bpm,
                    quality,
                    stable: true,
                    t_ms,
                }),
            },
        }
    }

    /// [`on_sample`](Self::on_sample) plus publication to the reading
    /// mailbox.
    pub fn service<M: RawMutex>(
        &mut self,
        raw: i32,
        t_ms: i64,
        readings: &Mailbox<M, BpmReading>,
    ) -> Option<BpmReading> {
        let reading = self.on_sample(raw, t_ms)?;
        readings.write(reading);
        Some(reading)
    }
}

/// The tick-loop side of the pipeline: staleness handling in front of the
/// anomaly detector, and publication of alarm transitions.
///
/// Ticks must keep coming whether or not new readings arrive, so the
/// detector's timers advance and signal loss is noticed. When the latest
/// reading goes stale the ticker feeds the detector a zeroed reading, which
/// is what lets the no-signal timer engage without new samples.
pub struct AnomalyTicker {
    anomaly: AnomalyDetector,
    last: Option<BpmReading>,
    stale_after_ms: i64,
}

impl AnomalyTicker {
    pub fn new(cfg: AnomalyConfig) -> Self {
        Self {
            anomaly: AnomalyDetector::new(cfg),
            last: None,
            stale_after_ms: READING_STALE_MS,
        }
    }

    pub fn active_alarm(&self) -> AlarmKind {
        self.anomaly.active_alarm()
    }

    /// One fixed-cadence tick. `fresh` is the latest published reading, if
    /// any; re-presenting the same reading on consecutive ticks is expected
    /// and harmless.
    pub fn tick(&mut self, fresh: Option<BpmReading>, now_ms: i64) -> Option<AlarmEvent> {
        if let Some(reading) = fresh {
            self.last = Some(reading);
        }

        let input = match self.last {
            Some(last) if now_ms - last.t_ms <= self.stale_after_ms => {
                // Advance time even though the value did not change.
                BpmReading {
                    t_ms: now_ms,
                    ..last
                }
            }
            // Stale or never seen: feed silence so no-signal can engage.
            _ => BpmReading {
                bpm: 0,
                quality: 0.0,
                stable: false,
                t_ms: now_ms,
            },
        };

        self.anomaly.update(input)
    }

    /// [`tick`](Self::tick) driven from the reading mailbox, publishing any
    /// transition to the alarm mailbox.
    pub fn service<M: RawMutex>(
        &mut self,
        readings: &Mailbox<M, BpmReading>,
        alarms: &Mailbox<M, AlarmEvent>,
        now_ms: i64,
    ) -> Option<AlarmEvent> {
        let event = self.tick(readings.peek(), now_ms)?;
        alarms.write(event);
        Some(event)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn reading(bpm: i32, t_ms: i64) -> BpmReading {
        BpmReading {
            bpm,
            quality: 0.8,
            stable: true,
            t_ms,
        }
    }

    #[test]
    fn fresh_reading_is_represented_with_current_time() {
        let mut ticker = AnomalyTicker::new(AnomalyConfig::default());

        // a healthy reading keeps the detector quiet
        assert_eq!(ticker.tick(Some(reading(72, 0)), 0), None);
        for n in 1..50_i64 {
            // no new data, but the cached reading is still fresh enough
            let fresh = (n % 10 == 0).then(|| reading(72, n * 100));
            assert_eq!(ticker.tick(fresh, n * 100), None);
        }
        assert_eq!(ticker.active_alarm(), AlarmKind::None);
    }

    #[test]
    fn stale_reading_decays_to_no_signal() {
        let mut ticker = AnomalyTicker::new(AnomalyConfig::default());
        ticker.tick(Some(reading(72, 0)), 0);

        // reading never refreshes: stale after 3 s, NoSignal 3 s later
        let mut events = Vec::new();
        for n in 1..120_i64 {
            events.extend(ticker.tick(None, n * 100));
        }
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].kind, AlarmKind::NoSignal);
        assert!(events[0].t_ms >= 6000);
    }

    #[test]
    fn never_seen_a_reading_still_times_out() {
        let mut ticker = AnomalyTicker::new(AnomalyConfig::default());

        let mut events = Vec::new();
        for n in 0..60_i64 {
            events.extend(ticker.tick(None, n * 100));
        }
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].kind, AlarmKind::NoSignal);
    }
}
