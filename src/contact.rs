//! Contact and warm-up gating of the raw sample stream.
//!
//! The adaptive filters in [`crate::BeatDetector`] must not learn from a
//! disconnected or violently moving signal: they would either suppress
//! detection indefinitely or fire false beats on reattachment. This state
//! machine decides when raw samples are trustworthy and when the detector
//! needs a fresh start.

/// Gate tuning. Durations and thresholds match the sensor's analog
/// behaviour; the raw units are ADC counts.
#[derive(Clone, Debug)]
pub struct ContactConfig {
    /// Fixed post-boot period letting the analog bias settle.
    pub warmup_ms: i64,
    /// Quiet period required after a contact transient.
    pub settling_ms: i64,
    /// Raw readings below this floor mean the sensor is lifted off.
    pub raw_near_zero: i32,
    /// Sample-to-sample steps above this mean a reseated finger or motion.
    pub step_transient: i32,
}

impl Default for ContactConfig {
    fn default() -> Self {
        Self {
            warmup_ms: 1500,
            settling_ms: 1500,
            raw_near_zero: 50,
            step_transient: 600,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum State {
    BootWarmup { until_ms: i64 },
    Settling { until_ms: i64 },
    Running,
}

/// What the sampling loop should do with the current sample.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum SampleGate {
    /// Signal untrustworthy; drop the sample.
    Discard,
    /// Settling just finished: re-seed the beat detector with this raw
    /// sample, but do not forward it.
    Reseed,
    /// Forward the sample to the beat detector.
    Forward,
}

/// Warm-up / settling / running gate in front of the beat detector.
pub struct ContactController {
    cfg: ContactConfig,
    state: State,
    last_raw: i32,
}

impl ContactController {
    /// `seed_raw` is the first raw sample, read before the loop starts.
    pub fn new(cfg: ContactConfig, now_ms: i64, seed_raw: i32) -> Self {
        let until_ms = now_ms + cfg.warmup_ms;
        Self {
            cfg,
            state: State::BootWarmup { until_ms },
            last_raw: seed_raw,
        }
    }

    pub fn is_running(&self) -> bool {
        matches!(self.state, State::Running)
    }

    pub fn update(&mut self, raw: i32, t_ms: i64) -> SampleGate {
        let step = (raw - self.last_raw).abs();
        self.last_raw = raw;

        let transient = raw < self.cfg.raw_near_zero || step > self.cfg.step_transient;

        match self.state {
            // Transients are meaningless while the bias is still settling
            // after power-up.
            State::BootWarmup { until_ms } => {
                if t_ms >= until_ms {
                    self.state = State::Settling {
                        until_ms: t_ms + self.cfg.settling_ms,
                    };
                }
                SampleGate::Discard
            }
            State::Settling { until_ms } => {
                if transient {
                    // Re-arm: the outage window extends until the signal
                    // has been quiet for the full settling time.
                    self.state = State::Settling {
                        until_ms: t_ms + self.cfg.settling_ms,
                    };
                    SampleGate::Discard
                } else if t_ms >= until_ms {
                    self.state = State::Running;
                    SampleGate::Reseed
                } else {
                    SampleGate::Discard
                }
            }
            State::Running => {
                if transient {
                    self.state = State::Settling {
                        until_ms: t_ms + self.cfg.settling_ms,
                    };
                    SampleGate::Discard
                } else {
                    SampleGate::Forward
                }
            }
        }
    }
}
