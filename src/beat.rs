//! Adaptive beat detection over a periodically sampled pulse waveform.
//!
//! Every threshold is re-derived on every sample from exponential moving
//! averages of the signal itself, so the detector follows drifting baselines,
//! changing contact pressure and varying noise without fixed calibration.

#[allow(unused_imports)]
use micromath::F32Ext;

use crate::envelope::Envelope;
use crate::ring::Ring;

/// Lowest BPM the detector will ever report.
pub const BPM_MIN: i32 = 40;
/// Highest BPM the detector will ever report.
pub const BPM_MAX: i32 = 180;

/// Inter-beat interval band implied by [`BPM_MIN`]/[`BPM_MAX`]. The lower
/// bound doubles as the refractory period.
pub const IBI_MIN_MS: i64 = (60_000 / BPM_MAX) as i64;
pub const IBI_MAX_MS: i64 = (60_000 / BPM_MIN) as i64;

const IBI_SLOTS: usize = 5;

// Consistency gate around the running median interval; rejects doubled or
// erratic triggers without discarding history.
const IBI_RATIO_LO: f32 = 0.85;
const IBI_RATIO_HI: f32 = 1.20;

// Quality score weighting: amplitude, noise, interval history.
const Q_AMP_WEIGHT: f32 = 0.55;
const Q_NOISE_WEIGHT: f32 = 0.30;
const Q_HISTORY_WEIGHT: f32 = 0.15;

/// Detector tuning.
///
/// The defaults are empirically tuned for one optical sensor and board pair.
/// Treat them as starting points, not as verified constants.
#[derive(Clone, Debug)]
pub struct BeatConfig {
    /// DC baseline tracker smoothing.
    pub baseline_alpha: f32,
    /// Low-pass smoothing of the AC component.
    pub smooth_alpha: f32,
    /// Envelope decay back toward the signal.
    pub envelope_decay: f32,
    /// Smoothing of the absolute-slope noise proxy.
    pub noise_alpha: f32,
    /// Smoothing of the peak-to-peak amplitude; slower than the noise proxy
    /// so it represents sustained signal strength.
    pub amplitude_alpha: f32,
    /// Minimum acceptable smoothed amplitude.
    pub amplitude_floor: f32,
    /// Noise multiple raising the amplitude gate.
    pub amplitude_noise_mult: f32,
    /// Upper clamp on the amplitude gate.
    pub amplitude_ceil: f32,
    /// Minimum beat threshold.
    pub threshold_floor: f32,
    /// Amplitude fraction contributing to the beat threshold.
    pub threshold_amp_frac: f32,
    /// Noise multiple contributing to the beat threshold.
    pub threshold_noise_mult: f32,
    /// Required peak prominence, as a fraction of the smoothed amplitude.
    pub prominence_frac: f32,
    /// Amplitude at which the quality term saturates.
    pub quality_amp_norm: f32,
    /// Noise level at which the quality term reaches zero.
    pub quality_noise_norm: f32,
}

impl Default for BeatConfig {
    fn default() -> Self {
        Self {
            baseline_alpha: 0.01,
            smooth_alpha: 0.18,
            envelope_decay: 0.01,
            noise_alpha: 0.06,
            amplitude_alpha: 0.04,
            amplitude_floor: 18.0,
            amplitude_noise_mult: 8.0,
            amplitude_ceil: 80.0,
            threshold_floor: 22.0,
            threshold_amp_frac: 0.26,
            threshold_noise_mult: 6.0,
            prominence_frac: 0.50,
            quality_amp_norm: 140.0,
            quality_noise_norm: 25.0,
        }
    }
}

/// Outcome of processing one sample.
#[derive(Clone, Copy, Debug, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum BeatResult {
    /// No accepted beat this sample. This is not an error; most samples
    /// resolve here.
    None,
    /// Accepted beat, but fewer than three intervals are on record.
    Provisional { bpm: i32, quality: f32 },
    /// Accepted beat with an established interval history.
    Stable { bpm: i32, quality: f32 },
}

// Slope memory for the rising-to-falling peak test.
#[derive(Clone, Copy)]
struct Slope {
    filt: f32,
    t_ms: i64,
    diff: f32,
}

/// Converts raw samples plus timestamps into accepted beats and a BPM
/// estimate with a quality score.
///
/// # Example
/// ```rust
/// use pulse_monitor::{BeatConfig, BeatDetector, BeatResult};
///
/// // Seed with the first raw sample so the baseline starts in range.
/// let mut detector = BeatDetector::new(BeatConfig::default(), 2048);
/// assert_eq!(detector.update(2048, 0), BeatResult::None);
/// ```
pub struct BeatDetector {
    cfg: BeatConfig,
    baseline: f32,
    smoothed: f32,
    env: Envelope,
    noise_ema: f32,
    amp_ema: f32,
    prev: Option<Slope>,
    last_beat_ms: Option<i64>,
    intervals: Ring<i32, IBI_SLOTS>,
    quality: f32,
}

impl BeatDetector {
    pub fn new(cfg: BeatConfig, seed_raw: i32) -> Self {
        let envelope_decay = cfg.envelope_decay;
        let mut detector = Self {
            cfg,
            baseline: 0.0,
            smoothed: 0.0,
            env: Envelope::new(envelope_decay),
            noise_ema: 0.0,
            amp_ema: 0.0,
            prev: None,
            last_beat_ms: None,
            intervals: Ring::new(),
            quality: 0.0,
        };
        detector.reset(seed_raw);
        detector
    }

    /// Re-seeds the baseline with `seed_raw` and discards all adaptive state
    /// and interval history. Called after a contact transient has settled.
    pub fn reset(&mut self, seed_raw: i32) {
        self.baseline = seed_raw as f32;
        self.smoothed = 0.0;
        self.env.reset();
        self.noise_ema = 0.0;
        self.amp_ema = 0.0;
        self.prev = None;
        self.last_beat_ms = None;
        self.intervals.clear();
        self.quality = 0.0;
    }

    /// Quality score from the most recent `update`, in `[0, 1]`.
    pub fn quality(&self) -> f32 {
        self.quality
    }

    /// Number of intervals currently on record, at most five.
    pub fn interval_count(&self) -> usize {
        self.intervals.len()
    }

    /// Processes one sample. Returns an accepted beat or
    /// [`BeatResult::None`]; the detector has no failure modes.
    pub fn update(&mut self, raw: i32, t_ms: i64) -> BeatResult {
        // DC drift removal, then low-pass smoothing of the AC component.
        self.baseline += self.cfg.baseline_alpha * (raw as f32 - self.baseline);
        let ac = raw as f32 - self.baseline;

        self.smoothed += self.cfg.smooth_alpha * (ac - self.smoothed);
        let filt = self.smoothed;

        self.env.update(filt);
        let p2p = self.env.span();

        // The absolute slope of the filtered signal doubles as a fast
        // motion/noise proxy.
        if let Some(prev) = self.prev {
            let diff = filt - prev.filt;
            self.noise_ema += self.cfg.noise_alpha * (diff.abs() - self.noise_ema);
        }

        if self.amp_ema <= 0.0 {
            self.amp_ema = p2p;
        } else {
            self.amp_ema += self.cfg.amplitude_alpha * (p2p - self.amp_ema);
        }

        let amp_gate = (self.cfg.amplitude_noise_mult * self.noise_ema)
            .max(self.cfg.amplitude_floor)
            .clamp(self.cfg.amplitude_floor, self.cfg.amplitude_ceil);

        // Rises with both signal strength and ambient noise: noisy weak
        // signals need disproportionately strong peaks to register.
        let thr = (self.cfg.threshold_amp_frac * self.amp_ema)
            .max(self.cfg.threshold_noise_mult * self.noise_ema)
            .max(self.cfg.threshold_floor);

        self.quality = self.score_quality();

        // Too weak or too noisy to trust: drop the slope memory so peak
        // logic restarts cleanly, but keep the filters adapting.
        if !self.env.is_seeded() || self.amp_ema < amp_gate {
            self.prev = None;
            return BeatResult::None;
        }

        let Some(prev) = self.prev else {
            self.prev = Some(Slope {
                filt,
                t_ms,
                diff: 0.0,
            });
            return BeatResult::None;
        };

        let diff = filt - prev.filt;
        let slope_was_up = prev.diff > 0.0;
        let slope_now_down = diff <= 0.0;

        // Refractory is measured at the candidate peak, i.e. the previous
        // sample's timestamp.
        let refractory_ok = self
            .last_beat_ms
            .map_or(true, |last| prev.t_ms - last >= IBI_MIN_MS);

        let prominence_ok =
            prev.filt - self.env.min() > self.cfg.prominence_frac * self.amp_ema;

        let beat = refractory_ok
            && slope_was_up
            && slope_now_down
            && prev.filt > thr
            && prominence_ok;

        self.prev = Some(Slope { filt, t_ms, diff });

        if !beat {
            return BeatResult::None;
        }
        self.register_beat(t_ms)
    }

    fn register_beat(&mut self, beat_ms: i64) -> BeatResult {
        // Every candidate re-arms the timing mark, accepted or not.
        let Some(last) = self.last_beat_ms.replace(beat_ms) else {
            // First beat only arms timing; there is no interval yet.
            return BeatResult::None;
        };

        let ibi_ms = beat_ms - last;
        if !(IBI_MIN_MS..=IBI_MAX_MS).contains(&ibi_ms) {
            return BeatResult::None;
        }
        let ibi = ibi_ms as i32;

        if self.intervals.len() >= 3 {
            let med = self.median_interval();
            if med > 0 {
                let ratio = ibi as f32 / med as f32;
                if !(IBI_RATIO_LO..=IBI_RATIO_HI).contains(&ratio) {
                    return BeatResult::None;
                }
            }
        }

        self.intervals.push(ibi);

        let avg = self.average_interval();
        if avg <= 0 {
            return BeatResult::None;
        }
        let bpm = 60_000 / avg;

        if self.intervals.len() < 3 {
            BeatResult::Provisional {
                bpm,
                quality: self.quality,
            }
        } else {
            BeatResult::Stable {
                bpm,
                quality: self.quality,
            }
        }
    }

    fn average_interval(&self) -> i32 {
        let n = self.intervals.len() as i32;
        if n == 0 {
            return 0;
        }
        let sum: i32 = self.intervals.iter_unordered().sum();
        sum / n
    }

    fn median_interval(&self) -> i32 {
        let n = self.intervals.len();
        if n == 0 {
            return 0;
        }
        let mut sorted = [0i32; IBI_SLOTS];
        for (slot, ibi) in sorted.iter_mut().zip(self.intervals.iter_unordered()) {
            *slot = ibi;
        }
        sorted[..n].sort_unstable();
        sorted[n / 2]
    }

    fn score_quality(&self) -> f32 {
        let q_amp = (self.amp_ema / self.cfg.quality_amp_norm).clamp(0.0, 1.0);
        let q_noise = (1.0 - self.noise_ema / self.cfg.quality_noise_norm).clamp(0.0, 1.0);
        let q_history = self.intervals.len() as f32 / IBI_SLOTS as f32;

        (Q_AMP_WEIGHT * q_amp + Q_NOISE_WEIGHT * q_noise + Q_HISTORY_WEIGHT * q_history)
            .clamp(0.0, 1.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const BASELINE: i32 = 2048;

    // Clean 60 BPM pulse train: a 200 ms half-sine bump once a second over a
    // mid-scale ADC baseline.
    fn pulse(t_ms: i64) -> i32 {
        let phase = (t_ms % 1000) as f32;
        let bump = if phase < 200.0 {
            (core::f32::consts::PI * phase / 200.0).sin() * 420.0
        } else {
            0.0
        };
        BASELINE + bump as i32
    }

    fn run(detector: &mut BeatDetector, from_ms: i64, to_ms: i64) -> Vec<BeatResult> {
        let mut results = Vec::new();
        let mut t = from_ms;
        while t < to_ms {
            let r = detector.update(pulse(t), t);
            if r != BeatResult::None {
                results.push(r);
            }
            t += 10;
        }
        results
    }

    #[test]
    fn locks_onto_clean_60_bpm() {
        let mut detector = BeatDetector::new(BeatConfig::default(), pulse(0));
        let results = run(&mut detector, 0, 30_000);

        assert!(!results.is_empty());
        match *results.last().unwrap() {
            BeatResult::Stable { bpm, quality } => {
                assert_eq!(bpm, 60);
                assert!((0.0..=1.0).contains(&quality));
            }
            other => panic!("expected a stable lock, got {:?}", other),
        }
    }

    #[test]
    fn reported_bpm_stays_in_physiological_band() {
        let mut detector = BeatDetector::new(BeatConfig::default(), pulse(0));
        for result in run(&mut detector, 0, 30_000) {
            let (bpm, quality) = match result {
                BeatResult::Provisional { bpm, quality } => (bpm, quality),
                BeatResult::Stable { bpm, quality } => (bpm, quality),
                BeatResult::None => unreachable!(),
            };
            assert!((BPM_MIN..=BPM_MAX).contains(&bpm), "bpm {} out of band", bpm);
            assert!((0.0..=1.0).contains(&quality));
        }
    }

    #[test]
    fn quality_bounded_on_arbitrary_input() {
        let mut detector = BeatDetector::new(BeatConfig::default(), 0);
        // deterministic rough-and-tumble input, including range extremes
        let mut x: u32 = 0x1234_5678;
        for i in 0..5000_i64 {
            x = x.wrapping_mul(1_664_525).wrapping_add(1_013_904_223);
            let raw = (x >> 20) as i32; // 0..4095
            detector.update(raw, i * 10);
            let q = detector.quality();
            assert!((0.0..=1.0).contains(&q), "quality {} out of range", q);
        }
    }

    #[test]
    fn flat_signal_never_beats() {
        let mut detector = BeatDetector::new(BeatConfig::default(), BASELINE);
        for i in 0..2000_i64 {
            assert_eq!(detector.update(BASELINE, i * 10), BeatResult::None);
        }
    }

    #[test]
    fn reset_discards_interval_history() {
        let mut detector = BeatDetector::new(BeatConfig::default(), pulse(0));
        run(&mut detector, 0, 20_000);
        assert!(detector.interval_count() >= 3);

        detector.reset(BASELINE);
        assert_eq!(detector.interval_count(), 0);
        assert_eq!(detector.quality(), 0.0);

        // First result after a reset must start the tier ladder over.
        let results = run(&mut detector, 20_000, 26_000);
        if let Some(first) = results.first() {
            assert!(matches!(first, BeatResult::Provisional { .. }));
        }
    }
}
