//! This crate turns a noisy, periodically sampled finger-contact pulse signal
//! into a continuous BPM estimate and a small set of heart-rate alarm flags.
//!
//! The pipeline runs in fixed memory with no allocation and is meant to be
//! driven by periodic tasks on a realtime target:
//!
//! ```text
//! sampling loop ──► ContactController ──► BeatDetector ──► reading Mailbox
//! anomaly tick  ──► AnomalyTicker (staleness) ──► AnomalyDetector ──► alarm Mailbox
//! ```
//!
//! [`SamplerPipeline`] and [`AnomalyTicker`] wire the stages together; the
//! mailboxes carry only the latest value, so consumers at any cadence always
//! observe the most recent completed write.
//!
//! The alarm flags are heuristic rate/stability indicators, not a medical
//! diagnosis.
#![cfg_attr(not(test), no_std)]

pub mod anomaly;
pub mod beat;
pub mod contact;
mod envelope;
pub mod mailbox;
pub mod monitor;
mod ring;

pub use anomaly::{AnomalyConfig, AnomalyDetector};
pub use beat::{BeatConfig, BeatDetector, BeatResult};
pub use contact::{ContactConfig, ContactController, SampleGate};
pub use mailbox::{CorrectionSlot, Mailbox};
pub use monitor::{AnomalyTicker, SamplerPipeline};

/// A single BPM estimate, produced on each accepted beat.
///
/// At most one reading is live at a time: producers overwrite the previous
/// value in the reading mailbox, consumers peek at their own cadence.
#[derive(Clone, Copy, Debug, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct BpmReading {
    pub bpm: i32,
    /// Signal quality proxy in `[0, 1]`.
    pub quality: f32,
    /// `false` while fewer than three inter-beat intervals have been accepted.
    pub stable: bool,
    /// Monotonic timestamp of the accepted beat, in milliseconds.
    pub t_ms: i64,
}

/// Snapshot taken when the active alarm changes, not on every tick.
#[derive(Clone, Copy, Debug, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct AlarmEvent {
    pub kind: AlarmKind,
    /// BPM at the moment of the transition.
    pub bpm: i32,
    /// Quality at the moment of the transition.
    pub quality: f32,
    pub t_ms: i64,
}

impl AlarmEvent {
    /// Seed value for the alarm mailbox, so consumers never observe an
    /// undefined initial state.
    pub const fn initial(t_ms: i64) -> Self {
        Self {
            kind: AlarmKind::None,
            bpm: 0,
            quality: 0.0,
            t_ms,
        }
    }
}

/// Alarm classification.
///
/// `NoSignal` pre-empts everything else but is advisory status, not a
/// critical alarm; `Bradycardia` and `Tachycardia` pre-empt `RapidChange`.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum AlarmKind {
    None,
    /// Low quality or no usable pulse for too long.
    NoSignal,
    /// Sustained low BPM.
    Bradycardia,
    /// Sustained high BPM.
    Tachycardia,
    /// Rapid BPM jump inside a short window.
    RapidChange,
}

impl AlarmKind {
    /// `NoSignal` is status information; the remaining alarms demand attention.
    pub const fn is_critical(self) -> bool {
        !matches!(self, AlarmKind::None | AlarmKind::NoSignal)
    }

    /// Stable uppercase name for display and telemetry collaborators.
    pub const fn as_str(self) -> &'static str {
        match self {
            AlarmKind::None => "NONE",
            AlarmKind::NoSignal => "NO_SIGNAL",
            AlarmKind::Bradycardia => "BRADYCARDIA",
            AlarmKind::Tachycardia => "TACHYCARDIA",
            AlarmKind::RapidChange => "RAPID_CHANGE",
        }
    }
}
