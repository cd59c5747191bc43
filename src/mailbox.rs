//! Latest-value hand-off between periodic tasks.
//!
//! A mailbox is a capacity-1 channel: a write replaces whatever was there, a
//! peek copies the value out without consuming it. Producers never block on
//! slow consumers, and any number of read-only consumers at independent
//! cadences each observe the most recently completed write. Only the newest
//! value has decision value here, so there is no queue and no backpressure.
//!
//! The single mutation is an atomic replace under a short critical section;
//! partial values are never observable. Each mailbox has exactly one writer.

use core::cell::Cell;

use embassy_sync::blocking_mutex::raw::RawMutex;
use embassy_sync::blocking_mutex::Mutex;

/// Single-slot, overwrite-on-write, non-destructive-read channel.
///
/// # Example
/// ```rust
/// use embassy_sync::blocking_mutex::raw::NoopRawMutex;
/// use pulse_monitor::Mailbox;
///
/// let mailbox: Mailbox<NoopRawMutex, u32> = Mailbox::new();
/// mailbox.write(72);
/// mailbox.write(74);
///
/// // peeking does not consume: every consumer sees the latest value
/// assert_eq!(mailbox.peek(), Some(74));
/// assert_eq!(mailbox.peek(), Some(74));
/// ```
pub struct Mailbox<M: RawMutex, T: Copy> {
    slot: Mutex<M, Cell<Option<T>>>,
}

impl<M: RawMutex, T: Copy> Mailbox<M, T> {
    /// Creates an empty mailbox.
    pub const fn new() -> Self {
        Self {
            slot: Mutex::new(Cell::new(None)),
        }
    }

    /// Creates a mailbox already holding `seed`, for consumers that must
    /// never observe an absent value.
    pub const fn new_with(seed: T) -> Self {
        Self {
            slot: Mutex::new(Cell::new(Some(seed))),
        }
    }

    /// Replaces the current value. An unread previous value is lost.
    pub fn write(&self, value: T) {
        self.slot.lock(|slot| slot.set(Some(value)));
    }

    /// Copies the current value out without consuming it.
    pub fn peek(&self) -> Option<T> {
        self.slot.lock(Cell::get)
    }

    /// Empties the mailbox.
    pub fn clear(&self) {
        self.slot.lock(|slot| slot.set(None));
    }
}

impl<M: RawMutex, T: Copy> Default for Mailbox<M, T> {
    fn default() -> Self {
        Self::new()
    }
}

/// Hand-off slot for an externally corrected BPM value.
///
/// Written by an out-of-band network collaborator, read by the display
/// collaborator; it has no influence on the anomaly pipeline. Writes outside
/// the plausible `(0, 260)` band are ignored.
pub struct CorrectionSlot<M: RawMutex> {
    inner: Mailbox<M, i32>,
}

impl<M: RawMutex> CorrectionSlot<M> {
    /// Upper bound (exclusive) on accepted corrections.
    pub const MAX_BPM: i32 = 260;

    pub const fn new() -> Self {
        Self {
            inner: Mailbox::new(),
        }
    }

    pub fn write(&self, bpm: i32) {
        if bpm > 0 && bpm < Self::MAX_BPM {
            self.inner.write(bpm);
        }
    }

    pub fn peek(&self) -> Option<i32> {
        self.inner.peek()
    }
}

impl<M: RawMutex> Default for CorrectionSlot<M> {
    fn default() -> Self {
        Self::new()
    }
}
