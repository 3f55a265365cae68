// Time sources the scheduler runs against. Nothing in the core reads wall
// clock time for scheduling; everything is measured on one of these.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use crate::error::ClockError;

mod precision;

pub use precision::{DriftCorrection, PrecisionClock, SchedulePass, StepEvent, TickSubscription};

/// A monotonic clock in seconds, shared with the audio output.
pub trait AudioClock: Send + Sync {
    fn now(&self) -> f64;
    fn resume(&self) -> Result<(), ClockError>;
    fn is_available(&self) -> bool;
}

/// Counts frames rendered by the output stream. The render callback bumps
/// `frames` after every block, so `now()` is the time of the next frame
/// that will be written.
#[derive(Clone, Debug)]
pub struct FrameClock {
    frames: Arc<AtomicU64>,
    alive: Arc<AtomicBool>,
    sample_rate: f64,
}

impl FrameClock {
    pub fn new(sample_rate: u32) -> Self {
        Self {
            frames: Arc::new(AtomicU64::new(0)),
            alive: Arc::new(AtomicBool::new(true)),
            sample_rate: sample_rate as f64,
        }
    }

    pub fn sample_rate(&self) -> f64 {
        self.sample_rate
    }

    pub fn frames(&self) -> Arc<AtomicU64> {
        Arc::clone(&self.frames)
    }

    pub fn alive_flag(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.alive)
    }

    pub fn seconds_to_frames(&self, seconds: f64) -> u64 {
        (seconds.max(0.0) * self.sample_rate).round() as u64
    }
}

impl AudioClock for FrameClock {
    fn now(&self) -> f64 {
        self.frames.load(Ordering::Acquire) as f64 / self.sample_rate
    }

    fn resume(&self) -> Result<(), ClockError> {
        // the stream is started when it's built; a dead stream can't come back
        if self.is_available() { Ok(()) } else { Err(ClockError::Unavailable) }
    }

    fn is_available(&self) -> bool {
        self.alive.load(Ordering::Acquire)
    }
}

/// A clock that only moves when told to. Used for offline runs and tests.
#[derive(Debug)]
pub struct ManualClock {
    now_bits: AtomicU64,
    available: AtomicBool,
    suspended: AtomicBool,
}

impl Default for ManualClock {
    fn default() -> Self {
        Self::new(0.0)
    }
}

impl ManualClock {
    pub fn new(start: f64) -> Self {
        Self {
            now_bits: AtomicU64::new(start.to_bits()),
            available: AtomicBool::new(true),
            suspended: AtomicBool::new(true),
        }
    }

    pub fn set(&self, seconds: f64) {
        self.now_bits.store(seconds.to_bits(), Ordering::Release);
    }

    pub fn advance(&self, seconds: f64) {
        self.set(self.now() + seconds);
    }

    pub fn set_available(&self, available: bool) {
        self.available.store(available, Ordering::Release);
    }

    pub fn is_suspended(&self) -> bool {
        self.suspended.load(Ordering::Acquire)
    }
}

impl AudioClock for ManualClock {
    fn now(&self) -> f64 {
        f64::from_bits(self.now_bits.load(Ordering::Acquire))
    }

    fn resume(&self) -> Result<(), ClockError> {
        if !self.is_available() {
            return Err(ClockError::Unavailable);
        }
        self.suspended.store(false, Ordering::Release);
        Ok(())
    }

    fn is_available(&self) -> bool {
        self.available.load(Ordering::Acquire)
    }
}
