// What the trigger engine needs to know about a loaded sound. Decoding and
// file handling happen elsewhere (see loader/); by the time a sound shows up
// here it is a registered buffer with a known length.

use std::collections::HashMap;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::audio::SampleId;
use crate::shared::Note;

/// Normalised part of a sample that actually plays, as fractions of its length.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct TrimRegion {
    pub start: f64,
    pub end: f64,
}

impl Default for TrimRegion {
    fn default() -> Self {
        Self { start: 0.0, end: 1.0 }
    }
}

impl TrimRegion {
    /// Builds a region, swapping and clamping bad bounds into `0 <= start <= end <= 1`.
    pub fn new(start: f64, end: f64) -> Self {
        let clamp = |v: f64| if v.is_nan() { 0.0 } else { v.clamp(0.0, 1.0) };
        let (a, b) = (clamp(start), clamp(end));
        if a <= b { Self { start: a, end: b } } else { Self { start: b, end: a } }
    }

    pub fn fraction(&self) -> f64 {
        self.end - self.start
    }
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct SampleInfo {
    pub sample_id: SampleId,
    /// Total length of the decoded buffer, in seconds.
    pub duration: f64,
    pub trim: TrimRegion,
}

impl SampleInfo {
    pub fn offset(&self) -> f64 {
        self.trim.start * self.duration
    }

    pub fn playable(&self) -> f64 {
        self.trim.fraction() * self.duration
    }
}

pub trait SampleStore {
    fn sample(&self, note: Note) -> Option<SampleInfo>;

    fn is_loaded(&self, note: Note) -> bool {
        self.sample(note).is_some()
    }
}

/// One pad's sound.
#[derive(Clone, Debug, PartialEq)]
pub struct SoundSlot {
    pub sample_id: SampleId,
    pub frames: usize,
    pub sample_rate: u32,
    pub trim: TrimRegion,
    pub path: Option<PathBuf>,
}

impl SoundSlot {
    pub fn duration(&self) -> f64 {
        if self.sample_rate == 0 {
            return 0.0;
        }
        self.frames as f64 / self.sample_rate as f64
    }
}

/// The sounds currently assigned to notes.
#[derive(Clone, Debug, Default)]
pub struct SampleBank {
    slots: HashMap<Note, SoundSlot>,
}

impl SampleBank {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn assign(&mut self, note: Note, slot: SoundSlot) -> Option<SoundSlot> {
        self.slots.insert(note, slot)
    }

    pub fn remove(&mut self, note: Note) -> Option<SoundSlot> {
        self.slots.remove(&note)
    }

    pub fn slot(&self, note: Note) -> Option<&SoundSlot> {
        self.slots.get(&note)
    }

    pub fn set_trim(&mut self, note: Note, trim: TrimRegion) -> bool {
        match self.slots.get_mut(&note) {
            Some(slot) => {
                slot.trim = trim;
                true
            }
            None => false,
        }
    }

    pub fn notes(&self) -> impl Iterator<Item = Note> + '_ {
        self.slots.keys().copied()
    }
}

impl SampleStore for SampleBank {
    fn sample(&self, note: Note) -> Option<SampleInfo> {
        let slot = self.slots.get(&note)?;
        Some(SampleInfo {
            sample_id: slot.sample_id,
            duration: slot.duration(),
            trim: slot.trim,
        })
    }
}
