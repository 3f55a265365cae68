// Pattern data: which notes play on which steps, and how hard.
//
// "pattern": one loop of `step_count` steps.
// "track": one note's row of steps inside a pattern.
// "step": a single cell of a track, active or not, with its velocity.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::shared::{DEFAULT_STEPS, MAX_STEPS, MIN_STEPS, Note};

/// Lowest velocity an active step can hold (MIDI velocity 1).
pub const MIN_VELOCITY: f32 = 1.0 / 127.0;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PatternId(Uuid);

impl PatternId {
    pub fn new() -> Self {
        PatternId(Uuid::new_v4())
    }
}

impl Default for PatternId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for PatternId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl std::str::FromStr for PatternId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Uuid::parse_str(s).map(PatternId)
    }
}

/// One cell. Active flag and velocity always change together.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct Step {
    pub active: bool,
    pub velocity: f32,
}

impl Step {
    pub fn on(velocity: f32) -> Self {
        Self { active: true, velocity: clamp_velocity(velocity) }
    }
}

pub fn clamp_velocity(velocity: f32) -> f32 {
    if velocity.is_nan() { 1.0 } else { velocity.clamp(MIN_VELOCITY, 1.0) }
}

#[derive(Clone, Debug, PartialEq)]
pub struct Pattern {
    id: PatternId,
    pub name: String,
    step_count: usize,
    tracks: BTreeMap<Note, Vec<Step>>,
    swing: f32,    // percent
    humanize: f32, // percent
}

impl Pattern {
    pub fn new(name: impl Into<String>, step_count: usize) -> Self {
        Self {
            id: PatternId::new(),
            name: name.into(),
            step_count: step_count.clamp(MIN_STEPS, MAX_STEPS),
            tracks: BTreeMap::new(),
            swing: 0.0,
            humanize: 0.0,
        }
    }

    pub fn id(&self) -> PatternId {
        self.id
    }

    pub fn step_count(&self) -> usize {
        self.step_count
    }

    pub fn swing(&self) -> f32 {
        self.swing
    }

    pub fn humanize(&self) -> f32 {
        self.humanize
    }

    pub fn set_swing(&mut self, percent: f32) {
        self.swing = clamp_percent(percent);
    }

    pub fn set_humanize(&mut self, percent: f32) {
        self.humanize = clamp_percent(percent);
    }

    pub fn notes(&self) -> impl Iterator<Item = Note> + '_ {
        self.tracks.keys().copied()
    }

    pub fn track(&self, note: Note) -> Option<&[Step]> {
        self.tracks.get(&note).map(Vec::as_slice)
    }

    pub fn step(&self, note: Note, step: usize) -> Option<Step> {
        self.tracks.get(&note)?.get(step).copied()
    }

    pub fn is_active(&self, note: Note, step: usize) -> bool {
        self.step(note, step).is_some_and(|s| s.active)
    }

    /// Sets `step` of `note` active. Returns false if the step is out of range.
    pub fn record(&mut self, note: Note, step: usize, velocity: f32) -> bool {
        self.set_step(note, step, Step::on(velocity))
    }

    pub fn set_step(&mut self, note: Note, step: usize, value: Step) -> bool {
        if step >= self.step_count {
            return false;
        }
        let count = self.step_count;
        let track = self.tracks.entry(note).or_insert_with(|| vec![Step::default(); count]);
        track[step] = value;
        true
    }

    /// Flips a cell; newly activated cells get `velocity`.
    pub fn toggle(&mut self, note: Note, step: usize, velocity: f32) -> bool {
        let value = match self.step(note, step) {
            Some(s) if s.active => Step { active: false, ..s },
            _ => Step::on(velocity),
        };
        self.set_step(note, step, value)
    }

    pub fn clear_note(&mut self, note: Note) -> bool {
        self.tracks.remove(&note).is_some()
    }

    /// Notes active on `step` with their velocities, in note order.
    pub fn active_notes(&self, step: usize) -> Vec<(Note, f32)> {
        self.tracks
            .iter()
            .filter_map(|(note, track)| {
                let s = track.get(step)?;
                s.active.then_some((*note, s.velocity))
            })
            .collect()
    }

    /// Rotates every track by `amount` steps; positive moves content later.
    pub fn shift(&mut self, amount: i32) {
        let offset = (amount as i64).rem_euclid(self.step_count as i64) as usize;
        if offset == 0 {
            return;
        }
        for track in self.tracks.values_mut() {
            track.rotate_right(offset);
        }
    }

    /// Repeats the pattern once, doubling its length. No-op past 64 steps.
    pub fn double(&mut self) -> bool {
        if self.step_count * 2 > MAX_STEPS {
            return false;
        }
        for track in self.tracks.values_mut() {
            track.extend_from_within(..);
        }
        self.step_count *= 2;
        true
    }

    /// Keeps the first half. No-op at or below the minimum length.
    pub fn halve(&mut self) -> bool {
        let half = self.step_count / 2;
        if self.step_count <= MIN_STEPS || half < MIN_STEPS {
            return false;
        }
        for track in self.tracks.values_mut() {
            track.truncate(half);
        }
        self.step_count = half;
        true
    }

    pub fn to_record(&self) -> PatternRecord {
        PatternRecord {
            id: self.id.to_string(),
            name: self.name.clone(),
            step_count: self.step_count,
            tracks: self
                .tracks
                .iter()
                .map(|(note, track)| (note.0, track.iter().map(|s| s.active).collect()))
                .collect(),
            velocities: Some(
                self.tracks
                    .iter()
                    .map(|(note, track)| (note.0, track.iter().map(|s| s.velocity).collect()))
                    .collect(),
            ),
            swing: self.swing,
            humanize: self.humanize,
        }
    }
}

/// The persisted shape of a pattern.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct PatternRecord {
    pub id: String,
    #[serde(default)]
    pub name: String,
    #[serde(default = "default_step_count")]
    pub step_count: usize,
    #[serde(default)]
    pub tracks: BTreeMap<u8, Vec<bool>>,
    // older saves have no velocities; every step then plays at full scale
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub velocities: Option<BTreeMap<u8, Vec<f32>>>,
    #[serde(default)]
    pub swing: f32,
    #[serde(default)]
    pub humanize: f32,
}

fn default_step_count() -> usize {
    DEFAULT_STEPS
}

impl From<PatternRecord> for Pattern {
    /// Never fails: bad values are pulled back into range.
    fn from(record: PatternRecord) -> Self {
        let id = record.id.parse().unwrap_or_else(|_| {
            tracing::warn!(id = %record.id, "pattern record has a bad id, assigning a new one");
            PatternId::new()
        });
        let step_count = record.step_count.clamp(MIN_STEPS, MAX_STEPS);

        let tracks = record
            .tracks
            .iter()
            .map(|(&note, actives)| {
                let velocities = match &record.velocities {
                    Some(map) => map.get(&note).map(Vec::as_slice),
                    None => None,
                };
                let steps = (0..step_count)
                    .map(|i| {
                        let active = actives.get(i).copied().unwrap_or(false);
                        let velocity = match velocities {
                            Some(v) => v.get(i).copied().map(repair_velocity).unwrap_or(1.0),
                            None => 1.0,
                        };
                        Step { active, velocity: if active { clamp_velocity(velocity) } else { velocity } }
                    })
                    .collect();
                (Note(note), steps)
            })
            .collect();

        Pattern {
            id,
            name: record.name,
            step_count,
            tracks,
            swing: clamp_percent(record.swing),
            humanize: clamp_percent(record.humanize),
        }
    }
}

fn repair_velocity(v: f32) -> f32 {
    if v.is_finite() { v.clamp(0.0, 1.0) } else { 1.0 }
}

fn clamp_percent(value: f32) -> f32 {
    if value.is_nan() { 0.0 } else { value.clamp(0.0, 100.0) }
}
