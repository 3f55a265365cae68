//! Sound trigger engine.
//!
//! Turns "play this note at this time" into a scheduled voice on the audio
//! output: looks the sound up, applies the trim region, shapes gain and
//! click-free fades, and keeps track of every voice still sounding per note
//! so they can be stopped or reported back when they finish.

use std::collections::HashMap;
use std::sync::Arc;

use tracing::{debug, warn};

use crate::audio_api::{VoiceId, VoiceSpec};
use crate::clock::AudioClock;
use crate::config::TriggerConfig;
use crate::error::TriggerError;
use crate::pipeline::pattern::clamp_velocity;
use crate::samples::SampleStore;
use crate::shared::Note;

// Voices whose end passed this long ago without a completion report are
// assumed finished (the report may have been dropped on a full channel).
const COMPLETION_GRACE: f64 = 0.5;

/// Where voices actually get played.
pub trait VoiceOutput {
    fn start(&mut self, voice: &VoiceSpec) -> Result<(), TriggerError>;
    fn stop(&mut self, voice: VoiceId, at: f64, time_constant: f64, hard_after: f64) -> Result<(), TriggerError>;
    fn cancel(&mut self, voice: VoiceId) -> Result<(), TriggerError>;
    /// Voices that finished on their own since the last call.
    fn poll_ended(&mut self) -> Vec<VoiceId>;
}

/// Output used while no audio device is available. Refuses every voice.
#[derive(Clone, Copy, Debug, Default)]
pub struct NullOutput;

impl VoiceOutput for NullOutput {
    fn start(&mut self, _voice: &VoiceSpec) -> Result<(), TriggerError> {
        Err(TriggerError::Disconnected)
    }

    fn stop(&mut self, _voice: VoiceId, _at: f64, _tc: f64, _hard_after: f64) -> Result<(), TriggerError> {
        Ok(())
    }

    fn cancel(&mut self, _voice: VoiceId) -> Result<(), TriggerError> {
        Ok(())
    }

    fn poll_ended(&mut self) -> Vec<VoiceId> {
        Vec::new()
    }
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct NoteTrigger {
    pub note: Note,
    pub velocity: f32,
    pub time: f64,
}

/// Enough to find and stop a voice later.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct VoiceHandle {
    pub voice: VoiceId,
    pub note: Note,
    pub start: f64,
    pub end: f64,
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct VoiceCompletion {
    pub note: Note,
    pub voice: VoiceId,
    /// No other voice of this note is still sounding.
    pub note_idle: bool,
}

#[derive(Clone, Copy, Debug)]
struct ActiveVoice {
    id: VoiceId,
    start: f64,
    end: f64,
}

pub struct SoundTrigger<O: VoiceOutput> {
    config: TriggerConfig,
    audio: Arc<dyn AudioClock>,
    output: O,
    active: HashMap<Note, Vec<ActiveVoice>>,
    last_trigger: HashMap<Note, f64>,
    next_voice: u64,
}

impl<O: VoiceOutput> SoundTrigger<O> {
    pub fn new(config: TriggerConfig, audio: Arc<dyn AudioClock>, output: O) -> Self {
        Self {
            config,
            audio,
            output,
            active: HashMap::new(),
            last_trigger: HashMap::new(),
            next_voice: 0,
        }
    }

    pub fn output(&self) -> &O {
        &self.output
    }

    pub fn output_mut(&mut self) -> &mut O {
        &mut self.output
    }

    /// Velocity → gain. Square root feels closer to how hard a pad was hit.
    pub fn gain_for(&self, velocity: f32) -> f32 {
        clamp_velocity(velocity).sqrt() * self.config.headroom
    }

    pub fn trigger(
        &mut self,
        note: Note,
        velocity: f32,
        time: f64,
        samples: &dyn SampleStore,
    ) -> Option<VoiceHandle> {
        let Some(info) = samples.sample(note) else {
            debug!(note = note.0, "no sound loaded");
            return None;
        };

        if let Some(&last) = self.last_trigger.get(&note) {
            if (time - last).abs() < self.config.debounce {
                debug!(note = note.0, time, last, "retrigger suppressed");
                return None;
            }
        }

        let duration = info.playable();
        if duration <= 0.0 {
            debug!(note = note.0, "trim region is empty");
            return None;
        }

        let fade_in = self.config.fade_in.min(duration / 2.0);
        let fade_out = (duration > self.config.min_fade_out_region)
            .then(|| self.config.fade_out.min(duration / 2.0));

        let voice = VoiceId(self.next_voice);
        self.next_voice += 1;
        let spec = VoiceSpec {
            voice,
            note,
            sample_id: info.sample_id,
            start: time,
            offset: info.offset(),
            duration,
            gain: self.gain_for(velocity),
            fade_in,
            fade_out,
        };

        if let Err(e) = self.output.start(&spec) {
            match e {
                TriggerError::Disconnected => debug!(note = note.0, "no audio output, voice dropped"),
                _ => warn!(note = note.0, error = %e, "voice failed to start"),
            }
            return None;
        }

        let end = spec.end();
        self.active.entry(note).or_default().push(ActiveVoice { id: voice, start: time, end });
        self.last_trigger.insert(note, time);
        Some(VoiceHandle { voice, note, start: time, end })
    }

    /// Triggers a whole step at once. One bad note doesn't stop the rest.
    pub fn trigger_batch(&mut self, batch: &[NoteTrigger], samples: &dyn SampleStore) -> Vec<VoiceHandle> {
        batch
            .iter()
            .filter_map(|t| self.trigger(t.note, t.velocity, t.time, samples))
            .collect()
    }

    /// Fades out and stops every voice of `note`. Returns how many were stopped.
    pub fn stop(&mut self, note: Note) -> usize {
        self.last_trigger.remove(&note);
        let Some(voices) = self.active.remove(&note) else {
            return 0;
        };
        let now = self.audio.now();
        for v in &voices {
            self.stop_voice(v.id, now);
        }
        debug!(note = note.0, voices = voices.len(), "note stopped");
        voices.len()
    }

    pub fn stop_all(&mut self) -> usize {
        let now = self.audio.now();
        let active = std::mem::take(&mut self.active);
        self.last_trigger.clear();
        let mut stopped = 0;
        for v in active.values().flatten() {
            self.stop_voice(v.id, now);
            stopped += 1;
        }
        if stopped > 0 {
            debug!(voices = stopped, "all voices stopped");
        }
        stopped
    }

    /// Drops voices that were scheduled but should no longer play.
    pub fn cancel(&mut self, voices: &[VoiceId]) -> usize {
        let mut cancelled = 0;
        for &id in voices {
            let Some((note, voice)) = self.take_voice(id) else {
                continue;
            };
            if let Err(e) = self.output.cancel(id) {
                debug!(voice = id.0, error = %e, "cancel failed");
            }
            if self.last_trigger.get(&note) == Some(&voice.start) {
                self.last_trigger.remove(&note);
            }
            cancelled += 1;
        }
        cancelled
    }

    /// Collects voices that finished playing. A report for a voice that is no
    /// longer on record (already stopped or replaced) is ignored.
    pub fn poll_completions(&mut self) -> Vec<VoiceCompletion> {
        let mut done = Vec::new();
        for id in self.output.poll_ended() {
            match self.take_voice(id) {
                Some((note, _)) => done.push(VoiceCompletion { note, voice: id, note_idle: !self.is_active(note) }),
                None => debug!(voice = id.0, "stale completion ignored"),
            }
        }

        let cutoff = self.audio.now() - COMPLETION_GRACE;
        let expired: Vec<VoiceId> = self
            .active
            .values()
            .flatten()
            .filter(|v| v.end < cutoff)
            .map(|v| v.id)
            .collect();
        for id in expired {
            if let Some((note, _)) = self.take_voice(id) {
                done.push(VoiceCompletion { note, voice: id, note_idle: !self.is_active(note) });
            }
        }
        done
    }

    pub fn is_active(&self, note: Note) -> bool {
        self.active.get(&note).is_some_and(|v| !v.is_empty())
    }

    pub fn active_voice_count(&self) -> usize {
        self.active.values().map(Vec::len).sum()
    }

    /// Cancels every voice starting after `time`, dispatched or live. Only
    /// valid when the whole timeline past `time` was abandoned.
    pub fn cancel_from(&mut self, time: f64) -> usize {
        let stale: Vec<VoiceId> = self
            .active
            .values()
            .flatten()
            .filter(|v| v.start > time)
            .map(|v| v.id)
            .collect();
        self.cancel(&stale)
    }

    fn stop_voice(&mut self, id: VoiceId, now: f64) {
        // a voice may have finished between the check and the stop; that's fine
        if let Err(e) = self.output.stop(id, now, self.config.stop_time_constant, self.config.stop_hard_after) {
            debug!(voice = id.0, error = %e, "stop failed, treating as stopped");
        }
    }

    fn take_voice(&mut self, id: VoiceId) -> Option<(Note, ActiveVoice)> {
        let note = self
            .active
            .iter()
            .find_map(|(note, voices)| voices.iter().any(|v| v.id == id).then_some(*note))?;
        let voices = self.active.get_mut(&note)?;
        let index = voices.iter().position(|v| v.id == id)?;
        let voice = voices.remove(index);
        if voices.is_empty() {
            self.active.remove(&note);
        }
        Some((note, voice))
    }
}
