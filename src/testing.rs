// Fakes shared by the unit tests.

use std::collections::HashSet;

use crate::audio_api::{VoiceId, VoiceSpec};
use crate::error::TriggerError;
use crate::shared::Note;
use crate::trigger::VoiceOutput;

/// Remembers every call; tests push into `ended` to simulate completions.
#[derive(Debug, Default)]
pub struct RecordingOutput {
    pub started: Vec<VoiceSpec>,
    pub stopped: Vec<(VoiceId, f64)>,
    pub cancelled: Vec<VoiceId>,
    pub ended: Vec<VoiceId>,
    pub fail_notes: HashSet<Note>,
    pub fail_stop: bool,
}

impl VoiceOutput for RecordingOutput {
    fn start(&mut self, voice: &VoiceSpec) -> Result<(), TriggerError> {
        if self.fail_notes.contains(&voice.note) {
            return Err(TriggerError::QueueFull);
        }
        self.started.push(voice.clone());
        Ok(())
    }

    fn stop(&mut self, voice: VoiceId, at: f64, _tc: f64, _hard_after: f64) -> Result<(), TriggerError> {
        if self.fail_stop {
            return Err(TriggerError::Disconnected);
        }
        self.stopped.push((voice, at));
        Ok(())
    }

    fn cancel(&mut self, voice: VoiceId) -> Result<(), TriggerError> {
        self.cancelled.push(voice);
        Ok(())
    }

    fn poll_ended(&mut self) -> Vec<VoiceId> {
        std::mem::take(&mut self.ended)
    }
}
