pub use crate::audio::{SampleBuffer, SampleId};
use crate::shared::Note;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct VoiceId(pub u64);

/// Everything the render engine needs to play one voice. Times are seconds
/// on the audio clock.
#[derive(Clone, Debug, PartialEq)]
pub struct VoiceSpec {
    pub voice: VoiceId,
    pub note: Note,
    pub sample_id: SampleId,
    pub start: f64,
    /// Where in the sample playback begins (trim start), seconds.
    pub offset: f64,
    /// How long the trimmed region plays, seconds.
    pub duration: f64,
    pub gain: f32,
    pub fade_in: f64,
    pub fade_out: Option<f64>,
}

impl VoiceSpec {
    pub fn end(&self) -> f64 {
        self.start + self.duration
    }
}

#[derive(Clone, Debug)]
pub enum AudioCommand {
    // The engine can't load files (it would block the audio thread), so a
    // decoded buffer is registered first and voices refer to it by id.
    RegisterSample { id: SampleId, buffer: SampleBuffer },
    UnregisterSample(SampleId),

    Start(VoiceSpec),

    // Exponential fade starting at `at`, silenced `hard_after` later.
    Stop { voice: VoiceId, at: f64, time_constant: f64, hard_after: f64 },

    // Drop a voice that hasn't started yet (or is still silent).
    Cancel(VoiceId),
}
