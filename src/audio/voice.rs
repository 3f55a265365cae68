use super::frame::StereoFrame;
use super::sample_buffer::SampleBuffer;
use super::sample_id::SampleId;
use crate::audio_api::VoiceId;

// Exponential stop fade. `level` is multiplied by `decay` every frame from
// `at` on, and the voice is cut at `hard_at`.
#[derive(Clone, Copy, Debug)]
struct StopFade {
    at: u64,
    hard_at: u64,
    decay: f32,
    level: f32,
}

/// One playing instance of a sample, positioned in absolute output frames.
#[derive(Clone, Debug)]
pub struct Voice {
    pub id: VoiceId,
    pub sample_id: SampleId,
    start_frame: u64,
    trim_start: usize,
    length: usize,
    gain: f32,
    fade_in: usize,
    fade_out: usize,
    stop: Option<StopFade>,
    pos: usize, // frames already played
    pub finished: bool,
}

impl Voice {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        id: VoiceId,
        sample_id: SampleId,
        start_frame: u64,
        trim_start: usize,
        length: usize,
        gain: f32,
        fade_in: usize,
        fade_out: usize,
    ) -> Self {
        Self {
            id,
            sample_id,
            start_frame,
            trim_start,
            length,
            gain,
            fade_in,
            fade_out,
            stop: None,
            pos: 0,
            finished: length == 0,
        }
    }

    pub fn has_started(&self) -> bool {
        self.pos > 0
    }

    /// Begin an exponential fade at frame `at`. A voice that hasn't made a
    /// sound by then is simply dropped.
    pub fn stop(&mut self, at: u64, time_constant_frames: f32, hard_after_frames: u64) {
        if !self.has_started() && at <= self.start_frame {
            self.finished = true;
            return;
        }
        let decay = if time_constant_frames > 0.0 { (-1.0 / time_constant_frames).exp() } else { 0.0 };
        let at = at.max(self.start_frame);
        self.stop = Some(StopFade { at, hard_at: at + hard_after_frames, decay, level: 1.0 });
    }

    fn envelope(&self, pos: usize, length: usize) -> f32 {
        let mut env = 1.0f32;
        if self.fade_in > 0 && pos < self.fade_in {
            env = env.min(pos as f32 / self.fade_in as f32);
        }
        if self.fade_out > 0 {
            let remaining = length - pos;
            if remaining <= self.fade_out {
                env = env.min(remaining as f32 / self.fade_out as f32);
            }
        }
        env
    }

    /// Mixes this voice into `out`, whose first frame is absolute frame `block_start`.
    pub fn render_into(&mut self, buffer: &SampleBuffer, out: &mut [StereoFrame], block_start: u64) {
        if self.finished {
            return;
        }
        let available = buffer.data.len().saturating_sub(self.trim_start);
        let length = self.length.min(available);
        if length == 0 {
            self.finished = true;
            return;
        }

        for (i, frame) in out.iter_mut().enumerate() {
            let abs = block_start + i as u64;
            if abs < self.start_frame {
                continue; // scheduled later in (or after) this block
            }

            let mut level = 1.0;
            if let Some(stop) = self.stop.as_mut() {
                if abs >= stop.hard_at {
                    self.finished = true;
                    break;
                }
                if abs >= stop.at {
                    stop.level *= stop.decay;
                }
                level = stop.level;
            }

            if self.pos >= length {
                self.finished = true;
                break;
            }

            let sample = buffer.data[self.trim_start + self.pos];
            frame.mix(sample, self.gain * self.envelope(self.pos, length) * level);
            self.pos += 1;
        }

        if self.pos >= length {
            self.finished = true;
        }
    }
}
