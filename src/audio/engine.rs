use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use crossbeam_channel::Sender;

use super::frame::StereoFrame;
use super::sample_buffer::SampleBuffer;
use super::sample_id::SampleId;
use super::voice::Voice;
use crate::audio_api::{AudioCommand, VoiceId, VoiceSpec};

pub(crate) const MAX_VOICES: usize = 64; // preallocated, the callback never grows the pool

// A cancelled voice that is already sounding gets this short ramp instead of a click.
const CANCEL_FADE_FRAMES: f32 = 32.0;
const CANCEL_HARD_FRAMES: u64 = 256;

/// Lives inside the output callback. Mixes voices against an absolute frame
/// counter so that scheduled start times land on exact frames.
pub struct Engine {
    sample_rate: f64,
    samples: HashMap<SampleId, SampleBuffer>,
    voices: Vec<Voice>,
    frame: u64,
    frames_out: Arc<AtomicU64>,
    ended_tx: Sender<VoiceId>,
}

impl Engine {
    pub fn new(sample_rate: u32, frames_out: Arc<AtomicU64>, ended_tx: Sender<VoiceId>) -> Self {
        Self {
            sample_rate: sample_rate as f64,
            samples: HashMap::new(),
            voices: Vec::with_capacity(MAX_VOICES),
            frame: frames_out.load(Ordering::Acquire),
            frames_out,
            ended_tx,
        }
    }

    fn to_frames(&self, seconds: f64) -> u64 {
        (seconds.max(0.0) * self.sample_rate).round() as u64
    }

    pub fn voice_count(&self) -> usize {
        self.voices.len()
    }

    pub fn handle_cmd(&mut self, cmd: AudioCommand) {
        match cmd {
            AudioCommand::RegisterSample { id, buffer } => {
                self.samples.insert(id, buffer);
            }
            AudioCommand::UnregisterSample(id) => {
                self.samples.remove(&id);
                for v in self.voices.iter_mut().filter(|v| v.sample_id == id) {
                    v.finished = true;
                }
            }
            AudioCommand::Start(spec) => self.start_voice(&spec),
            AudioCommand::Stop { voice, at, time_constant, hard_after } => {
                let at = self.to_frames(at);
                let tc = (time_constant * self.sample_rate) as f32;
                let hard = self.to_frames(hard_after);
                if let Some(v) = self.voices.iter_mut().find(|v| v.id == voice) {
                    v.stop(at, tc, hard);
                }
            }
            AudioCommand::Cancel(voice) => {
                let now = self.frame;
                if let Some(v) = self.voices.iter_mut().find(|v| v.id == voice) {
                    v.stop(now, CANCEL_FADE_FRAMES, CANCEL_HARD_FRAMES);
                }
            }
        }
    }

    fn start_voice(&mut self, spec: &VoiceSpec) {
        if !self.samples.contains_key(&spec.sample_id) {
            // unknown buffer: report it ended so the caller doesn't wait on it
            let _ = self.ended_tx.try_send(spec.voice);
            return;
        }
        if self.voices.len() >= MAX_VOICES {
            // steal the oldest
            let stolen = self.voices.remove(0);
            let _ = self.ended_tx.try_send(stolen.id);
        }
        let fade_out = spec.fade_out.map(|f| self.to_frames(f) as usize).unwrap_or(0);
        self.voices.push(Voice::new(
            spec.voice,
            spec.sample_id,
            self.to_frames(spec.start),
            self.to_frames(spec.offset) as usize,
            self.to_frames(spec.duration) as usize,
            spec.gain,
            self.to_frames(spec.fade_in) as usize,
            fade_out,
        ));
    }

    /// Fills `out` starting at the current frame, then advances the clock.
    pub fn render_block(&mut self, out: &mut [StereoFrame]) {
        out.fill(StereoFrame::zero());

        for voice in self.voices.iter_mut() {
            match self.samples.get(&voice.sample_id) {
                Some(buffer) => voice.render_into(buffer, out, self.frame),
                None => voice.finished = true,
            }
        }

        let ended_tx = &self.ended_tx;
        self.voices.retain(|v| {
            if v.finished {
                let _ = ended_tx.try_send(v.id);
            }
            !v.finished
        });

        self.frame += out.len() as u64;
        self.frames_out.store(self.frame, Ordering::Release);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::shared::Note;

    fn engine() -> (Engine, crossbeam_channel::Receiver<VoiceId>, Arc<AtomicU64>) {
        let frames = Arc::new(AtomicU64::new(0));
        let (tx, rx) = crossbeam_channel::unbounded();
        (Engine::new(1000, Arc::clone(&frames), tx), rx, frames)
    }

    fn spec(voice: u64, start: f64, duration: f64) -> VoiceSpec {
        VoiceSpec {
            voice: VoiceId(voice),
            note: Note(36),
            sample_id: SampleId(7),
            start,
            offset: 0.0,
            duration,
            gain: 1.0,
            fade_in: 0.0,
            fade_out: None,
        }
    }

    fn register(e: &mut Engine) {
        let buffer = SampleBuffer { data: vec![StereoFrame::mono(1.0); 1000] };
        e.handle_cmd(AudioCommand::RegisterSample { id: SampleId(7), buffer });
    }

    #[test]
    fn publishes_frame_position() {
        let (mut e, _rx, frames) = engine();
        let mut out = vec![StereoFrame::zero(); 64];
        e.render_block(&mut out);
        e.render_block(&mut out);
        assert_eq!(frames.load(Ordering::Acquire), 128);
    }

    #[test]
    fn voice_starts_on_its_frame_and_reports_the_end() {
        let (mut e, rx, _) = engine();
        register(&mut e);
        // 1 kHz: start at frame 10, play 20 frames
        e.handle_cmd(AudioCommand::Start(spec(1, 0.010, 0.020)));
        let mut out = vec![StereoFrame::zero(); 64];
        e.render_block(&mut out);
        assert_eq!(out[9].left, 0.0);
        assert_eq!(out[10].left, 1.0);
        assert_eq!(out[29].left, 1.0);
        assert_eq!(out[30].left, 0.0);
        assert_eq!(rx.try_recv(), Ok(VoiceId(1)));
        assert_eq!(e.voice_count(), 0);
    }

    #[test]
    fn cancel_before_start_is_silent() {
        let (mut e, rx, _) = engine();
        register(&mut e);
        e.handle_cmd(AudioCommand::Start(spec(1, 0.5, 0.1)));
        e.handle_cmd(AudioCommand::Cancel(VoiceId(1)));
        let mut out = vec![StereoFrame::zero(); 16];
        e.render_block(&mut out);
        assert!(out.iter().all(|f| f.left == 0.0));
        assert_eq!(rx.try_recv(), Ok(VoiceId(1)));
    }

    #[test]
    fn unknown_sample_ends_immediately() {
        let (mut e, rx, _) = engine();
        e.handle_cmd(AudioCommand::Start(spec(3, 0.0, 0.1)));
        assert_eq!(rx.try_recv(), Ok(VoiceId(3)));
        assert_eq!(e.voice_count(), 0);
    }

    #[test]
    fn full_pool_steals_the_oldest() {
        let (mut e, rx, _) = engine();
        register(&mut e);
        for i in 0..=MAX_VOICES as u64 {
            e.handle_cmd(AudioCommand::Start(spec(i, 0.0, 0.5)));
        }
        assert_eq!(e.voice_count(), MAX_VOICES);
        assert_eq!(rx.try_recv(), Ok(VoiceId(0)));
    }
}
