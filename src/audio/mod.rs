use std::sync::atomic::Ordering;

use crossbeam_channel::{Receiver, Sender, TrySendError};
use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use tracing::{error, info};

use crate::audio_api::{AudioCommand, VoiceId, VoiceSpec};
use crate::clock::FrameClock;
use crate::error::{Error, Result, TriggerError};
use crate::trigger::VoiceOutput;

mod engine;
mod frame;
mod sample_buffer;
mod sample_id;
mod voice;

pub use frame::StereoFrame;
pub use sample_buffer::SampleBuffer;
pub use sample_id::SampleId;

#[cfg(test)]
pub(crate) use sample_buffer::wav_bytes;

use engine::Engine;

const COMMAND_QUEUE: usize = 1024;
const ENDED_QUEUE: usize = 256;

/// The running output stream plus the channels into and out of its callback.
pub struct AudioHandle {
    tx: Sender<AudioCommand>,
    ended_rx: Receiver<VoiceId>,
    clock: FrameClock,
    _output_stream: cpal::Stream,
}

impl AudioHandle {
    pub fn send(&self, cmd: AudioCommand) -> std::result::Result<(), TriggerError> {
        self.tx.try_send(cmd).map_err(|e| match e {
            TrySendError::Full(_) => TriggerError::QueueFull,
            TrySendError::Disconnected(_) => TriggerError::Disconnected,
        })
    }

    pub fn register_sample(&self, id: SampleId, buffer: SampleBuffer) -> std::result::Result<(), TriggerError> {
        self.send(AudioCommand::RegisterSample { id, buffer })
    }

    pub fn unregister_sample(&self, id: SampleId) -> std::result::Result<(), TriggerError> {
        self.send(AudioCommand::UnregisterSample(id))
    }

    /// The clock driven by this stream's frame counter.
    pub fn clock(&self) -> FrameClock {
        self.clock.clone()
    }

    pub fn sample_rate(&self) -> u32 {
        self.clock.sample_rate() as u32
    }
}

impl VoiceOutput for AudioHandle {
    fn start(&mut self, voice: &VoiceSpec) -> std::result::Result<(), TriggerError> {
        self.send(AudioCommand::Start(voice.clone()))
    }

    fn stop(&mut self, voice: VoiceId, at: f64, time_constant: f64, hard_after: f64) -> std::result::Result<(), TriggerError> {
        self.send(AudioCommand::Stop { voice, at, time_constant, hard_after })
    }

    fn cancel(&mut self, voice: VoiceId) -> std::result::Result<(), TriggerError> {
        self.send(AudioCommand::Cancel(voice))
    }

    fn poll_ended(&mut self) -> Vec<VoiceId> {
        self.ended_rx.try_iter().collect()
    }
}

pub fn start_audio() -> Result<AudioHandle> {
    let host = cpal::default_host();
    let device = host
        .default_output_device()
        .ok_or_else(|| Error::AudioUnavailable("no default output device".into()))?;
    let config = device
        .default_output_config()
        .map_err(|e| Error::AudioUnavailable(format!("no default output config: {e}")))?;

    if config.sample_format() != cpal::SampleFormat::F32 {
        return Err(Error::AudioUnavailable(format!(
            "unsupported sample format {:?} (only f32)",
            config.sample_format()
        )));
    }

    let sample_rate = config.sample_rate();
    let channels = config.channels() as usize;
    let clock = FrameClock::new(sample_rate);

    let (tx, rx) = crossbeam_channel::bounded::<AudioCommand>(COMMAND_QUEUE);
    let (ended_tx, ended_rx) = crossbeam_channel::bounded::<VoiceId>(ENDED_QUEUE);

    let engine = Engine::new(sample_rate, clock.frames(), ended_tx);
    let stream = build_output_stream_f32(&device, &config.into(), rx, engine, channels, &clock)?;
    stream
        .play()
        .map_err(|e| Error::AudioUnavailable(format!("failed to play output stream: {e}")))?;

    info!(sample_rate, channels, "audio output started");
    Ok(AudioHandle { tx, ended_rx, clock, _output_stream: stream })
}

fn build_output_stream_f32(
    device: &cpal::Device,
    config: &cpal::StreamConfig,
    rx: Receiver<AudioCommand>,
    mut engine: Engine,
    channels: usize,
    clock: &FrameClock,
) -> Result<cpal::Stream> {
    let alive = clock.alive_flag();
    let err_fn = move |err| {
        error!("audio output stream error: {err}");
        alive.store(false, Ordering::Release);
    };

    // Stereo scratch reused across callbacks; only grows if the host hands
    // us a bigger block than any before.
    let mut scratch: Vec<StereoFrame> = Vec::with_capacity(4096);

    let stream = device
        .build_output_stream(
            config,
            move |data: &mut [f32], _info| {
                while let Ok(cmd) = rx.try_recv() {
                    engine.handle_cmd(cmd);
                }

                let n_frames = data.len() / channels.max(1);
                scratch.resize(n_frames, StereoFrame::zero());
                engine.render_block(&mut scratch);
                interleave(&scratch, data, channels);
            },
            err_fn,
            None,
        )
        .map_err(|e| Error::AudioUnavailable(format!("failed to build output stream: {e}")))?;

    Ok(stream)
}

// Writes stereo frames into an interleaved buffer of any channel count.
// Mono devices get the average, extra channels are silent.
fn interleave(frames: &[StereoFrame], out: &mut [f32], channels: usize) {
    match channels {
        0 => {}
        1 => {
            for (o, f) in out.iter_mut().zip(frames) {
                *o = 0.5 * (f.left + f.right);
            }
        }
        _ => {
            for (chunk, f) in out.chunks_exact_mut(channels).zip(frames) {
                chunk[0] = f.left;
                chunk[1] = f.right;
                chunk[2..].fill(0.0);
            }
        }
    }
}
