use std::io::{Cursor, Read};
use std::path::Path;

use super::frame::StereoFrame;
use crate::error::{Error, Result};

/// Decoded, resampled audio ready for the render thread.
#[derive(Clone, Debug, Default)]
pub struct SampleBuffer {
    pub data: Vec<StereoFrame>,
}

impl SampleBuffer {
    pub fn frames(&self) -> usize {
        self.data.len()
    }

    pub fn duration(&self, sample_rate: u32) -> f64 {
        if sample_rate == 0 {
            return 0.0;
        }
        self.data.len() as f64 / sample_rate as f64
    }

    pub fn load_wav(path: &Path, target_rate: u32) -> Result<Self> {
        let reader = hound::WavReader::open(path)?;
        Self::decode(reader, target_rate)
    }

    /// Decodes WAV bytes held in memory (e.g. a file the user dropped in).
    pub fn from_bytes(bytes: &[u8], target_rate: u32) -> Result<Self> {
        let reader = hound::WavReader::new(Cursor::new(bytes))?;
        Self::decode(reader, target_rate)
    }

    fn decode<R: Read>(mut reader: hound::WavReader<R>, target_rate: u32) -> Result<Self> {
        let spec = reader.spec();
        let channels = spec.channels as usize;
        if channels == 0 {
            return Err(Error::UnsupportedFormat("wav file declares zero channels".into()));
        }

        let samples: Vec<f32> = match spec.sample_format {
            hound::SampleFormat::Float => reader.samples::<f32>().collect::<std::result::Result<_, _>>()?,
            hound::SampleFormat::Int => {
                if spec.bits_per_sample == 0 || spec.bits_per_sample > 32 {
                    return Err(Error::UnsupportedFormat(format!(
                        "{} bits per sample",
                        spec.bits_per_sample
                    )));
                }
                let max = (1i64 << (spec.bits_per_sample - 1)) as f32;
                reader
                    .samples::<i32>()
                    .map(|s| s.map(|x| x as f32 / max))
                    .collect::<std::result::Result<_, _>>()?
            }
        };

        // Mono is duplicated, anything past two channels is dropped.
        let frames: Vec<StereoFrame> = samples
            .chunks_exact(channels)
            .map(|c| match c {
                [m] => StereoFrame::mono(*m),
                [l, r, ..] => StereoFrame { left: *l, right: *r },
                [] => StereoFrame::zero(),
            })
            .collect();

        Ok(Self { data: resample_linear(&frames, spec.sample_rate, target_rate) })
    }
}

fn resample_linear(frames: &[StereoFrame], source_rate: u32, target_rate: u32) -> Vec<StereoFrame> {
    if source_rate == target_rate || source_rate == 0 || target_rate == 0 {
        return frames.to_vec();
    }
    let ratio = target_rate as f64 / source_rate as f64;
    let out_len = (frames.len() as f64 * ratio).ceil() as usize;
    let last = frames.last().copied().unwrap_or_default();

    (0..out_len)
        .map(|i| {
            let src = i as f64 / ratio;
            let idx = src.floor() as usize;
            if idx + 1 >= frames.len() {
                return last;
            }
            let frac = (src - idx as f64) as f32;
            let (a, b) = (frames[idx], frames[idx + 1]);
            StereoFrame {
                left: a.left + (b.left - a.left) * frac,
                right: a.right + (b.right - a.right) * frac,
            }
        })
        .collect()
}

#[cfg(test)]
pub(crate) fn wav_bytes(sample_rate: u32, channels: u16, samples: &[i16]) -> Vec<u8> {
    let spec = hound::WavSpec {
        channels,
        sample_rate,
        bits_per_sample: 16,
        sample_format: hound::SampleFormat::Int,
    };
    let mut cursor = Cursor::new(Vec::new());
    {
        let mut writer = hound::WavWriter::new(&mut cursor, spec).unwrap();
        for s in samples {
            writer.write_sample(*s).unwrap();
        }
        writer.finalize().unwrap();
    }
    cursor.into_inner()
}
