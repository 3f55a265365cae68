use std::path::{Path, PathBuf};

use tracing::debug;

use crate::audio::{SampleBuffer, SampleId};
use crate::error::Result;

/// Where a sound comes from. Either way it ends up as a decoded buffer.
#[derive(Clone, Debug, PartialEq)]
pub enum SampleSource {
    Bytes(Vec<u8>),
    Path(PathBuf),
}

impl From<PathBuf> for SampleSource {
    fn from(path: PathBuf) -> Self {
        SampleSource::Path(path)
    }
}

/// Decodes `source` at the output rate and hands out a fresh id for it.
/// Registration with the engine is the caller's job.
pub fn load(source: &SampleSource, target_rate: u32) -> Result<(SampleId, SampleBuffer)> {
    let buffer = match source {
        SampleSource::Bytes(bytes) => SampleBuffer::from_bytes(bytes, target_rate)?,
        SampleSource::Path(path) => SampleBuffer::load_wav(path, target_rate)?,
    };
    let id = SampleId::next();
    debug!(%id, frames = buffer.frames(), "sample decoded");
    Ok((id, buffer))
}

/// `.wav` files directly inside `dir`, sorted by name.
pub fn index_wav_in_dir(dir: &Path) -> Result<Vec<PathBuf>> {
    let mut paths: Vec<PathBuf> = std::fs::read_dir(dir)?
        .filter_map(|entry| entry.ok().map(|e| e.path()))
        .filter(|p| p.is_file())
        .filter(|p| p.extension().is_some_and(|ext| ext.eq_ignore_ascii_case("wav")))
        .collect();
    paths.sort();
    Ok(paths)
}
