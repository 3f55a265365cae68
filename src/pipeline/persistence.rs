// Session save/load. Called on startup and on quit.
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use super::pattern::PatternRecord;
use crate::error::Result;
use crate::samples::TrimRegion;
use crate::shared::DEFAULT_BPM;

pub const STATE_DIR: &str = ".padseq";
const SESSION_FILE: &str = "session.json";

/// A sound assigned to a pad, by file.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SampleRecord {
    pub note: u8,
    pub path: PathBuf,
    #[serde(default)]
    pub trim: TrimRegion,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SessionRecord {
    #[serde(default)]
    pub patterns: Vec<PatternRecord>,
    #[serde(default)]
    pub current: Option<String>,
    #[serde(default = "default_bpm")]
    pub bpm: f64,
    #[serde(default)]
    pub samples: Vec<SampleRecord>,
}

impl Default for SessionRecord {
    fn default() -> Self {
        Self { patterns: Vec::new(), current: None, bpm: DEFAULT_BPM, samples: Vec::new() }
    }
}

fn default_bpm() -> f64 {
    DEFAULT_BPM
}

pub fn state_dir(project_dir: &Path) -> PathBuf {
    project_dir.join(STATE_DIR)
}

// <project_dir>/.padseq/session.json
pub fn session_file_path(project_dir: &Path) -> PathBuf {
    state_dir(project_dir).join(SESSION_FILE)
}

/// `Ok(None)` when nothing was saved yet. A file that exists but doesn't
/// parse is an error so the caller can decide whether to overwrite it.
pub fn load_session(project_dir: &Path) -> Result<Option<SessionRecord>> {
    let path = session_file_path(project_dir);
    let data = match std::fs::read_to_string(&path) {
        Ok(data) => data,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
        Err(e) => return Err(e.into()),
    };
    let record: SessionRecord = serde_json::from_str(&data)?;
    info!(path = %path.display(), patterns = record.patterns.len(), "session loaded");
    Ok(Some(record))
}

/// Writes the session, creating `.padseq/` if needed. Goes through a temp
/// file so a crash mid-write can't leave half a session behind.
pub fn save_session(project_dir: &Path, record: &SessionRecord) -> Result<()> {
    let path = session_file_path(project_dir);
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let json = serde_json::to_string_pretty(record)?;
    let tmp = path.with_extension("json.tmp");
    std::fs::write(&tmp, json)?;
    if let Err(e) = std::fs::rename(&tmp, &path) {
        warn!(error = %e, "atomic rename failed, writing in place");
        std::fs::write(&path, serde_json::to_string_pretty(record)?)?;
        let _ = std::fs::remove_file(&tmp);
    }
    info!(path = %path.display(), "session saved");
    Ok(())
}
