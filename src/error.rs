use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Error)]
pub enum Error {
    #[error("audio output unavailable: {0}")]
    AudioUnavailable(String),

    #[error("midi: {0}")]
    Midi(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("wav error: {0}")]
    Wav(#[from] hound::Error),

    #[error("unsupported sample format: {0}")]
    UnsupportedFormat(String),
}

/// Raised by the precision clock when its time source can't be used.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ClockError {
    #[error("audio clock unavailable")]
    Unavailable,
}

/// Per-voice playback failures. These never abort a batch.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum TriggerError {
    #[error("audio command queue is full")]
    QueueFull,
    #[error("audio engine is gone")]
    Disconnected,
}
