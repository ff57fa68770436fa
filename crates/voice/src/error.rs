use thiserror::Error;

#[derive(Debug, Error)]
pub enum VoiceError {
    #[error("speech capture failed: {0}")]
    Capture(String),

    #[error("playback failed: {0}")]
    Playback(String),

    #[error("frame capture failed: {0}")]
    Frame(String),

    #[error("voice orchestrator is not running")]
    Stopped,
}

pub type VoiceResult<T> = Result<T, VoiceError>;
