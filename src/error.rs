pub type Result<T> = std::result::Result<T, RadioError>;

#[derive(Debug, thiserror::Error)]
pub enum RadioError {
    #[error("station index {index} out of range (have {len} stations)")]
    InvalidIndex { index: usize, len: usize },

    #[error("station {index} failed to play: {reason}")]
    PlaybackFailure { index: usize, reason: String },

    #[error("configuration error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON parsing failed: {0}")]
    Json(#[from] serde_json::Error),
}

impl RadioError {
    pub fn playback(index: usize, reason: impl Into<String>) -> Self {
        RadioError::PlaybackFailure {
            index,
            reason: reason.into(),
        }
    }
}
