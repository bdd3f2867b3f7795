use thiserror::Error;

/// Result type for media operations
pub type Result<T> = std::result::Result<T, Error>;

/// Error types for media operations
#[derive(Debug, Error)]
pub enum Error {
    /// RTP stream or transport error
    #[error("RTP error: {0}")]
    Rtp(#[from] sippin_rtp_core::Error),

    /// Malformed session description
    #[error("SDP parse error at line {line}: {reason}")]
    SdpParse { line: usize, reason: String },

    /// Audio device could not be opened
    #[error("Audio device error: {0}")]
    AudioDevice(String),

    /// Media kind this agent cannot run
    #[error("Unsupported media: {0}")]
    UnsupportedMedia(String),

    /// Invalid state
    #[error("Invalid state: {0}")]
    InvalidState(String),
}

impl Error {
    pub(crate) fn sdp(line: usize, reason: impl Into<String>) -> Self {
        Error::SdpParse { line, reason: reason.into() }
    }
}
