//! Error types for the dialogue loop

use thiserror::Error;

/// Result type alias for dialogue operations
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur while running the dialogue loop
#[derive(Debug, Error)]
pub enum Error {
    /// Configuration error
    #[error("configuration error: {0}")]
    Config(String),

    /// Audio device setup error
    #[error("audio error: {0}")]
    Audio(String),

    /// Microphone unavailable or interrupted while listening
    #[error("capture failed: {0}")]
    Capture(String),

    /// Speech-to-text service error
    #[error("transcription failed: {0}")]
    Transcription(String),

    /// Language model error, including a stream that broke off mid-response
    #[error("generation failed: {0}")]
    Generation(String),

    /// Text-to-speech service or decode error
    #[error("synthesis failed: {0}")]
    Synthesis(String),

    /// Output device error while playing a buffer
    #[error("playback failed: {0}")]
    Playback(String),

    /// Shutdown was requested while work was in flight
    #[error("cancelled")]
    Cancelled,

    /// IO error
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// HTTP error
    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),

    /// Serialization error
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// TOML parsing error
    #[error("toml error: {0}")]
    Toml(#[from] toml::de::Error),
}

impl Error {
    /// Short label for the turn phase this error belongs to, used in logs
    #[must_use]
    pub const fn kind(&self) -> &'static str {
        match self {
            Self::Config(_) => "config",
            Self::Audio(_) | Self::Capture(_) => "capture",
            Self::Transcription(_) => "transcription",
            Self::Generation(_) => "generation",
            Self::Synthesis(_) => "synthesis",
            Self::Playback(_) => "playback",
            Self::Cancelled => "cancelled",
            Self::Io(_) => "io",
            Self::Http(_) => "http",
            Self::Serialization(_) | Self::Toml(_) => "serialization",
        }
    }

    /// Whether this error means the loop should stop rather than retry
    ///
    /// Only cancellation ends the loop; every other failure aborts the
    /// current turn and the controller goes back to listening.
    #[must_use]
    pub const fn is_shutdown(&self) -> bool {
        matches!(self, Self::Cancelled)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_only_cancellation_stops_the_loop() {
        assert!(Error::Cancelled.is_shutdown());
        assert!(!Error::Generation("boom".to_string()).is_shutdown());
        assert!(!Error::Capture("unplugged".to_string()).is_shutdown());
    }

    #[test]
    fn test_kind_labels() {
        assert_eq!(Error::Synthesis(String::new()).kind(), "synthesis");
        assert_eq!(Error::Audio(String::new()).kind(), "capture");
    }
}
