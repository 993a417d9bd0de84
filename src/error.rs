//! Error types for the voice loop

use thiserror::Error;

use crate::voice::DeviceKind;

/// Result type alias for voxloop operations
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur while running the assistant loop
#[derive(Debug, Error)]
pub enum Error {
    /// Configuration error
    #[error("configuration error: {0}")]
    Config(String),

    /// Generic audio backend error
    #[error("audio error: {0}")]
    Audio(String),

    /// No candidate device could be opened
    #[error("no {kind} device available (tried: {})", tried.join(", "))]
    DeviceUnavailable {
        /// Capture or playback
        kind: DeviceKind,
        /// Human-readable description of every candidate tried
        tried: Vec<String>,
    },

    /// Capture device failed mid-session
    #[error("capture lost: {0}")]
    CaptureLost(String),

    /// Playback device failed mid-session
    #[error("playback lost: {0}")]
    PlaybackLost(String),

    /// Speech-to-text failure
    #[error("transcription error: {0}")]
    Transcription(String),

    /// Language model failure
    #[error("generation error: {0}")]
    Generation(String),

    /// Requested TTS voice is not installed
    #[error("voice unavailable: {voice}")]
    VoiceUnavailable {
        /// Voice identifier that was requested
        voice: String,
    },

    /// Text-to-speech failure other than a missing voice
    #[error("synthesis error: {0}")]
    Synthesis(String),

    /// A pipeline stage exceeded its deadline
    #[error("{stage} timed out")]
    Timeout {
        /// Name of the stage that timed out
        stage: &'static str,
    },

    /// The speech queue was closed
    #[error("speech queue closed")]
    QueueClosed,

    /// The session is shutting down mid-turn
    #[error("turn interrupted")]
    Interrupted,

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
    /// Hardware faults recovered by re-resolving the device
    #[must_use]
    pub const fn is_device_fault(&self) -> bool {
        matches!(self, Self::CaptureLost(_) | Self::PlaybackLost(_))
    }

    /// Failures of an external inference collaborator; the turn is abandoned
    #[must_use]
    pub const fn is_inference_fault(&self) -> bool {
        matches!(
            self,
            Self::Transcription(_)
                | Self::Generation(_)
                | Self::Synthesis(_)
                | Self::VoiceUnavailable { .. }
                | Self::Timeout { .. }
                | Self::Http(_)
                | Self::Serialization(_)
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_device_unavailable_lists_candidates() {
        let err = Error::DeviceUnavailable {
            kind: DeviceKind::Capture,
            tried: vec!["usb-mic@16000Hz/1ch".to_string(), "default@48000Hz/2ch".to_string()],
        };
        let msg = err.to_string();
        assert!(msg.contains("capture"));
        assert!(msg.contains("usb-mic@16000Hz/1ch, default@48000Hz/2ch"));
    }

    #[test]
    fn test_fault_classification() {
        assert!(Error::CaptureLost("gone".into()).is_device_fault());
        assert!(Error::PlaybackLost("gone".into()).is_device_fault());
        assert!(!Error::Generation("boom".into()).is_device_fault());

        assert!(Error::Transcription("bad".into()).is_inference_fault());
        assert!(Error::Timeout { stage: "generation" }.is_inference_fault());
        assert!(!Error::QueueClosed.is_inference_fault());
        assert!(!Error::Interrupted.is_inference_fault());
    }
}
