//! Typed error taxonomy for voice turns
//!
//! Every failure is caught where it happens (capture session, playback
//! session, pipeline stage) and converted into one of these variants before it
//! reaches the UI layer. None of them is fatal to the orchestrator.

use serde::ser::{Serialize, SerializeStruct, Serializer};
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum VoiceError {
    #[error("microphone permission denied: {0}")]
    PermissionDenied(String),

    #[error("audio hardware unavailable: {0}")]
    HardwareUnavailable(String),

    /// Recording too short, too small, or otherwise unusable
    #[error("invalid recording: {0}")]
    InvalidRecording(String),

    #[error("transcription failed: {0}")]
    TranscriptionFailure(String),

    #[error("response failed: {0}")]
    ResponseFailure(String),

    #[error("speech synthesis failed: {0}")]
    SynthesisFailure(String),

    #[error("playback failed: {0}")]
    PlaybackDecodeFailure(String),

    #[error("unsupported audio format: {0}")]
    UnsupportedAudioFormat(String),
}

impl VoiceError {
    /// Stable machine-readable name, used on the wire
    pub fn kind(&self) -> &'static str {
        match self {
            VoiceError::PermissionDenied(_) => "permission_denied",
            VoiceError::HardwareUnavailable(_) => "hardware_unavailable",
            VoiceError::InvalidRecording(_) => "invalid_recording",
            VoiceError::TranscriptionFailure(_) => "transcription_failure",
            VoiceError::ResponseFailure(_) => "response_failure",
            VoiceError::SynthesisFailure(_) => "synthesis_failure",
            VoiceError::PlaybackDecodeFailure(_) => "playback_decode_failure",
            VoiceError::UnsupportedAudioFormat(_) => "unsupported_audio_format",
        }
    }

    /// Message without the category prefix
    pub fn message(&self) -> &str {
        match self {
            VoiceError::PermissionDenied(m)
            | VoiceError::HardwareUnavailable(m)
            | VoiceError::InvalidRecording(m)
            | VoiceError::TranscriptionFailure(m)
            | VoiceError::ResponseFailure(m)
            | VoiceError::SynthesisFailure(m)
            | VoiceError::PlaybackDecodeFailure(m)
            | VoiceError::UnsupportedAudioFormat(m) => m,
        }
    }
}

impl Serialize for VoiceError {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut state = serializer.serialize_struct("VoiceError", 2)?;
        state.serialize_field("kind", self.kind())?;
        state.serialize_field("message", self.message())?;
        state.end()
    }
}
