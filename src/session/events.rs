use serde::Serialize;
use std::fmt;

use crate::audio::FrequencySample;
use crate::error::VoiceError;
use crate::pipeline::WordTiming;
use crate::playback::AudioRef;

/// Orchestrator state; exactly one at a time
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionState {
    #[default]
    Idle,
    Playing,
    Recording,
    Processing,
    Ready,
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            SessionState::Idle => "idle",
            SessionState::Playing => "playing",
            SessionState::Recording => "recording",
            SessionState::Processing => "processing",
            SessionState::Ready => "ready",
        };
        f.write_str(name)
    }
}

/// Everything the UI layer can observe
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum VoiceEvent {
    StateChanged {
        state: SessionState,
    },
    FrequencyData {
        bins: FrequencySample,
    },
    PlaybackProgress {
        fraction: f64,
        current_time: f64,
        duration: f64,
    },
    RecordingDuration {
        seconds: u64,
    },
    Transcription {
        text: String,
    },
    Response {
        text: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        audio: Option<AudioRef>,
    },
    SpeechTimings {
        timings: Vec<WordTiming>,
    },
    Error {
        error: VoiceError,
    },
}

impl VoiceEvent {
    /// Event name as used by the SSE stream
    pub fn name(&self) -> &'static str {
        match self {
            VoiceEvent::StateChanged { .. } => "state_changed",
            VoiceEvent::FrequencyData { .. } => "frequency_data",
            VoiceEvent::PlaybackProgress { .. } => "playback_progress",
            VoiceEvent::RecordingDuration { .. } => "recording_duration",
            VoiceEvent::Transcription { .. } => "transcription",
            VoiceEvent::Response { .. } => "response",
            VoiceEvent::SpeechTimings { .. } => "speech_timings",
            VoiceEvent::Error { .. } => "error",
        }
    }

    /// High-rate visualization events
    pub fn is_frequency(&self) -> bool {
        matches!(self, VoiceEvent::FrequencyData { .. })
    }
}
