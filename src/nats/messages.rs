use serde::{Deserialize, Serialize};

use crate::pipeline::{HistoryEntry, WordTiming};

/// Request published to `{prefix}.transcribe`
#[derive(Debug, Serialize, Deserialize)]
pub struct TranscribeRequest {
    pub session_id: String,
    pub device_id: String,
    pub audio: String, // Base64-encoded payload
    pub mime_type: String,
    pub duration_secs: f64,
    pub timestamp: String, // RFC3339 timestamp
}

#[derive(Debug, Default, Serialize, Deserialize)]
pub struct TranscribeReply {
    #[serde(default)]
    pub text: Option<String>,
    #[serde(default)]
    pub error: Option<String>,
}

/// Request published to `{prefix}.converse`
#[derive(Debug, Serialize, Deserialize)]
pub struct ConverseRequest {
    pub session_id: String,
    pub device_id: String,
    pub agent: String,
    pub prompt: String,
    pub history: Vec<HistoryEntry>,
    pub timestamp: String,
}

#[derive(Debug, Default, Serialize, Deserialize)]
pub struct ConverseReply {
    #[serde(default)]
    pub text: Option<String>,
    #[serde(default)]
    pub audio_url: Option<String>,
    #[serde(default)]
    pub audio: Option<String>, // Base64-encoded speech
    #[serde(default)]
    pub error: Option<String>,
}

/// Request published to `{prefix}.synthesize`
#[derive(Debug, Serialize, Deserialize)]
pub struct SynthesizeRequest {
    pub text: String,
    pub voice: String,
    pub speed: f32,
}

#[derive(Debug, Default, Serialize, Deserialize)]
pub struct SynthesizeReply {
    #[serde(default)]
    pub audio_url: Option<String>,
    #[serde(default)]
    pub audio: Option<String>,
    #[serde(default)]
    pub word_timings: Option<Vec<WordTiming>>,
    #[serde(default)]
    pub error: Option<String>,
}
