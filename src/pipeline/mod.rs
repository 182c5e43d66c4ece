//! Remote voice pipeline
//!
//! Three stages run per turn, strictly in sequence and never concurrently:
//! transcribe the recording, converse with the assistant, and synthesize the
//! reply when the assistant did not already supply audio.

pub mod http;

pub use http::{HttpPipelineConfig, HttpVoicePipeline};

use anyhow::Result;
use serde::{Deserialize, Serialize};

use crate::capture::RecordingResult;
use crate::playback::AudioRef;
use crate::session::{ConversationTurn, Role, SessionIdentity};

/// Word-level timing metadata returned by some synthesis services
///
/// Passed through to subscribers untouched.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WordTiming {
    pub word: String,
    pub start: f64,
    pub end: f64,
}

/// Synthesis voice parameters
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct VoiceParams {
    pub voice_id: String,
    pub speech_rate: f32,
}

impl Default for VoiceParams {
    fn default() -> Self {
        Self {
            voice_id: "nova".to_string(),
            speech_rate: 1.0,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Transcription {
    pub text: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Reply {
    pub text: String,
    /// Ready-made speech for the reply; synthesis is skipped when present
    pub audio: Option<AudioRef>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Speech {
    pub audio: AudioRef,
    pub word_timings: Option<Vec<WordTiming>>,
}

/// History entry as sent over the wire
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HistoryEntry {
    pub role: Role,
    pub content: String,
}

impl From<&ConversationTurn> for HistoryEntry {
    fn from(turn: &ConversationTurn) -> Self {
        Self {
            role: turn.role,
            content: turn.text.clone(),
        }
    }
}

pub fn history_entries(history: &[ConversationTurn]) -> Vec<HistoryEntry> {
    history.iter().map(HistoryEntry::from).collect()
}

/// Remote transcription, response and synthesis services
#[async_trait::async_trait]
pub trait VoicePipeline: Send + Sync {
    async fn transcribe(
        &self,
        recording: &RecordingResult,
        identity: &SessionIdentity,
    ) -> Result<Transcription>;

    /// `history` already contains the user turn for `text`
    async fn converse(
        &self,
        text: &str,
        history: &[ConversationTurn],
        identity: &SessionIdentity,
    ) -> Result<Reply>;

    async fn synthesize(&self, text: &str, voice: &VoiceParams) -> Result<Speech>;

    /// Get transport name for logging
    fn name(&self) -> &str;
}

/// Build an audio reference from the optional url/base64 fields of a response
///
/// A hosted URL wins over inline audio. Blank fields count as absent.
pub fn audio_ref_from_parts(url: Option<String>, base64: Option<String>) -> Option<AudioRef> {
    let url = url.filter(|u| !u.trim().is_empty());
    let base64 = base64.filter(|b| !b.trim().is_empty());
    match (url, base64) {
        (Some(url), _) => Some(AudioRef::Url(url)),
        (None, Some(data)) => Some(AudioRef::Base64(data)),
        (None, None) => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_audio_ref_from_parts() {
        assert_eq!(
            audio_ref_from_parts(Some("https://cdn/a.mp3".into()), Some("AAAA".into())),
            Some(AudioRef::Url("https://cdn/a.mp3".into()))
        );
        assert_eq!(
            audio_ref_from_parts(Some("  ".into()), Some("AAAA".into())),
            Some(AudioRef::Base64("AAAA".into()))
        );
        assert_eq!(audio_ref_from_parts(None, Some(String::new())), None);
    }

    #[test]
    fn test_history_entry_wire_format() {
        let turn = ConversationTurn::user("oi");
        let json = serde_json::to_value(HistoryEntry::from(&turn)).unwrap();
        assert_eq!(json, serde_json::json!({"role": "user", "content": "oi"}));
    }
}
