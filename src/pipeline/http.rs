use anyhow::{bail, Context, Result};
use base64::Engine;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{debug, info};

use super::{
    audio_ref_from_parts, history_entries, HistoryEntry, Reply, Speech, Transcription,
    VoiceParams, VoicePipeline, WordTiming,
};
use crate::capture::RecordingResult;
use crate::playback::AudioRef;
use crate::session::{ConversationTurn, SessionIdentity};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct HttpPipelineConfig {
    /// Base URL the endpoint paths are joined to
    pub base_url: String,

    /// Sent as bearer token and `apikey` header when set
    pub api_key: Option<String>,

    pub transcribe_path: String,
    pub converse_path: String,
    pub synthesize_path: String,

    /// Voice configuration profile requested from the synthesis service
    pub chat_type: String,

    pub timeout_secs: u64,
}

impl Default for HttpPipelineConfig {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:54321/functions/v1".to_string(),
            api_key: None,
            transcribe_path: "voice-to-text".to_string(),
            converse_path: "pwa-home-agent".to_string(),
            synthesize_path: "text-to-speech".to_string(),
            chat_type: "home".to_string(),
            timeout_secs: 30,
        }
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct TranscribeRequest<'a> {
    audio: String,
    mime_type: &'a str,
    device_id: &'a str,
    session_id: &'a str,
}

#[derive(Debug, Default, Deserialize)]
struct TranscribeResponse {
    text: Option<String>,
    transcript: Option<String>,
    error: Option<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct ConverseRequest<'a> {
    prompt: &'a str,
    device_id: &'a str,
    session_id: &'a str,
    agent: &'a str,
    history: Vec<HistoryEntry>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ConverseResponse {
    response: Option<String>,
    text: Option<String>,
    audio_url: Option<String>,
    audio: Option<String>,
    error: Option<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct SynthesizeRequest<'a> {
    text: &'a str,
    voice: &'a str,
    speed: f32,
    chat_type: &'a str,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SynthesizeResponse {
    audio_url: Option<String>,
    audio: Option<String>,
    word_timings: Option<Vec<WordTiming>>,
    error: Option<String>,
}

/// Pipeline backed by three JSON-over-HTTP endpoints
pub struct HttpVoicePipeline {
    client: reqwest::Client,
    config: HttpPipelineConfig,
}

impl HttpVoicePipeline {
    pub fn new(config: HttpPipelineConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs.max(1)))
            .build()
            .context("Failed to build HTTP client")?;

        info!("HTTP voice pipeline targeting {}", config.base_url);

        Ok(Self { client, config })
    }

    fn endpoint(&self, path: &str) -> String {
        format!(
            "{}/{}",
            self.config.base_url.trim_end_matches('/'),
            path.trim_start_matches('/')
        )
    }

    async fn post<T: Serialize + ?Sized>(&self, path: &str, body: &T) -> Result<reqwest::Response> {
        let url = self.endpoint(path);
        let mut request = self.client.post(&url).json(body);
        if let Some(key) = &self.config.api_key {
            request = request.bearer_auth(key).header("apikey", key);
        }

        let response = request
            .send()
            .await
            .with_context(|| format!("Request to {} failed", url))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            bail!("{} returned {}: {}", path, status, body.trim());
        }

        Ok(response)
    }
}

#[async_trait::async_trait]
impl VoicePipeline for HttpVoicePipeline {
    async fn transcribe(
        &self,
        recording: &RecordingResult,
        identity: &SessionIdentity,
    ) -> Result<Transcription> {
        let request = TranscribeRequest {
            audio: base64::engine::general_purpose::STANDARD.encode(&recording.payload),
            mime_type: &recording.mime_type,
            device_id: &identity.device_id,
            session_id: &identity.session_id,
        };

        let response: TranscribeResponse = self
            .post(&self.config.transcribe_path, &request)
            .await?
            .json()
            .await
            .context("Invalid transcription response")?;

        match (response.text.or(response.transcript), response.error) {
            (Some(text), _) => Ok(Transcription { text }),
            (None, Some(error)) => bail!("Transcription service error: {}", error),
            (None, None) => Ok(Transcription { text: String::new() }),
        }
    }

    async fn converse(
        &self,
        text: &str,
        history: &[ConversationTurn],
        identity: &SessionIdentity,
    ) -> Result<Reply> {
        let request = ConverseRequest {
            prompt: text,
            device_id: &identity.device_id,
            session_id: &identity.session_id,
            agent: &identity.agent_identity,
            history: history_entries(history),
        };

        let response: ConverseResponse = self
            .post(&self.config.converse_path, &request)
            .await?
            .json()
            .await
            .context("Invalid assistant response")?;

        let audio = audio_ref_from_parts(response.audio_url, response.audio);
        match (response.response.or(response.text), response.error) {
            (Some(text), _) => Ok(Reply { text, audio }),
            (None, Some(error)) => bail!("Assistant service error: {}", error),
            (None, None) => Ok(Reply {
                text: String::new(),
                audio,
            }),
        }
    }

    async fn synthesize(&self, text: &str, voice: &VoiceParams) -> Result<Speech> {
        let request = SynthesizeRequest {
            text,
            voice: &voice.voice_id,
            speed: voice.speech_rate,
            chat_type: &self.config.chat_type,
        };

        let response = self.post(&self.config.synthesize_path, &request).await?;
        let is_json = response
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(|ct| ct.starts_with("application/json"))
            .unwrap_or(false);

        if is_json {
            let body: SynthesizeResponse = response
                .json()
                .await
                .context("Invalid synthesis response")?;
            if let Some(error) = body.error {
                bail!("Synthesis service error: {}", error);
            }
            let audio = audio_ref_from_parts(body.audio_url, body.audio)
                .context("Synthesis response carried no audio")?;
            debug!("Synthesis returned JSON audio reference");
            return Ok(Speech {
                audio,
                word_timings: body.word_timings,
            });
        }

        let bytes = response
            .bytes()
            .await
            .context("Failed to read synthesized audio")?;
        if bytes.is_empty() {
            bail!("Synthesis returned empty audio");
        }
        debug!("Synthesis returned {} bytes of audio", bytes.len());

        Ok(Speech {
            audio: AudioRef::binary(bytes.to_vec()),
            word_timings: None,
        })
    }

    fn name(&self) -> &str {
        "http"
    }
}
