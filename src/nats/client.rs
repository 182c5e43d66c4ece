use anyhow::{bail, Context, Result};
use async_nats::Client;
use base64::Engine;
use serde::de::DeserializeOwned;
use serde::Serialize;
use tracing::{debug, info};

use super::messages::{
    ConverseReply, ConverseRequest, SynthesizeReply, SynthesizeRequest, TranscribeReply,
    TranscribeRequest,
};
use crate::capture::RecordingResult;
use crate::pipeline::{
    audio_ref_from_parts, history_entries, Reply, Speech, Transcription, VoiceParams,
    VoicePipeline,
};
use crate::session::{ConversationTurn, SessionIdentity};

/// Pipeline served by request/reply handlers on NATS
pub struct NatsVoicePipeline {
    client: Client,
    subject_prefix: String,
}

impl NatsVoicePipeline {
    /// Connect to NATS server
    pub async fn connect(url: &str, subject_prefix: impl Into<String>) -> Result<Self> {
        info!("Connecting to NATS at {}", url);

        let client = async_nats::connect(url)
            .await
            .context("Failed to connect to NATS")?;

        info!("Connected to NATS successfully");

        Ok(Self {
            client,
            subject_prefix: subject_prefix.into(),
        })
    }

    pub fn subject(&self, stage: &str) -> String {
        format!("{}.{}", self.subject_prefix, stage)
    }

    async fn request<Req, Rep>(&self, stage: &str, request: &Req) -> Result<Rep>
    where
        Req: Serialize,
        Rep: DeserializeOwned,
    {
        let subject = self.subject(stage);
        let payload = serde_json::to_vec(request)?;

        debug!("Requesting {} ({} bytes)", subject, payload.len());

        let message = self
            .client
            .request(subject.clone(), payload.into())
            .await
            .with_context(|| format!("No reply on {}", subject))?;

        serde_json::from_slice(&message.payload)
            .with_context(|| format!("Invalid reply on {}", subject))
    }
}

#[async_trait::async_trait]
impl VoicePipeline for NatsVoicePipeline {
    async fn transcribe(
        &self,
        recording: &RecordingResult,
        identity: &SessionIdentity,
    ) -> Result<Transcription> {
        let request = TranscribeRequest {
            session_id: identity.session_id.clone(),
            device_id: identity.device_id.clone(),
            audio: base64::engine::general_purpose::STANDARD.encode(&recording.payload),
            mime_type: recording.mime_type.clone(),
            duration_secs: recording.duration_secs(),
            timestamp: chrono::Utc::now().to_rfc3339(),
        };

        let reply: TranscribeReply = self.request("transcribe", &request).await?;
        if let Some(error) = reply.error {
            bail!("Transcription handler error: {}", error);
        }
        Ok(Transcription {
            text: reply.text.unwrap_or_default(),
        })
    }

    async fn converse(
        &self,
        text: &str,
        history: &[ConversationTurn],
        identity: &SessionIdentity,
    ) -> Result<Reply> {
        let request = ConverseRequest {
            session_id: identity.session_id.clone(),
            device_id: identity.device_id.clone(),
            agent: identity.agent_identity.clone(),
            prompt: text.to_string(),
            history: history_entries(history),
            timestamp: chrono::Utc::now().to_rfc3339(),
        };

        let reply: ConverseReply = self.request("converse", &request).await?;
        if let Some(error) = reply.error {
            bail!("Assistant handler error: {}", error);
        }
        Ok(Reply {
            text: reply.text.unwrap_or_default(),
            audio: audio_ref_from_parts(reply.audio_url, reply.audio),
        })
    }

    async fn synthesize(&self, text: &str, voice: &VoiceParams) -> Result<Speech> {
        let request = SynthesizeRequest {
            text: text.to_string(),
            voice: voice.voice_id.clone(),
            speed: voice.speech_rate,
        };

        let reply: SynthesizeReply = self.request("synthesize", &request).await?;
        if let Some(error) = reply.error {
            bail!("Synthesis handler error: {}", error);
        }
        let audio = audio_ref_from_parts(reply.audio_url, reply.audio)
            .context("Synthesis reply carried no audio")?;
        Ok(Speech {
            audio,
            word_timings: reply.word_timings,
        })
    }

    fn name(&self) -> &str {
        "nats"
    }
}
