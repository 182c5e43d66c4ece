use anyhow::{bail, Result};
use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::audio::PlatformProfile;
use crate::pipeline::VoiceParams;

/// Configuration for a conversation orchestrator
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct OrchestratorConfig {
    /// Assistant the conversation is held with (required)
    pub agent_identity: String,

    /// Spoken when `play_welcome` is called; skipped when absent
    pub welcome_message: Option<String>,

    /// Recording ceiling; the recording is stopped automatically after this
    /// Default: 60 seconds
    pub max_recording_duration_ms: u64,

    #[serde(flatten)]
    pub voice: VoiceParams,

    /// Synthesize replies that arrive without audio
    pub speak_responses: bool,

    pub platform: PlatformProfile,

    /// Event channel capacity per subscriber
    pub event_capacity: usize,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            agent_identity: String::new(),
            welcome_message: None,
            max_recording_duration_ms: 60_000,
            voice: VoiceParams::default(),
            speak_responses: true,
            platform: PlatformProfile::Standard,
            event_capacity: 1024,
        }
    }
}

impl OrchestratorConfig {
    pub fn new(agent_identity: impl Into<String>) -> Self {
        Self {
            agent_identity: agent_identity.into(),
            ..Self::default()
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.agent_identity.trim().is_empty() {
            bail!("agent_identity is required");
        }
        if self.max_recording_duration_ms == 0 {
            bail!("max_recording_duration_ms must be positive");
        }
        if self.event_capacity == 0 {
            bail!("event_capacity must be positive");
        }
        Ok(())
    }

    pub fn max_recording_duration(&self) -> Duration {
        Duration::from_millis(self.max_recording_duration_ms)
    }

    /// Welcome message, ignoring blank values
    pub fn welcome(&self) -> Option<&str> {
        self.welcome_message
            .as_deref()
            .map(str::trim)
            .filter(|m| !m.is_empty())
    }
}
