use anyhow::{Context, Result};
use serde::Deserialize;

use crate::capture::CaptureConfig;
use crate::pipeline::HttpPipelineConfig;
use crate::playback::PlaybackConfig;
use crate::session::OrchestratorConfig;

#[derive(Debug, Deserialize)]
pub struct Config {
    pub service: ServiceConfig,
    pub orchestrator: OrchestratorConfig,
    #[serde(default)]
    pub capture: CaptureConfig,
    #[serde(default)]
    pub playback: PlaybackConfig,
    #[serde(default)]
    pub pipeline: PipelineConfig,
    #[serde(default)]
    pub audio: AudioConfig,
}

#[derive(Debug, Deserialize)]
pub struct ServiceConfig {
    pub name: String,
    pub http: HttpConfig,
}

#[derive(Debug, Deserialize)]
pub struct HttpConfig {
    pub bind: String,
    pub port: u16,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PipelineTransport {
    #[default]
    Http,
    Nats,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    pub transport: PipelineTransport,
    pub http: HttpPipelineConfig,
    pub nats: NatsConfig,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            transport: PipelineTransport::Http,
            http: HttpPipelineConfig::default(),
            nats: NatsConfig::default(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct NatsConfig {
    pub url: String,
    pub subject_prefix: String,
}

impl Default for NatsConfig {
    fn default() -> Self {
        Self {
            url: "nats://localhost:4222".to_string(),
            subject_prefix: "voice".to_string(),
        }
    }
}

/// Local audio devices used by the service
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct AudioConfig {
    /// WAV file streamed as the microphone
    pub input_path: String,

    /// Directory spoken clips are written to; discarded when absent
    pub output_dir: Option<String>,
}

impl Default for AudioConfig {
    fn default() -> Self {
        Self {
            input_path: "recordings/input.wav".to_string(),
            output_dir: Some("recordings/playback".to_string()),
        }
    }
}

impl Config {
    /// Load `path` (extension optional) with `VOICE_TURNS__SECTION__KEY` overrides
    pub fn load(path: &str) -> Result<Self> {
        let settings = config::Config::builder()
            .add_source(config::File::with_name(path))
            .add_source(
                config::Environment::with_prefix("VOICE_TURNS")
                    .prefix_separator("__")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()
            .with_context(|| format!("Failed to load config from {}", path))?;

        let config: Self = settings
            .try_deserialize()
            .context("Invalid configuration")?;
        config.orchestrator.validate()?;

        Ok(config)
    }
}
