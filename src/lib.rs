pub mod audio;
pub mod capture;
pub mod config;
pub mod error;
pub mod http;
pub mod nats;
pub mod pipeline;
pub mod playback;
pub mod session;

pub use audio::{
    AudioFrame, AudioOutput, FrequencyAnalyzer, FrequencySample, Microphone, PlatformProfile,
};
pub use capture::{CaptureConfig, CaptureSession, RecordingResult};
pub use config::Config;
pub use error::VoiceError;
pub use http::{create_router, AppState};
pub use nats::NatsVoicePipeline;
pub use pipeline::{HttpVoicePipeline, VoiceParams, VoicePipeline};
pub use playback::{AudioRef, BlobStore, ClipLoader, HttpFetcher, PlaybackConfig, PlaybackSession};
pub use session::{
    AudioDevices, ConversationTurn, OrchestratorConfig, SessionIdentity, SessionState, VoiceEvent,
    VoiceOrchestrator,
};
