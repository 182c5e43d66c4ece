//! Microphone capture for one utterance at a time
//!
//! `CaptureSession` acquires the microphone, buffers encoded chunks, reports
//! elapsed seconds and live spectrum data, and hands back a validated payload.

mod session;

pub use session::CaptureSession;

use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;

use crate::audio::{CaptureConstraints, FrequencySample, PlatformProfile};

/// Identifies one recording started on a capture session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub struct RecordingId(pub u64);

impl fmt::Display for RecordingId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "recording-{}", self.0)
    }
}

/// Capture session configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CaptureConfig {
    /// Payloads smaller than this are rejected as invalid recordings
    pub min_payload_bytes: usize,

    /// Recordings shorter than this are rejected as invalid recordings
    pub min_duration_ms: u64,

    /// Encodings to try, most preferred first
    pub preferred_encodings: Vec<String>,

    pub sample_rate: u32,
    pub channels: u16,

    /// Spectrum sampling cadence while recording
    pub frame_interval_ms: u64,

    pub platform: PlatformProfile,
}

impl Default for CaptureConfig {
    fn default() -> Self {
        Self {
            min_payload_bytes: 1024,
            min_duration_ms: 500,
            preferred_encodings: vec!["audio/wav".to_string(), "audio/L16".to_string()],
            sample_rate: 16000,
            channels: 1,
            frame_interval_ms: 16,
            platform: PlatformProfile::Standard,
        }
    }
}

impl CaptureConfig {
    pub fn for_platform(platform: PlatformProfile) -> Self {
        Self {
            platform,
            ..Self::default()
        }
    }

    /// Device constraints: the platform's tuning plus the requested format
    pub fn constraints(&self) -> CaptureConstraints {
        CaptureConstraints {
            sample_rate: self.sample_rate,
            channels: self.channels,
            ..self.platform.constraints()
        }
    }

    pub fn min_duration(&self) -> Duration {
        Duration::from_millis(self.min_duration_ms)
    }

    pub fn frame_interval(&self) -> Duration {
        Duration::from_millis(self.frame_interval_ms.max(1))
    }
}

/// Events published while a recording is live
#[derive(Debug, Clone)]
pub enum CaptureEvent {
    /// Whole seconds elapsed, once per second
    Duration { recording: RecordingId, seconds: u64 },
    Frequency {
        recording: RecordingId,
        sample: FrequencySample,
    },
}

/// A validated recording
#[derive(Debug, Clone, PartialEq)]
pub struct RecordingResult {
    pub payload: Vec<u8>,
    pub duration: Duration,
    pub mime_type: String,
}

impl RecordingResult {
    pub fn duration_secs(&self) -> f64 {
        self.duration.as_secs_f64()
    }
}
