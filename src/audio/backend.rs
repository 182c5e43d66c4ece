use anyhow::Result;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::mpsc;

use crate::error::VoiceError;

/// Audio sample data (16-bit PCM, interleaved)
#[derive(Debug, Clone)]
pub struct AudioFrame {
    /// Raw audio samples (i16 PCM, interleaved)
    pub samples: Vec<i16>,
    /// Sample rate in Hz
    pub sample_rate: u32,
    /// Number of channels
    pub channels: u16,
    /// Timestamp in milliseconds since capture started
    pub timestamp_ms: u64,
}

impl AudioFrame {
    /// Duration covered by this frame
    pub fn duration(&self) -> Duration {
        let per_second = self.sample_rate as f64 * self.channels.max(1) as f64;
        if per_second == 0.0 {
            return Duration::ZERO;
        }
        Duration::from_secs_f64(self.samples.len() as f64 / per_second)
    }
}

/// Constraints handed to the microphone when a stream is opened
#[derive(Debug, Clone, PartialEq)]
pub struct CaptureConstraints {
    /// Preferred sample rate in Hz
    pub sample_rate: u32,
    /// Preferred channel count (1 = mono)
    pub channels: u16,
    pub echo_cancellation: bool,
    pub noise_suppression: bool,
    pub auto_gain_control: bool,
    /// How often the device should deliver buffered audio
    pub buffer_duration: Duration,
    /// Encoder bitrate hint for platforms that need one
    pub bitrate_hint: Option<u32>,
}

impl Default for CaptureConstraints {
    fn default() -> Self {
        Self {
            sample_rate: 16000,
            channels: 1,
            echo_cancellation: true,
            noise_suppression: true,
            auto_gain_control: true,
            buffer_duration: Duration::from_millis(100),
            bitrate_hint: None,
        }
    }
}

/// Result of probing microphone permission without opening a stream
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PermissionState {
    Granted,
    Denied,
    /// The platform will ask the user on first use
    Prompt,
}

/// Reasons a microphone could not be opened
#[derive(Debug, Error)]
pub enum MicrophoneError {
    #[error("microphone access not allowed: {0}")]
    NotAllowed(String),
    #[error("no microphone found")]
    NotFound,
    #[error("microphone busy: {0}")]
    Busy(String),
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl From<MicrophoneError> for VoiceError {
    fn from(err: MicrophoneError) -> Self {
        match err {
            MicrophoneError::NotAllowed(_) => {
                VoiceError::PermissionDenied("Microphone permission denied".to_string())
            }
            MicrophoneError::NotFound => {
                VoiceError::HardwareUnavailable("Microphone not found".to_string())
            }
            MicrophoneError::Busy(_) => {
                VoiceError::HardwareUnavailable("Microphone in use by another app".to_string())
            }
            MicrophoneError::Other(e) => {
                VoiceError::HardwareUnavailable(format!("Failed to access microphone: {e:#}"))
            }
        }
    }
}

/// A live track of an open microphone stream
///
/// Stopping the track releases the device. Implementations must make
/// `stop` idempotent and stop the track when dropped.
pub trait MicrophoneTrack: Send + Sync {
    fn stop(&mut self);

    fn is_live(&self) -> bool;
}

/// An open microphone stream: the frame receiver plus the track that owns the device
pub struct MicrophoneStream {
    pub frames: mpsc::Receiver<AudioFrame>,
    pub track: Box<dyn MicrophoneTrack>,
    /// Actual sample rate delivered by the device
    pub sample_rate: u32,
    /// Actual channel count delivered by the device
    pub channels: u16,
}

/// Microphone capture backend
///
/// Platform implementations wrap the native capture API; the crate ships a
/// WAV-file backed implementation for headless runs and testing.
#[async_trait::async_trait]
pub trait Microphone: Send + Sync {
    /// Probe the permission state without starting capture
    async fn permission(&self) -> PermissionState;

    /// Open a stream with the given constraints
    async fn open(
        &mut self,
        constraints: &CaptureConstraints,
    ) -> Result<MicrophoneStream, MicrophoneError>;

    /// Get backend name for logging
    fn name(&self) -> &str;
}

/// Audio output device
///
/// The playback session renders decoded PCM (mono f32) through this seam.
#[async_trait::async_trait]
pub trait AudioOutput: Send {
    /// Prepare the device for a clip at the given sample rate
    ///
    /// Platforms may delay or reject the start (autoplay policies).
    async fn begin(&mut self, sample_rate: u32) -> Result<()>;

    /// Render the next block of samples
    fn render(&mut self, samples: &[f32]) -> Result<()>;

    /// Stop rendering the current clip
    fn halt(&mut self);

    /// Unlock the device by rendering a near-silent blip
    async fn unlock(&mut self, blip: &[f32], sample_rate: u32) -> Result<()> {
        self.begin(sample_rate).await?;
        self.render(blip)?;
        self.halt();
        Ok(())
    }

    /// Release the device for good
    async fn close(&mut self) -> Result<()>;

    /// Get backend name for logging
    fn name(&self) -> &str;
}
