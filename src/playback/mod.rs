//! Clip playback with progress reporting and live spectrum data

mod loader;
mod session;

pub use loader::{
    AudioRef, Blob, BlobStore, ClipLoader, FetchedMedia, HttpFetcher, LoadedClip, MediaFetcher,
};
pub use session::PlaybackSession;

use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;

use crate::audio::analyzer::{FrequencySample, DEFAULT_FFT_SIZE};

/// Identifies one clip started on a playback session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub struct ClipId(pub u64);

impl fmt::Display for ClipId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "clip-{}", self.0)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PlaybackConfig {
    /// Render and spectrum cadence (one animation frame)
    pub frame_interval_ms: u64,

    /// Progress report cadence
    pub time_update_interval_ms: u64,

    pub fft_size: usize,
}

impl Default for PlaybackConfig {
    fn default() -> Self {
        Self {
            frame_interval_ms: 16,
            time_update_interval_ms: 250,
            fft_size: DEFAULT_FFT_SIZE,
        }
    }
}

impl PlaybackConfig {
    pub fn frame_interval(&self) -> Duration {
        Duration::from_millis(self.frame_interval_ms.max(1))
    }

    pub fn time_update_interval(&self) -> Duration {
        Duration::from_millis(self.time_update_interval_ms.max(1))
    }
}

#[derive(Debug, Clone)]
pub enum PlaybackEvent {
    Frequency {
        clip: ClipId,
        sample: FrequencySample,
    },
    Progress {
        clip: ClipId,
        /// 0.0..=1.0
        fraction: f64,
        current_time: f64,
        duration: f64,
    },
    /// Emitted exactly once when a clip plays to the end
    Ended { clip: ClipId },
}
