//! Platform audio profiles
//!
//! Mobile browsers deliver small capture intervals unreliably and refuse to
//! play audio until it has been unlocked from a user gesture. Those quirks are
//! captured once, here, as a profile that parameterizes the sessions.

use serde::{Deserialize, Serialize};
use std::time::Duration;

use super::backend::CaptureConstraints;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PlatformProfile {
    #[default]
    Standard,
    Mobile,
}

impl PlatformProfile {
    /// Detect the profile from a browser user-agent string
    pub fn from_user_agent(user_agent: &str) -> Self {
        let ua = user_agent.to_ascii_lowercase();

        let ios = ["iphone", "ipad", "ipod"].iter().any(|d| ua.contains(d));
        let android = ua.contains("android");
        // Chrome, Firefox and Edge all carry "safari" in their UA too
        let safari = ua.contains("safari")
            && !["chrome", "chromium", "crios", "fxios", "edg/", "android"]
                .iter()
                .any(|t| ua.contains(t));

        if ios || android || safari {
            PlatformProfile::Mobile
        } else {
            PlatformProfile::Standard
        }
    }

    /// Interval at which the capture device delivers buffered audio
    pub fn timeslice(&self) -> Duration {
        match self {
            PlatformProfile::Standard => Duration::from_millis(100),
            PlatformProfile::Mobile => Duration::from_millis(1000),
        }
    }

    /// Explicit encoder bitrate hint
    pub fn bitrate_hint(&self) -> Option<u32> {
        match self {
            PlatformProfile::Standard => None,
            PlatformProfile::Mobile => Some(128_000),
        }
    }

    /// Whether audio must be unlocked before capture or playback
    pub fn requires_unlock(&self) -> bool {
        matches!(self, PlatformProfile::Mobile)
    }

    /// Capture constraints tuned for this platform
    pub fn constraints(&self) -> CaptureConstraints {
        CaptureConstraints {
            buffer_duration: self.timeslice(),
            bitrate_hint: self.bitrate_hint(),
            ..CaptureConstraints::default()
        }
    }
}
