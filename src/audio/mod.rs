pub mod analyzer;
pub mod backend;
pub mod chunk;
pub mod decode;
pub mod file;
pub mod platform;

pub use analyzer::{FrequencyAnalyzer, FrequencySample};
pub use backend::{
    AudioFrame, AudioOutput, CaptureConstraints, Microphone, MicrophoneError, MicrophoneStream,
    MicrophoneTrack, PermissionState,
};
pub use chunk::{AudioEncoding, ChunkBuffer, EncodedPayload};
pub use decode::{decode, DecodedAudio};
pub use file::{AudioFile, NullOutput, WavFileMicrophone, WavFileOutput};
pub use platform::PlatformProfile;
