use anyhow::{Context, Result};
use hound::{WavReader, WavSpec, WavWriter};
use std::fs::File;
use std::io::BufWriter;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use super::backend::{
    AudioFrame, AudioOutput, CaptureConstraints, Microphone, MicrophoneError, MicrophoneStream,
    MicrophoneTrack, PermissionState,
};

/// Frame size used when streaming a file as if it were a live device
const FRAME_DURATION: Duration = Duration::from_millis(20);

pub struct AudioFile {
    pub path: String,
    pub duration_seconds: f64,
    pub sample_rate: u32,
    pub channels: u16,
    pub samples: Vec<i16>,
}

impl AudioFile {
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        info!("Opening audio file: {}", path.display());

        let reader = WavReader::open(path).context("Failed to open WAV file")?;

        let spec = reader.spec();
        let samples: Vec<i16> = reader
            .into_samples::<i16>()
            .collect::<Result<Vec<_>, _>>()
            .context("Failed to read audio samples")?;

        let duration_seconds =
            samples.len() as f64 / (spec.sample_rate as f64 * spec.channels.max(1) as f64);

        info!(
            "Audio file loaded: {:.1}s, {}Hz, {} channels, {} samples",
            duration_seconds,
            spec.sample_rate,
            spec.channels,
            samples.len()
        );

        Ok(Self {
            path: path.display().to_string(),
            duration_seconds,
            sample_rate: spec.sample_rate,
            channels: spec.channels,
            samples,
        })
    }

    /// Average interleaved channels down to mono
    pub fn to_mono(&self) -> Vec<i16> {
        if self.channels <= 1 {
            return self.samples.clone();
        }
        self.samples
            .chunks(self.channels as usize)
            .map(|frame| (frame.iter().map(|&s| s as i32).sum::<i32>() / frame.len() as i32) as i16)
            .collect()
    }
}

/// Microphone that plays a WAV file in real time
///
/// Used for headless turns and tests. Permission is always granted; a missing
/// file reports as a missing device.
pub struct WavFileMicrophone {
    path: PathBuf,
}

impl WavFileMicrophone {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

struct FileTrack {
    live: Arc<AtomicBool>,
}

impl MicrophoneTrack for FileTrack {
    fn stop(&mut self) {
        if self.live.swap(false, Ordering::SeqCst) {
            debug!("File microphone track stopped");
        }
    }

    fn is_live(&self) -> bool {
        self.live.load(Ordering::SeqCst)
    }
}

impl Drop for FileTrack {
    fn drop(&mut self) {
        self.stop();
    }
}

#[async_trait::async_trait]
impl Microphone for WavFileMicrophone {
    async fn permission(&self) -> PermissionState {
        PermissionState::Granted
    }

    async fn open(
        &mut self,
        constraints: &CaptureConstraints,
    ) -> Result<MicrophoneStream, MicrophoneError> {
        if !self.path.exists() {
            return Err(MicrophoneError::NotFound);
        }

        let file = AudioFile::open(&self.path)?;
        let (samples, channels) = if constraints.channels == 1 {
            (file.to_mono(), 1)
        } else {
            (file.samples.clone(), file.channels)
        };
        let sample_rate = file.sample_rate;

        let frame_len = ((sample_rate as u64 * FRAME_DURATION.as_millis() as u64 / 1000) as usize
            * channels as usize)
            .max(1);

        let live = Arc::new(AtomicBool::new(true));
        let (tx, rx) = mpsc::channel(64);

        let task_live = Arc::clone(&live);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(FRAME_DURATION);
            for (i, chunk) in samples.chunks(frame_len).enumerate() {
                ticker.tick().await;
                if !task_live.load(Ordering::SeqCst) {
                    break;
                }
                let frame = AudioFrame {
                    samples: chunk.to_vec(),
                    sample_rate,
                    channels,
                    timestamp_ms: i as u64 * FRAME_DURATION.as_millis() as u64,
                };
                if tx.send(frame).await.is_err() {
                    break;
                }
            }
            debug!("File microphone finished streaming");
        });

        info!(
            "File microphone opened: {} ({}Hz, {}ch)",
            self.path.display(),
            sample_rate,
            channels
        );

        Ok(MicrophoneStream {
            frames: rx,
            track: Box::new(FileTrack { live }),
            sample_rate,
            channels,
        })
    }

    fn name(&self) -> &str {
        "wav-file"
    }
}

/// Output that writes every clip to `clip-NNN.wav` in a directory
pub struct WavFileOutput {
    dir: PathBuf,
    clip_index: usize,
    writer: Option<WavWriter<BufWriter<File>>>,
}

impl WavFileOutput {
    pub fn new(dir: impl Into<PathBuf>) -> Result<Self> {
        let dir = dir.into();
        std::fs::create_dir_all(&dir)
            .with_context(|| format!("Failed to create output directory {}", dir.display()))?;
        Ok(Self {
            dir,
            clip_index: 0,
            writer: None,
        })
    }

    fn finalize(&mut self) {
        if let Some(writer) = self.writer.take() {
            if let Err(e) = writer.finalize() {
                warn!("Failed to finalize clip file: {}", e);
            }
        }
    }
}

#[async_trait::async_trait]
impl AudioOutput for WavFileOutput {
    async fn begin(&mut self, sample_rate: u32) -> Result<()> {
        self.finalize();

        self.clip_index += 1;
        let path = self.dir.join(format!("clip-{:03}.wav", self.clip_index));
        let spec = WavSpec {
            channels: 1,
            sample_rate,
            bits_per_sample: 16,
            sample_format: hound::SampleFormat::Int,
        };
        let writer = WavWriter::create(&path, spec)
            .with_context(|| format!("Failed to create {}", path.display()))?;
        info!("Writing playback to {}", path.display());

        self.writer = Some(writer);
        Ok(())
    }

    fn render(&mut self, samples: &[f32]) -> Result<()> {
        let Some(writer) = self.writer.as_mut() else {
            return Ok(());
        };
        for &s in samples {
            writer
                .write_sample((s.clamp(-1.0, 1.0) * i16::MAX as f32) as i16)
                .context("Failed to write playback sample")?;
        }
        Ok(())
    }

    fn halt(&mut self) {
        self.finalize();
    }

    async fn unlock(&mut self, _blip: &[f32], _sample_rate: u32) -> Result<()> {
        // Files need no unlock; don't leave an empty clip behind
        Ok(())
    }

    async fn close(&mut self) -> Result<()> {
        self.finalize();
        Ok(())
    }

    fn name(&self) -> &str {
        "wav-file"
    }
}

/// Output that discards everything
#[derive(Debug, Default)]
pub struct NullOutput;

#[async_trait::async_trait]
impl AudioOutput for NullOutput {
    async fn begin(&mut self, _sample_rate: u32) -> Result<()> {
        Ok(())
    }

    fn render(&mut self, _samples: &[f32]) -> Result<()> {
        Ok(())
    }

    fn halt(&mut self) {}

    async fn close(&mut self) -> Result<()> {
        Ok(())
    }

    fn name(&self) -> &str {
        "null"
    }
}
