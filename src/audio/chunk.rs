use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::io::Cursor;
use std::time::Duration;
use tracing::{debug, info};

use super::backend::AudioFrame;

/// Container encodings the capture session can produce
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AudioEncoding {
    /// RIFF/WAVE, 16-bit PCM
    Wav,
    /// Raw big-endian 16-bit PCM (RFC 2586)
    L16,
}

impl AudioEncoding {
    /// Pick the first preferred mime type this crate can encode, defaulting to WAV
    pub fn select(preferred: &[String]) -> Self {
        preferred
            .iter()
            .find_map(|mime| Self::from_mime(mime))
            .unwrap_or(AudioEncoding::Wav)
    }

    pub fn from_mime(mime: &str) -> Option<Self> {
        let base = mime.split(';').next().unwrap_or("").trim().to_ascii_lowercase();
        match base.as_str() {
            "audio/wav" | "audio/wave" | "audio/x-wav" => Some(AudioEncoding::Wav),
            "audio/l16" => Some(AudioEncoding::L16),
            _ => None,
        }
    }

    pub fn mime_type(&self, sample_rate: u32, channels: u16) -> String {
        match self {
            AudioEncoding::Wav => "audio/wav".to_string(),
            AudioEncoding::L16 => format!("audio/L16;rate={};channels={}", sample_rate, channels),
        }
    }
}

/// In-memory chunk buffer for one recording
///
/// Frames accumulate into a pending chunk that is sealed every `timeslice`;
/// `finish` concatenates the sealed chunks into a single encoded payload.
pub struct ChunkBuffer {
    encoding: AudioEncoding,
    sample_rate: u32,
    channels: u16,
    timeslice: Duration,
    chunks: Vec<Vec<i16>>,
    pending: Vec<i16>,
    pending_started_ms: Option<u64>,
}

/// Encoded payload produced from a chunk buffer
#[derive(Debug, Clone)]
pub struct EncodedPayload {
    pub bytes: Vec<u8>,
    pub mime_type: String,
    /// Duration represented by the samples
    pub media_duration: Duration,
    pub chunk_count: usize,
}

impl ChunkBuffer {
    pub fn new(encoding: AudioEncoding, sample_rate: u32, channels: u16, timeslice: Duration) -> Self {
        Self {
            encoding,
            sample_rate,
            channels,
            timeslice,
            chunks: Vec::new(),
            pending: Vec::new(),
            pending_started_ms: None,
        }
    }

    pub fn push(&mut self, frame: &AudioFrame) {
        if frame.samples.is_empty() {
            return;
        }

        let started = *self.pending_started_ms.get_or_insert(frame.timestamp_ms);
        self.pending.extend_from_slice(&frame.samples);

        let per_second = frame.sample_rate as u64 * frame.channels.max(1) as u64;
        let frame_ms = (frame.samples.len() as u64 * 1000).checked_div(per_second).unwrap_or(0);
        let elapsed_ms = frame.timestamp_ms.saturating_sub(started) + frame_ms;
        if elapsed_ms >= self.timeslice.as_millis() as u64 {
            self.seal();
        }
    }

    fn seal(&mut self) {
        if self.pending.is_empty() {
            return;
        }
        let chunk = std::mem::take(&mut self.pending);
        debug!("Chunk {} sealed ({} samples)", self.chunks.len(), chunk.len());
        self.chunks.push(chunk);
        self.pending_started_ms = None;
    }

    pub fn chunk_count(&self) -> usize {
        self.chunks.len()
    }

    pub fn sample_count(&self) -> usize {
        self.chunks.iter().map(Vec::len).sum::<usize>() + self.pending.len()
    }

    /// Seal the last chunk and encode everything into one payload
    pub fn finish(mut self) -> Result<EncodedPayload> {
        self.seal();

        let samples: Vec<i16> = self.chunks.concat();
        let per_second = self.sample_rate as f64 * self.channels.max(1) as f64;
        let media_duration = if per_second > 0.0 {
            Duration::from_secs_f64(samples.len() as f64 / per_second)
        } else {
            Duration::ZERO
        };

        let bytes = match self.encoding {
            AudioEncoding::Wav => encode_wav(&samples, self.sample_rate, self.channels)?,
            AudioEncoding::L16 => samples.iter().flat_map(|s| s.to_be_bytes()).collect(),
        };

        info!(
            "Recording encoded: {} chunks, {} samples, {} bytes ({})",
            self.chunks.len(),
            samples.len(),
            bytes.len(),
            self.encoding.mime_type(self.sample_rate, self.channels)
        );

        Ok(EncodedPayload {
            bytes,
            mime_type: self.encoding.mime_type(self.sample_rate, self.channels),
            media_duration,
            chunk_count: self.chunks.len(),
        })
    }
}

/// Encode interleaved 16-bit PCM as an in-memory WAV file
pub fn encode_wav(samples: &[i16], sample_rate: u32, channels: u16) -> Result<Vec<u8>> {
    let spec = hound::WavSpec {
        channels,
        sample_rate,
        bits_per_sample: 16,
        sample_format: hound::SampleFormat::Int,
    };

    let mut cursor = Cursor::new(Vec::new());
    {
        let mut writer = hound::WavWriter::new(&mut cursor, spec)
            .context("Failed to create WAV writer")?;
        for &sample in samples {
            writer
                .write_sample(sample)
                .context("Failed to write sample to WAV")?;
        }
        writer.finalize().context("Failed to finalize WAV payload")?;
    }

    Ok(cursor.into_inner())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn frame(timestamp_ms: u64, len: usize) -> AudioFrame {
        AudioFrame {
            samples: vec![1000; len],
            sample_rate: 16000,
            channels: 1,
            timestamp_ms,
        }
    }

    #[test]
    fn test_select_encoding() {
        let prefs = vec!["audio/webm;codecs=opus".to_string(), "audio/L16".to_string()];
        assert_eq!(AudioEncoding::select(&prefs), AudioEncoding::L16);
        assert_eq!(AudioEncoding::select(&["audio/mp4".to_string()]), AudioEncoding::Wav);
        assert_eq!(AudioEncoding::select(&[]), AudioEncoding::Wav);
    }

    #[test]
    fn test_chunks_sealed_per_timeslice() {
        let mut buffer = ChunkBuffer::new(AudioEncoding::Wav, 16000, 1, Duration::from_millis(100));

        // 20ms frames: five frames fill one 100ms chunk
        for i in 0..25 {
            buffer.push(&frame(i * 20, 320));
        }

        assert_eq!(buffer.chunk_count(), 5);
        assert_eq!(buffer.sample_count(), 25 * 320);
    }

    #[test]
    fn test_wav_payload_round_trips_through_hound() {
        let mut buffer = ChunkBuffer::new(AudioEncoding::Wav, 16000, 1, Duration::from_millis(100));
        for i in 0..50 {
            buffer.push(&frame(i * 20, 320));
        }

        let payload = buffer.finish().unwrap();
        assert_eq!(payload.mime_type, "audio/wav");
        assert!((payload.media_duration.as_secs_f64() - 1.0).abs() < 1e-6);

        let reader = hound::WavReader::new(Cursor::new(payload.bytes)).unwrap();
        assert_eq!(reader.spec().sample_rate, 16000);
        assert_eq!(reader.len(), 16000);
    }

    #[test]
    fn test_l16_payload_is_big_endian() {
        let mut buffer = ChunkBuffer::new(AudioEncoding::L16, 16000, 1, Duration::from_millis(100));
        buffer.push(&AudioFrame {
            samples: vec![0x0102],
            sample_rate: 16000,
            channels: 1,
            timestamp_ms: 0,
        });

        let payload = buffer.finish().unwrap();
        assert_eq!(payload.bytes, vec![0x01, 0x02]);
        assert_eq!(payload.mime_type, "audio/L16;rate=16000;channels=1");
        assert_eq!(payload.chunk_count, 1);
    }
}
