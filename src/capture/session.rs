use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, info, warn};

use super::{CaptureConfig, CaptureEvent, RecordingId, RecordingResult};
use crate::audio::{
    AudioEncoding, AudioFrame, ChunkBuffer, FrequencyAnalyzer, Microphone, MicrophoneTrack,
    PermissionState,
};
use crate::error::VoiceError;

/// Owns the microphone for one recording at a time
pub struct CaptureSession {
    config: CaptureConfig,
    microphone: Box<dyn Microphone>,
    events: mpsc::UnboundedSender<CaptureEvent>,
    next_id: u64,
    active: Option<ActiveRecording>,
    destroyed: bool,
}

/// Resources held while a recording is live
struct ActiveRecording {
    id: RecordingId,
    track: Box<dyn MicrophoneTrack>,
    started: Instant,
    stop_tx: Option<oneshot::Sender<()>>,
    pump: JoinHandle<ChunkBuffer>,
    ticker: JoinHandle<()>,
}

impl ActiveRecording {
    /// Release the device and stop every task, discarding audio
    fn abandon(mut self) {
        self.track.stop();
        self.ticker.abort();
        self.pump.abort();
    }
}

impl CaptureSession {
    pub fn new(
        config: CaptureConfig,
        microphone: Box<dyn Microphone>,
        events: mpsc::UnboundedSender<CaptureEvent>,
    ) -> Self {
        info!(
            "Capture session created (microphone: {}, platform: {:?})",
            microphone.name(),
            config.platform
        );
        Self {
            config,
            microphone,
            events,
            next_id: 0,
            active: None,
            destroyed: false,
        }
    }

    pub fn config(&self) -> &CaptureConfig {
        &self.config
    }

    /// Probe permission by briefly opening the microphone
    ///
    /// A recording in progress already holds a granted stream, so no second
    /// stream is opened.
    pub async fn request_permission(&mut self) -> bool {
        if self.active.is_some() {
            return true;
        }
        match self.microphone.open(&self.config.constraints()).await {
            Ok(mut stream) => {
                stream.track.stop();
                true
            }
            Err(e) => {
                warn!("Microphone permission request failed: {}", e);
                false
            }
        }
    }

    /// Check permission without touching the device
    pub async fn has_permission(&self) -> bool {
        self.microphone.permission().await == PermissionState::Granted
    }

    pub fn is_recording(&self) -> bool {
        self.active.is_some()
    }

    pub fn current_id(&self) -> Option<RecordingId> {
        self.active.as_ref().map(|a| a.id)
    }

    /// Acquire the microphone and begin buffering
    ///
    /// Any recording still held by this session is cancelled first.
    pub async fn start(&mut self) -> Result<RecordingId, VoiceError> {
        if self.destroyed {
            return Err(VoiceError::HardwareUnavailable(
                "Capture session has been destroyed".to_string(),
            ));
        }
        if let Some(previous) = self.active.take() {
            warn!("Cleaning up {} before starting a new recording", previous.id);
            previous.abandon();
        }

        let constraints = self.config.constraints();
        let stream = self.microphone.open(&constraints).await.map_err(|e| {
            warn!("Failed to open microphone: {}", e);
            VoiceError::from(e)
        })?;

        self.next_id += 1;
        let id = RecordingId(self.next_id);

        let encoding = AudioEncoding::select(&self.config.preferred_encodings);
        let buffer = ChunkBuffer::new(
            encoding,
            stream.sample_rate,
            stream.channels,
            constraints.buffer_duration,
        );

        let started = Instant::now();
        let (stop_tx, stop_rx) = oneshot::channel();

        let pump = tokio::spawn(pump_frames(
            id,
            stream.frames,
            buffer,
            stop_rx,
            self.events.clone(),
            self.config.frame_interval(),
        ));
        let ticker = tokio::spawn(tick_duration(id, started, self.events.clone()));

        info!(
            "Recording {} started ({}Hz, {}ch, {:?}, timeslice {:?})",
            id, stream.sample_rate, stream.channels, encoding, constraints.buffer_duration
        );

        self.active = Some(ActiveRecording {
            id,
            track: stream.track,
            started,
            stop_tx: Some(stop_tx),
            pump,
            ticker,
        });

        Ok(id)
    }

    /// Finish the recording and validate the payload
    ///
    /// The microphone is released whether or not the recording is valid.
    pub async fn stop(&mut self) -> Result<RecordingResult, VoiceError> {
        let Some(mut active) = self.active.take() else {
            return Err(VoiceError::InvalidRecording("No recording in progress".to_string()));
        };

        active.track.stop();
        active.ticker.abort();
        let duration = active.started.elapsed();
        if let Some(stop_tx) = active.stop_tx.take() {
            let _ = stop_tx.send(());
        }

        let buffer = active.pump.await.map_err(|e| {
            VoiceError::InvalidRecording(format!("Recorder stopped unexpectedly: {}", e))
        })?;
        let encoded = buffer.finish().map_err(|e| {
            VoiceError::InvalidRecording(format!("Failed to encode recording: {:#}", e))
        })?;

        if encoded.bytes.len() < self.config.min_payload_bytes {
            warn!(
                "Recording {} rejected: {} bytes < {} bytes",
                active.id,
                encoded.bytes.len(),
                self.config.min_payload_bytes
            );
            return Err(VoiceError::InvalidRecording(format!(
                "Recording too small ({} bytes)",
                encoded.bytes.len()
            )));
        }
        if duration < self.config.min_duration() {
            warn!(
                "Recording {} rejected: {:?} < {:?}",
                active.id,
                duration,
                self.config.min_duration()
            );
            return Err(VoiceError::InvalidRecording(format!(
                "Recording too short ({:.1}s)",
                duration.as_secs_f64()
            )));
        }

        info!(
            "Recording {} stopped: {:.1}s, {} bytes, {}",
            active.id,
            duration.as_secs_f64(),
            encoded.bytes.len(),
            encoded.mime_type
        );

        Ok(RecordingResult {
            payload: encoded.bytes,
            duration,
            mime_type: encoded.mime_type,
        })
    }

    /// Stop without producing a result
    pub fn cancel(&mut self) {
        if let Some(active) = self.active.take() {
            info!("Recording {} cancelled", active.id);
            active.abandon();
        }
    }

    /// Cancel and refuse further recordings
    pub fn destroy(&mut self) {
        self.cancel();
        self.destroyed = true;
        debug!("Capture session destroyed");
    }
}

impl Drop for CaptureSession {
    fn drop(&mut self) {
        self.cancel();
    }
}

/// Feed frames into the chunk buffer and analyzer until told to stop
async fn pump_frames(
    id: RecordingId,
    mut frames: mpsc::Receiver<AudioFrame>,
    mut buffer: ChunkBuffer,
    mut stop_rx: oneshot::Receiver<()>,
    events: mpsc::UnboundedSender<CaptureEvent>,
    frame_interval: Duration,
) -> ChunkBuffer {
    let mut analyzer = FrequencyAnalyzer::default();
    let mut frame_tick = tokio::time::interval(frame_interval);
    frame_tick.set_missed_tick_behavior(MissedTickBehavior::Skip);
    let mut device_ended = false;

    loop {
        tokio::select! {
            biased;

            _ = &mut stop_rx => break,

            frame = frames.recv(), if !device_ended => match frame {
                Some(frame) => {
                    analyzer.push_pcm(&frame.samples);
                    buffer.push(&frame);
                }
                None => {
                    debug!("{}: microphone stream ended", id);
                    device_ended = true;
                }
            },

            _ = frame_tick.tick(), if !device_ended => {
                let sample = analyzer.sample();
                if events.send(CaptureEvent::Frequency { recording: id, sample }).is_err() {
                    device_ended = true;
                }
            }
        }
    }

    // Frames delivered before the track stopped still belong to the recording
    while let Ok(frame) = frames.try_recv() {
        buffer.push(&frame);
    }

    debug!(
        "{}: pump finished with {} chunks, {} samples",
        id,
        buffer.chunk_count(),
        buffer.sample_count()
    );
    buffer
}

/// Report whole elapsed seconds once per second
async fn tick_duration(
    id: RecordingId,
    started: Instant,
    events: mpsc::UnboundedSender<CaptureEvent>,
) {
    let period = Duration::from_secs(1);
    let mut ticker = tokio::time::interval_at(started + period, period);
    loop {
        ticker.tick().await;
        let seconds = started.elapsed().as_secs();
        if events
            .send(CaptureEvent::Duration { recording: id, seconds })
            .is_err()
        {
            break;
        }
    }
}
