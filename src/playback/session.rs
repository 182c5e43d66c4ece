use std::f32::consts::PI;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, info, warn};

use super::{ClipId, ClipLoader, LoadedClip, PlaybackConfig, PlaybackEvent};
use super::loader::AudioRef;
use crate::audio::{AudioOutput, DecodedAudio, FrequencyAnalyzer};
use crate::error::VoiceError;
use crate::pipeline::{VoiceParams, VoicePipeline, WordTiming};

const WARMUP_SAMPLE_RATE: u32 = 48000;
const WARMUP_DURATION: Duration = Duration::from_millis(10);
const WARMUP_FREQUENCY: f32 = 440.0;
const WARMUP_GAIN: f32 = 0.001;

/// Output device plus the analyzer tapped off it, built once per session
struct Graph {
    output: Box<dyn AudioOutput>,
    analyzer: FrequencyAnalyzer,
}

struct ActiveClip {
    id: ClipId,
    audio: Arc<DecodedAudio>,
    blob: Option<String>,
    /// Next sample to render
    position: usize,
    paused: bool,
    ended: bool,
}

impl ActiveClip {
    fn fraction(&self) -> f64 {
        if self.audio.samples.is_empty() {
            return 0.0;
        }
        self.position as f64 / self.audio.samples.len() as f64
    }

    fn current_time(&self) -> f64 {
        self.position as f64 / self.audio.sample_rate.max(1) as f64
    }
}

struct Media {
    /// Device waiting for the graph to be built
    device: Option<Box<dyn AudioOutput>>,
    graph: Option<Graph>,
    clip: Option<ActiveClip>,
}

impl Media {
    fn ensure_graph(&mut self, fft_size: usize) -> Result<&mut Graph, VoiceError> {
        if self.graph.is_none() {
            let output = self.device.take().ok_or_else(|| {
                VoiceError::PlaybackDecodeFailure("Audio output has been closed".to_string())
            })?;
            debug!("Building playback graph on {}", output.name());
            self.graph = Some(Graph {
                output,
                analyzer: FrequencyAnalyzer::new(fft_size),
            });
        }
        self.graph.as_mut().ok_or_else(|| {
            VoiceError::PlaybackDecodeFailure("Audio output has been closed".to_string())
        })
    }
}

/// Plays one clip at a time through an owned output device
pub struct PlaybackSession {
    config: PlaybackConfig,
    loader: ClipLoader,
    events: mpsc::UnboundedSender<PlaybackEvent>,
    media: Arc<Mutex<Media>>,
    clock: Option<JoinHandle<()>>,
    next_id: u64,
    warmed_up: bool,
    destroyed: bool,
}

impl PlaybackSession {
    pub fn new(
        config: PlaybackConfig,
        output: Box<dyn AudioOutput>,
        loader: ClipLoader,
        events: mpsc::UnboundedSender<PlaybackEvent>,
    ) -> Self {
        info!("Playback session created (output: {})", output.name());
        Self {
            config,
            loader,
            events,
            media: Arc::new(Mutex::new(Media {
                device: Some(output),
                graph: None,
                clip: None,
            })),
            clock: None,
            next_id: 0,
            warmed_up: false,
            destroyed: false,
        }
    }

    pub fn loader(&self) -> &ClipLoader {
        &self.loader
    }

    /// Unlock the output with a near-silent blip
    ///
    /// Idempotent. Failures are logged, never returned.
    pub async fn warmup(&mut self) {
        if self.warmed_up || self.destroyed {
            return;
        }

        let mut media = self.media.lock().await;
        let graph = match media.ensure_graph(self.config.fft_size) {
            Ok(graph) => graph,
            Err(e) => {
                warn!("Audio warmup skipped: {}", e);
                return;
            }
        };

        match graph.output.unlock(&warmup_blip(), WARMUP_SAMPLE_RATE).await {
            Ok(()) => {
                self.warmed_up = true;
                info!("Audio output unlocked");
            }
            Err(e) => warn!("Audio warmup failed: {:#}", e),
        }
    }

    /// Load and play a reference from position 0
    pub async fn play(&mut self, audio: &AudioRef) -> Result<ClipId, VoiceError> {
        let clip = self.loader.load(audio).await?;
        self.start(clip).await
    }

    /// Synthesize, load and play `text`
    pub async fn fetch_and_play_speech(
        &mut self,
        pipeline: &dyn VoicePipeline,
        text: &str,
        voice: &VoiceParams,
    ) -> Result<(ClipId, Option<Vec<WordTiming>>), VoiceError> {
        let (clip, timings) = self.loader.load_speech(pipeline, text, voice).await?;
        let id = self.start(clip).await?;
        Ok((id, timings))
    }

    /// Play an already loaded clip, superseding whatever is playing
    pub async fn start(&mut self, clip: LoadedClip) -> Result<ClipId, VoiceError> {
        self.halt_clock();
        let blobs = self.loader.blobs().clone();

        let mut media = self.media.lock().await;
        if self.destroyed {
            if let Some(blob) = &clip.blob {
                blobs.revoke(blob);
            }
            return Err(VoiceError::PlaybackDecodeFailure(
                "Playback session has been destroyed".to_string(),
            ));
        }

        if let Some(previous) = media.clip.take() {
            if let Some(blob) = &previous.blob {
                if Some(blob) != clip.blob.as_ref() {
                    blobs.revoke(blob);
                }
            }
        }

        let graph = match media.ensure_graph(self.config.fft_size) {
            Ok(graph) => graph,
            Err(e) => {
                if let Some(blob) = &clip.blob {
                    blobs.revoke(blob);
                }
                return Err(e);
            }
        };
        graph.output.halt();
        graph.analyzer.reset();

        if let Err(e) = graph.output.begin(clip.audio.sample_rate).await {
            if let Some(blob) = &clip.blob {
                blobs.revoke(blob);
            }
            return Err(VoiceError::PlaybackDecodeFailure(format!(
                "Playback failed to start: {:#}",
                e
            )));
        }

        self.next_id += 1;
        let id = ClipId(self.next_id);
        info!(
            "Playing {} from {} ({:.1}s)",
            id,
            clip.source,
            clip.audio.duration_secs()
        );
        media.clip = Some(ActiveClip {
            id,
            audio: clip.audio,
            blob: clip.blob,
            position: 0,
            paused: false,
            ended: false,
        });
        drop(media);

        self.spawn_clock(id);
        Ok(id)
    }

    /// Freeze the clip at its current position and release the output
    pub async fn pause(&mut self) {
        self.halt_clock();
        let mut media = self.media.lock().await;
        let Media { graph, clip, .. } = &mut *media;

        let Some(clip) = clip.as_mut() else {
            return;
        };
        if clip.ended || clip.paused {
            return;
        }
        clip.paused = true;
        if let Some(graph) = graph.as_mut() {
            graph.output.halt();
        }
        debug!("{} paused at {:.2}s", clip.id, clip.current_time());
    }

    /// Continue a paused clip; the output is restarted first
    pub async fn resume(&mut self) {
        let id = {
            let mut media = self.media.lock().await;
            let Media { graph, clip, .. } = &mut *media;

            let (Some(graph), Some(clip)) = (graph.as_mut(), clip.as_mut()) else {
                return;
            };
            if !clip.paused || clip.ended {
                return;
            }
            if let Err(e) = graph.output.begin(clip.audio.sample_rate).await {
                warn!("{}: output refused to resume: {:#}", clip.id, e);
                return;
            }
            clip.paused = false;
            debug!("{} resumed at {:.2}s", clip.id, clip.current_time());
            clip.id
        };
        self.spawn_clock(id);
    }

    /// Stop rendering, release the clip's blob and unload it
    ///
    /// A stopped clip cannot be resumed; progress reads 0 afterwards.
    pub async fn stop(&mut self) {
        self.halt_clock();
        let mut media = self.media.lock().await;
        let Media { graph, clip, .. } = &mut *media;

        if let Some(graph) = graph.as_mut() {
            graph.output.halt();
            graph.analyzer.reset();
        }
        if let Some(clip) = clip.take() {
            if let Some(blob) = &clip.blob {
                self.loader.blobs().revoke(blob);
            }
            debug!("{} stopped", clip.id);
        }
    }

    /// Fraction played, or 0 when nothing is loaded
    pub async fn progress(&self) -> f64 {
        let media = self.media.lock().await;
        media.clip.as_ref().map(ActiveClip::fraction).unwrap_or(0.0)
    }

    pub async fn is_playing(&self) -> bool {
        let media = self.media.lock().await;
        media
            .clip
            .as_ref()
            .map(|c| !c.paused && !c.ended)
            .unwrap_or(false)
    }

    pub fn live_blob_refs(&self) -> usize {
        self.loader.blobs().live_count()
    }

    /// Release the graph, close the output and revoke every blob
    pub async fn destroy(&mut self) {
        if self.destroyed {
            return;
        }
        self.halt_clock();
        self.destroyed = true;

        let mut media = self.media.lock().await;
        media.clip = None;
        let revoked = self.loader.blobs().revoke_all();

        if let Some(mut graph) = media.graph.take() {
            graph.output.halt();
            if let Err(e) = graph.output.close().await {
                warn!("Failed to close audio output: {:#}", e);
            }
        }
        media.device = None;

        info!("Playback session destroyed ({} blob references revoked)", revoked);
    }

    fn halt_clock(&mut self) {
        if let Some(clock) = self.clock.take() {
            clock.abort();
        }
    }

    fn spawn_clock(&mut self, id: ClipId) {
        self.halt_clock();
        self.clock = Some(tokio::spawn(run_clock(
            id,
            Arc::clone(&self.media),
            self.events.clone(),
            self.config.frame_interval(),
            self.config.time_update_interval(),
        )));
    }
}

impl Drop for PlaybackSession {
    fn drop(&mut self) {
        self.halt_clock();
    }
}

/// Render the clip in real time until it ends, is paused or is superseded
async fn run_clock(
    id: ClipId,
    media: Arc<Mutex<Media>>,
    events: mpsc::UnboundedSender<PlaybackEvent>,
    frame_interval: Duration,
    time_update_interval: Duration,
) {
    let mut frames = tokio::time::interval(frame_interval);
    frames.set_missed_tick_behavior(MissedTickBehavior::Skip);

    let segment_start = Instant::now();
    let mut segment_base = None;
    let mut last_update = segment_start;

    loop {
        frames.tick().await;
        let now = Instant::now();

        let mut media = media.lock().await;
        let Media { graph, clip, .. } = &mut *media;
        let (Some(graph), Some(clip)) = (graph.as_mut(), clip.as_mut()) else {
            break;
        };
        if clip.id != id || clip.paused || clip.ended {
            break;
        }

        let total = clip.audio.samples.len();
        let duration = clip.audio.duration_secs();
        let base = *segment_base.get_or_insert(clip.position);
        let elapsed = now.duration_since(segment_start).as_secs_f64();
        let target = (base + (elapsed * clip.audio.sample_rate as f64).round() as usize).min(total);

        if target > clip.position {
            let block = &clip.audio.samples[clip.position..target];
            if let Err(e) = graph.output.render(block) {
                warn!("{}: output render failed: {:#}", id, e);
            }
            graph.analyzer.push(block);
            clip.position = target;
        }

        let _ = events.send(PlaybackEvent::Frequency {
            clip: id,
            sample: graph.analyzer.sample(),
        });

        if clip.position >= total {
            clip.ended = true;
            graph.output.halt();
            let _ = events.send(PlaybackEvent::Progress {
                clip: id,
                fraction: 1.0,
                current_time: duration,
                duration,
            });
            let _ = events.send(PlaybackEvent::Ended { clip: id });
            info!("{} ended", id);
            break;
        }

        if now.duration_since(last_update) >= time_update_interval {
            last_update = now;
            let _ = events.send(PlaybackEvent::Progress {
                clip: id,
                fraction: clip.fraction(),
                current_time: clip.current_time(),
                duration,
            });
        }
    }
}

/// 10ms, 440Hz sine at near-zero gain
fn warmup_blip() -> Vec<f32> {
    let len = (WARMUP_SAMPLE_RATE as u128 * WARMUP_DURATION.as_millis() / 1000) as usize;
    (0..len)
        .map(|i| {
            WARMUP_GAIN * (2.0 * PI * WARMUP_FREQUENCY * i as f32 / WARMUP_SAMPLE_RATE as f32).sin()
        })
        .collect()
}
