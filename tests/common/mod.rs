// Shared fakes for integration tests
//
// A synthetic microphone that counts live tracks, an output that records what
// it was asked to do, and a scripted pipeline that records every call.

#![allow(dead_code)]

use anyhow::{bail, Result};
use std::io::Cursor;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::mpsc;
use voice_turns::audio::{
    AudioFrame, AudioOutput, CaptureConstraints, Microphone, MicrophoneError, MicrophoneStream,
    MicrophoneTrack, PermissionState,
};
use voice_turns::capture::{CaptureConfig, RecordingResult};
use voice_turns::pipeline::{Reply, Speech, Transcription, VoiceParams, VoicePipeline, WordTiming};
use voice_turns::playback::{AudioRef, BlobStore, FetchedMedia, MediaFetcher, PlaybackConfig};
use voice_turns::session::{
    AudioDevices, ConversationTurn, OrchestratorConfig, SessionIdentity, SessionState, VoiceEvent,
    VoiceOrchestrator,
};
use voice_turns::VoiceError;

pub const FRAME_MS: u64 = 20;

/// 16-bit mono WAV holding a 440Hz tone
pub fn tone_wav(seconds: f64, sample_rate: u32) -> Vec<u8> {
    let spec = hound::WavSpec {
        channels: 1,
        sample_rate,
        bits_per_sample: 16,
        sample_format: hound::SampleFormat::Int,
    };
    let mut cursor = Cursor::new(Vec::new());
    {
        let mut writer = hound::WavWriter::new(&mut cursor, spec).unwrap();
        let total = (seconds * sample_rate as f64) as usize;
        for i in 0..total {
            let t = i as f32 / sample_rate as f32;
            let s = (t * 440.0 * 2.0 * std::f32::consts::PI).sin() * 8000.0;
            writer.write_sample(s as i16).unwrap();
        }
        writer.finalize().unwrap();
    }
    cursor.into_inner()
}

// ============================================================================
// Microphone
// ============================================================================

/// Counters shared between a fake microphone and the test
#[derive(Clone, Default)]
pub struct MicProbe {
    pub live: Arc<AtomicUsize>,
    pub opens: Arc<AtomicUsize>,
}

impl MicProbe {
    pub fn live(&self) -> usize {
        self.live.load(Ordering::SeqCst)
    }

    pub fn opens(&self) -> usize {
        self.opens.load(Ordering::SeqCst)
    }
}

/// Microphone producing a 440Hz tone in 20ms frames until its track stops
pub struct FakeMicrophone {
    probe: MicProbe,
    deny: bool,
}

impl FakeMicrophone {
    pub fn new() -> (Self, MicProbe) {
        let probe = MicProbe::default();
        (
            Self {
                probe: probe.clone(),
                deny: false,
            },
            probe,
        )
    }

    pub fn denied() -> (Self, MicProbe) {
        let (mut mic, probe) = Self::new();
        mic.deny = true;
        (mic, probe)
    }
}

struct FakeTrack {
    live: Arc<AtomicBool>,
    counter: Arc<AtomicUsize>,
}

impl MicrophoneTrack for FakeTrack {
    fn stop(&mut self) {
        if self.live.swap(false, Ordering::SeqCst) {
            self.counter.fetch_sub(1, Ordering::SeqCst);
        }
    }

    fn is_live(&self) -> bool {
        self.live.load(Ordering::SeqCst)
    }
}

impl Drop for FakeTrack {
    fn drop(&mut self) {
        self.stop();
    }
}

#[async_trait::async_trait]
impl Microphone for FakeMicrophone {
    async fn permission(&self) -> PermissionState {
        if self.deny {
            PermissionState::Denied
        } else {
            PermissionState::Granted
        }
    }

    async fn open(
        &mut self,
        constraints: &CaptureConstraints,
    ) -> Result<MicrophoneStream, MicrophoneError> {
        if self.deny {
            return Err(MicrophoneError::NotAllowed("user dismissed prompt".to_string()));
        }

        self.probe.opens.fetch_add(1, Ordering::SeqCst);
        self.probe.live.fetch_add(1, Ordering::SeqCst);

        let live = Arc::new(AtomicBool::new(true));
        let (tx, rx) = mpsc::channel(256);
        let sample_rate = constraints.sample_rate;
        let frame_len = (sample_rate as u64 * FRAME_MS / 1000) as usize;

        let task_live = Arc::clone(&live);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(Duration::from_millis(FRAME_MS));
            let mut index = 0u64;
            loop {
                ticker.tick().await;
                if !task_live.load(Ordering::SeqCst) {
                    break;
                }
                let samples = (0..frame_len)
                    .map(|i| {
                        let n = index as usize * frame_len + i;
                        let t = n as f32 / sample_rate as f32;
                        ((t * 440.0 * 2.0 * std::f32::consts::PI).sin() * 8000.0) as i16
                    })
                    .collect();
                let frame = AudioFrame {
                    samples,
                    sample_rate,
                    channels: 1,
                    timestamp_ms: index * FRAME_MS,
                };
                if tx.send(frame).await.is_err() {
                    break;
                }
                index += 1;
            }
        });

        Ok(MicrophoneStream {
            frames: rx,
            track: Box::new(FakeTrack {
                live,
                counter: Arc::clone(&self.probe.live),
            }),
            sample_rate,
            channels: 1,
        })
    }

    fn name(&self) -> &str {
        "fake"
    }
}

// ============================================================================
// Output
// ============================================================================

#[derive(Debug, Default)]
pub struct OutputLog {
    pub begins: Vec<u32>,
    pub rendered: usize,
    pub halts: usize,
    pub unlocks: usize,
    pub closed: bool,
}

/// Output that records what it was asked to do
#[derive(Clone, Default)]
pub struct RecordingOutput {
    pub log: Arc<Mutex<OutputLog>>,
    pub reject_begin: bool,
}

impl RecordingOutput {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn snapshot<T>(&self, f: impl FnOnce(&OutputLog) -> T) -> T {
        f(&self.log.lock().unwrap())
    }
}

#[async_trait::async_trait]
impl AudioOutput for RecordingOutput {
    async fn begin(&mut self, sample_rate: u32) -> Result<()> {
        if self.reject_begin {
            bail!("autoplay blocked");
        }
        self.log.lock().unwrap().begins.push(sample_rate);
        Ok(())
    }

    fn render(&mut self, samples: &[f32]) -> Result<()> {
        self.log.lock().unwrap().rendered += samples.len();
        Ok(())
    }

    fn halt(&mut self) {
        self.log.lock().unwrap().halts += 1;
    }

    async fn unlock(&mut self, _blip: &[f32], _sample_rate: u32) -> Result<()> {
        self.log.lock().unwrap().unlocks += 1;
        Ok(())
    }

    async fn close(&mut self) -> Result<()> {
        self.log.lock().unwrap().closed = true;
        Ok(())
    }

    fn name(&self) -> &str {
        "recording"
    }
}

/// Fetcher serving one WAV payload for any URL
pub struct StaticFetcher {
    pub bytes: Vec<u8>,
}

#[async_trait::async_trait]
impl MediaFetcher for StaticFetcher {
    async fn fetch(&self, _url: &str) -> Result<FetchedMedia> {
        Ok(FetchedMedia {
            bytes: self.bytes.clone(),
            mime_type: Some("audio/wav".to_string()),
        })
    }
}

// ============================================================================
// Pipeline
// ============================================================================

/// Pipeline answering from a script and recording every call
pub struct ScriptedPipeline {
    /// `Err` makes transcription fail
    pub transcript: Mutex<Result<String, String>>,
    pub reply_text: Mutex<Result<String, String>>,
    pub reply_audio: Mutex<Option<AudioRef>>,
    pub fail_synthesis: AtomicBool,
    pub speech_seconds: f64,
    pub word_timings: Option<Vec<WordTiming>>,
    /// Delay before every stage answers
    pub delay: Duration,
    pub calls: Mutex<Vec<&'static str>>,
    /// History lengths seen by `converse`
    pub converse_history: Mutex<Vec<Vec<ConversationTurn>>>,
}

impl ScriptedPipeline {
    pub fn new(transcript: &str, reply: &str) -> Self {
        Self {
            transcript: Mutex::new(Ok(transcript.to_string())),
            reply_text: Mutex::new(Ok(reply.to_string())),
            reply_audio: Mutex::new(None),
            fail_synthesis: AtomicBool::new(false),
            speech_seconds: 0.5,
            word_timings: None,
            delay: Duration::from_millis(50),
            calls: Mutex::new(Vec::new()),
            converse_history: Mutex::new(Vec::new()),
        }
    }

    pub fn calls(&self) -> Vec<&'static str> {
        self.calls.lock().unwrap().clone()
    }
}

#[async_trait::async_trait]
impl VoicePipeline for ScriptedPipeline {
    async fn transcribe(
        &self,
        recording: &RecordingResult,
        _identity: &SessionIdentity,
    ) -> Result<Transcription> {
        self.calls.lock().unwrap().push("transcribe");
        assert!(!recording.payload.is_empty());
        tokio::time::sleep(self.delay).await;
        let script = self.transcript.lock().unwrap().clone();
        match script {
            Ok(text) => Ok(Transcription { text }),
            Err(e) => bail!(e),
        }
    }

    async fn converse(
        &self,
        _text: &str,
        history: &[ConversationTurn],
        _identity: &SessionIdentity,
    ) -> Result<Reply> {
        self.calls.lock().unwrap().push("converse");
        self.converse_history.lock().unwrap().push(history.to_vec());
        tokio::time::sleep(self.delay).await;
        let script = self.reply_text.lock().unwrap().clone();
        match script {
            Ok(text) => Ok(Reply {
                text,
                audio: self.reply_audio.lock().unwrap().clone(),
            }),
            Err(e) => bail!(e),
        }
    }

    async fn synthesize(&self, _text: &str, _voice: &VoiceParams) -> Result<Speech> {
        self.calls.lock().unwrap().push("synthesize");
        tokio::time::sleep(self.delay).await;
        if self.fail_synthesis.load(Ordering::SeqCst) {
            bail!("voice unavailable");
        }
        Ok(Speech {
            audio: AudioRef::binary(tone_wav(self.speech_seconds, 16000)),
            word_timings: self.word_timings.clone(),
        })
    }

    fn name(&self) -> &str {
        "scripted"
    }
}

// ============================================================================
// Orchestrator harness
// ============================================================================

/// Records every non-frequency event in order
#[derive(Clone, Default)]
pub struct EventLog {
    events: Arc<Mutex<Vec<VoiceEvent>>>,
}

impl EventLog {
    pub fn attach(orchestrator: &VoiceOrchestrator) -> Self {
        let log = Self::default();
        let events = Arc::clone(&log.events);
        let mut rx = orchestrator.subscribe();
        tokio::spawn(async move {
            loop {
                match rx.recv().await {
                    Ok(event) if event.is_frequency() => {}
                    Ok(event) => events.lock().unwrap().push(event),
                    Err(tokio::sync::broadcast::error::RecvError::Lagged(n)) => {
                        panic!("event log lagged by {}", n)
                    }
                    Err(_) => break,
                }
            }
        });
        log
    }

    pub fn all(&self) -> Vec<VoiceEvent> {
        self.events.lock().unwrap().clone()
    }

    pub fn states(&self) -> Vec<SessionState> {
        self.all()
            .into_iter()
            .filter_map(|e| match e {
                VoiceEvent::StateChanged { state } => Some(state),
                _ => None,
            })
            .collect()
    }

    pub fn errors(&self) -> Vec<VoiceError> {
        self.all()
            .into_iter()
            .filter_map(|e| match e {
                VoiceEvent::Error { error } => Some(error),
                _ => None,
            })
            .collect()
    }

    pub fn progress(&self) -> Vec<f64> {
        self.all()
            .into_iter()
            .filter_map(|e| match e {
                VoiceEvent::PlaybackProgress { fraction, .. } => Some(fraction),
                _ => None,
            })
            .collect()
    }
}

pub struct Harness {
    pub orchestrator: VoiceOrchestrator,
    pub mic: MicProbe,
    pub output: RecordingOutput,
    pub blobs: BlobStore,
    pub pipeline: Arc<ScriptedPipeline>,
    pub events: EventLog,
}

pub fn harness(config: OrchestratorConfig, pipeline: ScriptedPipeline) -> Harness {
    harness_with_mic(config, pipeline, FakeMicrophone::new())
}

pub fn harness_with_mic(
    config: OrchestratorConfig,
    pipeline: ScriptedPipeline,
    (microphone, mic): (FakeMicrophone, MicProbe),
) -> Harness {
    let output = RecordingOutput::new();
    let blobs = BlobStore::new();
    let pipeline = Arc::new(pipeline);

    let devices = AudioDevices {
        microphone: Box::new(microphone),
        output: Box::new(output.clone()),
        fetcher: Arc::new(StaticFetcher {
            bytes: tone_wav(0.5, 16000),
        }),
        blobs: blobs.clone(),
        capture: CaptureConfig::default(),
        playback: PlaybackConfig::default(),
    };

    let identity = SessionIdentity::new("device-test", config.agent_identity.clone());
    let orchestrator =
        VoiceOrchestrator::spawn(config, identity, devices, pipeline.clone()).unwrap();
    let events = EventLog::attach(&orchestrator);

    Harness {
        orchestrator,
        mic,
        output,
        blobs,
        pipeline,
        events,
    }
}

/// Wait (in virtual time) until the orchestrator reaches `target`
pub async fn wait_for_state(orchestrator: &VoiceOrchestrator, target: SessionState) {
    let mut rx = orchestrator.watch_state();
    tokio::time::timeout(Duration::from_secs(120), rx.wait_for(|s| *s == target))
        .await
        .unwrap_or_else(|_| panic!("timed out waiting for {}", target))
        .unwrap();
}

/// Let spawned tasks drain their queues
pub async fn settle() {
    tokio::time::sleep(Duration::from_millis(100)).await;
}
