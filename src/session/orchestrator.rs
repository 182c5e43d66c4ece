use anyhow::Result;
use serde::Serialize;
use std::sync::Arc;
use tokio::sync::{broadcast, mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use super::config::OrchestratorConfig;
use super::context::{ConversationContext, ConversationTurn, SessionIdentity};
use super::events::{SessionState, VoiceEvent};
use crate::audio::{AudioOutput, Microphone};
use crate::capture::{CaptureConfig, CaptureEvent, CaptureSession, RecordingId};
use crate::error::VoiceError;
use crate::pipeline::{Reply, Transcription, VoicePipeline, WordTiming};
use crate::playback::{
    AudioRef, BlobStore, ClipId, ClipLoader, LoadedClip, MediaFetcher, PlaybackConfig,
    PlaybackEvent, PlaybackSession,
};

/// Audio hardware and media access handed to an orchestrator
pub struct AudioDevices {
    pub microphone: Box<dyn Microphone>,
    pub output: Box<dyn AudioOutput>,
    pub fetcher: Arc<dyn MediaFetcher>,
    /// Registry for blob references created while loading clips
    pub blobs: BlobStore,
    pub capture: CaptureConfig,
    pub playback: PlaybackConfig,
}

/// Point-in-time view of an orchestrator
#[derive(Debug, Clone, Serialize)]
pub struct SessionSnapshot {
    pub state: SessionState,
    pub turns: usize,
    pub welcome_played: bool,
}

type Ack = oneshot::Sender<()>;

enum Command {
    Warmup(Ack),
    PlayWelcome(Ack),
    PlayAudio(AudioRef, Ack),
    StartRecording(Ack),
    StopRecording(Ack),
    Stop(Ack),
    Reset(Ack),
    Destroy(Ack),
    History(oneshot::Sender<Vec<ConversationTurn>>),
    Snapshot(oneshot::Sender<SessionSnapshot>),
}

/// Results of work running outside the actor, tagged with the epoch it was started in
enum Completion {
    RecordingTimeout {
        epoch: u64,
        recording: RecordingId,
    },
    Transcribed {
        epoch: u64,
        result: Result<Transcription, VoiceError>,
    },
    Replied {
        epoch: u64,
        result: Result<Reply, VoiceError>,
    },
    ClipLoaded {
        epoch: u64,
        result: Result<(LoadedClip, Option<Vec<WordTiming>>), VoiceError>,
    },
}

impl Completion {
    fn epoch(&self) -> u64 {
        match self {
            Completion::RecordingTimeout { epoch, .. }
            | Completion::Transcribed { epoch, .. }
            | Completion::Replied { epoch, .. }
            | Completion::ClipLoaded { epoch, .. } => *epoch,
        }
    }
}

/// What to load once a clip is needed
enum ClipJob {
    Audio(AudioRef),
    Speech(String),
}

/// Handle to a conversation orchestrator
///
/// Cloning is cheap; every clone drives the same conversation. Operations
/// called from a state where they are not legal are logged and ignored.
#[derive(Clone)]
pub struct VoiceOrchestrator {
    commands: mpsc::UnboundedSender<Command>,
    state: watch::Receiver<SessionState>,
    events: broadcast::Sender<VoiceEvent>,
    identity: SessionIdentity,
}

impl VoiceOrchestrator {
    /// Validate the configuration and start the orchestrator task
    pub fn spawn(
        config: OrchestratorConfig,
        identity: SessionIdentity,
        devices: AudioDevices,
        pipeline: Arc<dyn VoicePipeline>,
    ) -> Result<Self> {
        config.validate()?;

        let (commands_tx, commands_rx) = mpsc::unbounded_channel();
        let (completions_tx, completions_rx) = mpsc::unbounded_channel();
        let (capture_tx, capture_rx) = mpsc::unbounded_channel();
        let (playback_tx, playback_rx) = mpsc::unbounded_channel();
        let (state_tx, state_rx) = watch::channel(SessionState::Idle);
        let (events_tx, _) = broadcast::channel(config.event_capacity);

        let capture_config = CaptureConfig {
            platform: config.platform,
            ..devices.capture
        };
        let capture = CaptureSession::new(capture_config, devices.microphone, capture_tx);

        let loader = ClipLoader::new(devices.fetcher, devices.blobs);
        let playback =
            PlaybackSession::new(devices.playback, devices.output, loader.clone(), playback_tx);

        info!(
            "Orchestrator {} starting (agent: {}, pipeline: {}, platform: {:?})",
            identity.session_id,
            identity.agent_identity,
            pipeline.name(),
            config.platform
        );

        let actor = Actor {
            config,
            state: SessionState::Idle,
            state_tx,
            events: events_tx.clone(),
            context: ConversationContext::new(identity.clone()),
            capture,
            playback,
            pipeline,
            loader,
            completions: completions_tx,
            epoch: 0,
            job: None,
            timer: None,
            recording: None,
            clip: None,
            prompt: None,
            welcome_played: false,
            destroyed: false,
        };
        tokio::spawn(actor.run(commands_rx, completions_rx, capture_rx, playback_rx));

        Ok(Self {
            commands: commands_tx,
            state: state_rx,
            events: events_tx,
            identity,
        })
    }

    pub fn identity(&self) -> &SessionIdentity {
        &self.identity
    }

    pub fn state(&self) -> SessionState {
        *self.state.borrow()
    }

    pub fn watch_state(&self) -> watch::Receiver<SessionState> {
        self.state.clone()
    }

    pub fn subscribe(&self) -> broadcast::Receiver<VoiceEvent> {
        self.events.subscribe()
    }

    /// True once `destroy` has completed
    pub fn is_destroyed(&self) -> bool {
        self.commands.is_closed()
    }

    /// Unlock platform audio; call from a user gesture
    pub async fn warmup(&self) {
        self.call("warmup", Command::Warmup).await;
    }

    pub async fn play_welcome(&self) {
        self.call("play_welcome", Command::PlayWelcome).await;
    }

    /// Play externally obtained audio, interrupting whatever is active
    pub async fn play_audio(&self, audio: AudioRef) {
        self.call("play_audio", |ack| Command::PlayAudio(audio, ack))
            .await;
    }

    pub async fn start_recording(&self) {
        self.call("start_recording", Command::StartRecording).await;
    }

    pub async fn stop_recording(&self) {
        self.call("stop_recording", Command::StopRecording).await;
    }

    /// Cancel everything and return to idle
    pub async fn stop(&self) {
        self.call("stop", Command::Stop).await;
    }

    /// Stop and forget the conversation
    pub async fn reset(&self) {
        self.call("reset", Command::Reset).await;
    }

    /// Stop and release every resource; the orchestrator is unusable afterwards
    pub async fn destroy(&self) {
        self.call("destroy", Command::Destroy).await;
    }

    pub async fn history(&self) -> Vec<ConversationTurn> {
        let (tx, rx) = oneshot::channel();
        if self.commands.send(Command::History(tx)).is_err() {
            return Vec::new();
        }
        rx.await.unwrap_or_default()
    }

    pub async fn snapshot(&self) -> SessionSnapshot {
        let (tx, rx) = oneshot::channel();
        let fallback = SessionSnapshot {
            state: self.state(),
            turns: 0,
            welcome_played: false,
        };
        if self.commands.send(Command::Snapshot(tx)).is_err() {
            return fallback;
        }
        rx.await.unwrap_or(fallback)
    }

    async fn call(&self, op: &str, command: impl FnOnce(Ack) -> Command) {
        let (tx, rx) = oneshot::channel();
        if self.commands.send(command(tx)).is_err() {
            warn!("{} ignored: orchestrator has been destroyed", op);
            return;
        }
        let _ = rx.await;
    }
}

/// Exclusive owner of the sessions and the conversation
struct Actor {
    config: OrchestratorConfig,
    state: SessionState,
    state_tx: watch::Sender<SessionState>,
    events: broadcast::Sender<VoiceEvent>,
    context: ConversationContext,
    capture: CaptureSession,
    playback: PlaybackSession,
    pipeline: Arc<dyn VoicePipeline>,
    loader: ClipLoader,
    completions: mpsc::UnboundedSender<Completion>,
    /// Bumped on every hard cancel; completions from older epochs are dropped
    epoch: u64,
    /// In-flight pipeline stage or clip load
    job: Option<JoinHandle<()>>,
    /// Recording ceiling
    timer: Option<JoinHandle<()>>,
    recording: Option<RecordingId>,
    clip: Option<ClipId>,
    /// Transcribed user text awaiting a reply; joins history with it
    prompt: Option<String>,
    welcome_played: bool,
    destroyed: bool,
}

impl Actor {
    async fn run(
        mut self,
        mut commands: mpsc::UnboundedReceiver<Command>,
        mut completions: mpsc::UnboundedReceiver<Completion>,
        mut capture_events: mpsc::UnboundedReceiver<CaptureEvent>,
        mut playback_events: mpsc::UnboundedReceiver<PlaybackEvent>,
    ) {
        loop {
            tokio::select! {
                command = commands.recv() => match command {
                    Some(command) => self.handle(command).await,
                    None => {
                        info!("All handles dropped, shutting down {}", self.context.identity.session_id);
                        self.teardown().await;
                    }
                },
                Some(completion) = completions.recv() => self.complete(completion).await,
                Some(event) = capture_events.recv() => self.on_capture_event(event),
                Some(event) = playback_events.recv() => self.on_playback_event(event),
            }

            if self.destroyed {
                break;
            }
        }
        debug!("Orchestrator {} task exited", self.context.identity.session_id);
    }

    async fn handle(&mut self, command: Command) {
        match command {
            Command::Warmup(ack) => {
                self.playback.warmup().await;
                let _ = ack.send(());
            }
            Command::PlayWelcome(ack) => {
                self.play_welcome().await;
                let _ = ack.send(());
            }
            Command::PlayAudio(audio, ack) => {
                self.play_audio(audio).await;
                let _ = ack.send(());
            }
            Command::StartRecording(ack) => {
                self.start_recording().await;
                let _ = ack.send(());
            }
            Command::StopRecording(ack) => {
                self.stop_recording().await;
                let _ = ack.send(());
            }
            Command::Stop(ack) => {
                self.halt().await;
                self.set_state(SessionState::Idle);
                let _ = ack.send(());
            }
            Command::Reset(ack) => {
                self.halt().await;
                self.context.clear();
                self.welcome_played = false;
                self.set_state(SessionState::Idle);
                info!("Conversation reset");
                let _ = ack.send(());
            }
            Command::Destroy(ack) => {
                self.teardown().await;
                let _ = ack.send(());
            }
            Command::History(reply) => {
                let _ = reply.send(self.context.history().to_vec());
            }
            Command::Snapshot(reply) => {
                let _ = reply.send(SessionSnapshot {
                    state: self.state,
                    turns: self.context.history().len(),
                    welcome_played: self.welcome_played,
                });
            }
        }
    }

    async fn play_welcome(&mut self) {
        if self.state != SessionState::Idle {
            warn!("Cannot play welcome, state is: {}", self.state);
            return;
        }

        let Some(message) = self.config.welcome().map(str::to_string) else {
            info!("No welcome message, going to ready");
            self.set_state(SessionState::Ready);
            return;
        };

        self.playback.warmup().await;
        self.set_state(SessionState::Playing);
        self.welcome_played = true;
        self.spawn_clip(ClipJob::Speech(message));
    }

    async fn play_audio(&mut self, audio: AudioRef) {
        self.halt().await;
        self.set_state(SessionState::Playing);
        self.spawn_clip(ClipJob::Audio(audio));
    }

    async fn start_recording(&mut self) {
        if !matches!(self.state, SessionState::Ready | SessionState::Idle) {
            warn!("Cannot start recording, state is: {}", self.state);
            return;
        }

        if self.config.platform.requires_unlock() {
            self.playback.warmup().await;
        }

        self.set_state(SessionState::Recording);
        let recording = match self.capture.start().await {
            Ok(recording) => recording,
            Err(e) => {
                self.fail(e);
                return;
            }
        };
        self.recording = Some(recording);

        let ceiling = self.config.max_recording_duration();
        let completions = self.completions.clone();
        let epoch = self.epoch;
        self.timer = Some(tokio::spawn(async move {
            tokio::time::sleep(ceiling).await;
            let _ = completions.send(Completion::RecordingTimeout { epoch, recording });
        }));
    }

    async fn stop_recording(&mut self) {
        if self.state != SessionState::Recording {
            warn!("Cannot stop recording, state is: {}", self.state);
            return;
        }

        if let Some(timer) = self.timer.take() {
            timer.abort();
        }
        self.recording = None;
        self.set_state(SessionState::Processing);

        let recording = match self.capture.stop().await {
            Ok(recording) => recording,
            Err(e) => {
                self.fail(e);
                return;
            }
        };

        info!(
            "Transcribing {:.1}s of audio ({} bytes)",
            recording.duration_secs(),
            recording.payload.len()
        );

        let pipeline = Arc::clone(&self.pipeline);
        let identity = self.context.identity.clone();
        let completions = self.completions.clone();
        let epoch = self.epoch;
        self.replace_job(tokio::spawn(async move {
            let result = pipeline
                .transcribe(&recording, &identity)
                .await
                .map_err(|e| VoiceError::TranscriptionFailure(format!("{:#}", e)));
            let _ = completions.send(Completion::Transcribed { epoch, result });
        }));
    }

    async fn complete(&mut self, completion: Completion) {
        if completion.epoch() != self.epoch {
            debug!("Discarding completion from cancelled epoch {}", completion.epoch());
            self.discard(completion);
            return;
        }

        match completion {
            Completion::RecordingTimeout { recording, .. } => {
                if self.recording == Some(recording) && self.state == SessionState::Recording {
                    info!(
                        "Max recording duration reached ({}ms), stopping {}",
                        self.config.max_recording_duration_ms, recording
                    );
                    self.timer = None;
                    self.stop_recording().await;
                }
            }
            Completion::Transcribed { result, .. } => {
                self.job = None;
                if self.state != SessionState::Processing {
                    return;
                }
                match result {
                    Ok(transcription) => self.on_transcription(transcription),
                    Err(e) => self.fail(e),
                }
            }
            Completion::Replied { result, .. } => {
                self.job = None;
                if self.state != SessionState::Processing {
                    return;
                }
                match result {
                    Ok(reply) => self.on_reply(reply),
                    Err(e) => self.fail(e),
                }
            }
            Completion::ClipLoaded { result, .. } => {
                self.job = None;
                if !matches!(self.state, SessionState::Processing | SessionState::Playing) {
                    self.discard(Completion::ClipLoaded { epoch: self.epoch, result });
                    return;
                }
                match result {
                    Ok((clip, timings)) => self.on_clip_loaded(clip, timings).await,
                    Err(e) => self.fail(e),
                }
            }
        }
    }

    /// Release whatever a dropped completion was holding
    fn discard(&self, completion: Completion) {
        if let Completion::ClipLoaded {
            result: Ok((clip, _)),
            ..
        } = completion
        {
            if let Some(blob) = &clip.blob {
                self.loader.blobs().revoke(blob);
            }
        }
    }

    fn on_transcription(&mut self, transcription: Transcription) {
        let text = transcription.text.trim().to_string();
        if text.is_empty() {
            self.fail(VoiceError::TranscriptionFailure(
                "No speech detected in recording".to_string(),
            ));
            return;
        }

        info!("Transcription: {}", text);
        self.emit(VoiceEvent::Transcription { text: text.clone() });
        self.prompt = Some(text.clone());

        let pipeline = Arc::clone(&self.pipeline);
        let identity = self.context.identity.clone();
        let mut history = self.context.history().to_vec();
        history.push(ConversationTurn::user(text.clone()));
        let completions = self.completions.clone();
        let epoch = self.epoch;
        self.replace_job(tokio::spawn(async move {
            let result = pipeline
                .converse(&text, &history, &identity)
                .await
                .map_err(|e| VoiceError::ResponseFailure(format!("{:#}", e)));
            let _ = completions.send(Completion::Replied { epoch, result });
        }));
    }

    fn on_reply(&mut self, reply: Reply) {
        let text = reply.text.trim().to_string();
        if text.is_empty() {
            self.fail(VoiceError::ResponseFailure(
                "Assistant returned an empty response".to_string(),
            ));
            return;
        }

        info!("Response: {}", text);
        if let Some(prompt) = self.prompt.take() {
            self.context.push(ConversationTurn::user(prompt));
        }
        self.context
            .push(ConversationTurn::assistant(text.clone(), reply.audio.clone()));
        self.emit(VoiceEvent::Response {
            text: text.clone(),
            audio: reply.audio.clone(),
        });

        match reply.audio {
            // Ready-made speech: synthesis is skipped entirely
            Some(audio) => {
                debug!("Reply carries audio, skipping synthesis");
                self.spawn_clip(ClipJob::Audio(audio));
            }
            None if self.config.speak_responses => self.spawn_clip(ClipJob::Speech(text)),
            None => self.set_state(SessionState::Ready),
        }
    }

    async fn on_clip_loaded(&mut self, clip: LoadedClip, timings: Option<Vec<WordTiming>>) {
        match self.playback.start(clip).await {
            Ok(id) => {
                self.clip = Some(id);
                if let Some(timings) = timings {
                    self.emit(VoiceEvent::SpeechTimings { timings });
                }
                self.set_state(SessionState::Playing);
            }
            Err(e) => self.fail(e),
        }
    }

    fn spawn_clip(&mut self, job: ClipJob) {
        let loader = self.loader.clone();
        let pipeline = Arc::clone(&self.pipeline);
        let voice = self.config.voice.clone();
        let completions = self.completions.clone();
        let epoch = self.epoch;
        self.replace_job(tokio::spawn(async move {
            let result = match job {
                ClipJob::Audio(audio) => loader.load(&audio).await.map(|clip| (clip, None)),
                ClipJob::Speech(text) => loader.load_speech(pipeline.as_ref(), &text, &voice).await,
            };
            let _ = completions.send(Completion::ClipLoaded { epoch, result });
        }));
    }

    fn on_capture_event(&mut self, event: CaptureEvent) {
        match event {
            CaptureEvent::Duration { recording, seconds } if self.recording == Some(recording) => {
                self.emit(VoiceEvent::RecordingDuration { seconds });
            }
            CaptureEvent::Frequency { recording, sample } if self.recording == Some(recording) => {
                self.emit(VoiceEvent::FrequencyData { bins: sample });
            }
            _ => {}
        }
    }

    fn on_playback_event(&mut self, event: PlaybackEvent) {
        match event {
            PlaybackEvent::Frequency { clip, sample } if self.clip == Some(clip) => {
                self.emit(VoiceEvent::FrequencyData { bins: sample });
            }
            PlaybackEvent::Progress {
                clip,
                fraction,
                current_time,
                duration,
            } if self.clip == Some(clip) => {
                self.emit(VoiceEvent::PlaybackProgress {
                    fraction,
                    current_time,
                    duration,
                });
            }
            PlaybackEvent::Ended { clip } if self.clip == Some(clip) => {
                self.clip = None;
                if self.state == SessionState::Playing {
                    self.set_state(SessionState::Ready);
                }
            }
            _ => {}
        }
    }

    /// Cancel in-flight work and release capture and playback resources
    async fn halt(&mut self) {
        self.epoch += 1;
        if let Some(job) = self.job.take() {
            job.abort();
        }
        if let Some(timer) = self.timer.take() {
            timer.abort();
        }
        self.recording = None;
        self.clip = None;
        self.prompt = None;
        self.capture.cancel();
        self.playback.stop().await;
    }

    async fn teardown(&mut self) {
        if self.destroyed {
            return;
        }
        self.halt().await;
        self.capture.destroy();
        self.playback.destroy().await;
        self.set_state(SessionState::Idle);
        self.destroyed = true;
        info!("Orchestrator {} destroyed", self.context.identity.session_id);
    }

    fn replace_job(&mut self, job: JoinHandle<()>) {
        if let Some(previous) = self.job.replace(job) {
            previous.abort();
        }
    }

    fn fail(&mut self, err: VoiceError) {
        error!("{}", err);
        self.emit(VoiceEvent::Error { error: err });
        self.set_state(SessionState::Ready);
    }

    fn set_state(&mut self, state: SessionState) {
        if self.state == state {
            return;
        }
        info!("State: {} -> {}", self.state, state);
        self.state = state;
        self.state_tx.send_replace(state);
        self.emit(VoiceEvent::StateChanged { state });
    }

    fn emit(&self, event: VoiceEvent) {
        // No subscribers is fine
        let _ = self.events.send(event);
    }
}
