use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast::error::RecvError;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;
use voice_turns::audio::{AudioFile, AudioOutput, NullOutput, WavFileMicrophone, WavFileOutput};
use voice_turns::config::PipelineTransport;
use voice_turns::http::OrchestratorFactory;
use voice_turns::{
    create_router, AppState, AudioDevices, BlobStore, Config, HttpFetcher, HttpVoicePipeline,
    NatsVoicePipeline, PlatformProfile, SessionIdentity, SessionState, VoiceEvent,
    VoiceOrchestrator, VoicePipeline,
};

#[derive(Parser)]
#[command(name = "voice-turns", version, about = "Turn-based voice conversations")]
struct Cli {
    /// Config file (extension optional)
    #[arg(short, long, default_value = "config/voice-turns")]
    config: String,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run the HTTP control API
    Serve,

    /// Run one headless turn from a WAV file
    Turn {
        /// WAV file used as the microphone
        #[arg(long)]
        input: PathBuf,

        /// Where the spoken reply is written
        #[arg(long)]
        output_dir: Option<PathBuf>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();
    let cfg = Config::load(&cli.config)?;

    info!("Voice Turns v{}", env!("CARGO_PKG_VERSION"));
    info!("Loaded config: {}", cfg.service.name);

    let pipeline = build_pipeline(&cfg).await?;

    match cli.command {
        Command::Serve => serve(cfg, pipeline).await,
        Command::Turn { input, output_dir } => {
            let output_dir = output_dir
                .or_else(|| cfg.audio.output_dir.clone().map(PathBuf::from))
                .context("No output directory configured")?;
            turn(cfg, pipeline, &input, &output_dir).await
        }
    }
}

async fn build_pipeline(cfg: &Config) -> Result<Arc<dyn VoicePipeline>> {
    Ok(match cfg.pipeline.transport {
        PipelineTransport::Http => Arc::new(HttpVoicePipeline::new(cfg.pipeline.http.clone())?),
        PipelineTransport::Nats => Arc::new(
            NatsVoicePipeline::connect(&cfg.pipeline.nats.url, cfg.pipeline.nats.subject_prefix.clone())
                .await?,
        ),
    })
}

fn devices(cfg: &Config, input: &Path, output: Box<dyn AudioOutput>) -> AudioDevices {
    AudioDevices {
        microphone: Box::new(WavFileMicrophone::new(input)),
        output,
        fetcher: Arc::new(HttpFetcher::default()),
        blobs: BlobStore::new(),
        capture: cfg.capture.clone(),
        playback: cfg.playback.clone(),
    }
}

async fn serve(cfg: Config, pipeline: Arc<dyn VoicePipeline>) -> Result<()> {
    let cfg = Arc::new(cfg);
    let agent_identity = cfg.orchestrator.agent_identity.clone();

    let factory_cfg = Arc::clone(&cfg);
    let factory: OrchestratorFactory = Arc::new(move |identity: SessionIdentity, platform: PlatformProfile| {
        let output: Box<dyn AudioOutput> = match &factory_cfg.audio.output_dir {
            Some(dir) => Box::new(WavFileOutput::new(Path::new(dir).join(&identity.session_id))?),
            None => Box::new(NullOutput),
        };
        let config = voice_turns::OrchestratorConfig {
            platform,
            ..factory_cfg.orchestrator.clone()
        };
        let input = PathBuf::from(&factory_cfg.audio.input_path);
        VoiceOrchestrator::spawn(
            config,
            identity,
            devices(&factory_cfg, &input, output),
            Arc::clone(&pipeline),
        )
    });

    let state = AppState::new(agent_identity, factory);
    let router = create_router(state.clone());

    let addr = format!("{}:{}", cfg.service.http.bind, cfg.service.http.port);
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("Failed to bind {}", addr))?;
    info!("HTTP server listening on {}", addr);

    axum::serve(listener, router)
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
            info!("Shutting down");
        })
        .await
        .context("HTTP server failed")?;

    state.shutdown().await;
    Ok(())
}

async fn turn(
    cfg: Config,
    pipeline: Arc<dyn VoicePipeline>,
    input: &Path,
    output_dir: &Path,
) -> Result<()> {
    let length = AudioFile::open(input)?.duration_seconds;

    let identity = SessionIdentity::new("cli", cfg.orchestrator.agent_identity.clone());
    let output = Box::new(WavFileOutput::new(output_dir)?);
    let orchestrator = VoiceOrchestrator::spawn(
        cfg.orchestrator.clone(),
        identity,
        devices(&cfg, input, output),
        pipeline,
    )?;

    let mut events = orchestrator.subscribe();

    orchestrator.start_recording().await;
    if orchestrator.state() != SessionState::Recording {
        orchestrator.destroy().await;
        bail!("Recording did not start");
    }

    info!("Recording {:.1}s from {}", length, input.display());
    tokio::time::sleep(Duration::from_secs_f64(length) + Duration::from_millis(100)).await;
    orchestrator.stop_recording().await;

    let mut failed = None;
    loop {
        match events.recv().await {
            Ok(VoiceEvent::Transcription { text }) => info!("You: {}", text),
            Ok(VoiceEvent::Response { text, .. }) => info!("Assistant: {}", text),
            Ok(VoiceEvent::Error { error }) => {
                warn!("Turn failed: {}", error);
                failed = Some(error);
            }
            Ok(VoiceEvent::StateChanged {
                state: SessionState::Ready | SessionState::Idle,
            }) => break,
            Ok(_) => {}
            Err(RecvError::Lagged(_)) => {}
            Err(RecvError::Closed) => break,
        }
    }

    orchestrator.destroy().await;

    if let Some(error) = failed {
        bail!(error);
    }
    info!("Reply written to {}", output_dir.display());
    Ok(())
}
