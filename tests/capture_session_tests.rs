// Integration tests for the capture session
//
// A synthetic microphone stands in for the device; the clock is paused so a
// recording of N seconds takes no wall time.

mod common;

use anyhow::Result;
use common::{FakeMicrophone, MicProbe};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::sleep;
use voice_turns::audio::{AudioFile, PlatformProfile};
use voice_turns::capture::CaptureEvent;
use voice_turns::{CaptureConfig, CaptureSession, VoiceError};

fn session(
    config: CaptureConfig,
    mic: (FakeMicrophone, MicProbe),
) -> (CaptureSession, MicProbe, mpsc::UnboundedReceiver<CaptureEvent>) {
    let (microphone, probe) = mic;
    let (tx, rx) = mpsc::unbounded_channel();
    (CaptureSession::new(config, Box::new(microphone), tx), probe, rx)
}

fn drain(rx: &mut mpsc::UnboundedReceiver<CaptureEvent>) -> (Vec<u64>, usize) {
    let mut seconds = Vec::new();
    let mut spectra = 0;
    while let Ok(event) = rx.try_recv() {
        match event {
            CaptureEvent::Duration { seconds: s, .. } => seconds.push(s),
            CaptureEvent::Frequency { .. } => spectra += 1,
        }
    }
    (seconds, spectra)
}

#[tokio::test(start_paused = true)]
async fn test_records_wav_payload() -> Result<()> {
    let (mut capture, mic, mut rx) = session(CaptureConfig::default(), FakeMicrophone::new());

    let id = capture.start().await?;
    assert!(capture.is_recording());
    assert_eq!(capture.current_id(), Some(id));
    assert_eq!(mic.live(), 1);

    sleep(Duration::from_millis(2500)).await;
    let recording = capture.stop().await?;

    assert_eq!(mic.live(), 0);
    assert!(!capture.is_recording());
    assert_eq!(recording.mime_type, "audio/wav");
    assert!((recording.duration_secs() - 2.5).abs() < 0.05);

    // The payload is a playable WAV file
    let dir = tempfile::TempDir::new()?;
    let path = dir.path().join("recording.wav");
    std::fs::write(&path, &recording.payload)?;
    let audio = AudioFile::open(&path)?;
    assert_eq!(audio.sample_rate, 16000);
    assert!((audio.duration_seconds - 2.5).abs() < 0.1);

    let (seconds, spectra) = drain(&mut rx);
    assert_eq!(seconds, vec![1, 2]);
    assert!(spectra > 100, "spectrum sampled every frame interval");
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn test_l16_preference() -> Result<()> {
    let config = CaptureConfig {
        preferred_encodings: vec!["audio/webm".to_string(), "audio/L16".to_string()],
        ..CaptureConfig::default()
    };
    let (mut capture, _mic, _rx) = session(config, FakeMicrophone::new());

    capture.start().await?;
    sleep(Duration::from_secs(1)).await;
    let recording = capture.stop().await?;

    assert_eq!(recording.mime_type, "audio/L16;rate=16000;channels=1");
    assert_eq!(recording.payload.len() % 2, 0);
    assert!(recording.payload.len() >= 16000 * 2 - 640);
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn test_too_short_is_invalid() -> Result<()> {
    let (mut capture, mic, _rx) = session(CaptureConfig::default(), FakeMicrophone::new());

    capture.start().await?;
    sleep(Duration::from_millis(300)).await;
    let result = capture.stop().await;

    assert!(matches!(result, Err(VoiceError::InvalidRecording(_))));
    assert_eq!(mic.live(), 0, "microphone released even when invalid");
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn test_too_small_is_invalid() -> Result<()> {
    let config = CaptureConfig {
        min_payload_bytes: 10_000_000,
        ..CaptureConfig::default()
    };
    let (mut capture, _mic, _rx) = session(config, FakeMicrophone::new());

    capture.start().await?;
    sleep(Duration::from_secs(2)).await;
    let err = capture.stop().await.unwrap_err();

    assert!(matches!(err, VoiceError::InvalidRecording(_)));
    assert!(err.message().contains("too small"));
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn test_stop_without_start() {
    let (mut capture, _mic, _rx) = session(CaptureConfig::default(), FakeMicrophone::new());

    assert!(matches!(
        capture.stop().await,
        Err(VoiceError::InvalidRecording(_))
    ));
}

#[tokio::test(start_paused = true)]
async fn test_restart_releases_previous_track() -> Result<()> {
    let (mut capture, mic, _rx) = session(CaptureConfig::default(), FakeMicrophone::new());

    let first = capture.start().await?;
    sleep(Duration::from_millis(200)).await;
    let second = capture.start().await?;

    assert_ne!(first, second);
    assert_eq!(mic.opens(), 2);
    assert_eq!(mic.live(), 1);

    capture.cancel();
    assert_eq!(mic.live(), 0);
    assert!(!capture.is_recording());
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn test_cancel_stops_duration_ticks() -> Result<()> {
    let (mut capture, _mic, mut rx) = session(CaptureConfig::default(), FakeMicrophone::new());

    capture.start().await?;
    sleep(Duration::from_millis(1500)).await;
    capture.cancel();
    drain(&mut rx);

    sleep(Duration::from_secs(5)).await;
    let (seconds, spectra) = drain(&mut rx);
    assert!(seconds.is_empty());
    assert_eq!(spectra, 0);
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn test_denied_permission() {
    let (mut capture, mic, _rx) = session(CaptureConfig::default(), FakeMicrophone::denied());

    assert!(!capture.has_permission().await);
    assert!(!capture.request_permission().await);

    let result = capture.start().await;
    assert!(matches!(result, Err(VoiceError::PermissionDenied(_))));
    assert!(!capture.is_recording());
    assert_eq!(mic.live(), 0);
}

#[tokio::test(start_paused = true)]
async fn test_request_permission_releases_probe_stream() {
    let (mut capture, mic, _rx) = session(CaptureConfig::default(), FakeMicrophone::new());

    assert!(capture.has_permission().await);
    assert!(capture.request_permission().await);
    assert_eq!(mic.opens(), 1);
    assert_eq!(mic.live(), 0);
}

#[tokio::test(start_paused = true)]
async fn test_request_permission_while_recording_reuses_stream() -> Result<()> {
    let (mut capture, mic, _rx) = session(CaptureConfig::default(), FakeMicrophone::new());

    capture.start().await?;
    assert!(capture.request_permission().await);

    assert_eq!(mic.opens(), 1);
    assert_eq!(mic.live(), 1);
    assert!(capture.is_recording());

    sleep(Duration::from_secs(1)).await;
    capture.stop().await?;
    assert_eq!(mic.live(), 0);
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn test_mobile_profile_buffers_whole_seconds() -> Result<()> {
    let config = CaptureConfig::for_platform(PlatformProfile::Mobile);
    assert_eq!(config.constraints().buffer_duration, Duration::from_secs(1));

    let (mut capture, _mic, _rx) = session(config, FakeMicrophone::new());

    capture.start().await?;
    sleep(Duration::from_millis(2300)).await;
    let recording = capture.stop().await?;

    // The partial last chunk is kept
    assert!(recording.payload.len() > 44 + 2 * 16000 * 2);
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn test_destroy_refuses_new_recordings() -> Result<()> {
    let (mut capture, mic, _rx) = session(CaptureConfig::default(), FakeMicrophone::new());

    capture.start().await?;
    capture.destroy();

    assert_eq!(mic.live(), 0);
    assert!(matches!(
        capture.start().await,
        Err(VoiceError::HardwareUnavailable(_))
    ));
    assert_eq!(mic.opens(), 1);
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn test_drop_releases_microphone() -> Result<()> {
    let (mut capture, mic, _rx) = session(CaptureConfig::default(), FakeMicrophone::new());

    capture.start().await?;
    drop(capture);

    assert_eq!(mic.live(), 0);
    Ok(())
}
