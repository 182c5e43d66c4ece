// Integration tests for the HTTP voice pipeline
//
// Each test serves the three endpoints from an in-process axum server on a
// loopback port and checks what the pipeline sends and how it reads replies.

mod common;

use anyhow::Result;
use axum::{
    extract::State,
    http::{header, HeaderMap, StatusCode},
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};
use base64::Engine;
use common::tone_wav;
use serde_json::{json, Value};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use voice_turns::capture::RecordingResult;
use voice_turns::pipeline::HttpPipelineConfig;
use voice_turns::session::Role;
use voice_turns::{
    AudioRef, BlobStore, ClipLoader, ConversationTurn, HttpFetcher, HttpVoicePipeline,
    SessionIdentity, VoiceParams, VoicePipeline,
};

/// Requests received by the fake service: (endpoint, apikey header, body)
#[derive(Clone, Default)]
struct Seen {
    requests: Arc<Mutex<Vec<(String, Option<String>, Value)>>>,
}

impl Seen {
    fn push(&self, endpoint: &str, headers: &HeaderMap, body: Value) {
        let key = headers
            .get("apikey")
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);
        if let Some(key) = &key {
            let bearer = headers
                .get(header::AUTHORIZATION)
                .and_then(|v| v.to_str().ok())
                .unwrap_or_default();
            assert_eq!(bearer, format!("Bearer {}", key));
        }
        self.requests
            .lock()
            .unwrap()
            .push((endpoint.to_string(), key, body));
    }

    fn last(&self) -> (String, Option<String>, Value) {
        self.requests.lock().unwrap().last().cloned().unwrap()
    }
}

async fn serve(router: Router) -> Result<String> {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await?;
    let addr = listener.local_addr()?;
    tokio::spawn(async move {
        let _ = axum::serve(listener, router).await;
    });
    Ok(format!("http://{}/functions/v1", addr))
}

fn service(seen: Seen, synthesis: fn() -> axum::response::Response) -> Router {
    Router::new()
        .route(
            "/functions/v1/voice-to-text",
            post(
                |State(seen): State<Seen>, headers: HeaderMap, Json(body): Json<Value>| async move {
                    seen.push("voice-to-text", &headers, body);
                    Json(json!({"text": "oi"}))
                },
            ),
        )
        .route(
            "/functions/v1/pwa-home-agent",
            post(
                |State(seen): State<Seen>, headers: HeaderMap, Json(body): Json<Value>| async move {
                    seen.push("pwa-home-agent", &headers, body);
                    Json(json!({
                        "response": "olá, como posso ajudar",
                        "audioUrl": "https://cdn.example.com/reply.mp3"
                    }))
                },
            ),
        )
        .route(
            "/functions/v1/text-to-speech",
            post(
                move |State(seen): State<Seen>, headers: HeaderMap, Json(body): Json<Value>| async move {
                    seen.push("text-to-speech", &headers, body);
                    synthesis()
                },
            ),
        )
        .route(
            "/functions/v1/audio.wav",
            get(|| async { ([(header::CONTENT_TYPE, "audio/wav")], tone_wav(0.5, 16000)) }),
        )
        .with_state(seen)
}

fn raw_wav() -> axum::response::Response {
    ([(header::CONTENT_TYPE, "audio/wav")], tone_wav(0.3, 16000)).into_response()
}

fn json_speech() -> axum::response::Response {
    let audio = base64::engine::general_purpose::STANDARD.encode(tone_wav(0.3, 16000));
    Json(json!({
        "audio": audio,
        "wordTimings": [
            {"word": "olá", "start": 0.0, "end": 0.2},
            {"word": "mundo", "start": 0.2, "end": 0.3}
        ]
    }))
    .into_response()
}

fn failing() -> axum::response::Response {
    (StatusCode::INTERNAL_SERVER_ERROR, "voice model crashed").into_response()
}

fn pipeline(base_url: String, api_key: Option<&str>) -> Result<HttpVoicePipeline> {
    HttpVoicePipeline::new(HttpPipelineConfig {
        base_url,
        api_key: api_key.map(str::to_string),
        timeout_secs: 5,
        ..HttpPipelineConfig::default()
    })
}

fn identity() -> SessionIdentity {
    SessionIdentity::new("kitchen", "home")
}

#[tokio::test]
async fn test_transcribe_sends_payload_and_credentials() -> Result<()> {
    let seen = Seen::default();
    let base = serve(service(seen.clone(), raw_wav)).await?;
    let pipeline = pipeline(base, Some("anon-key"))?;
    let identity = identity();

    let recording = RecordingResult {
        payload: tone_wav(1.0, 16000),
        duration: Duration::from_secs(1),
        mime_type: "audio/wav".to_string(),
    };
    let transcription = pipeline.transcribe(&recording, &identity).await?;

    assert_eq!(transcription.text, "oi");
    let (endpoint, key, body) = seen.last();
    assert_eq!(endpoint, "voice-to-text");
    assert_eq!(key.as_deref(), Some("anon-key"));
    assert_eq!(body["mimeType"], "audio/wav");
    assert_eq!(body["deviceId"], "kitchen");
    assert_eq!(body["sessionId"], identity.session_id.as_str());
    let audio = base64::engine::general_purpose::STANDARD.decode(body["audio"].as_str().unwrap())?;
    assert_eq!(audio, recording.payload);
    Ok(())
}

#[tokio::test]
async fn test_converse_sends_history_and_reads_audio_url() -> Result<()> {
    let seen = Seen::default();
    let base = serve(service(seen.clone(), raw_wav)).await?;
    let pipeline = pipeline(base, None)?;

    let history = vec![ConversationTurn::user("oi")];
    let reply = pipeline.converse("oi", &history, &identity()).await?;

    assert_eq!(reply.text, "olá, como posso ajudar");
    assert_eq!(
        reply.audio,
        Some(AudioRef::Url("https://cdn.example.com/reply.mp3".to_string()))
    );

    let (endpoint, key, body) = seen.last();
    assert_eq!(endpoint, "pwa-home-agent");
    assert_eq!(key, None);
    assert_eq!(body["prompt"], "oi");
    assert_eq!(body["agent"], "home");
    assert_eq!(body["history"], json!([{"role": "user", "content": "oi"}]));
    assert_eq!(history[0].role, Role::User);
    Ok(())
}

#[tokio::test]
async fn test_synthesize_raw_audio() -> Result<()> {
    let seen = Seen::default();
    let base = serve(service(seen.clone(), raw_wav)).await?;
    let pipeline = pipeline(base, None)?;

    let voice = VoiceParams {
        voice_id: "alloy".to_string(),
        speech_rate: 1.25,
    };
    let speech = pipeline.synthesize("olá", &voice).await?;

    assert!(matches!(speech.audio, AudioRef::Binary(_)));
    assert!(speech.word_timings.is_none());

    let (_, _, body) = seen.last();
    assert_eq!(body["text"], "olá");
    assert_eq!(body["voice"], "alloy");
    assert_eq!(body["speed"], 1.25);
    assert_eq!(body["chatType"], "home");

    // The bytes decode as a clip
    let loader = ClipLoader::new(Arc::new(HttpFetcher::default()), BlobStore::new());
    let clip = loader.load(&speech.audio).await?;
    assert!((clip.audio.duration_secs() - 0.3).abs() < 0.01);
    Ok(())
}

#[tokio::test]
async fn test_synthesize_json_with_word_timings() -> Result<()> {
    let base = serve(service(Seen::default(), json_speech)).await?;
    let pipeline = pipeline(base, None)?;

    let speech = pipeline.synthesize("olá mundo", &VoiceParams::default()).await?;

    assert!(matches!(speech.audio, AudioRef::Base64(_)));
    let timings = speech.word_timings.unwrap();
    assert_eq!(timings.len(), 2);
    assert_eq!(timings[1].word, "mundo");
    assert_eq!(timings[1].start, 0.2);
    Ok(())
}

#[tokio::test]
async fn test_service_error_carries_status() -> Result<()> {
    let base = serve(service(Seen::default(), failing)).await?;
    let pipeline = pipeline(base, None)?;

    let err = pipeline
        .synthesize("olá", &VoiceParams::default())
        .await
        .unwrap_err();

    let message = format!("{:#}", err);
    assert!(message.contains("500"), "{}", message);
    assert!(message.contains("voice model crashed"), "{}", message);
    Ok(())
}

#[tokio::test]
async fn test_unreachable_service() -> Result<()> {
    let pipeline = pipeline("http://127.0.0.1:9/functions/v1".to_string(), None)?;

    let result = pipeline.converse("oi", &[], &identity()).await;

    assert!(result.is_err());
    Ok(())
}

#[tokio::test]
async fn test_fetcher_loads_hosted_audio() -> Result<()> {
    let base = serve(service(Seen::default(), raw_wav)).await?;
    let blobs = BlobStore::new();
    let loader = ClipLoader::new(Arc::new(HttpFetcher::default()), blobs.clone());

    let clip = loader
        .load(&AudioRef::Url(format!("{}/audio.wav", base)))
        .await?;

    assert_eq!(clip.audio.sample_rate, 16000);
    assert!((clip.audio.duration_secs() - 0.5).abs() < 0.01);
    assert!(clip.blob.is_none());
    assert_eq!(blobs.live_count(), 0);

    let missing = loader
        .load(&AudioRef::Url(format!("{}/missing.wav", base)))
        .await;
    assert!(missing.is_err());
    Ok(())
}
