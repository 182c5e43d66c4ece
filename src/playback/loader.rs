use anyhow::{Context, Result};
use base64::Engine;
use serde::ser::{Serialize, SerializeStruct, Serializer};
use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};
use tracing::{debug, info};

use crate::audio::{decode, DecodedAudio};
use crate::error::VoiceError;
use crate::pipeline::{VoiceParams, VoicePipeline, WordTiming};

/// A playable audio reference in any of the forms the pipeline produces
#[derive(Debug, Clone, PartialEq)]
pub enum AudioRef {
    /// Raw encoded bytes
    Binary(Arc<[u8]>),
    /// Base64 payload, optionally wrapped in a `data:` URL
    Base64(String),
    /// Hosted URL, `blob:` reference or `data:` URL
    Url(String),
}

impl AudioRef {
    pub fn binary(bytes: impl Into<Vec<u8>>) -> Self {
        AudioRef::Binary(Arc::from(bytes.into()))
    }
}

// Inline payloads are summarized so events and history stay small
impl Serialize for AudioRef {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut state = serializer.serialize_struct("AudioRef", 2)?;
        match self {
            AudioRef::Binary(bytes) => {
                state.serialize_field("kind", "binary")?;
                state.serialize_field("bytes", &bytes.len())?;
            }
            AudioRef::Base64(data) => {
                state.serialize_field("kind", "base64")?;
                state.serialize_field("bytes", &(data.len() / 4 * 3))?;
            }
            AudioRef::Url(url) => {
                state.serialize_field("kind", "url")?;
                state.serialize_field("url", url)?;
            }
        }
        state.end()
    }
}

#[derive(Debug, Clone)]
pub struct Blob {
    pub bytes: Arc<[u8]>,
    pub mime_type: Option<String>,
}

/// Registry of locally created blob references
///
/// Every reference handed out must eventually be revoked by its owner.
#[derive(Debug, Clone, Default)]
pub struct BlobStore {
    blobs: Arc<Mutex<HashMap<String, Blob>>>,
}

impl BlobStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn create(&self, bytes: Arc<[u8]>, mime_type: Option<String>) -> String {
        let url = format!("blob:voice/{}", uuid::Uuid::new_v4());
        self.lock().insert(url.clone(), Blob { bytes, mime_type });
        debug!("Created {}", url);
        url
    }

    pub fn get(&self, url: &str) -> Option<Blob> {
        self.lock().get(url).cloned()
    }

    /// Returns false when the reference was unknown or already revoked
    pub fn revoke(&self, url: &str) -> bool {
        let revoked = self.lock().remove(url).is_some();
        if revoked {
            debug!("Revoked {}", url);
        }
        revoked
    }

    pub fn revoke_all(&self) -> usize {
        let mut blobs = self.lock();
        let count = blobs.len();
        blobs.clear();
        count
    }

    pub fn live_count(&self) -> usize {
        self.lock().len()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<String, Blob>> {
        self.blobs.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Media fetched from a hosted URL
#[derive(Debug, Clone)]
pub struct FetchedMedia {
    pub bytes: Vec<u8>,
    pub mime_type: Option<String>,
}

/// Retrieval of hosted audio
#[async_trait::async_trait]
pub trait MediaFetcher: Send + Sync {
    async fn fetch(&self, url: &str) -> Result<FetchedMedia>;
}

/// Fetches hosted audio over HTTP(S)
#[derive(Debug, Clone, Default)]
pub struct HttpFetcher {
    client: reqwest::Client,
}

impl HttpFetcher {
    pub fn new(client: reqwest::Client) -> Self {
        Self { client }
    }
}

#[async_trait::async_trait]
impl MediaFetcher for HttpFetcher {
    async fn fetch(&self, url: &str) -> Result<FetchedMedia> {
        let response = self
            .client
            .get(url)
            .send()
            .await
            .with_context(|| format!("Failed to request {}", url))?
            .error_for_status()
            .with_context(|| format!("Audio fetch rejected for {}", url))?;

        let mime_type = response
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);
        let bytes = response
            .bytes()
            .await
            .context("Failed to read audio body")?
            .to_vec();

        if bytes.is_empty() {
            anyhow::bail!("Audio at {} is empty", url);
        }

        Ok(FetchedMedia { bytes, mime_type })
    }
}

/// A decoded clip ready to hand to a playback session
#[derive(Debug, Clone)]
pub struct LoadedClip {
    pub audio: Arc<DecodedAudio>,
    /// Blob reference backing the clip, revoked by whoever plays it
    pub blob: Option<String>,
    pub source: String,
}

/// Turns audio references into decoded clips
///
/// Cloneable so loading can run outside the session that will play the clip.
#[derive(Clone)]
pub struct ClipLoader {
    fetcher: Arc<dyn MediaFetcher>,
    blobs: BlobStore,
}

impl ClipLoader {
    pub fn new(fetcher: Arc<dyn MediaFetcher>, blobs: BlobStore) -> Self {
        Self { fetcher, blobs }
    }

    pub fn blobs(&self) -> &BlobStore {
        &self.blobs
    }

    pub async fn load(&self, audio: &AudioRef) -> Result<LoadedClip, VoiceError> {
        match audio {
            AudioRef::Binary(bytes) => self.register(Arc::clone(bytes), None, "binary"),
            AudioRef::Base64(data) => {
                let (mime, bytes) = decode_base64(data)?;
                self.register(bytes.into(), mime, "base64")
            }
            AudioRef::Url(url) if url.starts_with("blob:") => {
                let blob = self.blobs.get(url).ok_or_else(|| {
                    VoiceError::PlaybackDecodeFailure(format!("{} is no longer available", url))
                })?;
                let decoded = decode(&blob.bytes, blob.mime_type.as_deref())?;
                Ok(LoadedClip {
                    audio: Arc::new(decoded),
                    blob: Some(url.clone()),
                    source: url.clone(),
                })
            }
            AudioRef::Url(url) if url.starts_with("data:") => {
                let (mime, bytes) = decode_base64(url)?;
                self.register(bytes.into(), mime, "data-url")
            }
            AudioRef::Url(url) => {
                let media = self.fetcher.fetch(url).await.map_err(|e| {
                    VoiceError::PlaybackDecodeFailure(format!("Failed to fetch audio: {:#}", e))
                })?;
                let decoded = decode(&media.bytes, media.mime_type.as_deref())?;
                info!("Loaded {} ({:.1}s)", url, decoded.duration_secs());
                Ok(LoadedClip {
                    audio: Arc::new(decoded),
                    blob: None,
                    source: url.clone(),
                })
            }
        }
    }

    /// Synthesize `text` and load the resulting speech
    ///
    /// Word timings are returned exactly as the pipeline supplied them.
    pub async fn load_speech(
        &self,
        pipeline: &dyn VoicePipeline,
        text: &str,
        voice: &VoiceParams,
    ) -> Result<(LoadedClip, Option<Vec<WordTiming>>), VoiceError> {
        let speech = pipeline
            .synthesize(text, voice)
            .await
            .map_err(|e| VoiceError::SynthesisFailure(format!("{:#}", e)))?;
        let clip = self.load(&speech.audio).await?;
        Ok((clip, speech.word_timings))
    }

    // Decode before creating the blob so a bad payload leaves nothing behind
    fn register(
        &self,
        bytes: Arc<[u8]>,
        mime: Option<String>,
        kind: &str,
    ) -> Result<LoadedClip, VoiceError> {
        let decoded = decode(&bytes, mime.as_deref())?;
        let url = self.blobs.create(bytes, mime);
        info!("Loaded {} audio as {} ({:.1}s)", kind, url, decoded.duration_secs());
        Ok(LoadedClip {
            audio: Arc::new(decoded),
            blob: Some(url.clone()),
            source: url,
        })
    }
}

/// Decode a base64 payload, accepting a `data:` URL wrapper
fn decode_base64(data: &str) -> Result<(Option<String>, Vec<u8>), VoiceError> {
    let (mime, payload) = match data.strip_prefix("data:") {
        Some(rest) => {
            let (header, payload) = rest.split_once(',').ok_or_else(|| {
                VoiceError::UnsupportedAudioFormat("Malformed data URL".to_string())
            })?;
            let mime = header.split(';').next().filter(|m| !m.is_empty());
            (mime.map(str::to_string), payload)
        }
        None => (None, data),
    };

    let cleaned: String = payload.chars().filter(|c| !c.is_whitespace()).collect();
    let bytes = base64::engine::general_purpose::STANDARD
        .decode(cleaned)
        .map_err(|e| VoiceError::UnsupportedAudioFormat(format!("Invalid base64 audio: {}", e)))?;
    if bytes.is_empty() {
        return Err(VoiceError::PlaybackDecodeFailure("Audio payload is empty".to_string()));
    }
    Ok((mime, bytes))
}
