//! Speech backend for narration scripts.
//!
//! The generative TTS provider receives a text prompt and a voice preset and
//! answers with base64 16-bit little-endian PCM (mono, 24 kHz). Any failure,
//! including a missing API key, degrades to a local fallback: the text goes
//! back to the client, which speaks it with its own lower-fidelity synthesis.

use crate::config::NarrationConf;
use crate::health::HealthTracker;
use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tracing::{info, warn};

pub const SAMPLE_RATE: u32 = 24_000;

#[derive(Debug, thiserror::Error)]
pub enum SpeechError {
    #[error("no API key found in ${0}")]
    MissingCredential(String),
    #[error("request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("backend answered {status}: {body}")]
    Status { status: reqwest::StatusCode, body: String },
    #[error("response carried no audio")]
    NoAudio,
    #[error("audio payload is not valid base64: {0}")]
    Decode(#[from] base64::DecodeError),
}

/// Mono 16-bit PCM.
#[derive(Debug, Clone, PartialEq)]
pub struct Pcm16 {
    pub samples: Vec<i16>,
    pub sample_rate: u32,
}

impl Pcm16 {
    /// Little-endian sample pairs; a trailing odd byte is dropped.
    pub fn from_le_bytes(bytes: &[u8], sample_rate: u32) -> Self {
        let samples = bytes
            .chunks_exact(2)
            .map(|pair| i16::from_le_bytes([pair[0], pair[1]]))
            .collect();
        Self { samples, sample_rate }
    }

    pub fn duration_secs(&self) -> f64 {
        self.samples.len() as f64 / self.sample_rate as f64
    }

    /// RIFF/WAVE container, 44-byte canonical header.
    pub fn to_wav(&self) -> Vec<u8> {
        let data_len = (self.samples.len() * 2) as u32;
        let byte_rate = self.sample_rate * 2;
        let mut wav = Vec::with_capacity(44 + data_len as usize);
        wav.extend_from_slice(b"RIFF");
        wav.extend_from_slice(&(36 + data_len).to_le_bytes());
        wav.extend_from_slice(b"WAVE");
        wav.extend_from_slice(b"fmt ");
        wav.extend_from_slice(&16u32.to_le_bytes());
        wav.extend_from_slice(&1u16.to_le_bytes()); // PCM
        wav.extend_from_slice(&1u16.to_le_bytes()); // mono
        wav.extend_from_slice(&self.sample_rate.to_le_bytes());
        wav.extend_from_slice(&byte_rate.to_le_bytes());
        wav.extend_from_slice(&2u16.to_le_bytes()); // block align
        wav.extend_from_slice(&16u16.to_le_bytes()); // bits per sample
        wav.extend_from_slice(b"data");
        wav.extend_from_slice(&data_len.to_le_bytes());
        for sample in &self.samples {
            wav.extend_from_slice(&sample.to_le_bytes());
        }
        wav
    }
}

#[derive(Deserialize)]
struct GenerateResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
}

#[derive(Deserialize)]
struct Candidate {
    content: Option<Content>,
}

#[derive(Deserialize)]
struct Content {
    #[serde(default)]
    parts: Vec<Part>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct Part {
    inline_data: Option<InlineData>,
}

#[derive(Deserialize)]
struct InlineData {
    data: String,
}

#[derive(Clone)]
pub struct SpeechClient {
    client: reqwest::Client,
    endpoint: String,
    model: String,
    api_key_env: String,
    api_key: Option<String>,
    timeout: Duration,
}

impl SpeechClient {
    /// Reads the API key from the environment variable named in the config.
    pub fn from_config(conf: &NarrationConf) -> Self {
        let api_key = std::env::var(&conf.api_key_env).ok().filter(|k| !k.trim().is_empty());
        Self {
            client: reqwest::Client::new(),
            endpoint: conf.endpoint.trim_end_matches('/').to_string(),
            model: conf.model.clone(),
            api_key_env: conf.api_key_env.clone(),
            api_key,
            timeout: Duration::from_secs(conf.timeout_secs),
        }
    }

    pub fn with_api_key(mut self, api_key: Option<String>) -> Self {
        self.api_key = api_key;
        self
    }

    pub fn has_credential(&self) -> bool {
        self.api_key.is_some()
    }

    pub fn request_body(text: &str, voice: &str) -> serde_json::Value {
        json!({
            "contents": [{ "parts": [{ "text": text }] }],
            "generationConfig": {
                "responseModalities": ["AUDIO"],
                "speechConfig": {
                    "voiceConfig": { "prebuiltVoiceConfig": { "voiceName": voice } }
                }
            }
        })
    }

    pub async fn synthesize(&self, text: &str, voice: &str) -> Result<Pcm16, SpeechError> {
        let api_key = self
            .api_key
            .as_deref()
            .ok_or_else(|| SpeechError::MissingCredential(self.api_key_env.clone()))?;

        let url = format!("{}/{}:generateContent", self.endpoint, self.model);
        let response = self
            .client
            .post(url)
            .header("x-goog-api-key", api_key)
            .timeout(self.timeout)
            .json(&Self::request_body(text, voice))
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(SpeechError::Status { status, body });
        }

        let payload: GenerateResponse = response.json().await?;
        let data = payload
            .candidates
            .into_iter()
            .filter_map(|c| c.content)
            .flat_map(|c| c.parts)
            .find_map(|p| p.inline_data)
            .ok_or(SpeechError::NoAudio)?;

        let bytes = STANDARD.decode(data.data.trim())?;
        if bytes.len() < 2 {
            return Err(SpeechError::NoAudio);
        }
        Ok(Pcm16::from_le_bytes(&bytes, SAMPLE_RATE))
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "mode", rename_all = "snake_case")]
pub enum FallbackPayload {
    /// Client should speak `text` with its local speech synthesis.
    LocalSpeech { text: String, reason: String },
}

#[derive(Debug)]
pub enum NarrationOutput {
    Audio(Pcm16),
    LocalFallback(FallbackPayload),
}

#[derive(Debug, thiserror::Error)]
#[error("a narration is already in progress")]
pub struct NarrationBusy;

/// Speech client plus the fallback policy and a single-flight guard.
#[derive(Clone)]
pub struct NarrationService {
    client: SpeechClient,
    voice: String,
    in_flight: Arc<Mutex<()>>,
    health: HealthTracker,
}

impl NarrationService {
    pub fn new(client: SpeechClient, voice: &str, health: HealthTracker) -> Self {
        Self {
            client,
            voice: voice.to_string(),
            in_flight: Arc::new(Mutex::new(())),
            health,
        }
    }

    /// Fails only when another narration is still running.
    pub async fn speak(&self, text: &str) -> Result<NarrationOutput, NarrationBusy> {
        let _guard = self.in_flight.try_lock().map_err(|_| NarrationBusy)?;

        match self.client.synthesize(text, &self.voice).await {
            Ok(pcm) => {
                info!(seconds = pcm.duration_secs(), "narration synthesized");
                self.health.record_narration(false);
                Ok(NarrationOutput::Audio(pcm))
            }
            Err(e) => {
                warn!(error = %e, "speech backend unavailable, falling back to local speech");
                self.health.record_narration(true);
                Ok(NarrationOutput::LocalFallback(FallbackPayload::LocalSpeech {
                    text: text.to_string(),
                    reason: e.to_string(),
                }))
            }
        }
    }
}
