//! OpenAI-compatible speech server (Kokoro-FastAPI and friends)

use std::time::Duration;

use async_trait::async_trait;
use reqwest::StatusCode;

use super::{Synthesizer, endpoint};
use crate::config::ServicesConfig;
use crate::language::Language;
use crate::voice::{SpeechAudio, decode_mp3};
use crate::{Error, Result};

#[derive(serde::Serialize)]
struct SpeechRequest<'a> {
    model: &'a str,
    input: &'a str,
    voice: &'a str,
    speed: f32,
    response_format: &'static str,
}

/// Synthesizes speech over HTTP
pub struct SpeechApiSynthesizer {
    client: reqwest::Client,
    url: String,
    model: String,
    speed: f32,
}

impl SpeechApiSynthesizer {
    /// Requests taking longer than `timeout` fail with a synthesis error
    #[must_use]
    pub fn new(services: &ServicesConfig, speed: f32, timeout: Duration) -> Self {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .unwrap_or_else(|_| reqwest::Client::new());
        Self {
            client,
            url: endpoint(&services.tts_url, "/v1/audio/speech"),
            model: services.tts_model.clone(),
            speed,
        }
    }
}

#[async_trait]
impl Synthesizer for SpeechApiSynthesizer {
    async fn synthesize(&self, text: &str, voice: &str, language: Language) -> Result<SpeechAudio> {
        tracing::debug!(voice, language = %language, chars = text.chars().count(), "synthesizing");

        let request = SpeechRequest {
            model: &self.model,
            input: text,
            voice,
            speed: self.speed,
            response_format: "mp3",
        };

        let response = self
            .client
            .post(&self.url)
            .json(&request)
            .send()
            .await
            .map_err(|e| {
                tracing::error!(error = %e, "speech request failed");
                Error::Synthesis(e.to_string())
            })?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            if is_missing_voice(status, &body) {
                return Err(Error::VoiceUnavailable {
                    voice: voice.to_string(),
                });
            }
            tracing::error!(status = %status, body = %body, "speech API error");
            return Err(Error::Synthesis(format!("API error {status}: {body}")));
        }

        let bytes = response
            .bytes()
            .await
            .map_err(|e| Error::Synthesis(e.to_string()))?;

        let audio = decode_mp3(&bytes)?;
        tracing::debug!(
            samples = audio.samples.len(),
            sample_rate = audio.sample_rate,
            "synthesis complete"
        );
        Ok(audio)
    }
}

/// Whether an error response means the voice does not exist
fn is_missing_voice(status: StatusCode, body: &str) -> bool {
    if status == StatusCode::NOT_FOUND {
        return true;
    }
    if !status.is_client_error() {
        return false;
    }
    let body = body.to_lowercase();
    body.contains("voice")
        && ["not found", "unknown", "invalid", "not available", "does not exist"]
            .iter()
            .any(|needle| body.contains(needle))
}
