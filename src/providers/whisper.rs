//! OpenAI-compatible transcription server (faster-whisper, whisper.cpp, ...)

use async_trait::async_trait;

use super::{Transcriber, Transcript, endpoint};
use crate::config::ServicesConfig;
use crate::language::Language;
use crate::voice::{Utterance, samples_to_wav};
use crate::{Error, Result};

/// `verbose_json` transcription response
#[derive(serde::Deserialize)]
struct VerboseTranscription {
    text: String,
    #[serde(default)]
    language: Option<String>,
    #[serde(default)]
    segments: Vec<TranscriptionSegment>,
}

#[derive(serde::Deserialize)]
struct TranscriptionSegment {
    #[serde(default)]
    avg_logprob: f32,
    #[serde(default)]
    no_speech_prob: f32,
}

/// Transcribes utterances over HTTP
pub struct WhisperTranscriber {
    client: reqwest::Client,
    url: String,
    model: String,
}

impl WhisperTranscriber {
    #[must_use]
    pub fn new(services: &ServicesConfig) -> Self {
        Self {
            client: reqwest::Client::new(),
            url: endpoint(&services.stt_url, "/v1/audio/transcriptions"),
            model: services.stt_model.clone(),
        }
    }
}

#[async_trait]
impl Transcriber for WhisperTranscriber {
    async fn transcribe(&self, utterance: &Utterance) -> Result<Transcript> {
        let samples = utterance.samples();
        if samples.is_empty() {
            return Err(Error::Transcription("empty utterance".to_string()));
        }

        let audio = samples_to_wav(&samples, utterance.sample_rate())?;
        tracing::debug!(audio_bytes = audio.len(), "starting transcription");

        let form = reqwest::multipart::Form::new()
            .part(
                "file",
                reqwest::multipart::Part::bytes(audio)
                    .file_name("utterance.wav")
                    .mime_str("audio/wav")
                    .map_err(|e| Error::Transcription(e.to_string()))?,
            )
            .text("model", self.model.clone())
            .text("response_format", "verbose_json");

        let response = self
            .client
            .post(&self.url)
            .multipart(form)
            .send()
            .await
            .map_err(|e| {
                tracing::error!(error = %e, "transcription request failed");
                Error::Transcription(e.to_string())
            })?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            tracing::error!(status = %status, body = %body, "transcription API error");
            return Err(Error::Transcription(format!("API error {status}: {body}")));
        }

        let result: VerboseTranscription = response
            .json()
            .await
            .map_err(|e| Error::Transcription(format!("invalid response: {e}")))?;

        let transcript = Transcript {
            text: result.text.trim().to_string(),
            language: result
                .language
                .as_deref()
                .map_or(Language::Other, Language::from_code),
            confidence: segment_confidence(
                result
                    .segments
                    .iter()
                    .map(|s| (s.avg_logprob, s.no_speech_prob)),
            ),
        };

        tracing::debug!(
            language = %transcript.language,
            confidence = transcript.confidence,
            "transcription complete"
        );
        Ok(transcript)
    }
}

/// Mean of `(1 - no_speech_prob) * exp(avg_logprob)` over segments
///
/// Servers that omit segment data get full confidence.
#[must_use]
#[allow(clippy::cast_precision_loss)]
pub fn segment_confidence(segments: impl IntoIterator<Item = (f32, f32)>) -> f32 {
    let (sum, count) = segments
        .into_iter()
        .fold((0.0f32, 0usize), |(sum, count), (avg_logprob, no_speech)| {
            let score = (1.0 - no_speech.clamp(0.0, 1.0)) * avg_logprob.min(0.0).exp();
            (sum + score, count + 1)
        });

    if count == 0 {
        1.0
    } else {
        (sum / count as f32).clamp(0.0, 1.0)
    }
}
