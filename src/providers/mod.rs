//! External inference collaborators
//!
//! Speech recognition, reply generation and speech synthesis are black
//! boxes behind these traits. The HTTP adapters talk to locally hosted
//! services; tests substitute scripted fakes.

mod ollama;
mod speech_api;
mod whisper;

use async_trait::async_trait;
use futures::stream::BoxStream;

pub use ollama::{ChatEvent, NdjsonDecoder, OllamaGenerator};
pub use speech_api::SpeechApiSynthesizer;
pub use whisper::{WhisperTranscriber, segment_confidence};

use crate::Result;
use crate::language::Language;
use crate::reply::Prompt;
use crate::voice::{SpeechAudio, Utterance};

/// Recognized text for one utterance
#[derive(Debug, Clone, PartialEq)]
pub struct Transcript {
    pub text: String,
    /// Language reported by the recognizer
    pub language: Language,
    /// Recognizer confidence in [0, 1]
    pub confidence: f32,
}

impl Transcript {
    /// Whether the transcript is worth answering
    #[must_use]
    pub fn is_usable(&self, min_confidence: f32) -> bool {
        !self.text.trim().is_empty() && self.confidence >= min_confidence
    }
}

/// One ordered fragment of generated text
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TokenIncrement {
    /// Position in the reply, starting at 0
    pub index: usize,
    pub text: String,
}

/// Stream of generated increments, ending when the reply is complete
pub type TokenStream = BoxStream<'static, Result<TokenIncrement>>;

/// Speech recognition
#[async_trait]
pub trait Transcriber: Send + Sync {
    /// Transcribe a complete utterance
    ///
    /// # Errors
    ///
    /// Returns `Transcription` (or a transport error) if recognition fails
    async fn transcribe(&self, utterance: &Utterance) -> Result<Transcript>;
}

/// Streaming reply generation
#[async_trait]
pub trait ReplyGenerator: Send + Sync {
    /// Start generating a reply to `prompt`
    ///
    /// # Errors
    ///
    /// Returns `Generation` if the request cannot be started; failures
    /// mid-stream arrive as stream items
    async fn generate(&self, prompt: &Prompt) -> Result<TokenStream>;
}

/// Speech synthesis
#[async_trait]
pub trait Synthesizer: Send + Sync {
    /// Synthesize `text` with `voice`
    ///
    /// # Errors
    ///
    /// Returns `VoiceUnavailable` if the voice is not installed, otherwise
    /// `Synthesis` on failure
    async fn synthesize(&self, text: &str, voice: &str, language: Language) -> Result<SpeechAudio>;
}

/// Join a base URL and an API path
fn endpoint(base: &str, path: &str) -> String {
    format!("{}/{}", base.trim_end_matches('/'), path.trim_start_matches('/'))
}
