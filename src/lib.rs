//! Voxloop - real-time bilingual voice assistant loop
//!
//! Listens on a microphone, detects utterances, transcribes them, streams a
//! reply from a language model and speaks it sentence by sentence while the
//! rest of the reply is still being generated.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────┐   Utterance   ┌──────────────┐  Prompt  ┌─────────────┐
//! │  Listener   │──────────────▶│ Orchestrator │─────────▶│  Generator  │
//! │ (capture +  │               │              │◀─────────│  (stream)   │
//! │ endpointer) │               └──────┬───────┘  tokens  └─────────────┘
//! └─────────────┘                      │ Sentence (segmenter)
//!                               ┌──────▼───────┐          ┌─────────────┐
//!                               │ SpeechQueue  │─────────▶│   Worker    │
//!                               │  (bounded)   │  Lease   │ TTS → sink  │
//!                               └──────────────┘          └─────────────┘
//! ```
//!
//! Speech recognition, generation and synthesis are external services
//! behind the traits in [`providers`].

pub mod config;
pub mod error;
pub mod language;
pub mod orchestrator;
pub mod providers;
pub mod reply;
pub mod speech;
pub mod voice;

pub use config::Config;
pub use error::{Error, Result};
pub use language::Language;
pub use orchestrator::{Collaborators, Orchestrator, TurnOutcome};
pub use providers::{ReplyGenerator, Synthesizer, TokenIncrement, Transcriber, Transcript};
pub use reply::{Prompt, Sentence, SentenceSegmenter};
pub use speech::{PlaybackReport, SpeechQueue, SynthesisPlaybackWorker, VoiceMap};
pub use voice::{AudioDeviceResolver, DeviceTarget, Endpointer, Listener, Utterance};
