//! Speech output: sentence queue, text cleanup, synthesis and playback

mod clean;
mod queue;
mod voices;
mod worker;

pub use clean::{clean_for_tts, is_speakable};
pub use queue::{Lease, SpeechQueue};
pub use voices::VoiceMap;
pub use worker::{DEFAULT_SYNTHESIS_TIMEOUT, PlaybackReport, SynthesisPlaybackWorker};
