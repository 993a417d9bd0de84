//! Configuration management for the voice loop
//!
//! Priority: CLI flag > environment variable > TOML file > default.

pub mod file;

use std::path::Path;
use std::time::Duration;

use crate::speech::{DEFAULT_SYNTHESIS_TIMEOUT, VoiceMap};
use crate::voice::{AudioFormat, EndpointerConfig};
use crate::{Error, Result};

/// Voxloop configuration
#[derive(Debug, Clone, Default)]
pub struct Config {
    /// Audio devices and framing
    pub audio: AudioConfig,

    /// Endpointing (VAD) tuning
    pub endpoint: EndpointerConfig,

    /// Sentence segmentation and speech output
    pub speech: SpeechConfig,

    /// Turn-taking policy
    pub turn: TurnConfig,

    /// External STT/LLM/TTS services
    pub services: ServicesConfig,
}

/// Audio device configuration
#[derive(Debug, Clone)]
pub struct AudioConfig {
    /// Microphone hint (device index or name fragment)
    pub mic_target: Option<String>,

    /// Speaker hint (device index or name fragment)
    pub speaker_target: Option<String>,

    /// Duration of one capture frame
    pub frame_ms: u32,

    /// Capture formats tried in order for each device
    pub capture_formats: Vec<AudioFormat>,

    /// Playback formats tried in order for each device
    pub playback_formats: Vec<AudioFormat>,

    /// No samples for this long means the capture device is gone
    pub stall_timeout: Duration,
}

impl Default for AudioConfig {
    fn default() -> Self {
        Self {
            mic_target: None,
            speaker_target: None,
            frame_ms: 30,
            capture_formats: vec![
                AudioFormat::new(16000, 1),
                AudioFormat::new(16000, 2),
                AudioFormat::new(48000, 1),
                AudioFormat::new(48000, 2),
            ],
            playback_formats: vec![
                AudioFormat::new(24000, 1),
                AudioFormat::new(24000, 2),
                AudioFormat::new(48000, 2),
                AudioFormat::new(44100, 2),
            ],
            stall_timeout: Duration::from_secs(2),
        }
    }
}

/// Speech output configuration
#[derive(Debug, Clone)]
pub struct SpeechConfig {
    /// Maximum sentences waiting for synthesis before generation blocks
    pub queue_capacity: usize,

    /// Unterminated text longer than this is split at a clause boundary
    pub max_sentence_chars: usize,

    /// TTS speed multiplier
    pub tts_speed: f32,

    /// A synthesis attempt taking longer than this fails its sentence
    pub synthesis_timeout: Duration,

    /// Language to voice mapping
    pub voices: VoiceMap,
}

impl Default for SpeechConfig {
    fn default() -> Self {
        Self {
            queue_capacity: 4,
            max_sentence_chars: 80,
            tts_speed: 1.1,
            synthesis_timeout: DEFAULT_SYNTHESIS_TIMEOUT,
            voices: VoiceMap::default(),
        }
    }
}

/// Turn-taking configuration
#[derive(Debug, Clone)]
pub struct TurnConfig {
    /// Transcripts below this confidence are ignored
    pub min_confidence: f32,

    /// Deadline for transcription, and separately for the whole reply
    /// stream from the generate request to its last increment
    pub turn_timeout: Duration,

    /// How long one listen request waits for speech
    pub listen_timeout: Duration,

    /// Pause after playback drains before listening again
    pub post_turn_delay: Duration,

    /// Phrases that end the session
    pub exit_phrases: Vec<String>,
}

impl Default for TurnConfig {
    fn default() -> Self {
        Self {
            min_confidence: 0.3,
            turn_timeout: Duration::from_secs(30),
            listen_timeout: Duration::from_secs(30),
            post_turn_delay: Duration::from_millis(1500),
            exit_phrases: [
                "goodbye", "bye", "stop", "exit", "quit", "shut down", "turn off", "再见",
            ]
            .into_iter()
            .map(ToString::to_string)
            .collect(),
        }
    }
}

/// External service configuration
#[derive(Debug, Clone)]
pub struct ServicesConfig {
    /// OpenAI-compatible transcription server base URL
    pub stt_url: String,

    /// Transcription model name
    pub stt_model: String,

    /// Ollama server base URL
    pub llm_url: String,

    /// Chat model name
    pub llm_model: String,

    /// OpenAI-compatible speech server base URL
    pub tts_url: String,

    /// Speech model name
    pub tts_model: String,

    /// Sampling temperature
    pub temperature: f32,

    /// Nucleus sampling cutoff
    pub top_p: f32,

    /// Maximum predicted tokens per reply
    pub max_tokens: u32,

    /// Stop sequences
    pub stop: Vec<String>,
}

impl Default for ServicesConfig {
    fn default() -> Self {
        Self {
            stt_url: "http://127.0.0.1:8000".to_string(),
            stt_model: "tiny".to_string(),
            llm_url: "http://127.0.0.1:11434".to_string(),
            llm_model: "gemma3:270m".to_string(),
            tts_url: "http://127.0.0.1:8880".to_string(),
            tts_model: "kokoro".to_string(),
            temperature: 0.6,
            top_p: 0.9,
            max_tokens: 80,
            stop: vec![
                "\n\n".to_string(),
                "User:".to_string(),
                "Assistant:".to_string(),
            ],
        }
    }
}

impl Config {
    /// Load configuration from the TOML file (default location when `path`
    /// is `None`) and environment
    ///
    /// # Errors
    ///
    /// Returns error if the merged configuration is invalid
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let fc = file::load_config_file(path);
        let defaults = Self::default();

        // Audio (env > toml > default)
        let audio = AudioConfig {
            mic_target: env("VOXLOOP_MIC_TARGET")
                .or_else(|| env("MIC_TARGET"))
                .or(fc.audio.mic_target),
            speaker_target: env("VOXLOOP_SPEAKER_TARGET").or(fc.audio.speaker_target),
            frame_ms: fc.audio.frame_ms.unwrap_or(defaults.audio.frame_ms),
            capture_formats: fc.audio.capture_formats.map_or(
                defaults.audio.capture_formats,
                |f| f.into_iter().map(|(r, c)| AudioFormat::new(r, c)).collect(),
            ),
            playback_formats: fc.audio.playback_formats.map_or(
                defaults.audio.playback_formats,
                |f| f.into_iter().map(|(r, c)| AudioFormat::new(r, c)).collect(),
            ),
            stall_timeout: secs(fc.audio.stall_timeout_secs)
                .unwrap_or(defaults.audio.stall_timeout),
        };

        // Endpointing timings are configured in ms and converted to frames
        let base = EndpointerConfig::default();
        let timings = EndpointerConfig::for_frame_ms(
            audio.frame_ms,
            fc.endpoint.silence_hang_ms.unwrap_or(800),
            fc.endpoint.min_speech_ms.unwrap_or(300),
            fc.endpoint.max_utterance_ms.unwrap_or(15_000),
        );
        let endpoint = EndpointerConfig {
            calibration_frames: fc
                .endpoint
                .calibration_frames
                .unwrap_or(base.calibration_frames),
            trigger_multiplier: fc
                .endpoint
                .trigger_multiplier
                .unwrap_or(base.trigger_multiplier),
            release_multiplier: fc
                .endpoint
                .release_multiplier
                .unwrap_or(base.release_multiplier),
            min_noise_floor: fc.endpoint.min_noise_floor.unwrap_or(base.min_noise_floor),
            trigger_frames: fc.endpoint.trigger_frames.unwrap_or(base.trigger_frames),
            pre_roll_frames: fc.endpoint.pre_roll_frames.unwrap_or(base.pre_roll_frames),
            ..timings
        };

        // Speech output (env > toml > default)
        let voices = fc.speech.voices;
        let default_voices = defaults.speech.voices;
        let speech = SpeechConfig {
            queue_capacity: fc
                .speech
                .queue_capacity
                .unwrap_or(defaults.speech.queue_capacity),
            max_sentence_chars: fc
                .speech
                .max_sentence_chars
                .unwrap_or(defaults.speech.max_sentence_chars),
            tts_speed: env("VOXLOOP_TTS_SPEED")
                .and_then(|s| s.parse().ok())
                .or(fc.speech.tts_speed)
                .unwrap_or(defaults.speech.tts_speed),
            synthesis_timeout: secs(fc.speech.synthesis_timeout_secs)
                .unwrap_or(defaults.speech.synthesis_timeout),
            voices: VoiceMap {
                zh: voices.zh.unwrap_or(default_voices.zh),
                zh_alternates: voices.zh_alternates.unwrap_or(default_voices.zh_alternates),
                en: voices.en.unwrap_or(default_voices.en),
                en_alternates: voices.en_alternates.unwrap_or(default_voices.en_alternates),
                default: voices.default.unwrap_or(default_voices.default),
            },
        };

        let turn = TurnConfig {
            min_confidence: fc
                .turn
                .min_confidence
                .unwrap_or(defaults.turn.min_confidence),
            turn_timeout: secs(fc.turn.turn_timeout_secs).unwrap_or(defaults.turn.turn_timeout),
            listen_timeout: secs(fc.turn.listen_timeout_secs)
                .unwrap_or(defaults.turn.listen_timeout),
            post_turn_delay: secs(fc.turn.post_turn_delay_secs)
                .unwrap_or(defaults.turn.post_turn_delay),
            exit_phrases: fc.turn.exit_phrases.unwrap_or(defaults.turn.exit_phrases),
        };

        let svc = fc.services;
        let services = ServicesConfig {
            stt_url: env("VOXLOOP_STT_URL")
                .or(svc.stt_url)
                .unwrap_or(defaults.services.stt_url),
            stt_model: env("VOXLOOP_STT_MODEL")
                .or(svc.stt_model)
                .unwrap_or(defaults.services.stt_model),
            llm_url: env("VOXLOOP_LLM_URL")
                .or(svc.llm_url)
                .unwrap_or(defaults.services.llm_url),
            llm_model: env("VOXLOOP_LLM_MODEL")
                .or(svc.llm_model)
                .unwrap_or(defaults.services.llm_model),
            tts_url: env("VOXLOOP_TTS_URL")
                .or(svc.tts_url)
                .unwrap_or(defaults.services.tts_url),
            tts_model: env("VOXLOOP_TTS_MODEL")
                .or(svc.tts_model)
                .unwrap_or(defaults.services.tts_model),
            temperature: svc.temperature.unwrap_or(defaults.services.temperature),
            top_p: svc.top_p.unwrap_or(defaults.services.top_p),
            max_tokens: svc.max_tokens.unwrap_or(defaults.services.max_tokens),
            stop: svc.stop.unwrap_or(defaults.services.stop),
        };

        let config = Self {
            audio,
            endpoint,
            speech,
            turn,
            services,
        };
        config.validate()?;
        Ok(config)
    }

    /// Reject values the pipeline cannot run with
    ///
    /// # Errors
    ///
    /// Returns `Error::Config` describing the first invalid value
    pub fn validate(&self) -> Result<()> {
        if self.audio.frame_ms == 0 {
            return Err(Error::Config("audio.frame_ms must be positive".to_string()));
        }
        if self.audio.capture_formats.is_empty() || self.audio.playback_formats.is_empty() {
            return Err(Error::Config(
                "audio format fallback lists must not be empty".to_string(),
            ));
        }
        if self
            .audio
            .capture_formats
            .iter()
            .chain(&self.audio.playback_formats)
            .any(|f| f.sample_rate == 0 || f.channels == 0)
        {
            return Err(Error::Config(
                "audio formats need a positive rate and channel count".to_string(),
            ));
        }
        self.endpoint.validate()?;
        if self.speech.queue_capacity == 0 {
            return Err(Error::Config(
                "speech.queue_capacity must be positive".to_string(),
            ));
        }
        if self.speech.max_sentence_chars == 0 {
            return Err(Error::Config(
                "speech.max_sentence_chars must be positive".to_string(),
            ));
        }
        if self.speech.synthesis_timeout.is_zero() || self.turn.turn_timeout.is_zero() {
            return Err(Error::Config(
                "speech.synthesis_timeout and turn.turn_timeout must be positive".to_string(),
            ));
        }
        if !(0.0..=1.0).contains(&self.turn.min_confidence) {
            return Err(Error::Config(
                "turn.min_confidence must be within 0..=1".to_string(),
            ));
        }
        Ok(())
    }
}

fn env(name: &str) -> Option<String> {
    std::env::var(name).ok().filter(|v| !v.trim().is_empty())
}

fn secs(value: Option<f64>) -> Option<Duration> {
    value
        .filter(|v| v.is_finite() && *v >= 0.0)
        .map(Duration::from_secs_f64)
}
