//! TOML configuration file loading
//!
//! Supports `~/.config/voxloop/config.toml` as a persistent config source.
//! All fields are optional; the file is a partial overlay on top of defaults.

use std::path::{Path, PathBuf};

use serde::Deserialize;

/// Top-level TOML configuration file schema
#[derive(Debug, Default, Deserialize)]
pub struct VoxloopConfigFile {
    /// Audio device configuration
    #[serde(default)]
    pub audio: AudioFileConfig,

    /// Endpointing (VAD) tuning
    #[serde(default)]
    pub endpoint: EndpointFileConfig,

    /// Speech output configuration
    #[serde(default)]
    pub speech: SpeechFileConfig,

    /// Turn-taking policy
    #[serde(default)]
    pub turn: TurnFileConfig,

    /// External STT/LLM/TTS services
    #[serde(default)]
    pub services: ServicesFileConfig,
}

/// Audio device configuration
#[derive(Debug, Default, Deserialize)]
pub struct AudioFileConfig {
    /// Microphone hint (device index or name fragment)
    pub mic_target: Option<String>,

    /// Speaker hint (device index or name fragment)
    pub speaker_target: Option<String>,

    /// Frame duration in milliseconds
    pub frame_ms: Option<u32>,

    /// Capture fallback formats as `[sample_rate, channels]` pairs
    pub capture_formats: Option<Vec<(u32, u16)>>,

    /// Playback fallback formats as `[sample_rate, channels]` pairs
    pub playback_formats: Option<Vec<(u32, u16)>>,

    /// Seconds without samples before the capture device is considered lost
    pub stall_timeout_secs: Option<f64>,
}

/// Endpointing configuration
#[derive(Debug, Default, Deserialize)]
pub struct EndpointFileConfig {
    pub calibration_frames: Option<usize>,
    pub trigger_multiplier: Option<f32>,
    pub release_multiplier: Option<f32>,
    pub min_noise_floor: Option<f32>,
    pub trigger_frames: Option<usize>,
    pub pre_roll_frames: Option<usize>,
    pub silence_hang_ms: Option<u32>,
    pub min_speech_ms: Option<u32>,
    pub max_utterance_ms: Option<u32>,
}

/// Speech output configuration
#[derive(Debug, Default, Deserialize)]
pub struct SpeechFileConfig {
    /// Maximum sentences waiting for synthesis
    pub queue_capacity: Option<usize>,

    /// Length after which an unterminated sentence is force-split
    pub max_sentence_chars: Option<usize>,

    /// TTS speed multiplier
    pub tts_speed: Option<f32>,

    /// Bound on one synthesis request
    pub synthesis_timeout_secs: Option<f64>,

    /// Voice selection
    #[serde(default)]
    pub voices: VoicesFileConfig,
}

/// Voice selection per language
#[derive(Debug, Default, Deserialize)]
pub struct VoicesFileConfig {
    pub zh: Option<String>,
    pub zh_alternates: Option<Vec<String>>,
    pub en: Option<String>,
    pub en_alternates: Option<Vec<String>>,
    pub default: Option<String>,
}

/// Turn-taking configuration
#[derive(Debug, Default, Deserialize)]
pub struct TurnFileConfig {
    pub min_confidence: Option<f32>,
    pub turn_timeout_secs: Option<f64>,
    pub listen_timeout_secs: Option<f64>,
    pub post_turn_delay_secs: Option<f64>,
    pub exit_phrases: Option<Vec<String>>,
}

/// External service configuration
#[derive(Debug, Default, Deserialize)]
pub struct ServicesFileConfig {
    pub stt_url: Option<String>,
    pub stt_model: Option<String>,
    pub llm_url: Option<String>,
    pub llm_model: Option<String>,
    pub tts_url: Option<String>,
    pub tts_model: Option<String>,
    pub temperature: Option<f32>,
    pub top_p: Option<f32>,
    pub max_tokens: Option<u32>,
    pub stop: Option<Vec<String>>,
}

/// Load the TOML config file
///
/// Uses `path` when given, otherwise the standard location. Returns
/// `VoxloopConfigFile::default()` if the file doesn't exist or can't be parsed.
pub fn load_config_file(path: Option<&Path>) -> VoxloopConfigFile {
    let Some(path) = path.map(Path::to_path_buf).or_else(config_file_path) else {
        return VoxloopConfigFile::default();
    };

    if !path.exists() {
        return VoxloopConfigFile::default();
    }

    match std::fs::read_to_string(&path) {
        Ok(content) => match parse_config_file(&content) {
            Ok(config) => {
                tracing::info!(path = %path.display(), "loaded config file");
                config
            }
            Err(e) => {
                tracing::warn!(
                    path = %path.display(),
                    error = %e,
                    "failed to parse config file, using defaults"
                );
                VoxloopConfigFile::default()
            }
        },
        Err(e) => {
            tracing::warn!(
                path = %path.display(),
                error = %e,
                "failed to read config file"
            );
            VoxloopConfigFile::default()
        }
    }
}

/// Parse config file contents
///
/// # Errors
///
/// Returns error if the TOML is malformed
pub fn parse_config_file(content: &str) -> crate::Result<VoxloopConfigFile> {
    Ok(toml::from_str(content)?)
}

/// Return the config file path: `~/.config/voxloop/config.toml`
pub fn config_file_path() -> Option<PathBuf> {
    directories::BaseDirs::new().map(|d| d.config_dir().join("voxloop").join("config.toml"))
}
