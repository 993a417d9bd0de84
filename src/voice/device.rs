//! Audio device resolution with ordered fallback
//!
//! Consumer audio hardware is unreliable: USB microphones refuse 16kHz mono,
//! Bluetooth sinks disappear mid-session. Resolution walks an explicit list of
//! candidates (device selector × format) and returns the first one the backend
//! can actually open. The resolver holds no open handles, so it is re-invoked
//! whenever capture or playback reports a fault.

use std::fmt;
use std::sync::Arc;

use cpal::traits::{DeviceTrait, HostTrait};
use cpal::{Device, SampleRate, StreamConfig};

use crate::config::AudioConfig;
use crate::{Error, Result};

/// Identifier used for the host's default device
pub const DEFAULT_DEVICE: &str = "default";

/// Direction of an audio device
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DeviceKind {
    /// Microphone input
    Capture,
    /// Speaker output
    Playback,
}

impl fmt::Display for DeviceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Capture => f.write_str("capture"),
            Self::Playback => f.write_str("playback"),
        }
    }
}

/// Which device a candidate refers to
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeviceSelector {
    /// User-supplied hint: device index or case-insensitive name fragment
    Named(String),
    /// Whatever the host reports as default
    SystemDefault,
}

impl fmt::Display for DeviceSelector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Named(name) => f.write_str(name),
            Self::SystemDefault => f.write_str(DEFAULT_DEVICE),
        }
    }
}

/// Sample rate and channel count pair
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AudioFormat {
    pub sample_rate: u32,
    pub channels: u16,
}

impl AudioFormat {
    #[must_use]
    pub const fn new(sample_rate: u32, channels: u16) -> Self {
        Self {
            sample_rate,
            channels,
        }
    }
}

/// One entry in the fallback chain
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceCandidate {
    pub kind: DeviceKind,
    pub selector: DeviceSelector,
    pub format: AudioFormat,
}

impl DeviceCandidate {
    /// Short description for logs and `DeviceUnavailable` errors
    #[must_use]
    pub fn describe(&self) -> String {
        format!(
            "{}@{}Hz/{}ch",
            self.selector, self.format.sample_rate, self.format.channels
        )
    }
}

/// A concrete, openable capture or playback target
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceTarget {
    pub kind: DeviceKind,
    /// Device name as reported by the host, or [`DEFAULT_DEVICE`]
    pub identifier: String,
    pub sample_rate: u32,
    pub channel_count: u16,
}

impl fmt::Display for DeviceTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} {} @ {}Hz/{}ch",
            self.kind, self.identifier, self.sample_rate, self.channel_count
        )
    }
}

/// Audio subsystem queried by the resolver
pub trait AudioBackend: Send + Sync {
    /// Try to open the candidate, returning the concrete target on success
    ///
    /// # Errors
    ///
    /// Returns error if the device is missing or refuses the format
    fn probe(&self, candidate: &DeviceCandidate) -> Result<DeviceTarget>;
}

/// Resolves device hints into concrete targets
#[derive(Clone)]
pub struct AudioDeviceResolver {
    backend: Arc<dyn AudioBackend>,
    capture_hint: Option<String>,
    playback_hint: Option<String>,
    capture_formats: Vec<AudioFormat>,
    playback_formats: Vec<AudioFormat>,
}

impl AudioDeviceResolver {
    /// Create a resolver from the audio configuration
    #[must_use]
    pub fn new(backend: Arc<dyn AudioBackend>, config: &AudioConfig) -> Self {
        Self {
            backend,
            capture_hint: normalize_hint(config.mic_target.as_deref()),
            playback_hint: normalize_hint(config.speaker_target.as_deref()),
            capture_formats: config.capture_formats.clone(),
            playback_formats: config.playback_formats.clone(),
        }
    }

    /// Ordered fallback chain: hinted device first, then the system default,
    /// each across every configured format
    #[must_use]
    pub fn candidates(&self, kind: DeviceKind) -> Vec<DeviceCandidate> {
        let (hint, formats) = match kind {
            DeviceKind::Capture => (&self.capture_hint, &self.capture_formats),
            DeviceKind::Playback => (&self.playback_hint, &self.playback_formats),
        };

        let mut selectors = Vec::with_capacity(2);
        if let Some(hint) = hint {
            selectors.push(DeviceSelector::Named(hint.clone()));
        }
        selectors.push(DeviceSelector::SystemDefault);

        selectors
            .into_iter()
            .flat_map(|selector| {
                formats.iter().map(move |&format| DeviceCandidate {
                    kind,
                    selector: selector.clone(),
                    format,
                })
            })
            .collect()
    }

    /// Return the first candidate that opens
    ///
    /// # Errors
    ///
    /// Returns `DeviceUnavailable` if every candidate fails
    pub fn resolve(&self, kind: DeviceKind) -> Result<DeviceTarget> {
        let candidates = self.candidates(kind);
        let mut tried = Vec::with_capacity(candidates.len());

        for candidate in &candidates {
            match self.backend.probe(candidate) {
                Ok(target) => {
                    tracing::info!(target = %target, "resolved audio device");
                    return Ok(target);
                }
                Err(e) => {
                    tracing::warn!(
                        candidate = %candidate.describe(),
                        error = %e,
                        "audio candidate rejected, trying next"
                    );
                    tried.push(candidate.describe());
                }
            }
        }

        Err(Error::DeviceUnavailable { kind, tried })
    }

    /// Resolve capture and playback independently
    ///
    /// # Errors
    ///
    /// Returns `DeviceUnavailable` if either direction has no usable candidate
    pub fn resolve_all(&self) -> Result<(DeviceTarget, DeviceTarget)> {
        Ok((
            self.resolve(DeviceKind::Capture)?,
            self.resolve(DeviceKind::Playback)?,
        ))
    }
}

fn normalize_hint(hint: Option<&str>) -> Option<String> {
    hint.map(str::trim)
        .filter(|h| !h.is_empty() && !h.eq_ignore_ascii_case(DEFAULT_DEVICE))
        .map(ToString::to_string)
}

/// `cpal` host backend
#[derive(Debug, Default, Clone, Copy)]
pub struct CpalBackend;

impl AudioBackend for CpalBackend {
    fn probe(&self, candidate: &DeviceCandidate) -> Result<DeviceTarget> {
        let device = find_device(candidate.kind, &candidate.selector)?;
        let config = stream_config(candidate.format);

        // Building a stream is the only reliable way to know the format is accepted
        match candidate.kind {
            DeviceKind::Capture => {
                let stream = device
                    .build_input_stream(
                        &config,
                        |_: &[f32], _: &cpal::InputCallbackInfo| {},
                        |err| tracing::trace!(error = %err, "probe stream error"),
                        None,
                    )
                    .map_err(|e| Error::Audio(e.to_string()))?;
                drop(stream);
            }
            DeviceKind::Playback => {
                let stream = device
                    .build_output_stream(
                        &config,
                        |data: &mut [f32], _: &cpal::OutputCallbackInfo| data.fill(0.0),
                        |err| tracing::trace!(error = %err, "probe stream error"),
                        None,
                    )
                    .map_err(|e| Error::Audio(e.to_string()))?;
                drop(stream);
            }
        }

        let identifier = match &candidate.selector {
            DeviceSelector::Named(_) => device.name().map_err(|e| Error::Audio(e.to_string()))?,
            DeviceSelector::SystemDefault => DEFAULT_DEVICE.to_string(),
        };

        Ok(DeviceTarget {
            kind: candidate.kind,
            identifier,
            sample_rate: candidate.format.sample_rate,
            channel_count: candidate.format.channels,
        })
    }
}

/// Build a `cpal` stream config for a format
#[must_use]
pub fn stream_config(format: AudioFormat) -> StreamConfig {
    StreamConfig {
        channels: format.channels,
        sample_rate: SampleRate(format.sample_rate),
        buffer_size: cpal::BufferSize::Default,
    }
}

/// Look up the `cpal` device behind a target
///
/// # Errors
///
/// Returns error if the device has disappeared
pub fn open_target(target: &DeviceTarget) -> Result<Device> {
    let selector = if target.identifier == DEFAULT_DEVICE {
        DeviceSelector::SystemDefault
    } else {
        DeviceSelector::Named(target.identifier.clone())
    };
    find_device(target.kind, &selector)
}

fn find_device(kind: DeviceKind, selector: &DeviceSelector) -> Result<Device> {
    let host = cpal::default_host();

    match selector {
        DeviceSelector::SystemDefault => {
            let device = match kind {
                DeviceKind::Capture => host.default_input_device(),
                DeviceKind::Playback => host.default_output_device(),
            };
            device.ok_or_else(|| Error::Audio(format!("no default {kind} device")))
        }
        DeviceSelector::Named(hint) => {
            let devices = match kind {
                DeviceKind::Capture => host.input_devices(),
                DeviceKind::Playback => host.output_devices(),
            };
            let devices: Vec<Device> = devices
                .map_err(|e| Error::Audio(e.to_string()))?
                .collect();

            if let Ok(index) = hint.parse::<usize>() {
                return devices
                    .into_iter()
                    .nth(index)
                    .ok_or_else(|| Error::Audio(format!("no {kind} device at index {index}")));
            }

            let needle = hint.to_lowercase();
            devices
                .into_iter()
                .find(|d| {
                    d.name()
                        .map(|n| n.to_lowercase().contains(&needle))
                        .unwrap_or(false)
                })
                .ok_or_else(|| Error::Audio(format!("no {kind} device matching \"{hint}\"")))
        }
    }
}
