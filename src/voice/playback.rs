//! Audio playback to speakers

use std::io::Cursor;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use cpal::traits::{DeviceTrait, StreamTrait};
use rubato::{FftFixedIn, Resampler};

use super::capture::samples_duration;
use super::device::{
    AudioDeviceResolver, AudioFormat, DeviceKind, DeviceTarget, open_target, stream_config,
};
use crate::{Error, Result};

/// Input block size for the resampler
const RESAMPLE_CHUNK: usize = 1024;

/// Mono audio produced by synthesis
#[derive(Debug, Clone, PartialEq)]
pub struct SpeechAudio {
    pub samples: Vec<f32>,
    pub sample_rate: u32,
}

impl SpeechAudio {
    #[must_use]
    pub fn duration(&self) -> Duration {
        samples_duration(self.samples.len(), self.sample_rate)
    }
}

/// Output device the playback worker writes to
#[async_trait]
pub trait AudioSink: Send {
    /// Play `audio` to completion
    ///
    /// # Errors
    ///
    /// Returns `PlaybackLost` if the device faults
    async fn play(&mut self, audio: &SpeechAudio) -> Result<()>;

    /// Release the current device and resolve a new one
    ///
    /// # Errors
    ///
    /// Returns `DeviceUnavailable` if no playback candidate opens
    async fn reopen(&mut self) -> Result<DeviceTarget>;
}

/// Plays audio to a resolved output device
///
/// A stream is opened per sentence and dropped when it finishes, so no
/// device handle outlives a failure.
pub struct CpalPlayback {
    resolver: AudioDeviceResolver,
    target: Option<DeviceTarget>,
}

impl CpalPlayback {
    /// Create a playback instance that resolves its device on first use
    #[must_use]
    pub const fn new(resolver: AudioDeviceResolver) -> Self {
        Self {
            resolver,
            target: None,
        }
    }

    /// Create a playback instance for an already resolved target
    #[must_use]
    pub const fn with_target(resolver: AudioDeviceResolver, target: DeviceTarget) -> Self {
        Self {
            resolver,
            target: Some(target),
        }
    }

    async fn resolve(&self) -> Result<DeviceTarget> {
        let resolver = self.resolver.clone();
        tokio::task::spawn_blocking(move || resolver.resolve(DeviceKind::Playback))
            .await
            .map_err(|e| Error::Audio(e.to_string()))?
    }
}

#[async_trait]
impl AudioSink for CpalPlayback {
    async fn play(&mut self, audio: &SpeechAudio) -> Result<()> {
        if audio.samples.is_empty() {
            return Ok(());
        }

        let target = match &self.target {
            Some(target) => target.clone(),
            None => {
                let target = self.resolve().await?;
                self.target = Some(target.clone());
                target
            }
        };

        let samples = resample(&audio.samples, audio.sample_rate, target.sample_rate)?;

        tokio::task::spawn_blocking(move || play_samples_blocking(&target, samples))
            .await
            .map_err(|e| Error::PlaybackLost(e.to_string()))?
    }

    async fn reopen(&mut self) -> Result<DeviceTarget> {
        self.target = None;
        let target = self.resolve().await?;
        self.target = Some(target.clone());
        Ok(target)
    }
}

/// Play samples in a blocking manner
fn play_samples_blocking(target: &DeviceTarget, samples: Vec<f32>) -> Result<()> {
    let device = open_target(target).map_err(|e| Error::PlaybackLost(e.to_string()))?;
    let config = stream_config(AudioFormat::new(target.sample_rate, target.channel_count));
    let channels = usize::from(target.channel_count.max(1));

    let sample_count = samples.len();
    let finished = Arc::new(AtomicBool::new(false));
    let faulted = Arc::new(AtomicBool::new(false));
    let finished_cb = Arc::clone(&finished);
    let faulted_cb = Arc::clone(&faulted);

    let mut position = 0usize;
    let stream = device
        .build_output_stream(
            &config,
            move |data: &mut [f32], _: &cpal::OutputCallbackInfo| {
                for frame in data.chunks_mut(channels) {
                    let sample = samples.get(position).copied().unwrap_or(0.0);
                    frame.fill(sample);
                    if position < samples.len() {
                        position += 1;
                    } else {
                        finished_cb.store(true, Ordering::Release);
                    }
                }
            },
            move |err| {
                tracing::error!(error = %err, "audio playback error");
                faulted_cb.store(true, Ordering::Release);
            },
            None,
        )
        .map_err(|e| Error::PlaybackLost(e.to_string()))?;

    stream
        .play()
        .map_err(|e| Error::PlaybackLost(e.to_string()))?;

    // Poll for completion with timeout
    let timeout = samples_duration(sample_count, target.sample_rate) + Duration::from_millis(500);
    let start = Instant::now();

    while !finished.load(Ordering::Acquire) {
        if faulted.load(Ordering::Acquire) {
            return Err(Error::PlaybackLost(format!("{target} faulted")));
        }
        if start.elapsed() > timeout {
            return Err(Error::PlaybackLost(format!("{target} stalled")));
        }
        std::thread::sleep(Duration::from_millis(20));
    }

    // Small delay to ensure audio finishes
    std::thread::sleep(Duration::from_millis(100));

    drop(stream);
    tracing::debug!(samples = sample_count, "playback complete");

    Ok(())
}

/// Resample mono audio between rates
///
/// # Errors
///
/// Returns error if the resampler rejects the rates
pub fn resample(samples: &[f32], from: u32, to: u32) -> Result<Vec<f32>> {
    if from == to || samples.is_empty() {
        return Ok(samples.to_vec());
    }
    if from == 0 || to == 0 {
        return Err(Error::Audio(format!("cannot resample {from}Hz to {to}Hz")));
    }

    let audio_err = |e: &dyn std::fmt::Display| Error::Audio(format!("resample: {e}"));

    let mut resampler = FftFixedIn::<f32>::new(from as usize, to as usize, RESAMPLE_CHUNK, 2, 1)
        .map_err(|e| audio_err(&e))?;

    let expected = usize::try_from(samples.len() as u64 * u64::from(to) / u64::from(from))
        .unwrap_or(usize::MAX);
    let delay = resampler.output_delay();
    let mut out = Vec::with_capacity(expected + delay + RESAMPLE_CHUNK);

    let mut chunks = samples.chunks_exact(RESAMPLE_CHUNK);
    for chunk in &mut chunks {
        let wave = resampler
            .process(&[chunk], None)
            .map_err(|e| audio_err(&e))?;
        out.extend_from_slice(&wave[0]);
    }

    let rest = chunks.remainder();
    if !rest.is_empty() {
        let wave = resampler
            .process_partial(Some(&[rest]), None)
            .map_err(|e| audio_err(&e))?;
        out.extend_from_slice(&wave[0]);
    }

    // Flush the filter tail
    while out.len() < expected + delay {
        let wave = resampler
            .process_partial::<&[f32]>(None, None)
            .map_err(|e| audio_err(&e))?;
        if wave[0].is_empty() {
            break;
        }
        out.extend_from_slice(&wave[0]);
    }

    let start = delay.min(out.len());
    let mut out = out.split_off(start);
    out.truncate(expected);
    Ok(out)
}

/// Decode MP3 bytes to mono f32 samples
///
/// # Errors
///
/// Returns error if the stream is not valid MP3
pub fn decode_mp3(mp3_data: &[u8]) -> Result<SpeechAudio> {
    let mut decoder = minimp3::Decoder::new(Cursor::new(mp3_data));
    let mut samples = Vec::new();
    let mut sample_rate = 0u32;

    loop {
        match decoder.next_frame() {
            Ok(frame) => {
                sample_rate = u32::try_from(frame.sample_rate).unwrap_or(0);

                // Convert i16 samples to f32 and handle stereo to mono
                if frame.channels == 2 {
                    samples.extend(frame.data.chunks(2).map(|chunk| {
                        let left = f32::from(chunk[0]) / 32768.0;
                        let right = f32::from(chunk.get(1).copied().unwrap_or(chunk[0])) / 32768.0;
                        f32::midpoint(left, right)
                    }));
                } else {
                    samples.extend(frame.data.iter().map(|&s| f32::from(s) / 32768.0));
                }
            }
            Err(minimp3::Error::Eof) => break,
            Err(e) => return Err(Error::Synthesis(format!("MP3 decode error: {e}"))),
        }
    }

    if sample_rate == 0 {
        return Err(Error::Synthesis("MP3 stream contained no frames".to_string()));
    }

    Ok(SpeechAudio {
        samples,
        sample_rate,
    })
}
