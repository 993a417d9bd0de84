//! Audio capture from microphone

use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use cpal::traits::{DeviceTrait, StreamTrait};
use cpal::Stream;

use super::device::{AudioFormat, DeviceTarget, open_target, stream_config};
use crate::{Error, Result};

/// Sample rate expected by speech models (16kHz)
pub const SAMPLE_RATE: u32 = 16000;

/// A fixed-duration block of mono samples
#[derive(Debug, Clone, PartialEq)]
pub struct AudioFrame {
    /// Monotonic per-source sequence number
    pub sequence: u64,
    /// Mono samples in [-1.0, 1.0]
    pub samples: Vec<f32>,
    pub sample_rate: u32,
}

impl AudioFrame {
    /// RMS energy of the frame
    #[must_use]
    pub fn rms(&self) -> f32 {
        rms(&self.samples)
    }

    /// Wall-clock duration of the frame
    #[must_use]
    pub fn duration(&self) -> Duration {
        samples_duration(self.samples.len(), self.sample_rate)
    }
}

/// Blocking pull interface over a live capture device
pub trait FrameSource {
    /// Block until the next frame is available
    ///
    /// # Errors
    ///
    /// Returns `CaptureLost` if the device faults or stops producing data
    fn next_frame(&mut self) -> Result<AudioFrame>;

    /// Drop anything buffered so far (e.g. audio captured during playback)
    fn discard_pending(&mut self);

    /// Mono sample rate of produced frames
    fn sample_rate(&self) -> u32;
}

/// Opens frame sources for resolved capture targets
///
/// Sources are created on the capture thread because `cpal` streams are not `Send`.
pub trait CaptureOpener: Send {
    /// Open a capture stream on `target`
    ///
    /// # Errors
    ///
    /// Returns error if the device cannot be opened
    fn open(&mut self, target: &DeviceTarget, frame_ms: u32) -> Result<Box<dyn FrameSource>>;
}

/// Opens `cpal` capture streams
#[derive(Debug, Clone, Copy)]
pub struct CpalCaptureOpener {
    stall_timeout: Duration,
}

impl CpalCaptureOpener {
    #[must_use]
    pub const fn new(stall_timeout: Duration) -> Self {
        Self { stall_timeout }
    }
}

impl CaptureOpener for CpalCaptureOpener {
    fn open(&mut self, target: &DeviceTarget, frame_ms: u32) -> Result<Box<dyn FrameSource>> {
        Ok(Box::new(CpalCapture::open(
            target,
            frame_ms,
            self.stall_timeout,
        )?))
    }
}

/// Captures audio from a resolved input device
pub struct CpalCapture {
    // Dropping the stream closes the device
    _stream: Stream,
    buffer: Arc<Mutex<Vec<f32>>>,
    fault: Arc<Mutex<Option<String>>>,
    channels: usize,
    sample_rate: u32,
    frame_len: usize,
    sequence: u64,
    stall_timeout: Duration,
    last_data: Instant,
    seen_len: usize,
}

impl CpalCapture {
    /// Open and start capturing from `target`
    ///
    /// # Errors
    ///
    /// Returns error if the device is gone or refuses the format
    pub fn open(target: &DeviceTarget, frame_ms: u32, stall_timeout: Duration) -> Result<Self> {
        let device = open_target(target)?;
        let config = stream_config(AudioFormat::new(target.sample_rate, target.channel_count));

        let buffer = Arc::new(Mutex::new(Vec::new()));
        let fault = Arc::new(Mutex::new(None));

        let data_buffer = Arc::clone(&buffer);
        let error_fault = Arc::clone(&fault);

        let stream = device
            .build_input_stream(
                &config,
                move |data: &[f32], _: &cpal::InputCallbackInfo| {
                    if let Ok(mut buf) = data_buffer.lock() {
                        buf.extend_from_slice(data);
                    }
                },
                move |err| {
                    tracing::error!(error = %err, "audio capture error");
                    if let Ok(mut fault) = error_fault.lock() {
                        *fault = Some(err.to_string());
                    }
                },
                None,
            )
            .map_err(|e| Error::CaptureLost(e.to_string()))?;

        stream
            .play()
            .map_err(|e| Error::CaptureLost(e.to_string()))?;

        tracing::debug!(
            target = %target,
            frame_ms,
            "audio capture started"
        );

        Ok(Self {
            _stream: stream,
            buffer,
            fault,
            channels: usize::from(target.channel_count.max(1)),
            sample_rate: target.sample_rate,
            frame_len: frame_samples(target.sample_rate, frame_ms),
            sequence: 0,
            stall_timeout,
            last_data: Instant::now(),
            seen_len: 0,
        })
    }

    fn take_frame(&mut self) -> Option<Vec<f32>> {
        let wanted = self.frame_len * self.channels;
        let mut buf = self.buffer.lock().ok()?;

        if buf.len() != self.seen_len {
            self.last_data = Instant::now();
        }

        if buf.len() < wanted {
            self.seen_len = buf.len();
            return None;
        }

        let interleaved: Vec<f32> = buf.drain(..wanted).collect();
        self.seen_len = buf.len();
        drop(buf);
        Some(downmix(&interleaved, self.channels))
    }
}

impl FrameSource for CpalCapture {
    fn next_frame(&mut self) -> Result<AudioFrame> {
        loop {
            if let Some(err) = self.fault.lock().ok().and_then(|mut f| f.take()) {
                return Err(Error::CaptureLost(err));
            }

            if let Some(samples) = self.take_frame() {
                let frame = AudioFrame {
                    sequence: self.sequence,
                    samples,
                    sample_rate: self.sample_rate,
                };
                self.sequence += 1;
                return Ok(frame);
            }

            if self.last_data.elapsed() > self.stall_timeout {
                return Err(Error::CaptureLost(format!(
                    "no audio data for {:.1}s",
                    self.stall_timeout.as_secs_f32()
                )));
            }

            std::thread::sleep(Duration::from_millis(5));
        }
    }

    fn discard_pending(&mut self) {
        if let Ok(mut buf) = self.buffer.lock() {
            buf.clear();
        }
        self.seen_len = 0;
        self.last_data = Instant::now();
    }

    fn sample_rate(&self) -> u32 {
        self.sample_rate
    }
}

impl Drop for CpalCapture {
    fn drop(&mut self) {
        tracing::debug!("audio capture stopped");
    }
}

/// Number of mono samples in one frame
#[must_use]
pub fn frame_samples(sample_rate: u32, frame_ms: u32) -> usize {
    let samples = u64::from(sample_rate) * u64::from(frame_ms) / 1000;
    usize::try_from(samples).unwrap_or(usize::MAX).max(1)
}

/// Duration of `len` mono samples at `sample_rate`
#[must_use]
pub fn samples_duration(len: usize, sample_rate: u32) -> Duration {
    if sample_rate == 0 {
        return Duration::ZERO;
    }
    let nanos = (len as u128) * 1_000_000_000 / u128::from(sample_rate);
    Duration::from_nanos(u64::try_from(nanos).unwrap_or(u64::MAX))
}

/// Average interleaved channels into mono
#[must_use]
#[allow(clippy::cast_precision_loss)]
pub fn downmix(interleaved: &[f32], channels: usize) -> Vec<f32> {
    if channels <= 1 {
        return interleaved.to_vec();
    }
    interleaved
        .chunks(channels)
        .map(|frame| frame.iter().sum::<f32>() / frame.len() as f32)
        .collect()
}

/// Calculate RMS energy of audio samples
#[must_use]
#[allow(clippy::cast_precision_loss)]
pub fn rms(samples: &[f32]) -> f32 {
    if samples.is_empty() {
        return 0.0;
    }
    let sum_squares: f32 = samples.iter().map(|s| s * s).sum();
    (sum_squares / samples.len() as f32).sqrt()
}

/// Convert f32 samples to WAV bytes for STT APIs
///
/// # Errors
///
/// Returns error if WAV encoding fails
pub fn samples_to_wav(samples: &[f32], sample_rate: u32) -> Result<Vec<u8>> {
    let spec = hound::WavSpec {
        channels: 1,
        sample_rate,
        bits_per_sample: 16,
        sample_format: hound::SampleFormat::Int,
    };

    let mut cursor = std::io::Cursor::new(Vec::new());
    {
        let mut writer =
            hound::WavWriter::new(&mut cursor, spec).map_err(|e| Error::Audio(e.to_string()))?;

        for &sample in samples {
            // Convert f32 [-1.0, 1.0] to i16
            #[allow(clippy::cast_possible_truncation)]
            let sample_i16 = (sample * 32767.0).clamp(-32768.0, 32767.0) as i16;
            writer
                .write_sample(sample_i16)
                .map_err(|e| Error::Audio(e.to_string()))?;
        }

        writer.finalize().map_err(|e| Error::Audio(e.to_string()))?;
    }

    Ok(cursor.into_inner())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rms() {
        assert!(rms(&[0.0; 100]) < 0.001);
        assert!(rms(&[0.5; 100]) > 0.4);
        assert!(rms(&[]).abs() < f32::EPSILON);
    }

    #[test]
    fn test_frame_samples() {
        assert_eq!(frame_samples(16000, 30), 480);
        assert_eq!(frame_samples(48000, 30), 1440);
        assert_eq!(frame_samples(8000, 0), 1);
    }

    #[test]
    fn test_downmix_stereo() {
        let mono = downmix(&[0.2, 0.4, -1.0, 1.0], 2);
        assert_eq!(mono.len(), 2);
        assert!((mono[0] - 0.3).abs() < 1e-6);
        assert!(mono[1].abs() < 1e-6);
    }

    #[test]
    fn test_frame_duration() {
        let frame = AudioFrame {
            sequence: 0,
            samples: vec![0.0; 480],
            sample_rate: 16000,
        };
        assert_eq!(frame.duration(), Duration::from_millis(30));
    }
}
