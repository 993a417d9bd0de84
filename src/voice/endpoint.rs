//! Speech endpointing (VAD)
//!
//! Frames flow through `Calibrating → Listening → InUtterance → Flushing → Listening`.
//! Thresholds are relative to a noise floor measured at session start, with a
//! higher trigger than release multiplier so that borderline energy does not
//! flap an utterance open and shut.

use std::collections::VecDeque;
use std::time::Duration;

use super::capture::{AudioFrame, samples_duration};
use crate::{Error, Result};

/// Endpointer tuning, expressed in frames
#[derive(Debug, Clone, PartialEq)]
pub struct EndpointerConfig {
    /// Frames consumed to estimate the noise floor
    pub calibration_frames: usize,
    /// Speech starts above `noise_floor * trigger_multiplier`
    pub trigger_multiplier: f32,
    /// Speech ends below `noise_floor * release_multiplier`
    pub release_multiplier: f32,
    /// Lower bound on the calibrated floor (RMS, full scale = 1.0)
    pub min_noise_floor: f32,
    /// Consecutive loud frames needed to open an utterance
    pub trigger_frames: usize,
    /// Quiet frames kept ahead of the trigger run
    pub pre_roll_frames: usize,
    /// Consecutive quiet frames that close an utterance
    pub hang_frames: usize,
    /// Utterances with fewer voiced frames are dropped as noise
    pub min_speech_frames: usize,
    /// Utterances are force-flushed at this length
    pub max_utterance_frames: usize,
}

impl EndpointerConfig {
    /// Derive frame counts from millisecond timings
    #[must_use]
    pub fn for_frame_ms(
        frame_ms: u32,
        silence_hang_ms: u32,
        min_speech_ms: u32,
        max_utterance_ms: u32,
    ) -> Self {
        let frames = |ms: u32| -> usize {
            let frame_ms = frame_ms.max(1);
            usize::try_from(ms.div_ceil(frame_ms)).unwrap_or(usize::MAX).max(1)
        };

        Self {
            calibration_frames: 10,
            trigger_multiplier: 1.8,
            release_multiplier: 1.3,
            min_noise_floor: 0.002,
            trigger_frames: 3,
            pre_roll_frames: 5,
            hang_frames: frames(silence_hang_ms),
            min_speech_frames: frames(min_speech_ms),
            max_utterance_frames: frames(max_utterance_ms),
        }
    }

    /// Check the tuning is usable
    ///
    /// # Errors
    ///
    /// Returns `Error::Config` on a zero frame count or inverted multipliers
    pub fn validate(&self) -> Result<()> {
        if self.calibration_frames == 0 || self.trigger_frames == 0 || self.hang_frames == 0 {
            return Err(Error::Config(
                "endpoint frame counts must be positive".to_string(),
            ));
        }
        if self.release_multiplier <= 0.0 || self.release_multiplier > self.trigger_multiplier {
            return Err(Error::Config(
                "endpoint release multiplier must be in (0, trigger multiplier]".to_string(),
            ));
        }
        // An utterance opens with the pre-roll and the trigger run already in it
        if self.max_utterance_frames <= self.pre_roll_frames + self.trigger_frames {
            return Err(Error::Config(
                "endpoint max utterance must exceed the pre-roll plus trigger run".to_string(),
            ));
        }
        Ok(())
    }
}

impl Default for EndpointerConfig {
    fn default() -> Self {
        Self::for_frame_ms(30, 800, 300, 15_000)
    }
}

/// Endpointer state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EndpointerState {
    /// Measuring ambient noise
    Calibrating,
    /// Waiting for speech
    Listening,
    /// Accumulating an utterance
    InUtterance,
    /// Emitting the accumulated utterance
    Flushing,
}

/// One spoken segment bounded by silence
#[derive(Debug, Clone)]
pub struct Utterance {
    /// Contiguous frames ordered by sequence number
    pub frames: Vec<AudioFrame>,
    /// Trigger threshold in effect when the utterance was detected
    pub threshold: f32,
    /// Calibrated noise floor
    pub noise_floor: f32,
    /// Flushed because it hit the maximum duration
    pub forced: bool,
}

impl Utterance {
    /// Concatenated mono samples
    #[must_use]
    pub fn samples(&self) -> Vec<f32> {
        self.frames
            .iter()
            .flat_map(|f| f.samples.iter().copied())
            .collect()
    }

    #[must_use]
    pub fn sample_rate(&self) -> u32 {
        self.frames.first().map_or(0, |f| f.sample_rate)
    }

    #[must_use]
    pub fn duration(&self) -> Duration {
        samples_duration(
            self.frames.iter().map(|f| f.samples.len()).sum(),
            self.sample_rate(),
        )
    }

    /// Sequence numbers of the first and last frame
    #[must_use]
    pub fn span(&self) -> Option<(u64, u64)> {
        Some((self.frames.first()?.sequence, self.frames.last()?.sequence))
    }

    /// Frames are gap-free and in order
    #[must_use]
    pub fn is_contiguous(&self) -> bool {
        self.frames
            .windows(2)
            .all(|w| w[1].sequence == w[0].sequence + 1)
    }
}

/// Detects utterance boundaries over a stream of frames
///
/// One instance per capture session; calibration state is never shared.
pub struct Endpointer {
    config: EndpointerConfig,
    state: EndpointerState,
    calibration: Vec<f32>,
    noise_floor: f32,
    recent: VecDeque<AudioFrame>,
    loud_run: usize,
    current: Vec<AudioFrame>,
    silence_run: usize,
}

impl Endpointer {
    #[must_use]
    pub fn new(config: EndpointerConfig) -> Self {
        Self {
            state: EndpointerState::Calibrating,
            calibration: Vec::with_capacity(config.calibration_frames),
            noise_floor: 0.0,
            recent: VecDeque::with_capacity(config.pre_roll_frames + config.trigger_frames),
            loud_run: 0,
            current: Vec::new(),
            silence_run: 0,
            config,
        }
    }

    /// Feed one frame, returning an utterance when one completes
    pub fn push(&mut self, frame: AudioFrame) -> Option<Utterance> {
        match self.state {
            EndpointerState::Calibrating => {
                self.calibrate(frame.rms());
                None
            }
            EndpointerState::Listening => {
                self.listen(frame);
                None
            }
            EndpointerState::InUtterance => self.accumulate(frame),
            EndpointerState::Flushing => {
                self.state = EndpointerState::Listening;
                self.push(frame)
            }
        }
    }

    fn calibrate(&mut self, energy: f32) {
        self.calibration.push(energy);
        if self.calibration.len() < self.config.calibration_frames {
            return;
        }

        let measured = median(&mut self.calibration);
        self.noise_floor = measured.max(self.config.min_noise_floor);
        self.calibration.clear();
        self.state = EndpointerState::Listening;

        tracing::info!(
            noise_floor = self.noise_floor,
            measured,
            trigger = self.trigger_threshold(),
            release = self.release_threshold(),
            "noise floor calibrated"
        );
    }

    fn listen(&mut self, frame: AudioFrame) {
        let energy = frame.rms();
        if energy > self.trigger_threshold() {
            self.loud_run += 1;
        } else {
            self.loud_run = 0;
        }

        self.recent.push_back(frame);
        while self.recent.len() > self.config.pre_roll_frames + self.config.trigger_frames {
            self.recent.pop_front();
        }

        tracing::trace!(energy, loud_run = self.loud_run, "listening");

        if self.loud_run >= self.config.trigger_frames {
            self.current = self.recent.drain(..).collect();
            self.loud_run = 0;
            self.silence_run = 0;
            self.state = EndpointerState::InUtterance;
            tracing::debug!(
                energy,
                pre_roll = self.current.len() - self.config.trigger_frames,
                "speech detected"
            );
        }
    }

    fn accumulate(&mut self, frame: AudioFrame) -> Option<Utterance> {
        let energy = frame.rms();
        if energy < self.release_threshold() {
            self.silence_run += 1;
        } else {
            self.silence_run = 0;
        }
        self.current.push(frame);

        if self.silence_run >= self.config.hang_frames {
            self.state = EndpointerState::Flushing;
            return self.flush(false);
        }

        if self.current.len() >= self.config.max_utterance_frames {
            tracing::debug!(frames = self.current.len(), "max utterance length reached");
            self.state = EndpointerState::Flushing;
            return self.flush(true);
        }

        None
    }

    fn flush(&mut self, forced: bool) -> Option<Utterance> {
        let mut frames = std::mem::take(&mut self.current);
        let keep = frames.len().saturating_sub(self.silence_run);
        frames.truncate(keep);

        self.silence_run = 0;
        self.recent.clear();
        self.state = EndpointerState::Listening;

        let release = self.release_threshold();
        let voiced = frames.iter().filter(|f| f.rms() >= release).count();
        if voiced < self.config.min_speech_frames {
            tracing::debug!(voiced, "utterance too short, dropped as noise");
            return None;
        }

        let utterance = Utterance {
            frames,
            threshold: self.trigger_threshold(),
            noise_floor: self.noise_floor,
            forced,
        };
        tracing::info!(
            frames = utterance.frames.len(),
            duration_ms = utterance.duration().as_millis(),
            forced,
            "utterance complete"
        );
        Some(utterance)
    }

    /// Forget calibration and start over (new session or new device)
    pub fn reset(&mut self) {
        self.state = EndpointerState::Calibrating;
        self.calibration.clear();
        self.noise_floor = 0.0;
        self.discard_partial();
    }

    /// Drop any partial utterance but keep calibration
    pub fn resume(&mut self) {
        self.discard_partial();
        if self.state != EndpointerState::Calibrating {
            self.state = EndpointerState::Listening;
        }
    }

    fn discard_partial(&mut self) {
        self.recent.clear();
        self.current.clear();
        self.loud_run = 0;
        self.silence_run = 0;
    }

    #[must_use]
    pub const fn state(&self) -> EndpointerState {
        self.state
    }

    /// Calibrated noise floor, `None` while calibrating
    #[must_use]
    pub fn noise_floor(&self) -> Option<f32> {
        (self.state != EndpointerState::Calibrating).then_some(self.noise_floor)
    }

    #[must_use]
    pub fn trigger_threshold(&self) -> f32 {
        self.noise_floor * self.config.trigger_multiplier
    }

    #[must_use]
    pub fn release_threshold(&self) -> f32 {
        self.noise_floor * self.config.release_multiplier
    }

    #[must_use]
    pub const fn config(&self) -> &EndpointerConfig {
        &self.config
    }
}

fn median(values: &mut [f32]) -> f32 {
    if values.is_empty() {
        return 0.0;
    }
    values.sort_by(f32::total_cmp);
    let mid = values.len() / 2;
    if values.len() % 2 == 0 {
        f32::midpoint(values[mid - 1], values[mid])
    } else {
        values[mid]
    }
}
