//! Shared test utilities
//!
//! Fakes for every hardware and inference seam, so the pipeline runs without
//! audio devices or model servers.

#![allow(dead_code)]

use std::collections::{HashSet, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use futures::StreamExt;
use voxloop::config::AudioConfig;
use voxloop::providers::TokenStream;
use voxloop::voice::{
    AudioBackend, AudioDeviceResolver, AudioFrame, AudioSink, CaptureOpener, DeviceCandidate,
    DeviceKind, DeviceSelector, DeviceTarget, FrameSource, SpeechAudio, Utterance,
};
use voxloop::{
    Error, Language, Prompt, ReplyGenerator, Result, Synthesizer, TokenIncrement, Transcriber,
    Transcript,
};

/// Quiet room level
pub const QUIET: f32 = 0.01;
/// Clearly voiced level
pub const LOUD: f32 = 0.2;

/// A 30 ms, 16 kHz frame with constant amplitude (so RMS == `level`)
#[must_use]
pub fn frame(sequence: u64, level: f32) -> AudioFrame {
    AudioFrame {
        sequence,
        samples: vec![level; 480],
        sample_rate: 16000,
    }
}

/// Frames for consecutive `(count, level)` runs
#[must_use]
pub fn frames(runs: &[(usize, f32)]) -> Vec<AudioFrame> {
    runs.iter()
        .flat_map(|&(count, level)| std::iter::repeat_n(level, count))
        .enumerate()
        .map(|(i, level)| frame(i as u64, level))
        .collect()
}

/// Levels for consecutive `(count, level)` runs
#[must_use]
pub fn levels(runs: &[(usize, f32)]) -> Vec<f32> {
    runs.iter()
        .flat_map(|&(count, level)| std::iter::repeat_n(level, count))
        .collect()
}

/// An utterance of `count` voiced frames
#[must_use]
pub fn utterance(count: usize) -> Utterance {
    Utterance {
        frames: frames(&[(count, LOUD)]),
        threshold: QUIET * 1.8,
        noise_floor: QUIET,
        forced: false,
    }
}

/// Backend that accepts candidates matching `accept` and logs every probe
pub struct FakeBackend {
    accept: Box<dyn Fn(&DeviceCandidate) -> bool + Send + Sync>,
    pub probes: Mutex<Vec<String>>,
}

impl FakeBackend {
    #[must_use]
    pub fn accept_all() -> Arc<Self> {
        Self::accepting(|_| true)
    }

    #[must_use]
    pub fn accepting(accept: impl Fn(&DeviceCandidate) -> bool + Send + Sync + 'static) -> Arc<Self> {
        Arc::new(Self {
            accept: Box::new(accept),
            probes: Mutex::new(Vec::new()),
        })
    }

    #[must_use]
    pub fn probes(&self) -> Vec<String> {
        self.probes.lock().unwrap().clone()
    }
}

impl AudioBackend for FakeBackend {
    fn probe(&self, candidate: &DeviceCandidate) -> Result<DeviceTarget> {
        self.probes.lock().unwrap().push(candidate.describe());
        if !(self.accept)(candidate) {
            return Err(Error::Audio(format!("{} refused", candidate.describe())));
        }
        let identifier = match &candidate.selector {
            DeviceSelector::Named(name) => name.clone(),
            DeviceSelector::SystemDefault => "default".to_string(),
        };
        Ok(DeviceTarget {
            kind: candidate.kind,
            identifier,
            sample_rate: candidate.format.sample_rate,
            channel_count: candidate.format.channels,
        })
    }
}

/// Resolver over a fake backend with default formats
#[must_use]
pub fn resolver(backend: Arc<FakeBackend>) -> AudioDeviceResolver {
    AudioDeviceResolver::new(backend, &AudioConfig::default())
}

/// Frame source replaying scripted levels, then quiet frames forever
pub struct ScriptedSource {
    levels: VecDeque<f32>,
    sequence: u64,
    fail_after_script: bool,
}

impl FrameSource for ScriptedSource {
    fn next_frame(&mut self) -> Result<AudioFrame> {
        let level = match self.levels.pop_front() {
            Some(level) => level,
            None if self.fail_after_script => {
                return Err(Error::CaptureLost("unplugged".to_string()));
            }
            None => QUIET,
        };
        let frame = frame(self.sequence, level);
        self.sequence += 1;
        Ok(frame)
    }

    fn discard_pending(&mut self) {}

    fn sample_rate(&self) -> u32 {
        16000
    }
}

/// Opener handing out one script per open call
#[derive(Clone)]
pub struct ScriptedOpener {
    scripts: Arc<Mutex<VecDeque<(Vec<f32>, bool)>>>,
    pub opens: Arc<AtomicUsize>,
}

impl ScriptedOpener {
    #[must_use]
    pub fn new() -> Self {
        Self {
            scripts: Arc::new(Mutex::new(VecDeque::new())),
            opens: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Next device plays `levels` and then stays quiet
    #[must_use]
    pub fn then(self, levels: Vec<f32>) -> Self {
        self.scripts.lock().unwrap().push_back((levels, false));
        self
    }

    /// Next device plays `levels` and then faults
    #[must_use]
    pub fn then_fail(self, levels: Vec<f32>) -> Self {
        self.scripts.lock().unwrap().push_back((levels, true));
        self
    }

    #[must_use]
    pub fn opens(&self) -> usize {
        self.opens.load(Ordering::SeqCst)
    }
}

impl CaptureOpener for ScriptedOpener {
    fn open(&mut self, _target: &DeviceTarget, _frame_ms: u32) -> Result<Box<dyn FrameSource>> {
        self.opens.fetch_add(1, Ordering::SeqCst);
        let (levels, fail_after_script) = self
            .scripts
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or((Vec::new(), false));
        Ok(Box::new(ScriptedSource {
            levels: levels.into(),
            sequence: 0,
            fail_after_script,
        }))
    }
}

/// Transcriber returning scripted results in order
pub struct ScriptedTranscriber {
    results: Mutex<VecDeque<Result<Transcript>>>,
    pub calls: AtomicUsize,
}

impl ScriptedTranscriber {
    #[must_use]
    pub fn new(results: Vec<Result<Transcript>>) -> Arc<Self> {
        Arc::new(Self {
            results: Mutex::new(results.into()),
            calls: AtomicUsize::new(0),
        })
    }

    /// Transcriber that hears each text in turn with full confidence
    #[must_use]
    pub fn hearing(texts: &[(&str, Language)]) -> Arc<Self> {
        Self::new(
            texts
                .iter()
                .map(|&(text, language)| Ok(transcript(text, language, 0.9)))
                .collect(),
        )
    }
}

#[must_use]
pub fn transcript(text: &str, language: Language, confidence: f32) -> Transcript {
    Transcript {
        text: text.to_string(),
        language,
        confidence,
    }
}

#[async_trait]
impl Transcriber for ScriptedTranscriber {
    async fn transcribe(&self, _utterance: &Utterance) -> Result<Transcript> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.results
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| Err(Error::Transcription("no scripted result".to_string())))
    }
}

/// One scripted reply
#[derive(Clone)]
pub enum Reply {
    /// Stream these increments
    Tokens(Vec<String>),
    /// Stream these increments, then fail
    TokensThenError(Vec<String>),
    /// Stream these increments, then hang forever
    TokensThenHang(Vec<String>),
    /// Stream these increments, each after `interval`
    Trickle(Vec<String>, Duration),
    /// Refuse to start
    Refuse,
}

impl Reply {
    #[must_use]
    pub fn tokens(parts: &[&str]) -> Self {
        Self::Tokens(parts.iter().map(ToString::to_string).collect())
    }

    #[must_use]
    pub fn trickle(parts: &[&str], interval: Duration) -> Self {
        Self::Trickle(parts.iter().map(ToString::to_string).collect(), interval)
    }
}

/// Generator returning scripted replies in order and logging prompts
pub struct ScriptedGenerator {
    replies: Mutex<VecDeque<Reply>>,
    pub prompts: Mutex<Vec<Prompt>>,
}

impl ScriptedGenerator {
    #[must_use]
    pub fn new(replies: Vec<Reply>) -> Arc<Self> {
        Arc::new(Self {
            replies: Mutex::new(replies.into()),
            prompts: Mutex::new(Vec::new()),
        })
    }

    #[must_use]
    pub fn prompts(&self) -> Vec<Prompt> {
        self.prompts.lock().unwrap().clone()
    }
}

fn increments(parts: Vec<String>) -> Vec<Result<TokenIncrement>> {
    parts
        .into_iter()
        .enumerate()
        .map(|(index, text)| Ok(TokenIncrement { index, text }))
        .collect()
}

#[async_trait]
impl ReplyGenerator for ScriptedGenerator {
    async fn generate(&self, prompt: &Prompt) -> Result<TokenStream> {
        self.prompts.lock().unwrap().push(prompt.clone());
        let reply = self
            .replies
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or(Reply::Tokens(Vec::new()));

        let stream: TokenStream = match reply {
            Reply::Tokens(parts) => futures::stream::iter(increments(parts)).boxed(),
            Reply::TokensThenError(parts) => {
                let mut items = increments(parts);
                items.push(Err(Error::Generation("model crashed".to_string())));
                futures::stream::iter(items).boxed()
            }
            Reply::TokensThenHang(parts) => futures::stream::iter(increments(parts))
                .chain(futures::stream::pending())
                .boxed(),
            Reply::Trickle(parts, interval) => futures::stream::iter(increments(parts))
                .then(move |item| async move {
                    tokio::time::sleep(interval).await;
                    item
                })
                .boxed(),
            Reply::Refuse => return Err(Error::Generation("connection refused".to_string())),
        };
        Ok(stream)
    }
}

/// Encode text as samples so the sink can tell what it played
#[must_use]
pub fn encode_text(text: &str) -> Vec<f32> {
    text.bytes().map(f32::from).collect()
}

#[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
fn decode_text(samples: &[f32]) -> String {
    let bytes: Vec<u8> = samples.iter().map(|&s| s as u8).collect();
    String::from_utf8_lossy(&bytes).into_owned()
}

/// Synthesizer that knows a fixed set of voices and logs every call
pub struct RecordingSynthesizer {
    missing: HashSet<String>,
    failing_texts: HashSet<String>,
    delay: Duration,
    hangs: bool,
    pub calls: Mutex<Vec<(String, String)>>,
}

impl RecordingSynthesizer {
    fn build(missing: &[&str], failing_texts: &[&str], delay: Duration, hangs: bool) -> Arc<Self> {
        Arc::new(Self {
            missing: missing.iter().map(ToString::to_string).collect(),
            failing_texts: failing_texts.iter().map(ToString::to_string).collect(),
            delay,
            hangs,
            calls: Mutex::new(Vec::new()),
        })
    }

    #[must_use]
    pub fn new() -> Arc<Self> {
        Self::build(&[], &[], Duration::ZERO, false)
    }

    #[must_use]
    pub fn with_missing_voices(missing: &[&str]) -> Arc<Self> {
        Self::build(missing, &[], Duration::ZERO, false)
    }

    #[must_use]
    pub fn failing_on(texts: &[&str]) -> Arc<Self> {
        Self::build(&[], texts, Duration::ZERO, false)
    }

    #[must_use]
    pub fn slow(delay: Duration) -> Arc<Self> {
        Self::build(&[], &[], delay, false)
    }

    /// Never answers
    #[must_use]
    pub fn hanging() -> Arc<Self> {
        Self::build(&[], &[], Duration::ZERO, true)
    }

    /// `(text, voice)` for every synthesis attempt
    #[must_use]
    pub fn calls(&self) -> Vec<(String, String)> {
        self.calls.lock().unwrap().clone()
    }
}

#[async_trait]
impl Synthesizer for RecordingSynthesizer {
    async fn synthesize(&self, text: &str, voice: &str, _language: Language) -> Result<SpeechAudio> {
        self.calls
            .lock()
            .unwrap()
            .push((text.to_string(), voice.to_string()));
        if self.hangs {
            std::future::pending::<()>().await;
        }
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        if self.missing.contains(voice) {
            return Err(Error::VoiceUnavailable {
                voice: voice.to_string(),
            });
        }
        if self.failing_texts.contains(text) {
            return Err(Error::Synthesis("engine crashed".to_string()));
        }
        Ok(SpeechAudio {
            samples: encode_text(text),
            sample_rate: 24000,
        })
    }
}

/// Shared view of what a [`RecordingSink`] played
#[derive(Clone, Default)]
pub struct SinkLog {
    played: Arc<Mutex<Vec<String>>>,
    active: Arc<AtomicUsize>,
    max_active: Arc<AtomicUsize>,
    reopens: Arc<AtomicUsize>,
}

impl SinkLog {
    /// Texts played, in order
    #[must_use]
    pub fn played(&self) -> Vec<String> {
        self.played.lock().unwrap().clone()
    }

    /// Most sentences ever playing at once
    #[must_use]
    pub fn max_active(&self) -> usize {
        self.max_active.load(Ordering::SeqCst)
    }

    #[must_use]
    pub fn reopens(&self) -> usize {
        self.reopens.load(Ordering::SeqCst)
    }
}

/// Sink that records played text and can fault on demand
pub struct RecordingSink {
    log: SinkLog,
    play_time: Duration,
    failures: usize,
    unresolvable: bool,
}

impl RecordingSink {
    #[must_use]
    pub fn new() -> (Box<Self>, SinkLog) {
        Self::build(Duration::from_millis(5), 0)
    }

    /// Each play takes `play_time`
    #[must_use]
    pub fn with_play_time(play_time: Duration) -> (Box<Self>, SinkLog) {
        Self::build(play_time, 0)
    }

    /// The first `failures` plays report a lost device
    #[must_use]
    pub fn failing(failures: usize) -> (Box<Self>, SinkLog) {
        Self::build(Duration::from_millis(5), failures)
    }

    /// Every play reports a lost device and no replacement can be found
    #[must_use]
    pub fn unresolvable() -> (Box<Self>, SinkLog) {
        let (mut sink, log) = Self::build(Duration::from_millis(5), usize::MAX);
        sink.unresolvable = true;
        (sink, log)
    }

    fn build(play_time: Duration, failures: usize) -> (Box<Self>, SinkLog) {
        let log = SinkLog::default();
        let sink = Box::new(Self {
            log: log.clone(),
            play_time,
            failures,
            unresolvable: false,
        });
        (sink, log)
    }
}

#[async_trait]
impl AudioSink for RecordingSink {
    async fn play(&mut self, audio: &SpeechAudio) -> Result<()> {
        if self.failures > 0 {
            self.failures -= 1;
            return Err(Error::PlaybackLost("speaker unplugged".to_string()));
        }

        let now = self.log.active.fetch_add(1, Ordering::SeqCst) + 1;
        self.log.max_active.fetch_max(now, Ordering::SeqCst);
        tokio::time::sleep(self.play_time).await;
        self.log.played.lock().unwrap().push(decode_text(&audio.samples));
        self.log.active.fetch_sub(1, Ordering::SeqCst);
        Ok(())
    }

    async fn reopen(&mut self) -> Result<DeviceTarget> {
        self.log.reopens.fetch_add(1, Ordering::SeqCst);
        if self.unresolvable {
            return Err(Error::DeviceUnavailable {
                kind: DeviceKind::Playback,
                tried: vec!["default@24000Hz/1ch".to_string()],
            });
        }
        Ok(DeviceTarget {
            kind: DeviceKind::Playback,
            identifier: "default".to_string(),
            sample_rate: 24000,
            channel_count: 1,
        })
    }
}
