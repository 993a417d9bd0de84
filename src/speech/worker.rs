//! Synthesis and playback worker
//!
//! Consumes the speech queue one sentence at a time: clean the text,
//! synthesize it with the first voice that exists, then play it to the
//! output device. Synthesis of later sentences never starts before the
//! current one has finished playing.

use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time::timeout;

use super::clean::{clean_for_tts, is_speakable};
use super::queue::{Lease, SpeechQueue};
use super::voices::VoiceMap;
use crate::language::Language;
use crate::providers::Synthesizer;
use crate::voice::{AudioSink, SpeechAudio};
use crate::{Error, Result};

/// Counters for a worker's lifetime
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PlaybackReport {
    /// Sentences played to completion
    pub played: usize,
    /// Sentences with nothing to say, or dropped after their turn ended
    pub skipped: usize,
    /// Sentences spoken with a fallback voice
    pub fallbacks: usize,
    /// Sentences lost to synthesis or playback errors
    pub failed: usize,
}

/// Default bound on one synthesis attempt
pub const DEFAULT_SYNTHESIS_TIMEOUT: Duration = Duration::from_secs(20);

/// Sequential synthesis/playback consumer
pub struct SynthesisPlaybackWorker {
    synthesizer: Arc<dyn Synthesizer>,
    sink: Box<dyn AudioSink>,
    voices: VoiceMap,
    synthesis_timeout: Duration,
}

impl SynthesisPlaybackWorker {
    #[must_use]
    pub fn new(synthesizer: Arc<dyn Synthesizer>, sink: Box<dyn AudioSink>, voices: VoiceMap) -> Self {
        Self {
            synthesizer,
            sink,
            voices,
            synthesis_timeout: DEFAULT_SYNTHESIS_TIMEOUT,
        }
    }

    /// Give up on a synthesis attempt after `limit`
    #[must_use]
    pub const fn with_synthesis_timeout(mut self, limit: Duration) -> Self {
        self.synthesis_timeout = limit;
        self
    }

    /// Run on the current runtime until the queue is closed and drained
    #[must_use]
    pub fn spawn(self, queue: SpeechQueue) -> JoinHandle<PlaybackReport> {
        tokio::spawn(self.run(queue))
    }

    /// Consume sentences until the queue is closed and drained
    pub async fn run(mut self, queue: SpeechQueue) -> PlaybackReport {
        let mut report = PlaybackReport::default();

        while let Some(lease) = queue.dequeue().await {
            self.speak(&queue, &lease, &mut report).await;
            queue.complete(lease);
        }

        tracing::debug!(
            played = report.played,
            skipped = report.skipped,
            fallbacks = report.fallbacks,
            failed = report.failed,
            "playback worker stopped"
        );
        report
    }

    async fn speak(&mut self, queue: &SpeechQueue, lease: &Lease, report: &mut PlaybackReport) {
        let sentence = lease.sentence();
        let text = clean_for_tts(&sentence.text);
        if !is_speakable(&text) {
            tracing::debug!(index = sentence.index, "nothing to speak");
            report.skipped += 1;
            return;
        }

        let audio = match self.synthesize(&text, sentence.language, report).await {
            Ok(audio) => audio,
            Err(e) => {
                tracing::warn!(index = sentence.index, error = %e, "synthesis failed, skipping sentence");
                report.failed += 1;
                return;
            }
        };

        // The turn may have been abandoned while we were synthesizing
        if !lease.is_current() {
            tracing::debug!(index = sentence.index, "dropping sentence from abandoned turn");
            report.skipped += 1;
            return;
        }

        tracing::info!(
            index = sentence.index,
            language = %sentence.language,
            duration_ms = u64::try_from(audio.duration().as_millis()).unwrap_or(u64::MAX),
            "speaking"
        );

        match self.play(&audio).await {
            Ok(()) => report.played += 1,
            Err(e) if e.is_device_fault() || matches!(e, Error::DeviceUnavailable { .. }) => {
                tracing::error!(error = %e, "playback failed, abandoning turn");
                report.failed += 1;
                queue.fail(e);
            }
            Err(e) => {
                tracing::warn!(index = sentence.index, error = %e, "could not play sentence, skipping");
                report.failed += 1;
            }
        }
    }

    /// Try each voice for `language` until one exists
    async fn synthesize(
        &mut self,
        text: &str,
        language: Language,
        report: &mut PlaybackReport,
    ) -> Result<SpeechAudio> {
        let chain = self.voices.chain(language);
        let mut last = Error::VoiceUnavailable {
            voice: self.voices.default.clone(),
        };

        for (attempt, voice) in chain.iter().enumerate() {
            let attempt_result = timeout(
                self.synthesis_timeout,
                self.synthesizer.synthesize(text, voice, language),
            )
            .await
            .unwrap_or(Err(Error::Timeout { stage: "synthesis" }));

            match attempt_result {
                Ok(audio) => {
                    if attempt > 0 {
                        tracing::info!(voice, "using fallback voice");
                        report.fallbacks += 1;
                    }
                    return Ok(audio);
                }
                Err(e @ Error::VoiceUnavailable { .. }) => {
                    tracing::warn!(voice, "voice unavailable");
                    last = e;
                }
                Err(e) => return Err(e),
            }
        }

        Err(last)
    }

    /// Play once; on a device fault re-resolve the output and retry once
    ///
    /// A speaker that cannot be re-resolved yields `DeviceUnavailable`.
    async fn play(&mut self, audio: &SpeechAudio) -> Result<()> {
        match self.sink.play(audio).await {
            Err(e) if e.is_device_fault() => {
                tracing::warn!(error = %e, "playback device lost, reopening");
                let target = self.sink.reopen().await?;
                tracing::info!(target = %target, "playback reopened");
                self.sink.play(audio).await
            }
            other => other,
        }
    }
}
