//! Turn loop
//!
//! Listen → transcribe → generate (streaming) → segment → enqueue, with the
//! synthesis/playback worker draining the queue concurrently. A new
//! utterance is only accepted after the previous turn's playback has drained,
//! so the assistant never hears itself.

use std::sync::Arc;

use futures::StreamExt;
use tokio::task::JoinHandle;
use tokio::time::{Instant, timeout, timeout_at};
use tokio_util::sync::CancellationToken;

use crate::config::{Config, TurnConfig};
use crate::language::{Language, reply_language, sentence_language};
use crate::providers::{ReplyGenerator, Synthesizer, Transcriber, Transcript};
use crate::reply::{
    Prompt, Sentence, SentenceSegmenter, acknowledgement, apology, farewell, is_exit_request,
};
use crate::speech::{PlaybackReport, SpeechQueue, SynthesisPlaybackWorker};
use crate::voice::{AudioSink, Listener, Utterance};
use crate::{Error, Result};

/// How a turn ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TurnOutcome {
    /// The reply was spoken
    Completed {
        /// Sentences queued for the reply
        sentences: usize,
    },
    /// Nothing usable was heard
    Ignored,
    /// The turn failed or was interrupted; pending speech was discarded
    Abandoned,
    /// The user asked to end the session
    Exit,
}

/// External inference collaborators
#[derive(Clone)]
pub struct Collaborators {
    pub transcriber: Arc<dyn Transcriber>,
    pub generator: Arc<dyn ReplyGenerator>,
    pub synthesizer: Arc<dyn Synthesizer>,
}

/// Drives conversational turns until exit or cancellation
pub struct Orchestrator {
    turn: TurnConfig,
    max_sentence_chars: usize,
    listener: Listener,
    transcriber: Arc<dyn Transcriber>,
    generator: Arc<dyn ReplyGenerator>,
    queue: SpeechQueue,
    worker: JoinHandle<PlaybackReport>,
    cancel: CancellationToken,
}

impl Orchestrator {
    /// Wire the pipeline and start the playback worker
    ///
    /// Must be called from within a Tokio runtime.
    #[must_use]
    pub fn new(
        config: &Config,
        listener: Listener,
        collaborators: Collaborators,
        sink: Box<dyn AudioSink>,
        cancel: CancellationToken,
    ) -> Self {
        let queue = SpeechQueue::new(config.speech.queue_capacity);
        let worker = SynthesisPlaybackWorker::new(
            collaborators.synthesizer,
            sink,
            config.speech.voices.clone(),
        )
        .with_synthesis_timeout(config.speech.synthesis_timeout)
        .spawn(queue.clone());

        Self {
            turn: config.turn.clone(),
            max_sentence_chars: config.speech.max_sentence_chars,
            listener,
            transcriber: collaborators.transcriber,
            generator: collaborators.generator,
            queue,
            worker,
            cancel,
        }
    }

    /// Speech queue shared with the playback worker
    #[must_use]
    pub const fn queue(&self) -> &SpeechQueue {
        &self.queue
    }

    /// Run turns until the user says goodbye or the session is cancelled
    ///
    /// # Errors
    ///
    /// Returns `DeviceUnavailable` if the microphone or the speaker cannot be
    /// re-resolved after a fault
    pub async fn run(self) -> Result<PlaybackReport> {
        tracing::info!("listening");
        let result = self.turns().await;
        let report = self.shutdown().await;
        result.map(|()| report)
    }

    async fn turns(&self) -> Result<()> {
        while !self.cancel.is_cancelled() {
            let heard = self
                .listener
                .listen(self.turn.listen_timeout, self.cancel.clone())
                .await;

            let utterance = match heard {
                Ok(Some(utterance)) => utterance,
                Ok(None) => continue,
                Err(e) if e.is_device_fault() => {
                    tracing::warn!(error = %e, "microphone lost, re-resolving");
                    let target = self.listener.reopen().await?;
                    tracing::info!(target = %target, "microphone recovered");
                    continue;
                }
                Err(e) => return Err(e),
            };

            match self.run_turn(utterance).await? {
                TurnOutcome::Exit => break,
                TurnOutcome::Ignored => {}
                TurnOutcome::Completed { .. } | TurnOutcome::Abandoned => {
                    // Let room echo die down; the listener discards it anyway
                    tokio::select! {
                        () = self.cancel.cancelled() => break,
                        () = tokio::time::sleep(self.turn.post_turn_delay) => {}
                    }
                    tracing::info!("listening");
                }
            }
        }
        Ok(())
    }

    /// Handle one utterance end to end, returning once playback has drained
    ///
    /// Inference failures and playback faults abandon the turn rather than
    /// failing it.
    ///
    /// # Errors
    ///
    /// Returns error only for failures the session cannot continue past,
    /// such as `DeviceUnavailable` when no speaker can be resolved
    pub async fn run_turn(&self, utterance: Utterance) -> Result<TurnOutcome> {
        let transcript = match self.transcribe(utterance).await {
            Ok(transcript) => transcript,
            Err(Error::Interrupted) => return Ok(self.interrupted()),
            Err(e) if e.is_inference_fault() => {
                return self.abandon(Language::En, &e).await;
            }
            Err(e) => return Err(e),
        };

        if !transcript.is_usable(self.turn.min_confidence) {
            tracing::debug!(
                confidence = transcript.confidence,
                chars = transcript.text.len(),
                "ignoring transcript"
            );
            return Ok(TurnOutcome::Ignored);
        }

        let language = reply_language(transcript.language, &transcript.text);
        tracing::info!(
            text = %transcript.text,
            language = %language,
            confidence = transcript.confidence,
            "heard"
        );

        if is_exit_request(&transcript.text, &self.turn.exit_phrases) {
            tracing::info!("exit requested");
            return match self.say(farewell(language), language).await {
                Ok(()) => Ok(TurnOutcome::Exit),
                Err(e) if e.is_device_fault() || matches!(e, Error::Interrupted) => {
                    Ok(TurnOutcome::Exit)
                }
                Err(e) => Err(e),
            };
        }

        let prompt = Prompt::new(&transcript.text, language);
        let outcome = match self.stream_reply(&prompt).await {
            Ok(sentences) => self.drain().await.map(|()| TurnOutcome::Completed { sentences }),
            Err(e) => Err(e),
        };

        match outcome {
            Ok(outcome) => Ok(outcome),
            Err(Error::Interrupted) => Ok(self.interrupted()),
            Err(e) if e.is_inference_fault() => self.abandon(language, &e).await,
            Err(e) => self.playback_failed(e),
        }
    }

    /// The worker gave up on the speaker; nothing more of this turn is played
    fn playback_failed(&self, error: Error) -> Result<TurnOutcome> {
        self.queue.clear();
        if error.is_device_fault() {
            // The worker already tried to recover the speaker
            tracing::warn!(error = %error, "playback failed, turn abandoned");
            return Ok(TurnOutcome::Abandoned);
        }
        tracing::error!(error = %error, "turn failed");
        Err(error)
    }

    async fn transcribe(&self, utterance: Utterance) -> Result<Transcript> {
        tracing::debug!(
            frames = utterance.frames.len(),
            duration_ms = u64::try_from(utterance.duration().as_millis()).unwrap_or(u64::MAX),
            forced = utterance.forced,
            "transcribing"
        );

        let result = tokio::select! {
            biased;
            () = self.cancel.cancelled() => return Err(Error::Interrupted),
            result = timeout(self.turn.turn_timeout, self.transcriber.transcribe(&utterance)) => result,
        };
        result.map_err(|_| Error::Timeout {
            stage: "transcription",
        })?
    }

    /// Stream the reply into the speech queue, returning the sentence count
    ///
    /// One deadline covers the generate request and every increment, so a
    /// model trickling tokens cannot keep the turn alive forever.
    async fn stream_reply(&self, prompt: &Prompt) -> Result<usize> {
        let deadline = Instant::now() + self.turn.turn_timeout;
        let started = tokio::select! {
            biased;
            () = self.cancel.cancelled() => return Err(Error::Interrupted),
            started = timeout_at(deadline, self.generator.generate(prompt)) => started,
        };
        let mut stream = started.map_err(|_| Error::Timeout {
            stage: "generation",
        })??;

        let mut segmenter = SentenceSegmenter::new(prompt.language, self.max_sentence_chars);
        loop {
            let next = tokio::select! {
                biased;
                () = self.cancel.cancelled() => return Err(Error::Interrupted),
                next = timeout_at(deadline, stream.next()) => next,
            };

            let increment = match next.map_err(|_| Error::Timeout {
                stage: "generation",
            })? {
                Some(increment) => increment?,
                None => break,
            };

            for sentence in segmenter.push(&increment) {
                self.enqueue(sentence).await?;
            }
        }

        if let Some(sentence) = segmenter.finish() {
            self.enqueue(sentence).await?;
        }

        let sentences = segmenter.emitted();
        if sentences == 0 {
            tracing::debug!("empty reply");
            self.enqueue(canned(acknowledgement(prompt.language), prompt.language))
                .await?;
        }
        Ok(sentences)
    }

    async fn enqueue(&self, sentence: Sentence) -> Result<()> {
        tracing::debug!(index = sentence.index, text = %sentence.text, "queued");
        tokio::select! {
            biased;
            () = self.cancel.cancelled() => Err(Error::Interrupted),
            result = self.queue.enqueue(sentence) => result,
        }
    }

    /// Wait until everything queued has been played
    async fn drain(&self) -> Result<()> {
        tokio::select! {
            biased;
            () = self.cancel.cancelled() => Err(Error::Interrupted),
            result = self.queue.wait_idle() => result,
        }
    }

    /// Speak a canned phrase and wait for it to finish
    async fn say(&self, text: &str, language: Language) -> Result<()> {
        self.enqueue(canned(text, language)).await?;
        self.drain().await
    }

    /// Discard the turn's pending speech and apologize
    ///
    /// No apology is attempted when the speaker already failed this turn.
    async fn abandon(&self, language: Language, error: &Error) -> Result<TurnOutcome> {
        tracing::warn!(error = %error, "turn abandoned");
        if let Some(fault) = self.queue.take_fault() {
            return self.playback_failed(fault);
        }
        let dropped = self.queue.clear();
        if dropped > 0 {
            tracing::debug!(dropped, "discarded pending sentences");
        }

        match self.say(apology(language), language).await {
            Ok(()) | Err(Error::Interrupted) => {}
            Err(e @ Error::DeviceUnavailable { .. }) => return self.playback_failed(e),
            Err(e) => tracing::warn!(error = %e, "could not speak apology"),
        }
        Ok(TurnOutcome::Abandoned)
    }

    fn interrupted(&self) -> TurnOutcome {
        self.queue.clear();
        tracing::info!("turn interrupted");
        TurnOutcome::Abandoned
    }

    /// Stop the worker and the capture thread
    async fn shutdown(self) -> PlaybackReport {
        self.queue.clear();
        self.queue.close();

        let report = match self.worker.await {
            Ok(report) => report,
            Err(e) => {
                tracing::error!(error = %e, "playback worker failed");
                PlaybackReport::default()
            }
        };
        self.listener.shutdown().await;

        tracing::info!(
            played = report.played,
            skipped = report.skipped,
            fallbacks = report.fallbacks,
            failed = report.failed,
            "session ended"
        );
        report
    }
}

fn canned(text: &str, language: Language) -> Sentence {
    Sentence {
        index: 0,
        text: text.to_string(),
        language: sentence_language(text, language),
    }
}
