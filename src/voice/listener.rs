//! Capture thread serving listen requests
//!
//! `cpal` streams are not `Send`, so the capture device, the frame source and
//! the endpointer all live on one dedicated thread. The async side talks to it
//! through a command channel; each command carries a oneshot for its reply.

use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use tokio::sync::{mpsc, oneshot};
use tokio_util::sync::CancellationToken;

use super::capture::{CaptureOpener, FrameSource};
use super::device::{AudioDeviceResolver, DeviceKind, DeviceTarget};
use super::endpoint::{Endpointer, EndpointerConfig, EndpointerState, Utterance};
use crate::{Error, Result};

/// A fixed-length recording (self-test)
#[derive(Debug, Clone)]
pub struct Recording {
    pub samples: Vec<f32>,
    pub sample_rate: u32,
}

enum Command {
    Listen {
        timeout: Duration,
        cancel: CancellationToken,
        reply: oneshot::Sender<Result<Option<Utterance>>>,
    },
    Reopen {
        reply: oneshot::Sender<Result<DeviceTarget>>,
    },
    Record {
        duration: Duration,
        reply: oneshot::Sender<Result<Recording>>,
    },
}

/// Handle to the capture thread
pub struct Listener {
    commands: mpsc::Sender<Command>,
    thread: Option<JoinHandle<()>>,
}

impl Listener {
    /// Start the capture thread
    ///
    /// The device is opened lazily on the first request.
    ///
    /// # Errors
    ///
    /// Returns error if the thread cannot be spawned
    pub fn spawn(
        resolver: AudioDeviceResolver,
        opener: Box<dyn CaptureOpener>,
        endpoint: EndpointerConfig,
        frame_ms: u32,
    ) -> Result<Self> {
        let (tx, mut rx) = mpsc::channel::<Command>(1);

        let thread = std::thread::Builder::new()
            .name("voxloop-capture".to_string())
            .spawn(move || {
                let mut session = CaptureSession::new(resolver, opener, endpoint, frame_ms);
                while let Some(command) = rx.blocking_recv() {
                    session.handle(command);
                }
                session.close();
                tracing::debug!("capture thread exiting");
            })?;

        Ok(Self {
            commands: tx,
            thread: Some(thread),
        })
    }

    /// Wait for the next utterance
    ///
    /// Returns `Ok(None)` if nothing was said before `timeout` or `cancel` fired.
    ///
    /// # Errors
    ///
    /// Returns `CaptureLost` on device failure (call [`Self::reopen`] before
    /// retrying) or `DeviceUnavailable` if no capture device resolves
    pub async fn listen(
        &self,
        timeout: Duration,
        cancel: CancellationToken,
    ) -> Result<Option<Utterance>> {
        let (reply, rx) = oneshot::channel();
        self.send(Command::Listen {
            timeout,
            cancel,
            reply,
        })
        .await?;
        rx.await.map_err(|_| lost())?
    }

    /// Close the current device and resolve a new one
    ///
    /// # Errors
    ///
    /// Returns `DeviceUnavailable` if no capture candidate opens
    pub async fn reopen(&self) -> Result<DeviceTarget> {
        let (reply, rx) = oneshot::channel();
        self.send(Command::Reopen { reply }).await?;
        rx.await.map_err(|_| lost())?
    }

    /// Record a fixed-length clip, bypassing endpointing
    ///
    /// # Errors
    ///
    /// Returns error if capture fails
    pub async fn record(&self, duration: Duration) -> Result<Recording> {
        let (reply, rx) = oneshot::channel();
        self.send(Command::Record { duration, reply }).await?;
        rx.await.map_err(|_| lost())?
    }

    /// Stop the capture thread and wait for the device to close
    pub async fn shutdown(mut self) {
        let thread = self.thread.take();
        drop(self);
        if let Some(thread) = thread {
            let _ = tokio::task::spawn_blocking(move || thread.join()).await;
        }
    }

    async fn send(&self, command: Command) -> Result<()> {
        self.commands.send(command).await.map_err(|_| lost())
    }
}

fn lost() -> Error {
    Error::CaptureLost("capture thread stopped".to_string())
}

/// State owned by the capture thread
struct CaptureSession {
    resolver: AudioDeviceResolver,
    opener: Box<dyn CaptureOpener>,
    endpointer: Endpointer,
    frame_ms: u32,
    source: Option<Box<dyn FrameSource>>,
}

impl CaptureSession {
    fn new(
        resolver: AudioDeviceResolver,
        opener: Box<dyn CaptureOpener>,
        endpoint: EndpointerConfig,
        frame_ms: u32,
    ) -> Self {
        Self {
            resolver,
            opener,
            endpointer: Endpointer::new(endpoint),
            frame_ms,
            source: None,
        }
    }

    fn handle(&mut self, command: Command) {
        match command {
            Command::Listen {
                timeout,
                cancel,
                reply,
            } => {
                let _ = reply.send(self.listen(timeout, &cancel));
            }
            Command::Reopen { reply } => {
                self.close();
                let _ = reply.send(self.open());
            }
            Command::Record { duration, reply } => {
                let _ = reply.send(self.record(duration));
            }
        }
    }

    fn open(&mut self) -> Result<DeviceTarget> {
        let target = self.resolver.resolve(DeviceKind::Capture)?;
        let source = self
            .opener
            .open(&target, self.frame_ms)
            .map_err(|e| match e {
                Error::DeviceUnavailable { .. } | Error::CaptureLost(_) => e,
                other => Error::CaptureLost(other.to_string()),
            })?;

        self.source = Some(source);
        // A new device means a new acoustic environment
        self.endpointer.reset();
        tracing::info!(target = %target, "capture opened");
        Ok(target)
    }

    fn close(&mut self) {
        if self.source.take().is_some() {
            tracing::debug!("capture closed");
        }
    }

    fn ensure_open(&mut self) -> Result<()> {
        if self.source.is_none() {
            self.open()?;
        }
        Ok(())
    }

    fn listen(&mut self, timeout: Duration, cancel: &CancellationToken) -> Result<Option<Utterance>> {
        self.ensure_open()?;
        let Some(source) = self.source.as_mut() else {
            return Err(lost());
        };

        // Audio buffered since the last request may contain our own playback
        source.discard_pending();
        self.endpointer.resume();

        let deadline = Instant::now() + timeout;
        loop {
            if cancel.is_cancelled() {
                return Ok(None);
            }

            let frame = match source.next_frame() {
                Ok(frame) => frame,
                Err(e) => {
                    tracing::warn!(error = %e, "capture failed");
                    self.source = None;
                    return Err(e);
                }
            };

            if let Some(utterance) = self.endpointer.push(frame) {
                return Ok(Some(utterance));
            }

            // An utterance in progress is bounded by the max-duration flush
            if Instant::now() >= deadline && self.endpointer.state() != EndpointerState::InUtterance
            {
                tracing::debug!("listen timeout without speech");
                return Ok(None);
            }
        }
    }

    fn record(&mut self, duration: Duration) -> Result<Recording> {
        self.ensure_open()?;
        let Some(source) = self.source.as_mut() else {
            return Err(lost());
        };

        source.discard_pending();
        let sample_rate = source.sample_rate();
        let wanted = usize::try_from(
            (u128::from(sample_rate) * duration.as_millis()) / 1000,
        )
        .unwrap_or(usize::MAX);

        let mut samples = Vec::with_capacity(wanted);
        while samples.len() < wanted {
            match source.next_frame() {
                Ok(frame) => samples.extend(frame.samples),
                Err(e) => {
                    self.source = None;
                    if samples.is_empty() {
                        return Err(e);
                    }
                    tracing::warn!(error = %e, "recording cut short");
                    break;
                }
            }
        }
        samples.truncate(wanted);

        Ok(Recording {
            samples,
            sample_rate,
        })
    }
}
