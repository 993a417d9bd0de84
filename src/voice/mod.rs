//! Audio input and output
//!
//! Handles device resolution, microphone capture, endpointing and playback.

mod capture;
mod device;
mod endpoint;
mod listener;
mod playback;

pub use capture::{
    AudioFrame, CaptureOpener, CpalCapture, CpalCaptureOpener, FrameSource, SAMPLE_RATE, downmix,
    frame_samples, rms, samples_duration, samples_to_wav,
};
pub use device::{
    AudioBackend, AudioDeviceResolver, AudioFormat, CpalBackend, DEFAULT_DEVICE, DeviceCandidate,
    DeviceKind, DeviceSelector, DeviceTarget, open_target, stream_config,
};
pub use endpoint::{Endpointer, EndpointerConfig, EndpointerState, Utterance};
pub use listener::{Listener, Recording};
pub use playback::{AudioSink, CpalPlayback, SpeechAudio, decode_mp3, resample};
