//! Voice pipeline integration tests
//!
//! Tests capture, endpointing and device resolution without audio hardware

use std::io::Cursor;
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use voxloop::voice::{
    DeviceKind, DeviceSelector, Endpointer, EndpointerConfig, EndpointerState, Listener,
    SAMPLE_RATE, samples_to_wav,
};
use voxloop::Error;

mod common;
use common::{FakeBackend, LOUD, QUIET, ScriptedOpener, frames, levels, resolver};

/// 30 ms frames, 240 ms hang (8 frames), 300 ms minimum speech (10 frames)
fn endpoint_config() -> EndpointerConfig {
    EndpointerConfig::for_frame_ms(30, 240, 300, 15_000)
}

#[test]
fn test_steady_noise_never_yields_utterance() {
    let mut endpointer = Endpointer::new(endpoint_config());

    let heard: Vec<_> = frames(&[(50, QUIET)])
        .into_iter()
        .filter_map(|frame| endpointer.push(frame))
        .collect();

    assert!(heard.is_empty());
    assert_eq!(endpointer.state(), EndpointerState::Listening);
    let floor = endpointer.noise_floor().unwrap();
    assert!((floor - QUIET).abs() < 1e-6);
}

#[test]
fn test_speech_yields_one_contiguous_utterance() {
    let mut endpointer = Endpointer::new(endpoint_config());

    // calibration, room tone, speech, trailing silence
    let script = frames(&[(10, QUIET), (10, QUIET), (45, LOUD), (10, QUIET)]);
    let heard: Vec<_> = script
        .into_iter()
        .filter_map(|frame| endpointer.push(frame))
        .collect();

    assert_eq!(heard.len(), 1);
    let utterance = &heard[0];
    assert!(utterance.is_contiguous());
    assert!(!utterance.forced);

    // Five frames of pre-roll before the trigger, trailing silence trimmed
    assert_eq!(utterance.span(), Some((15, 64)));
    assert_eq!(utterance.frames.len(), 50);
    assert!(utterance.frames[..5].iter().all(|f| f.rms() < utterance.threshold));
    assert!(utterance.frames[5..].iter().all(|f| f.rms() > utterance.threshold));
    assert_eq!(utterance.duration(), Duration::from_millis(1500));
}

#[test]
fn test_cough_is_not_an_utterance() {
    let mut endpointer = Endpointer::new(endpoint_config());

    let script = frames(&[(10, QUIET), (4, LOUD), (20, QUIET)]);
    let heard = script.into_iter().filter_map(|f| endpointer.push(f)).count();

    assert_eq!(heard, 0);
}

#[test]
fn test_two_utterances_in_one_stream() {
    let mut endpointer = Endpointer::new(endpoint_config());

    let script = frames(&[(10, QUIET), (20, LOUD), (12, QUIET), (15, LOUD), (12, QUIET)]);
    let heard: Vec<_> = script.into_iter().filter_map(|f| endpointer.push(f)).collect();

    assert_eq!(heard.len(), 2);
    let (_, first_end) = heard[0].span().unwrap();
    let (second_start, _) = heard[1].span().unwrap();
    assert!(first_end < second_start);
}

#[test]
fn test_resolver_walks_formats_then_default() {
    // The hinted mic only exists at 48 kHz stereo; nothing else opens
    let backend = FakeBackend::accepting(|c| {
        matches!(&c.selector, DeviceSelector::Named(name) if name == "usb")
            && c.format.sample_rate == 48000
            && c.format.channels == 2
    });
    let mut audio = voxloop::config::AudioConfig::default();
    audio.mic_target = Some("usb".to_string());
    let resolver = voxloop::AudioDeviceResolver::new(backend.clone(), &audio);

    let target = resolver.resolve(DeviceKind::Capture).unwrap();
    assert_eq!(target.identifier, "usb");
    assert_eq!((target.sample_rate, target.channel_count), (48000, 2));
    assert_eq!(backend.probes().len(), 4);

    // Playback has no candidate at all
    let err = resolver.resolve(DeviceKind::Playback).unwrap_err();
    match err {
        Error::DeviceUnavailable { kind, tried } => {
            assert_eq!(kind, DeviceKind::Playback);
            assert_eq!(tried.len(), audio.playback_formats.len());
        }
        other => panic!("unexpected error: {other}"),
    }
}

#[tokio::test]
async fn test_listener_returns_utterance() {
    let opener = ScriptedOpener::new().then(levels(&[(10, QUIET), (20, LOUD), (30, QUIET)]));
    let listener = Listener::spawn(
        resolver(FakeBackend::accept_all()),
        Box::new(opener.clone()),
        endpoint_config(),
        30,
    )
    .unwrap();

    let utterance = listener
        .listen(Duration::from_secs(5), CancellationToken::new())
        .await
        .unwrap()
        .expect("utterance");

    assert_eq!(utterance.frames.len(), 20);
    assert_eq!(opener.opens(), 1);
    listener.shutdown().await;
}

#[tokio::test]
async fn test_listener_times_out_on_silence() {
    let listener = Listener::spawn(
        resolver(FakeBackend::accept_all()),
        Box::new(ScriptedOpener::new()),
        endpoint_config(),
        30,
    )
    .unwrap();

    let heard = listener
        .listen(Duration::from_millis(50), CancellationToken::new())
        .await
        .unwrap();

    assert!(heard.is_none());
    listener.shutdown().await;
}

#[tokio::test]
async fn test_listener_reports_lost_device_and_reopens() {
    let opener = ScriptedOpener::new()
        .then_fail(levels(&[(10, QUIET), (5, LOUD)]))
        .then(levels(&[(10, QUIET), (20, LOUD), (30, QUIET)]));
    let listener = Listener::spawn(
        resolver(FakeBackend::accept_all()),
        Box::new(opener.clone()),
        endpoint_config(),
        30,
    )
    .unwrap();

    let err = listener
        .listen(Duration::from_secs(5), CancellationToken::new())
        .await
        .unwrap_err();
    assert!(matches!(err, Error::CaptureLost(_)));

    let target = listener.reopen().await.unwrap();
    assert_eq!(target.kind, DeviceKind::Capture);
    assert_eq!(opener.opens(), 2);

    // The partial utterance from the lost device is gone; the new one is whole
    let utterance = listener
        .listen(Duration::from_secs(5), CancellationToken::new())
        .await
        .unwrap()
        .expect("utterance");
    assert_eq!(utterance.frames.len(), 20);
    listener.shutdown().await;
}

#[tokio::test]
async fn test_listener_unavailable_device() {
    let listener = Listener::spawn(
        resolver(FakeBackend::accepting(|_| false)),
        Box::new(ScriptedOpener::new()),
        endpoint_config(),
        30,
    )
    .unwrap();

    let err = listener
        .listen(Duration::from_secs(1), CancellationToken::new())
        .await
        .unwrap_err();
    assert!(matches!(err, Error::DeviceUnavailable { kind: DeviceKind::Capture, .. }));
    listener.shutdown().await;
}

#[tokio::test]
async fn test_listener_cancelled() {
    let listener = Listener::spawn(
        resolver(FakeBackend::accept_all()),
        Box::new(ScriptedOpener::new()),
        endpoint_config(),
        30,
    )
    .unwrap();

    let cancel = CancellationToken::new();
    cancel.cancel();
    let heard = listener.listen(Duration::from_secs(60), cancel).await.unwrap();

    assert!(heard.is_none());
    listener.shutdown().await;
}

#[test]
fn test_wav_file_round_trip() {
    let samples: Vec<f32> = (0..SAMPLE_RATE / 10)
        .map(|i| if i % 2 == 0 { 0.25 } else { -0.25 })
        .collect();
    let wav = samples_to_wav(&samples, SAMPLE_RATE).unwrap();

    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("clip.wav");
    std::fs::write(&path, &wav).unwrap();

    let reader = hound::WavReader::open(&path).unwrap();
    let spec = reader.spec();
    assert_eq!(spec.channels, 1);
    assert_eq!(spec.sample_rate, SAMPLE_RATE);
    assert_eq!(reader.len() as usize, samples.len());

    let in_memory = hound::WavReader::new(Cursor::new(wav)).unwrap();
    assert_eq!(in_memory.spec(), spec);
}
