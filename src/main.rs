use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

use clap::{Parser, Subcommand};
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;

use voxloop::providers::{OllamaGenerator, SpeechApiSynthesizer, WhisperTranscriber};
use voxloop::voice::{
    AudioDeviceResolver, AudioSink, CpalBackend, CpalCaptureOpener, CpalPlayback, DeviceKind,
    Listener, SpeechAudio, rms, samples_to_wav,
};
use voxloop::{Collaborators, Config, Orchestrator};

/// Voxloop - bilingual voice assistant loop
#[derive(Parser)]
#[command(name = "voxloop", version, about)]
struct Cli {
    /// Microphone to use (device index or name fragment)
    #[arg(long)]
    mic_target: Option<String>,

    /// Speaker to use (device index or name fragment)
    #[arg(long)]
    speaker_target: Option<String>,

    /// Configuration file (defaults to ~/.config/voxloop/config.toml)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Increase verbosity (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand)]
enum Command {
    /// Record a short clip and play it straight back
    SelfTest {
        /// Recording length in seconds
        #[arg(short, long, default_value = "3")]
        seconds: u64,
        /// Also save the recording as a WAV file
        #[arg(long)]
        save: Option<PathBuf>,
    },
    /// Test speaker output
    TestSpeaker,
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    // Set up logging based on verbosity
    let filter = match cli.verbose {
        0 => "info,voxloop=info",
        1 => "info,voxloop=debug",
        2 => "debug",
        _ => "trace",
    };

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::new(filter))
        .init();

    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            tracing::error!("fatal: {e}");
            ExitCode::FAILURE
        }
    }
}

async fn run(cli: Cli) -> anyhow::Result<()> {
    let config = load_config(cli.config.as_deref(), cli.mic_target, cli.speaker_target)?;
    tracing::debug!(?config, "loaded configuration");

    let resolver = AudioDeviceResolver::new(Arc::new(CpalBackend), &config.audio);

    if let Some(cmd) = cli.command {
        return match cmd {
            Command::SelfTest { seconds, save } => {
                self_test(&config, resolver, seconds, save.as_deref()).await
            }
            Command::TestSpeaker => test_speaker(resolver).await,
        };
    }

    run_assistant(config, resolver).await
}

/// Apply CLI device overrides on top of file and environment configuration
fn load_config(
    path: Option<&Path>,
    mic_target: Option<String>,
    speaker_target: Option<String>,
) -> anyhow::Result<Config> {
    let mut config = Config::load(path)?;
    if mic_target.is_some() {
        config.audio.mic_target = mic_target;
    }
    if speaker_target.is_some() {
        config.audio.speaker_target = speaker_target;
    }
    config.validate()?;
    Ok(config)
}

async fn run_assistant(config: Config, resolver: AudioDeviceResolver) -> anyhow::Result<()> {
    // No usable device is fatal before the first turn
    let probe = resolver.clone();
    let (capture, playback) = tokio::task::spawn_blocking(move || probe.resolve_all()).await??;
    tracing::info!(capture = %capture, playback = %playback, "audio devices resolved");

    let listener = Listener::spawn(
        resolver.clone(),
        Box::new(CpalCaptureOpener::new(config.audio.stall_timeout)),
        config.endpoint.clone(),
        config.audio.frame_ms,
    )?;

    let collaborators = Collaborators {
        transcriber: Arc::new(WhisperTranscriber::new(&config.services)),
        generator: Arc::new(OllamaGenerator::new(&config.services)),
        synthesizer: Arc::new(SpeechApiSynthesizer::new(
            &config.services,
            config.speech.tts_speed,
            config.speech.synthesis_timeout,
        )),
    };

    let cancel = CancellationToken::new();
    let signal_cancel = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::info!("interrupted, shutting down");
            signal_cancel.cancel();
        }
    });

    let sink = CpalPlayback::with_target(resolver, playback);
    let orchestrator = Orchestrator::new(&config, listener, collaborators, Box::new(sink), cancel);

    tracing::info!(
        stt = %config.services.stt_url,
        llm = %config.services.llm_model,
        "voxloop ready, start speaking"
    );
    orchestrator.run().await?;

    Ok(())
}

/// Record a clip through the resolved microphone and play it back
async fn self_test(
    config: &Config,
    resolver: AudioDeviceResolver,
    seconds: u64,
    save: Option<&Path>,
) -> anyhow::Result<()> {
    let listener = Listener::spawn(
        resolver.clone(),
        Box::new(CpalCaptureOpener::new(config.audio.stall_timeout)),
        config.endpoint.clone(),
        config.audio.frame_ms,
    )?;

    println!("Recording for {seconds} seconds... speak now!");
    let recording = listener.record(Duration::from_secs(seconds)).await;
    listener.shutdown().await;
    let recording = recording?;

    let energy = rms(&recording.samples);
    let peak = recording
        .samples
        .iter()
        .map(|s| s.abs())
        .fold(0.0f32, f32::max);
    println!(
        "Captured {} samples at {} Hz | RMS: {energy:.4} | Peak: {peak:.4}",
        recording.samples.len(),
        recording.sample_rate
    );

    if let Some(path) = save {
        std::fs::write(path, samples_to_wav(&recording.samples, recording.sample_rate)?)?;
        println!("Saved recording to {}", path.display());
    }

    println!("Playing back...");
    let mut playback = CpalPlayback::new(resolver);
    playback
        .play(&SpeechAudio {
            samples: recording.samples,
            sample_rate: recording.sample_rate,
        })
        .await?;

    println!("\n---");
    if energy < 0.001 {
        println!("The recording is nearly silent. Check:");
        println!("  1. Is your mic plugged in and unmuted?");
        println!("  2. Run: pactl info | grep 'Default Source'");
        println!("  3. Try --mic-target with a device index or name");
    } else {
        println!("If you heard yourself, the audio round trip works!");
    }

    Ok(())
}

/// Test speaker output with a sine wave
async fn test_speaker(resolver: AudioDeviceResolver) -> anyhow::Result<()> {
    println!("Testing speaker output...");
    println!("You should hear a 440Hz tone for 2 seconds\n");

    let target = {
        let resolver = resolver.clone();
        tokio::task::spawn_blocking(move || resolver.resolve(DeviceKind::Playback)).await??
    };
    println!("Using {target}");

    // Generate 2 seconds of 440Hz sine wave at 24kHz sample rate
    let sample_rate = 24000_u32;
    let frequency = 440.0_f32;
    let duration_secs = 2.0_f32;
    #[allow(
        clippy::cast_possible_truncation,
        clippy::cast_sign_loss,
        clippy::cast_precision_loss
    )]
    let num_samples = (sample_rate as f32 * duration_secs) as usize;

    #[allow(clippy::cast_precision_loss)]
    let samples: Vec<f32> = (0..num_samples)
        .map(|i| {
            let t = i as f32 / sample_rate as f32;
            (2.0 * std::f32::consts::PI * frequency * t).sin() * 0.3 // 30% volume
        })
        .collect();

    let mut playback = CpalPlayback::with_target(resolver, target);
    playback
        .play(&SpeechAudio {
            samples,
            sample_rate,
        })
        .await?;

    println!("\n---");
    println!("If you heard the tone, your speakers are working!");
    println!("If you didn't hear anything, check:");
    println!("  1. Run: pactl info | grep 'Default Sink'");
    println!("  2. Run: pactl list sinks short");
    println!("  3. Try --speaker-target with a device index or name");

    Ok(())
}
