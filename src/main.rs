//! Orchestrator: wires capture, transcription, status, and shutdown together
//! and drives the utterance -> transcript loop.

use anyhow::Context;
use clap::Parser;
use sotto::audio::{wav, CaptureError, CaptureService, MicSource};
use sotto::config::AppConfig;
use sotto::status::StatusReporter;
use sotto::text::sanitize_transcript;
use sotto::whisper::WhisperServer;
use sotto::{telemetry, GracefulShutdown};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use tracing::{debug, info, warn};

/// How long one wait_for_utterance call blocks before the loop re-checks
/// service state.
const UTTERANCE_WAIT: Duration = Duration::from_secs(30);

fn main() {
    let config = AppConfig::parse();
    if let Err(err) = config.validate() {
        eprintln!("sotto: invalid configuration: {err:#}");
        std::process::exit(2);
    }

    if config.list_input_devices {
        match MicSource::list_devices() {
            Ok(devices) => {
                println!("audio input devices:");
                for name in devices {
                    println!("  {name}");
                }
            }
            Err(err) => eprintln!("Failed to list audio input devices: {err}"),
        }
        return;
    }

    telemetry::init_tracing(&config);
    info!(version = env!("CARGO_PKG_VERSION"), "starting sotto");

    if let Err(err) = run(&config) {
        eprintln!("sotto: {err:#}");
        std::process::exit(1);
    }
}

fn run(config: &AppConfig) -> anyhow::Result<()> {
    let capture = Arc::new(CaptureService::new(
        config.vad_config(),
        config.input_device.clone(),
    ));
    let whisper = Arc::new(WhisperServer::new(config.whisper_config()));
    let status = Arc::new(StatusReporter::new(capture.clone()));

    let coordinator = Arc::new(GracefulShutdown::new(config.shutdown_timeout()));
    coordinator.register(status.clone());
    coordinator.register(whisper.clone());
    coordinator.register(capture.clone());
    coordinator.start();

    // Startup failures abort outright; no partial-start limbo.
    whisper
        .start()
        .context("failed to start transcription server")?;
    capture
        .initialize()
        .context("failed to open audio input")?;
    capture
        .start_listening()
        .context("failed to start listening")?;
    status.start(std::io::stdout());

    run_transcription_loop(config, &capture, &whisper);

    info!("main loop exited, shutting down services");
    coordinator.trigger();
    Ok(())
}

fn run_transcription_loop(config: &AppConfig, capture: &CaptureService, whisper: &WhisperServer) {
    loop {
        let utterance = match capture.wait_for_utterance(UTTERANCE_WAIT) {
            Ok(utterance) => utterance,
            Err(CaptureError::TimedOut) => continue,
            Err(CaptureError::ShuttingDown) | Err(CaptureError::Stopped) => return,
            Err(err) => {
                warn!("wait for utterance failed: {err}");
                return;
            }
        };

        debug!(
            samples = utterance.samples.len(),
            seconds = utterance.duration_secs(),
            "utterance received"
        );
        if let Some(dir) = &config.save_recordings {
            if let Err(err) = save_recording(dir.clone(), &utterance) {
                warn!("failed to save recording: {err:#}");
            }
        }

        capture.set_transcribing(true);
        let result = whisper.transcribe(&utterance);
        capture.set_transcribing(false);

        match result {
            Ok(result) => {
                for segment in &result.segments {
                    debug!(
                        id = segment.id,
                        start = segment.start,
                        end = segment.end,
                        text = %segment.text,
                        "segment"
                    );
                }
                let text = sanitize_transcript(&result.text);
                if text.is_empty() {
                    debug!("transcript empty after sanitation");
                } else {
                    // Leading \r pushes the status line out of the way.
                    println!("\r{text}");
                }
            }
            // A failed transcription never kills the capture loop.
            Err(err) => warn!("transcription failed: {err}"),
        }
    }
}

fn save_recording(dir: PathBuf, utterance: &sotto::AudioUtterance) -> anyhow::Result<()> {
    std::fs::create_dir_all(&dir)
        .with_context(|| format!("failed to create {}", dir.display()))?;
    let stamp = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis();
    let path = dir.join(format!("utterance-{stamp}.wav"));
    wav::write_wav(&path, utterance)?;
    info!(path = %path.display(), "saved recording");
    Ok(())
}
