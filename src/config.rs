//! Command-line parsing and validation.

use clap::Parser;
use std::path::PathBuf;
use std::time::Duration;

use crate::audio::VadConfig;
use crate::whisper::WhisperServerConfig;

fn default_model_path() -> String {
    let home = std::env::var("HOME").unwrap_or_else(|_| ".".to_string());
    format!("{home}/dev/whisper.cpp/models/ggml-large-v3-turbo.bin")
}

fn default_server_path() -> String {
    let home = std::env::var("HOME").unwrap_or_else(|_| ".".to_string());
    format!("{home}/dev/whisper.cpp/build/bin/whisper-server")
}

/// CLI options for sotto. Validated values feed the capture pipeline and the
/// whisper server subprocess.
#[derive(Debug, Parser, Clone)]
#[command(name = "sotto", about = "Sotto voice terminal transcription", version)]
pub struct AppConfig {
    /// Path to the whisper model file
    #[arg(long, env = "WHISPER_MODEL", default_value_t = default_model_path())]
    pub model: String,

    /// Path to the whisper-server executable
    #[arg(long = "server-bin", env = "WHISPER_BIN", default_value_t = default_server_path())]
    pub server_bin: String,

    /// Host the whisper server binds to
    #[arg(long, default_value = "127.0.0.1")]
    pub host: String,

    /// Port the whisper server binds to
    #[arg(long, default_value_t = 8080)]
    pub port: u16,

    /// Threads for the whisper server (0 = pick from CPU count)
    #[arg(long, default_value_t = 0)]
    pub threads: usize,

    /// Transcription language code ("auto" for detection)
    #[arg(long, default_value = "en")]
    pub lang: String,

    /// Translate the transcript to English
    #[arg(long, default_value_t = false)]
    pub translate: bool,

    /// Beam size for beam search decoding
    #[arg(long = "beam-size", default_value_t = 5)]
    pub beam_size: u32,

    /// Number of best candidates to keep
    #[arg(long = "best-of", default_value_t = 2)]
    pub best_of: u32,

    /// Word timestamp probability threshold
    #[arg(long = "word-thold", default_value_t = 0.01)]
    pub word_thold: f64,

    /// Initial sampling temperature
    #[arg(long, default_value_t = 0.0)]
    pub temperature: f64,

    /// Temperature increment for decoding fallbacks
    #[arg(long = "temperature-inc", default_value_t = 0.2)]
    pub temperature_inc: f64,

    /// Initial prompt fed to the model
    #[arg(long = "initial-prompt", default_value = "")]
    pub initial_prompt: String,

    /// Ask the server to print transcription progress
    #[arg(long = "print-progress", default_value_t = false)]
    pub print_progress: bool,

    /// VAD energy threshold (average absolute sample magnitude)
    #[arg(long = "vad-threshold", default_value_t = crate::audio::VAD_THRESHOLD)]
    pub vad_threshold: i64,

    /// Consecutive silent frames that end a recording
    #[arg(long = "silence-frames", default_value_t = crate::audio::VAD_SILENCE_FRAMES)]
    pub silence_frames: u32,

    /// Preferred audio input device name
    #[arg(long)]
    pub input_device: Option<String>,

    /// Print detected audio input devices and exit
    #[arg(long = "list-input-devices", default_value_t = false)]
    pub list_input_devices: bool,

    /// Save each captured utterance as a WAV file into this directory
    #[arg(long = "save-recordings", value_name = "DIR")]
    pub save_recordings: Option<PathBuf>,

    /// Global shutdown timeout in seconds
    #[arg(long = "shutdown-timeout", default_value_t = 10)]
    pub shutdown_timeout_secs: u64,

    /// Disable file logging
    #[arg(long = "no-logs", env = "SOTTO_NO_LOGS", default_value_t = false)]
    pub no_logs: bool,
}

impl AppConfig {
    pub fn validate(&self) -> anyhow::Result<()> {
        anyhow::ensure!(self.port != 0, "--port must be non-zero");
        anyhow::ensure!(self.beam_size >= 1, "--beam-size must be at least 1");
        anyhow::ensure!(self.best_of >= 1, "--best-of must be at least 1");
        anyhow::ensure!(
            (0.0..=1.0).contains(&self.word_thold),
            "--word-thold must be within 0..=1"
        );
        anyhow::ensure!(self.vad_threshold > 0, "--vad-threshold must be positive");
        anyhow::ensure!(
            self.silence_frames >= 1,
            "--silence-frames must be at least 1"
        );
        anyhow::ensure!(
            self.shutdown_timeout_secs >= 1,
            "--shutdown-timeout must be at least 1 second"
        );
        Ok(())
    }

    pub fn vad_config(&self) -> VadConfig {
        VadConfig {
            threshold: self.vad_threshold,
            silence_frames: self.silence_frames,
            min_utterance_samples: (crate::audio::SAMPLE_RATE / 4) as usize,
        }
    }

    pub fn whisper_config(&self) -> WhisperServerConfig {
        let num_threads = if self.threads == 0 {
            num_cpus::get().min(8)
        } else {
            self.threads
        };
        WhisperServerConfig {
            model_path: self.model.clone(),
            server_path: self.server_bin.clone(),
            host: self.host.clone(),
            port: self.port,
            num_threads,
            language: self.lang.clone(),
            translate: self.translate,
            beam_size: self.beam_size,
            best_of: self.best_of,
            word_thold: self.word_thold,
            print_progress: self.print_progress,
            initial_prompt: self.initial_prompt.clone(),
            temperature: self.temperature,
            temperature_inc: self.temperature_inc,
            ..WhisperServerConfig::default()
        }
    }

    pub fn shutdown_timeout(&self) -> Duration {
        Duration::from_secs(self.shutdown_timeout_secs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(args: &[&str]) -> AppConfig {
        let mut argv = vec!["sotto"];
        argv.extend_from_slice(args);
        AppConfig::parse_from(argv)
    }

    #[test]
    fn defaults_are_valid() {
        let cfg = parse(&[]);
        cfg.validate().expect("defaults should validate");
        assert_eq!(cfg.port, 8080);
        assert_eq!(cfg.vad_threshold, 100);
        assert_eq!(cfg.silence_frames, 10);
    }

    #[test]
    fn vad_config_uses_cli_values() {
        let cfg = parse(&["--vad-threshold", "250", "--silence-frames", "4"]);
        let vad = cfg.vad_config();
        assert_eq!(vad.threshold, 250);
        assert_eq!(vad.silence_frames, 4);
        assert_eq!(vad.min_utterance_samples, 4_000);
    }

    #[test]
    fn whisper_config_picks_thread_count_automatically() {
        let cfg = parse(&[]);
        let whisper = cfg.whisper_config();
        assert!(whisper.num_threads >= 1);
        assert!(whisper.num_threads <= 8);

        let cfg = parse(&["--threads", "3"]);
        assert_eq!(cfg.whisper_config().num_threads, 3);
    }

    #[test]
    fn rejects_out_of_range_values() {
        assert!(parse(&["--port", "0"]).validate().is_err());
        assert!(parse(&["--word-thold", "1.5"]).validate().is_err());
        assert!(parse(&["--vad-threshold", "0"]).validate().is_err());
        assert!(parse(&["--silence-frames", "0"]).validate().is_err());
    }
}
