//! Supervised whisper-server transcription backend.
//!
//! Spawns the external whisper.cpp server, health-checks it until it answers
//! HTTP, watches for unexpected exits on a monitor thread, and exposes a
//! synchronous `transcribe` call with bounded retries. Termination escalates
//! SIGINT -> SIGKILL -> system kill so a wedged server never blocks shutdown.

use serde::Deserialize;
use std::io::{BufRead, BufReader, Write};
use std::path::Path;
use std::process::{Child, Command, Stdio};
use std::sync::{Arc, Mutex, MutexGuard};
use std::thread;
use std::time::{Duration, Instant};
use thiserror::Error;
use tracing::{debug, error, info, warn};

use crate::audio::AudioUtterance;

#[derive(Debug, Error)]
pub enum WhisperError {
    #[error("whisper server failed to start: {message}")]
    ServerStart { message: String, output: String },
    #[error("whisper server is not running")]
    NotRunning,
    #[error("no audio samples to transcribe")]
    EmptyAudio,
    #[error("transcription request failed after {attempts} attempts: {message}")]
    Transport { attempts: u32, message: String },
    #[error("whisper server returned status {status}: {body}")]
    Server { status: u16, body: String },
    #[error("failed to decode whisper server response: {0}")]
    Decode(String),
    #[error("transcription i/o error: {0}")]
    Io(#[from] std::io::Error),
}

/// Immutable configuration snapshot for the whisper server. Built once before
/// start and never mutated while the server runs.
#[derive(Debug, Clone)]
pub struct WhisperServerConfig {
    pub model_path: String,
    pub server_path: String,
    pub host: String,
    pub port: u16,
    pub num_threads: usize,
    pub language: String,
    pub translate: bool,
    pub beam_size: u32,
    pub best_of: u32,
    pub word_thold: f64,
    pub print_progress: bool,
    pub initial_prompt: String,
    pub temperature: f64,
    pub temperature_inc: f64,
    /// Health-check attempt budget and per-attempt delay during startup.
    pub startup_attempts: u32,
    pub startup_poll: Duration,
    /// Per-attempt request timeout for inference calls.
    pub request_timeout: Duration,
    /// Attempts on transport-level failure (total, not extra retries).
    pub max_retries: u32,
}

impl Default for WhisperServerConfig {
    fn default() -> Self {
        let home = std::env::var("HOME").unwrap_or_else(|_| ".".to_string());
        let model_path = env_or(
            "WHISPER_MODEL",
            format!("{home}/dev/whisper.cpp/models/ggml-large-v3-turbo.bin"),
        );
        let server_path = env_or(
            "WHISPER_BIN",
            format!("{home}/dev/whisper.cpp/build/bin/whisper-server"),
        );
        Self {
            model_path,
            server_path,
            host: "127.0.0.1".to_string(),
            port: 8080,
            num_threads: 4,
            language: "en".to_string(),
            translate: false,
            beam_size: 5,
            best_of: 2,
            word_thold: 0.01,
            print_progress: false,
            initial_prompt: String::new(),
            temperature: 0.0,
            temperature_inc: 0.2,
            startup_attempts: 30,
            startup_poll: Duration::from_millis(100),
            request_timeout: Duration::from_secs(30),
            max_retries: 3,
        }
    }
}

fn env_or(key: &str, default: String) -> String {
    match std::env::var(key) {
        Ok(value) if !value.is_empty() => value,
        _ => default,
    }
}

impl WhisperServerConfig {
    fn base_url(&self) -> String {
        format!("http://{}:{}", self.host, self.port)
    }

    fn server_args(&self) -> Vec<String> {
        let mut args = vec![
            "--host".to_string(),
            self.host.clone(),
            "--port".to_string(),
            self.port.to_string(),
            "-t".to_string(),
            self.num_threads.to_string(),
            "-m".to_string(),
            self.model_path.clone(),
            "-l".to_string(),
            self.language.clone(),
            "-bs".to_string(),
            self.beam_size.to_string(),
            "-bo".to_string(),
            self.best_of.to_string(),
            "-wt".to_string(),
            self.word_thold.to_string(),
        ];
        if self.translate {
            args.push("--translate".to_string());
        }
        if !self.initial_prompt.is_empty() {
            args.push("--prompt".to_string());
            args.push(self.initial_prompt.clone());
        }
        if self.print_progress {
            args.push("-pp".to_string());
        }
        args
    }
}

/// One transcription response. Immutable, produced per call.
#[derive(Debug, Clone, Deserialize)]
pub struct TranscriptionResult {
    pub text: String,
    #[serde(default)]
    pub segments: Vec<TranscriptSegment>,
    #[serde(default)]
    pub language: Option<String>,
    #[serde(skip)]
    pub success: bool,
}

#[derive(Debug, Clone, Deserialize)]
pub struct TranscriptSegment {
    pub id: i32,
    pub start: f64,
    pub end: f64,
    pub text: String,
    #[serde(default)]
    pub confidence: f64,
}

struct ServerState {
    running: bool,
    child: Option<Child>,
    pid: Option<u32>,
    captured_output: Arc<Mutex<String>>,
}

/// Transcription backend supervising an external whisper-server process.
pub struct WhisperServer {
    config: WhisperServerConfig,
    state: Arc<Mutex<ServerState>>,
    client: reqwest::blocking::Client,
}

/// Log file for the supervised server's combined stdout/stderr.
const SERVER_LOG_FILE: &str = "whisper-server.log";
/// Monitor thread poll cadence for unexpected process exit.
const MONITOR_POLL: Duration = Duration::from_millis(250);
/// Grace period after SIGINT and after SIGKILL before escalating.
const KILL_WAIT: Duration = Duration::from_secs(1);
/// Base for the linearly increasing retry backoff (attempt * base).
const RETRY_BACKOFF_BASE: Duration = Duration::from_millis(500);

impl WhisperServer {
    pub fn new(config: WhisperServerConfig) -> Self {
        Self {
            config,
            state: Arc::new(Mutex::new(ServerState {
                running: false,
                child: None,
                pid: None,
                captured_output: Arc::new(Mutex::new(String::new())),
            })),
            client: reqwest::blocking::Client::new(),
        }
    }

    /// A backend pointed at an existing HTTP endpoint with no child process.
    #[cfg(test)]
    pub(crate) fn connected_for_tests(config: WhisperServerConfig) -> Self {
        let server = Self::new(config);
        server.lock_state().running = true;
        server
    }

    fn lock_state(&self) -> MutexGuard<'_, ServerState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn is_running(&self) -> bool {
        self.lock_state().running
    }

    pub fn config(&self) -> &WhisperServerConfig {
        &self.config
    }

    /// Spawn the server process and wait for it to answer HTTP. Idempotent
    /// when already running. On failure the captured process output is
    /// attached to the error so startup aborts with something actionable.
    pub fn start(&self) -> Result<(), WhisperError> {
        {
            let state = self.lock_state();
            if state.running {
                return Ok(());
            }
        }

        if !Path::new(&self.config.server_path).exists() {
            return Err(WhisperError::ServerStart {
                message: format!("executable not found at {}", self.config.server_path),
                output: String::new(),
            });
        }

        let args = self.config.server_args();
        info!(
            server = %self.config.server_path,
            model = %self.config.model_path,
            "starting whisper server: {} {}",
            self.config.server_path,
            args.join(" ")
        );

        let mut child = Command::new(&self.config.server_path)
            .args(&args)
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .stdin(Stdio::null())
            .spawn()
            .map_err(|e| WhisperError::ServerStart {
                message: format!("failed to spawn: {e}"),
                output: String::new(),
            })?;

        let pid = child.id();
        info!(pid, "whisper server started");

        let captured = Arc::new(Mutex::new(String::new()));
        let log_file = Arc::new(Mutex::new(std::fs::File::create(SERVER_LOG_FILE).ok()));
        if let Some(stdout) = child.stdout.take() {
            spawn_output_tee(stdout, captured.clone(), log_file.clone());
        }
        if let Some(stderr) = child.stderr.take() {
            spawn_output_tee(stderr, captured.clone(), log_file.clone());
        }

        {
            let mut state = self.lock_state();
            state.child = Some(child);
            state.pid = Some(pid);
            state.running = true;
            state.captured_output = captured.clone();
        }

        let started = Instant::now();
        let url = self.config.base_url();
        let mut ready = false;
        for _ in 0..self.config.startup_attempts {
            thread::sleep(self.config.startup_poll);

            // Bail out early if the process already died.
            {
                let mut state = self.lock_state();
                let exited = match state.child.as_mut() {
                    Some(child) => child.try_wait().ok().flatten().is_some(),
                    None => true,
                };
                if exited {
                    state.running = false;
                    state.child = None;
                    let output = snapshot_output(&captured);
                    return Err(WhisperError::ServerStart {
                        message: "process exited before becoming healthy".to_string(),
                        output,
                    });
                }
            }

            // Any HTTP response counts as "up"; the server answers plain GETs
            // once the model is loaded.
            let probe = self
                .client
                .get(&url)
                .timeout(Duration::from_secs(2))
                .send();
            if probe.is_ok() {
                ready = true;
                debug!(elapsed = ?started.elapsed(), "whisper server ready");
                break;
            }
        }

        if !ready {
            self.cleanup();
            return Err(WhisperError::ServerStart {
                message: format!(
                    "no response from {url} within {} attempts",
                    self.config.startup_attempts
                ),
                output: snapshot_output(&captured),
            });
        }

        self.spawn_exit_monitor();
        Ok(())
    }

    /// Watch for the process dying underneath us after a successful start.
    fn spawn_exit_monitor(&self) {
        let state = Arc::clone(&self.state);
        thread::spawn(move || loop {
            thread::sleep(MONITOR_POLL);
            let mut guard = state.lock().unwrap_or_else(|e| e.into_inner());
            if !guard.running {
                return; // normal shutdown path
            }
            let status = match guard.child.as_mut() {
                Some(child) => child.try_wait().ok().flatten(),
                None => return,
            };
            if let Some(status) = status {
                let output = snapshot_output(&guard.captured_output);
                error!(
                    %status,
                    "whisper server exited unexpectedly; see {SERVER_LOG_FILE}\n{output}"
                );
                guard.running = false;
                guard.child = None;
                return;
            }
        });
    }

    /// Transcribe one utterance synchronously.
    ///
    /// The utterance is written to a transient WAV file which is removed on
    /// every exit path (the tempfile is unlinked when it drops). Transport
    /// failures are retried with a linearly increasing backoff; server-side
    /// errors are surfaced immediately.
    pub fn transcribe(
        &self,
        utterance: &AudioUtterance,
    ) -> Result<TranscriptionResult, WhisperError> {
        let base_url = {
            let state = self.lock_state();
            if !state.running {
                return Err(WhisperError::NotRunning);
            }
            self.config.base_url()
        };
        if utterance.samples.is_empty() {
            return Err(WhisperError::EmptyAudio);
        }

        let wav = tempfile::Builder::new()
            .prefix("sotto_")
            .suffix(".wav")
            .tempfile()?;
        crate::audio::wav::write_wav(wav.path(), utterance)
            .map_err(|e| std::io::Error::other(format!("{e:#}")))?;
        debug!(path = %wav.path().display(), "wrote transient transcription input");

        let inference_url = format!("{base_url}/inference");
        let started = Instant::now();
        let mut last_error = None;

        for attempt in 0..self.config.max_retries {
            if attempt > 0 {
                warn!(
                    attempt = attempt + 1,
                    max = self.config.max_retries,
                    "retrying transcription request"
                );
                thread::sleep(RETRY_BACKOFF_BASE * attempt);
            }

            // The multipart form is consumed by send, so rebuild per attempt.
            let form = reqwest::blocking::multipart::Form::new()
                .file("file", wav.path())?
                .text("temperature", format!("{:.1}", self.config.temperature))
                .text(
                    "temperature_inc",
                    format!("{:.1}", self.config.temperature_inc),
                )
                .text("response_format", "json");

            let response = self
                .client
                .post(&inference_url)
                .timeout(self.config.request_timeout)
                .multipart(form)
                .send();

            let response = match response {
                Ok(response) => response,
                Err(err) => {
                    debug!(attempt = attempt + 1, "transport failure: {err}");
                    last_error = Some(err);
                    continue;
                }
            };

            info!(elapsed = ?started.elapsed(), "received whisper server response");
            let status = response.status();
            let body = response.text().map_err(|e| WhisperError::Decode(e.to_string()))?;
            if !status.is_success() {
                return Err(WhisperError::Server {
                    status: status.as_u16(),
                    body,
                });
            }

            let mut result: TranscriptionResult = serde_json::from_str(&body)
                .map_err(|e| WhisperError::Decode(format!("{e}; body: {body}")))?;
            result.success = true;
            debug!(text = %result.text, "transcription result");
            return Ok(result);
        }

        Err(WhisperError::Transport {
            attempts: self.config.max_retries,
            message: last_error
                .map(|e| e.to_string())
                .unwrap_or_else(|| "no attempts made".to_string()),
        })
    }

    /// Idempotent teardown: fence new calls, then terminate the process with
    /// escalation. Failures are logged, never surfaced; shutdown must not
    /// fail the process.
    pub fn cleanup(&self) {
        let child = {
            let mut state = self.lock_state();
            if !state.running && state.child.is_none() {
                return;
            }
            // Mark not-running first so new transcribe calls are rejected
            // while the process is going down.
            state.running = false;
            state.child.take()
        };

        let Some(mut child) = child else {
            debug!("no whisper server process to stop");
            return;
        };
        let pid = child.id();
        info!(pid, "stopping whisper server");

        // SAFETY: pid belongs to a child we spawned and still hold; at worst
        // the signal races its exit and is delivered to a zombie we reap below.
        let rc = unsafe { libc::kill(pid as libc::pid_t, libc::SIGINT) };
        if rc != 0 {
            warn!(pid, "failed to send SIGINT: {}", std::io::Error::last_os_error());
        }
        if wait_for_exit(&mut child, KILL_WAIT) {
            info!(pid, "whisper server exited after SIGINT");
            return;
        }

        warn!(pid, "whisper server did not exit gracefully, force killing");
        if let Err(err) = child.kill() {
            warn!(pid, "failed to kill whisper server: {err}");
        }
        if wait_for_exit(&mut child, KILL_WAIT) {
            info!(pid, "whisper server killed");
            return;
        }

        // Last resort: ask the OS directly.
        warn!(pid, "process not responding to SIGKILL, using system kill");
        match Command::new("kill").args(["-9", &pid.to_string()]).status() {
            Ok(status) if status.success() => info!(pid, "system kill sent"),
            Ok(status) => warn!(pid, "system kill exited with {status}"),
            Err(err) => warn!(pid, "system kill failed: {err}"),
        }
    }
}

impl crate::shutdown::Shutdownable for WhisperServer {
    fn name(&self) -> &str {
        "whisper-server"
    }

    fn shutdown(&self) -> anyhow::Result<()> {
        self.cleanup();
        Ok(())
    }
}

/// Poll for process exit up to `deadline`, reaping it on success.
fn wait_for_exit(child: &mut Child, deadline: Duration) -> bool {
    let end = Instant::now() + deadline;
    loop {
        match child.try_wait() {
            Ok(Some(_)) => return true,
            Ok(None) => {}
            Err(err) => {
                warn!("error waiting for whisper server: {err}");
                return false;
            }
        }
        if Instant::now() >= end {
            return false;
        }
        thread::sleep(Duration::from_millis(50));
    }
}

/// Mirror a child output pipe into the on-disk log and the in-memory buffer
/// used for startup/exit diagnostics.
fn spawn_output_tee(
    pipe: impl std::io::Read + Send + 'static,
    captured: Arc<Mutex<String>>,
    log_file: Arc<Mutex<Option<std::fs::File>>>,
) {
    thread::spawn(move || {
        let reader = BufReader::new(pipe);
        for line in reader.lines() {
            let Ok(line) = line else { break };
            if let Ok(mut file) = log_file.lock() {
                if let Some(file) = file.as_mut() {
                    let _ = writeln!(file, "{line}");
                }
            }
            if let Ok(mut buffer) = captured.lock() {
                buffer.push_str(&line);
                buffer.push('\n');
            }
        }
    });
}

fn snapshot_output(captured: &Arc<Mutex<String>>) -> String {
    captured
        .lock()
        .map(|buffer| buffer.clone())
        .unwrap_or_default()
}
