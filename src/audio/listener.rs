//! Continuous capture loop with VAD segmentation.
//!
//! [`CaptureService`] owns the audio source exclusively and runs the
//! sense -> buffer -> segment loop on a dedicated thread. Completed utterances
//! are handed to the consumer through a single-slot channel: if an utterance
//! is already pending, the new one is dropped and logged rather than queued.

use crossbeam_channel::{bounded, Receiver, RecvTimeoutError, Sender, TrySendError};
use std::sync::{Arc, Mutex, MutexGuard};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};
use thiserror::Error;
use tracing::{debug, info, warn};

use super::capture::{AudioUtterance, FrameOutcome, Segmenter};
use super::source::{AudioSource, MicSource, SourceError};
use super::vad::VadConfig;
use super::SAMPLE_RATE;

/// Delay after a transient device read error before retrying.
const READ_RETRY_DELAY: Duration = Duration::from_millis(100);
/// Idle delay when the device had no data, and the loop's poll cadence.
const POLL_DELAY: Duration = Duration::from_millis(10);
/// How long each blocking wait slice lasts inside `wait_for_utterance`;
/// shutdown is observed within one slice.
const WAIT_POLL_INTERVAL: Duration = Duration::from_secs(1);
/// Grace period for the loop thread to observe a stop during cleanup.
const STOP_GRACE: Duration = Duration::from_millis(200);

#[derive(Debug, Error)]
pub enum CaptureError {
    #[error("audio device error: {0}")]
    Device(String),
    #[error("invalid capture state: {0}")]
    State(&'static str),
    #[error("capture service is shutting down")]
    ShuttingDown,
    #[error("listening stopped")]
    Stopped,
    #[error("timed out waiting for an utterance")]
    TimedOut,
}

/// Read-only view of the capture flags, taken under the lock in one piece so
/// callers never observe a half-updated state.
#[derive(Debug, Copy, Clone, Default, PartialEq, Eq)]
pub struct CaptureSnapshot {
    pub listening: bool,
    pub recording: bool,
    pub transcribing: bool,
    pub shutting_down: bool,
}

#[derive(Default)]
struct Flags {
    initialized: bool,
    listening: bool,
    recording: bool,
    transcribing: bool,
    shutting_down: bool,
}

struct Inner {
    flags: Mutex<Flags>,
    source: Mutex<Option<Box<dyn AudioSource>>>,
    vad: VadConfig,
    utterance_tx: Sender<AudioUtterance>,
    utterance_rx: Receiver<AudioUtterance>,
    started_tx: Sender<()>,
    started_rx: Receiver<()>,
    worker: Mutex<Option<JoinHandle<()>>>,
    preferred_device: Option<String>,
}

impl Inner {
    fn flags(&self) -> MutexGuard<'_, Flags> {
        self.flags.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn snapshot(&self) -> CaptureSnapshot {
        let flags = self.flags();
        CaptureSnapshot {
            listening: flags.listening,
            recording: flags.recording,
            transcribing: flags.transcribing,
            shutting_down: flags.shutting_down,
        }
    }
}

/// Voice capture service: owns the microphone, segments speech, and emits
/// utterances to a single consumer.
pub struct CaptureService {
    inner: Arc<Inner>,
}

impl CaptureService {
    pub fn new(vad: VadConfig, preferred_device: Option<String>) -> Self {
        let (utterance_tx, utterance_rx) = bounded(1);
        let (started_tx, started_rx) = bounded(1);
        Self {
            inner: Arc::new(Inner {
                flags: Mutex::new(Flags::default()),
                source: Mutex::new(None),
                vad,
                utterance_tx,
                utterance_rx,
                started_tx,
                started_rx,
                worker: Mutex::new(None),
                preferred_device,
            }),
        }
    }

    /// Build a service around an already-open source, marked initialized.
    /// Lets the loop run against a scripted source with no real device.
    #[cfg(test)]
    pub(crate) fn with_source(vad: VadConfig, source: Box<dyn AudioSource>) -> Self {
        let service = Self::new(vad, None);
        {
            let mut flags = service.inner.flags();
            flags.initialized = true;
        }
        *service
            .inner
            .source
            .lock()
            .unwrap_or_else(|e| e.into_inner()) = Some(source);
        service
    }

    /// Open the audio device. Idempotent after success; fails with a device
    /// error that should abort startup.
    pub fn initialize(&self) -> Result<(), CaptureError> {
        let mut flags = self.inner.flags();
        if flags.shutting_down {
            return Err(CaptureError::ShuttingDown);
        }
        if flags.initialized {
            return Ok(());
        }

        let source = MicSource::open(self.inner.preferred_device.as_deref())
            .map_err(|e| CaptureError::Device(e.to_string()))?;
        info!(device = %source.device_name(), "audio input initialized");

        *self
            .inner
            .source
            .lock()
            .unwrap_or_else(|e| e.into_inner()) = Some(Box::new(source));
        flags.initialized = true;
        Ok(())
    }

    /// Spawn the capture loop thread. Returns immediately once the device is
    /// streaming.
    pub fn start_listening(&self) -> Result<(), CaptureError> {
        {
            let mut flags = self.inner.flags();
            if flags.shutting_down {
                return Err(CaptureError::ShuttingDown);
            }
            if !flags.initialized {
                return Err(CaptureError::State("not initialized"));
            }
            if flags.listening {
                return Err(CaptureError::State("already listening"));
            }
            flags.listening = true;
        }

        let resume_result = {
            let mut source = self
                .inner
                .source
                .lock()
                .unwrap_or_else(|e| e.into_inner());
            match source.as_mut() {
                Some(source) => source.resume(),
                None => Err(SourceError::Closed),
            }
        };
        if let Err(err) = resume_result {
            self.inner.flags().listening = false;
            return Err(CaptureError::Device(err.to_string()));
        }

        let inner = self.inner.clone();
        let handle = thread::spawn(move || run_capture_loop(inner));
        *self
            .inner
            .worker
            .lock()
            .unwrap_or_else(|e| e.into_inner()) = Some(handle);

        info!("started listening for voice input");
        Ok(())
    }

    /// Signal the loop to exit and wait for it to pause the device.
    pub fn stop_listening(&self) -> Result<(), CaptureError> {
        {
            let mut flags = self.inner.flags();
            if !flags.listening {
                return Err(CaptureError::State("not currently listening"));
            }
            // Set first so the loop stops processing frames before we join.
            flags.listening = false;
        }

        let handle = self
            .inner
            .worker
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .take();
        if let Some(handle) = handle {
            let _ = handle.join();
        }

        info!("stopped listening for voice input");
        Ok(())
    }

    /// Block until an utterance arrives, the timeout elapses, or the service
    /// stops. Polls in short slices so shutdown is observed promptly.
    pub fn wait_for_utterance(&self, timeout: Duration) -> Result<AudioUtterance, CaptureError> {
        {
            let snap = self.inner.snapshot();
            if snap.shutting_down {
                return Err(CaptureError::ShuttingDown);
            }
            if !snap.listening {
                return Err(CaptureError::Stopped);
            }
        }

        let deadline = Instant::now() + timeout;
        loop {
            if self.inner.snapshot().shutting_down {
                return Err(CaptureError::ShuttingDown);
            }
            let remaining = deadline.saturating_duration_since(Instant::now());
            let slice = remaining.min(WAIT_POLL_INTERVAL);
            match self.inner.utterance_rx.recv_timeout(slice) {
                Ok(utterance) => return Ok(utterance),
                Err(RecvTimeoutError::Timeout) => {
                    let snap = self.inner.snapshot();
                    if snap.shutting_down {
                        return Err(CaptureError::ShuttingDown);
                    }
                    if !snap.listening {
                        return Err(CaptureError::Stopped);
                    }
                    if Instant::now() >= deadline {
                        return Err(CaptureError::TimedOut);
                    }
                }
                Err(RecvTimeoutError::Disconnected) => return Err(CaptureError::Stopped),
            }
        }
    }

    /// Consume a pending "recording started" notification, if any. The signal
    /// is best-effort: at most one is queued.
    pub fn take_recording_started(&self) -> bool {
        self.inner.started_rx.try_recv().is_ok()
    }

    pub fn snapshot(&self) -> CaptureSnapshot {
        self.inner.snapshot()
    }

    pub fn is_listening(&self) -> bool {
        self.inner.snapshot().listening
    }

    pub fn is_recording(&self) -> bool {
        self.inner.snapshot().recording
    }

    pub fn is_transcribing(&self) -> bool {
        self.inner.snapshot().transcribing
    }

    /// Set by the orchestrator around transcription calls so the status line
    /// can show TRANSCRIBING.
    pub fn set_transcribing(&self, transcribing: bool) {
        self.inner.flags().transcribing = transcribing;
    }

    /// Idempotent teardown: fence new waits, stop the loop, release the
    /// device. Never fails; repeat calls are no-ops.
    pub fn cleanup(&self) {
        let was_listening = {
            let mut flags = self.inner.flags();
            flags.shutting_down = true;
            flags.listening
        };

        if was_listening {
            if let Err(err) = self.stop_listening() {
                debug!("stop during cleanup: {err}");
            }
            // Give a straggling loop iteration time to observe the stop.
            thread::sleep(STOP_GRACE);
        }

        let source = self
            .inner
            .source
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .take();
        if let Some(mut source) = source {
            source.close();
            self.inner.flags().initialized = false;
            info!("audio capture resources released");
        }
    }
}

/// Resets state and pauses the device however the loop exits: normal stop,
/// error, or shutdown.
struct LoopGuard {
    inner: Arc<Inner>,
}

impl Drop for LoopGuard {
    fn drop(&mut self) {
        {
            let mut flags = self.inner.flags();
            flags.recording = false;
            flags.listening = false;
        }
        let mut source = self
            .inner
            .source
            .lock()
            .unwrap_or_else(|e| e.into_inner());
        if let Some(source) = source.as_mut() {
            source.pause();
        }
        info!("audio capture loop exited");
    }
}

fn run_capture_loop(inner: Arc<Inner>) {
    let _guard = LoopGuard {
        inner: inner.clone(),
    };
    let mut segmenter = Segmenter::new(inner.vad.clone(), SAMPLE_RATE);

    loop {
        {
            let flags = inner.flags();
            if !flags.listening || flags.shutting_down {
                return;
            }
        }

        // Snapshot the frame under the source lock, then process without it.
        let frame = {
            let mut source = inner.source.lock().unwrap_or_else(|e| e.into_inner());
            match source.as_mut() {
                Some(source) => source.read(),
                None => return,
            }
        };

        let frame = match frame {
            Ok(frame) => frame,
            Err(SourceError::Transient(msg)) => {
                if !inner.snapshot().listening {
                    return;
                }
                warn!("audio read error: {msg}");
                thread::sleep(READ_RETRY_DELAY);
                continue;
            }
            Err(SourceError::Closed) | Err(SourceError::Device(_)) => return,
        };

        if frame.is_empty() {
            thread::sleep(POLL_DELAY);
            continue;
        }

        match segmenter.push_frame(&frame) {
            FrameOutcome::Quiet => {}
            FrameOutcome::Started => {
                inner.flags().recording = true;
                // Best-effort signal; a stale pending notification is fine.
                let _ = inner.started_tx.try_send(());
                debug!("voice detected, started recording");
            }
            FrameOutcome::Recording => {}
            FrameOutcome::Completed(utterance) => {
                inner.flags().recording = false;
                let samples = utterance.samples.len();
                match inner.utterance_tx.try_send(utterance) {
                    Ok(()) => {
                        info!(samples, "end of speech detected, utterance emitted");
                    }
                    Err(TrySendError::Full(_)) => {
                        warn!(samples, "utterance slot full, dropping capture");
                    }
                    Err(TrySendError::Disconnected(_)) => return,
                }
            }
            FrameOutcome::Discarded { samples } => {
                inner.flags().recording = false;
                debug!(samples, "recording too short, discarded");
            }
        }

        thread::sleep(POLL_DELAY);
    }
}

impl crate::shutdown::Shutdownable for CaptureService {
    fn name(&self) -> &str {
        "capture"
    }

    fn shutdown(&self) -> anyhow::Result<()> {
        self.cleanup();
        Ok(())
    }
}
