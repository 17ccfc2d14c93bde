//! Live status line.
//!
//! Polls the capture service's state flags and rewrites a single status line
//! in place. Transient errors never surface here; the line only shows the
//! coarse states.

use std::io::Write;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};
use std::time::Duration;
use tracing::debug;

use crate::audio::{CaptureService, CaptureSnapshot};

const POLL_INTERVAL: Duration = Duration::from_millis(100);

/// Pick the label for a state snapshot. Recording wins over transcribing so
/// the line tracks what the microphone is doing right now.
pub fn status_label(snapshot: CaptureSnapshot) -> &'static str {
    if snapshot.shutting_down {
        "SHUTDOWN"
    } else if snapshot.recording {
        "RECORDING"
    } else if snapshot.transcribing {
        "TRANSCRIBING"
    } else if snapshot.listening {
        "LISTENING"
    } else {
        "IDLE"
    }
}

struct StatusInner {
    capture: Arc<CaptureService>,
    done: AtomicBool,
    worker: Mutex<Option<JoinHandle<()>>>,
}

/// Background status-line renderer. Registered with the shutdown coordinator
/// like any other service.
pub struct StatusReporter {
    inner: Arc<StatusInner>,
}

impl StatusReporter {
    pub fn new(capture: Arc<CaptureService>) -> Self {
        Self {
            inner: Arc::new(StatusInner {
                capture,
                done: AtomicBool::new(false),
                worker: Mutex::new(None),
            }),
        }
    }

    /// Spawn the polling thread writing to `writer`.
    pub fn start<W: Write + Send + 'static>(&self, mut writer: W) {
        let inner = self.inner.clone();
        let handle = thread::spawn(move || {
            loop {
                if inner.done.load(Ordering::Relaxed) {
                    let _ = write!(writer, "\rStatus: SHUTDOWN     \n");
                    let _ = writer.flush();
                    return;
                }
                if inner.capture.take_recording_started() {
                    debug!("recording started");
                }
                let label = status_label(inner.capture.snapshot());
                // Trailing spaces blank out the previous, possibly longer label.
                let _ = write!(writer, "\rStatus: {label}     ");
                let _ = writer.flush();
                thread::sleep(POLL_INTERVAL);
            }
        });
        *self
            .inner
            .worker
            .lock()
            .unwrap_or_else(|e| e.into_inner()) = Some(handle);
    }

    pub fn stop(&self) {
        self.inner.done.store(true, Ordering::Relaxed);
        let handle = self
            .inner
            .worker
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .take();
        if let Some(handle) = handle {
            let _ = handle.join();
        }
        debug!("status reporter stopped");
    }
}

impl crate::shutdown::Shutdownable for StatusReporter {
    fn name(&self) -> &str {
        "status"
    }

    fn shutdown(&self) -> anyhow::Result<()> {
        self.stop();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn label_priority_matches_display_rules() {
        let mut snap = CaptureSnapshot::default();
        assert_eq!(status_label(snap), "IDLE");

        snap.listening = true;
        assert_eq!(status_label(snap), "LISTENING");

        snap.transcribing = true;
        assert_eq!(status_label(snap), "TRANSCRIBING");

        snap.recording = true;
        assert_eq!(status_label(snap), "RECORDING");

        snap.shutting_down = true;
        assert_eq!(status_label(snap), "SHUTDOWN");
    }

    /// Writer handle that appends into a shared buffer the test can inspect.
    #[derive(Clone)]
    struct SharedBuf(Arc<Mutex<Vec<u8>>>);

    impl Write for SharedBuf {
        fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
            self.0.lock().unwrap().extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }

    #[test]
    fn renders_states_and_final_shutdown_line() {
        let capture = Arc::new(CaptureService::new(crate::audio::VadConfig::default(), None));
        let reporter = StatusReporter::new(capture);
        let buf = SharedBuf(Arc::new(Mutex::new(Vec::new())));

        reporter.start(buf.clone());
        thread::sleep(Duration::from_millis(250));
        reporter.stop();

        let output = String::from_utf8(buf.0.lock().unwrap().clone()).unwrap();
        assert!(output.contains("Status: IDLE"), "got: {output:?}");
        assert!(output.ends_with("Status: SHUTDOWN     \n"), "got: {output:?}");
    }
}
