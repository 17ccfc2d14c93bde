//! Graceful shutdown coordination.
//!
//! Decouples "the process was asked to stop" (signal or explicit call) from
//! "every registered service released its resources". Services shut down in
//! parallel; the pass is bounded by a global timeout and slow services are
//! left behind rather than waited on forever.

use crossbeam_channel::{unbounded, RecvTimeoutError};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::{Duration, Instant};
use tracing::{error, info, warn};

/// A service that can be asked to release its resources. Shutdown must be
/// safe to call from any thread and should be idempotent; ordering between
/// services is not guaranteed, so implementations fence internally.
pub trait Shutdownable: Send + Sync {
    fn name(&self) -> &str;
    fn shutdown(&self) -> anyhow::Result<()>;
}

/// Set by the signal handler; polled by the listener thread. Signal handlers
/// may only do async-signal-safe work, so the handler just flips this flag.
static SIGNAL_RECEIVED: AtomicBool = AtomicBool::new(false);

extern "C" fn handle_termination_signal(_sig: libc::c_int) {
    SIGNAL_RECEIVED.store(true, Ordering::SeqCst);
}

const SIGNAL_POLL_INTERVAL: Duration = Duration::from_millis(100);

/// Registry plus coordinator: registered services are shut down in parallel
/// on the first trigger (signal or programmatic), once per process lifetime.
pub struct GracefulShutdown {
    services: Mutex<Vec<Arc<dyn Shutdownable>>>,
    timeout: Duration,
    fired: AtomicBool,
}

impl GracefulShutdown {
    pub fn new(timeout: Duration) -> Self {
        Self {
            services: Mutex::new(Vec::new()),
            timeout,
            fired: AtomicBool::new(false),
        }
    }

    /// Append a service to the registry. Registration after a shutdown pass
    /// has started does not join that pass; the pass works on a snapshot.
    pub fn register(&self, service: Arc<dyn Shutdownable>) {
        let mut services = self.services.lock().unwrap_or_else(|e| e.into_inner());
        info!(service = service.name(), "registered service for shutdown");
        services.push(service);
    }

    /// Install SIGINT/SIGTERM handling and watch for the first signal on a
    /// dedicated thread.
    pub fn start(self: &Arc<Self>) {
        unsafe {
            libc::signal(libc::SIGINT, handle_termination_signal as libc::sighandler_t);
            libc::signal(libc::SIGTERM, handle_termination_signal as libc::sighandler_t);
        }

        let coordinator = Arc::clone(self);
        thread::spawn(move || loop {
            if SIGNAL_RECEIVED.load(Ordering::SeqCst) {
                info!("termination signal received, initiating graceful shutdown");
                coordinator.trigger();
                return;
            }
            if coordinator.fired.load(Ordering::SeqCst) {
                // Shut down programmatically; nothing left to watch for.
                return;
            }
            thread::sleep(SIGNAL_POLL_INTERVAL);
        });
    }

    /// Run the shutdown pass. Only the first call does anything; it blocks
    /// until every service finished or the global timeout elapsed. Returns
    /// how many services completed within the budget.
    pub fn trigger(&self) -> usize {
        if self.fired.swap(true, Ordering::SeqCst) {
            return 0;
        }

        let services: Vec<Arc<dyn Shutdownable>> = {
            let registry = self.services.lock().unwrap_or_else(|e| e.into_inner());
            registry.clone()
        };
        if services.is_empty() {
            return 0;
        }
        info!(count = services.len(), "shutting down services");

        let (done_tx, done_rx) = unbounded::<()>();
        let mut names = Vec::with_capacity(services.len());
        for service in services {
            names.push(service.name().to_string());
            let done_tx = done_tx.clone();
            thread::spawn(move || {
                let name = service.name().to_string();
                info!(service = %name, "shutting down");
                match service.shutdown() {
                    Ok(()) => info!(service = %name, "shut down cleanly"),
                    Err(err) => error!(service = %name, "shutdown failed: {err:#}"),
                }
                let _ = done_tx.send(());
            });
        }
        drop(done_tx);

        let total = names.len();
        let deadline = Instant::now() + self.timeout;
        let mut completed = 0usize;
        while completed < total {
            let remaining = deadline.saturating_duration_since(Instant::now());
            match done_rx.recv_timeout(remaining) {
                Ok(_) => completed += 1,
                Err(RecvTimeoutError::Timeout) => {
                    warn!(
                        completed,
                        total,
                        timeout_secs = self.timeout.as_secs_f64(),
                        "shutdown timed out, abandoning remaining services"
                    );
                    return completed;
                }
                Err(RecvTimeoutError::Disconnected) => break,
            }
        }
        info!("all services shut down");
        completed
    }
}
