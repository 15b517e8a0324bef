//! Background thread driving one capture run.

use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use tracing::{debug, warn};

use crate::builder::Pipeline;
use crate::config::CaptureConfig;
use crate::error::{CaptureError, Result};
use crate::events::StopReason;
use crate::signal::Signal;
use crate::sink::{FrameSink, Shared};
use crate::traits::CaptureBackend;

/// Name given to capture worker threads.
pub const WORKER_THREAD_NAME: &str = "capture-worker";

/// Handle to a running capture worker.
pub struct Worker {
    thread: JoinHandle<()>,
    stop: Arc<Signal>,
    exited: Arc<Signal>,
}

/// Sets the exit signal when the worker thread leaves its body, panics included.
struct ExitGuard(Arc<Signal>);

impl Drop for ExitGuard {
    fn drop(&mut self) {
        self.0.set();
    }
}

impl Worker {
    /// Spawn a worker for one capture run.
    ///
    /// # Errors
    ///
    /// Returns [`CaptureError::WorkerSpawn`] if the OS refuses the thread.
    pub fn spawn(
        backend: Arc<dyn CaptureBackend>,
        config: CaptureConfig,
        shared: Arc<Shared>,
    ) -> Result<Self> {
        let stop = Arc::new(Signal::new());
        let exited = Arc::new(Signal::new());

        let thread = {
            let stop = Arc::clone(&stop);
            let exited = Arc::clone(&exited);
            thread::Builder::new()
                .name(WORKER_THREAD_NAME.to_owned())
                .spawn(move || {
                    let _exit = ExitGuard(exited);
                    run(backend.as_ref(), &config, &shared, &stop);
                })?
        };

        Ok(Self {
            thread,
            stop,
            exited,
        })
    }

    /// Ask the worker to stop. Does not block.
    pub fn signal_stop(&self) {
        self.stop.set();
    }

    /// Whether a stop has been requested.
    pub fn stop_requested(&self) -> bool {
        self.stop.is_set()
    }

    /// Whether the worker thread has exited.
    pub fn is_finished(&self) -> bool {
        self.thread.is_finished()
    }

    /// Wait up to `timeout` for the worker body to return.
    pub fn wait_exit(&self, timeout: Duration) -> bool {
        self.exited.wait_timeout(timeout)
    }

    /// Block until the worker thread has exited.
    pub fn join(self) {
        if self.thread.join().is_err() {
            warn!("capture worker panicked");
        }
    }
}

fn run(
    backend: &dyn CaptureBackend,
    config: &CaptureConfig,
    shared: &Arc<Shared>,
    stop: &Arc<Signal>,
) {
    let sink = Arc::new(FrameSink::new(Arc::clone(shared), Arc::clone(stop)));

    let reason = match capture(backend, config, &sink, stop) {
        Ok(()) => StopReason::StoppedByUser,
        Err(err) => {
            warn!(%err, "capture worker failed");
            shared.events.emit_error(&err);
            StopReason::SourceError
        }
    };

    debug!(?reason, "capture worker exiting");
    shared.events.emit_finished(reason);
}

/// Build the pipeline, wait for the stop signal or a stream failure, stop.
/// The pipeline is torn down before this returns, on success and on error.
fn capture(
    backend: &dyn CaptureBackend,
    config: &CaptureConfig,
    sink: &Arc<FrameSink>,
    stop: &Signal,
) -> Result<()> {
    let mut pipeline = Pipeline::build(backend, config, sink)?;

    let poll = config.poll_interval();
    while !stop.wait_timeout(poll) {
        if sink.has_failed() {
            break;
        }
    }

    debug!("stopping pipeline");
    let stopped = pipeline.stop_when_ready();
    if let Some(failure) = sink.take_failure() {
        return Err(CaptureError::BackendRunFailed {
            reason: format!("stream failed: {failure}"),
        });
    }
    stopped
}
