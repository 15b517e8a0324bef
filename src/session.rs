//! Capture session controller.
//!
//! A [`CaptureSession`] owns at most one capture worker at a time. The owner
//! drives it through `start` / `signal_stop` / `wait_for_stop` / `stop`;
//! frames, errors and run completion are reported to subscribers.

use std::any::Any;
use std::sync::Arc;

use tracing::{debug, info, warn};

use crate::config::{CaptureConfig, FrameSize};
use crate::convert::VideoImage;
use crate::error::{CaptureError, Result};
use crate::events::{StopReason, SubscriptionId};
use crate::sink::Shared;
use crate::traits::{CaptureBackend, StreamFormat};
use crate::worker::Worker;

/// Observable state of a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// No worker is running.
    Idle,
    /// A worker is capturing.
    Running,
    /// A stop was signalled and the worker has not exited yet.
    StopRequested,
}

/// A single-device capture session.
pub struct CaptureSession {
    backend: Arc<dyn CaptureBackend>,
    config: CaptureConfig,
    shared: Arc<Shared>,
    worker: Option<Worker>,
    user_data: Option<Box<dyn Any + Send + Sync>>,
}

impl CaptureSession {
    /// Create an idle session on top of a backend.
    pub fn new(backend: Arc<dyn CaptureBackend>) -> Self {
        Self::with_config(backend, CaptureConfig::default())
    }

    /// Create an idle session with an initial configuration.
    pub fn with_config(backend: Arc<dyn CaptureBackend>, config: CaptureConfig) -> Self {
        Self {
            backend,
            config,
            shared: Arc::new(Shared::default()),
            worker: None,
            user_data: None,
        }
    }

    /// Current configuration. Changes take effect on the next `start`.
    pub const fn config(&self) -> &CaptureConfig {
        &self.config
    }

    /// Device identifier, if set.
    pub fn source(&self) -> Option<&str> {
        self.config.device_id.as_deref()
    }

    /// Set the device identifier.
    ///
    /// # Errors
    ///
    /// Returns [`CaptureError::InvalidConfiguration`] while capture is running.
    pub fn set_source<S: Into<String>>(&mut self, device_id: S) -> Result<()> {
        if self.is_running() {
            return Err(CaptureError::InvalidConfiguration {
                reason: "cannot change the video source while capture is running".to_owned(),
            });
        }
        self.config.device_id = Some(device_id.into());
        Ok(())
    }

    /// Desired frame size, `(0, 0)` for the device default.
    pub fn set_desired_frame_size(&mut self, size: FrameSize) {
        self.config.desired_frame_size = size;
    }

    /// Desired frame rate, 0 for the device default.
    pub fn set_desired_frame_rate(&mut self, fps: u32) {
        self.config.desired_frame_rate = fps;
    }

    /// Start capturing in the background.
    ///
    /// Does nothing if a worker is already running. Backend failures are not
    /// returned here; they arrive on the error channel.
    ///
    /// # Errors
    ///
    /// Returns [`CaptureError::InvalidConfiguration`] if no device is set, or
    /// [`CaptureError::WorkerSpawn`] if the worker thread cannot be created.
    pub fn start(&mut self) -> Result<()> {
        if self.is_running() {
            debug!("start ignored, capture already running");
            return Ok(());
        }

        let device_id = self.config.require_device()?;
        info!(device = device_id, "starting capture");

        self.shared.counters.reset();
        *self.shared.negotiated.write() = None;

        let worker = Worker::spawn(
            Arc::clone(&self.backend),
            self.config.clone(),
            Arc::clone(&self.shared),
        )?;
        self.worker = Some(worker);
        Ok(())
    }

    /// Ask the worker to stop without waiting for it.
    pub fn signal_stop(&self) {
        if let Some(worker) = &self.worker {
            debug!("stop signalled");
            worker.signal_stop();
        }
    }

    /// Block until the worker has exited. Without a prior `signal_stop` this
    /// waits for the worker to finish on its own.
    pub fn wait_for_stop(&mut self) {
        if let Some(worker) = self.worker.take() {
            worker.join();
            debug!("capture worker joined");
        }
    }

    /// Signal the worker and wait up to the configured stop timeout.
    ///
    /// On timeout the worker stays attached to the session and
    /// [`CaptureError::ForcedStopTimeout`] is returned; a later
    /// `wait_for_stop` still joins it.
    ///
    /// # Errors
    ///
    /// Returns [`CaptureError::ForcedStopTimeout`] if the worker does not exit
    /// within `stop_timeout_ms`.
    pub fn stop(&mut self) -> Result<()> {
        let Some(worker) = &self.worker else {
            return Ok(());
        };

        worker.signal_stop();
        let timeout = self.config.stop_timeout();
        if !worker.wait_exit(timeout) {
            warn!(?timeout, "capture worker did not stop in time");
            return Err(CaptureError::ForcedStopTimeout { timeout });
        }

        self.wait_for_stop();
        Ok(())
    }

    /// Whether the worker is alive. A worker that has exited on its own is
    /// joined here.
    pub fn is_running(&mut self) -> bool {
        match &self.worker {
            Some(worker) if worker.is_finished() => {
                self.wait_for_stop();
                false
            }
            Some(_) => true,
            None => false,
        }
    }

    /// Current state, without joining a finished worker.
    pub fn state(&self) -> SessionState {
        match &self.worker {
            None => SessionState::Idle,
            Some(worker) if worker.is_finished() => SessionState::Idle,
            Some(worker) if worker.stop_requested() => SessionState::StopRequested,
            Some(_) => SessionState::Running,
        }
    }

    /// Frames received since the last call.
    pub fn read_frames_received(&self) -> u64 {
        self.shared.counters.take_frames()
    }

    /// Bytes received since the last call.
    pub fn read_bytes_received(&self) -> u64 {
        self.shared.counters.take_bytes()
    }

    /// Format negotiated by the current or last run.
    pub fn negotiated_format(&self) -> Option<StreamFormat> {
        *self.shared.negotiated.read()
    }

    /// Owner data attached to the session.
    pub fn user_data(&self) -> Option<&(dyn Any + Send + Sync)> {
        self.user_data.as_deref()
    }

    /// Owner data downcast to `T`.
    pub fn user_data_as<T: Any>(&self) -> Option<&T> {
        self.user_data.as_deref()?.downcast_ref::<T>()
    }

    /// Attach owner data, replacing any previous value.
    pub fn set_user_data<T: Any + Send + Sync>(&mut self, data: T) {
        self.user_data = Some(Box::new(data));
    }

    /// Detach and return owner data.
    pub fn take_user_data(&mut self) -> Option<Box<dyn Any + Send + Sync>> {
        self.user_data.take()
    }

    /// Subscribe to new frames. The image is dropped after all subscribers
    /// have been called; clone it to keep it.
    pub fn on_frame<F>(&self, handler: F) -> SubscriptionId
    where
        F: Fn(&VideoImage) + Send + Sync + 'static,
    {
        self.shared.events.frames.subscribe(Arc::new(handler))
    }

    /// Subscribe to worker errors.
    pub fn on_error<F>(&self, handler: F) -> SubscriptionId
    where
        F: Fn(&CaptureError) + Send + Sync + 'static,
    {
        self.shared.events.errors.subscribe(Arc::new(handler))
    }

    /// Subscribe to run completion.
    pub fn on_finished<F>(&self, handler: F) -> SubscriptionId
    where
        F: Fn(StopReason) + Send + Sync + 'static,
    {
        self.shared.events.finished.subscribe(Arc::new(handler))
    }

    /// Remove a subscription of any kind.
    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        let events = &self.shared.events;
        events.frames.unsubscribe(id)
            || events.errors.unsubscribe(id)
            || events.finished.unsubscribe(id)
    }

    /// Open the device's configuration surface through the backend.
    ///
    /// # Errors
    ///
    /// Returns [`CaptureError::InvalidConfiguration`] if no device is set and
    /// [`CaptureError::Unsupported`] if the backend has no property page.
    pub fn display_property_page(&self) -> Result<()> {
        let device_id = self.config.require_device()?;
        self.backend
            .display_property_page(device_id)
            .map_err(|err| CaptureError::Unsupported {
                operation: format!("property page: {err}"),
            })
    }
}

impl Drop for CaptureSession {
    fn drop(&mut self) {
        if self.worker.is_none() {
            return;
        }
        if let Err(err) = self.stop() {
            warn!(%err, "dropping session with a running capture worker");
        }
    }
}
