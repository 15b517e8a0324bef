//! Error types for capture sessions and backend adapters.

use std::time::Duration;

use thiserror::Error;

/// Error type for capture session operations.
#[derive(Error, Debug)]
pub enum CaptureError {
    /// The session was started without a usable configuration.
    #[error("Invalid configuration: {reason}")]
    InvalidConfiguration {
        /// What is wrong with the configuration.
        reason: String,
    },

    /// The backend could not build the capture graph.
    #[error("Graph construction failed: {reason}")]
    GraphConstructionFailed {
        /// Backend failure description.
        reason: String,
    },

    /// The device identifier does not resolve to a live device.
    #[error("Failed to create video source for {device_id}: {reason}")]
    DeviceCreationFailed {
        /// Identifier of the device that failed to bind.
        device_id: String,
        /// Backend failure description.
        reason: String,
    },

    /// The device has no capture output compatible with the sample sink.
    #[error("Failed to render capture stream: {reason}")]
    StreamRenderFailed {
        /// Backend failure description.
        reason: String,
    },

    /// The pipeline refused to run, or its stream failed while running.
    #[error("Failed to run capture pipeline: {reason}")]
    BackendRunFailed {
        /// Backend failure description.
        reason: String,
    },

    /// A raw buffer could not be turned into an image.
    #[error("Frame conversion failed: {reason}")]
    CallbackConversionFailure {
        /// Why the buffer was rejected.
        reason: String,
    },

    /// The worker did not exit within the stop timeout.
    #[error("Capture worker did not stop within {timeout:?}")]
    ForcedStopTimeout {
        /// The timeout that elapsed.
        timeout: Duration,
    },

    /// A captured image does not show the expected test pattern.
    #[error("Pattern mismatch: {reason}")]
    PatternMismatch {
        /// Where and how the image differs.
        reason: String,
    },

    /// The backend does not provide the requested operation.
    #[error("Unsupported operation: {operation}")]
    Unsupported {
        /// Name of the operation.
        operation: String,
    },

    /// The capture worker thread could not be spawned.
    #[error("Failed to spawn capture worker: {0}")]
    WorkerSpawn(#[from] std::io::Error),
}

/// Result type for capture session operations.
pub type Result<T> = std::result::Result<T, CaptureError>;

/// Failure reported by a [`CaptureBackend`](crate::traits::CaptureBackend) step.
///
/// The session builder maps it onto the [`CaptureError`] variant of the stage
/// that failed.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("{message}")]
pub struct BackendError {
    /// Human-readable failure description.
    pub message: String,
}

impl BackendError {
    /// Create a backend error from any message.
    pub fn new<S: Into<String>>(message: S) -> Self {
        Self {
            message: message.into(),
        }
    }
}

impl From<std::io::Error> for BackendError {
    fn from(err: std::io::Error) -> Self {
        Self::new(err.to_string())
    }
}
