//! Session configuration.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{CaptureError, Result};

/// Floor for the stop-signal poll interval.
const MIN_POLL_INTERVAL_MS: u64 = 1;

/// Requested frame size; `(0, 0)` leaves the device default in place.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct FrameSize {
    /// Width in pixels.
    pub width: u32,
    /// Height in pixels.
    pub height: u32,
}

impl FrameSize {
    /// Create a frame size.
    #[must_use]
    pub const fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }

    /// Whether both dimensions were given.
    pub const fn is_set(self) -> bool {
        self.width != 0 && self.height != 0
    }
}

/// Configuration captured by a session at start.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CaptureConfig {
    /// Opaque identifier of the capture device.
    #[serde(alias = "source")]
    pub device_id: Option<String>,
    /// Desired frame size, advisory.
    #[serde(alias = "desiredFrameSize")]
    pub desired_frame_size: FrameSize,
    /// Desired frame rate in frames per second, 0 for the device default.
    #[serde(alias = "desiredFrameRate")]
    pub desired_frame_rate: u32,
    /// How often the worker checks its stop signal. Values below 1 ms are
    /// raised to 1 ms.
    pub poll_interval_ms: u64,
    /// How long [`stop`](crate::CaptureSession::stop) waits for the worker.
    pub stop_timeout_ms: u64,
    /// Number of driver buffers requested by streaming backends.
    pub buffer_count: u32,
}

impl Default for CaptureConfig {
    fn default() -> Self {
        Self {
            device_id: None,
            desired_frame_size: FrameSize::default(),
            desired_frame_rate: 0,
            poll_interval_ms: 100,
            stop_timeout_ms: 5_000,
            buffer_count: 4,
        }
    }
}

impl CaptureConfig {
    /// Configuration for a device with default settings.
    pub fn for_device<S: Into<String>>(device_id: S) -> Self {
        Self {
            device_id: Some(device_id.into()),
            ..Self::default()
        }
    }

    /// Parse a configuration from JSON.
    ///
    /// # Errors
    ///
    /// Returns [`CaptureError::InvalidConfiguration`] if the text is not
    /// valid JSON or a field has the wrong type.
    pub fn from_json(json: &str) -> Result<Self> {
        serde_json::from_str(json).map_err(|err| CaptureError::InvalidConfiguration {
            reason: err.to_string(),
        })
    }

    /// Device identifier, rejecting a missing or empty one.
    ///
    /// # Errors
    ///
    /// Returns [`CaptureError::InvalidConfiguration`] if no identifier is set
    /// or it is the empty string.
    pub fn require_device(&self) -> Result<&str> {
        match self.device_id.as_deref() {
            Some(id) if !id.is_empty() => Ok(id),
            _ => Err(CaptureError::InvalidConfiguration {
                reason: "video source is not specified".to_owned(),
            }),
        }
    }

    /// Whether any desired stream setting needs to be pushed to the device.
    pub const fn wants_format_change(&self) -> bool {
        self.desired_frame_size.is_set() || self.desired_frame_rate != 0
    }

    /// Stop-signal poll interval, never below 1 ms.
    pub const fn poll_interval(&self) -> Duration {
        if self.poll_interval_ms < MIN_POLL_INTERVAL_MS {
            return Duration::from_millis(MIN_POLL_INTERVAL_MS);
        }
        Duration::from_millis(self.poll_interval_ms)
    }

    /// Bounded wait used by a forced stop.
    pub const fn stop_timeout(&self) -> Duration {
        Duration::from_millis(self.stop_timeout_ms)
    }
}
