//! Buffer callback registered with the backend's sample sink.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::{Mutex, RwLock};
use tracing::{debug, trace, warn};

use crate::convert::convert;
use crate::error::BackendError;
use crate::events::EventHub;
use crate::signal::Signal;
use crate::traits::{SampleSink, StreamFormat};

/// Frame and byte counters with read-and-clear semantics.
#[derive(Debug, Default)]
pub struct FrameCounters {
    frames: AtomicU64,
    bytes: AtomicU64,
}

impl FrameCounters {
    /// Count one received buffer of `len` bytes.
    pub fn record(&self, len: usize) {
        self.frames.fetch_add(1, Ordering::AcqRel);
        self.bytes.fetch_add(len as u64, Ordering::AcqRel);
    }

    /// Frames received since the previous call.
    pub fn take_frames(&self) -> u64 {
        self.frames.swap(0, Ordering::AcqRel)
    }

    /// Bytes received since the previous call.
    pub fn take_bytes(&self) -> u64 {
        self.bytes.swap(0, Ordering::AcqRel)
    }

    /// Zero both counters.
    pub fn reset(&self) {
        self.frames.store(0, Ordering::Release);
        self.bytes.store(0, Ordering::Release);
    }
}

/// State a session shares with its worker and the backend's delivery thread.
#[derive(Default)]
pub struct Shared {
    /// Event subscribers.
    pub events: EventHub,
    /// Received frame/byte counters.
    pub counters: FrameCounters,
    /// Format negotiated by the current or last run.
    pub negotiated: RwLock<Option<StreamFormat>>,
}

/// Sample sink turning raw buffers into frame events for one capture run.
pub struct FrameSink {
    shared: Arc<Shared>,
    stop: Arc<Signal>,
    failure: Mutex<Option<BackendError>>,
}

impl FrameSink {
    /// Create a sink bound to a run's stop signal.
    pub const fn new(shared: Arc<Shared>, stop: Arc<Signal>) -> Self {
        Self {
            shared,
            stop,
            failure: Mutex::new(None),
        }
    }

    /// Record the negotiated format used to interpret buffers.
    pub fn set_format(&self, format: StreamFormat) {
        *self.shared.negotiated.write() = Some(format);
    }

    /// Whether the backend reported a stream failure.
    pub fn has_failed(&self) -> bool {
        self.failure.lock().is_some()
    }

    /// Take the first stream failure the backend reported, if any.
    pub fn take_failure(&self) -> Option<BackendError> {
        self.failure.lock().take()
    }
}

impl SampleSink for FrameSink {
    fn on_buffer(&self, sample_time: f64, buffer: &[u8]) {
        self.shared.counters.record(buffer.len());

        if self.stop.is_set() {
            trace!(sample_time, "stop requested, frame counted but not delivered");
            return;
        }

        let Some(format) = *self.shared.negotiated.read() else {
            trace!(sample_time, "buffer arrived before format negotiation");
            return;
        };

        match convert(buffer, &format) {
            Ok(image) => self.shared.events.emit_frame(&image),
            Err(err) => warn!(%err, sample_time, "dropping frame"),
        }
    }

    fn on_error(&self, error: BackendError) {
        let mut failure = self.failure.lock();
        if failure.is_some() {
            debug!(%error, "stream already failed");
            return;
        }
        debug!(%error, "stream failure recorded");
        *failure = Some(error);
    }
}
