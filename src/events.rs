//! Subscriber registries for frame, error and finish notifications.

use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::RwLock;
use tracing::warn;

use crate::convert::VideoImage;
use crate::error::CaptureError;

/// Handle returned by a subscription, used to unsubscribe.
///
/// Ids are unique across all registries in the process.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(u64);

static NEXT_SUBSCRIPTION_ID: AtomicU64 = AtomicU64::new(1);

impl SubscriptionId {
    fn next() -> Self {
        Self(NEXT_SUBSCRIPTION_ID.fetch_add(1, Ordering::Relaxed))
    }
}

/// Why a capture run ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopReason {
    /// The owner signalled the session to stop.
    StoppedByUser,
    /// The worker hit an error and reported it on the error channel.
    SourceError,
}

/// Frame subscriber. The image is only borrowed for the duration of the call.
pub type FrameHandler = dyn Fn(&VideoImage) + Send + Sync;
/// Error subscriber.
pub type ErrorHandler = dyn Fn(&CaptureError) + Send + Sync;
/// Finish subscriber.
pub type FinishHandler = dyn Fn(StopReason) + Send + Sync;

/// Multicast registry of handlers of one kind.
pub struct Subscribers<H: ?Sized> {
    handlers: RwLock<Vec<(SubscriptionId, Arc<H>)>>,
}

impl<H: ?Sized> Default for Subscribers<H> {
    fn default() -> Self {
        Self {
            handlers: RwLock::new(Vec::new()),
        }
    }
}

impl<H: ?Sized> Subscribers<H> {
    /// Register a handler.
    pub fn subscribe(&self, handler: Arc<H>) -> SubscriptionId {
        let id = SubscriptionId::next();
        self.handlers.write().push((id, handler));
        id
    }

    /// Remove a handler. Returns `false` if it was not registered.
    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        let mut handlers = self.handlers.write();
        let before = handlers.len();
        handlers.retain(|(sub, _)| *sub != id);
        handlers.len() != before
    }

    /// Number of registered handlers.
    pub fn len(&self) -> usize {
        self.handlers.read().len()
    }

    /// Whether no handler is registered.
    pub fn is_empty(&self) -> bool {
        self.handlers.read().is_empty()
    }

    /// Call every handler registered at this moment.
    ///
    /// The registry lock is not held while handlers run, so a handler may
    /// subscribe or unsubscribe. A panicking handler is logged and skipped.
    pub fn emit<F>(&self, call: F)
    where
        F: Fn(&H),
    {
        let snapshot: Vec<Arc<H>> = self
            .handlers
            .read()
            .iter()
            .map(|(_, handler)| Arc::clone(handler))
            .collect();

        for handler in snapshot {
            if catch_unwind(AssertUnwindSafe(|| call(&handler))).is_err() {
                warn!("event subscriber panicked, continuing with remaining subscribers");
            }
        }
    }
}

/// All event channels of a session.
#[derive(Default)]
pub struct EventHub {
    /// New-frame subscribers.
    pub frames: Subscribers<FrameHandler>,
    /// Error subscribers.
    pub errors: Subscribers<ErrorHandler>,
    /// Run-finished subscribers.
    pub finished: Subscribers<FinishHandler>,
}

impl EventHub {
    /// Notify frame subscribers.
    pub fn emit_frame(&self, image: &VideoImage) {
        self.frames.emit(|handler| handler(image));
    }

    /// Notify error subscribers.
    pub fn emit_error(&self, error: &CaptureError) {
        self.errors.emit(|handler| handler(error));
    }

    /// Notify finish subscribers.
    pub fn emit_finished(&self, reason: StopReason) {
        self.finished.emit(|handler| handler(reason));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    #[test]
    fn test_emits_to_every_subscriber() {
        let hub = EventHub::default();
        let calls = Arc::new(AtomicUsize::new(0));

        for _ in 0..3 {
            let calls = Arc::clone(&calls);
            hub.finished.subscribe(Arc::new(move |reason: StopReason| {
                assert_eq!(reason, StopReason::StoppedByUser);
                calls.fetch_add(1, Ordering::SeqCst);
            }));
        }

        hub.emit_finished(StopReason::StoppedByUser);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[test]
    fn test_ids_are_unique_across_registries() {
        let hub = EventHub::default();
        let frame = hub.frames.subscribe(Arc::new(|_image: &VideoImage| {}));
        let error = hub.errors.subscribe(Arc::new(|_err: &CaptureError| {}));

        assert_ne!(frame, error);
        assert!(!hub.frames.unsubscribe(error));
        assert!(hub.errors.unsubscribe(error));
    }

    #[test]
    fn test_unsubscribe() {
        let hub = EventHub::default();
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&calls);
        let id = hub.errors.subscribe(Arc::new(move |_err: &CaptureError| {
            counter.fetch_add(1, Ordering::SeqCst);
        }));

        assert!(hub.errors.unsubscribe(id));
        assert!(!hub.errors.unsubscribe(id));
        assert!(hub.errors.is_empty());

        hub.emit_error(&CaptureError::BackendRunFailed {
            reason: "x".to_owned(),
        });
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[test]
    #[allow(clippy::panic)]
    fn test_panicking_subscriber_is_isolated() {
        let hub = EventHub::default();
        let calls = Arc::new(AtomicUsize::new(0));

        hub.finished
            .subscribe(Arc::new(|_reason: StopReason| panic!("subscriber failure")));
        let counter = Arc::clone(&calls);
        hub.finished.subscribe(Arc::new(move |_reason: StopReason| {
            counter.fetch_add(1, Ordering::SeqCst);
        }));

        hub.emit_finished(StopReason::SourceError);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_subscriber_may_unsubscribe_during_emit() {
        let hub = Arc::new(EventHub::default());
        let weak = Arc::downgrade(&hub);
        let id = Arc::new(parking_lot::Mutex::new(None));
        let own_id = Arc::clone(&id);

        let sub = hub.finished.subscribe(Arc::new(move |_reason: StopReason| {
            if let (Some(hub), Some(id)) = (weak.upgrade(), *own_id.lock()) {
                hub.finished.unsubscribe(id);
            }
        }));
        *id.lock() = Some(sub);

        hub.emit_finished(StopReason::StoppedByUser);
        assert_eq!(hub.finished.len(), 0);
    }
}
