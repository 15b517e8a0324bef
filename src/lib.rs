//! Capture-Session: background video capture sessions over a pluggable
//! capture backend.
//!
//! A [`CaptureSession`] builds a capture pipeline on its own worker thread,
//! turns every raw sample into a top-down [`VideoImage`] and hands it to
//! frame subscribers. Backends implement [`CaptureBackend`]; [`V4l2Backend`]
//! drives real V4L2 devices and a mock backend drives the unit tests.

pub mod builder;
pub mod config;
pub mod convert;
pub mod device;
pub mod error;
pub mod events;
pub mod session;
pub mod signal;
pub mod sink;
pub mod traits;
pub mod validation;
pub mod worker;

#[cfg(test)]
pub mod mock;

pub use config::{CaptureConfig, FrameSize};
pub use convert::VideoImage;
pub use device::{DeviceInfo, V4l2Backend};
pub use error::{BackendError, CaptureError, Result};
pub use events::{StopReason, SubscriptionId};
pub use session::{CaptureSession, SessionState};
pub use traits::{
    CaptureBackend, FourCC, Resource, RowOrder, SampleSink, SinkConfig, StreamFormat,
};
