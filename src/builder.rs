//! Pipeline construction against a [`CaptureBackend`].
//!
//! ```text
//! graph builder + filter graph ── bind
//!   │  source filter (device id)
//!   │  sample sink (BGR3, unbuffered, continuous, callback)
//!   ▼
//! add filters → [desired format] → render → connected format → run
//! ```
//!
//! Every resource acquired on the way is released in reverse order when the
//! [`Pipeline`] is dropped, whether or not the build got to the end.

use std::sync::Arc;

use tracing::{debug, info};

use crate::config::CaptureConfig;
use crate::error::{CaptureError, Result};
use crate::sink::FrameSink;
use crate::traits::{
    frame_interval, CaptureBackend, Resource, SampleSink, SinkConfig, StreamFormat,
};

/// A capture pipeline owned by one worker run.
pub struct Pipeline<'a> {
    backend: &'a dyn CaptureBackend,
    acquired: Vec<Resource>,
    format: Option<StreamFormat>,
    running: bool,
}

impl<'a> Pipeline<'a> {
    const fn new(backend: &'a dyn CaptureBackend) -> Self {
        Self {
            backend,
            acquired: Vec::new(),
            format: None,
            running: false,
        }
    }

    /// Build and run a pipeline for the configured device.
    ///
    /// Resources acquired before a failing step are released in reverse order
    /// when the partial pipeline drops.
    ///
    /// # Errors
    ///
    /// Returns the [`CaptureError`] of the failing stage:
    /// `GraphConstructionFailed`, `DeviceCreationFailed`, `StreamRenderFailed`
    /// or `BackendRunFailed`. A missing device gives `InvalidConfiguration`.
    pub fn build(
        backend: &'a dyn CaptureBackend,
        config: &CaptureConfig,
        sink: &Arc<FrameSink>,
    ) -> Result<Self> {
        let device_id = config.require_device()?;
        let mut pipeline = Self::new(backend);

        backend.create_graph_builder().map_err(construction)?;
        pipeline.acquired.push(Resource::GraphBuilder);
        backend.create_filter_graph().map_err(construction)?;
        pipeline.acquired.push(Resource::FilterGraph);
        backend.bind_graph().map_err(construction)?;

        backend
            .create_source(device_id)
            .map_err(|err| CaptureError::DeviceCreationFailed {
                device_id: device_id.to_owned(),
                reason: err.message,
            })?;
        pipeline.acquired.push(Resource::SourceFilter);

        let callback: Arc<dyn SampleSink> = Arc::<FrameSink>::clone(sink);
        backend
            .create_sample_sink(&SinkConfig::default(), callback)
            .map_err(construction)?;
        pipeline.acquired.push(Resource::SampleSink);

        backend.add_filters().map_err(construction)?;

        if config.wants_format_change() {
            pipeline.apply_desired_format(config);
        }

        backend
            .render_stream()
            .map_err(|err| CaptureError::StreamRenderFailed {
                reason: err.message,
            })?;

        let format = backend
            .connected_format()
            .map_err(|err| CaptureError::StreamRenderFailed {
                reason: format!("no connected media type: {err}"),
            })?;
        sink.set_format(format);
        pipeline.format = Some(format);

        backend
            .run()
            .map_err(|err| CaptureError::BackendRunFailed {
                reason: err.message,
            })?;
        pipeline.running = true;

        info!(
            device = device_id,
            width = format.width,
            height = format.height,
            fps = format.frame_rate(),
            "capture pipeline running"
        );
        Ok(pipeline)
    }

    /// Push the desired size and rate to the source. The device may ignore or
    /// clamp them; failures here are not fatal.
    fn apply_desired_format(&self, config: &CaptureConfig) {
        let mut format = match self.backend.stream_format() {
            Ok(Some(format)) => format,
            Ok(None) => {
                debug!("source exposes no stream configuration, using device defaults");
                return;
            }
            Err(err) => {
                debug!(%err, "failed to read stream format, using device defaults");
                return;
            }
        };

        let size = config.desired_frame_size;
        if size.is_set() {
            format.width = size.width;
            format.height = size.height;
        }
        if config.desired_frame_rate != 0 {
            format.avg_time_per_frame = frame_interval(config.desired_frame_rate);
        }

        if let Err(err) = self.backend.set_stream_format(&format) {
            debug!(%err, "device rejected desired stream format");
        }
    }

    /// Format the sample sink is connected with.
    pub const fn format(&self) -> Option<StreamFormat> {
        self.format
    }

    /// Stop the pipeline once the in-flight sample has been delivered.
    pub fn stop_when_ready(&mut self) -> Result<()> {
        if !self.running {
            return Ok(());
        }
        self.running = false;
        self.backend
            .stop_when_ready()
            .map_err(|err| CaptureError::BackendRunFailed {
                reason: format!("stop failed: {err}"),
            })
    }
}

impl Drop for Pipeline<'_> {
    fn drop(&mut self) {
        if self.running {
            if let Err(err) = self.stop_when_ready() {
                debug!(%err, "stop during teardown failed");
            }
        }
        while let Some(resource) = self.acquired.pop() {
            debug!(?resource, "releasing");
            self.backend.release(resource);
        }
    }
}

#[allow(clippy::needless_pass_by_value)]
fn construction(err: crate::error::BackendError) -> CaptureError {
    CaptureError::GraphConstructionFailed {
        reason: err.message,
    }
}
