//! Core traits and types for the capture backend abstraction.

use std::sync::Arc;

use crate::error::BackendError;

/// Backend time unit per second (100 ns ticks).
pub const TICKS_PER_SECOND: u64 = 10_000_000;

/// Pixel format representation (e.g., BGR3, RGB3, YUYV).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FourCC(pub [u8; 4]);

impl FourCC {
    /// Create a new `FourCC` from a 4-byte array.
    #[must_use]
    pub const fn new(code: &[u8; 4]) -> Self {
        Self(*code)
    }

    /// BGR3 pixel format (24-bit, B,G,R byte order). This is the layout of
    /// the "RGB24" media subtype delivered by graph-style capture frameworks.
    pub const BGR3: Self = Self::new(b"BGR3");
    /// RGB3 pixel format (24-bit, R,G,B byte order).
    pub const RGB3: Self = Self::new(b"RGB3");
    /// YUYV pixel format (4:2:2 packed).
    pub const YUYV: Self = Self::new(b"YUYV");

    /// Bytes per pixel for packed 24-bit formats, `None` for anything else.
    pub const fn bytes_per_pixel(self) -> Option<usize> {
        match self.0 {
            [b'B', b'G', b'R', b'3'] | [b'R', b'G', b'B', b'3'] => Some(3),
            _ => None,
        }
    }
}

impl std::fmt::Display for FourCC {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", String::from_utf8_lossy(&self.0))
    }
}

impl From<v4l::FourCC> for FourCC {
    fn from(fourcc: v4l::FourCC) -> Self {
        Self(fourcc.repr)
    }
}

impl From<FourCC> for v4l::FourCC {
    fn from(fourcc: FourCC) -> Self {
        Self::new(&fourcc.0)
    }
}

/// Order in which the backend lays out rows in a sample buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RowOrder {
    /// First row in memory is the bottom row of the picture (DIB layout).
    #[default]
    BottomUp,
    /// First row in memory is the top row of the picture.
    TopDown,
}

/// Stream format as reported or accepted by the backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StreamFormat {
    /// Frame width in pixels.
    pub width: u32,
    /// Frame height in pixels.
    pub height: u32,
    /// Bytes per row in delivered buffers.
    pub stride: usize,
    /// Pixel format.
    pub fourcc: FourCC,
    /// Average time per frame in 100 ns ticks, 0 when unknown.
    pub avg_time_per_frame: u64,
    /// Row layout of delivered buffers.
    pub row_order: RowOrder,
}

impl StreamFormat {
    /// Bottom-up 24-bit format with DWORD-aligned rows, as delivered by a
    /// graph-style sample grabber.
    #[must_use]
    pub const fn bgr24(width: u32, height: u32) -> Self {
        Self {
            width,
            height,
            stride: dib_stride(width),
            fourcc: FourCC::BGR3,
            avg_time_per_frame: 0,
            row_order: RowOrder::BottomUp,
        }
    }

    /// Size in bytes of one frame buffer.
    pub const fn frame_len(&self) -> usize {
        self.stride * self.height as usize
    }

    /// Frames per second derived from the average frame interval.
    #[allow(clippy::cast_possible_truncation)]
    pub const fn frame_rate(&self) -> Option<u32> {
        if self.avg_time_per_frame == 0 {
            return None;
        }
        Some((TICKS_PER_SECOND / self.avg_time_per_frame) as u32)
    }
}

/// Row size of a 24-bit DIB, rounded up to a 4-byte boundary.
pub const fn dib_stride(width: u32) -> usize {
    (width as usize * 3 + 3) & !3
}

/// Average frame interval in 100 ns ticks for a frame rate.
pub const fn frame_interval(fps: u32) -> u64 {
    if fps == 0 {
        return 0;
    }
    TICKS_PER_SECOND / fps as u64
}

/// Configuration of the sample-sink filter.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SinkConfig {
    /// Uncompressed subtype the sink accepts.
    pub subtype: FourCC,
    /// Whether the sink keeps a copy of each sample.
    pub buffer_samples: bool,
    /// Whether the sink stops the graph after one sample.
    pub one_shot: bool,
}

impl Default for SinkConfig {
    fn default() -> Self {
        Self {
            subtype: FourCC::BGR3,
            buffer_samples: false,
            one_shot: false,
        }
    }
}

/// Backend objects acquired while building a pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Resource {
    /// Capture graph builder helper.
    GraphBuilder,
    /// Filter graph the filters are added to.
    FilterGraph,
    /// Source filter bound to the capture device.
    SourceFilter,
    /// Sample sink receiving raw buffers.
    SampleSink,
}

/// Receiver of raw sample buffers.
///
/// Called by the backend on its own delivery thread, once per sample, in
/// delivery order.
pub trait SampleSink: Send + Sync {
    /// Handle one raw buffer. `sample_time` is the stream time in seconds.
    fn on_buffer(&self, sample_time: f64, buffer: &[u8]);

    /// The stream failed after [`CaptureBackend::run`] returned. No further
    /// buffers follow.
    fn on_error(&self, error: BackendError);
}

/// Result type for backend steps.
pub type BackendResult<T> = std::result::Result<T, BackendError>;

/// Abstraction over a graph-style capture framework.
///
/// Every `create_*` call that succeeds acquires the matching [`Resource`],
/// which the caller hands back through [`release`](Self::release) exactly
/// once.
pub trait CaptureBackend: Send + Sync {
    /// Create the capture graph builder.
    fn create_graph_builder(&self) -> BackendResult<()>;

    /// Create the filter graph.
    fn create_filter_graph(&self) -> BackendResult<()>;

    /// Attach the graph builder to the filter graph.
    fn bind_graph(&self) -> BackendResult<()>;

    /// Create the source filter for a device identifier.
    fn create_source(&self, device_id: &str) -> BackendResult<()>;

    /// Create the sample sink and register its buffer callback.
    fn create_sample_sink(&self, config: &SinkConfig, sink: Arc<dyn SampleSink>)
        -> BackendResult<()>;

    /// Add the source and sink filters to the graph.
    fn add_filters(&self) -> BackendResult<()>;

    /// Current stream format of the source, `None` if the device exposes no
    /// stream configuration.
    fn stream_format(&self) -> BackendResult<Option<StreamFormat>>;

    /// Push a modified stream format back to the source.
    fn set_stream_format(&self, format: &StreamFormat) -> BackendResult<()>;

    /// Connect the source's capture output to the sample sink.
    fn render_stream(&self) -> BackendResult<()>;

    /// Media type the sample sink ended up connected with.
    fn connected_format(&self) -> BackendResult<StreamFormat>;

    /// Start the pipeline.
    fn run(&self) -> BackendResult<()>;

    /// Stop the pipeline after the in-flight sample has been delivered.
    fn stop_when_ready(&self) -> BackendResult<()>;

    /// Release a previously acquired resource.
    fn release(&self, resource: Resource);

    /// Open the device's configuration surface.
    fn display_property_page(&self, device_id: &str) -> BackendResult<()> {
        Err(BackendError::new(format!(
            "no property page available for {device_id}"
        )))
    }
}
