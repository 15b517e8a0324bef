//! Mock backend implementation for testing without hardware.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use parking_lot::Mutex;

use crate::error::BackendError;
use crate::traits::{
    BackendResult, CaptureBackend, Resource, RowOrder, SampleSink, SinkConfig, StreamFormat,
};
use crate::validation::COLOR_BARS;

/// Backend steps the mock records and can be told to fail.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Step {
    /// `create_graph_builder`
    CreateGraphBuilder,
    /// `create_filter_graph`
    CreateFilterGraph,
    /// `bind_graph`
    BindGraph,
    /// `create_source`
    CreateSource,
    /// `create_sample_sink`
    CreateSampleSink,
    /// `add_filters`
    AddFilters,
    /// `stream_format`
    StreamFormat,
    /// `set_stream_format`
    SetStreamFormat,
    /// `render_stream`
    RenderStream,
    /// `connected_format`
    ConnectedFormat,
    /// `run`
    Run,
    /// `stop_when_ready`
    StopWhenReady,
}

/// Test pattern types for mock frame generation.
#[derive(Debug, Clone, Copy)]
pub enum TestPattern {
    /// 100% color bars, eight vertical stripes.
    ColorBars,
    /// Horizontal gradient from dark to light.
    Gradient,
    /// Rows numbered from the top of the picture, useful to check row order.
    RowIndex,
    /// Solid color with specified R, G, B values.
    Solid(u8, u8, u8),
    /// Solid gray whose level is the buffer's index in the run, modulo 256.
    Sequence,
}

#[derive(Default)]
struct MockState {
    calls: Vec<Step>,
    released: Vec<Resource>,
    sink: Option<Arc<dyn SampleSink>>,
    pushed_format: Option<StreamFormat>,
    pending_format: Option<StreamFormat>,
    negotiated: Option<StreamFormat>,
    delivery: Option<JoinHandle<()>>,
    halt: Arc<AtomicBool>,
    property_pages: Vec<String>,
}

/// Mock backend delivering generated frames from its own thread.
pub struct MockBackend {
    failure: Option<Step>,
    device_format: Option<StreamFormat>,
    frames: usize,
    frame_interval: Duration,
    fail_after: Option<usize>,
    stop_latency: Duration,
    pattern: TestPattern,
    state: Mutex<MockState>,
}

impl Default for MockBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl MockBackend {
    /// Create a mock with a 640x480 device that delivers no frames.
    #[must_use]
    pub fn new() -> Self {
        Self {
            failure: None,
            device_format: Some(StreamFormat::bgr24(640, 480)),
            frames: 0,
            frame_interval: Duration::ZERO,
            fail_after: None,
            stop_latency: Duration::ZERO,
            pattern: TestPattern::ColorBars,
            state: Mutex::new(MockState::default()),
        }
    }

    /// Fail the given step.
    #[must_use]
    pub fn with_failure(mut self, step: Step) -> Self {
        self.failure = Some(step);
        self
    }

    /// Set the device's current format; `None` means no stream configuration.
    #[must_use]
    pub fn with_device_format(mut self, format: Option<StreamFormat>) -> Self {
        self.device_format = format;
        self
    }

    /// Deliver `count` buffers once running.
    #[must_use]
    pub fn with_frames(mut self, count: usize) -> Self {
        self.frames = count;
        self
    }

    /// Pause between delivered buffers.
    #[must_use]
    pub fn with_frame_interval(mut self, interval: Duration) -> Self {
        self.frame_interval = interval;
        self
    }

    /// Report a stream failure to the sink after delivering `count` buffers.
    #[must_use]
    pub fn with_stream_failure_after(mut self, count: usize) -> Self {
        self.fail_after = Some(count);
        self
    }

    /// Time `stop_when_ready` takes to return.
    #[must_use]
    pub fn with_stop_latency(mut self, latency: Duration) -> Self {
        self.stop_latency = latency;
        self
    }

    /// Pattern of generated frames.
    #[must_use]
    pub fn with_pattern(mut self, pattern: TestPattern) -> Self {
        self.pattern = pattern;
        self
    }

    /// Steps called so far, in order.
    pub fn calls(&self) -> Vec<Step> {
        self.state.lock().calls.clone()
    }

    /// Number of times a step was called.
    pub fn call_count(&self, step: Step) -> usize {
        self.state.lock().calls.iter().filter(|s| **s == step).count()
    }

    /// Resources released so far, in order.
    pub fn released(&self) -> Vec<Resource> {
        self.state.lock().released.clone()
    }

    /// Format last pushed through `set_stream_format`.
    pub fn pushed_format(&self) -> Option<StreamFormat> {
        self.state.lock().pushed_format
    }

    /// Devices a property page was requested for.
    pub fn property_pages(&self) -> Vec<String> {
        self.state.lock().property_pages.clone()
    }

    fn step(&self, step: Step) -> BackendResult<()> {
        self.state.lock().calls.push(step);
        if self.failure == Some(step) {
            return Err(BackendError::new(format!("mock failure at {step:?}")));
        }
        Ok(())
    }

    fn join_delivery(&self) {
        let delivery = {
            let mut state = self.state.lock();
            state.halt.store(true, Ordering::SeqCst);
            state.delivery.take()
        };
        if let Some(handle) = delivery {
            let _ = handle.join();
        }
    }
}

impl CaptureBackend for MockBackend {
    fn create_graph_builder(&self) -> BackendResult<()> {
        self.step(Step::CreateGraphBuilder)
    }

    fn create_filter_graph(&self) -> BackendResult<()> {
        self.step(Step::CreateFilterGraph)
    }

    fn bind_graph(&self) -> BackendResult<()> {
        self.step(Step::BindGraph)
    }

    fn create_source(&self, _device_id: &str) -> BackendResult<()> {
        self.step(Step::CreateSource)
    }

    fn create_sample_sink(
        &self,
        _config: &SinkConfig,
        sink: Arc<dyn SampleSink>,
    ) -> BackendResult<()> {
        self.step(Step::CreateSampleSink)?;
        self.state.lock().sink = Some(sink);
        Ok(())
    }

    fn add_filters(&self) -> BackendResult<()> {
        self.step(Step::AddFilters)
    }

    fn stream_format(&self) -> BackendResult<Option<StreamFormat>> {
        self.step(Step::StreamFormat)?;
        Ok(self.device_format)
    }

    fn set_stream_format(&self, format: &StreamFormat) -> BackendResult<()> {
        self.step(Step::SetStreamFormat)?;
        let mut state = self.state.lock();
        state.pushed_format = Some(*format);
        state.pending_format = Some(*format);
        Ok(())
    }

    fn render_stream(&self) -> BackendResult<()> {
        self.step(Step::RenderStream)?;
        let mut state = self.state.lock();
        let base = state
            .pending_format
            .or(self.device_format)
            .unwrap_or_else(|| StreamFormat::bgr24(640, 480));
        let mut negotiated = StreamFormat::bgr24(base.width, base.height);
        negotiated.avg_time_per_frame = base.avg_time_per_frame;
        state.negotiated = Some(negotiated);
        Ok(())
    }

    fn connected_format(&self) -> BackendResult<StreamFormat> {
        self.step(Step::ConnectedFormat)?;
        self.state
            .lock()
            .negotiated
            .ok_or_else(|| BackendError::new("not connected"))
    }

    fn run(&self) -> BackendResult<()> {
        self.step(Step::Run)?;
        let mut state = self.state.lock();
        let (Some(sink), Some(format)) = (state.sink.clone(), state.negotiated) else {
            return Err(BackendError::new("graph not rendered"));
        };

        let pattern = self.pattern;
        let frame = generate_test_frame(&format, pattern);
        let fail_after = self.fail_after;
        let count = fail_after.map_or(self.frames, |limit| limit.min(self.frames));
        let interval = self.frame_interval;
        let halt = Arc::new(AtomicBool::new(false));
        state.halt = Arc::clone(&halt);
        state.delivery = Some(thread::spawn(move || {
            for index in 0..count {
                if halt.load(Ordering::SeqCst) {
                    return;
                }
                #[allow(clippy::cast_precision_loss)]
                let sample_time = index as f64 / 30.0;
                let stamped = matches!(pattern, TestPattern::Sequence)
                    .then(|| generate_test_frame(&format, sequence_level(index)));
                sink.on_buffer(sample_time, stamped.as_deref().unwrap_or(frame.as_slice()));
                if !interval.is_zero() {
                    thread::sleep(interval);
                }
            }
            if fail_after.is_some() && !halt.load(Ordering::SeqCst) {
                sink.on_error(BackendError::new("mock stream failure"));
            }
        }));
        Ok(())
    }

    fn stop_when_ready(&self) -> BackendResult<()> {
        self.step(Step::StopWhenReady)?;
        thread::sleep(self.stop_latency);
        self.join_delivery();
        Ok(())
    }

    fn release(&self, resource: Resource) {
        if resource == Resource::SampleSink {
            self.join_delivery();
        }
        let mut state = self.state.lock();
        match resource {
            Resource::SampleSink => state.sink = None,
            Resource::SourceFilter => {
                state.pending_format = None;
                state.negotiated = None;
            }
            Resource::GraphBuilder | Resource::FilterGraph => {}
        }
        state.released.push(resource);
    }

    fn display_property_page(&self, device_id: &str) -> BackendResult<()> {
        self.state.lock().property_pages.push(device_id.to_owned());
        Ok(())
    }
}

/// Generate a raw buffer in the layout described by `format`.
pub fn generate_test_frame(format: &StreamFormat, pattern: TestPattern) -> Vec<u8> {
    let mut data = vec![0u8; format.frame_len()];
    let width = format.width;
    let height = format.height;

    for (mem_row, row) in data.chunks_exact_mut(format.stride).enumerate() {
        #[allow(clippy::cast_possible_truncation)]
        let y = match format.row_order {
            RowOrder::BottomUp => height - 1 - mem_row as u32,
            RowOrder::TopDown => mem_row as u32,
        };
        for (x, px) in (0..width).zip(row.chunks_exact_mut(3)) {
            let (r, g, b) = pattern_color(pattern, x, y, width);
            px.copy_from_slice(&[b, g, r]);
        }
    }

    data
}

#[allow(clippy::cast_possible_truncation)]
fn pattern_color(pattern: TestPattern, x: u32, y: u32, width: u32) -> (u8, u8, u8) {
    match pattern {
        TestPattern::ColorBars => {
            let bar_width = (width / 8).max(1);
            let index = ((x / bar_width) as usize).min(COLOR_BARS.len() - 1);
            COLOR_BARS.get(index).copied().unwrap_or_default()
        }
        TestPattern::Gradient => {
            let level = ((x * 255) / width.max(1)) as u8;
            (level, level, level)
        }
        TestPattern::RowIndex => {
            let level = (y % 256) as u8;
            (level, level, level)
        }
        TestPattern::Solid(r, g, b) => (r, g, b),
        TestPattern::Sequence => (0, 0, 0),
    }
}

/// Solid pattern carrying a buffer index.
#[allow(clippy::cast_possible_truncation)]
const fn sequence_level(index: usize) -> TestPattern {
    let level = (index % 256) as u8;
    TestPattern::Solid(level, level, level)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mock_records_steps() {
        let backend = MockBackend::new();
        backend.create_graph_builder().expect("graph builder");
        backend.create_source("mock:0").expect("source");
        assert_eq!(
            backend.calls(),
            [Step::CreateGraphBuilder, Step::CreateSource]
        );
    }

    #[test]
    fn test_mock_failure() {
        let backend = MockBackend::new().with_failure(Step::BindGraph);
        assert!(backend.create_filter_graph().is_ok());
        assert!(backend.bind_graph().is_err());
    }

    #[test]
    fn test_render_uses_pushed_format() {
        let backend = MockBackend::new();
        backend
            .set_stream_format(&StreamFormat::bgr24(320, 240))
            .expect("set format");
        backend.render_stream().expect("render");
        let format = backend.connected_format().expect("connected");
        assert_eq!((format.width, format.height), (320, 240));
    }

    #[test]
    fn test_color_bars_pattern() {
        let format = StreamFormat::bgr24(640, 480);
        let data = generate_test_frame(&format, TestPattern::ColorBars);

        assert_eq!(data.len(), 640 * 480 * 3);
        // First bar is white, stored B,G,R
        assert_eq!(&data[..3], &[255, 255, 255]);
        // Second bar is yellow: B=0
        let yellow = 80 * 3;
        assert_eq!(&data[yellow..yellow + 3], &[0, 255, 255]);
    }

    #[test]
    fn test_row_index_pattern_is_bottom_up() {
        let format = StreamFormat::bgr24(4, 3);
        let data = generate_test_frame(&format, TestPattern::RowIndex);

        // First row in memory is the bottom row of the picture
        assert_eq!(data[0], 2);
        assert_eq!(data[format.stride * 2], 0);
    }

    #[test]
    fn test_solid_pattern() {
        let format = StreamFormat::bgr24(5, 2);
        let data = generate_test_frame(&format, TestPattern::Solid(10, 20, 30));

        assert_eq!(&data[..3], &[30, 20, 10]);
        // DIB padding stays zero
        assert_eq!(data[15], 0);
    }

    #[test]
    fn test_sequence_level_wraps() {
        assert!(matches!(sequence_level(7), TestPattern::Solid(7, 7, 7)));
        assert!(matches!(sequence_level(258), TestPattern::Solid(2, 2, 2)));
    }
}
