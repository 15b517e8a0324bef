//! V4L2 capture backend using the v4l crate.
//!
//! The graph steps collapse onto a single opened device: the graph builder
//! and filter graph have nothing to allocate, the source filter is the
//! `/dev/videoN` node and the sample sink is the `SampleSink` fed from a
//! delivery thread that dequeues mmap buffers.

use std::io;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, SyncSender};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use parking_lot::Mutex;
use tracing::{debug, trace, warn};
use v4l::buffer::Type;
use v4l::capability::Flags;
use v4l::device::Handle;
use v4l::io::mmap::Stream;
use v4l::io::traits::CaptureStream;
use v4l::timestamp::Timestamp;
use v4l::video::capture::Parameters;
use v4l::video::Capture;
use v4l::Device;

use crate::error::BackendError;
use crate::traits::{
    BackendResult, CaptureBackend, FourCC, Resource, RowOrder, SampleSink, SinkConfig,
    StreamFormat, TICKS_PER_SECOND,
};

/// Name of the buffer delivery thread.
pub const DELIVERY_THREAD_NAME: &str = "v4l2-delivery";

/// How long the first dequeue may block before streaming counts as started.
const DEQUEUE_TIMEOUT: Duration = Duration::from_millis(200);

/// How long one readiness wait may block before the stop flag is checked again.
const POLL_TIMEOUT_MS: i32 = 200;

/// poll(2) event: data to read.
const POLLIN: i16 = 0x001;

/// Default number of mmap buffers.
pub const DEFAULT_BUFFER_COUNT: u32 = 4;

/// Identification reported by a V4L2 device.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceInfo {
    /// Driver name (e.g., "vivid", "uvcvideo").
    pub driver: String,
    /// Card/device name.
    pub card: String,
    /// Bus information.
    pub bus_info: String,
}

struct Delivery {
    running: Arc<AtomicBool>,
    thread: JoinHandle<Device>,
}

#[derive(Default)]
struct V4l2State {
    device: Option<Device>,
    sink: Option<Arc<dyn SampleSink>>,
    negotiated: Option<StreamFormat>,
    delivery: Option<Delivery>,
}

/// [`CaptureBackend`] over a V4L2 video capture node.
pub struct V4l2Backend {
    buffer_count: u32,
    state: Mutex<V4l2State>,
}

impl Default for V4l2Backend {
    fn default() -> Self {
        Self::new()
    }
}

impl V4l2Backend {
    /// Create a backend using [`DEFAULT_BUFFER_COUNT`] mmap buffers.
    pub fn new() -> Self {
        Self::with_buffer_count(DEFAULT_BUFFER_COUNT)
    }

    /// Create a backend using `buffer_count` mmap buffers.
    pub fn with_buffer_count(buffer_count: u32) -> Self {
        Self {
            buffer_count: buffer_count.max(1),
            state: Mutex::new(V4l2State::default()),
        }
    }

    /// Open a device node and report what it is, without keeping it open.
    pub fn query(device_id: &str) -> BackendResult<DeviceInfo> {
        let device = Device::with_path(device_id)?;
        let caps = device.query_caps()?;
        Ok(DeviceInfo {
            driver: caps.driver,
            card: caps.card,
            bus_info: caps.bus,
        })
    }

    fn with_device<T, F>(&self, f: F) -> BackendResult<T>
    where
        F: FnOnce(&Device) -> io::Result<T>,
    {
        let state = self.state.lock();
        let device = state
            .device
            .as_ref()
            .ok_or_else(|| BackendError::new("no source device opened"))?;
        f(device).map_err(BackendError::from)
    }

    /// Stop the delivery thread, if any, and take the device back.
    fn halt_delivery(&self) -> BackendResult<()> {
        let Some(delivery) = self.state.lock().delivery.take() else {
            return Ok(());
        };

        delivery.running.store(false, Ordering::Release);
        let device = delivery
            .thread
            .join()
            .map_err(|_| BackendError::new("delivery thread panicked"))?;
        self.state.lock().device = Some(device);
        debug!("V4L2 delivery stopped");
        Ok(())
    }
}

impl CaptureBackend for V4l2Backend {
    fn create_graph_builder(&self) -> BackendResult<()> {
        trace!("V4L2 has no graph builder");
        Ok(())
    }

    fn create_filter_graph(&self) -> BackendResult<()> {
        trace!("V4L2 has no filter graph");
        Ok(())
    }

    fn bind_graph(&self) -> BackendResult<()> {
        Ok(())
    }

    fn create_source(&self, device_id: &str) -> BackendResult<()> {
        let device = Device::with_path(device_id)?;
        let caps = device.query_caps()?;

        if !caps.capabilities.contains(Flags::VIDEO_CAPTURE) {
            return Err(BackendError::new(format!(
                "{} ({}) is not a video capture device",
                caps.card, caps.driver
            )));
        }
        if !caps.capabilities.contains(Flags::STREAMING) {
            return Err(BackendError::new(format!(
                "{} ({}) does not support streaming I/O",
                caps.card, caps.driver
            )));
        }

        debug!(
            device = device_id,
            driver = %caps.driver,
            card = %caps.card,
            "opened V4L2 device"
        );
        self.state.lock().device = Some(device);
        Ok(())
    }

    fn create_sample_sink(
        &self,
        config: &SinkConfig,
        sink: Arc<dyn SampleSink>,
    ) -> BackendResult<()> {
        if config.subtype != FourCC::BGR3 {
            return Err(BackendError::new(format!(
                "sample sink subtype {} is not supported",
                config.subtype
            )));
        }
        if config.one_shot {
            return Err(BackendError::new("one-shot sample sinks are not supported"));
        }
        self.state.lock().sink = Some(sink);
        Ok(())
    }

    fn add_filters(&self) -> BackendResult<()> {
        let state = self.state.lock();
        if state.device.is_none() || state.sink.is_none() {
            return Err(BackendError::new(
                "source and sample sink must exist before they are added",
            ));
        }
        Ok(())
    }

    fn stream_format(&self) -> BackendResult<Option<StreamFormat>> {
        self.with_device(|device| {
            let fmt = device.format()?;
            let avg_time_per_frame = device
                .params()
                .map(|params| interval_ticks(params.interval))
                .unwrap_or(0);
            Ok(Some(StreamFormat {
                width: fmt.width,
                height: fmt.height,
                stride: fmt.stride as usize,
                fourcc: FourCC::from(fmt.fourcc),
                avg_time_per_frame,
                row_order: RowOrder::TopDown,
            }))
        })
    }

    fn set_stream_format(&self, format: &StreamFormat) -> BackendResult<()> {
        self.with_device(|device| {
            let mut fmt = device.format()?;
            fmt.width = format.width;
            fmt.height = format.height;
            let actual = device.set_format(&fmt)?;
            debug!(
                width = actual.width,
                height = actual.height,
                "V4L2 frame size applied"
            );

            if let Some(fps) = format.frame_rate().filter(|fps| *fps > 0) {
                let params = device.set_params(&Parameters::with_fps(fps))?;
                debug!(
                    numerator = params.interval.numerator,
                    denominator = params.interval.denominator,
                    "V4L2 frame interval applied"
                );
            }
            Ok(())
        })
    }

    fn render_stream(&self) -> BackendResult<()> {
        let mut state = self.state.lock();
        let device = state
            .device
            .as_ref()
            .ok_or_else(|| BackendError::new("no source device opened"))?;

        let mut fmt = device.format()?;
        fmt.fourcc = FourCC::BGR3.into();
        let actual = device.set_format(&fmt)?;
        let fourcc = FourCC::from(actual.fourcc);
        if fourcc != FourCC::BGR3 {
            return Err(BackendError::new(format!(
                "device offers no {} output (driver chose {fourcc})",
                FourCC::BGR3
            )));
        }

        let avg_time_per_frame = device
            .params()
            .map(|params| interval_ticks(params.interval))
            .unwrap_or(0);
        let tight = actual.width as usize * 3;

        state.negotiated = Some(StreamFormat {
            width: actual.width,
            height: actual.height,
            stride: (actual.stride as usize).max(tight),
            fourcc,
            avg_time_per_frame,
            row_order: RowOrder::TopDown,
        });
        Ok(())
    }

    fn connected_format(&self) -> BackendResult<StreamFormat> {
        self.state
            .lock()
            .negotiated
            .ok_or_else(|| BackendError::new("stream is not rendered"))
    }

    fn run(&self) -> BackendResult<()> {
        let (device, sink) = {
            let mut state = self.state.lock();
            if state.delivery.is_some() {
                return Ok(());
            }
            let sink = state
                .sink
                .clone()
                .ok_or_else(|| BackendError::new("no sample sink registered"))?;
            let device = state
                .device
                .take()
                .ok_or_else(|| BackendError::new("no source device opened"))?;
            (device, sink)
        };

        let running = Arc::new(AtomicBool::new(true));
        let (ready_tx, ready_rx) = mpsc::sync_channel(1);
        let buffer_count = self.buffer_count;

        let thread = {
            let running = Arc::clone(&running);
            thread::Builder::new()
                .name(DELIVERY_THREAD_NAME.to_owned())
                .spawn(move || {
                    deliver(&device, buffer_count, sink.as_ref(), &running, &ready_tx);
                    device
                })?
        };

        let started = ready_rx
            .recv()
            .unwrap_or_else(|_| Err(io::Error::other("delivery thread exited early")));

        if let Err(err) = started {
            if let Ok(device) = thread.join() {
                self.state.lock().device = Some(device);
            }
            return Err(err.into());
        }

        self.state.lock().delivery = Some(Delivery { running, thread });
        Ok(())
    }

    fn stop_when_ready(&self) -> BackendResult<()> {
        self.halt_delivery()
    }

    fn release(&self, resource: Resource) {
        match resource {
            Resource::SampleSink => {
                if let Err(err) = self.halt_delivery() {
                    warn!(%err, "failed to stop V4L2 delivery");
                }
                self.state.lock().sink = None;
            }
            Resource::SourceFilter => {
                if let Err(err) = self.halt_delivery() {
                    warn!(%err, "failed to stop V4L2 delivery");
                }
                let mut state = self.state.lock();
                state.negotiated = None;
                state.device = None;
            }
            Resource::GraphBuilder | Resource::FilterGraph => {}
        }
    }
}

/// Dequeue side of a V4L2 mmap stream.
///
/// The driver owns every queued buffer; the stream holds at most one
/// dequeued buffer, which goes back to the driver on the next
/// [`next_into`](Self::next_into).
trait BufferQueue {
    /// Wait up to the poll timeout for a filled buffer.
    fn readable(&mut self) -> io::Result<bool>;

    /// Re-queue the held buffer, dequeue the next filled one and hand it to
    /// `sink`. The first call queues every buffer and starts streaming.
    fn next_into(&mut self, sink: &dyn SampleSink) -> io::Result<()>;

    /// Dequeue a filled buffer without handing anything back. Its contents
    /// are not delivered.
    fn dequeue_unread(&mut self) -> io::Result<()>;
}

struct MmapQueue<'a> {
    handle: Arc<Handle>,
    stream: Stream<'a>,
}

impl BufferQueue for MmapQueue<'_> {
    fn readable(&mut self) -> io::Result<bool> {
        Ok(self.handle.poll(POLLIN, POLL_TIMEOUT_MS)? > 0)
    }

    fn next_into(&mut self, sink: &dyn SampleSink) -> io::Result<()> {
        let (buf, meta) = self.stream.next()?;
        let used = match meta.bytesused as usize {
            0 => buf.len(),
            n => n.min(buf.len()),
        };
        let data = buf.get(..used).unwrap_or(buf);
        sink.on_buffer(sample_time(&meta.timestamp), data);
        Ok(())
    }

    fn dequeue_unread(&mut self) -> io::Result<()> {
        self.stream.dequeue().map(|_| ())
    }
}

/// Body of the delivery thread: stream mmap buffers into the sink until the
/// running flag clears or the device fails.
fn deliver(
    device: &Device,
    buffer_count: u32,
    sink: &dyn SampleSink,
    running: &AtomicBool,
    ready: &SyncSender<io::Result<()>>,
) {
    let mut stream = match Stream::with_buffers(device, Type::VideoCapture, buffer_count) {
        Ok(stream) => stream,
        Err(err) => {
            let _ = ready.send(Err(err));
            return;
        }
    };
    stream.set_timeout(DEQUEUE_TIMEOUT);

    let mut queue = MmapQueue {
        handle: device.handle(),
        stream,
    };
    stream_buffers(&mut queue, sink, running, ready);
}

/// Start streaming, report readiness once STREAMON went through, then pump
/// buffers. Failures after readiness go to [`SampleSink::on_error`].
fn stream_buffers<Q: BufferQueue>(
    queue: &mut Q,
    sink: &dyn SampleSink,
    running: &AtomicBool,
    ready: &SyncSender<io::Result<()>>,
) {
    let holding = match queue.next_into(sink) {
        Ok(()) => true,
        Err(err) if err.kind() == io::ErrorKind::TimedOut => false,
        Err(err) => {
            let _ = ready.send(Err(err));
            return;
        }
    };
    if ready.send(Ok(())).is_err() {
        return;
    }

    if let Err(err) = pump(queue, sink, running, holding) {
        warn!(%err, "V4L2 streaming failed");
        sink.on_error(BackendError::from(err));
    }
}

/// `holding` tells whether the stream holds a dequeued buffer. Only then may
/// `next_into` run, since it re-queues that buffer first.
fn pump<Q: BufferQueue>(
    queue: &mut Q,
    sink: &dyn SampleSink,
    running: &AtomicBool,
    mut holding: bool,
) -> io::Result<()> {
    while running.load(Ordering::Acquire) {
        match queue.readable() {
            Ok(true) => {}
            Ok(false) => {
                trace!("no V4L2 buffer within timeout");
                continue;
            }
            Err(err) if err.kind() == io::ErrorKind::Interrupted => continue,
            Err(err) => return Err(err),
        }

        let step = if holding {
            queue.next_into(sink)
        } else {
            queue.dequeue_unread()
        };
        match step {
            Ok(()) => holding = true,
            // A timed out `next_into` has already re-queued the held buffer.
            Err(err) if err.kind() == io::ErrorKind::TimedOut => holding = false,
            Err(err) => return Err(err),
        }
    }
    Ok(())
}

/// Buffer timestamp in seconds.
#[allow(clippy::cast_precision_loss, clippy::cast_lossless)]
fn sample_time(timestamp: &Timestamp) -> f64 {
    timestamp.sec as f64 + timestamp.usec as f64 / 1_000_000.0
}

/// V4L2 frame interval (seconds as a fraction) in 100 ns ticks.
fn interval_ticks(interval: v4l::Fraction) -> u64 {
    if interval.denominator == 0 {
        return 0;
    }
    u64::from(interval.numerator) * TICKS_PER_SECOND / u64::from(interval.denominator)
}
