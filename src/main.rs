//! Capture-session binary for trying a camera from the command line.
//!
//! ```text
//! capture-session [<device>] [--config FILE] [--size WxH] [--fps N] [--seconds N]
//! ```
//!
//! `--config` loads a JSON [`CaptureConfig`]; the other arguments override it.

use std::fs;
use std::path::PathBuf;
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use anyhow::{bail, Context, Result};
use capture_session::{CaptureConfig, CaptureSession, FrameSize, V4l2Backend};
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

const USAGE: &str =
    "usage: capture-session [<device>] [--config FILE] [--size WxH] [--fps N] [--seconds N]";

struct Args {
    device: Option<String>,
    config: Option<PathBuf>,
    size: Option<FrameSize>,
    fps: Option<u32>,
    seconds: Option<u64>,
}

fn parse_args() -> Result<Args> {
    let mut args = std::env::args().skip(1);
    let mut device = None;
    let mut config = None;
    let mut size = None;
    let mut fps = None;
    let mut seconds = None;

    while let Some(arg) = args.next() {
        match arg.as_str() {
            "--config" => {
                config = Some(PathBuf::from(
                    args.next().context("--config needs a value")?,
                ));
            }
            "--size" => {
                let value = args.next().context("--size needs a value")?;
                size = Some(parse_size(&value)?);
            }
            "--fps" => {
                let value = args.next().context("--fps needs a value")?;
                fps = Some(
                    value
                        .parse()
                        .with_context(|| format!("invalid --fps {value}"))?,
                );
            }
            "--seconds" => {
                let value = args.next().context("--seconds needs a value")?;
                seconds = Some(
                    value
                        .parse()
                        .with_context(|| format!("invalid --seconds {value}"))?,
                );
            }
            "-h" | "--help" => {
                println!("{USAGE}");
                std::process::exit(0);
            }
            other if other.starts_with('-') => bail!("unknown option {other}\n{USAGE}"),
            other => {
                if device.replace(other.to_owned()).is_some() {
                    bail!("only one device may be given\n{USAGE}");
                }
            }
        }
    }

    Ok(Args {
        device,
        config,
        size,
        fps,
        seconds,
    })
}

fn parse_size(value: &str) -> Result<FrameSize> {
    let (width, height) = value
        .split_once(['x', 'X'])
        .with_context(|| format!("invalid --size {value}, expected WxH"))?;
    Ok(FrameSize::new(
        width.parse().with_context(|| format!("invalid width in {value}"))?,
        height.parse().with_context(|| format!("invalid height in {value}"))?,
    ))
}

fn load_config(args: &Args) -> Result<CaptureConfig> {
    let mut config = match &args.config {
        Some(path) => {
            let json = fs::read_to_string(path)
                .with_context(|| format!("failed to read {}", path.display()))?;
            CaptureConfig::from_json(&json)
                .with_context(|| format!("failed to parse {}", path.display()))?
        }
        None => CaptureConfig::default(),
    };

    if let Some(device) = &args.device {
        config.device_id = Some(device.clone());
    }
    if let Some(size) = args.size {
        config.desired_frame_size = size;
    }
    if let Some(fps) = args.fps {
        config.desired_frame_rate = fps;
    }
    if config.device_id.is_none() {
        bail!("no device given\n{USAGE}");
    }
    Ok(config)
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_target(true)
        .init();

    let args = parse_args()?;
    let config = load_config(&args)?;
    let device = config.require_device()?;

    match V4l2Backend::query(device) {
        Ok(info) => info!(
            driver = %info.driver,
            card = %info.card,
            bus = %info.bus_info,
            "device"
        ),
        Err(err) => error!(%err, device, "failed to query device"),
    }

    let backend = Arc::new(V4l2Backend::with_buffer_count(config.buffer_count));
    let mut session = CaptureSession::with_config(backend, config);

    session.on_error(|err| error!(%err, "capture error"));
    session.on_finished(|reason| info!(?reason, "capture finished"));

    session.start().context("failed to start capture")?;

    let started = Instant::now();
    let mut announced = false;
    while session.is_running() {
        thread::sleep(Duration::from_secs(1));

        if !announced {
            if let Some(format) = session.negotiated_format() {
                info!(
                    width = format.width,
                    height = format.height,
                    fps = ?format.frame_rate(),
                    "negotiated format"
                );
                announced = true;
            }
        }

        info!(
            frames = session.read_frames_received(),
            bytes = session.read_bytes_received(),
            "last second"
        );

        if args.seconds.is_some_and(|limit| started.elapsed().as_secs() >= limit) {
            break;
        }
    }

    session.stop().context("failed to stop capture")?;
    Ok(())
}
