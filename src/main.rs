mod parser;

use std::process::ExitCode;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use anyhow::Context;
use clap::Parser;

use plotstream::camera::{Camera, SizePolicy};
use plotstream::publisher;
use plotstream::stream::{MjpegStream, ServerConfig, StreamServer};
use plotstream::synthetic::SyntheticDevice;
use plotstream::transform::Compositor;
use plotstream::worker::Worker;

fn main() -> ExitCode {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let args = parser::Cli::parse();

    match run(args) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            log::error!("{:#}", e);
            ExitCode::FAILURE
        }
    }
}

fn run(args: parser::Cli) -> anyhow::Result<()> {
    let shutdown = Arc::new(AtomicBool::new(false));
    let flag = shutdown.clone();
    ctrlc::set_handler(move || flag.store(true, Ordering::Release)).context("installing signal handler")?;

    let stream = MjpegStream::new();
    let compositor = Compositor::new(args.retention.into(), args.quality);
    let mut capture = launch_capture(&args.device, args.size, compositor, stream.clone(), args.frame_timeout())?;

    let config = ServerConfig {
        interval: args.interval(),
        diagnostics: !args.no_diagnostics,
    };
    let server = StreamServer::launch(&args.listen, stream, config).context("starting http server")?;

    let mut failure = None;
    while !shutdown.load(Ordering::Acquire) {
        if capture.is_finished() {
            failure = capture.join().map(|e| anyhow::Error::new(e).context("capture stopped"));
            break;
        }
        if server.is_finished() {
            break;
        }
        thread::sleep(Duration::from_millis(100));
    }

    log::info!("shutting down");
    // the publisher can sit in a frame wait, so let it wind down while the server stops
    capture.kill();
    if let Err(e) = server.stop() {
        failure.get_or_insert(anyhow::Error::new(e).context("http server stopped"));
    }
    if let Some(e) = capture.join() {
        failure.get_or_insert(anyhow::Error::new(e).context("capture stopped"));
    }

    match failure {
        Some(e) => Err(e),
        None => Ok(()),
    }
}

fn launch_capture(
    device: &str,
    policy: SizePolicy,
    compositor: Compositor,
    stream: MjpegStream,
    frame_timeout: Duration,
) -> anyhow::Result<Worker> {
    if device == "synthetic" {
        log::info!("using synthetic frames");
        let worker = publisher::launch(
            move || Camera::open(SyntheticDevice::new(), policy),
            compositor,
            stream,
            frame_timeout,
        )?;
        return Ok(worker);
    }

    #[cfg(feature = "v4l")]
    {
        use plotstream::v4l2::V4lDevice;

        let path = device.to_owned();
        let worker = publisher::launch(
            move || Camera::open(V4lDevice::open(&path)?, policy),
            compositor,
            stream,
            frame_timeout,
        )?;
        Ok(worker)
    }

    #[cfg(not(feature = "v4l"))]
    {
        let _ = (compositor, stream, frame_timeout);
        anyhow::bail!("cannot open {}: built without the v4l feature (use --device synthetic)", device)
    }
}
