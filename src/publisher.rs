use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use crate::camera::{Camera, CaptureDevice};
use crate::error::{Error, Result};
use crate::stream::MjpegStream;
use crate::transform::Compositor;
use crate::worker::Worker;

pub const DEFAULT_FRAME_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PublisherState {
    Idle,
    Streaming,
    Failed,
    Closed,
}

/// Outcome of one trip around the capture loop.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Step {
    Published(u64),
    Dropped,
    TimedOut,
}

/// Pulls frames off a camera one at a time, runs them through the compositor and publishes
/// the result.
pub struct Publisher<D: CaptureDevice> {
    camera: Camera<D>,
    compositor: Compositor,
    stream: MjpegStream,
    frame_timeout: Duration,
    state: PublisherState,
}

impl<D: CaptureDevice> Publisher<D> {
    pub fn new(camera: Camera<D>, compositor: Compositor, stream: MjpegStream, frame_timeout: Duration) -> Publisher<D> {
        stream.set_source(camera.format(), camera.size());
        Publisher {
            camera,
            compositor,
            stream,
            frame_timeout,
            state: PublisherState::Idle,
        }
    }

    pub fn state(&self) -> PublisherState {
        self.state
    }

    pub fn start(&mut self) -> Result<()> {
        match self.state {
            PublisherState::Streaming => return Ok(()),
            PublisherState::Idle => {}
            _ => return Err(Error::NotStarted),
        }
        if let Err(e) = self.camera.start() {
            self.state = PublisherState::Failed;
            return Err(e);
        }
        self.state = PublisherState::Streaming;
        self.stream.set_streaming(true);
        Ok(())
    }

    /// Waits for one frame and publishes it. Per-frame trouble is swallowed and reported as
    /// `Dropped` or `TimedOut`; an `Err` means capture is over.
    pub fn step(&mut self) -> Result<Step> {
        if self.state != PublisherState::Streaming {
            return Err(Error::NotStarted);
        }

        match self.camera.wait_for_frame(self.frame_timeout) {
            Ok(()) => {}
            Err(Error::Timeout) => {
                log::warn!("camera connection timeout");
                return Ok(Step::TimedOut);
            }
            Err(e) => {
                self.fail();
                return Err(e);
            }
        }

        let raw = match self.camera.read_frame() {
            Ok(raw) => raw,
            Err(e) => {
                log::debug!("skipping frame: {}", e);
                return Ok(Step::Dropped);
            }
        };
        let jpeg = match self.compositor.compose(&raw) {
            Ok(jpeg) => jpeg,
            Err(e) => {
                log::debug!("skipping frame: {}", e);
                return Ok(Step::Dropped);
            }
        };
        match self.stream.publish(jpeg) {
            Ok(id) => Ok(Step::Published(id)),
            Err(e) => {
                log::debug!("skipping frame: {}", e);
                Ok(Step::Dropped)
            }
        }
    }

    /// Streams until `kill_flag` is raised or capture fails.
    pub fn run(&mut self, kill_flag: &AtomicBool) -> Result<()> {
        self.start()?;
        while !kill_flag.load(Ordering::Acquire) {
            self.step()?;
        }
        self.state = PublisherState::Closed;
        self.stream.set_streaming(false);
        log::info!("publisher stopped");
        Ok(())
    }

    fn fail(&mut self) {
        self.state = PublisherState::Failed;
        self.stream.set_streaming(false);
    }
}

/// Runs a publisher on its own thread. The camera is opened on that thread, so an `open`
/// failure shows up as the worker's error.
pub fn launch<D, F>(open: F, compositor: Compositor, stream: MjpegStream, frame_timeout: Duration) -> Result<Worker>
where
    D: CaptureDevice + 'static,
    F: FnOnce() -> Result<Camera<D>> + Send + 'static,
{
    Worker::spawn("publisher", move |kill_flag| {
        let camera = open()?;
        let mut publisher = Publisher::new(camera, compositor, stream, frame_timeout);
        publisher.run(&kill_flag)
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::camera::SizePolicy;
    use crate::chart::SeriesRetention;
    use crate::frame::FrameSize;
    use crate::synthetic::{SyntheticDevice, WaitOutcome};

    fn publisher(dev: SyntheticDevice) -> (Publisher<SyntheticDevice>, MjpegStream) {
        let camera = Camera::open(dev.with_frame_period(Duration::ZERO), SizePolicy::Smallest).unwrap();
        let stream = MjpegStream::new();
        let compositor = Compositor::with_seed(SeriesRetention::Reset, 75, 11);
        let publisher = Publisher::new(camera, compositor, stream.clone(), Duration::from_millis(20));
        (publisher, stream)
    }

    #[test]
    fn step_requires_start() {
        let (mut publisher, _) = publisher(SyntheticDevice::new());
        assert_eq!(publisher.state(), PublisherState::Idle);
        assert!(matches!(publisher.step(), Err(Error::NotStarted)));
        publisher.start().unwrap();
        assert_eq!(publisher.state(), PublisherState::Streaming);
    }

    #[test]
    fn timeout_then_frame() {
        let (mut publisher, stream) = publisher(SyntheticDevice::new().with_script([WaitOutcome::Timeout]));
        publisher.start().unwrap();
        assert_eq!(publisher.step().unwrap(), Step::TimedOut);
        assert!(stream.latest().is_none());
        assert_eq!(publisher.step().unwrap(), Step::Published(1));
        assert_eq!(publisher.state(), PublisherState::Streaming);

        let (_, jpeg) = stream.latest().unwrap();
        let img = image::load_from_memory(&jpeg).unwrap();
        assert_eq!((img.width(), img.height()), (160, 120));
    }

    #[test]
    fn bad_frames_are_dropped() {
        let (mut publisher, stream) =
            publisher(SyntheticDevice::new().with_script([WaitOutcome::Garbage, WaitOutcome::Unreadable]));
        publisher.start().unwrap();
        assert_eq!(publisher.step().unwrap(), Step::Dropped);
        assert_eq!(publisher.step().unwrap(), Step::Dropped);
        assert_eq!(stream.frame_id(), 0);
        assert_eq!(publisher.step().unwrap(), Step::Published(1));
    }

    #[test]
    fn wait_failure_is_fatal() {
        let (mut publisher, stream) = publisher(SyntheticDevice::new().with_script([WaitOutcome::Fail]));
        publisher.start().unwrap();
        assert!(matches!(publisher.step(), Err(Error::Wait(_))));
        assert_eq!(publisher.state(), PublisherState::Failed);
        assert!(!stream.status().streaming);
        assert!(matches!(publisher.start(), Err(Error::NotStarted)));
    }

    #[test]
    fn start_failure_is_fatal() {
        let (mut publisher, _) = publisher(SyntheticDevice::new().failing_start());
        assert!(matches!(publisher.start(), Err(Error::CaptureStart(_))));
        assert_eq!(publisher.state(), PublisherState::Failed);
    }

    #[test]
    fn run_stops_on_kill_flag() {
        let (mut publisher, stream) = publisher(SyntheticDevice::new());
        let kill_flag = AtomicBool::new(true);
        publisher.run(&kill_flag).unwrap();
        assert_eq!(publisher.state(), PublisherState::Closed);
        assert!(!stream.status().streaming);
        let status = stream.status();
        assert_eq!((status.width, status.height), (Some(160), Some(120)));
    }

    #[test]
    fn launched_publisher_closes_camera_on_exit() {
        let dev = SyntheticDevice::new().with_frame_period(Duration::from_millis(5));
        let closed = dev.closed_flag();
        let stream = MjpegStream::new();
        let mut worker = launch(
            move || Camera::open(dev, SizePolicy::Closest(FrameSize::new(320, 240))),
            Compositor::with_seed(SeriesRetention::Reset, 75, 5),
            stream.clone(),
            DEFAULT_FRAME_TIMEOUT,
        )
        .unwrap();

        assert!(stream.wait_newer(0, Duration::from_secs(10)).is_some());
        assert!(worker.join().is_none());
        assert!(closed.load(Ordering::Acquire));
    }

    #[test]
    fn launched_publisher_reports_open_errors() {
        let dev = SyntheticDevice::new().with_frame_sizes(vec![FrameSize::new(320, 240)]);
        let mut worker = launch(
            move || Camera::open(dev, SizePolicy::default()),
            Compositor::default(),
            MjpegStream::new(),
            DEFAULT_FRAME_TIMEOUT,
        )
        .unwrap();
        while !worker.is_finished() {
            std::thread::sleep(Duration::from_millis(1));
        }
        assert!(matches!(worker.join(), Some(Error::FrameSizeIndex { index: 2, available: 1 })));
    }
}
