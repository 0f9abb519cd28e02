//! A capture device that makes up its own frames.
//!
//! Useful for running the service without hardware (`--device synthetic`) and for driving the
//! publisher through timeouts and bad frames in tests.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use image::codecs::jpeg::JpegEncoder;
use image::{Rgb, RgbImage};

use crate::camera::CaptureDevice;
use crate::error::{Error, Result};
use crate::frame::{FrameSize, PixelFormat};

/// What the next `wait_for_frame` call does.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum WaitOutcome {
    /// A good JPEG frame is ready.
    Frame,
    Timeout,
    /// The wait itself fails (e.g. the device went away).
    Fail,
    /// A frame is ready, but it isn't a JPEG.
    Garbage,
    /// A frame is signalled, but reading it fails.
    Unreadable,
}

enum Pending {
    Data(Vec<u8>),
    Unreadable,
}

pub struct SyntheticDevice {
    formats: Vec<PixelFormat>,
    sizes: Vec<FrameSize>,
    script: VecDeque<WaitOutcome>,
    frame_period: Duration,
    fail_start: bool,

    negotiated: Option<FrameSize>,
    streaming: bool,
    pending: Option<Pending>,
    sequence: u32,
    closed: Arc<AtomicBool>,
}

impl Default for SyntheticDevice {
    fn default() -> SyntheticDevice {
        SyntheticDevice::new()
    }
}

impl SyntheticDevice {
    pub fn new() -> SyntheticDevice {
        SyntheticDevice {
            formats: vec![PixelFormat::YUYV, PixelFormat::MJPEG],
            sizes: vec![
                FrameSize::new(160, 120),
                FrameSize::new(320, 240),
                FrameSize::new(640, 480),
                FrameSize::new(1280, 720),
            ],
            script: VecDeque::new(),
            frame_period: Duration::from_millis(33), // ~30fps
            fail_start: false,
            negotiated: None,
            streaming: false,
            pending: None,
            sequence: 0,
            closed: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn with_formats(mut self, formats: Vec<PixelFormat>) -> Self {
        self.formats = formats;
        self
    }

    pub fn with_frame_sizes(mut self, sizes: Vec<FrameSize>) -> Self {
        self.sizes = sizes;
        self
    }

    /// Outcomes for the first waits, in order. Once the script runs out every wait produces a
    /// good frame.
    pub fn with_script<I: IntoIterator<Item = WaitOutcome>>(mut self, script: I) -> Self {
        self.script = script.into_iter().collect();
        self
    }

    pub fn with_frame_period(mut self, period: Duration) -> Self {
        self.frame_period = period;
        self
    }

    pub fn failing_start(mut self) -> Self {
        self.fail_start = true;
        self
    }

    /// Raised once the device has been closed.
    pub fn closed_flag(&self) -> Arc<AtomicBool> {
        self.closed.clone()
    }

    fn render_frame(&mut self, size: FrameSize) -> Result<Vec<u8>> {
        let shift = self.sequence;
        self.sequence = self.sequence.wrapping_add(1);
        let (w, h) = (size.width.max(1), size.height.max(1));
        let image = RgbImage::from_fn(size.width, size.height, |x, y| {
            let r = (x.wrapping_add(shift) % w * 255 / w) as u8;
            let g = (y * 255 / h) as u8;
            Rgb([r, g, 128])
        });
        let mut out = Vec::new();
        JpegEncoder::new_with_quality(&mut out, 80)
            .encode_image(&image)
            .map_err(Error::Encode)?;
        Ok(out)
    }
}

impl CaptureDevice for SyntheticDevice {
    fn supported_formats(&self) -> Result<Vec<PixelFormat>> {
        Ok(self.formats.clone())
    }

    fn supported_frame_sizes(&self, format: PixelFormat) -> Result<Vec<FrameSize>> {
        if !self.formats.contains(&format) {
            return Ok(Vec::new());
        }
        Ok(self.sizes.clone())
    }

    fn set_format(&mut self, format: PixelFormat, size: FrameSize) -> Result<(PixelFormat, FrameSize)> {
        if !self.formats.contains(&format) {
            return Err(Error::Negotiation(format!("{} is not supported", format)));
        }
        // behave like a driver: snap to the nearest size we actually have
        let size = self
            .sizes
            .iter()
            .min_by_key(|s| s.width.abs_diff(size.width) + s.height.abs_diff(size.height))
            .copied()
            .ok_or_else(|| Error::Negotiation("no frame sizes".into()))?;
        self.negotiated = Some(size);
        Ok((format, size))
    }

    fn start_streaming(&mut self) -> Result<()> {
        if self.fail_start {
            return Err(Error::CaptureStart("synthetic device refused to start".into()));
        }
        if self.negotiated.is_none() {
            return Err(Error::CaptureStart("no format negotiated".into()));
        }
        self.streaming = true;
        Ok(())
    }

    fn wait_for_frame(&mut self, timeout: Duration) -> Result<()> {
        if !self.streaming {
            return Err(Error::NotStarted);
        }
        let Some(size) = self.negotiated else {
            return Err(Error::NotStarted);
        };

        match self.script.pop_front().unwrap_or(WaitOutcome::Frame) {
            WaitOutcome::Frame => {
                std::thread::sleep(self.frame_period.min(timeout));
                let frame = self.render_frame(size)?;
                self.pending = Some(Pending::Data(frame));
                Ok(())
            }
            WaitOutcome::Timeout => {
                std::thread::sleep(self.frame_period.min(timeout));
                Err(Error::Timeout)
            }
            WaitOutcome::Fail => Err(Error::Wait("synthetic device failure".into())),
            WaitOutcome::Garbage => {
                self.pending = Some(Pending::Data(b"definitely not a jpeg".to_vec()));
                Ok(())
            }
            WaitOutcome::Unreadable => {
                self.pending = Some(Pending::Unreadable);
                Ok(())
            }
        }
    }

    fn read_frame(&mut self) -> Result<Vec<u8>> {
        match self.pending.take() {
            Some(Pending::Data(data)) => Ok(data),
            Some(Pending::Unreadable) => Err(Error::Read("synthetic read failure".into())),
            None => Err(Error::Read("no frame ready".into())),
        }
    }

    fn close(&mut self) -> Result<()> {
        self.streaming = false;
        self.pending = None;
        self.closed.store(true, Ordering::Release);
        Ok(())
    }
}
