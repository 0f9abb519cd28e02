use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use crate::error::{Error, Result};
use crate::frame::{FrameSize, PixelFormat};

/// The operations a capture device has to offer for the publisher to drive it.
///
/// Sizes are reported in the device's own order, which is what [`SizePolicy::Index`] counts
/// against.
pub trait CaptureDevice {
    fn supported_formats(&self) -> Result<Vec<PixelFormat>>;
    fn supported_frame_sizes(&self, format: PixelFormat) -> Result<Vec<FrameSize>>;
    /// Asks for `format` at `size`. Returns what the device actually settled on, which may
    /// differ from the request.
    fn set_format(&mut self, format: PixelFormat, size: FrameSize) -> Result<(PixelFormat, FrameSize)>;
    fn start_streaming(&mut self) -> Result<()>;
    /// Blocks until a frame is ready or `timeout` passes, in which case it returns
    /// [`Error::Timeout`].
    fn wait_for_frame(&mut self, timeout: Duration) -> Result<()>;
    fn read_frame(&mut self) -> Result<Vec<u8>>;
    fn close(&mut self) -> Result<()>;
}

impl<D: CaptureDevice + ?Sized> CaptureDevice for Box<D> {
    fn supported_formats(&self) -> Result<Vec<PixelFormat>> {
        (**self).supported_formats()
    }
    fn supported_frame_sizes(&self, format: PixelFormat) -> Result<Vec<FrameSize>> {
        (**self).supported_frame_sizes(format)
    }
    fn set_format(&mut self, format: PixelFormat, size: FrameSize) -> Result<(PixelFormat, FrameSize)> {
        (**self).set_format(format, size)
    }
    fn start_streaming(&mut self) -> Result<()> {
        (**self).start_streaming()
    }
    fn wait_for_frame(&mut self, timeout: Duration) -> Result<()> {
        (**self).wait_for_frame(timeout)
    }
    fn read_frame(&mut self) -> Result<Vec<u8>> {
        (**self).read_frame()
    }
    fn close(&mut self) -> Result<()> {
        (**self).close()
    }
}

/// How to pick a frame size out of the list the device reports.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SizePolicy {
    /// The n-th size in device order.
    Index(usize),
    Largest,
    Smallest,
    /// Smallest combined width and height difference.
    Closest(FrameSize),
}

impl Default for SizePolicy {
    fn default() -> SizePolicy {
        SizePolicy::Index(2)
    }
}

impl SizePolicy {
    pub fn select(&self, sizes: &[FrameSize]) -> Result<FrameSize> {
        match *self {
            SizePolicy::Index(index) => sizes.get(index).copied().ok_or(Error::FrameSizeIndex {
                index,
                available: sizes.len(),
            }),
            SizePolicy::Largest => sizes.iter().max_by_key(|s| s.area()).copied().ok_or(Error::FrameSizeIndex {
                index: 0,
                available: 0,
            }),
            SizePolicy::Smallest => sizes.iter().min_by_key(|s| s.area()).copied().ok_or(Error::FrameSizeIndex {
                index: 0,
                available: 0,
            }),
            SizePolicy::Closest(target) => sizes
                .iter()
                .min_by_key(|s| s.width.abs_diff(target.width) + s.height.abs_diff(target.height))
                .copied()
                .ok_or(Error::FrameSizeIndex { index: 0, available: 0 }),
        }
    }
}

impl fmt::Display for SizePolicy {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            SizePolicy::Index(n) => write!(f, "index:{}", n),
            SizePolicy::Largest => write!(f, "largest"),
            SizePolicy::Smallest => write!(f, "smallest"),
            SizePolicy::Closest(size) => write!(f, "closest:{}", size),
        }
    }
}

impl FromStr for SizePolicy {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<SizePolicy, Self::Err> {
        match s.split_once(':') {
            None if s == "largest" => Ok(SizePolicy::Largest),
            None if s == "smallest" => Ok(SizePolicy::Smallest),
            Some(("index", n)) => n
                .parse()
                .map(SizePolicy::Index)
                .map_err(|_| format!("bad frame size index '{}'", n)),
            Some(("closest", size)) => size.parse().map(SizePolicy::Closest),
            _ => Err(format!(
                "unknown size policy '{}' (expected index:N, largest, smallest or closest:WxH)",
                s
            )),
        }
    }
}

/// An open capture device with a negotiated format. Closed on drop.
pub struct Camera<D: CaptureDevice> {
    device: D,
    format: PixelFormat,
    size: FrameSize,
    streaming: bool,
}

impl<D: CaptureDevice> Camera<D> {
    /// Checks the device can produce MJPEG, picks a frame size with `policy` and negotiates it.
    pub fn open(mut device: D, policy: SizePolicy) -> Result<Camera<D>> {
        let wanted = PixelFormat::MJPEG;
        if !device.supported_formats()?.contains(&wanted) {
            return Err(Error::UnsupportedFormat(wanted));
        }

        let sizes = device.supported_frame_sizes(wanted)?;
        log::info!(
            "{} frame sizes: [{}]",
            wanted,
            sizes.iter().map(|s| s.to_string()).collect::<Vec<_>>().join(" ")
        );
        if sizes.is_empty() {
            return Err(Error::NoFrameSizes(wanted));
        }
        let requested = policy.select(&sizes)?;

        let (format, size) = device.set_format(wanted, requested)?;
        if format != wanted {
            return Err(Error::Negotiation(format!("device switched to {} instead of {}", format, wanted)));
        }
        if size != requested {
            log::warn!("device adjusted {} to {}", requested, size);
        }
        log::info!("resulting image format: {} ({})", format, size);

        Ok(Camera {
            device,
            format,
            size,
            streaming: false,
        })
    }

    pub fn start(&mut self) -> Result<()> {
        if self.streaming {
            return Ok(());
        }
        self.device.start_streaming()?;
        self.streaming = true;
        Ok(())
    }

    pub fn wait_for_frame(&mut self, timeout: Duration) -> Result<()> {
        if !self.streaming {
            return Err(Error::NotStarted);
        }
        self.device.wait_for_frame(timeout)
    }

    pub fn read_frame(&mut self) -> Result<Vec<u8>> {
        if !self.streaming {
            return Err(Error::NotStarted);
        }
        self.device.read_frame()
    }

    pub fn format(&self) -> PixelFormat {
        self.format
    }

    pub fn size(&self) -> FrameSize {
        self.size
    }

    pub fn is_streaming(&self) -> bool {
        self.streaming
    }
}

impl<D: CaptureDevice> Drop for Camera<D> {
    fn drop(&mut self) {
        // nothing useful to do with a close error while tearing down
        if let Err(e) = self.device.close() {
            log::warn!("closing camera: {}", e);
        }
    }
}
