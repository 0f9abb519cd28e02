use std::io;
use std::time::Duration;

use v4l::buffer::Type;
use v4l::framesize::FrameSizeEnum;
use v4l::io::mmap::Stream as MmapStream;
use v4l::io::traits::{CaptureStream, Stream as StreamTrait};
use v4l::video::Capture;
use v4l::{Device, Format, FourCC};

use crate::camera::CaptureDevice;
use crate::error::{Error, Result};
use crate::frame::{FrameSize, PixelFormat};

const BUFFER_COUNT: u32 = 4;

/// A Video4Linux2 capture device (`/dev/videoN`) read through memory-mapped buffers.
pub struct V4lDevice {
    path: String,
    device: Device,
    stream: Option<MmapStream<'static>>,
    pending: Option<Vec<u8>>,
}

impl V4lDevice {
    pub fn open(path: &str) -> Result<V4lDevice> {
        let device = Device::with_path(path).map_err(|source| Error::DeviceOpen {
            path: path.to_owned(),
            source,
        })?;
        Ok(V4lDevice {
            path: path.to_owned(),
            device,
            stream: None,
            pending: None,
        })
    }
}

impl CaptureDevice for V4lDevice {
    fn supported_formats(&self) -> Result<Vec<PixelFormat>> {
        let formats = self.device.enum_formats()?;
        Ok(formats
            .into_iter()
            .filter_map(|desc| PixelFormat::from_fourcc(desc.fourcc.repr))
            .collect())
    }

    fn supported_frame_sizes(&self, format: PixelFormat) -> Result<Vec<FrameSize>> {
        let sizes = self.device.enum_framesizes(FourCC::new(&format.fourcc()))?;
        Ok(sizes
            .into_iter()
            .map(|size| match size.size {
                FrameSizeEnum::Discrete(d) => FrameSize::new(d.width, d.height),
                // stepwise/continuous ranges only get their upper bound
                FrameSizeEnum::Stepwise(s) => FrameSize::new(s.max_width, s.max_height),
            })
            .collect())
    }

    fn set_format(&mut self, format: PixelFormat, size: FrameSize) -> Result<(PixelFormat, FrameSize)> {
        let requested = Format::new(size.width, size.height, FourCC::new(&format.fourcc()));
        let actual = self
            .device
            .set_format(&requested)
            .map_err(|e| Error::Negotiation(e.to_string()))?;
        let actual_format = PixelFormat::from_fourcc(actual.fourcc.repr)
            .ok_or_else(|| Error::Negotiation(format!("driver chose unknown format {}", actual.fourcc)))?;
        Ok((actual_format, FrameSize::new(actual.width, actual.height)))
    }

    fn start_streaming(&mut self) -> Result<()> {
        let mut stream = MmapStream::with_buffers(&self.device, Type::VideoCapture, BUFFER_COUNT)
            .map_err(|e| Error::CaptureStart(format!("{}: {}", self.path, e)))?;
        // Once the stream is on, the first dequeue re-queues buffer 0 itself, so only the rest
        // go in here.
        for index in 1..BUFFER_COUNT as usize {
            CaptureStream::queue(&mut stream, index)
                .map_err(|e| Error::CaptureStart(format!("{}: queueing buffer {}: {}", self.path, index, e)))?;
        }
        StreamTrait::start(&mut stream).map_err(|e| Error::CaptureStart(format!("{}: {}", self.path, e)))?;
        self.stream = Some(stream);
        Ok(())
    }

    fn wait_for_frame(&mut self, timeout: Duration) -> Result<()> {
        let stream = self.stream.as_mut().ok_or(Error::NotStarted)?;
        stream.set_timeout(timeout);
        match stream.next() {
            Ok((buf, meta)) => {
                let used = (meta.bytesused as usize).min(buf.len());
                self.pending = Some(buf[..used].to_vec());
                Ok(())
            }
            Err(e) if e.kind() == io::ErrorKind::TimedOut => Err(Error::Timeout),
            Err(e) => Err(Error::Wait(format!("{}: {}", self.path, e))),
        }
    }

    fn read_frame(&mut self) -> Result<Vec<u8>> {
        self.pending
            .take()
            .ok_or_else(|| Error::Read("no frame ready".into()))
    }

    fn close(&mut self) -> Result<()> {
        self.pending = None;
        // dropping the stream turns streaming off and unmaps the buffers
        self.stream = None;
        Ok(())
    }
}
