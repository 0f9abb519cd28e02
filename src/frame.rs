use std::fmt;
use std::str::FromStr;

use serde::Serialize;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize)]
pub enum PixelFormat {
    RGB,
    BGR,
    YUYV,
    MJPEG,
}

impl PixelFormat {
    /// Returns the FourCC code for this pixel format, as the kernel spells it.
    pub fn fourcc(&self) -> [u8; 4] {
        match self {
            PixelFormat::RGB => *b"RGB3",
            PixelFormat::BGR => *b"BGR3",
            PixelFormat::YUYV => *b"YUYV",
            PixelFormat::MJPEG => *b"MJPG",
        }
    }

    /// The FourCC packed into a little-endian u32, which is what drivers report.
    pub fn code(&self) -> u32 {
        u32::from_le_bytes(self.fourcc())
    }

    pub fn from_fourcc(fourcc: [u8; 4]) -> Option<PixelFormat> {
        [PixelFormat::RGB, PixelFormat::BGR, PixelFormat::YUYV, PixelFormat::MJPEG]
            .into_iter()
            .find(|f| f.fourcc() == fourcc)
    }
}

impl fmt::Display for PixelFormat {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", String::from_utf8_lossy(&self.fourcc()))
    }
}

impl FromStr for PixelFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<PixelFormat, Self::Err> {
        let s = s.to_uppercase();
        let bytes: [u8; 4] = s
            .as_bytes()
            .try_into()
            .map_err(|_| format!("not a recognized fourcc code ({})", s))?;
        PixelFormat::from_fourcc(bytes).ok_or_else(|| format!("not a recognized fourcc code ({})", s))
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
pub struct FrameSize {
    pub width: u32,
    pub height: u32,
}

impl FrameSize {
    pub fn new(width: u32, height: u32) -> FrameSize {
        FrameSize { width, height }
    }

    pub fn area(&self) -> u64 {
        self.width as u64 * self.height as u64
    }
}

impl fmt::Display for FrameSize {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}x{}", self.width, self.height)
    }
}

impl FromStr for FrameSize {
    type Err = String;

    fn from_str(s: &str) -> Result<FrameSize, Self::Err> {
        let (w, h) = s
            .split_once(['x', 'X'])
            .ok_or_else(|| format!("expected WIDTHxHEIGHT, got '{}'", s))?;
        let width = w.trim().parse().map_err(|_| format!("bad width '{}'", w))?;
        let height = h.trim().parse().map_err(|_| format!("bad height '{}'", h))?;
        Ok(FrameSize { width, height })
    }
}

/// True if `data` is a complete JPEG image: starts with SOI and ends with EOI.
// Some UVC cameras pad the buffer after EOI, so trailing zeros are tolerated.
pub fn is_complete_jpeg(data: &[u8]) -> bool {
    let end = data.iter().rposition(|&b| b != 0).map_or(0, |i| i + 1);
    let data = &data[..end];
    data.len() >= 4 && data.starts_with(&[0xFF, 0xD8]) && data.ends_with(&[0xFF, 0xD9])
}
