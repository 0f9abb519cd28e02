use crate::frame::PixelFormat;

#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("could not open capture device {path}: {source}")]
    DeviceOpen {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("capture device does not support {0}")]
    UnsupportedFormat(PixelFormat),
    #[error("device reported no frame sizes for {0}")]
    NoFrameSizes(PixelFormat),
    #[error("frame size #{index} requested, but the device only reports {available}")]
    FrameSizeIndex { index: usize, available: usize },
    #[error("format negotiation failed: {0}")]
    Negotiation(String),
    #[error("capture could not be started: {0}")]
    CaptureStart(String),
    #[error("camera is stopped")]
    NotStarted,
    #[error("camera connection timeout")]
    Timeout,
    #[error("waiting for a frame failed: {0}")]
    Wait(String),
    #[error("frame could not be read: {0}")]
    Read(String),
    #[error("invalid frame data received")]
    FrameData,
    #[error("frame could not be decoded: {0}")]
    Decode(#[source] image::ImageError),
    #[error("frame could not be encoded: {0}")]
    Encode(#[source] image::ImageError),
    #[error("chart could not be rendered: {0}")]
    Chart(String),
    #[error("could not listen on {addr}: {source}")]
    Bind {
        addr: String,
        #[source]
        source: Box<dyn std::error::Error + Send + Sync>,
    },
    #[error("worker thread panicked")]
    Panicked,

    #[error(transparent)]
    IO(#[from] std::io::Error),

    #[error(transparent)]
    Status(#[from] serde_json::Error),
}

impl Error {
    /// Per-frame failures. The publisher drops the frame and keeps going; everything else is
    /// handed back to the supervisor.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            Error::Timeout
                | Error::Read(_)
                | Error::FrameData
                | Error::Decode(_)
                | Error::Encode(_)
                | Error::Chart(_)
        )
    }
}

pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn per_frame_errors_are_transient() {
        assert!(Error::Timeout.is_transient());
        assert!(Error::Read("short buffer".into()).is_transient());
        assert!(Error::Chart("font".into()).is_transient());
    }

    #[test]
    fn acquisition_errors_are_fatal() {
        assert!(!Error::UnsupportedFormat(PixelFormat::MJPEG).is_transient());
        assert!(!Error::FrameSizeIndex { index: 2, available: 1 }.is_transient());
        assert!(!Error::CaptureStart("EBUSY".into()).is_transient());
        assert!(!Error::Wait("ENODEV".into()).is_transient());
    }

    #[test]
    fn frame_size_index_names_both_numbers() {
        let msg = Error::FrameSizeIndex { index: 2, available: 1 }.to_string();
        assert!(msg.contains("#2"));
        assert!(msg.contains('1'));
    }
}
