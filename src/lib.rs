pub mod camera;
pub mod chart;
pub mod error;
pub mod frame;
pub mod publisher;
pub mod stream;
pub mod synthetic;
pub mod transform;
pub mod worker;

#[cfg(feature = "v4l")]
pub mod v4l2;

pub use crate::camera::{Camera, CaptureDevice, SizePolicy};
pub use crate::error::{Error, Result};
pub use crate::frame::{FrameSize, PixelFormat};
pub use crate::publisher::{Publisher, PublisherState};
pub use crate::stream::{MjpegStream, ServerConfig, StreamServer};
pub use crate::transform::Compositor;
