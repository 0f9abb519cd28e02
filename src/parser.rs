use std::time::Duration;

use clap::{Parser, ValueEnum};

use plotstream::camera::SizePolicy;
use plotstream::chart::SeriesRetention;

#[derive(Parser, Debug)]
#[command(version, about = "Serve a webcam feed with a chart drawn over it as MJPEG", long_about = None)]
pub(crate) struct Cli {
    /// Address the HTTP server listens on
    #[arg(long, default_value = "localhost:8080", value_name = "ADDR")]
    pub listen: String,

    /// Capture device path, or "synthetic" for generated frames
    #[arg(long, default_value = "/dev/video0", value_name = "PATH")]
    pub device: String,

    /// Which of the device's MJPEG frame sizes to use: index:N, largest, smallest or closest:WxH
    #[arg(long, default_value_t = SizePolicy::default(), value_name = "POLICY")]
    pub size: SizePolicy,

    /// Seconds to wait for a frame before logging a timeout
    #[arg(long, default_value_t = 5, value_name = "SECS", value_parser = clap::value_parser!(u64).range(1..))]
    pub frame_timeout: u64,

    /// JPEG quality of the published frames
    #[arg(long, default_value_t = 75, value_parser = clap::value_parser!(u8).range(1..=100))]
    pub quality: u8,

    /// Whether each frame's chart replaces the previous series or adds to them
    #[arg(long, value_enum, default_value_t = Retention::Reset)]
    pub retention: Retention,

    /// Minimum milliseconds between two frames sent to one client
    #[arg(long, default_value_t = 50, value_name = "MS")]
    pub interval: u64,

    /// Don't serve /debug/status
    #[arg(long)]
    pub no_diagnostics: bool,
}

impl Cli {
    pub fn frame_timeout(&self) -> Duration {
        Duration::from_secs(self.frame_timeout)
    }

    pub fn interval(&self) -> Duration {
        Duration::from_millis(self.interval)
    }
}

#[derive(ValueEnum, Clone, Copy, Debug, PartialEq, Eq)]
pub enum Retention {
    Reset,
    Accumulate,
}

impl From<Retention> for SeriesRetention {
    fn from(r: Retention) -> SeriesRetention {
        match r {
            Retention::Reset => SeriesRetention::Reset,
            Retention::Accumulate => SeriesRetention::Accumulate,
        }
    }
}
