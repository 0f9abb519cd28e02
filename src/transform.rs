use image::codecs::jpeg::JpegEncoder;
use image::{imageops, DynamicImage, ImageFormat, RgbaImage};
use rand::rngs::StdRng;
use rand::SeedableRng;

use crate::chart::{ChartState, SeriesRetention};
use crate::error::{Error, Result};

pub const DEFAULT_QUALITY: u8 = 75;

/// Turns a camera JPEG into the published JPEG: the frame with the chart drawn over its
/// top-left corner.
pub struct Compositor {
    chart: ChartState,
    quality: u8,
    rng: StdRng,
}

impl Default for Compositor {
    fn default() -> Compositor {
        Compositor::new(SeriesRetention::default(), DEFAULT_QUALITY)
    }
}

impl Compositor {
    pub fn new(retention: SeriesRetention, quality: u8) -> Compositor {
        Compositor::with_rng(retention, quality, StdRng::from_os_rng())
    }

    /// Same as `new`, but the chart data is reproducible.
    pub fn with_seed(retention: SeriesRetention, quality: u8, seed: u64) -> Compositor {
        Compositor::with_rng(retention, quality, StdRng::seed_from_u64(seed))
    }

    fn with_rng(retention: SeriesRetention, quality: u8, rng: StdRng) -> Compositor {
        Compositor {
            chart: ChartState::new(retention),
            quality: quality.clamp(1, 100),
            rng,
        }
    }

    pub fn quality(&self) -> u8 {
        self.quality
    }

    pub fn compose(&mut self, raw: &[u8]) -> Result<Vec<u8>> {
        let frame = image::load_from_memory_with_format(raw, ImageFormat::Jpeg).map_err(Error::Decode)?;

        let mut canvas = RgbaImage::new(frame.width(), frame.height());
        imageops::overlay(&mut canvas, &frame.to_rgba8(), 0, 0);
        let chart = self.chart.render(&mut self.rng)?;
        // overlay clips whatever hangs off the canvas
        imageops::overlay(&mut canvas, &chart, 0, 0);

        // JPEG has no alpha channel
        let rgb = DynamicImage::ImageRgba8(canvas).to_rgb8();
        let mut out = Vec::with_capacity(raw.len());
        JpegEncoder::new_with_quality(&mut out, self.quality)
            .encode_image(&rgb)
            .map_err(Error::Encode)?;
        Ok(out)
    }
}
