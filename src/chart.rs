//! The line chart drawn over every frame.
//!
//! plotters' bitmap backend only knows opaque RGB, so the chart is drawn twice, once over black
//! and once over white, and the alpha channel is recovered from the difference between the two.

use std::ops::Range;

use image::{Rgba, RgbaImage};
use plotters::prelude::*;
use rand::Rng;

use crate::error::{Error, Result};

/// Chart resolution in dots per inch. The chart is 5x3 inches.
pub const DPI: u32 = 96;
pub const CHART_WIDTH: u32 = 5 * DPI;
pub const CHART_HEIGHT: u32 = 3 * DPI;

pub const POINTS_PER_SERIES: usize = 15;
pub const SERIES_LABELS: [&str; 3] = ["First", "Second", "Third"];

static FONT: &[u8] = include_bytes!("../assets/DejaVuSans.ttf");

lazy_static::lazy_static! {
    // registered once for the whole process; every chart shares it
    static ref FONT_REGISTERED: bool = match plotters::style::register_font("sans-serif", FontStyle::Normal, FONT) {
        Ok(()) => true,
        Err(_) => {
            log::error!("bundled chart font could not be loaded");
            false
        }
    };
}

/// What happens to the plotted series when a new chart is rendered.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum SeriesRetention {
    /// Each render replaces the series of the previous one.
    #[default]
    Reset,
    /// Each render adds three more series on top of everything drawn so far.
    Accumulate,
}

#[derive(Clone, Debug, PartialEq)]
pub struct Series {
    pub label: &'static str,
    pub points: Vec<(f64, f64)>,
}

/// `n` points with increasing x. Each step moves x forward by up to 1, and y sits up to 10
/// above x.
pub fn random_points<R: Rng + ?Sized>(rng: &mut R, n: usize) -> Vec<(f64, f64)> {
    let mut points = Vec::with_capacity(n);
    let mut x = 0.0;
    for i in 0..n {
        if i == 0 {
            x = rng.random::<f64>();
        } else {
            x += rng.random::<f64>();
        }
        let y = x + 10.0 * rng.random::<f64>();
        points.push((x, y));
    }
    points
}

pub struct ChartState {
    title: String,
    x_label: String,
    y_label: String,
    retention: SeriesRetention,
    series: Vec<Series>,
}

impl Default for ChartState {
    fn default() -> ChartState {
        ChartState::new(SeriesRetention::default())
    }
}

impl ChartState {
    pub fn new(retention: SeriesRetention) -> ChartState {
        ChartState {
            title: "Plotutil example".to_owned(),
            x_label: "X".to_owned(),
            y_label: "Y".to_owned(),
            retention,
            series: Vec::new(),
        }
    }

    pub fn series(&self) -> &[Series] {
        &self.series
    }

    pub fn point_count(&self) -> usize {
        self.series.iter().map(|s| s.points.len()).sum()
    }

    /// Generates a fresh set of series and rasterizes the chart onto a transparent
    /// `CHART_WIDTH` x `CHART_HEIGHT` image.
    pub fn render<R: Rng + ?Sized>(&mut self, rng: &mut R) -> Result<RgbaImage> {
        if self.retention == SeriesRetention::Reset {
            self.series.clear();
        }
        for label in SERIES_LABELS {
            self.series.push(Series {
                label,
                points: random_points(rng, POINTS_PER_SERIES),
            });
        }

        if !*FONT_REGISTERED {
            return Err(Error::Chart("no font available".into()));
        }

        let len = (CHART_WIDTH * CHART_HEIGHT * 3) as usize;
        let mut on_black = vec![0u8; len];
        let mut on_white = vec![0u8; len];
        self.draw(&mut on_black, BLACK)?;
        self.draw(&mut on_white, WHITE)?;

        Ok(matte(&on_black, &on_white))
    }

    fn draw(&self, buf: &mut [u8], background: RGBColor) -> Result<()> {
        let root = BitMapBackend::with_buffer(buf, (CHART_WIDTH, CHART_HEIGHT)).into_drawing_area();
        root.fill(&background).map_err(chart_err)?;

        let (x_range, y_range) = self.bounds();
        let mut chart = ChartBuilder::on(&root)
            .caption(&self.title, ("sans-serif", 16))
            .margin(8)
            .x_label_area_size(32)
            .y_label_area_size(36)
            .build_cartesian_2d(x_range, y_range)
            .map_err(chart_err)?;

        chart
            .configure_mesh()
            .disable_mesh()
            .x_desc(self.x_label.as_str())
            .y_desc(self.y_label.as_str())
            .label_style(("sans-serif", 11))
            .draw()
            .map_err(chart_err)?;

        // only the newest three get a legend entry, otherwise an accumulating chart would be
        // all legend
        let labeled_from = self.series.len().saturating_sub(SERIES_LABELS.len());
        for (i, series) in self.series.iter().enumerate() {
            let color = Palette99::pick(i % SERIES_LABELS.len()).to_rgba();
            let drawn = chart
                .draw_series(LineSeries::new(series.points.iter().copied(), color.stroke_width(1)))
                .map_err(chart_err)?;
            if i >= labeled_from {
                drawn
                    .label(series.label)
                    .legend(move |(x, y)| PathElement::new(vec![(x, y), (x + 16, y)], color.stroke_width(1)));
            }

            let points = series.points.iter().copied();
            match i % 3 {
                0 => chart.draw_series(points.map(|p| Circle::new(p, 2, color.filled()))),
                1 => chart.draw_series(points.map(|p| TriangleMarker::new(p, 3, color.filled()))),
                _ => chart.draw_series(points.map(|p| Cross::new(p, 3, color.stroke_width(1)))),
            }
            .map_err(chart_err)?;
        }

        chart
            .configure_series_labels()
            .position(SeriesLabelPosition::UpperLeft)
            .border_style(BLACK)
            .label_font(("sans-serif", 11))
            .draw()
            .map_err(chart_err)?;

        root.present().map_err(chart_err)?;
        Ok(())
    }

    fn bounds(&self) -> (Range<f64>, Range<f64>) {
        let mut x = (f64::INFINITY, f64::NEG_INFINITY);
        let mut y = (f64::INFINITY, f64::NEG_INFINITY);
        for &(px, py) in self.series.iter().flat_map(|s| s.points.iter()) {
            x = (x.0.min(px), x.1.max(px));
            y = (y.0.min(py), y.1.max(py));
        }
        (padded(x), padded(y))
    }
}

fn padded((lo, hi): (f64, f64)) -> Range<f64> {
    if !lo.is_finite() || !hi.is_finite() {
        return 0.0..1.0;
    }
    if hi - lo < f64::EPSILON {
        return (lo - 0.5)..(hi + 0.5);
    }
    lo..hi
}

fn chart_err<E: std::fmt::Display>(e: E) -> Error {
    Error::Chart(e.to_string())
}

/// Recovers a transparent image from the same drawing over black and over white.
fn matte(on_black: &[u8], on_white: &[u8]) -> RgbaImage {
    RgbaImage::from_fn(CHART_WIDTH, CHART_HEIGHT, |x, y| {
        let i = ((y * CHART_WIDTH + x) * 3) as usize;
        let b = &on_black[i..i + 3];
        let w = &on_white[i..i + 3];
        let spread: u32 = (0..3).map(|c| w[c].saturating_sub(b[c]) as u32).sum();
        let alpha = 255 - (spread / 3).min(255);
        if alpha == 0 {
            return Rgba([0, 0, 0, 0]);
        }
        let unmix = |c: u8| ((c as u32 * 255 / alpha).min(255)) as u8;
        Rgba([unmix(b[0]), unmix(b[1]), unmix(b[2]), alpha as u8])
    })
}
