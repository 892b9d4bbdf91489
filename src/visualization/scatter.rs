//! Scatter plots
//!
//! Renders labelled 2D points into an RGB raster and writes PNG files.
//! Titles and axis labels are set in DejaVu Sans, which covers Latin and
//! Cyrillic text.

use ab_glyph::{FontRef, PxScale};
use image::{imageops, ImageFormat, Rgb, RgbImage};
use imageproc::drawing::{
    draw_filled_circle_mut, draw_hollow_rect_mut, draw_line_segment_mut, draw_text_mut, text_size,
};
use imageproc::rect::Rect;
use ndarray::{Array1, ArrayView1};
use serde::{Deserialize, Serialize};
use std::path::Path;

use crate::error::{MlopsError, Result};

/// Viridis anchor colours, dark to light
const VIRIDIS: [[u8; 3]; 5] = [
    [0x44, 0x01, 0x54],
    [0x3b, 0x52, 0x8b],
    [0x21, 0x91, 0x8c],
    [0x5e, 0xc9, 0x62],
    [0xfd, 0xe7, 0x25],
];

const BACKGROUND: Rgb<u8> = Rgb([255, 255, 255]);
const FRAME: Rgb<u8> = Rgb([51, 51, 51]);
const GRID: Rgb<u8> = Rgb([225, 225, 225]);
const TEXT: Rgb<u8> = Rgb([30, 30, 30]);

static FONT_DATA: &[u8] = include_bytes!("../../assets/fonts/DejaVuSans.ttf");

/// Scatter plot configuration parameters
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScatterConfig {
    /// Image width in pixels
    pub width: u32,
    /// Image height in pixels
    pub height: u32,
    /// Blank border around the plot area
    pub margin: u32,
    pub marker_radius: u32,
    /// Fraction of the data range added on each side
    pub padding: f64,
    /// Grid lines per axis inside the frame
    pub grid_lines: u32,
    /// Glyph height of the title and axis labels
    pub font_size: f32,
}

impl Default for ScatterConfig {
    fn default() -> Self {
        Self {
            width: 640,
            height: 480,
            margin: 40,
            marker_radius: 4,
            padding: 0.05,
            grid_lines: 4,
            font_size: 16.0,
        }
    }
}

/// A labelled point
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ScatterPoint {
    pub x: f64,
    pub y: f64,
    pub class: usize,
}

/// 2D scatter plot coloured by class
#[derive(Debug, Clone)]
pub struct ScatterPlot {
    config: ScatterConfig,
    points: Vec<ScatterPoint>,
    title: Option<String>,
    x_label: Option<String>,
    y_label: Option<String>,
}

impl ScatterPlot {
    pub fn new(config: ScatterConfig) -> Self {
        Self {
            config,
            points: Vec::new(),
            title: None,
            x_label: None,
            y_label: None,
        }
    }

    /// Centred above the plot area
    pub fn with_title(mut self, title: impl Into<String>) -> Self {
        self.title = Some(title.into());
        self
    }

    /// Horizontal label under the plot area, vertical label left of it
    pub fn with_axis_labels(mut self, x_label: impl Into<String>, y_label: impl Into<String>) -> Self {
        self.x_label = Some(x_label.into());
        self.y_label = Some(y_label.into());
        self
    }

    /// Build a plot with the default configuration from parallel columns
    pub fn from_columns(x: ArrayView1<f64>, y: ArrayView1<f64>, classes: &Array1<usize>) -> Result<Self> {
        if x.len() != y.len() || x.len() != classes.len() {
            return Err(MlopsError::ShapeError {
                expected: format!("{} points in every column", x.len()),
                actual: format!("y: {}, classes: {}", y.len(), classes.len()),
            });
        }

        let mut plot = Self::new(ScatterConfig::default());
        for ((&px, &py), &class) in x.iter().zip(y.iter()).zip(classes.iter()) {
            plot.add_point(px, py, class);
        }
        Ok(plot)
    }

    pub fn add_point(&mut self, x: f64, y: f64, class: usize) {
        self.points.push(ScatterPoint { x, y, class });
    }

    /// Rasterize the plot
    pub fn render(&self) -> Result<RgbImage> {
        let cfg = &self.config;
        if self.points.is_empty() {
            return Err(MlopsError::PlotError("no points to plot".to_string()));
        }
        if self.points.iter().any(|p| !p.x.is_finite() || !p.y.is_finite()) {
            return Err(MlopsError::PlotError("points must be finite".to_string()));
        }
        if cfg.width <= 2 * cfg.margin + 1 || cfg.height <= 2 * cfg.margin + 1 {
            return Err(MlopsError::PlotError(format!(
                "{}x{} image leaves no room inside a {} pixel margin",
                cfg.width, cfg.height, cfg.margin
            )));
        }

        let (x_min, x_max) = padded_range(self.points.iter().map(|p| p.x), cfg.padding);
        let (y_min, y_max) = padded_range(self.points.iter().map(|p| p.y), cfg.padding);

        let left = cfg.margin;
        let right = cfg.width - cfg.margin - 1;
        let top = cfg.margin;
        let bottom = cfg.height - cfg.margin - 1;

        let mut img = RgbImage::from_pixel(cfg.width, cfg.height, BACKGROUND);

        for i in 1..cfg.grid_lines.saturating_add(1) {
            let gx = (left + (right - left) * i / (cfg.grid_lines + 1)) as f32;
            let gy = (top + (bottom - top) * i / (cfg.grid_lines + 1)) as f32;
            draw_line_segment_mut(&mut img, (gx, top as f32), (gx, bottom as f32), GRID);
            draw_line_segment_mut(&mut img, (left as f32, gy), (right as f32, gy), GRID);
        }

        let frame = Rect::at(left as i32, top as i32).of_size(right - left + 1, bottom - top + 1);
        draw_hollow_rect_mut(&mut img, frame, FRAME);

        let mut labels: Vec<usize> = self.points.iter().map(|p| p.class).collect();
        labels.sort_unstable();
        labels.dedup();

        for p in &self.points {
            let px = left as f64 + (p.x - x_min) / (x_max - x_min) * (right - left) as f64;
            let py = bottom as f64 - (p.y - y_min) / (y_max - y_min) * (bottom - top) as f64;
            let rank = labels.binary_search(&p.class).unwrap_or(0);
            let color = class_color(rank, labels.len());
            draw_filled_circle_mut(
                &mut img,
                (px.round() as i32, py.round() as i32),
                cfg.marker_radius as i32,
                color,
            );
        }

        if self.title.is_some() || self.x_label.is_some() || self.y_label.is_some() {
            self.draw_text(&mut img, left, right, top, bottom)?;
        }

        Ok(img)
    }

    fn draw_text(&self, img: &mut RgbImage, left: u32, right: u32, top: u32, bottom: u32) -> Result<()> {
        let font = FontRef::try_from_slice(FONT_DATA)
            .map_err(|e| MlopsError::PlotError(format!("cannot load font: {}", e)))?;
        let scale = PxScale::from(self.config.font_size);
        let margin = self.config.margin;
        let centre_x = (left + right) / 2;
        let centre_y = (top + bottom) / 2;

        if let Some(title) = &self.title {
            let (w, h) = text_size(scale, &font, title);
            let x = centre_x as i32 - w as i32 / 2;
            let y = (margin.saturating_sub(h) / 2) as i32;
            draw_text_mut(img, TEXT, x, y, scale, &font, title);
        }

        if let Some(label) = &self.x_label {
            let (w, h) = text_size(scale, &font, label);
            let x = centre_x as i32 - w as i32 / 2;
            let y = (bottom + 1 + margin.saturating_sub(h) / 2) as i32;
            draw_text_mut(img, TEXT, x, y, scale, &font, label);
        }

        if let Some(label) = &self.y_label {
            // drawn horizontally, then turned to read bottom to top
            let (w, h) = text_size(scale, &font, label);
            let mut strip = RgbImage::from_pixel(w.max(1), h.max(1), BACKGROUND);
            draw_text_mut(&mut strip, TEXT, 0, 0, scale, &font, label);
            let rotated = imageops::rotate270(&strip);
            let x = margin.saturating_sub(rotated.width()) / 2;
            let y = centre_y as i64 - rotated.height() as i64 / 2;
            imageops::overlay(img, &rotated, x as i64, y);
        }

        Ok(())
    }

    /// Render and write a PNG file
    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        self.render()?.save_with_format(path.as_ref(), ImageFormat::Png)?;
        Ok(())
    }
}

/// Colour for the `rank`-th of `n_classes` classes, spread over viridis
pub fn class_color(rank: usize, n_classes: usize) -> Rgb<u8> {
    if n_classes <= 1 {
        return Rgb(VIRIDIS[0]);
    }
    let t = rank.min(n_classes - 1) as f64 / (n_classes - 1) as f64;
    let scaled = t * (VIRIDIS.len() - 1) as f64;
    let lo = (scaled.floor() as usize).min(VIRIDIS.len() - 2);
    let frac = scaled - lo as f64;

    let mut rgb = [0u8; 3];
    for (c, out) in rgb.iter_mut().enumerate() {
        let a = VIRIDIS[lo][c] as f64;
        let b = VIRIDIS[lo + 1][c] as f64;
        *out = (a + (b - a) * frac).round() as u8;
    }
    Rgb(rgb)
}

fn padded_range(values: impl Iterator<Item = f64>, padding: f64) -> (f64, f64) {
    let (min, max) = values.fold((f64::INFINITY, f64::NEG_INFINITY), |(lo, hi), v| (lo.min(v), hi.max(v)));
    let span = max - min;
    if span <= f64::EPSILON {
        return (min - 0.5, max + 0.5);
    }
    (min - span * padding, max + span * padding)
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;

    #[test]
    fn test_class_colors_span_viridis() {
        assert_eq!(class_color(0, 3), Rgb([0x44, 0x01, 0x54]));
        assert_eq!(class_color(1, 3), Rgb([0x21, 0x91, 0x8c]));
        assert_eq!(class_color(2, 3), Rgb([0xfd, 0xe7, 0x25]));
        assert_eq!(class_color(0, 1), Rgb([0x44, 0x01, 0x54]));
    }

    #[test]
    fn test_render_draws_markers_inside_frame() {
        let x = array![1.0, 2.0, 3.0];
        let y = array![1.0, 2.0, 3.0];
        let classes = array![0, 1, 2];
        let plot = ScatterPlot::from_columns(x.view(), y.view(), &classes).unwrap();
        let img = plot.render().unwrap();

        assert_eq!(img.dimensions(), (640, 480));
        assert_eq!(*img.get_pixel(0, 0), BACKGROUND);
        assert_eq!(*img.get_pixel(40, 40), FRAME);

        // midpoint of the data lands at the centre of the plot area
        let cx = 40 + (599 - 40) / 2;
        let cy = 40 + (439 - 40) / 2;
        assert_eq!(*img.get_pixel(cx as u32, cy as u32), class_color(1, 3));

        // padding keeps the extreme points off the frame
        let purple = class_color(0, 3);
        assert_ne!(*img.get_pixel(40, 439), purple);
    }

    fn has_ink(img: &RgbImage, x0: u32, y0: u32, x1: u32, y1: u32) -> bool {
        (y0..y1).any(|y| (x0..x1).any(|x| *img.get_pixel(x, y) != BACKGROUND))
    }

    fn diagonal_plot() -> ScatterPlot {
        let x = array![1.0, 2.0, 3.0];
        let y = array![1.0, 2.0, 3.0];
        let classes = array![0, 1, 2];
        ScatterPlot::from_columns(x.view(), y.view(), &classes).unwrap()
    }

    #[test]
    fn test_margins_blank_without_labels() {
        let img = diagonal_plot().render().unwrap();
        assert!(!has_ink(&img, 0, 0, 640, 35));
        assert!(!has_ink(&img, 0, 445, 640, 480));
        assert!(!has_ink(&img, 0, 45, 35, 435));
    }

    #[test]
    fn test_title_and_axis_labels_are_drawn() {
        let img = diagonal_plot()
            .with_title("Результаты классификации ирисов")
            .with_axis_labels("Параметр 1", "Параметр 2")
            .render()
            .unwrap();

        assert!(has_ink(&img, 100, 0, 540, 39), "title missing");
        assert!(has_ink(&img, 200, 441, 440, 480), "x label missing");
        assert!(has_ink(&img, 0, 100, 39, 380), "y label missing");
        // text stays in the margins
        assert_eq!(*img.get_pixel(40, 40), FRAME);
        assert!(!has_ink(&img, 0, 0, 90, 20));
    }

    #[test]
    fn test_constant_column_still_renders() {
        let x = array![2.0, 2.0];
        let y = array![0.0, 1.0];
        let classes = array![0, 0];
        let plot = ScatterPlot::from_columns(x.view(), y.view(), &classes).unwrap();
        assert!(plot.render().is_ok());
    }

    #[test]
    fn test_rejects_empty_and_non_finite() {
        let plot = ScatterPlot::new(ScatterConfig::default());
        assert!(matches!(plot.render(), Err(MlopsError::PlotError(_))));

        let mut plot = ScatterPlot::new(ScatterConfig::default());
        plot.add_point(f64::NAN, 0.0, 0);
        assert!(matches!(plot.render(), Err(MlopsError::PlotError(_))));
    }

    #[test]
    fn test_length_mismatch() {
        let x = array![1.0, 2.0];
        let y = array![1.0];
        let classes = array![0, 1];
        assert!(ScatterPlot::from_columns(x.view(), y.view(), &classes).is_err());
    }

    #[test]
    fn test_save_png() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("plot.png");
        let x = array![0.0, 1.0];
        let y = array![0.0, 1.0];
        let classes = array![0, 1];
        ScatterPlot::from_columns(x.view(), y.view(), &classes)
            .unwrap()
            .save(&path)
            .unwrap();

        let bytes = std::fs::read(&path).unwrap();
        assert_eq!(&bytes[..8], b"\x89PNG\r\n\x1a\n");
    }
}
