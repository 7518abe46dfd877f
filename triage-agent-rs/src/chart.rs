//! Vitals trend chart rendering
//!
//! Draws SpO2 and heart rate over time onto an RGB canvas and returns the PNG
//! as base64. SpO2 uses a fixed 80-100 % axis; heart rate is scaled to its
//! own range.

use std::io::Cursor;

use base64::Engine as _;
use image::{DynamicImage, ImageOutputFormat, Rgb, RgbImage};
use thiserror::Error;

use crate::clinical::VitalSample;

const WIDTH: u32 = 800;
const HEIGHT: u32 = 400;

const LEFT: i64 = 60;
const RIGHT: i64 = WIDTH as i64 - 60;
const TOP: i64 = 40;
const BOTTOM: i64 = HEIGHT as i64 - 50;

const SPO2_MIN: f64 = 80.0;
const SPO2_MAX: f64 = 100.0;
const HR_PADDING: f64 = 5.0;

const WHITE: Rgb<u8> = Rgb([255, 255, 255]);
const AXIS: Rgb<u8> = Rgb([60, 60, 60]);
const GRID: Rgb<u8> = Rgb([210, 210, 210]);
const TEAL: Rgb<u8> = Rgb([0, 128, 128]);
const ORANGE: Rgb<u8> = Rgb([255, 165, 0]);

#[derive(Error, Debug)]
pub enum ChartError {
    #[error("time_series_data is not a valid vitals list: {0}")]
    InvalidData(String),

    #[error("time_series_data must contain at least one data point.")]
    Empty,

    #[error("PNG encoding failed: {0}")]
    Encode(String),
}

/// Render the vitals chart for a JSON-encoded list of
/// `{"time", "SpO2", "HeartRate"}` objects
pub fn render_vitals_chart(time_series_data: &str) -> Result<String, ChartError> {
    let samples: Vec<VitalSample> =
        serde_json::from_str(time_series_data).map_err(|e| ChartError::InvalidData(e.to_string()))?;
    let png = render_png(&samples)?;
    Ok(base64::engine::general_purpose::STANDARD.encode(png))
}

/// Render the vitals chart as PNG bytes
pub fn render_png(samples: &[VitalSample]) -> Result<Vec<u8>, ChartError> {
    if samples.is_empty() {
        return Err(ChartError::Empty);
    }

    let mut canvas = RgbImage::from_pixel(WIDTH, HEIGHT, WHITE);
    let xs: Vec<i64> = (0..samples.len()).map(|i| x_position(i, samples.len())).collect();

    draw_grid(&mut canvas, &xs);

    let spo2: Vec<(i64, i64)> = samples
        .iter()
        .zip(&xs)
        .filter_map(|(s, x)| s.spo2.map(|v| (*x, scale(v.clamp(SPO2_MIN, SPO2_MAX), SPO2_MIN, SPO2_MAX))))
        .collect();

    let hr_values: Vec<f64> = samples.iter().filter_map(|s| s.heart_rate).collect();
    let hr_low = hr_values.iter().copied().fold(f64::INFINITY, f64::min) - HR_PADDING;
    let hr_high = hr_values.iter().copied().fold(f64::NEG_INFINITY, f64::max) + HR_PADDING;
    let heart_rate: Vec<(i64, i64)> = samples
        .iter()
        .zip(&xs)
        .filter_map(|(s, x)| s.heart_rate.map(|v| (*x, scale(v, hr_low, hr_high))))
        .collect();

    for pair in spo2.windows(2) {
        draw_thick_line(&mut canvas, pair[0], pair[1], TEAL, None);
    }
    for pair in heart_rate.windows(2) {
        draw_thick_line(&mut canvas, pair[0], pair[1], ORANGE, Some(8));
    }

    for &(x, y) in &spo2 {
        draw_dot(&mut canvas, x, y, 4, TEAL);
    }
    for &(x, y) in &heart_rate {
        draw_cross(&mut canvas, x, y, 5, ORANGE);
    }

    encode_png(canvas)
}

fn encode_png(canvas: RgbImage) -> Result<Vec<u8>, ChartError> {
    let mut cursor = Cursor::new(Vec::new());
    DynamicImage::ImageRgb8(canvas)
        .write_to(&mut cursor, ImageOutputFormat::Png)
        .map_err(|e| ChartError::Encode(e.to_string()))?;
    Ok(cursor.into_inner())
}

fn x_position(index: usize, count: usize) -> i64 {
    if count < 2 {
        return (LEFT + RIGHT) / 2;
    }
    LEFT + (RIGHT - LEFT) * index as i64 / (count as i64 - 1)
}

/// Map a value in `[low, high]` to a canvas row
fn scale(value: f64, low: f64, high: f64) -> i64 {
    let span = high - low;
    let fraction = if span > 0.0 { (value - low) / span } else { 0.5 };
    BOTTOM - (fraction * (BOTTOM - TOP) as f64).round() as i64
}

fn draw_grid(canvas: &mut RgbImage, xs: &[i64]) {
    for step in 0..=4 {
        let y = scale(SPO2_MIN + 5.0 * step as f64, SPO2_MIN, SPO2_MAX);
        draw_line(canvas, (LEFT, y), (RIGHT, y), GRID, Some(4));
    }
    for &x in xs {
        draw_line(canvas, (x, TOP), (x, BOTTOM), GRID, Some(4));
    }

    draw_line(canvas, (LEFT, TOP), (LEFT, BOTTOM), AXIS, None);
    draw_line(canvas, (RIGHT, TOP), (RIGHT, BOTTOM), AXIS, None);
    draw_line(canvas, (LEFT, BOTTOM), (RIGHT, BOTTOM), AXIS, None);
    for &x in xs {
        draw_line(canvas, (x, BOTTOM), (x, BOTTOM + 5), AXIS, None);
    }
}

fn put(canvas: &mut RgbImage, x: i64, y: i64, color: Rgb<u8>) {
    if x >= 0 && y >= 0 && x < WIDTH as i64 && y < HEIGHT as i64 {
        canvas.put_pixel(x as u32, y as u32, color);
    }
}

/// Bresenham line; `dash` draws `dash` pixels on, `dash` off
fn draw_line(canvas: &mut RgbImage, from: (i64, i64), to: (i64, i64), color: Rgb<u8>, dash: Option<u32>) {
    let (mut x, mut y) = from;
    let dx = (to.0 - x).abs();
    let dy = -(to.1 - y).abs();
    let sx = if x < to.0 { 1 } else { -1 };
    let sy = if y < to.1 { 1 } else { -1 };
    let mut err = dx + dy;
    let mut step: u32 = 0;

    loop {
        if dash.map_or(true, |d| (step / d) % 2 == 0) {
            put(canvas, x, y, color);
        }
        if x == to.0 && y == to.1 {
            break;
        }
        let e2 = 2 * err;
        if e2 >= dy {
            err += dy;
            x += sx;
        }
        if e2 <= dx {
            err += dx;
            y += sy;
        }
        step += 1;
    }
}

fn draw_thick_line(canvas: &mut RgbImage, from: (i64, i64), to: (i64, i64), color: Rgb<u8>, dash: Option<u32>) {
    for offset in [-1, 0, 1] {
        draw_line(canvas, (from.0, from.1 + offset), (to.0, to.1 + offset), color, dash);
    }
}

fn draw_dot(canvas: &mut RgbImage, cx: i64, cy: i64, radius: i64, color: Rgb<u8>) {
    for y in -radius..=radius {
        for x in -radius..=radius {
            if x * x + y * y <= radius * radius {
                put(canvas, cx + x, cy + y, color);
            }
        }
    }
}

fn draw_cross(canvas: &mut RgbImage, cx: i64, cy: i64, half: i64, color: Rgb<u8>) {
    for offset in [0, 1] {
        draw_line(canvas, (cx - half + offset, cy - half), (cx + half + offset, cy + half), color, None);
        draw_line(canvas, (cx - half + offset, cy + half), (cx + half + offset, cy - half), color, None);
    }
}
