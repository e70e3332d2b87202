//! Canny edge detection over grayscale rasters
//!
//! Produces the structural hint fed to the edge-completion model. Smoothing and
//! Sobel gradients come from `imageproc`; non-maximum suppression and hysteresis
//! are local so the Gaussian sigma stays configurable. Thresholds apply to
//! gradient magnitudes on the `[0, 1]` intensity scale.

use image::{GrayImage, ImageBuffer, Luma};
use imageproc::definitions::Image;
use imageproc::filter::gaussian_blur_f32;
use imageproc::gradients::{horizontal_sobel, vertical_sobel};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;

/// Canny detector parameters
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CannyOptions {
    /// Standard deviation of the Gaussian pre-filter
    pub sigma: f32,
    /// Gradient magnitude above which a pixel may continue an edge
    pub low_threshold: f32,
    /// Gradient magnitude above which a pixel seeds an edge
    pub high_threshold: f32,
}

impl Default for CannyOptions {
    fn default() -> Self {
        Self {
            sigma: 1.0,
            low_threshold: 0.1,
            high_threshold: 0.2,
        }
    }
}

type Magnitudes = Image<Luma<f32>>;

/// Gradient magnitudes scaled to the `[0, 1]` intensity range, plus the raw
/// Sobel responses used for direction binning
fn gradients(smoothed: &GrayImage) -> (Magnitudes, Image<Luma<i16>>, Image<Luma<i16>>) {
    let gx = horizontal_sobel(smoothed);
    let gy = vertical_sobel(smoothed);
    let magnitude = ImageBuffer::from_fn(smoothed.width(), smoothed.height(), |x, y| {
        let dx = f32::from(gx.get_pixel(x, y)[0]);
        let dy = f32::from(gy.get_pixel(x, y)[0]);
        Luma([dx.hypot(dy) / 255.0])
    });
    (magnitude, gx, gy)
}

/// Neighbour offsets along the gradient direction, quantized to 0/45/90/135 degrees
fn direction_offsets(gx: f32, gy: f32) -> ((i64, i64), (i64, i64)) {
    let mut angle = gy.atan2(gx).to_degrees();
    if angle < 0.0 {
        angle += 180.0;
    }
    if !(22.5..157.5).contains(&angle) {
        ((1, 0), (-1, 0))
    } else if angle < 67.5 {
        ((1, 1), (-1, -1))
    } else if angle < 112.5 {
        ((0, 1), (0, -1))
    } else {
        ((-1, 1), (1, -1))
    }
}

/// Thin gradient magnitudes to local maxima; the one-pixel border is never kept
fn non_maximum_suppression(
    magnitude: &Magnitudes,
    gx: &Image<Luma<i16>>,
    gy: &Image<Luma<i16>>,
) -> Magnitudes {
    let (width, height) = magnitude.dimensions();
    let mut thinned = Magnitudes::new(width, height);
    if width < 3 || height < 3 {
        return thinned;
    }

    // Interior pixels only, so every neighbour offset stays in bounds
    let shift = |v: u32, d: i64| (i64::from(v) + d) as u32;
    for y in 1..height - 1 {
        for x in 1..width - 1 {
            let m = magnitude.get_pixel(x, y)[0];
            if m <= 0.0 {
                continue;
            }
            let ((ax, ay), (bx, by)) = direction_offsets(
                f32::from(gx.get_pixel(x, y)[0]),
                f32::from(gy.get_pixel(x, y)[0]),
            );
            let a = magnitude.get_pixel(shift(x, ax), shift(y, ay))[0];
            let b = magnitude.get_pixel(shift(x, bx), shift(y, by))[0];
            if m >= a && m >= b {
                thinned.put_pixel(x, y, Luma([m]));
            }
        }
    }
    thinned
}

fn hysteresis(thinned: &Magnitudes, low: f32, high: f32) -> GrayImage {
    let (width, height) = thinned.dimensions();
    let mut edges = GrayImage::new(width, height);
    let mut queue = VecDeque::new();

    for (x, y, pixel) in thinned.enumerate_pixels() {
        let m = pixel[0];
        if m > 0.0 && m >= high {
            edges.put_pixel(x, y, Luma([255]));
            queue.push_back((x, y));
        }
    }

    while let Some((x, y)) = queue.pop_front() {
        for ny in y.saturating_sub(1)..=(y + 1).min(height - 1) {
            for nx in x.saturating_sub(1)..=(x + 1).min(width - 1) {
                let m = thinned.get_pixel(nx, ny)[0];
                if edges.get_pixel(nx, ny)[0] == 0 && m > 0.0 && m >= low {
                    edges.put_pixel(nx, ny, Luma([255]));
                    queue.push_back((nx, ny));
                }
            }
        }
    }
    edges
}

/// Run the Canny detector and return a binary (0/255) edge map of the same size
#[must_use]
pub fn canny(gray: &GrayImage, options: &CannyOptions) -> GrayImage {
    let (width, height) = gray.dimensions();
    // No interior pixel survives suppression below 3x3
    if width < 3 || height < 3 {
        return GrayImage::new(width, height);
    }

    let smoothed = gaussian_blur_f32(gray, options.sigma);
    let (magnitude, gx, gy) = gradients(&smoothed);
    let thinned = non_maximum_suppression(&magnitude, &gx, &gy);
    hysteresis(&thinned, options.low_threshold, options.high_threshold)
}
