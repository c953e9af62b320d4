// src/blur.rs

use image::{DynamicImage, GrayImage, Luma};
use serde::Serialize;

pub const DEFAULT_BLUR_THRESHOLD: f64 = 100.0;

/// Sharpness measurement of a full page.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct BlurReport {
    pub variance: f64,
    pub threshold: f64,
    pub is_blurry: bool,
}

/// ITU-R BT.601 luma, the weighting scanners and OpenCV use for gray.
pub fn to_gray(image: &DynamicImage) -> GrayImage {
    let rgb = image.to_rgb8();
    GrayImage::from_fn(rgb.width(), rgb.height(), |x, y| {
        let [r, g, b] = rgb.get_pixel(x, y).0;
        let l = 0.299 * r as f64 + 0.587 * g as f64 + 0.114 * b as f64;
        Luma([l.round().clamp(0.0, 255.0) as u8])
    })
}

/// Mirror index `i` into `0..n` without repeating the edge pixel.
fn reflect101(i: i64, n: i64) -> u32 {
    if n == 1 {
        return 0;
    }
    let r = if i < 0 {
        -i
    } else if i >= n {
        2 * n - 2 - i
    } else {
        i
    };
    r as u32
}

/// Variance of the 4-neighbour Laplacian `[0,1,0; 1,-4,1; 0,1,0]` over
/// every pixel, with reflected borders.
pub fn laplacian_variance(gray: &GrayImage) -> f64 {
    let (w, h) = (gray.width() as i64, gray.height() as i64);
    if w == 0 || h == 0 {
        return 0.0;
    }

    let px = |x: i64, y: i64| gray.get_pixel(reflect101(x, w), reflect101(y, h)).0[0] as f64;

    let mut sum = 0.0f64;
    let mut sum_sq = 0.0f64;
    for y in 0..h {
        for x in 0..w {
            let lap = px(x, y - 1) + px(x, y + 1) + px(x - 1, y) + px(x + 1, y) - 4.0 * px(x, y);
            sum += lap;
            sum_sq += lap * lap;
        }
    }

    let count = (w * h) as f64;
    let mean = sum / count;
    (sum_sq / count - mean * mean).max(0.0)
}

/// Classify a page as blurry when its Laplacian variance is below `threshold`.
pub fn assess(image: &DynamicImage, threshold: f64) -> BlurReport {
    let variance = laplacian_variance(&to_gray(image));
    BlurReport {
        variance,
        threshold,
        is_blurry: variance < threshold,
    }
}
