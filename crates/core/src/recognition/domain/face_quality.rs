//! Face crop quality: sharpness, lighting spread and relative size.
use image::GrayImage;
use imageproc::filter::laplacian_filter;
use imageproc::stats::histogram;

use crate::shared::constants::{QUALITY_REFERENCE_HEIGHT, QUALITY_REFERENCE_WIDTH};
use crate::shared::frame::Frame;

const SHARPNESS_WEIGHT: f64 = 0.5;
const ENTROPY_WEIGHT: f64 = 50.0;
const AREA_WEIGHT: f64 = 50.0;
const ENTROPY_EPSILON: f64 = 1e-10;

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct QualityTerms {
    /// Variance of the Laplacian response.
    pub sharpness: f64,
    /// Shannon entropy (bits) of the 256-bin intensity histogram.
    pub entropy: f64,
    /// Crop area relative to a 640x480 reference frame.
    pub area_ratio: f64,
}

impl QualityTerms {
    pub fn measure(face: &Frame) -> Self {
        let gray = face.to_gray_image();
        Self {
            sharpness: laplacian_variance(&gray),
            entropy: histogram_entropy(&gray),
            area_ratio: area_ratio(face.width(), face.height()),
        }
    }

    pub fn score(&self) -> f64 {
        self.sharpness * SHARPNESS_WEIGHT + self.entropy * ENTROPY_WEIGHT + self.area_ratio * AREA_WEIGHT
    }
}

/// Combined quality score of a face crop. Higher is better.
pub fn face_quality(face: &Frame) -> f64 {
    QualityTerms::measure(face).score()
}

pub fn laplacian_variance(gray: &GrayImage) -> f64 {
    if gray.width() == 0 || gray.height() == 0 {
        return 0.0;
    }
    let response = laplacian_filter(gray);
    let n = (gray.width() as f64) * (gray.height() as f64);
    let (sum, sum_sq) = response.pixels().fold((0.0, 0.0), |(s, sq), p| {
        let v = p[0] as f64;
        (s + v, sq + v * v)
    });
    let mean = sum / n;
    (sum_sq / n - mean * mean).max(0.0)
}

pub fn histogram_entropy(gray: &GrayImage) -> f64 {
    let total = (gray.width() as f64) * (gray.height() as f64);
    if total == 0.0 {
        return 0.0;
    }
    histogram(gray).channels[0]
        .iter()
        .map(|&count| {
            let p = count as f64 / total;
            -p * (p + ENTROPY_EPSILON).log2()
        })
        .sum()
}

pub fn area_ratio(width: u32, height: u32) -> f64 {
    (width as f64 * height as f64) / (QUALITY_REFERENCE_WIDTH as f64 * QUALITY_REFERENCE_HEIGHT as f64)
}
