use image::imageops::{self, FilterType};
use image::{GrayImage, Luma, RgbImage};
use ndarray::{Array2, ArrayView3};

use super::bbox::BBox;

/// A single video frame: contiguous RGB bytes in row-major order.
///
/// Format conversion happens at I/O boundaries only; the pipeline treats
/// pixel data as opaque and shares frames immutably between stages.
#[derive(Clone, Debug)]
pub struct Frame {
    data: Vec<u8>,
    width: u32,
    height: u32,
    channels: u8,
    index: usize,
}

impl Frame {
    pub fn new(data: Vec<u8>, width: u32, height: u32, channels: u8, index: usize) -> Self {
        debug_assert_eq!(
            data.len(),
            (width as usize) * (height as usize) * (channels as usize),
            "data length must equal width * height * channels"
        );
        Self {
            data,
            width,
            height,
            channels,
            index,
        }
    }

    pub fn data(&self) -> &[u8] {
        &self.data
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn channels(&self) -> u8 {
        self.channels
    }

    pub fn index(&self) -> usize {
        self.index
    }

    pub fn with_index(mut self, index: usize) -> Self {
        self.index = index;
        self
    }

    pub fn as_ndarray(&self) -> ArrayView3<'_, u8> {
        ArrayView3::from_shape(self.shape(), &self.data)
            .expect("Frame data length must match dimensions")
    }

    /// Copies the part of the frame covered by `bbox`, clamped to the frame.
    ///
    /// Returns `None` when nothing of the box lies inside the frame.
    pub fn crop(&self, bbox: &BBox) -> Option<Frame> {
        let clamped = bbox.clamp_to(self.width, self.height)?;
        let ch = self.channels as usize;
        let src_w = self.width as usize;
        let x = clamped.x as usize;
        let y = clamped.y as usize;
        let w = clamped.width as usize;
        let h = clamped.height as usize;

        let mut data = Vec::with_capacity(w * h * ch);
        for row in y..y + h {
            let start = (row * src_w + x) * ch;
            data.extend_from_slice(&self.data[start..start + w * ch]);
        }
        Some(Frame::new(data, w as u32, h as u32, self.channels, self.index))
    }

    /// Resamples the frame to exactly `width` x `height`.
    ///
    /// The triangle filter widens with the scale factor, so a downscale
    /// averages every source pixel under each output pixel.
    pub fn resized(&self, width: u32, height: u32) -> Frame {
        if width == self.width && height == self.height {
            return self.clone();
        }
        match self.to_rgb_image() {
            Some(img) => {
                let out = imageops::resize(&img, width.max(1), height.max(1), FilterType::Triangle);
                Frame::from_rgb_image(out, self.index)
            }
            None => self.resized_nearest(width.max(1), height.max(1)),
        }
    }

    /// Target size for showing this frame inside `max_width` x `max_height`.
    ///
    /// Aspect ratio is preserved and frames are never upscaled.
    pub fn fit_within(&self, max_width: u32, max_height: u32) -> (u32, u32) {
        fit_within(self.width, self.height, max_width, max_height)
    }

    /// Luma plane (BT.601 weights) as `[height, width]`.
    pub fn to_gray(&self) -> Array2<f32> {
        let src = self.as_ndarray();
        let (h, w) = (self.height as usize, self.width as usize);
        if self.channels < 3 {
            return Array2::from_shape_fn((h, w), |(y, x)| src[[y, x, 0]] as f32);
        }
        Array2::from_shape_fn((h, w), |(y, x)| {
            0.299 * src[[y, x, 0]] as f32 + 0.587 * src[[y, x, 1]] as f32 + 0.114 * src[[y, x, 2]] as f32
        })
    }

    /// Luma plane as an 8-bit image for `imageproc` filters.
    pub fn to_gray_image(&self) -> GrayImage {
        let gray = self.to_gray();
        GrayImage::from_fn(self.width, self.height, |x, y| {
            Luma([gray[[y as usize, x as usize]].round().clamp(0.0, 255.0) as u8])
        })
    }

    pub fn to_rgb_image(&self) -> Option<RgbImage> {
        if self.channels != 3 {
            return None;
        }
        RgbImage::from_raw(self.width, self.height, self.data.clone())
    }

    pub fn from_rgb_image(img: RgbImage, index: usize) -> Frame {
        let (width, height) = img.dimensions();
        Frame::new(img.into_raw(), width, height, 3, index)
    }

    fn resized_nearest(&self, width: u32, height: u32) -> Frame {
        let ch = self.channels as usize;
        let (src_w, src_h) = (self.width as usize, self.height as usize);
        let mut data = Vec::with_capacity(width as usize * height as usize * ch);
        for y in 0..height as usize {
            let sy = (y * src_h / height as usize).min(src_h.saturating_sub(1));
            for x in 0..width as usize {
                let sx = (x * src_w / width as usize).min(src_w.saturating_sub(1));
                let offset = (sy * src_w + sx) * ch;
                data.extend_from_slice(&self.data[offset..offset + ch]);
            }
        }
        Frame::new(data, width, height, self.channels, self.index)
    }

    fn shape(&self) -> (usize, usize, usize) {
        (
            self.height as usize,
            self.width as usize,
            self.channels as usize,
        )
    }
}

/// Aspect-preserving downscale of `width` x `height` into the given bound.
pub fn fit_within(width: u32, height: u32, max_width: u32, max_height: u32) -> (u32, u32) {
    if width == 0 || height == 0 || (width <= max_width && height <= max_height) {
        return (width, height);
    }
    let scale = (max_width as f64 / width as f64).min(max_height as f64 / height as f64);
    let w = ((width as f64 * scale) as u32).max(1);
    let h = ((height as f64 * scale) as u32).max(1);
    (w, h)
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn solid(width: u32, height: u32, value: u8) -> Frame {
        Frame::new(
            vec![value; (width * height * 3) as usize],
            width,
            height,
            3,
            0,
        )
    }

    #[test]
    fn test_construction_and_accessors() {
        let data = vec![0u8; 12]; // 2x2x3
        let frame = Frame::new(data.clone(), 2, 2, 3, 5);
        assert_eq!(frame.width(), 2);
        assert_eq!(frame.height(), 2);
        assert_eq!(frame.channels(), 3);
        assert_eq!(frame.index(), 5);
        assert_eq!(frame.data(), &data[..]);
    }

    #[test]
    #[should_panic(expected = "data length must equal width * height * channels")]
    fn test_mismatched_data_length_panics_in_debug() {
        let data = vec![0u8; 10]; // wrong size for 2x2x3
        Frame::new(data, 2, 2, 3, 0);
    }

    #[test]
    fn test_as_ndarray_pixel_access() {
        // 2x2 RGB: set pixel (row=1, col=0) to red
        let mut data = vec![0u8; 12];
        data[6] = 255;
        let frame = Frame::new(data, 2, 2, 3, 0);
        let arr = frame.as_ndarray();
        assert_eq!(arr.shape(), &[2, 2, 3]);
        assert_eq!(arr[[1, 0, 0]], 255);
        assert_eq!(arr[[1, 0, 1]], 0);
    }

    #[test]
    fn test_crop_copies_region() {
        // 4x2 frame where each pixel's R channel is its column index
        let mut data = Vec::new();
        for _row in 0..2 {
            for col in 0..4u8 {
                data.extend_from_slice(&[col, 0, 0]);
            }
        }
        let frame = Frame::new(data, 4, 2, 3, 7);
        let crop = frame.crop(&BBox::new(1, 0, 2, 2)).unwrap();
        assert_eq!(crop.width(), 2);
        assert_eq!(crop.height(), 2);
        assert_eq!(crop.index(), 7);
        assert_eq!(crop.as_ndarray()[[0, 0, 0]], 1);
        assert_eq!(crop.as_ndarray()[[1, 1, 0]], 2);
    }

    #[test]
    fn test_crop_clamps_to_frame() {
        let frame = solid(10, 10, 50);
        let crop = frame.crop(&BBox::new(-5, 5, 10, 20)).unwrap();
        assert_eq!(crop.width(), 5);
        assert_eq!(crop.height(), 5);
    }

    #[test]
    fn test_crop_outside_frame_is_none() {
        let frame = solid(10, 10, 50);
        assert!(frame.crop(&BBox::new(20, 20, 5, 5)).is_none());
    }

    #[test]
    fn test_resized_dimensions() {
        let frame = solid(40, 20, 90);
        let small = frame.resized(10, 5);
        assert_eq!(small.width(), 10);
        assert_eq!(small.height(), 5);
        assert_eq!(small.data().len(), 10 * 5 * 3);
        assert_eq!(small.as_ndarray()[[2, 2, 1]], 90);
    }

    #[test]
    fn test_fit_within_downscales_preserving_aspect() {
        assert_eq!(fit_within(3840, 2160, 1920, 1080), (1920, 1080));
        assert_eq!(fit_within(2000, 1000, 1000, 1000), (1000, 500));
    }

    #[test]
    fn test_fit_within_never_upscales() {
        assert_eq!(fit_within(640, 480, 1920, 1080), (640, 480));
    }

    #[test]
    fn test_to_gray_weights() {
        let frame = Frame::new(vec![255, 0, 0], 1, 1, 3, 0);
        let gray = frame.to_gray();
        assert_relative_eq!(gray[[0, 0]], 0.299 * 255.0, epsilon = 1e-3);
    }

    #[test]
    fn test_to_gray_image_rounds_luma() {
        let frame = Frame::new(vec![255, 0, 0, 0, 255, 0], 2, 1, 3, 0);
        let gray = frame.to_gray_image();
        assert_eq!(gray.dimensions(), (2, 1));
        assert_eq!(gray.get_pixel(0, 0)[0], 76);
        assert_eq!(gray.get_pixel(1, 0)[0], 150);
    }

    #[test]
    fn test_downscale_averages_source_pixels() {
        // One dark and one bright column collapse into a mid-gray pixel.
        let frame = Frame::new(vec![0, 0, 0, 255, 255, 255], 2, 1, 3, 0);
        let out = frame.resized(1, 1);
        assert_eq!(out.width(), 1);
        let v = out.data()[0];
        assert!((120..=135).contains(&v), "got {v}");
    }

    #[test]
    fn test_rgb_image_conversion() {
        let frame = solid(3, 2, 10);
        let img = frame.to_rgb_image().unwrap();
        assert_eq!(img.dimensions(), (3, 2));
        let back = Frame::from_rgb_image(img, 4);
        assert_eq!(back.index(), 4);
        assert_eq!(back.data(), frame.data());
    }
}
