use crate::detection::domain::detection::Detection;
use crate::shared::frame::Frame;

/// Domain interface for face detection inside an image region.
///
/// Boxes are relative to the image passed in.
pub trait FaceDetector: Send {
    fn detect(&mut self, image: &Frame) -> Result<Vec<Detection>, Box<dyn std::error::Error>>;
}
