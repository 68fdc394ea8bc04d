use crate::shared::frame::Frame;

use super::detection::Detection;

/// Domain interface for person-class object detection.
pub trait PersonDetector: Send {
    fn detect(&mut self, frame: &Frame) -> Result<Vec<Detection>, Box<dyn std::error::Error>>;
}
