use crate::shared::frame::Frame;

/// Pairwise face comparison. Lower distance means more alike.
pub trait FaceVerifier: Send {
    fn distance(&self, a: &Frame, b: &Frame) -> Result<f64, Box<dyn std::error::Error>>;
}
