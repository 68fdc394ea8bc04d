use crate::shared::frame::Frame;

/// Re-identification embedding of a cropped person image.
pub trait AppearanceEmbedder: Send {
    fn embed(&mut self, crop: &Frame) -> Result<Vec<f32>, Box<dyn std::error::Error>>;
}
