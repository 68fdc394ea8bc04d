use crate::shared::bbox::BBox;

/// A single detector hit in frame coordinates.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Detection {
    pub bbox: BBox,
    pub confidence: f64,
}

impl Detection {
    pub fn new(bbox: BBox, confidence: f64) -> Self {
        Self { bbox, confidence }
    }
}
