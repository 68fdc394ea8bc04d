use crate::shared::bbox::BBox;

use super::detection::Detection;

pub type TrackId = u32;

/// Tracker output for one frame.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct TrackedPerson {
    pub track_id: TrackId,
    /// Smoothed box, not the raw detection.
    pub bbox: BBox,
    pub confidence: f64,
    pub confirmed: bool,
}

/// Multi-object tracker over per-frame person detections.
///
/// Stateful across calls; ids are stable for as long as the tracker keeps
/// the object alive.
pub trait PersonTracker: Send {
    fn update(&mut self, detections: &[Detection]) -> Vec<TrackedPerson>;
}
