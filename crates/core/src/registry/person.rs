use std::collections::BTreeSet;
use std::time::Instant;

use crate::detection::domain::person_tracker::{TrackId, TrackedPerson};
use crate::registry::face::FaceId;
use crate::shared::bbox::BBox;

/// A confirmed track and the faces currently linked to it.
///
/// Faces are referenced by id only; the registry owns the `Face` values.
#[derive(Clone, Debug)]
pub struct Person {
    pub id: TrackId,
    pub bbox: BBox,
    pub confidence: f64,
    face_ids: BTreeSet<FaceId>,
    last_seen: Instant,
    feature_vector: Option<Vec<f32>>,
}

impl Person {
    pub fn new(track: &TrackedPerson, now: Instant) -> Self {
        Self {
            id: track.track_id,
            bbox: track.bbox,
            confidence: track.confidence,
            face_ids: BTreeSet::new(),
            last_seen: now,
            feature_vector: None,
        }
    }

    pub fn update(&mut self, track: &TrackedPerson, now: Instant) {
        self.bbox = track.bbox;
        self.confidence = track.confidence;
        self.touch(now);
    }

    pub fn face_ids(&self) -> &BTreeSet<FaceId> {
        &self.face_ids
    }

    pub fn last_seen(&self) -> Instant {
        self.last_seen
    }

    pub fn feature_vector(&self) -> Option<&[f32]> {
        self.feature_vector.as_deref()
    }

    /// Stores the re-id embedding. Only the first call has any effect.
    pub fn set_feature_vector(&mut self, vector: Vec<f32>) -> bool {
        if self.feature_vector.is_some() {
            return false;
        }
        self.feature_vector = Some(vector);
        true
    }

    pub(crate) fn replace_faces(&mut self, ids: impl IntoIterator<Item = FaceId>) {
        self.face_ids = ids.into_iter().collect();
    }

    pub(crate) fn unlink_face(&mut self, id: FaceId) {
        self.face_ids.remove(&id);
    }

    /// `last_seen` never moves backwards.
    fn touch(&mut self, now: Instant) {
        if now > self.last_seen {
            self.last_seen = now;
        }
    }
}
