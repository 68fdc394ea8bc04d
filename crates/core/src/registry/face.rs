use std::time::Instant;

use crate::detection::domain::person_tracker::TrackId;
use crate::recognition::domain::feature_descriptors::FaceDescriptors;
use crate::recognition::identity_resolver::Recognition;
use crate::shared::bbox::BBox;
use crate::shared::kalman::KalmanBoxFilter;

pub type FaceId = u64;

/// A face resolved in one person region for the current frame.
///
/// `bbox` is in frame coordinates. The face is new when `face_id` is not
/// yet in the registry.
#[derive(Clone, Debug)]
pub struct FaceObservation {
    pub face_id: FaceId,
    pub bbox: BBox,
    pub confidence: f64,
    pub recognition: Recognition,
    pub descriptors: Option<FaceDescriptors>,
}

#[derive(Clone, Debug)]
pub struct Face {
    pub face_id: FaceId,
    pub name: String,
    pub bbox: BBox,
    /// Detector confidence of the latest observation.
    pub confidence: f64,
    /// Verifier distance behind `name`; 1.0 while unrecognized.
    pub distance: f64,
    pub person_id: Option<TrackId>,
    tracker_state: KalmanBoxFilter,
    last_seen: Instant,
    descriptors: Option<FaceDescriptors>,
}

impl Face {
    pub fn new(observation: FaceObservation, person_id: TrackId, now: Instant) -> Self {
        Self {
            face_id: observation.face_id,
            name: observation.recognition.identity,
            bbox: observation.bbox,
            confidence: observation.confidence,
            distance: observation.recognition.distance,
            person_id: Some(person_id),
            tracker_state: KalmanBoxFilter::new(&observation.bbox),
            last_seen: now,
            descriptors: observation.descriptors,
        }
    }

    /// Folds a re-matched detection into the face.
    ///
    /// A known identity replaces the current name; an "Unknown" result
    /// keeps whatever name the face already carries.
    pub fn update(&mut self, observation: FaceObservation, now: Instant) {
        self.tracker_state.predict();
        self.tracker_state.correct(&observation.bbox);
        self.bbox = observation.bbox;
        self.confidence = observation.confidence;
        if observation.recognition.is_known() {
            self.name = observation.recognition.identity;
            self.distance = observation.recognition.distance;
        }
        if observation.descriptors.is_some() {
            self.descriptors = observation.descriptors;
        }
        if now > self.last_seen {
            self.last_seen = now;
        }
    }

    pub fn last_seen(&self) -> Instant {
        self.last_seen
    }

    pub fn tracker_state(&self) -> &KalmanBoxFilter {
        &self.tracker_state
    }

    pub fn descriptors(&self) -> Option<&FaceDescriptors> {
        self.descriptors.as_ref()
    }
}

/// Hands out process-unique face ids, starting past every persisted id.
#[derive(Debug)]
pub struct FaceIdAllocator {
    next: FaceId,
}

impl FaceIdAllocator {
    pub fn starting_at(first: FaceId) -> Self {
        Self { next: first }
    }

    pub fn allocate(&mut self) -> FaceId {
        let id = self.next;
        self.next += 1;
        id
    }

    pub fn peek(&self) -> FaceId {
        self.next
    }
}
