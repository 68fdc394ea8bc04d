//! Face detection, recognition and re-matching inside one person region.
use std::collections::HashSet;

use crate::recognition::domain::face_detector::FaceDetector;
use crate::recognition::domain::face_quality::face_quality;
use crate::recognition::domain::feature_descriptors::{
    extract_descriptors, match_descriptors, FaceDescriptors,
};
use crate::recognition::domain::same_face::{FaceOverlap, SameFaceThresholds};
use crate::recognition::identity_resolver::{IdentityResolver, Recognition};
use crate::recognition::infrastructure::enrollment_store::EnrollOutcome;
use crate::registry::entity_registry::KnownFace;
use crate::registry::face::{FaceId, FaceIdAllocator, FaceObservation};
use crate::shared::bbox::BBox;
use crate::shared::config::FaceConfig;
use crate::shared::constants::AUTO_ENROLL_PREFIX;
use crate::shared::frame::Frame;

pub struct FacePipeline {
    detector: Box<dyn FaceDetector>,
    resolver: IdentityResolver,
    ids: FaceIdAllocator,
    thresholds: SameFaceThresholds,
    config: FaceConfig,
}

impl FacePipeline {
    /// Face ids continue after the highest id found in the enrollment store.
    pub fn new(
        detector: Box<dyn FaceDetector>,
        resolver: IdentityResolver,
        config: &FaceConfig,
    ) -> Self {
        let first_id = resolver.next_available_id();
        log::info!("Face ids start at {first_id}");
        Self {
            detector,
            resolver,
            ids: FaceIdAllocator::starting_at(first_id),
            thresholds: SameFaceThresholds::from(config),
            config: config.clone(),
        }
    }

    pub fn next_face_id(&self) -> FaceId {
        self.ids.peek()
    }

    /// Resolves every face inside `person_box`.
    ///
    /// `known` holds the faces already linked to this person; each can be
    /// re-matched at most once per call. Detector failures yield no faces.
    pub fn observe(
        &mut self,
        frame: &Frame,
        person_box: &BBox,
        known: &[KnownFace],
    ) -> Vec<FaceObservation> {
        let Some(region) = person_box.clamp_to(frame.width(), frame.height()) else {
            return Vec::new();
        };
        let Some(crop) = frame.crop(&region) else {
            return Vec::new();
        };

        let detections = match self.detector.detect(&crop) {
            Ok(d) => d,
            Err(e) => {
                log::debug!("face detection failed: {e}");
                return Vec::new();
            }
        };

        let min_size = self.config.min_face_size as i32;
        let mut claimed: HashSet<FaceId> = HashSet::new();
        let mut observations = Vec::new();

        for det in detections {
            if det.bbox.width < min_size || det.bbox.height < min_size {
                continue;
            }
            let Some(face_crop) = crop.crop(&det.bbox) else {
                continue;
            };
            let bbox = det.bbox.offset(region.x, region.y);
            let quality = face_quality(&face_crop);
            let recognition = self.recognize(&face_crop);

            let mut descriptors = None;
            let matched = match self.match_geometry(&bbox, known, &claimed) {
                Some(id) => Some(id),
                None => {
                    descriptors = extract_descriptors(&face_crop);
                    descriptors
                        .as_ref()
                        .and_then(|d| self.match_appearance(d, known, &claimed))
                }
            };

            let (face_id, is_new) = match matched {
                Some(id) => (id, false),
                None => (self.ids.allocate(), true),
            };
            claimed.insert(face_id);

            let recognition = self.enroll(&face_crop, face_id, is_new, quality, recognition);
            if descriptors.is_none() {
                descriptors = extract_descriptors(&face_crop);
            }

            observations.push(FaceObservation {
                face_id,
                bbox,
                confidence: det.confidence,
                recognition,
                descriptors,
            });
        }
        observations
    }

    /// Known identity only when the distance clears the acceptance threshold.
    fn recognize(&mut self, face: &Frame) -> Recognition {
        let result = self.resolver.recognize(face);
        if result.is_known() && result.distance < self.config.recognition_threshold {
            result
        } else {
            Recognition::unknown()
        }
    }

    /// Unclaimed known face with the highest IoU among geometric matches.
    fn match_geometry(
        &self,
        bbox: &BBox,
        known: &[KnownFace],
        claimed: &HashSet<FaceId>,
    ) -> Option<FaceId> {
        known
            .iter()
            .filter(|k| !claimed.contains(&k.face_id))
            .map(|k| (k.face_id, FaceOverlap::between(bbox, &k.bbox)))
            .filter(|(_, overlap)| overlap.is_match(&self.thresholds))
            .max_by(|a, b| {
                a.1.iou
                    .partial_cmp(&b.1.iou)
                    .unwrap_or(std::cmp::Ordering::Equal)
            })
            .map(|(id, _)| id)
    }

    fn match_appearance(
        &self,
        descriptors: &FaceDescriptors,
        known: &[KnownFace],
        claimed: &HashSet<FaceId>,
    ) -> Option<FaceId> {
        let candidates = known
            .iter()
            .filter(|k| !claimed.contains(&k.face_id))
            .filter_map(|k| k.descriptors.as_ref().map(|d| (k.face_id, d)));
        match match_descriptors(descriptors, candidates) {
            (Some(id), score) if score < self.config.descriptor_match_threshold => Some(id),
            _ => None,
        }
    }

    /// Feeds good crops back into the enrollment store.
    ///
    /// Recognized faces reinforce their identity. A new face that stays
    /// unknown is enrolled as `User_<face_id>` and takes that name.
    fn enroll(
        &mut self,
        face: &Frame,
        face_id: FaceId,
        is_new: bool,
        quality: f64,
        recognition: Recognition,
    ) -> Recognition {
        if quality < self.config.quality_threshold {
            return recognition;
        }

        if recognition.is_known() {
            if let Err(e) = self.resolver.enroll_or_update(&recognition.identity, face, quality) {
                log::warn!("enrollment of {} failed: {e}", recognition.identity);
            }
            return recognition;
        }

        if !is_new || !self.config.auto_enroll_unknown {
            return recognition;
        }
        let identity = format!("{AUTO_ENROLL_PREFIX}{face_id}");
        match self.resolver.enroll_or_update(&identity, face, quality) {
            Ok(EnrollOutcome::Rejected) => recognition,
            Ok(_) => {
                log::info!("Enrolled new identity {identity} (quality {quality:.1})");
                Recognition {
                    identity,
                    distance: recognition.distance,
                }
            }
            Err(e) => {
                log::warn!("auto-enrollment of {identity} failed: {e}");
                recognition
            }
        }
    }
}
