//! One iteration of the processing stage: detect, track, update persons,
//! resolve faces, evict.
//!
//! Model calls run without the registry lock; each registry access takes
//! the lock for a single short operation.
use std::collections::HashSet;
use std::time::{Duration, Instant};

use crate::detection::domain::appearance_embedder::AppearanceEmbedder;
use crate::detection::domain::person_detector::PersonDetector;
use crate::detection::domain::person_tracker::{PersonTracker, TrackId, TrackedPerson};
use crate::pipeline::face_pipeline::FacePipeline;
use crate::pipeline::pipeline_logger::PipelineLogger;
use crate::registry::entity_registry::{lock, Eviction, SharedRegistry};
use crate::shared::frame::Frame;

/// What changed in the registry for one frame.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct FrameReport {
    pub confirmed: Vec<TrackId>,
    pub created: Vec<TrackId>,
    pub faces_linked: usize,
    pub eviction: Eviction,
}

pub struct FrameProcessor {
    detector: Box<dyn PersonDetector>,
    tracker: Box<dyn PersonTracker>,
    embedder: Box<dyn AppearanceEmbedder>,
    faces: FacePipeline,
    registry: SharedRegistry,
    eviction_window: Duration,
}

impl FrameProcessor {
    pub fn new(
        detector: Box<dyn PersonDetector>,
        tracker: Box<dyn PersonTracker>,
        embedder: Box<dyn AppearanceEmbedder>,
        faces: FacePipeline,
        registry: SharedRegistry,
        eviction_window: Duration,
    ) -> Self {
        Self {
            detector,
            tracker,
            embedder,
            faces,
            registry,
            eviction_window,
        }
    }

    pub fn registry(&self) -> &SharedRegistry {
        &self.registry
    }

    /// Runs every step for `frame`, treating `now` as its observation time.
    pub fn process(
        &mut self,
        frame: &Frame,
        now: Instant,
        logger: &mut dyn PipelineLogger,
    ) -> FrameReport {
        let mut report = FrameReport::default();

        let t = Instant::now();
        let detections = match self.detector.detect(frame) {
            Ok(d) => d,
            Err(e) => {
                log::debug!("person detection failed on frame {}: {e}", frame.index());
                Vec::new()
            }
        };
        logger.timing("detect", elapsed_ms(t));

        let t = Instant::now();
        let confirmed: Vec<TrackedPerson> = self
            .tracker
            .update(&detections)
            .into_iter()
            .filter(|p| p.confirmed)
            .collect();
        report.confirmed = confirmed.iter().map(|p| p.track_id).collect();
        logger.timing("track", elapsed_ms(t));

        let t = Instant::now();
        for track in &confirmed {
            let created = lock(&self.registry).observe_person(track, now);
            if created {
                log::info!("New person {}", track.track_id);
                report.created.push(track.track_id);
                self.embed(frame, track);
            }
        }
        logger.timing("persons", elapsed_ms(t));

        let t = Instant::now();
        for track in &confirmed {
            let known = lock(&self.registry).known_faces(track.track_id);
            let observations = self.faces.observe(frame, &track.bbox, &known);
            report.faces_linked += lock(&self.registry)
                .apply_face_observations(track.track_id, observations, now)
                .len();
        }
        logger.timing("faces", elapsed_ms(t));

        let t = Instant::now();
        let current: HashSet<TrackId> = report.confirmed.iter().copied().collect();
        let (eviction, persons, faces) = {
            let mut registry = lock(&self.registry);
            let eviction = registry.evict(&current, now, self.eviction_window);
            (eviction, registry.person_count(), registry.face_count())
        };
        if !eviction.is_empty() {
            log::info!(
                "Evicted persons {:?} and {} linked face(s)",
                eviction.persons,
                eviction.faces.len()
            );
        }
        report.eviction = eviction;
        logger.timing("evict", elapsed_ms(t));

        logger.metric("persons", persons as f64);
        logger.metric("faces", faces as f64);
        report
    }

    /// Stores the re-id embedding of a newly created person. Failures
    /// leave the person without one.
    fn embed(&mut self, frame: &Frame, track: &TrackedPerson) {
        let Some(crop) = frame.crop(&track.bbox) else {
            log::debug!("person {} lies outside the frame", track.track_id);
            return;
        };
        match self.embedder.embed(&crop) {
            Ok(vector) => {
                lock(&self.registry).set_feature_vector(track.track_id, vector);
            }
            Err(e) => log::debug!("embedding for person {} failed: {e}", track.track_id),
        }
    }
}

fn elapsed_ms(since: Instant) -> f64 {
    since.elapsed().as_secs_f64() * 1000.0
}
