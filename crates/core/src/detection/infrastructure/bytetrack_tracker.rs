/// Simplified ByteTrack person tracker with Kalman-smoothed boxes.
///
/// Two-stage association: high-confidence detections are matched first,
/// then low-confidence detections fill remaining unmatched tracks. New
/// tracks start tentative and are confirmed after `n_init` matches; a
/// tentative track that misses a single frame is dropped.
use std::collections::HashSet;

use crate::detection::domain::detection::Detection;
use crate::detection::domain::person_tracker::{PersonTracker, TrackId, TrackedPerson};
use crate::shared::bbox::BBox;
use crate::shared::config::TrackerConfig;
use crate::shared::kalman::KalmanBoxFilter;

#[derive(Clone, Debug)]
struct TrackState {
    id: TrackId,
    filter: KalmanBoxFilter,
    predicted: BBox,
    confidence: f64,
    hits: usize,
    frames_lost: usize,
    confirmed: bool,
    matched: bool,
}

pub struct ByteTracker {
    tracks: Vec<TrackState>,
    next_id: TrackId,
    n_init: usize,
    max_age: usize,
    high_threshold: f64,
    match_threshold: f64,
}

impl ByteTracker {
    pub fn new(config: &TrackerConfig) -> Self {
        Self {
            tracks: Vec::new(),
            next_id: 1,
            n_init: config.n_init.max(1),
            max_age: config.max_age,
            high_threshold: config.high_threshold,
            match_threshold: config.match_threshold,
        }
    }

    fn predict_all(&mut self) {
        for track in &mut self.tracks {
            track.predicted = track.filter.predict();
            track.matched = false;
        }
    }

    fn match_stage(
        &mut self,
        candidates: &[(usize, &Detection)],
        only_unmatched: bool,
    ) -> HashSet<usize> {
        let track_refs: Vec<(usize, BBox)> = self
            .tracks
            .iter()
            .enumerate()
            .filter(|(_, t)| !only_unmatched || !t.matched)
            .map(|(i, t)| (i, t.predicted))
            .collect();

        let mut used = HashSet::new();
        for (ti, di) in greedy_match(&track_refs, candidates, self.match_threshold) {
            let det = candidates
                .iter()
                .find(|(i, _)| *i == di)
                .map(|(_, d)| *d);
            if let Some(det) = det {
                self.apply_match(ti, det);
                used.insert(di);
            }
        }
        used
    }

    fn apply_match(&mut self, track_idx: usize, det: &Detection) {
        let n_init = self.n_init;
        let track = &mut self.tracks[track_idx];
        track.filter.correct(&det.bbox);
        track.confidence = det.confidence;
        track.hits += 1;
        track.frames_lost = 0;
        track.matched = true;
        if track.hits >= n_init {
            track.confirmed = true;
        }
    }

    fn spawn_tracks(&mut self, high: &[(usize, &Detection)], matched: &HashSet<usize>) {
        for (di, det) in high {
            if matched.contains(di) {
                continue;
            }
            self.tracks.push(TrackState {
                id: self.next_id,
                filter: KalmanBoxFilter::new(&det.bbox),
                predicted: det.bbox,
                confidence: det.confidence,
                hits: 1,
                frames_lost: 0,
                confirmed: self.n_init <= 1,
                matched: true,
            });
            self.next_id += 1;
        }
    }

    fn age_unmatched(&mut self) {
        for track in &mut self.tracks {
            if !track.matched {
                track.frames_lost += 1;
            }
        }
        let max_age = self.max_age;
        self.tracks.retain(|t| {
            if t.matched {
                true
            } else if t.confirmed {
                t.frames_lost <= max_age
            } else {
                false
            }
        });
    }

    /// Coasting tracks are kept for re-association but not reported.
    fn reported(&self) -> Vec<TrackedPerson> {
        self.tracks
            .iter()
            .filter(|t| t.matched)
            .map(|t| TrackedPerson {
                track_id: t.id,
                bbox: t.filter.bbox(),
                confidence: t.confidence,
                confirmed: t.confirmed,
            })
            .collect()
    }
}

impl PersonTracker for ByteTracker {
    fn update(&mut self, detections: &[Detection]) -> Vec<TrackedPerson> {
        let (high, low) = split_by_confidence(detections, self.high_threshold);

        self.predict_all();
        let matched_high = self.match_stage(&high, false);
        self.match_stage(&low, true);
        self.age_unmatched();
        self.spawn_tracks(&high, &matched_high);

        self.reported()
    }
}

type IndexedDets<'a> = Vec<(usize, &'a Detection)>;

fn split_by_confidence(
    detections: &[Detection],
    high_threshold: f64,
) -> (IndexedDets<'_>, IndexedDets<'_>) {
    detections
        .iter()
        .enumerate()
        .partition(|(_, d)| d.confidence >= high_threshold)
}

/// Greedy IoU matching: pairs sorted by descending IoU, each track and
/// detection used at most once.
fn greedy_match(
    tracks: &[(usize, BBox)],
    dets: &[(usize, &Detection)],
    thresh: f64,
) -> Vec<(usize, usize)> {
    let mut pairs: Vec<(usize, usize, f64)> = Vec::new();
    for (ti, bbox) in tracks {
        for (di, det) in dets {
            let score = bbox.iou(&det.bbox);
            if score >= thresh {
                pairs.push((*ti, *di, score));
            }
        }
    }
    pairs.sort_by(|a, b| b.2.partial_cmp(&a.2).unwrap_or(std::cmp::Ordering::Equal));

    let mut used_tracks = HashSet::new();
    let mut used_dets = HashSet::new();
    let mut matches = Vec::new();
    for (ti, di, _) in pairs {
        if !used_tracks.contains(&ti) && !used_dets.contains(&di) {
            used_tracks.insert(ti);
            used_dets.insert(di);
            matches.push((ti, di));
        }
    }
    matches
}

#[cfg(test)]
mod tests {
    use super::*;

    fn det(x: i32, y: i32, w: i32, h: i32, confidence: f64) -> Detection {
        Detection::new(BBox::new(x, y, w, h), confidence)
    }

    fn tracker(n_init: usize, max_age: usize) -> ByteTracker {
        ByteTracker::new(&TrackerConfig {
            n_init,
            max_age,
            ..TrackerConfig::default()
        })
    }

    #[test]
    fn test_ids_start_at_one_and_are_unique() {
        let mut t = tracker(1, 5);
        let out = t.update(&[det(0, 0, 50, 100, 0.9), det(200, 0, 50, 100, 0.8)]);
        let mut ids: Vec<TrackId> = out.iter().map(|p| p.track_id).collect();
        ids.sort();
        assert_eq!(ids, vec![1, 2]);
    }

    #[test]
    fn test_consistent_id_across_frames() {
        let mut t = tracker(1, 5);
        let id = t.update(&[det(10, 10, 50, 100, 0.9)])[0].track_id;
        let out = t.update(&[det(12, 12, 50, 100, 0.9)]);
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].track_id, id);
    }

    #[test]
    fn test_confirmed_after_n_init_matches() {
        let mut t = tracker(3, 5);
        assert!(!t.update(&[det(10, 10, 50, 100, 0.9)])[0].confirmed);
        assert!(!t.update(&[det(11, 10, 50, 100, 0.9)])[0].confirmed);
        assert!(t.update(&[det(12, 10, 50, 100, 0.9)])[0].confirmed);
    }

    #[test]
    fn test_tentative_track_dropped_on_miss() {
        let mut t = tracker(3, 5);
        let first = t.update(&[det(10, 10, 50, 100, 0.9)])[0].track_id;
        t.update(&[]);
        let out = t.update(&[det(10, 10, 50, 100, 0.9)]);
        assert_ne!(out[0].track_id, first);
    }

    #[test]
    fn test_confirmed_track_survives_within_max_age() {
        let mut t = tracker(1, 3);
        let id = t.update(&[det(10, 10, 50, 100, 0.9)])[0].track_id;
        t.update(&[]);
        t.update(&[]);
        let out = t.update(&[det(10, 10, 50, 100, 0.9)]);
        assert_eq!(out[0].track_id, id);
    }

    #[test]
    fn test_confirmed_track_removed_after_max_age() {
        let mut t = tracker(1, 2);
        let id = t.update(&[det(10, 10, 50, 100, 0.9)])[0].track_id;
        for _ in 0..3 {
            assert!(t.update(&[]).is_empty());
        }
        let out = t.update(&[det(10, 10, 50, 100, 0.9)]);
        assert_ne!(out[0].track_id, id);
    }

    #[test]
    fn test_low_confidence_keeps_existing_track() {
        let mut t = tracker(1, 5);
        let id = t.update(&[det(10, 10, 50, 100, 0.9)])[0].track_id;
        let out = t.update(&[det(12, 12, 50, 100, 0.3)]);
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].track_id, id);
    }

    #[test]
    fn test_low_confidence_does_not_start_track() {
        let mut t = tracker(1, 5);
        assert!(t.update(&[det(10, 10, 50, 100, 0.3)]).is_empty());
    }

    #[test]
    fn test_reported_box_is_smoothed_toward_detection() {
        let mut t = tracker(1, 5);
        t.update(&[det(100, 100, 50, 100, 0.9)]);
        let out = t.update(&[det(110, 100, 50, 100, 0.9)]);
        assert!(out[0].bbox.x > 100 && out[0].bbox.x <= 110);
    }

    #[test]
    fn test_ids_never_reused() {
        let mut t = tracker(1, 0);
        let a = t.update(&[det(0, 0, 50, 100, 0.9)])[0].track_id;
        t.update(&[]);
        let b = t.update(&[det(0, 0, 50, 100, 0.9)])[0].track_id;
        assert!(b > a);
    }
}
