//! Binary keypoint descriptors for matching a face crop against faces
//! already tracked within the same person.
//!
//! FAST-9 corners on a normalized grayscale patch, each described by a
//! 256-bit BRIEF string over the Gaussian-smoothed patch. Matching keeps
//! mutual best matches only.
use std::collections::HashMap;
use std::fmt;
use std::sync::OnceLock;

use image::GrayImage;
use imageproc::binary_descriptors::brief::{brief, BriefDescriptor, TestPair};
use imageproc::binary_descriptors::{match_binary_descriptors, BinaryDescriptor};
use imageproc::corners::{corners_fast9, Corner};
use imageproc::filter::gaussian_blur_f32;
use imageproc::point::Point;

use crate::shared::frame::Frame;

const PATCH_SIZE: u32 = 96;
/// BRIEF samples a 31x31 window around each keypoint.
const BORDER: u32 = 18;
const FAST_THRESHOLD: u8 = 20;
const SUPPRESSION_RADIUS: u32 = 2;
const MAX_KEYPOINTS: usize = 100;
const MIN_KEYPOINTS: usize = 5;
const BLUR_SIGMA: f32 = 1.2;
const BRIEF_BITS: usize = 256;
const MATCH_SEED: u64 = 0x5EED;
const MIN_MATCHES: usize = 5;
const DISTANCE_SCALE: f64 = 100.0;

/// Descriptor set of one face crop.
#[derive(Clone)]
pub struct FaceDescriptors {
    descriptors: Vec<BriefDescriptor>,
}

impl FaceDescriptors {
    pub fn len(&self) -> usize {
        self.descriptors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.descriptors.is_empty()
    }

    pub fn positions(&self) -> impl Iterator<Item = Point<u32>> + '_ {
        self.descriptors.iter().map(|d| d.position())
    }
}

impl fmt::Debug for FaceDescriptors {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FaceDescriptors")
            .field("len", &self.descriptors.len())
            .finish()
    }
}

impl PartialEq for FaceDescriptors {
    fn eq(&self, other: &Self) -> bool {
        self.descriptors.len() == other.descriptors.len()
            && self
                .descriptors
                .iter()
                .zip(&other.descriptors)
                .all(|(a, b)| a.position() == b.position() && a.hamming_distance(b) == 0)
    }
}

/// Extracts descriptors, or `None` when the crop has too little texture.
pub fn extract_descriptors(face: &Frame) -> Option<FaceDescriptors> {
    if face.width() == 0 || face.height() == 0 {
        return None;
    }
    let gray = face.resized(PATCH_SIZE, PATCH_SIZE).to_gray_image();
    let keypoints = keypoints(&gray);
    if keypoints.len() < MIN_KEYPOINTS {
        return None;
    }
    let smooth = gaussian_blur_f32(&gray, BLUR_SIGMA);
    let (descriptors, _) = match brief(&smooth, &keypoints, BRIEF_BITS, Some(test_pairs()?)) {
        Ok(out) => out,
        Err(e) => {
            log::debug!("descriptor extraction failed: {e}");
            return None;
        }
    };
    Some(FaceDescriptors { descriptors })
}

/// Finds the stored face whose descriptors best match `new`.
///
/// Returns `(None, 1.0)` when no candidate has enough mutual matches.
/// Scores are mean Hamming distance / 100, capped at 1; lower is better.
pub fn match_descriptors<'a, K: Copy>(
    new: &FaceDescriptors,
    stored: impl IntoIterator<Item = (K, &'a FaceDescriptors)>,
) -> (Option<K>, f64) {
    let mut best: (Option<K>, f64) = (None, 1.0);
    for (key, candidate) in stored {
        let matches = cross_checked_matches(&new.descriptors, &candidate.descriptors);
        if matches.len() <= MIN_MATCHES {
            continue;
        }
        let mean = matches.iter().map(|&d| d as f64).sum::<f64>() / matches.len() as f64;
        let score = (mean / DISTANCE_SCALE).min(1.0);
        if score < best.1 {
            best = (Some(key), score);
        }
    }
    best
}

/// Strongest FAST corners far enough from the edge for a full BRIEF window,
/// thinned so no two lie within `SUPPRESSION_RADIUS`.
fn keypoints(gray: &GrayImage) -> Vec<Point<u32>> {
    let (w, h) = gray.dimensions();
    let mut corners: Vec<Corner> = corners_fast9(gray, FAST_THRESHOLD)
        .into_iter()
        .filter(|c| c.x >= BORDER && c.y >= BORDER && c.x + BORDER < w && c.y + BORDER < h)
        .collect();
    corners.sort_by(|a, b| {
        b.score
            .partial_cmp(&a.score)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then((a.y, a.x).cmp(&(b.y, b.x)))
    });

    let mut kept: Vec<Point<u32>> = Vec::new();
    for c in corners {
        let crowded = kept
            .iter()
            .any(|k| k.x.abs_diff(c.x) <= SUPPRESSION_RADIUS && k.y.abs_diff(c.y) <= SUPPRESSION_RADIUS);
        if !crowded {
            kept.push(Point::new(c.x, c.y));
            if kept.len() == MAX_KEYPOINTS {
                break;
            }
        }
    }
    kept
}

/// BRIEF test pairs shared by every extraction in this process, so any two
/// descriptor sets are comparable.
fn test_pairs() -> Option<&'static Vec<TestPair>> {
    static PAIRS: OnceLock<Option<Vec<TestPair>>> = OnceLock::new();
    PAIRS
        .get_or_init(|| {
            let blank = GrayImage::new(PATCH_SIZE, PATCH_SIZE);
            match brief(&blank, &[], BRIEF_BITS, None) {
                Ok((_, pairs)) => Some(pairs),
                Err(e) => {
                    log::warn!("cannot sample BRIEF test pairs: {e}");
                    None
                }
            }
        })
        .as_ref()
}

fn location(d: &BriefDescriptor) -> (u32, u32) {
    let p = d.position();
    (p.x, p.y)
}

/// Hamming distances of mutual nearest-neighbour pairs.
fn cross_checked_matches(query: &[BriefDescriptor], train: &[BriefDescriptor]) -> Vec<u32> {
    if query.is_empty() || train.is_empty() {
        return Vec::new();
    }
    let threshold = BRIEF_BITS as u32 + 1;
    let backward: HashMap<(u32, u32), (u32, u32)> =
        match_binary_descriptors(train, query, threshold, Some(MATCH_SEED))
            .into_iter()
            .map(|(t, q)| (location(t), location(q)))
            .collect();
    match_binary_descriptors(query, train, threshold, Some(MATCH_SEED))
        .into_iter()
        .filter(|(q, t)| backward.get(&location(t)) == Some(&location(q)))
        .map(|(q, t)| q.hamming_distance(t))
        .collect()
}
