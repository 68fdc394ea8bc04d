//! Geometric test for whether two face boxes from different frames are
//! the same physical face.
use crate::shared::bbox::BBox;
use crate::shared::config::FaceConfig;

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct SameFaceThresholds {
    pub iou: f64,
    pub overlap: f64,
    /// Center distance bound for the overlap rule; half of it applies to
    /// the size rule.
    pub distance: f64,
    pub size_ratio: f64,
}

impl From<&FaceConfig> for SameFaceThresholds {
    fn from(config: &FaceConfig) -> Self {
        Self {
            iou: config.iou_threshold,
            overlap: config.overlap_threshold,
            distance: config.distance_threshold,
            size_ratio: config.size_ratio_threshold,
        }
    }
}

impl Default for SameFaceThresholds {
    fn default() -> Self {
        Self::from(&FaceConfig::default())
    }
}

/// Overlap measures between a current and a previous face box.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct FaceOverlap {
    pub iou: f64,
    /// Intersection over the smaller box's area.
    pub overlap_ratio: f64,
    /// Center distance divided by the mean side length of both boxes.
    pub normalized_distance: f64,
    /// Product of the min/max width and height ratios.
    pub size_ratio: f64,
}

impl FaceOverlap {
    pub fn between(current: &BBox, previous: &BBox) -> Self {
        let inter = current.intersection(previous) as f64;
        let smaller = current.area().min(previous.area()) as f64;

        let (cx, cy) = current.center();
        let (px, py) = previous.center();
        let center_distance = ((cx - px).powi(2) + (cy - py).powi(2)).sqrt();
        let avg_side =
            (current.width + current.height + previous.width + previous.height) as f64 / 4.0;

        Self {
            iou: current.iou(previous),
            overlap_ratio: if smaller > 0.0 { inter / smaller } else { 0.0 },
            normalized_distance: if avg_side > 0.0 {
                center_distance / avg_side
            } else {
                f64::INFINITY
            },
            size_ratio: side_ratio(current.width, previous.width)
                * side_ratio(current.height, previous.height),
        }
    }

    pub fn is_match(&self, t: &SameFaceThresholds) -> bool {
        if self.iou >= t.iou {
            return true;
        }
        if self.overlap_ratio >= t.overlap && self.normalized_distance <= t.distance {
            return true;
        }
        self.normalized_distance <= t.distance * 0.5 && self.size_ratio >= t.size_ratio
    }
}

fn side_ratio(a: i32, b: i32) -> f64 {
    let (lo, hi) = (a.min(b), a.max(b));
    if hi <= 0 {
        return 0.0;
    }
    lo.max(0) as f64 / hi as f64
}

pub fn is_same_face(current: &BBox, previous: &BBox, thresholds: &SameFaceThresholds) -> bool {
    FaceOverlap::between(current, previous).is_match(thresholds)
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use rstest::rstest;

    #[rstest]
    #[case::high_iou_wins_alone(0.6, 0.0, 10.0, 0.0, true)]
    #[case::overlap_and_close(0.1, 0.8, 0.2, 0.0, true)]
    #[case::weak_overlap_far(0.1, 0.4, 0.5, 1.0, false)]
    #[case::very_close_similar_size(0.1, 0.2, 0.1, 0.8, true)]
    #[case::very_close_different_size(0.1, 0.2, 0.1, 0.5, false)]
    #[case::overlap_but_too_far(0.1, 0.9, 0.35, 1.0, false)]
    fn test_decision_rules(
        #[case] iou: f64,
        #[case] overlap_ratio: f64,
        #[case] normalized_distance: f64,
        #[case] size_ratio: f64,
        #[case] expected: bool,
    ) {
        let overlap = FaceOverlap {
            iou,
            overlap_ratio,
            normalized_distance,
            size_ratio,
        };
        assert_eq!(overlap.is_match(&SameFaceThresholds::default()), expected);
    }

    #[rstest]
    #[case::iou_point_six(BBox::new(0, 0, 100, 60), 0.6, 1.0, 0.222, true)]
    #[case::overlap_point_eight_close(BBox::new(-14, 40, 98, 12), 0.1, 0.857, 0.2, true)]
    #[case::overlap_point_four_far(BBox::new(-18, 0, 30, 98), 0.1, 0.4, 0.646, false)]
    fn test_box_pairs_against_reference_square(
        #[case] current: BBox,
        #[case] iou: f64,
        #[case] overlap_ratio: f64,
        #[case] normalized_distance: f64,
        #[case] expected: bool,
    ) {
        let previous = BBox::new(0, 0, 100, 100);
        let o = FaceOverlap::between(&current, &previous);
        assert_relative_eq!(o.iou, iou, epsilon = 0.005);
        assert_relative_eq!(o.overlap_ratio, overlap_ratio, epsilon = 0.005);
        assert_relative_eq!(o.normalized_distance, normalized_distance, epsilon = 0.005);
        assert_eq!(is_same_face(&current, &previous, &SameFaceThresholds::default()), expected);
    }

    #[test]
    fn test_identical_boxes_match() {
        let b = BBox::new(10, 10, 50, 60);
        let o = FaceOverlap::between(&b, &b);
        assert_relative_eq!(o.iou, 1.0);
        assert_relative_eq!(o.overlap_ratio, 1.0);
        assert_relative_eq!(o.normalized_distance, 0.0);
        assert_relative_eq!(o.size_ratio, 1.0);
        assert!(is_same_face(&b, &b, &SameFaceThresholds::default()));
    }

    #[test]
    fn test_small_box_inside_large_uses_overlap_rule() {
        // IoU = 900 / 10000, overlap = 1.0, distance 0 -> secondary rule
        let large = BBox::new(0, 0, 100, 100);
        let small = BBox::new(35, 35, 30, 30);
        let o = FaceOverlap::between(&small, &large);
        assert!(o.iou < 0.5);
        assert_relative_eq!(o.overlap_ratio, 1.0);
        assert!(is_same_face(&small, &large, &SameFaceThresholds::default()));
    }

    #[test]
    fn test_disjoint_boxes_do_not_match() {
        let a = BBox::new(0, 0, 40, 40);
        let b = BBox::new(200, 0, 40, 40);
        let o = FaceOverlap::between(&a, &b);
        assert_relative_eq!(o.normalized_distance, 5.0);
        assert!(!o.is_match(&SameFaceThresholds::default()));
    }

    #[test]
    fn test_size_ratio_is_product_of_side_ratios() {
        let a = BBox::new(0, 0, 50, 100);
        let b = BBox::new(0, 0, 100, 50);
        assert_relative_eq!(FaceOverlap::between(&a, &b).size_ratio, 0.25);
    }

    #[test]
    fn test_degenerate_boxes_never_match_by_distance() {
        let a = BBox::new(0, 0, 0, 0);
        let o = FaceOverlap::between(&a, &a);
        assert!(o.normalized_distance.is_infinite());
        assert!(!o.is_match(&SameFaceThresholds::default()));
    }
}
