//! Pre- and post-processing shared by the YOLO-family detectors.
use ndarray::Array4;
use ort::session::Session;

use crate::detection::domain::detection::Detection;
use crate::shared::bbox::BBox;
use crate::shared::frame::Frame;

/// Fallback input resolution when the model shape is dynamic.
pub const DEFAULT_INPUT_SIZE: u32 = 640;

/// NMS IoU threshold.
pub const NMS_IOU_THRESH: f64 = 0.45;

const PAD_VALUE: f32 = 114.0 / 255.0;

/// Maps letterboxed model coordinates back to the source frame.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Letterbox {
    pub scale: f64,
    pub pad_x: u32,
    pub pad_y: u32,
}

impl Letterbox {
    /// Maps a center-format box from model space to frame-space corners.
    pub fn unmap(&self, cx: f64, cy: f64, w: f64, h: f64) -> (f64, f64, f64, f64) {
        let px = self.pad_x as f64;
        let py = self.pad_y as f64;
        (
            (cx - w / 2.0 - px) / self.scale,
            (cy - h / 2.0 - py) / self.scale,
            (cx + w / 2.0 - px) / self.scale,
            (cy + h / 2.0 - py) / self.scale,
        )
    }
}

/// Aspect-preserving resize into a `target_size` square NCHW tensor,
/// padded with YOLO gray and scaled to `[0, 1]`.
pub fn letterbox(frame: &Frame, target_size: u32) -> (Array4<f32>, Letterbox) {
    let fw = frame.width() as f64;
    let fh = frame.height() as f64;
    let target = target_size as f64;

    let scale = (target / fw).min(target / fh);
    let new_w = ((fw * scale).round() as u32).min(target_size);
    let new_h = ((fh * scale).round() as u32).min(target_size);
    let pad_x = (target_size - new_w) / 2;
    let pad_y = (target_size - new_h) / 2;

    let size = target_size as usize;
    let mut tensor = Array4::<f32>::from_elem((1, 3, size, size), PAD_VALUE);

    let src = frame.as_ndarray();
    let src_h = frame.height() as usize;
    let src_w = frame.width() as usize;
    let gray = frame.channels() < 3;

    for y in 0..new_h as usize {
        let sy = ((y as f64 / scale) as usize).min(src_h - 1);
        for x in 0..new_w as usize {
            let sx = ((x as f64 / scale) as usize).min(src_w - 1);
            let ty = pad_y as usize + y;
            let tx = pad_x as usize + x;
            for c in 0..3 {
                let sc = if gray { 0 } else { c };
                tensor[[0, c, ty, tx]] = src[[sy, sx, sc]] as f32 / 255.0;
            }
        }
    }

    (
        tensor,
        Letterbox {
            scale,
            pad_x,
            pad_y,
        },
    )
}

/// A decoded candidate box in frame coordinates, before NMS.
#[derive(Clone, Debug)]
pub struct RawDetection {
    pub x1: f64,
    pub y1: f64,
    pub x2: f64,
    pub y2: f64,
    pub confidence: f64,
}

impl RawDetection {
    fn corners(&self) -> [f64; 4] {
        [self.x1, self.y1, self.x2, self.y2]
    }

    /// Clamps to the frame; `None` when nothing is left.
    pub fn into_detection(self, frame_width: u32, frame_height: u32) -> Option<Detection> {
        let bbox = BBox::from_corners(self.x1, self.y1, self.x2, self.y2)
            .clamp_to(frame_width, frame_height)?;
        Some(Detection::new(bbox, self.confidence))
    }
}

/// Greedy NMS: sort by confidence descending, suppress overlapping boxes.
pub fn nms(dets: &mut [RawDetection], iou_thresh: f64) -> Vec<RawDetection> {
    dets.sort_by(|a, b| {
        b.confidence
            .partial_cmp(&a.confidence)
            .unwrap_or(std::cmp::Ordering::Equal)
    });

    let mut keep: Vec<RawDetection> = Vec::new();
    for det in dets.iter() {
        let overlaps = keep
            .iter()
            .any(|k| corner_iou(&k.corners(), &det.corners()) > iou_thresh);
        if !overlaps {
            keep.push(det.clone());
        }
    }
    keep
}

fn corner_iou(a: &[f64; 4], b: &[f64; 4]) -> f64 {
    let inter = (a[2].min(b[2]) - a[0].max(b[0])).max(0.0)
        * (a[3].min(b[3]) - a[1].max(b[1])).max(0.0);
    if inter == 0.0 {
        return 0.0;
    }
    let area_a = (a[2] - a[0]) * (a[3] - a[1]);
    let area_b = (b[2] - b[0]) * (b[3] - b[1]);
    inter / (area_a + area_b - inter)
}

/// Splits a `[1, F, N]` or `[1, N, F]` output into per-candidate rows.
///
/// YOLO exports are usually feature-major; the smaller axis is taken as
/// the feature axis.
pub fn output_rows(shape: &[usize], data: &[f32]) -> Result<Vec<Vec<f32>>, Box<dyn std::error::Error>> {
    if shape.len() != 3 {
        return Err(format!("unexpected YOLO output shape: {shape:?}").into());
    }
    let transposed = shape[1] < shape[2];
    let (num_dets, num_feats) = if transposed {
        (shape[2], shape[1])
    } else {
        (shape[1], shape[2])
    };
    if data.len() < num_dets * num_feats {
        return Err(format!(
            "YOLO output has {} values, expected {}",
            data.len(),
            num_dets * num_feats
        )
        .into());
    }

    let rows = (0..num_dets)
        .map(|i| {
            if transposed {
                (0..num_feats).map(|f| data[f * num_dets + i]).collect()
            } else {
                data[i * num_feats..(i + 1) * num_feats].to_vec()
            }
        })
        .collect();
    Ok(rows)
}

/// Runs the session on a letterboxed tensor and returns candidate rows.
pub fn infer_rows(
    session: &mut Session,
    tensor: Array4<f32>,
) -> Result<Vec<Vec<f32>>, Box<dyn std::error::Error>> {
    let input_value = ort::value::Tensor::from_array(tensor)?;
    let outputs = session.run(ort::inputs![input_value])?;
    if outputs.len() == 0 {
        return Err("YOLO model produced no outputs".into());
    }
    let array = outputs[0].try_extract_array::<f32>()?;
    let shape = array.shape().to_vec();
    let data = array.as_slice().ok_or("Cannot get tensor slice")?;
    output_rows(&shape, data)
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn raw(x1: f64, y1: f64, x2: f64, y2: f64, confidence: f64) -> RawDetection {
        RawDetection {
            x1,
            y1,
            x2,
            y2,
            confidence,
        }
    }

    #[test]
    fn test_letterbox_preserves_aspect_ratio() {
        // scale = min(640/200, 640/100) = 3.2 -> 640x320, pad_y = 160
        let frame = Frame::new(vec![128u8; 200 * 100 * 3], 200, 100, 3, 0);
        let (tensor, lb) = letterbox(&frame, 640);
        assert_eq!(tensor.shape(), &[1, 3, 640, 640]);
        assert_relative_eq!(lb.scale, 3.2, epsilon = 0.01);
        assert_eq!(lb.pad_x, 0);
        assert_eq!(lb.pad_y, 160);
    }

    #[test]
    fn test_letterbox_values_normalized() {
        let frame = Frame::new(vec![255u8; 100 * 50 * 3], 100, 50, 3, 0);
        let (tensor, lb) = letterbox(&frame, 640);
        let y = lb.pad_y as usize + 1;
        assert_relative_eq!(tensor[[0, 0, y, 1]], 1.0, epsilon = 0.01);
        assert_relative_eq!(tensor[[0, 0, 0, 0]], PAD_VALUE, epsilon = 0.01);
    }

    #[test]
    fn test_unmap_inverts_letterbox() {
        let frame = Frame::new(vec![0u8; 200 * 100 * 3], 200, 100, 3, 0);
        let (_, lb) = letterbox(&frame, 640);
        // Frame box (10, 30)-(30, 70) is (32, 256)-(96, 384) in model space
        let (x1, y1, x2, y2) = lb.unmap(64.0, 320.0, 64.0, 128.0);
        assert_relative_eq!(x1, 10.0, epsilon = 1e-6);
        assert_relative_eq!(y1, 30.0, epsilon = 1e-6);
        assert_relative_eq!(x2, 30.0, epsilon = 1e-6);
        assert_relative_eq!(y2, 70.0, epsilon = 1e-6);
    }

    #[test]
    fn test_nms_suppresses_overlapping() {
        let mut dets = vec![raw(0.0, 0.0, 100.0, 100.0, 0.8), raw(5.0, 5.0, 105.0, 105.0, 0.9)];
        let kept = nms(&mut dets, 0.45);
        assert_eq!(kept.len(), 1);
        assert_relative_eq!(kept[0].confidence, 0.9);
    }

    #[test]
    fn test_nms_keeps_non_overlapping() {
        let mut dets = vec![raw(0.0, 0.0, 50.0, 50.0, 0.9), raw(200.0, 200.0, 250.0, 250.0, 0.8)];
        assert_eq!(nms(&mut dets, 0.45).len(), 2);
    }

    #[test]
    fn test_nms_empty_input() {
        assert!(nms(&mut [], 0.45).is_empty());
    }

    #[test]
    fn test_output_rows_feature_major() {
        // [1, 5, 2]: two candidates with five features each
        let data = vec![1.0, 2.0, 10.0, 20.0, 100.0, 200.0, 3.0, 4.0, 0.5, 0.6];
        let rows = output_rows(&[1, 5, 2], &data).unwrap();
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0], vec![1.0, 10.0, 100.0, 3.0, 0.5]);
        assert_eq!(rows[1], vec![2.0, 20.0, 200.0, 4.0, 0.6]);
    }

    #[test]
    fn test_output_rows_picks_smaller_axis_as_features() {
        let data: Vec<f32> = (0..15).map(|v| v as f32).collect();
        let rows = output_rows(&[1, 3, 5], &data).unwrap();
        // 3 < 5 means feature-major, so three features per row
        assert_eq!(rows.len(), 5);
        assert_eq!(rows[0], vec![0.0, 5.0, 10.0]);

        let rows = output_rows(&[1, 6, 5], &(0..30).map(|v| v as f32).collect::<Vec<_>>()).unwrap();
        assert_eq!(rows.len(), 6);
        assert_eq!(rows[1], vec![5.0, 6.0, 7.0, 8.0, 9.0]);
    }

    #[test]
    fn test_output_rows_rejects_bad_shape() {
        assert!(output_rows(&[1, 84], &[0.0; 84]).is_err());
        assert!(output_rows(&[1, 5, 4], &[0.0; 3]).is_err());
    }

    #[test]
    fn test_into_detection_clamps() {
        let det = raw(-10.0, 5.0, 50.0, 500.0, 0.7).into_detection(100, 100).unwrap();
        assert_eq!(det.bbox, BBox::new(0, 5, 50, 95));
        assert!(raw(200.0, 200.0, 250.0, 250.0, 0.7).into_detection(100, 100).is_none());
    }
}
