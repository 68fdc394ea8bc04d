/// YOLO face detector (pose/WIDERFace export) using ONNX Runtime.
///
/// Output rows are `[cx, cy, w, h, conf, kp0_x, kp0_y, kp0_conf, ...]`;
/// landmarks are not used.
use std::path::Path;

use crate::detection::domain::detection::Detection;
use crate::detection::infrastructure::execution_provider::{declared_input_size, load_session};
use crate::detection::infrastructure::yolo::{
    self, Letterbox, RawDetection, DEFAULT_INPUT_SIZE, NMS_IOU_THRESH,
};
use crate::recognition::domain::face_detector::FaceDetector;
use crate::shared::frame::Frame;

/// Default confidence threshold for face detection.
pub const DEFAULT_CONFIDENCE: f64 = 0.25;

const CONF_INDEX: usize = 4;

pub struct OnnxFaceDetector {
    session: ort::session::Session,
    confidence: f64,
    input_size: u32,
}

impl OnnxFaceDetector {
    pub fn new(model_path: &Path, confidence: f64) -> Result<Self, Box<dyn std::error::Error>> {
        let session = load_session(model_path)?;
        let input_size = declared_input_size(&session).unwrap_or(DEFAULT_INPUT_SIZE);
        log::info!(
            "face detector ready ({}, input {input_size})",
            model_path.display()
        );
        Ok(Self {
            session,
            confidence,
            input_size,
        })
    }
}

impl FaceDetector for OnnxFaceDetector {
    fn detect(&mut self, image: &Frame) -> Result<Vec<Detection>, Box<dyn std::error::Error>> {
        if image.width() == 0 || image.height() == 0 {
            return Ok(Vec::new());
        }
        let (tensor, mapping) = yolo::letterbox(image, self.input_size);
        let rows = yolo::infer_rows(&mut self.session, tensor)?;
        let mut raw = decode_face_rows(&rows, self.confidence, &mapping);
        Ok(yolo::nms(&mut raw, NMS_IOU_THRESH)
            .into_iter()
            .filter_map(|d| d.into_detection(image.width(), image.height()))
            .collect())
    }
}

fn decode_face_rows(rows: &[Vec<f32>], confidence: f64, lb: &Letterbox) -> Vec<RawDetection> {
    rows.iter()
        .filter(|row| row.len() > CONF_INDEX)
        .filter(|row| row[CONF_INDEX] as f64 >= confidence)
        .map(|row| {
            let (x1, y1, x2, y2) =
                lb.unmap(row[0] as f64, row[1] as f64, row[2] as f64, row[3] as f64);
            RawDetection {
                x1,
                y1,
                x2,
                y2,
                confidence: row[CONF_INDEX] as f64,
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_decode_maps_through_letterbox() {
        let lb = Letterbox {
            scale: 2.0,
            pad_x: 0,
            pad_y: 40,
        };
        let rows = vec![vec![100.0, 140.0, 40.0, 40.0, 0.8, 0.0, 0.0, 0.0]];
        let dets = decode_face_rows(&rows, 0.25, &lb);
        assert_eq!(dets.len(), 1);
        assert_relative_eq!(dets[0].x1, 40.0);
        assert_relative_eq!(dets[0].y1, 40.0);
        assert_relative_eq!(dets[0].x2, 60.0);
        assert_relative_eq!(dets[0].y2, 60.0);
    }

    #[test]
    fn test_decode_drops_low_confidence() {
        let lb = Letterbox {
            scale: 1.0,
            pad_x: 0,
            pad_y: 0,
        };
        let rows = vec![vec![10.0, 10.0, 5.0, 5.0, 0.1]];
        assert!(decode_face_rows(&rows, 0.25, &lb).is_empty());
    }
}
