/// YOLOv8 COCO person detector using ONNX Runtime via `ort`.
///
/// Output rows are `[cx, cy, w, h, class_0, ..., class_79]`; only the
/// person class score is read.
use std::path::Path;

use crate::detection::domain::detection::Detection;
use crate::detection::domain::person_detector::PersonDetector;
use crate::shared::constants::PERSON_CLASS_ID;
use crate::shared::frame::Frame;

use super::execution_provider::{declared_input_size, load_session};
use super::yolo::{self, RawDetection, DEFAULT_INPUT_SIZE, NMS_IOU_THRESH};

const BOX_FEATURES: usize = 4;

pub struct OnnxPersonDetector {
    session: ort::session::Session,
    confidence: f64,
    input_size: u32,
}

impl OnnxPersonDetector {
    pub fn new(model_path: &Path, confidence: f64) -> Result<Self, Box<dyn std::error::Error>> {
        let session = load_session(model_path)?;
        let input_size = declared_input_size(&session).unwrap_or(DEFAULT_INPUT_SIZE);
        log::info!(
            "person detector ready ({}, input {input_size})",
            model_path.display()
        );
        Ok(Self {
            session,
            confidence,
            input_size,
        })
    }
}

impl PersonDetector for OnnxPersonDetector {
    fn detect(&mut self, frame: &Frame) -> Result<Vec<Detection>, Box<dyn std::error::Error>> {
        let (tensor, mapping) = yolo::letterbox(frame, self.input_size);
        let rows = yolo::infer_rows(&mut self.session, tensor)?;
        let mut raw = decode_person_rows(&rows, self.confidence, &mapping);
        Ok(yolo::nms(&mut raw, NMS_IOU_THRESH)
            .into_iter()
            .filter_map(|d| d.into_detection(frame.width(), frame.height()))
            .collect())
    }
}

fn decode_person_rows(rows: &[Vec<f32>], confidence: f64, lb: &yolo::Letterbox) -> Vec<RawDetection> {
    rows.iter()
        .filter(|row| row.len() > BOX_FEATURES + PERSON_CLASS_ID)
        .filter_map(|row| {
            let score = row[BOX_FEATURES + PERSON_CLASS_ID] as f64;
            if score < confidence {
                return None;
            }
            let (x1, y1, x2, y2) =
                lb.unmap(row[0] as f64, row[1] as f64, row[2] as f64, row[3] as f64);
            Some(RawDetection {
                x1,
                y1,
                x2,
                y2,
                confidence: score,
            })
        })
        .collect()
}
