/// ArcFace face verifier using ONNX Runtime.
///
/// Both faces are embedded and compared by cosine distance `1 - cos`.
use std::path::Path;
use std::sync::Mutex;

use ndarray::Array4;

use crate::detection::infrastructure::execution_provider::load_session;
use crate::detection::infrastructure::math::{cosine_similarity, l2_normalize};
use crate::recognition::domain::face_verifier::FaceVerifier;
use crate::shared::frame::Frame;

const INPUT_SIZE: u32 = 112;
const NORM_MEAN: f32 = 127.5;
const NORM_STD: f32 = 127.5;

pub struct ArcFaceVerifier {
    session: Mutex<ort::session::Session>,
}

impl ArcFaceVerifier {
    pub fn new(model_path: &Path) -> Result<Self, Box<dyn std::error::Error>> {
        let session = load_session(model_path)?;
        log::info!("face verifier ready ({})", model_path.display());
        Ok(Self {
            session: Mutex::new(session),
        })
    }

    fn embed(&self, face: &Frame) -> Result<Vec<f32>, Box<dyn std::error::Error>> {
        let tensor = preprocess(face)?;
        let input_value = ort::value::Tensor::from_array(tensor)?;
        let mut session = self
            .session
            .lock()
            .map_err(|e| format!("Lock poisoned: {e}"))?;
        let outputs = session.run(ort::inputs![input_value])?;
        let array = outputs[0].try_extract_array::<f32>()?;
        let mut embedding = array
            .as_slice()
            .ok_or("Cannot get embedding slice")?
            .to_vec();
        l2_normalize(&mut embedding);
        Ok(embedding)
    }
}

impl FaceVerifier for ArcFaceVerifier {
    fn distance(&self, a: &Frame, b: &Frame) -> Result<f64, Box<dyn std::error::Error>> {
        let ea = self.embed(a)?;
        let eb = self.embed(b)?;
        Ok(1.0 - cosine_similarity(&ea, &eb))
    }
}

/// Resize to 112x112, scale to `[-1, 1]`, NCHW.
fn preprocess(face: &Frame) -> Result<Array4<f32>, Box<dyn std::error::Error>> {
    if face.width() == 0 || face.height() == 0 {
        return Err("empty face crop".into());
    }
    if face.channels() != 3 {
        return Err(format!("expected RGB face, got {} channels", face.channels()).into());
    }
    let resized = face.resized(INPUT_SIZE, INPUT_SIZE);
    let src = resized.as_ndarray();
    let size = INPUT_SIZE as usize;
    Ok(Array4::from_shape_fn((1, 3, size, size), |(_, c, y, x)| {
        (src[[y, x, c]] as f32 - NORM_MEAN) / NORM_STD
    }))
}
