/// Person re-identification embedder using ONNX Runtime.
///
/// Expects an OSNet-style model: RGB input `[1, 3, 256, 128]` normalized
/// with ImageNet statistics, one feature vector out.
use std::path::Path;

use ndarray::Array4;

use crate::detection::domain::appearance_embedder::AppearanceEmbedder;
use crate::shared::frame::Frame;

use super::execution_provider::load_session;
use super::math::l2_normalize;

const INPUT_HEIGHT: u32 = 256;
const INPUT_WIDTH: u32 = 128;
const MEAN: [f32; 3] = [0.485, 0.456, 0.406];
const STD: [f32; 3] = [0.229, 0.224, 0.225];

pub struct OnnxReidEmbedder {
    session: ort::session::Session,
}

impl OnnxReidEmbedder {
    pub fn new(model_path: &Path) -> Result<Self, Box<dyn std::error::Error>> {
        let session = load_session(model_path)?;
        log::info!("re-id embedder ready ({})", model_path.display());
        Ok(Self { session })
    }
}

impl AppearanceEmbedder for OnnxReidEmbedder {
    fn embed(&mut self, crop: &Frame) -> Result<Vec<f32>, Box<dyn std::error::Error>> {
        let tensor = preprocess(crop)?;
        let input_value = ort::value::Tensor::from_array(tensor)?;
        let outputs = self.session.run(ort::inputs![input_value])?;
        let array = outputs[0].try_extract_array::<f32>()?;
        let mut embedding = array
            .as_slice()
            .ok_or("Cannot get embedding slice")?
            .to_vec();
        if embedding.is_empty() {
            return Err("re-id model returned an empty embedding".into());
        }
        l2_normalize(&mut embedding);
        Ok(embedding)
    }
}

fn preprocess(crop: &Frame) -> Result<Array4<f32>, Box<dyn std::error::Error>> {
    if crop.width() == 0 || crop.height() == 0 {
        return Err("empty person crop".into());
    }
    if crop.channels() != 3 {
        return Err(format!("expected RGB crop, got {} channels", crop.channels()).into());
    }
    let resized = crop.resized(INPUT_WIDTH, INPUT_HEIGHT);
    let src = resized.as_ndarray();
    let tensor = Array4::from_shape_fn(
        (1, 3, INPUT_HEIGHT as usize, INPUT_WIDTH as usize),
        |(_, c, y, x)| (src[[y, x, c]] as f32 / 255.0 - MEAN[c]) / STD[c],
    );
    Ok(tensor)
}
