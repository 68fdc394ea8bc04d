pub mod arcface_verifier;
pub mod enrollment_store;
pub mod onnx_face_detector;
