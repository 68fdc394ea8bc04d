pub mod bytetrack_tracker;
pub mod execution_provider;
pub mod math;
pub mod onnx_person_detector;
pub mod onnx_reid_embedder;
pub mod yolo;
