pub mod face_detector;
pub mod face_quality;
pub mod face_verifier;
pub mod feature_descriptors;
pub mod same_face;
