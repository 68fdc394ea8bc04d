pub mod appearance_embedder;
pub mod detection;
pub mod person_detector;
pub mod person_tracker;
