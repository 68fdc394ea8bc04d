pub mod detection_system;
pub mod face_pipeline;
pub mod frame_cache;
pub mod frame_processor;
pub mod frame_queue;
pub mod ingestion_stage;
pub mod pipeline_logger;
pub mod processing_stage;
pub mod watchdog;
