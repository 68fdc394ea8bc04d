use std::any::Any;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::time::{Duration, Instant};

use crate::pipeline::frame_processor::{FrameProcessor, FrameReport};
use crate::pipeline::frame_queue::FrameQueue;
use crate::pipeline::pipeline_logger::PipelineLogger;
use crate::shared::config::ProcessingConfig;
use crate::shared::stop_signal::StopSignal;

/// Result of one loop iteration.
#[derive(Debug)]
pub enum StepOutcome {
    Processed(FrameReport),
    /// A frame was dropped to work off a backlog.
    Skipped,
    /// No frame arrived before the dequeue timeout.
    Idle,
    Failed(String),
}

/// Consumes the work queue and feeds each frame through the processor.
pub struct ProcessingStage {
    processor: FrameProcessor,
    queue: FrameQueue,
    stop: StopSignal,
    logger: Box<dyn PipelineLogger>,
    config: ProcessingConfig,
    processed: usize,
}

impl ProcessingStage {
    pub fn new(
        processor: FrameProcessor,
        queue: FrameQueue,
        stop: StopSignal,
        logger: Box<dyn PipelineLogger>,
        config: ProcessingConfig,
    ) -> Self {
        Self {
            processor,
            queue,
            stop,
            logger,
            config,
            processed: 0,
        }
    }

    pub fn run(mut self) {
        log::info!("Processing stage started");
        let idle_pause = Duration::from_millis(self.config.idle_pause_ms);
        let error_pause = Duration::from_millis(self.config.error_pause_ms);

        while !self.stop.is_stopped() {
            match self.step() {
                StepOutcome::Idle => {
                    self.stop.wait(idle_pause);
                }
                StepOutcome::Failed(_) => {
                    self.stop.wait(error_pause);
                }
                StepOutcome::Processed(_) | StepOutcome::Skipped => {}
            }
        }

        self.logger.summary();
        log::info!("Processing stage stopped after {} frames", self.processed);
    }

    /// Handles at most one frame. A panic inside the processor is caught
    /// and reported as `Failed`.
    pub fn step(&mut self) -> StepOutcome {
        if self.queue.len() > self.config.backlog_threshold {
            let skip_timeout = Duration::from_millis(self.config.skip_timeout_ms);
            if let Some(frame) = self.queue.pop_timeout(skip_timeout) {
                log::debug!("Backlog of {} frames, skipping frame {}", self.queue.len() + 1, frame.index());
            }
            return StepOutcome::Skipped;
        }

        let timeout = Duration::from_millis(self.config.dequeue_timeout_ms);
        let Some(frame) = self.queue.pop_timeout(timeout) else {
            return StepOutcome::Idle;
        };
        self.logger.metric("queue_depth", self.queue.len() as f64);

        let now = Instant::now();
        let processor = &mut self.processor;
        let logger: &mut dyn PipelineLogger = self.logger.as_mut();
        match catch_unwind(AssertUnwindSafe(|| processor.process(&frame, now, logger))) {
            Ok(report) => {
                self.processed += 1;
                self.logger.progress(self.processed);
                StepOutcome::Processed(report)
            }
            Err(payload) => {
                let message = panic_message(payload.as_ref());
                log::warn!("Processing frame {} failed: {message}", frame.index());
                StepOutcome::Failed(message)
            }
        }
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Arc;

    use crate::detection::domain::appearance_embedder::AppearanceEmbedder;
    use crate::detection::domain::detection::Detection;
    use crate::detection::domain::person_detector::PersonDetector;
    use crate::detection::domain::person_tracker::{PersonTracker, TrackedPerson};
    use crate::pipeline::face_pipeline::FacePipeline;
    use crate::pipeline::pipeline_logger::StatsPipelineLogger;
    use crate::recognition::domain::face_detector::FaceDetector;
    use crate::recognition::domain::face_verifier::FaceVerifier;
    use crate::recognition::identity_resolver::{IdentityResolver, ResolverSettings};
    use crate::recognition::infrastructure::enrollment_store::EnrollmentStore;
    use crate::registry::entity_registry::EntityRegistry;
    use crate::shared::bbox::BBox;
    use crate::shared::config::{FaceConfig, RecognitionConfig};
    use crate::shared::frame::Frame;
    use tempfile::TempDir;

    /// One person everywhere; panics while `explode` is set.
    struct Detector {
        explode: Arc<AtomicBool>,
    }

    impl PersonDetector for Detector {
        fn detect(&mut self, _frame: &Frame) -> Result<Vec<Detection>, Box<dyn std::error::Error>> {
            if self.explode.load(Ordering::SeqCst) {
                panic!("detector exploded");
            }
            Ok(vec![Detection::new(BBox::new(0, 0, 8, 8), 0.9)])
        }
    }

    struct ConfirmAll;

    impl PersonTracker for ConfirmAll {
        fn update(&mut self, detections: &[Detection]) -> Vec<TrackedPerson> {
            detections
                .iter()
                .map(|d| TrackedPerson {
                    track_id: 1,
                    bbox: d.bbox,
                    confidence: d.confidence,
                    confirmed: true,
                })
                .collect()
        }
    }

    struct ZeroEmbedder;

    impl AppearanceEmbedder for ZeroEmbedder {
        fn embed(&mut self, _crop: &Frame) -> Result<Vec<f32>, Box<dyn std::error::Error>> {
            Ok(vec![0.0])
        }
    }

    struct NoFaces;

    impl FaceDetector for NoFaces {
        fn detect(&mut self, _frame: &Frame) -> Result<Vec<Detection>, Box<dyn std::error::Error>> {
            Ok(Vec::new())
        }
    }

    struct NeverVerifies;

    impl FaceVerifier for NeverVerifies {
        fn distance(&self, _: &Frame, _: &Frame) -> Result<f64, Box<dyn std::error::Error>> {
            Ok(1.0)
        }
    }

    fn stage(db: &TempDir, explode: Arc<AtomicBool>, queue: FrameQueue) -> ProcessingStage {
        let resolver = IdentityResolver::new(
            EnrollmentStore::new(db.path()),
            Box::new(NeverVerifies),
            ResolverSettings::from(&RecognitionConfig::default()),
        );
        let faces = FacePipeline::new(Box::new(NoFaces), resolver, &FaceConfig::default());
        let processor = FrameProcessor::new(
            Box::new(Detector { explode }),
            Box::new(ConfirmAll),
            Box::new(ZeroEmbedder),
            faces,
            EntityRegistry::shared(),
            Duration::from_secs(2),
        );
        let config = ProcessingConfig {
            dequeue_timeout_ms: 5,
            skip_timeout_ms: 1,
            ..ProcessingConfig::default()
        };
        ProcessingStage::new(
            processor,
            queue,
            StopSignal::new(),
            Box::new(StatsPipelineLogger::new(10)),
            config,
        )
    }

    fn frame(index: usize) -> Arc<Frame> {
        Arc::new(Frame::new(vec![0u8; 16 * 16 * 3], 16, 16, 3, index))
    }

    #[test]
    fn test_processes_queued_frame() {
        let db = TempDir::new().unwrap();
        let queue = FrameQueue::new(10);
        let mut s = stage(&db, Arc::new(AtomicBool::new(false)), queue.clone());
        queue.push(frame(0));
        match s.step() {
            StepOutcome::Processed(report) => assert_eq!(report.created, vec![1]),
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn test_empty_queue_is_idle() {
        let db = TempDir::new().unwrap();
        let mut s = stage(&db, Arc::new(AtomicBool::new(false)), FrameQueue::new(10));
        assert!(matches!(s.step(), StepOutcome::Idle));
    }

    #[test]
    fn test_backlog_skips_until_threshold() {
        let db = TempDir::new().unwrap();
        let queue = FrameQueue::new(10);
        let mut s = stage(&db, Arc::new(AtomicBool::new(false)), queue.clone());
        for i in 0..8 {
            queue.push(frame(i));
        }
        // 8 pending, threshold 5: three frames are dropped first
        for _ in 0..3 {
            assert!(matches!(s.step(), StepOutcome::Skipped));
        }
        assert_eq!(queue.len(), 5);
        match s.step() {
            StepOutcome::Processed(_) => {}
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn test_panic_is_contained_and_loop_recovers() {
        let db = TempDir::new().unwrap();
        let queue = FrameQueue::new(10);
        let explode = Arc::new(AtomicBool::new(true));
        let mut s = stage(&db, Arc::clone(&explode), queue.clone());

        queue.push(frame(0));
        match s.step() {
            StepOutcome::Failed(message) => assert!(message.contains("exploded")),
            other => panic!("unexpected {other:?}"),
        }

        explode.store(false, Ordering::SeqCst);
        queue.push(frame(1));
        assert!(matches!(s.step(), StepOutcome::Processed(_)));
    }

    #[test]
    fn test_run_exits_on_stop() {
        let db = TempDir::new().unwrap();
        let s = stage(&db, Arc::new(AtomicBool::new(false)), FrameQueue::new(4));
        let stop = s.stop.clone();
        let handle = std::thread::spawn(move || s.run());
        stop.stop();
        handle.join().unwrap();
    }
}
