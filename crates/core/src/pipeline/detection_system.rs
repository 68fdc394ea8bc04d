//! Controller that owns the shared context and the stage threads.
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use thiserror::Error;

use crate::detection::domain::appearance_embedder::AppearanceEmbedder;
use crate::detection::domain::person_detector::PersonDetector;
use crate::detection::domain::person_tracker::PersonTracker;
use crate::pipeline::face_pipeline::FacePipeline;
use crate::pipeline::frame_cache::{CachedFrame, FrameCache};
use crate::pipeline::frame_processor::FrameProcessor;
use crate::pipeline::frame_queue::FrameQueue;
use crate::pipeline::ingestion_stage::IngestionStage;
use crate::pipeline::pipeline_logger::{PipelineLogger, StatsPipelineLogger};
use crate::pipeline::processing_stage::ProcessingStage;
use crate::pipeline::watchdog::Watchdog;
use crate::recognition::domain::face_detector::FaceDetector;
use crate::recognition::identity_resolver::IdentityResolver;
use crate::registry::entity_registry::{lock, EntityRegistry, PersonView, SharedRegistry};
use crate::shared::config::SystemConfig;
use crate::shared::stop_signal::StopSignal;
use crate::video::domain::video_source::VideoSource;

const JOIN_POLL: Duration = Duration::from_millis(10);

#[derive(Error, Debug)]
pub enum SystemError {
    #[error("detection system already started")]
    AlreadyStarted,
    #[error("failed to spawn {stage} thread: {source}")]
    Spawn {
        stage: &'static str,
        #[source]
        source: std::io::Error,
    },
}

/// Model-backed collaborators the processing stage drives.
pub struct Models {
    pub person_detector: Box<dyn PersonDetector>,
    pub tracker: Box<dyn PersonTracker>,
    pub embedder: Box<dyn AppearanceEmbedder>,
    pub face_detector: Box<dyn FaceDetector>,
    pub resolver: IdentityResolver,
}

struct Pending {
    source: Box<dyn VideoSource>,
    processor: FrameProcessor,
    logger: Box<dyn PipelineLogger>,
}

pub struct DetectionSystem {
    config: SystemConfig,
    queue: FrameQueue,
    cache: Arc<FrameCache>,
    registry: SharedRegistry,
    stop: StopSignal,
    ingestion_finished: Arc<AtomicBool>,
    pending: Option<Pending>,
    handles: Vec<(&'static str, JoinHandle<()>)>,
}

impl DetectionSystem {
    pub fn new(config: SystemConfig, source: Box<dyn VideoSource>, models: Models) -> Self {
        let registry = EntityRegistry::shared();
        let faces = FacePipeline::new(models.face_detector, models.resolver, &config.faces);
        let processor = FrameProcessor::new(
            models.person_detector,
            models.tracker,
            models.embedder,
            faces,
            Arc::clone(&registry),
            config.eviction_window(),
        );
        let logger = Box::new(StatsPipelineLogger::new(config.processing.progress_every));

        Self {
            queue: FrameQueue::new(config.ingestion.queue_capacity),
            cache: Arc::new(FrameCache::new()),
            registry,
            stop: StopSignal::new(),
            ingestion_finished: Arc::new(AtomicBool::new(false)),
            pending: Some(Pending {
                source,
                processor,
                logger,
            }),
            handles: Vec::new(),
            config,
        }
    }

    /// Replaces the default stats logger. Has no effect once started.
    pub fn with_logger(mut self, logger: Box<dyn PipelineLogger>) -> Self {
        if let Some(pending) = self.pending.as_mut() {
            pending.logger = logger;
        }
        self
    }

    /// Spawns the ingestion, processing and watchdog threads.
    pub fn start(&mut self) -> Result<(), SystemError> {
        let pending = self.pending.take().ok_or(SystemError::AlreadyStarted)?;

        let ingestion = IngestionStage::new(
            pending.source,
            self.queue.clone(),
            Arc::clone(&self.cache),
            self.stop.clone(),
            Arc::clone(&self.ingestion_finished),
            self.config.ingestion.clone(),
        );
        let processing = ProcessingStage::new(
            pending.processor,
            self.queue.clone(),
            self.stop.clone(),
            pending.logger,
            self.config.processing.clone(),
        );
        let watchdog = Watchdog::new(
            self.queue.clone(),
            Arc::clone(&self.cache),
            self.stop.clone(),
            Arc::clone(&self.ingestion_finished),
            self.config.watchdog.clone(),
        );

        self.spawn("ingestion", move || ingestion.run())?;
        self.spawn("processing", move || processing.run())?;
        self.spawn("watchdog", move || watchdog.run())?;
        Ok(())
    }

    fn spawn(
        &mut self,
        stage: &'static str,
        body: impl FnOnce() + Send + 'static,
    ) -> Result<(), SystemError> {
        let handle = std::thread::Builder::new()
            .name(format!("facetrack-{stage}"))
            .spawn(body)
            .map_err(|source| {
                self.stop.stop();
                SystemError::Spawn { stage, source }
            })?;
        self.handles.push((stage, handle));
        Ok(())
    }

    /// Signals every stage and joins them against one shared deadline.
    ///
    /// Returns the stages still running at the deadline; they are detached.
    pub fn stop(&mut self) -> Vec<&'static str> {
        self.stop.stop();
        let deadline = Instant::now() + Duration::from_millis(self.config.shutdown.join_timeout_ms);
        let mut unfinished = Vec::new();

        for (stage, handle) in self.handles.drain(..) {
            while !handle.is_finished() && Instant::now() < deadline {
                std::thread::sleep(JOIN_POLL);
            }
            if handle.is_finished() {
                if handle.join().is_err() {
                    log::error!("{stage} thread panicked");
                }
            } else {
                log::warn!("{stage} thread did not stop in time; detaching");
                unfinished.push(stage);
            }
        }
        unfinished
    }

    pub fn snapshot(&self) -> Vec<PersonView> {
        lock(&self.registry).snapshot()
    }

    pub fn latest_frame(&self) -> Option<CachedFrame> {
        self.cache.latest()
    }

    pub fn is_ingestion_finished(&self) -> bool {
        self.ingestion_finished.load(Ordering::SeqCst)
    }

    pub fn is_stopped(&self) -> bool {
        self.stop.is_stopped()
    }

    pub fn queue_len(&self) -> usize {
        self.queue.len()
    }

    pub fn registry(&self) -> SharedRegistry {
        Arc::clone(&self.registry)
    }
}

impl Drop for DetectionSystem {
    fn drop(&mut self) {
        if !self.handles.is_empty() {
            self.stop();
        }
    }
}
