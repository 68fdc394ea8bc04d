use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::pipeline::frame_cache::FrameCache;
use crate::pipeline::frame_queue::FrameQueue;
use crate::shared::config::IngestionConfig;
use crate::shared::frame::fit_within;
use crate::shared::stop_signal::StopSignal;
use crate::video::domain::video_source::{FrameRead, VideoSource};

/// Pulls frames from the video source into the frame cache and the work
/// queue at a fixed cadence.
pub struct IngestionStage {
    source: Box<dyn VideoSource>,
    queue: FrameQueue,
    cache: Arc<FrameCache>,
    stop: StopSignal,
    finished: Arc<AtomicBool>,
    config: IngestionConfig,
}

impl IngestionStage {
    pub fn new(
        source: Box<dyn VideoSource>,
        queue: FrameQueue,
        cache: Arc<FrameCache>,
        stop: StopSignal,
        finished: Arc<AtomicBool>,
        config: IngestionConfig,
    ) -> Self {
        Self {
            source,
            queue,
            cache,
            stop,
            finished,
            config,
        }
    }

    /// Runs until the stop signal fires or the source ends.
    ///
    /// A source that cannot be opened or fails outright stops the whole
    /// system; a clean end of stream only ends this stage.
    pub fn run(mut self) {
        log::info!("Ingestion stage started");
        let frames = self.pump();
        self.source.close();
        self.finished.store(true, Ordering::SeqCst);
        log::info!("Ingestion stage stopped after {frames} frames");
    }

    fn pump(&mut self) -> usize {
        let info = match self.source.open() {
            Ok(info) => info,
            Err(e) => {
                log::error!("{e}");
                self.stop.stop();
                return 0;
            }
        };
        let kind = if info.is_live() { "live" } else { "recorded" };
        log::info!(
            "Opened {kind} source {} ({}x{} @ {:.1} fps)",
            info.locator,
            info.width,
            info.height,
            info.fps
        );

        let target = fit_within(
            info.width,
            info.height,
            self.config.max_display_width,
            self.config.max_display_height,
        );
        let downscale = target != (info.width, info.height);
        if downscale {
            log::info!("Downscaling frames to {}x{}", target.0, target.1);
        }

        let interval = Duration::from_millis(self.config.frame_interval_ms);
        let retry_delay = Duration::from_millis(self.config.retry_delay_ms);
        let mut count = 0;

        while !self.stop.is_stopped() {
            match self.source.read() {
                Ok(FrameRead::Frame(frame)) => {
                    let frame = if downscale {
                        frame.resized(target.0, target.1)
                    } else {
                        frame
                    };
                    let frame = Arc::new(frame.with_index(count));
                    count += 1;

                    self.cache.store(Arc::clone(&frame), Instant::now());
                    let dropped = self.queue.push(frame);
                    if dropped > 0 {
                        log::debug!("Work queue full, dropped {dropped} stale frame(s)");
                    }
                    self.stop.wait(interval);
                }
                Ok(FrameRead::Retry(reason)) => {
                    log::debug!("Frame read failed, retrying: {reason}");
                    self.stop.wait(retry_delay);
                }
                Ok(FrameRead::EndOfStream) => {
                    log::info!("Video source {} reached end of stream", info.locator);
                    break;
                }
                Err(e) => {
                    log::error!("Video source {} failed: {e}", info.locator);
                    self.stop.stop();
                    break;
                }
            }
        }
        count
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::VecDeque;

    use crate::shared::frame::Frame;
    use crate::shared::source_info::SourceInfo;

    enum Step {
        Frame(u8),
        Retry,
        End,
        Fail,
    }

    struct ScriptedSource {
        width: u32,
        height: u32,
        open_fails: bool,
        steps: VecDeque<Step>,
        closed: Arc<AtomicBool>,
    }

    impl VideoSource for ScriptedSource {
        fn open(&mut self) -> Result<SourceInfo, Box<dyn std::error::Error>> {
            if self.open_fails {
                return Err("device busy".into());
            }
            Ok(SourceInfo {
                width: self.width,
                height: self.height,
                fps: 25.0,
                locator: "scripted".into(),
            })
        }

        fn read(&mut self) -> Result<FrameRead, Box<dyn std::error::Error>> {
            match self.steps.pop_front().unwrap_or(Step::End) {
                Step::Frame(v) => Ok(FrameRead::Frame(Frame::new(
                    vec![v; (self.width * self.height * 3) as usize],
                    self.width,
                    self.height,
                    3,
                    0,
                ))),
                Step::Retry => Ok(FrameRead::Retry("corrupt packet".into())),
                Step::End => Ok(FrameRead::EndOfStream),
                Step::Fail => Err("device unplugged".into()),
            }
        }

        fn close(&mut self) {
            self.closed.store(true, Ordering::SeqCst);
        }
    }

    struct Run {
        queue: FrameQueue,
        cache: Arc<FrameCache>,
        stop: StopSignal,
        finished: Arc<AtomicBool>,
        closed: Arc<AtomicBool>,
    }

    fn run(steps: Vec<Step>, open_fails: bool, size: (u32, u32), config: IngestionConfig) -> Run {
        let queue = FrameQueue::new(config.queue_capacity);
        let cache = Arc::new(FrameCache::new());
        let stop = StopSignal::new();
        let finished = Arc::new(AtomicBool::new(false));
        let closed = Arc::new(AtomicBool::new(false));
        let source = ScriptedSource {
            width: size.0,
            height: size.1,
            open_fails,
            steps: steps.into(),
            closed: Arc::clone(&closed),
        };
        IngestionStage::new(
            Box::new(source),
            queue.clone(),
            Arc::clone(&cache),
            stop.clone(),
            Arc::clone(&finished),
            config,
        )
        .run();
        Run {
            queue,
            cache,
            stop,
            finished,
            closed,
        }
    }

    fn fast() -> IngestionConfig {
        IngestionConfig {
            frame_interval_ms: 0,
            retry_delay_ms: 0,
            ..IngestionConfig::default()
        }
    }

    #[test]
    fn test_frames_reach_queue_and_cache() {
        let r = run(vec![Step::Frame(1), Step::Frame(2), Step::End], false, (4, 4), fast());
        assert_eq!(r.queue.len(), 2);
        let latest = r.cache.latest().unwrap();
        assert_eq!(latest.frame.data()[0], 2);
        assert_eq!(latest.frame.index(), 1);
        assert!(r.finished.load(Ordering::SeqCst));
        assert!(r.closed.load(Ordering::SeqCst));
        assert!(!r.stop.is_stopped());
    }

    #[test]
    fn test_retry_is_not_fatal() {
        let r = run(vec![Step::Retry, Step::Frame(7), Step::End], false, (4, 4), fast());
        assert_eq!(r.queue.len(), 1);
        assert!(!r.stop.is_stopped());
    }

    #[test]
    fn test_open_failure_stops_system() {
        let r = run(vec![Step::Frame(1)], true, (4, 4), fast());
        assert!(r.stop.is_stopped());
        assert!(r.finished.load(Ordering::SeqCst));
        assert!(r.queue.is_empty());
    }

    #[test]
    fn test_source_failure_stops_system() {
        let r = run(vec![Step::Frame(1), Step::Fail, Step::Frame(2)], false, (4, 4), fast());
        assert!(r.stop.is_stopped());
        assert_eq!(r.queue.len(), 1);
    }

    #[test]
    fn test_full_queue_keeps_newest_frames() {
        let config = IngestionConfig {
            queue_capacity: 2,
            ..fast()
        };
        let steps = (1..=5).map(Step::Frame).chain([Step::End]).collect();
        let r = run(steps, false, (4, 4), config);
        assert_eq!(r.queue.len(), 2);
        assert_eq!(r.queue.try_pop().unwrap().data()[0], 4);
        assert_eq!(r.queue.try_pop().unwrap().data()[0], 5);
    }

    #[test]
    fn test_oversized_frames_are_downscaled() {
        let config = IngestionConfig {
            max_display_width: 8,
            max_display_height: 8,
            ..fast()
        };
        let r = run(vec![Step::Frame(9), Step::End], false, (16, 8), config);
        let frame = r.queue.try_pop().unwrap();
        assert_eq!((frame.width(), frame.height()), (8, 4));
    }
}
