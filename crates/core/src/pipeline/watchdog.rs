use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::pipeline::frame_cache::FrameCache;
use crate::pipeline::frame_queue::FrameQueue;
use crate::shared::config::WatchdogConfig;
use crate::shared::stop_signal::StopSignal;

/// What one watchdog tick observed and did.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct WatchdogCheck {
    /// Age of the cached frame when it exceeded the staleness limit.
    pub stale_for: Option<Duration>,
    /// The cached frame was put back on an empty queue.
    pub resupplied: bool,
}

/// Reports a stalled frame cache and keeps the work queue from running
/// dry. It never restarts ingestion.
pub struct Watchdog {
    queue: FrameQueue,
    cache: Arc<FrameCache>,
    stop: StopSignal,
    ingestion_finished: Arc<AtomicBool>,
    config: WatchdogConfig,
}

impl Watchdog {
    pub fn new(
        queue: FrameQueue,
        cache: Arc<FrameCache>,
        stop: StopSignal,
        ingestion_finished: Arc<AtomicBool>,
        config: WatchdogConfig,
    ) -> Self {
        Self {
            queue,
            cache,
            stop,
            ingestion_finished,
            config,
        }
    }

    pub fn run(self) {
        log::info!("Watchdog started");
        let interval = Duration::from_millis(self.config.interval_ms);
        while !self.stop.wait(interval) {
            self.check(Instant::now());
        }
        log::info!("Watchdog stopped");
    }

    pub fn check(&self, now: Instant) -> WatchdogCheck {
        let mut result = WatchdogCheck::default();

        let limit = Duration::from_millis(self.config.stale_after_ms);
        if let Some(age) = self.cache.age(now).filter(|age| *age > limit) {
            log::warn!(
                "No new frame for {:.1}s; the video source may be stalled",
                age.as_secs_f64()
            );
            result.stale_for = Some(age);
        }

        // After end of stream an empty queue is expected, not an underflow.
        if self.queue.is_empty() && !self.ingestion_finished.load(Ordering::SeqCst) {
            if let Some(cached) = self.cache.latest() {
                result.resupplied = self.queue.offer(cached.frame);
            }
        }
        result
    }
}
