use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{Duration, Instant};

use crate::shared::frame::Frame;

/// The most recently acquired frame and when it arrived.
#[derive(Clone, Debug)]
pub struct CachedFrame {
    pub frame: Arc<Frame>,
    pub captured_at: Instant,
}

/// Single-slot cache of the latest frame. Readers always get a whole
/// frame, never a partially replaced one.
#[derive(Debug, Default)]
pub struct FrameCache {
    slot: Mutex<Option<CachedFrame>>,
}

impl FrameCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn store(&self, frame: Arc<Frame>, captured_at: Instant) {
        *self.slot() = Some(CachedFrame { frame, captured_at });
    }

    pub fn latest(&self) -> Option<CachedFrame> {
        self.slot().clone()
    }

    /// Time since the cached frame arrived; `None` before the first frame.
    pub fn age(&self, now: Instant) -> Option<Duration> {
        self.slot()
            .as_ref()
            .map(|c| now.saturating_duration_since(c.captured_at))
    }

    fn slot(&self) -> MutexGuard<'_, Option<CachedFrame>> {
        match self.slot.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }
}
