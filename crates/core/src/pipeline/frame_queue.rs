use std::sync::Arc;
use std::time::Duration;

use crossbeam_channel::{Receiver, RecvTimeoutError, Sender, TrySendError};

use crate::shared::frame::Frame;

/// Bounded work queue between ingestion and processing.
///
/// The producer never blocks: when the queue is full the oldest frame is
/// dropped to make room for the newest one.
#[derive(Clone)]
pub struct FrameQueue {
    tx: Sender<Arc<Frame>>,
    rx: Receiver<Arc<Frame>>,
    capacity: usize,
}

impl FrameQueue {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        let (tx, rx) = crossbeam_channel::bounded(capacity);
        Self { tx, rx, capacity }
    }

    /// Enqueues `frame`, evicting the oldest entries until it fits.
    /// Returns how many frames were dropped.
    pub fn push(&self, frame: Arc<Frame>) -> usize {
        let mut frame = frame;
        let mut dropped = 0;
        loop {
            match self.tx.try_send(frame) {
                Ok(()) => return dropped,
                Err(TrySendError::Full(rejected)) => {
                    if self.rx.try_recv().is_ok() {
                        dropped += 1;
                    }
                    frame = rejected;
                }
                // Both ends live in `self`.
                Err(TrySendError::Disconnected(_)) => return dropped,
            }
        }
    }

    /// Enqueues `frame` only if there is room. Returns whether it was added.
    pub fn offer(&self, frame: Arc<Frame>) -> bool {
        self.tx.try_send(frame).is_ok()
    }

    /// Waits up to `timeout` for the next frame.
    pub fn pop_timeout(&self, timeout: Duration) -> Option<Arc<Frame>> {
        match self.rx.recv_timeout(timeout) {
            Ok(frame) => Some(frame),
            Err(RecvTimeoutError::Timeout) | Err(RecvTimeoutError::Disconnected) => None,
        }
    }

    pub fn try_pop(&self) -> Option<Arc<Frame>> {
        self.rx.try_recv().ok()
    }

    pub fn len(&self) -> usize {
        self.rx.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rx.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }
}
