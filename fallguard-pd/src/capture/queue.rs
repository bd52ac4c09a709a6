//! Bounded, lossy frame queue between the capture thread and the worker
//!
//! Writes never block: when the queue is full the oldest unread frame is evicted before
//! the new one is inserted. Reads never block: an empty queue yields `None`.

use super::frame::Frame;
use crossbeam_channel::{bounded, Receiver, Sender, TrySendError};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// Default number of buffered frames
pub const DEFAULT_QUEUE_CAPACITY: usize = 5;

/// Drop-oldest frame queue
///
/// Cloning yields another handle to the same queue. The capture thread is the only
/// producer; it also holds a receiver so it can evict.
#[derive(Clone)]
pub struct FrameQueue {
    tx: Sender<Frame>,
    rx: Receiver<Frame>,
    capacity: usize,
    evicted: Arc<AtomicU64>,
}

impl FrameQueue {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        let (tx, rx) = bounded(capacity);
        Self {
            tx,
            rx,
            capacity,
            evicted: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Insert a frame, evicting the oldest if full
    ///
    /// Returns `true` when a frame was evicted to make room.
    pub fn push(&self, frame: Frame) -> bool {
        let mut pending = frame;
        let mut evicted = false;
        loop {
            match self.tx.try_send(pending) {
                Ok(()) => return evicted,
                Err(TrySendError::Full(frame)) => {
                    // A concurrent reader may have drained the slot already
                    if self.rx.try_recv().is_ok() {
                        evicted = true;
                        self.evicted.fetch_add(1, Ordering::Relaxed);
                    }
                    pending = frame;
                }
                // Both ends live in this struct, so this only happens during teardown
                Err(TrySendError::Disconnected(_)) => return evicted,
            }
        }
    }

    /// Take the oldest buffered frame, if any
    pub fn pop(&self) -> Option<Frame> {
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

    /// Total frames evicted since creation
    pub fn evicted_total(&self) -> u64 {
        self.evicted.load(Ordering::Relaxed)
    }

    /// Drop everything buffered
    pub fn clear(&self) {
        while self.rx.try_recv().is_ok() {}
    }
}

impl Default for FrameQueue {
    fn default() -> Self {
        Self::new(DEFAULT_QUEUE_CAPACITY)
    }
}
