use std::collections::VecDeque;

use parking_lot::{Condvar, Mutex};

#[derive(Debug)]
struct QueueInner {
    frames: VecDeque<Vec<u8>>,
    closed: bool,
}

/// Bounded, closable FIFO of encoded audio buffers.
///
/// Sits between capture threads (producers) and the delivery thread (single
/// consumer). Producers never block: on overflow the oldest buffer is
/// dropped. Once closed, pushes are ignored and `pop` returns `None`.
#[derive(Debug)]
pub struct FrameQueue {
    inner: Mutex<QueueInner>,
    ready: Condvar,
    capacity: usize,
}

/// Outcome of a single `push`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PushOutcome {
    Queued,
    /// Queued after discarding the oldest buffer.
    QueuedDroppedOldest,
    /// The queue was closed; the buffer was discarded.
    Closed,
}

impl FrameQueue {
    pub fn new(capacity: usize) -> Self {
        Self {
            inner: Mutex::new(QueueInner {
                frames: VecDeque::with_capacity(capacity),
                closed: false,
            }),
            ready: Condvar::new(),
            capacity: capacity.max(1),
        }
    }

    pub fn push(&self, frame: Vec<u8>) -> PushOutcome {
        let mut inner = self.inner.lock();
        if inner.closed {
            return PushOutcome::Closed;
        }

        let mut outcome = PushOutcome::Queued;
        if inner.frames.len() >= self.capacity {
            inner.frames.pop_front();
            outcome = PushOutcome::QueuedDroppedOldest;
        }
        inner.frames.push_back(frame);
        drop(inner);

        self.ready.notify_one();
        outcome
    }

    /// Wait for the next buffer. Returns `None` once the queue is closed.
    pub fn pop(&self) -> Option<Vec<u8>> {
        let mut inner = self.inner.lock();
        loop {
            if inner.closed {
                return None;
            }
            if let Some(frame) = inner.frames.pop_front() {
                return Some(frame);
            }
            self.ready.wait(&mut inner);
        }
    }

    /// Close the queue and wake the consumer. Returns how many buffers were discarded.
    pub fn close(&self) -> usize {
        let mut inner = self.inner.lock();
        inner.closed = true;
        let discarded = inner.frames.len();
        inner.frames.clear();
        drop(inner);

        self.ready.notify_all();
        discarded
    }

    pub fn is_closed(&self) -> bool {
        self.inner.lock().closed
    }

    /// Number of buffers waiting for delivery.
    pub fn len(&self) -> usize {
        self.inner.lock().frames.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }
}
