use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Instant;

use parking_lot::Mutex;

use crate::models::config::EngineConfig;
use crate::models::session::{SessionDiagnostics, SessionInfo, SessionSummary};
use crate::models::error::CaptureError;
use crate::processing::format_converter::FormatConverter;
use crate::processing::frame_queue::{FrameQueue, PushOutcome};

/// State shared between the engine, provider threads and the delivery thread
/// for the lifetime of one capture session.
pub(crate) struct SessionShared {
    pub info: SessionInfo,
    pub queue: FrameQueue,
    pub diagnostics: Mutex<SessionDiagnostics>,
    converter: Mutex<FormatConverter>,
    started: Instant,
    ended: AtomicBool,
    announced: AtomicBool,
}

impl SessionShared {
    pub fn new(config: &EngineConfig, device_name: String) -> Self {
        Self {
            info: SessionInfo::new(config.format, device_name),
            queue: FrameQueue::new(config.queue_capacity),
            diagnostics: Mutex::new(SessionDiagnostics::default()),
            converter: Mutex::new(FormatConverter::new(config.format)),
            started: Instant::now(),
            ended: AtomicBool::new(false),
            announced: AtomicBool::new(false),
        }
    }

    /// Convert a provider buffer and queue it for delivery.
    pub fn accept(&self, samples: &[f32], sample_rate: u32, channels: u16) {
        if self.has_ended() {
            return;
        }
        // Convert and enqueue under one lock: the resampler carries state
        // from buffer to buffer, so queue order must match conversion order.
        let outcome = {
            let mut converter = self.converter.lock();
            let bytes = converter.convert(samples, sample_rate, channels);
            if bytes.is_empty() {
                None
            } else {
                Some(self.queue.push(bytes))
            }
        };

        let mut diagnostics = self.diagnostics.lock();
        diagnostics.provider_callbacks += 1;
        if outcome == Some(PushOutcome::QueuedDroppedOldest) {
            diagnostics.frames_dropped += 1;
            if diagnostics.frames_dropped.is_power_of_two() {
                log::warn!(
                    "session {}: consumer is falling behind, {} buffers dropped",
                    self.info.id,
                    diagnostics.frames_dropped
                );
            }
        }
    }

    pub fn record_delivery(&self, bytes: usize) {
        let mut diagnostics = self.diagnostics.lock();
        diagnostics.frames_delivered += 1;
        diagnostics.bytes_delivered += bytes as u64;
    }

    /// Close the delivery queue, counting whatever was still waiting.
    pub fn close_queue(&self) {
        let discarded = self.queue.close();
        if discarded > 0 {
            self.diagnostics.lock().frames_discarded_at_stop += discarded as u64;
        }
    }

    pub fn has_ended(&self) -> bool {
        self.ended.load(Ordering::SeqCst)
    }

    /// Marks the session ended. Returns `true` for the first caller only.
    pub fn mark_ended(&self) -> bool {
        !self.ended.swap(true, Ordering::SeqCst)
    }

    /// Claims the session's `Active` notification. Returns `true` for the
    /// first caller only; both callers hold the engine's event lock.
    pub fn mark_announced(&self) -> bool {
        !self.announced.swap(true, Ordering::SeqCst)
    }

    pub fn summary(&self, failure: Option<CaptureError>) -> SessionSummary {
        SessionSummary {
            info: self.info.clone(),
            duration: self.started.elapsed(),
            diagnostics: self.diagnostics.lock().clone(),
            failure,
        }
    }
}

/// A running session as held by the engine's control lock.
pub(crate) struct ActiveSession {
    pub shared: Arc<SessionShared>,
    delivery: Option<JoinHandle<()>>,
}

impl ActiveSession {
    pub fn new(shared: Arc<SessionShared>, delivery: JoinHandle<()>) -> Self {
        Self {
            shared,
            delivery: Some(delivery),
        }
    }

    /// Wait for the delivery thread to exit.
    ///
    /// When called from the delivery thread itself (the consumer stopping its
    /// own session) the handle is detached instead: the loop exits as soon as
    /// the consumer returns because the queue is already closed.
    pub fn join_delivery(&mut self) {
        let Some(handle) = self.delivery.take() else {
            return;
        };
        if handle.thread().id() == thread::current().id() {
            return;
        }
        if handle.join().is_err() {
            log::error!("session {}: delivery thread panicked", self.shared.info.id);
        }
    }
}
