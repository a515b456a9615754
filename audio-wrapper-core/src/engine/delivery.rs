use std::sync::Arc;
use std::thread::{self, JoinHandle};

use crate::models::error::CaptureError;

use super::session::SessionShared;

/// Receives each captured buffer, in capture order, on the delivery thread.
pub type FrameConsumer = Box<dyn FnMut(&[u8]) + Send + 'static>;

/// Spawn the thread that hands queued buffers to the consumer.
///
/// This thread is the only caller of the consumer, so invocations never
/// overlap even when the provider pushes from several threads.
pub(crate) fn spawn_delivery(
    session: Arc<SessionShared>,
    mut consumer: FrameConsumer,
) -> Result<JoinHandle<()>, CaptureError> {
    thread::Builder::new()
        .name("audio-delivery".into())
        .spawn(move || {
            while let Some(frame) = session.queue.pop() {
                consumer(&frame);
                session.record_delivery(frame.len());
            }
            log::debug!("session {}: delivery loop finished", session.info.id);
        })
        .map_err(|e| CaptureError::Device(format!("failed to spawn delivery thread: {}", e)))
}
