use std::sync::Arc;

use crate::models::error::CaptureError;

/// Callback invoked when an audio buffer is available.
///
/// Parameters:
/// - `samples`: Interleaved f32 samples.
/// - `sample_rate`: The actual sample rate of the delivered audio.
/// - `channels`: Number of interleaved channels.
pub type AudioBufferCallback = Arc<dyn Fn(&[f32], u32, u16) + Send + Sync + 'static>;

/// Callback invoked when a running provider can no longer deliver audio.
pub type FailureCallback = Arc<dyn Fn(CaptureError) + Send + Sync + 'static>;

/// Where a running provider pushes its buffers and reports failures.
///
/// Cheap to clone; providers with several capture threads hand each thread
/// its own clone. Pushing after the session ended is a no-op.
#[derive(Clone)]
pub struct ProviderSink {
    on_buffer: AudioBufferCallback,
    on_failure: FailureCallback,
}

impl ProviderSink {
    pub fn new(on_buffer: AudioBufferCallback, on_failure: FailureCallback) -> Self {
        Self { on_buffer, on_failure }
    }

    /// Hand one captured buffer to the engine. Never blocks on the consumer.
    pub fn push(&self, samples: &[f32], sample_rate: u32, channels: u16) {
        (self.on_buffer)(samples, sample_rate, channels);
    }

    /// Report an unrecoverable failure (device invalidated, stream lost).
    ///
    /// The engine tears the session down; the provider should stop pushing
    /// and let its capture thread exit.
    pub fn fail(&self, error: CaptureError) {
        (self.on_failure)(error);
    }
}

/// Interface for platform-specific audio capture sources.
///
/// Implemented by:
/// - `SyntheticSource` (all platforms)
/// - `WasapiCapture` (Windows, loopback or microphone)
pub trait CaptureProvider: Send {
    /// Whether this capture source is currently available.
    fn is_available(&self) -> bool;

    /// Start capturing audio, delivering buffers via `sink`.
    ///
    /// Fails with `DeviceNotAvailable` or `Device` if the device cannot be
    /// opened. Buffers may be pushed from any thread.
    fn start(&mut self, sink: ProviderSink) -> Result<(), CaptureError>;

    /// Stop capturing and release resources.
    ///
    /// Must be idempotent. Once it returns, no further pushes happen.
    fn stop(&mut self) -> Result<(), CaptureError>;

    /// Human-readable name of the device backing this provider.
    fn device_name(&self) -> String;
}
