//! Synthetic capture provider.
//!
//! Generates audio on its own threads at real-time pace. Used on hosts
//! without a native backend, for demos, and to exercise the engine's
//! delivery guarantees (multi-threaded pushing, mid-session failures).

use std::f32::consts::TAU;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use crate::models::error::CaptureError;
use crate::traits::capture_provider::{CaptureProvider, ProviderSink};

/// What the synthetic source writes into each buffer.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum SyntheticSignal {
    /// Sine tone at `frequency` Hz and `amplitude` (0.0–1.0), same on every channel.
    Tone { frequency: f32, amplitude: f32 },
    /// Every sample of buffer `n` equals `n` (0-based, counted across all
    /// threads). With a single thread this lets a consumer check ordering
    /// and gaps; with several, numbers are claimed before pushing, so
    /// buffers may reach the engine out of number order.
    Sequence,
    Silence,
}

/// Configurable software audio source.
pub struct SyntheticSource {
    sample_rate: u32,
    channels: u16,
    buffer_frames: usize,
    interval: Duration,
    threads: usize,
    signal: SyntheticSignal,
    available: bool,
    start_error: Option<CaptureError>,
    stop_error: Option<CaptureError>,
    fail_after: Option<u64>,
    running: Arc<AtomicBool>,
    buffers_pushed: Arc<AtomicU64>,
    handles: Vec<thread::JoinHandle<()>>,
}

impl SyntheticSource {
    /// 440 Hz tone, 48 kHz stereo, 10 ms buffers.
    pub fn new() -> Self {
        Self {
            sample_rate: 48_000,
            channels: 2,
            buffer_frames: 480,
            interval: Duration::from_millis(10),
            threads: 1,
            signal: SyntheticSignal::Tone {
                frequency: 440.0,
                amplitude: 0.5,
            },
            available: true,
            start_error: None,
            stop_error: None,
            fail_after: None,
            running: Arc::new(AtomicBool::new(false)),
            buffers_pushed: Arc::new(AtomicU64::new(0)),
            handles: Vec::new(),
        }
    }

    pub fn with_format(mut self, sample_rate: u32, channels: u16) -> Self {
        self.sample_rate = sample_rate;
        self.channels = channels;
        self
    }

    /// Frames per buffer. The pace follows: one buffer per `frames / rate` seconds.
    pub fn with_buffer_frames(mut self, frames: usize) -> Self {
        self.buffer_frames = frames.max(1);
        self.interval = Duration::from_secs_f64(self.buffer_frames as f64 / self.sample_rate.max(1) as f64);
        self
    }

    /// Override the pause between buffers.
    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }

    /// Push from `threads` threads concurrently.
    pub fn with_threads(mut self, threads: usize) -> Self {
        self.threads = threads.max(1);
        self
    }

    pub fn with_signal(mut self, signal: SyntheticSignal) -> Self {
        self.signal = signal;
        self
    }

    pub fn unavailable(mut self) -> Self {
        self.available = false;
        self
    }

    /// Make `start` fail with `error`.
    pub fn failing_start(mut self, error: CaptureError) -> Self {
        self.start_error = Some(error);
        self
    }

    /// Make `stop` report `error` (after releasing its threads).
    pub fn failing_stop(mut self, error: CaptureError) -> Self {
        self.stop_error = Some(error);
        self
    }

    /// Report a device failure once the next session has pushed `buffers`
    /// buffers. Later sessions run normally.
    pub fn failing_after(mut self, buffers: u64) -> Self {
        self.fail_after = Some(buffers);
        self
    }

    /// Buffers pushed since the source was created.
    pub fn buffers_pushed(&self) -> u64 {
        self.buffers_pushed.load(Ordering::SeqCst)
    }

    /// Shared counter of pushed buffers, readable after the source moved into an engine.
    pub fn push_counter(&self) -> Arc<AtomicU64> {
        Arc::clone(&self.buffers_pushed)
    }
}

impl Default for SyntheticSource {
    fn default() -> Self {
        Self::new()
    }
}

impl CaptureProvider for SyntheticSource {
    fn is_available(&self) -> bool {
        self.available
    }

    fn start(&mut self, sink: ProviderSink) -> Result<(), CaptureError> {
        if !self.available {
            return Err(CaptureError::DeviceNotAvailable);
        }
        if let Some(error) = &self.start_error {
            return Err(error.clone());
        }
        if self.running.load(Ordering::SeqCst) {
            return Err(CaptureError::InvalidState("synthetic source already running".into()));
        }

        self.running.store(true, Ordering::SeqCst);
        let session_pushed = Arc::new(AtomicU64::new(0));
        let fail_after = self.fail_after.take();
        for index in 0..self.threads {
            let generator = Generator {
                sample_rate: self.sample_rate,
                channels: self.channels,
                buffer_frames: self.buffer_frames,
                interval: self.interval,
                signal: self.signal,
                fail_after,
                running: Arc::clone(&self.running),
                pushed: Arc::clone(&self.buffers_pushed),
                session_pushed: Arc::clone(&session_pushed),
            };
            let sink = sink.clone();
            let spawned = thread::Builder::new()
                .name(format!("synthetic-capture-{}", index))
                .spawn(move || generator.run(sink));

            match spawned {
                Ok(handle) => self.handles.push(handle),
                Err(e) => {
                    let _ = self.stop();
                    return Err(CaptureError::Device(format!("failed to spawn capture thread: {}", e)));
                }
            }
        }
        Ok(())
    }

    fn stop(&mut self) -> Result<(), CaptureError> {
        self.running.store(false, Ordering::SeqCst);
        for handle in self.handles.drain(..) {
            let _ = handle.join();
        }
        match &self.stop_error {
            Some(error) => Err(error.clone()),
            None => Ok(()),
        }
    }

    fn device_name(&self) -> String {
        match self.signal {
            SyntheticSignal::Tone { frequency, .. } => format!("Synthetic Tone ({} Hz)", frequency),
            SyntheticSignal::Sequence => "Synthetic Sequence".into(),
            SyntheticSignal::Silence => "Synthetic Silence".into(),
        }
    }
}

/// Per-thread generator state.
struct Generator {
    sample_rate: u32,
    channels: u16,
    buffer_frames: usize,
    interval: Duration,
    signal: SyntheticSignal,
    fail_after: Option<u64>,
    running: Arc<AtomicBool>,
    pushed: Arc<AtomicU64>,
    session_pushed: Arc<AtomicU64>,
}

impl Generator {
    fn run(self, sink: ProviderSink) {
        let channels = self.channels.max(1) as usize;
        let mut buffer = vec![0.0f32; self.buffer_frames * channels];
        let mut phase = 0.0f32;

        while self.running.load(Ordering::SeqCst) {
            let in_session = self.session_pushed.fetch_add(1, Ordering::SeqCst);
            if self.fail_after.is_some_and(|limit| in_session >= limit) {
                log::error!("synthetic source: simulated device failure after {} buffers", in_session);
                sink.fail(CaptureError::Device("synthetic device invalidated".into()));
                self.running.store(false, Ordering::SeqCst);
                break;
            }
            let sequence = self.pushed.fetch_add(1, Ordering::SeqCst);

            match self.signal {
                SyntheticSignal::Tone { frequency, amplitude } => {
                    let step = TAU * frequency / self.sample_rate.max(1) as f32;
                    for frame in buffer.chunks_exact_mut(channels) {
                        frame.fill(phase.sin() * amplitude);
                        phase = (phase + step) % TAU;
                    }
                }
                SyntheticSignal::Sequence => buffer.fill(sequence as f32),
                SyntheticSignal::Silence => buffer.fill(0.0),
            }

            sink.push(&buffer, self.sample_rate, self.channels);
            if !self.interval.is_zero() {
                thread::sleep(self.interval);
            }
        }
    }
}
