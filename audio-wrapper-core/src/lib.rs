//! # audio-wrapper-core
//!
//! Platform-agnostic native audio capture engine.
//!
//! Owns the lifecycle of one capture session at a time, answers permission
//! queries and drives permission prompts, and delivers captured audio as raw
//! byte buffers to a single consumer, serialized and in capture order.
//! Platform backends implement `CaptureProvider` and `PermissionAuthority`
//! and plug into the generic `CaptureEngine`.
//!
//! ## Architecture
//!
//! ```text
//! audio-wrapper-core (this crate)
//! ├── engine/       ← CaptureEngine, PermissionBroker, delivery thread
//! ├── models/       ← CaptureError, CaptureState, PermissionStatus, EngineConfig, etc.
//! ├── processing/   ← FormatConverter, FrameQueue
//! ├── sources/      ← SyntheticSource, StaticPermissions
//! └── traits/       ← CaptureProvider, PermissionAuthority, CaptureDelegate
//! ```
//!
//! ## Frame format
//!
//! Consumers receive interleaved little-endian PCM in the engine's
//! `FrameFormat`: 48 kHz stereo 32-bit float unless configured otherwise.
//! Every buffer holds a whole number of frames.

pub mod engine;
pub mod models;
pub mod processing;
pub mod sources;
pub mod traits;

// Re-export key types at crate root for convenience.
pub use engine::capture_engine::CaptureEngine;
pub use engine::delivery::FrameConsumer;
pub use engine::permissions::PermissionBroker;
pub use models::config::{EngineConfig, FrameFormat, SampleEncoding};
pub use models::error::{CaptureError, ErrorKind};
pub use models::permission::{DeviceType, PermissionResult, PermissionStatus};
pub use models::session::{SessionDiagnostics, SessionInfo, SessionSummary};
pub use models::state::CaptureState;
pub use processing::format_converter::{FormatConverter, LinearResampler};
pub use processing::frame_queue::FrameQueue;
pub use sources::static_permissions::StaticPermissions;
pub use sources::synthetic::{SyntheticSignal, SyntheticSource};
pub use traits::capture_delegate::CaptureDelegate;
pub use traits::capture_provider::{AudioBufferCallback, CaptureProvider, FailureCallback, ProviderSink};
pub use traits::permission_authority::{PermissionAuthority, PermissionCompletion};
