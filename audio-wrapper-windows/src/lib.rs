//! # audio-wrapper-windows
//!
//! Windows WASAPI backend for audio-wrapper.
//!
//! Provides:
//! - `WasapiCapture`: shared-mode capture of the default render endpoint in
//!   loopback mode (system audio) or of the default microphone
//! - `WindowsPermissions`: microphone privacy check, loopback always allowed
//!
//! ## Usage
//! ```ignore
//! use audio_wrapper_windows::system_audio_engine;
//!
//! let engine = system_audio_engine();
//! engine.start_capture(|frame| sink.write_all(frame).unwrap())?;
//! ```

#[cfg(target_os = "windows")]
pub mod permissions;
#[cfg(target_os = "windows")]
pub mod wasapi_capture;

#[cfg(target_os = "windows")]
pub use permissions::WindowsPermissions;
#[cfg(target_os = "windows")]
pub use wasapi_capture::{Endpoint, WasapiCapture};

#[cfg(target_os = "windows")]
use std::sync::Arc;

#[cfg(target_os = "windows")]
use audio_wrapper_core::{CaptureEngine, CaptureError, DeviceType, EngineConfig};

/// Engine capturing system audio, gated on the `audio` permission.
#[cfg(target_os = "windows")]
pub fn system_audio_engine() -> CaptureEngine<WasapiCapture> {
    CaptureEngine::new(WasapiCapture::loopback(), Arc::new(WindowsPermissions))
}

/// Engine capturing the default microphone, gated on the `microphone` permission.
#[cfg(target_os = "windows")]
pub fn microphone_engine() -> Result<CaptureEngine<WasapiCapture>, CaptureError> {
    let config = EngineConfig {
        required_permissions: vec![DeviceType::Microphone],
        ..Default::default()
    };
    CaptureEngine::with_config(WasapiCapture::microphone(), Arc::new(WindowsPermissions), config)
}
