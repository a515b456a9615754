use serde::{Deserialize, Serialize};

use super::error::CaptureError;
use super::permission::DeviceType;

/// PCM sample encoding of delivered frames. Always little-endian.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SampleEncoding {
    /// 32-bit IEEE float, little-endian.
    F32le,
    /// 16-bit signed integer, little-endian.
    S16le,
}

impl SampleEncoding {
    pub fn bytes_per_sample(&self) -> usize {
        match self {
            Self::F32le => 4,
            Self::S16le => 2,
        }
    }
}

/// Layout of the raw byte buffers handed to the consumer.
///
/// Samples are interleaved; one buffer always holds a whole number of frames.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct FrameFormat {
    /// Sample rate in Hz (default: 48000).
    pub sample_rate: u32,
    /// Channel count, 1 or 2 (default: 2).
    pub channels: u16,
    /// Sample encoding (default: f32le).
    pub encoding: SampleEncoding,
}

impl FrameFormat {
    /// Size in bytes of one interleaved frame.
    pub fn bytes_per_frame(&self) -> usize {
        self.channels as usize * self.encoding.bytes_per_sample()
    }

    pub fn validate(&self) -> Result<(), String> {
        if !(8_000..=192_000).contains(&self.sample_rate) {
            return Err(format!("unsupported sample rate: {}", self.sample_rate));
        }
        if ![1, 2].contains(&self.channels) {
            return Err(format!("unsupported channel count: {}", self.channels));
        }
        Ok(())
    }
}

impl Default for FrameFormat {
    fn default() -> Self {
        Self {
            sample_rate: 48_000,
            channels: 2,
            encoding: SampleEncoding::F32le,
        }
    }
}

/// Configuration for a capture engine.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Format every delivered buffer is converted to.
    pub format: FrameFormat,

    /// Frames buffered between capture and delivery before the oldest is dropped.
    pub queue_capacity: usize,

    /// Device types that must be authorized before capture can start.
    pub required_permissions: Vec<DeviceType>,
}

impl EngineConfig {
    pub fn validate(&self) -> Result<(), String> {
        self.format.validate()?;
        if self.queue_capacity == 0 {
            return Err("queue capacity must be positive".into());
        }
        if self.required_permissions.is_empty() {
            return Err("at least one required permission must be listed".into());
        }
        for (i, device) in self.required_permissions.iter().enumerate() {
            if self.required_permissions[..i].contains(device) {
                return Err(format!("duplicate required permission: {}", device));
            }
        }
        Ok(())
    }

    /// Parses and validates a JSON configuration, filling omitted fields with defaults.
    pub fn from_json(json: &str) -> Result<Self, CaptureError> {
        let config: Self = serde_json::from_str(json)
            .map_err(|e| CaptureError::ConfigurationFailed(format!("invalid config json: {}", e)))?;
        config.validate().map_err(CaptureError::ConfigurationFailed)?;
        Ok(config)
    }
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            format: FrameFormat::default(),
            queue_capacity: 64,
            required_permissions: vec![DeviceType::Audio],
        }
    }
}
