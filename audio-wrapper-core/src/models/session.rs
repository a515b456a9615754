use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;
use uuid::Uuid;

use super::config::FrameFormat;
use super::error::CaptureError;

/// Identity and format of one capture session.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SessionInfo {
    pub id: Uuid,
    pub started_at: DateTime<Utc>,
    pub format: FrameFormat,
    pub device_name: String,
}

impl SessionInfo {
    pub fn new(format: FrameFormat, device_name: String) -> Self {
        Self {
            id: Uuid::new_v4(),
            started_at: Utc::now(),
            format,
            device_name,
        }
    }
}

/// Counters for debugging capture sessions.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SessionDiagnostics {
    /// Buffers pushed by the provider.
    pub provider_callbacks: u64,
    /// Buffers handed to the consumer.
    pub frames_delivered: u64,
    pub bytes_delivered: u64,
    /// Buffers discarded because the delivery queue was full.
    pub frames_dropped: u64,
    /// Buffers still queued when the session ended.
    pub frames_discarded_at_stop: u64,
}

/// Emitted once when a session ends, by `stop_capture` or by a provider failure.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SessionSummary {
    pub info: SessionInfo,
    #[serde(with = "duration_secs")]
    pub duration: Duration,
    pub diagnostics: SessionDiagnostics,
    #[serde(serialize_with = "error_message")]
    pub failure: Option<CaptureError>,
}

impl SessionSummary {
    pub fn failed(&self) -> bool {
        self.failure.is_some()
    }
}

fn error_message<S: serde::Serializer>(error: &Option<CaptureError>, s: S) -> Result<S::Ok, S::Error> {
    match error {
        Some(e) => s.serialize_some(&e.to_string()),
        None => s.serialize_none(),
    }
}

mod duration_secs {
    use std::time::Duration;

    pub fn serialize<S: serde::Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_f64(d.as_secs_f64())
    }
}
