use thiserror::Error;

use super::permission::{DeviceType, PermissionStatus};

/// Errors that can occur during audio capture operations.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum CaptureError {
    #[error("{device} permission is {status}")]
    PermissionDenied {
        device: DeviceType,
        status: PermissionStatus,
    },

    #[error("device not available")]
    DeviceNotAvailable,

    #[error("device error: {0}")]
    Device(String),

    #[error("invalid state: {0}")]
    InvalidState(String),

    #[error("configuration failed: {0}")]
    ConfigurationFailed(String),

    #[error("invalid argument: {0}")]
    InvalidArgument(String),
}

/// Coarse error category, for mapping onto managed exception classes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    Permission,
    Device,
    InvalidState,
    Configuration,
    InvalidArgument,
}

impl CaptureError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::PermissionDenied { .. } => ErrorKind::Permission,
            Self::DeviceNotAvailable | Self::Device(_) => ErrorKind::Device,
            Self::InvalidState(_) => ErrorKind::InvalidState,
            Self::ConfigurationFailed(_) => ErrorKind::Configuration,
            Self::InvalidArgument(_) => ErrorKind::InvalidArgument,
        }
    }

    pub fn is_permission_error(&self) -> bool {
        self.kind() == ErrorKind::Permission
    }

    pub fn is_device_error(&self) -> bool {
        self.kind() == ErrorKind::Device
    }
}
