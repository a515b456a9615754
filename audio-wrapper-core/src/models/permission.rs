use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use super::error::CaptureError;

/// OS-level authorization state for one device category.
///
/// Snapshot value: reading it again may yield a different status if the
/// user changes their privacy settings in the meantime.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PermissionStatus {
    /// Permission hasn't been requested yet.
    NotDetermined,
    /// User explicitly denied permission.
    Denied,
    /// Permission granted.
    Authorized,
    /// Permission restricted by system policy.
    Restricted,
}

impl PermissionStatus {
    pub const ALL: [PermissionStatus; 4] = [
        Self::NotDetermined,
        Self::Denied,
        Self::Authorized,
        Self::Restricted,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::NotDetermined => "not_determined",
            Self::Denied => "denied",
            Self::Authorized => "authorized",
            Self::Restricted => "restricted",
        }
    }

    pub fn is_authorized(&self) -> bool {
        matches!(self, Self::Authorized)
    }

    /// Whether the user or system has already answered for this device.
    pub fn is_determined(&self) -> bool {
        !matches!(self, Self::NotDetermined)
    }

    /// Status implied by the outcome of a permission prompt.
    pub fn from_grant(granted: bool) -> Self {
        if granted {
            Self::Authorized
        } else {
            Self::Denied
        }
    }
}

impl fmt::Display for PermissionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for PermissionStatus {
    type Err = CaptureError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|status| status.as_str() == s)
            .ok_or_else(|| CaptureError::InvalidArgument(format!("unknown permission status: {s:?}")))
    }
}

/// Capture subsystem a permission query or request targets.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeviceType {
    /// Microphone input.
    Microphone,
    /// System audio output (loopback / process tap).
    Audio,
}

impl DeviceType {
    pub const ALL: [DeviceType; 2] = [Self::Microphone, Self::Audio];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Microphone => "microphone",
            Self::Audio => "audio",
        }
    }
}

impl fmt::Display for DeviceType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for DeviceType {
    type Err = CaptureError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "microphone" => Ok(Self::Microphone),
            "audio" => Ok(Self::Audio),
            other => Err(CaptureError::InvalidArgument(format!("unknown device type: {other:?}"))),
        }
    }
}

/// Permission status for both device types.
///
/// Serializes to the managed shape `{ "microphone": ..., "audio": ... }`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PermissionResult {
    pub microphone: PermissionStatus,
    pub audio: PermissionStatus,
}

impl PermissionResult {
    /// Builds a result by querying `status` once per device type.
    pub fn from_fn(mut status: impl FnMut(DeviceType) -> PermissionStatus) -> Self {
        Self {
            microphone: status(DeviceType::Microphone),
            audio: status(DeviceType::Audio),
        }
    }

    pub fn get(&self, device: DeviceType) -> PermissionStatus {
        match device {
            DeviceType::Microphone => self.microphone,
            DeviceType::Audio => self.audio,
        }
    }

    pub fn set(&mut self, device: DeviceType, status: PermissionStatus) {
        match device {
            DeviceType::Microphone => self.microphone = status,
            DeviceType::Audio => self.audio = status,
        }
    }
}

impl Default for PermissionResult {
    fn default() -> Self {
        Self {
            microphone: PermissionStatus::NotDetermined,
            audio: PermissionStatus::NotDetermined,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn permission_result_wire_shape() {
        let result = PermissionResult {
            microphone: PermissionStatus::NotDetermined,
            audio: PermissionStatus::Authorized,
        };
        let json = serde_json::to_value(result).unwrap();
        assert_eq!(
            json,
            serde_json::json!({ "microphone": "not_determined", "audio": "authorized" })
        );
    }

    #[test]
    fn statuses_parse_from_managed_names() {
        for status in PermissionStatus::ALL {
            assert_eq!(status.as_str().parse::<PermissionStatus>().unwrap(), status);
            let json = serde_json::to_string(&status).unwrap();
            assert_eq!(json, format!("\"{}\"", status));
        }
        assert!("granted".parse::<PermissionStatus>().is_err());
    }

    #[test]
    fn device_type_parse_rejects_unknown() {
        assert_eq!("microphone".parse::<DeviceType>().unwrap(), DeviceType::Microphone);
        assert_eq!("audio".parse::<DeviceType>().unwrap(), DeviceType::Audio);

        let err = "camera".parse::<DeviceType>().unwrap_err();
        assert!(matches!(err, CaptureError::InvalidArgument(_)));
    }

    #[test]
    fn get_and_set_by_device() {
        let mut result = PermissionResult::default();
        result.set(DeviceType::Audio, PermissionStatus::Restricted);

        assert_eq!(result.get(DeviceType::Audio), PermissionStatus::Restricted);
        assert_eq!(result.get(DeviceType::Microphone), PermissionStatus::NotDetermined);
    }

    #[test]
    fn grant_outcome_maps_to_status() {
        assert_eq!(PermissionStatus::from_grant(true), PermissionStatus::Authorized);
        assert_eq!(PermissionStatus::from_grant(false), PermissionStatus::Denied);
        assert!(!PermissionStatus::NotDetermined.is_determined());
        assert!(PermissionStatus::Denied.is_determined());
    }
}
