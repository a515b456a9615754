//! Windows permission authority.
//!
//! Microphone access is governed by Settings > Privacy > Microphone. Unpackaged
//! desktop apps get no per-app consent dialog: access is either on or off, so
//! the status is checked by activating the default capture endpoint. Loopback
//! capture of system audio is unrestricted.

use windows::Win32::Foundation::E_ACCESSDENIED;
use windows::Win32::Media::Audio::*;
use windows::Win32::System::Com::*;

use audio_wrapper_core::models::permission::{DeviceType, PermissionStatus};
use audio_wrapper_core::traits::permission_authority::{PermissionAuthority, PermissionCompletion};

use crate::wasapi_capture::ComScope;

/// Permission authority backed by the Windows privacy settings.
#[derive(Debug, Default, Clone, Copy)]
pub struct WindowsPermissions;

impl WindowsPermissions {
    pub fn new() -> Self {
        Self
    }
}

impl PermissionAuthority for WindowsPermissions {
    fn status(&self, device: DeviceType) -> PermissionStatus {
        match device {
            DeviceType::Microphone => microphone_status(),
            DeviceType::Audio => PermissionStatus::Authorized,
        }
    }

    /// There is no prompt to show; answers with the current status.
    fn request(&self, device: DeviceType, completion: PermissionCompletion) {
        let status = self.status(device);
        log::debug!("{} permission on Windows: {}", device, status);
        completion(status.is_authorized());
    }
}

/// Result of activating the default capture endpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum MicrophoneAccess {
    Activated,
    AccessDenied,
    NoDevice,
    /// The check itself could not run (COM, enumerator, unexpected HRESULT).
    Unknown,
}

/// Only an explicit access-denied answer counts as a denial. A check that
/// could not run reports authorized so that a start goes on to surface the
/// real device error.
fn status_for(access: MicrophoneAccess) -> PermissionStatus {
    match access {
        MicrophoneAccess::AccessDenied => PermissionStatus::Denied,
        MicrophoneAccess::Activated | MicrophoneAccess::NoDevice | MicrophoneAccess::Unknown => {
            PermissionStatus::Authorized
        }
    }
}

fn microphone_status() -> PermissionStatus {
    status_for(check_microphone_access())
}

fn check_microphone_access() -> MicrophoneAccess {
    let _com = match ComScope::enter() {
        Ok(com) => com,
        Err(e) => {
            log::warn!("cannot check microphone access: {}", e);
            return MicrophoneAccess::Unknown;
        }
    };

    unsafe {
        let enumerator: IMMDeviceEnumerator = match CoCreateInstance(&MMDeviceEnumerator, None, CLSCTX_ALL) {
            Ok(enumerator) => enumerator,
            Err(e) => {
                log::warn!("cannot create device enumerator: {}", e);
                return MicrophoneAccess::Unknown;
            }
        };

        let device = match enumerator.GetDefaultAudioEndpoint(eCapture, eConsole) {
            Ok(device) => device,
            Err(_) => return MicrophoneAccess::NoDevice,
        };

        let activated: windows::core::Result<IAudioClient> = device.Activate(CLSCTX_ALL, None);
        match activated {
            Ok(_) => MicrophoneAccess::Activated,
            Err(e) if e.code() == E_ACCESSDENIED => MicrophoneAccess::AccessDenied,
            Err(e) if e.code() == AUDCLNT_E_DEVICE_IN_USE => MicrophoneAccess::Activated,
            Err(e) => {
                log::warn!("unexpected error checking microphone access: {}", e);
                MicrophoneAccess::Unknown
            }
        }
    }
}
