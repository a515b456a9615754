use crate::models::error::CaptureError;
use crate::models::permission::{DeviceType, PermissionStatus};
use crate::models::session::SessionSummary;
use crate::models::state::CaptureState;

/// Event delegate for engine notifications.
///
/// Methods are called on a thread involved in the event: the caller of
/// `start_capture`/`stop_capture`, a provider thread on failure, or the
/// thread that completed a permission prompt. Implementations should
/// marshal to their own thread if needed and must not block.
///
/// State, error and session notifications arrive in order, one at a time. Read-only engine calls
/// (`state`, `session_info`, `diagnostics`, `get_permissions`) are safe from
/// any callback. Callbacks made from a provider thread must not call
/// `start_capture` or `stop_capture` synchronously: stopping the provider
/// joins that thread.
pub trait CaptureDelegate: Send + Sync {
    /// Called when the engine state changes.
    fn on_state_changed(&self, state: &CaptureState);

    /// Called when a session fails after it started.
    fn on_error(&self, error: &CaptureError);

    /// Called once per session when it ends, successfully or not.
    fn on_session_finished(&self, summary: &SessionSummary);

    /// Called when a permission request changed the status of a device.
    fn on_permission_changed(&self, _device: DeviceType, _status: PermissionStatus) {}
}
