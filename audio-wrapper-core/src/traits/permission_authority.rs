use crate::models::permission::{DeviceType, PermissionStatus};

/// Completion handler for a permission prompt. Receives whether access was granted.
pub type PermissionCompletion = Box<dyn FnOnce(bool) + Send + 'static>;

/// Platform permission backend.
///
/// Mirrors the preflight / request pair of OS consent frameworks:
/// `status` is a cheap synchronous check, `request` may show a prompt and
/// completes later on an arbitrary thread.
pub trait PermissionAuthority: Send + Sync {
    /// Current authorization status. Must not prompt and must not fail.
    fn status(&self, device: DeviceType) -> PermissionStatus;

    /// Ask the OS for access to `device`.
    ///
    /// `completion` is called at most once. An authority that drops it
    /// without calling it leaves waiters with the current status.
    fn request(&self, device: DeviceType, completion: PermissionCompletion);
}
