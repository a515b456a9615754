//! In-process permission authority.
//!
//! For platforms without an OS consent model, and for hosts that present
//! their own consent UI: prompts are either answered immediately from a
//! configured outcome, or parked until the host calls `answer`.

use std::collections::HashMap;

use parking_lot::Mutex;

use crate::models::permission::{DeviceType, PermissionResult, PermissionStatus};
use crate::traits::permission_authority::{PermissionAuthority, PermissionCompletion};

struct Inner {
    statuses: PermissionResult,
    grants: HashMap<DeviceType, bool>,
    parked: HashMap<DeviceType, Vec<PermissionCompletion>>,
    prompts: HashMap<DeviceType, u32>,
}

/// Permission authority backed by an in-memory table.
pub struct StaticPermissions {
    inner: Mutex<Inner>,
    deferred: bool,
    lagging_preflight: bool,
}

impl StaticPermissions {
    /// Start from `statuses`; prompts are granted immediately.
    pub fn new(statuses: PermissionResult) -> Self {
        Self {
            inner: Mutex::new(Inner {
                statuses,
                grants: HashMap::new(),
                parked: HashMap::new(),
                prompts: HashMap::new(),
            }),
            deferred: false,
            lagging_preflight: false,
        }
    }

    /// Both device types authorized.
    pub fn authorized() -> Self {
        Self::new(PermissionResult {
            microphone: PermissionStatus::Authorized,
            audio: PermissionStatus::Authorized,
        })
    }

    /// Both device types not yet determined.
    pub fn undetermined() -> Self {
        Self::new(PermissionResult::default())
    }

    /// What a prompt for `device` answers (default: granted).
    pub fn with_grant(self, device: DeviceType, granted: bool) -> Self {
        self.inner.lock().grants.insert(device, granted);
        self
    }

    /// Park prompts until `answer` is called.
    pub fn deferred(mut self) -> Self {
        self.deferred = true;
        self
    }

    /// Keep reporting the old status after a prompt is answered, like OS
    /// preflight APIs that only refresh on next launch.
    pub fn with_lagging_preflight(mut self) -> Self {
        self.lagging_preflight = true;
        self
    }

    /// Simulate the user changing the setting outside the app.
    pub fn set_status(&self, device: DeviceType, status: PermissionStatus) {
        self.inner.lock().statuses.set(device, status);
    }

    /// Number of prompts shown for `device`.
    pub fn prompt_count(&self, device: DeviceType) -> u32 {
        self.inner.lock().prompts.get(&device).copied().unwrap_or(0)
    }

    /// Number of parked prompts for `device`.
    pub fn pending_prompts(&self, device: DeviceType) -> usize {
        self.inner.lock().parked.get(&device).map_or(0, Vec::len)
    }

    /// Answer every parked prompt for `device`. Returns how many were answered.
    pub fn answer(&self, device: DeviceType, granted: bool) -> usize {
        let parked = {
            let mut inner = self.inner.lock();
            let parked = inner.parked.remove(&device).unwrap_or_default();
            if !parked.is_empty() {
                self.record_answer(&mut inner, device, granted);
            }
            parked
        };
        let answered = parked.len();
        for completion in parked {
            completion(granted);
        }
        answered
    }

    /// Drop every parked prompt for `device` without answering it.
    pub fn abandon(&self, device: DeviceType) -> usize {
        let parked = self.inner.lock().parked.remove(&device).unwrap_or_default();
        parked.len()
    }

    fn record_answer(&self, inner: &mut Inner, device: DeviceType, granted: bool) {
        if !self.lagging_preflight {
            inner.statuses.set(device, PermissionStatus::from_grant(granted));
        }
    }
}

impl PermissionAuthority for StaticPermissions {
    fn status(&self, device: DeviceType) -> PermissionStatus {
        self.inner.lock().statuses.get(device)
    }

    fn request(&self, device: DeviceType, completion: PermissionCompletion) {
        let granted = {
            let mut inner = self.inner.lock();
            *inner.prompts.entry(device).or_insert(0) += 1;

            if self.deferred {
                inner.parked.entry(device).or_default().push(completion);
                return;
            }

            let granted = inner.grants.get(&device).copied().unwrap_or(true);
            self.record_answer(&mut inner, device, granted);
            granted
        };
        // Called outside the lock: the completion may query `status`.
        completion(granted);
    }
}
