use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::oneshot;

use crate::models::permission::{DeviceType, PermissionResult, PermissionStatus};
use crate::traits::permission_authority::PermissionAuthority;

use super::DelegateSlot;

#[derive(Default)]
struct BrokerState {
    /// Answers from completed prompts, used while the authority's preflight
    /// still reports `NotDetermined`.
    outcomes: HashMap<DeviceType, PermissionStatus>,
    /// Callers waiting on an in-flight prompt, per device.
    pending: HashMap<DeviceType, Vec<oneshot::Sender<()>>>,
}

/// Mediates between engine callers and the platform `PermissionAuthority`.
///
/// At most one prompt per device type is in flight; concurrent requests for
/// the same device join it. No lock is held while a request is suspended.
pub struct PermissionBroker {
    authority: Arc<dyn PermissionAuthority>,
    state: Arc<Mutex<BrokerState>>,
    delegate: DelegateSlot,
}

impl PermissionBroker {
    pub(crate) fn new(authority: Arc<dyn PermissionAuthority>, delegate: DelegateSlot) -> Self {
        Self {
            authority,
            state: Arc::new(Mutex::new(BrokerState::default())),
            delegate,
        }
    }

    pub fn status(&self, device: DeviceType) -> PermissionStatus {
        let status = self.authority.status(device);
        if status.is_determined() {
            return status;
        }
        self.state
            .lock()
            .outcomes
            .get(&device)
            .copied()
            .unwrap_or(status)
    }

    pub fn snapshot(&self) -> PermissionResult {
        PermissionResult::from_fn(|device| self.status(device))
    }

    /// Prompt for `device` unless its status is already determined, then
    /// return the full snapshot.
    pub async fn request(&self, device: DeviceType) -> PermissionResult {
        if self.status(device).is_determined() {
            return self.snapshot();
        }

        let (tx, rx) = oneshot::channel();
        let first = {
            let mut state = self.state.lock();
            if state.outcomes.contains_key(&device) {
                // Answered between the status check and here.
                None
            } else {
                let waiters = state.pending.entry(device).or_default();
                waiters.push(tx);
                Some(waiters.len() == 1)
            }
        };
        let Some(first) = first else {
            return self.snapshot();
        };

        if first {
            log::info!("requesting {} permission", device);
            let completion = PromptCompletion {
                device,
                state: Arc::clone(&self.state),
                delegate: self.delegate.clone(),
                answered: false,
            };
            self.authority
                .request(device, Box::new(move |granted| completion.complete(granted)));
        } else {
            log::debug!("joining in-flight {} permission request", device);
        }

        // A dropped sender means the authority abandoned the prompt; fall
        // through to whatever the OS reports now.
        let _ = rx.await;
        self.snapshot()
    }
}

/// Resolves every waiter of one prompt exactly once, also when the
/// authority drops the completion without calling it.
struct PromptCompletion {
    device: DeviceType,
    state: Arc<Mutex<BrokerState>>,
    delegate: DelegateSlot,
    answered: bool,
}

impl PromptCompletion {
    fn complete(mut self, granted: bool) {
        self.answered = true;
        let status = PermissionStatus::from_grant(granted);
        log::info!("{} permission prompt answered: {}", self.device, status);

        let waiters = {
            let mut state = self.state.lock();
            state.outcomes.insert(self.device, status);
            state.pending.remove(&self.device).unwrap_or_default()
        };

        if let Some(delegate) = self.delegate.read().clone() {
            delegate.on_permission_changed(self.device, status);
        }
        for waiter in waiters {
            let _ = waiter.send(());
        }
    }
}

impl Drop for PromptCompletion {
    fn drop(&mut self) {
        if self.answered {
            return;
        }
        log::warn!("{} permission prompt was abandoned", self.device);
        let waiters = self.state.lock().pending.remove(&self.device).unwrap_or_default();
        for waiter in waiters {
            let _ = waiter.send(());
        }
    }
}
