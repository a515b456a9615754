use std::collections::VecDeque;
use std::sync::Arc;

use parking_lot::{Mutex, MutexGuard, RwLock};

use crate::models::config::{EngineConfig, FrameFormat};
use crate::models::error::CaptureError;
use crate::models::permission::{DeviceType, PermissionResult, PermissionStatus};
use crate::models::session::{SessionDiagnostics, SessionInfo, SessionSummary};
use crate::models::state::CaptureState;
use crate::traits::capture_delegate::CaptureDelegate;
use crate::traits::capture_provider::{CaptureProvider, ProviderSink};
use crate::traits::permission_authority::PermissionAuthority;

use super::delivery::{spawn_delivery, FrameConsumer};
use super::permissions::PermissionBroker;
use super::session::{ActiveSession, SessionShared};
use super::DelegateSlot;

/// Provider plus the session it is currently feeding. Guarded by one lock so
/// that start and stop never interleave.
struct Control<P> {
    provider: P,
    session: Option<ActiveSession>,
}

/// Delegate notification waiting to be dispatched.
enum EngineEvent {
    StateChanged(CaptureState),
    Error(CaptureError),
    SessionFinished(SessionSummary),
}

#[derive(Default)]
struct EventQueue {
    pending: VecDeque<EngineEvent>,
    dispatching: bool,
}

/// State readable without the control lock, also from provider threads and
/// delegate callbacks.
struct EngineShared {
    state: Mutex<CaptureState>,
    current: Mutex<Option<Arc<SessionShared>>>,
    last_diagnostics: Mutex<SessionDiagnostics>,
    delegate: DelegateSlot,
    events: Mutex<EventQueue>,
}

impl EngineShared {
    fn delegate(&self) -> Option<Arc<dyn CaptureDelegate>> {
        self.delegate.read().clone()
    }

    fn clear_current(&self, session: &SessionShared) {
        let mut current = self.current.lock();
        if current.as_ref().is_some_and(|c| c.info.id == session.info.id) {
            *current = None;
        }
    }

    /// Queue `Active` for `session` unless its end was already queued.
    fn announce_active(&self, session: &SessionShared) {
        let mut events = self.events.lock();
        if session.mark_announced() {
            events.pending.push_back(EngineEvent::StateChanged(CaptureState::Active {
                session_id: session.info.id,
            }));
        }
        self.dispatch(events);
    }

    /// Move the engine out of `session` exactly once, whether the caller is
    /// `stop_capture` or a failing provider thread.
    fn finish_session(&self, session: &SessionShared, failure: Option<CaptureError>) {
        if !session.mark_ended() {
            return;
        }
        session.close_queue();

        let changed = {
            let mut state = self.state.lock();
            if state.session_id() == Some(session.info.id) {
                *state = CaptureState::Idle;
                true
            } else {
                false
            }
        };

        let summary = session.summary(failure);
        *self.last_diagnostics.lock() = summary.diagnostics.clone();
        self.clear_current(session);

        match &summary.failure {
            Some(error) => log::error!("capture session {} failed: {}", session.info.id, error),
            None => log::info!(
                "capture session {} stopped after {:.2}s",
                session.info.id,
                summary.duration.as_secs_f64()
            ),
        }
        log::debug!("capture session {} diagnostics: {:?}", session.info.id, summary.diagnostics);

        let mut events = self.events.lock();
        // Ended before `start_capture` got to announce it: keep Active first.
        if session.mark_announced() {
            events.pending.push_back(EngineEvent::StateChanged(CaptureState::Active {
                session_id: session.info.id,
            }));
        }
        if let Some(error) = &summary.failure {
            events.pending.push_back(EngineEvent::Error(error.clone()));
        }
        if changed {
            events.pending.push_back(EngineEvent::StateChanged(CaptureState::Idle));
        }
        events.pending.push_back(EngineEvent::SessionFinished(summary));
        self.dispatch(events);
    }

    /// Deliver queued events in order. Only one thread dispatches at a time;
    /// others enqueue and return, so a delegate may call back into the engine.
    fn dispatch(&self, mut events: MutexGuard<'_, EventQueue>) {
        if events.dispatching {
            return;
        }
        events.dispatching = true;
        loop {
            let Some(event) = events.pending.pop_front() else {
                break;
            };
            MutexGuard::unlocked(&mut events, || self.deliver(event));
        }
        events.dispatching = false;
    }

    fn deliver(&self, event: EngineEvent) {
        let Some(delegate) = self.delegate() else {
            return;
        };
        match event {
            EngineEvent::StateChanged(state) => delegate.on_state_changed(&state),
            EngineEvent::Error(error) => delegate.on_error(&error),
            EngineEvent::SessionFinished(summary) => delegate.on_session_finished(&summary),
        }
    }
}

/// Native audio capture engine: one capture session at a time, permission
/// queries and requests, serialized delivery of raw frames to a consumer.
///
/// All operations take `&self`; share the engine behind an `Arc` to call
/// `request_permissions` while other threads start or stop capture.
///
/// ```text
/// [Provider threads] → FormatConverter → FrameQueue → [delivery thread] → consumer
/// ```
///
/// Calling `start_capture` while a session is active fails with
/// `CaptureError::InvalidState`; the running session is left untouched.
pub struct CaptureEngine<P: CaptureProvider> {
    control: Mutex<Control<P>>,
    shared: Arc<EngineShared>,
    permissions: PermissionBroker,
    config: EngineConfig,
}

impl<P: CaptureProvider> CaptureEngine<P> {
    pub fn new(provider: P, authority: Arc<dyn PermissionAuthority>) -> Self {
        Self::build(provider, authority, EngineConfig::default())
    }

    /// Create an engine with a custom configuration.
    pub fn with_config(
        provider: P,
        authority: Arc<dyn PermissionAuthority>,
        config: EngineConfig,
    ) -> Result<Self, CaptureError> {
        config.validate().map_err(CaptureError::ConfigurationFailed)?;
        Ok(Self::build(provider, authority, config))
    }

    fn build(provider: P, authority: Arc<dyn PermissionAuthority>, config: EngineConfig) -> Self {
        let delegate: DelegateSlot = Arc::new(RwLock::new(None));
        Self {
            control: Mutex::new(Control {
                provider,
                session: None,
            }),
            shared: Arc::new(EngineShared {
                state: Mutex::new(CaptureState::Idle),
                current: Mutex::new(None),
                last_diagnostics: Mutex::new(SessionDiagnostics::default()),
                delegate: Arc::clone(&delegate),
                events: Mutex::new(EventQueue::default()),
            }),
            permissions: PermissionBroker::new(authority, delegate),
            config,
        }
    }

    pub fn set_delegate(&self, delegate: Arc<dyn CaptureDelegate>) {
        *self.shared.delegate.write() = Some(delegate);
    }

    pub fn state(&self) -> CaptureState {
        *self.shared.state.lock()
    }

    pub fn is_capturing(&self) -> bool {
        self.state().is_active()
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Layout of every buffer handed to the consumer.
    pub fn frame_format(&self) -> FrameFormat {
        self.config.format
    }

    /// Info about the running session, if any.
    ///
    /// Never waits on `start_capture`/`stop_capture`, so it is safe to call
    /// from the consumer and from delegate callbacks.
    pub fn session_info(&self) -> Option<SessionInfo> {
        self.shared
            .current
            .lock()
            .as_ref()
            .filter(|s| !s.has_ended())
            .map(|s| s.info.clone())
    }

    /// Counters of the running session, or of the last one if idle.
    pub fn diagnostics(&self) -> SessionDiagnostics {
        let current = self.shared.current.lock();
        match current.as_ref() {
            Some(session) if !session.has_ended() => session.diagnostics.lock().clone(),
            _ => self.shared.last_diagnostics.lock().clone(),
        }
    }

    /// Start capturing, delivering each buffer to `consumer` in capture order.
    ///
    /// Fails with `PermissionDenied` if a required device type is not
    /// authorized, `DeviceNotAvailable`/`Device` if the provider cannot open
    /// its device, and `InvalidState` if a session is already active. The
    /// engine stays idle on every failure.
    pub fn start_capture<F>(&self, consumer: F) -> Result<(), CaptureError>
    where
        F: FnMut(&[u8]) + Send + 'static,
    {
        let mut control = self.control.lock();
        self.reap_ended(&mut control);

        if let Some(session) = &control.session {
            return Err(CaptureError::InvalidState(format!(
                "capture session {} is already active",
                session.shared.info.id
            )));
        }

        for &device in &self.config.required_permissions {
            let status = self.permissions.status(device);
            if !status.is_authorized() {
                log::warn!("cannot start capture: {} permission is {}", device, status);
                return Err(CaptureError::PermissionDenied { device, status });
            }
        }

        if !control.provider.is_available() {
            return Err(CaptureError::DeviceNotAvailable);
        }

        let session = Arc::new(SessionShared::new(&self.config, control.provider.device_name()));
        let consumer: FrameConsumer = Box::new(consumer);
        let delivery = spawn_delivery(Arc::clone(&session), consumer)?;
        let mut active = ActiveSession::new(Arc::clone(&session), delivery);

        // Active before the provider starts, so a failure reported from
        // inside `start` finds the state it has to undo.
        *self.shared.state.lock() = CaptureState::Active {
            session_id: session.info.id,
        };
        *self.shared.current.lock() = Some(Arc::clone(&session));

        if let Err(e) = control.provider.start(self.sink_for(&session)) {
            log::error!("failed to start capture on {}: {}", session.info.device_name, e);
            session.mark_ended();
            session.close_queue();
            self.shared.clear_current(&session);
            if let Err(stop_err) = control.provider.stop() {
                log::warn!("provider cleanup after failed start: {}", stop_err);
            }
            {
                let mut state = self.shared.state.lock();
                if state.session_id() == Some(session.info.id) {
                    *state = CaptureState::Idle;
                }
            }
            drop(control);
            active.join_delivery();
            return Err(e);
        }

        log::info!(
            "capture session {} started on {} ({} Hz, {} ch, {:?})",
            session.info.id,
            session.info.device_name,
            self.config.format.sample_rate,
            self.config.format.channels,
            self.config.format.encoding
        );
        control.session = Some(active);
        drop(control);

        self.shared.announce_active(&session);
        Ok(())
    }

    /// Stop the active session and release the device.
    ///
    /// No-op when idle. Once this returns the consumer is not invoked again.
    /// The engine is idle afterwards even when the provider reports a stop
    /// failure, which is returned as the error. After a session already ended
    /// on a device failure, the provider is only cleaned up and `Ok` returned.
    pub fn stop_capture(&self) -> Result<(), CaptureError> {
        let (mut session, ended_before, stopped) = {
            let mut control = self.control.lock();
            let Some(session) = control.session.take() else {
                return Ok(());
            };
            let ended_before = session.shared.has_ended();
            let stopped = control.provider.stop();
            session.shared.close_queue();
            (session, ended_before, stopped)
        };

        // Joined outside the control lock: the consumer may itself be
        // calling into the engine.
        session.join_delivery();
        self.shared.finish_session(&session.shared, None);

        match stopped {
            Err(e) if ended_before => {
                log::warn!("provider cleanup after failed session: {}", e);
                Ok(())
            }
            Err(e) => {
                log::error!("provider failed to stop cleanly: {}", e);
                Err(e)
            }
            Ok(()) => Ok(()),
        }
    }

    /// Snapshot of the current permission state for both device types.
    pub fn get_permissions(&self) -> PermissionResult {
        self.permissions.snapshot()
    }

    pub fn permission_status(&self, device: DeviceType) -> PermissionStatus {
        self.permissions.status(device)
    }

    /// Prompt for access to `device` if its status is not yet determined and
    /// resolve with the updated statuses of both device types.
    ///
    /// Resolves immediately, without prompting, when already determined.
    /// Concurrent requests for the same device share one prompt.
    pub async fn request_permissions(&self, device: DeviceType) -> PermissionResult {
        self.permissions.request(device).await
    }

    /// `request_permissions` taking the managed device name (`"microphone"` or `"audio"`).
    pub async fn request_permissions_for(&self, device: &str) -> Result<PermissionResult, CaptureError> {
        let device: DeviceType = device.parse()?;
        Ok(self.request_permissions(device).await)
    }

    fn sink_for(&self, session: &Arc<SessionShared>) -> ProviderSink {
        let on_buffer = {
            let session = Arc::clone(session);
            Arc::new(move |samples: &[f32], sample_rate: u32, channels: u16| {
                session.accept(samples, sample_rate, channels);
            })
        };
        let on_failure = {
            let session = Arc::clone(session);
            let shared = Arc::clone(&self.shared);
            Arc::new(move |error: CaptureError| {
                shared.finish_session(&session, Some(error));
            })
        };
        ProviderSink::new(on_buffer, on_failure)
    }

    /// Release a session that ended on its own (provider failure).
    fn reap_ended(&self, control: &mut Control<P>) {
        let ended = control
            .session
            .as_ref()
            .is_some_and(|s| s.shared.has_ended());
        if !ended {
            return;
        }
        // The delivery thread of an ended session exits on its own once its
        // consumer returns; joining here, under the control lock, could
        // deadlock against a consumer that calls back into the engine.
        if let Some(session) = control.session.take() {
            log::debug!("releasing failed session {}", session.shared.info.id);
        }
        if let Err(e) = control.provider.stop() {
            log::warn!("provider cleanup after failed session: {}", e);
        }
    }
}

impl<P: CaptureProvider> Drop for CaptureEngine<P> {
    fn drop(&mut self) {
        if let Err(e) = self.stop_capture() {
            log::warn!("error stopping capture on drop: {}", e);
        }
    }
}
