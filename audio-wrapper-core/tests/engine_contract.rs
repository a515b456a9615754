//! Behavioral tests for the capture engine's managed-boundary contract.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Weak};
use std::thread;
use std::time::{Duration, Instant};

use parking_lot::Mutex;

use audio_wrapper_core::{
    CaptureDelegate, CaptureEngine, CaptureError, CaptureState, DeviceType, EngineConfig,
    ErrorKind, FrameFormat, PermissionResult, PermissionStatus, SampleEncoding, SessionSummary,
    StaticPermissions, SyntheticSignal, SyntheticSource,
};

fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

fn fast_source() -> SyntheticSource {
    SyntheticSource::new()
        .with_buffer_frames(64)
        .with_interval(Duration::from_millis(1))
}

fn authorized_engine(source: SyntheticSource) -> CaptureEngine<SyntheticSource> {
    CaptureEngine::new(source, Arc::new(StaticPermissions::authorized()))
}

fn wait_until(timeout: Duration, mut condition: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + timeout;
    while Instant::now() < deadline {
        if condition() {
            return true;
        }
        thread::sleep(Duration::from_millis(2));
    }
    condition()
}

fn counting_consumer() -> (Arc<AtomicUsize>, impl FnMut(&[u8]) + Send + 'static) {
    let count = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&count);
    (count, move |_: &[u8]| {
        counter.fetch_add(1, Ordering::SeqCst);
    })
}

#[derive(Debug, Clone)]
enum Event {
    State(CaptureState),
    Error(CaptureError),
    Finished(SessionSummary),
    Permission(DeviceType, PermissionStatus),
}

#[derive(Default)]
struct Recorder {
    events: Mutex<Vec<Event>>,
}

impl Recorder {
    fn events(&self) -> Vec<Event> {
        self.events.lock().clone()
    }

    fn summaries(&self) -> Vec<SessionSummary> {
        self.events()
            .into_iter()
            .filter_map(|e| match e {
                Event::Finished(summary) => Some(summary),
                _ => None,
            })
            .collect()
    }
}

impl CaptureDelegate for Recorder {
    fn on_state_changed(&self, state: &CaptureState) {
        self.events.lock().push(Event::State(*state));
    }

    fn on_error(&self, error: &CaptureError) {
        self.events.lock().push(Event::Error(error.clone()));
    }

    fn on_session_finished(&self, summary: &SessionSummary) {
        self.events.lock().push(Event::Finished(summary.clone()));
    }

    fn on_permission_changed(&self, device: DeviceType, status: PermissionStatus) {
        self.events.lock().push(Event::Permission(device, status));
    }
}

// ==================== permissions ====================

#[test]
fn get_permissions_is_always_fully_populated() {
    init_logging();
    for microphone in PermissionStatus::ALL {
        for audio in PermissionStatus::ALL {
            let authority = Arc::new(StaticPermissions::new(PermissionResult { microphone, audio }));
            let engine = CaptureEngine::new(fast_source(), authority);

            let result = engine.get_permissions();
            assert_eq!(result.microphone, microphone);
            assert_eq!(result.audio, audio);
        }
    }
}

#[tokio::test]
async fn request_result_is_reflected_by_get_permissions() {
    init_logging();
    let authority = Arc::new(StaticPermissions::undetermined().with_grant(DeviceType::Microphone, false));
    let engine = CaptureEngine::new(fast_source(), authority.clone());

    let result = engine.request_permissions(DeviceType::Microphone).await;
    assert_eq!(result.microphone, PermissionStatus::Denied);
    assert_eq!(result.audio, PermissionStatus::NotDetermined);
    assert_eq!(engine.get_permissions(), result);

    let result = engine.request_permissions(DeviceType::Audio).await;
    assert_eq!(result.audio, PermissionStatus::Authorized);
    assert_eq!(engine.get_permissions().audio, PermissionStatus::Authorized);
}

#[tokio::test]
async fn repeated_request_for_authorized_device_does_not_prompt() {
    init_logging();
    let authority = Arc::new(StaticPermissions::undetermined());
    let engine = CaptureEngine::new(fast_source(), authority.clone());

    let first = engine.request_permissions(DeviceType::Audio).await;
    let second = engine.request_permissions(DeviceType::Audio).await;

    assert_eq!(first.audio, PermissionStatus::Authorized);
    assert_eq!(second.audio, PermissionStatus::Authorized);
    assert_eq!(authority.prompt_count(DeviceType::Audio), 1);
}

#[tokio::test]
async fn request_for_already_authorized_device_never_prompts() {
    init_logging();
    let authority = Arc::new(StaticPermissions::authorized());
    let engine = CaptureEngine::new(fast_source(), authority.clone());

    for _ in 0..2 {
        let result = engine.request_permissions(DeviceType::Microphone).await;
        assert_eq!(result.microphone, PermissionStatus::Authorized);
    }
    assert_eq!(authority.prompt_count(DeviceType::Microphone), 0);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn pending_request_does_not_block_other_operations() {
    init_logging();
    let authority = Arc::new(StaticPermissions::undetermined().deferred());
    let engine = Arc::new(CaptureEngine::new(fast_source(), authority.clone()));
    let recorder = Arc::new(Recorder::default());
    engine.set_delegate(recorder.clone());

    let first = tokio::spawn({
        let engine = Arc::clone(&engine);
        async move { engine.request_permissions(DeviceType::Audio).await }
    });
    let second = tokio::spawn({
        let engine = Arc::clone(&engine);
        async move { engine.request_permissions_for("audio").await }
    });

    let deadline = Instant::now() + Duration::from_secs(2);
    while authority.pending_prompts(DeviceType::Audio) == 0 && Instant::now() < deadline {
        tokio::time::sleep(Duration::from_millis(2)).await;
    }
    assert_eq!(authority.pending_prompts(DeviceType::Audio), 1);
    tokio::time::sleep(Duration::from_millis(20)).await;

    // While the prompt is up: snapshot still not determined, capture refused, stop fine.
    assert_eq!(engine.get_permissions().audio, PermissionStatus::NotDetermined);
    let err = engine.start_capture(|_| {}).unwrap_err();
    assert_eq!(
        err,
        CaptureError::PermissionDenied {
            device: DeviceType::Audio,
            status: PermissionStatus::NotDetermined,
        }
    );
    assert!(engine.stop_capture().is_ok());

    assert_eq!(authority.answer(DeviceType::Audio, true), 1);

    let first = first.await.unwrap();
    let second = second.await.unwrap().unwrap();
    assert_eq!(first.audio, PermissionStatus::Authorized);
    assert_eq!(second.audio, PermissionStatus::Authorized);
    assert_eq!(authority.prompt_count(DeviceType::Audio), 1);

    let permission_events: Vec<_> = recorder
        .events()
        .into_iter()
        .filter(|e| matches!(e, Event::Permission(..)))
        .collect();
    assert_eq!(permission_events.len(), 1);
}

#[tokio::test]
async fn request_with_unknown_device_name_is_rejected() {
    let engine = authorized_engine(fast_source());
    let err = engine.request_permissions_for("camera").await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::InvalidArgument);
}

// ==================== capture lifecycle ====================

#[test]
fn start_without_authorization_fails_and_stays_idle() {
    init_logging();
    for status in [
        PermissionStatus::Denied,
        PermissionStatus::Restricted,
        PermissionStatus::NotDetermined,
    ] {
        let authority = Arc::new(StaticPermissions::new(PermissionResult {
            microphone: PermissionStatus::Authorized,
            audio: status,
        }));
        let engine = CaptureEngine::new(fast_source(), authority);
        let (count, consumer) = counting_consumer();

        let err = engine.start_capture(consumer).unwrap_err();
        assert!(err.is_permission_error());
        assert_eq!(
            err,
            CaptureError::PermissionDenied {
                device: DeviceType::Audio,
                status,
            }
        );
        assert_eq!(engine.state(), CaptureState::Idle);
        thread::sleep(Duration::from_millis(10));
        assert_eq!(count.load(Ordering::SeqCst), 0);
    }
}

#[test]
fn required_permissions_follow_config() {
    init_logging();
    let authority = Arc::new(StaticPermissions::new(PermissionResult {
        microphone: PermissionStatus::Denied,
        audio: PermissionStatus::Authorized,
    }));
    let config = EngineConfig {
        required_permissions: vec![DeviceType::Audio, DeviceType::Microphone],
        ..EngineConfig::default()
    };
    let engine = CaptureEngine::with_config(fast_source(), authority, config).unwrap();

    let err = engine.start_capture(|_| {}).unwrap_err();
    assert!(matches!(
        err,
        CaptureError::PermissionDenied {
            device: DeviceType::Microphone,
            ..
        }
    ));
}

#[test]
fn invalid_config_is_rejected() {
    let config = EngineConfig {
        queue_capacity: 0,
        ..EngineConfig::default()
    };
    let result = CaptureEngine::with_config(fast_source(), Arc::new(StaticPermissions::authorized()), config);
    assert!(matches!(result, Err(CaptureError::ConfigurationFailed(_))));
}

#[test]
fn no_buffers_after_stop_returns() {
    init_logging();
    let engine = authorized_engine(fast_source());
    let (count, consumer) = counting_consumer();

    engine.start_capture(consumer).unwrap();
    assert!(engine.is_capturing());
    assert!(wait_until(Duration::from_secs(2), || count.load(Ordering::SeqCst) >= 3));

    engine.stop_capture().unwrap();
    assert_eq!(engine.state(), CaptureState::Idle);

    let after_stop = count.load(Ordering::SeqCst);
    thread::sleep(Duration::from_millis(30));
    assert_eq!(count.load(Ordering::SeqCst), after_stop);
}

#[test]
fn stop_when_idle_is_a_noop() {
    let engine = authorized_engine(fast_source());
    assert!(engine.stop_capture().is_ok());
    assert!(engine.stop_capture().is_ok());
    assert_eq!(engine.state(), CaptureState::Idle);
}

#[test]
fn second_start_fails_and_first_session_keeps_running() {
    init_logging();
    let engine = authorized_engine(fast_source());
    let (first_count, first) = counting_consumer();
    let (second_count, second) = counting_consumer();

    engine.start_capture(first).unwrap();
    let session_id = engine.state().session_id().unwrap();

    let err = engine.start_capture(second).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::InvalidState);
    assert_eq!(engine.state().session_id(), Some(session_id));

    let before = first_count.load(Ordering::SeqCst);
    assert!(wait_until(Duration::from_secs(2), || first_count.load(Ordering::SeqCst) > before));
    assert_eq!(second_count.load(Ordering::SeqCst), 0);

    engine.stop_capture().unwrap();
}

#[test]
fn engine_is_reusable_across_sessions() {
    init_logging();
    let engine = authorized_engine(fast_source());

    let mut ids = Vec::new();
    for _ in 0..3 {
        let (count, consumer) = counting_consumer();
        engine.start_capture(consumer).unwrap();
        ids.push(engine.session_info().unwrap().id);
        assert!(wait_until(Duration::from_secs(2), || count.load(Ordering::SeqCst) > 0));
        engine.stop_capture().unwrap();
        assert!(engine.session_info().is_none());
    }
    ids.dedup();
    assert_eq!(ids.len(), 3);
}

#[test]
fn consumer_is_never_invoked_concurrently() {
    init_logging();
    let source = SyntheticSource::new()
        .with_buffer_frames(16)
        .with_threads(4)
        .with_interval(Duration::from_micros(200));
    let engine = authorized_engine(source);

    let busy = Arc::new(AtomicBool::new(false));
    let overlapped = Arc::new(AtomicBool::new(false));
    let (count, mut counter) = counting_consumer();
    {
        let busy = Arc::clone(&busy);
        let overlapped = Arc::clone(&overlapped);
        engine
            .start_capture(move |frame: &[u8]| {
                if busy.swap(true, Ordering::SeqCst) {
                    overlapped.store(true, Ordering::SeqCst);
                }
                thread::sleep(Duration::from_micros(100));
                counter(frame);
                busy.store(false, Ordering::SeqCst);
            })
            .unwrap();
    }

    assert!(wait_until(Duration::from_secs(2), || count.load(Ordering::SeqCst) >= 50));
    engine.stop_capture().unwrap();
    assert!(!overlapped.load(Ordering::SeqCst));
}

#[test]
fn buffers_arrive_in_capture_order() {
    init_logging();
    let source = fast_source().with_signal(SyntheticSignal::Sequence);
    let engine = authorized_engine(source);
    let seen = Arc::new(Mutex::new(Vec::new()));

    {
        let seen = Arc::clone(&seen);
        engine
            .start_capture(move |frame: &[u8]| {
                let first = f32::from_le_bytes([frame[0], frame[1], frame[2], frame[3]]);
                seen.lock().push(first as u64);
            })
            .unwrap();
    }
    assert!(wait_until(Duration::from_secs(2), || seen.lock().len() >= 20));
    engine.stop_capture().unwrap();

    let seen = seen.lock();
    assert!(seen.windows(2).all(|pair| pair[0] < pair[1]));
    assert_eq!(engine.diagnostics().frames_dropped, 0);
    assert!(seen.windows(2).all(|pair| pair[1] == pair[0] + 1));
}

#[test]
fn buffers_use_configured_frame_format() {
    init_logging();
    let config = EngineConfig {
        format: FrameFormat {
            sample_rate: 16_000,
            channels: 1,
            encoding: SampleEncoding::S16le,
        },
        ..EngineConfig::default()
    };
    let source = fast_source().with_format(48_000, 2).with_buffer_frames(480);
    let engine =
        CaptureEngine::with_config(source, Arc::new(StaticPermissions::authorized()), config).unwrap();
    let sizes = Arc::new(Mutex::new(Vec::new()));

    {
        let sizes = Arc::clone(&sizes);
        engine
            .start_capture(move |frame: &[u8]| sizes.lock().push(frame.len()))
            .unwrap();
    }
    assert!(wait_until(Duration::from_secs(2), || sizes.lock().len() >= 2));
    engine.stop_capture().unwrap();

    // 480 stereo frames at 48 kHz → 160 mono frames at 16 kHz, 2 bytes each.
    assert!(sizes.lock().iter().all(|&len| len == 320));
    assert_eq!(engine.frame_format().bytes_per_frame(), 2);
}

#[test]
fn consumer_can_stop_its_own_session() {
    init_logging();
    let engine = Arc::new(authorized_engine(fast_source()));
    let calls = Arc::new(AtomicUsize::new(0));
    let stop_result = Arc::new(Mutex::new(None));

    {
        let weak: Weak<CaptureEngine<SyntheticSource>> = Arc::downgrade(&engine);
        let calls = Arc::clone(&calls);
        let stop_result = Arc::clone(&stop_result);
        engine
            .start_capture(move |_: &[u8]| {
                calls.fetch_add(1, Ordering::SeqCst);
                if let Some(engine) = weak.upgrade() {
                    *stop_result.lock() = Some(engine.stop_capture());
                }
            })
            .unwrap();
    }

    assert!(wait_until(Duration::from_secs(2), || stop_result.lock().is_some()));
    assert!(engine.state().is_idle());
    thread::sleep(Duration::from_millis(20));
    assert_eq!(calls.load(Ordering::SeqCst), 1);
    assert_eq!(*stop_result.lock(), Some(Ok(())));
}

// ==================== failures ====================

#[test]
fn device_open_failure_leaves_engine_idle() {
    init_logging();
    let engine = authorized_engine(fast_source().failing_start(CaptureError::Device("in use".into())));
    let err = engine.start_capture(|_| {}).unwrap_err();
    assert!(err.is_device_error());
    assert_eq!(engine.state(), CaptureState::Idle);

    let engine = authorized_engine(fast_source().unavailable());
    assert_eq!(engine.start_capture(|_| {}), Err(CaptureError::DeviceNotAvailable));
    assert_eq!(engine.state(), CaptureState::Idle);
}

#[test]
fn stop_failure_is_reported_but_engine_is_idle() {
    init_logging();
    let engine = authorized_engine(fast_source().failing_stop(CaptureError::Device("invalidated".into())));
    let (count, consumer) = counting_consumer();
    engine.start_capture(consumer).unwrap();

    let err = engine.stop_capture().unwrap_err();
    assert!(err.is_device_error());
    assert_eq!(engine.state(), CaptureState::Idle);

    let after_stop = count.load(Ordering::SeqCst);
    thread::sleep(Duration::from_millis(20));
    assert_eq!(count.load(Ordering::SeqCst), after_stop);
}

#[test]
fn provider_failure_ends_session_and_engine_recovers() {
    init_logging();
    let engine = authorized_engine(fast_source().failing_after(5));
    let recorder = Arc::new(Recorder::default());
    engine.set_delegate(recorder.clone());

    engine.start_capture(|_| {}).unwrap();
    // The delegate hears about the failure after the state flips to idle.
    assert!(wait_until(Duration::from_secs(2), || recorder.summaries().len() == 1));
    assert!(engine.state().is_idle());

    let events = recorder.events();
    assert!(events.iter().any(|e| matches!(e, Event::Error(CaptureError::Device(_)))));
    let summaries = recorder.summaries();
    assert_eq!(summaries.len(), 1);
    assert!(summaries[0].failed());

    // A new session starts cleanly and stops without re-reporting the failure.
    let (count, consumer) = counting_consumer();
    engine.start_capture(consumer).unwrap();
    assert!(wait_until(Duration::from_secs(2), || count.load(Ordering::SeqCst) > 0));
    engine.stop_capture().unwrap();

    let summaries = recorder.summaries();
    assert_eq!(summaries.len(), 2);
    assert!(!summaries[1].failed());
}

// ==================== delegate & diagnostics ====================

#[test]
fn delegate_sees_lifecycle_and_summary() {
    init_logging();
    let engine = authorized_engine(fast_source());
    let recorder = Arc::new(Recorder::default());
    engine.set_delegate(recorder.clone());
    let (count, consumer) = counting_consumer();

    engine.start_capture(consumer).unwrap();
    let session_id = engine.state().session_id().unwrap();
    assert!(wait_until(Duration::from_secs(2), || count.load(Ordering::SeqCst) >= 5));
    engine.stop_capture().unwrap();

    let events = recorder.events();
    assert!(matches!(events[0], Event::State(CaptureState::Active { session_id: id }) if id == session_id));
    assert!(matches!(events[1], Event::State(CaptureState::Idle)));

    let summaries = recorder.summaries();
    assert_eq!(summaries.len(), 1);
    let summary = &summaries[0];
    assert_eq!(summary.info.id, session_id);
    assert_eq!(summary.diagnostics.frames_delivered, count.load(Ordering::SeqCst) as u64);
    assert_eq!(engine.diagnostics(), summary.diagnostics);
    assert!(summary.diagnostics.provider_callbacks >= summary.diagnostics.frames_delivered);
}

#[test]
fn dropping_engine_stops_capture() {
    init_logging();
    let source = fast_source();
    let pushed = source.push_counter();
    let engine = authorized_engine(source);
    engine.start_capture(|_| {}).unwrap();
    assert!(wait_until(Duration::from_secs(2), || pushed.load(Ordering::SeqCst) > 0));

    drop(engine);
    let after_drop = pushed.load(Ordering::SeqCst);
    thread::sleep(Duration::from_millis(20));
    assert_eq!(pushed.load(Ordering::SeqCst), after_drop);
}

/// Reads engine state back from `on_error`, on the failing provider thread.
#[derive(Default)]
struct InspectingDelegate {
    engine: Mutex<Weak<CaptureEngine<SyntheticSource>>>,
    in_error: AtomicBool,
    inspected: AtomicBool,
}

impl CaptureDelegate for InspectingDelegate {
    fn on_state_changed(&self, _state: &CaptureState) {}

    fn on_error(&self, _error: &CaptureError) {
        self.in_error.store(true, Ordering::SeqCst);
        thread::sleep(Duration::from_millis(50));
        let engine = self.engine.lock().upgrade();
        if let Some(engine) = engine {
            let _ = engine.diagnostics();
            let _ = engine.session_info();
            self.inspected.store(true, Ordering::SeqCst);
        }
    }

    fn on_session_finished(&self, _summary: &SessionSummary) {}
}

#[test]
fn stop_does_not_wait_on_delegate_reading_engine_state() {
    init_logging();
    let engine = Arc::new(authorized_engine(fast_source().failing_after(3)));
    let delegate = Arc::new(InspectingDelegate::default());
    *delegate.engine.lock() = Arc::downgrade(&engine);
    engine.set_delegate(delegate.clone());

    engine.start_capture(|_| {}).unwrap();
    assert!(wait_until(Duration::from_secs(2), || delegate.in_error.load(Ordering::SeqCst)));

    // Stop while the delegate is still inside `on_error`.
    let (tx, rx) = std::sync::mpsc::channel();
    let stopper = {
        let engine = Arc::clone(&engine);
        thread::spawn(move || {
            let _ = tx.send(engine.stop_capture());
        })
    };
    assert_eq!(rx.recv_timeout(Duration::from_secs(3)), Ok(Ok(())));
    stopper.join().unwrap();
    assert!(delegate.inspected.load(Ordering::SeqCst));
}

#[test]
fn active_is_reported_before_an_immediate_failure() {
    init_logging();
    for _ in 0..25 {
        let engine = authorized_engine(fast_source().failing_after(0));
        let recorder = Arc::new(Recorder::default());
        engine.set_delegate(recorder.clone());

        engine.start_capture(|_| {}).unwrap();
        assert!(wait_until(Duration::from_secs(2), || recorder.summaries().len() == 1));

        let states: Vec<CaptureState> = recorder
            .events()
            .into_iter()
            .filter_map(|e| match e {
                Event::State(state) => Some(state),
                _ => None,
            })
            .collect();
        assert_eq!(states.len(), 2);
        assert!(states[0].is_active());
        assert!(states[1].is_idle());
    }
}

#[test]
fn stop_after_device_failure_is_a_noop() {
    init_logging();
    let source = fast_source()
        .failing_after(3)
        .failing_stop(CaptureError::Device("already gone".into()));
    let engine = authorized_engine(source);
    let recorder = Arc::new(Recorder::default());
    engine.set_delegate(recorder.clone());

    engine.start_capture(|_| {}).unwrap();
    assert!(wait_until(Duration::from_secs(2), || recorder.summaries().len() == 1));
    assert!(engine.state().is_idle());

    assert_eq!(engine.stop_capture(), Ok(()));
    assert_eq!(recorder.summaries().len(), 1);
}
