//! WASAPI capture provider.
//!
//! Opens the default endpoint in shared mode on a dedicated MMCSS-registered
//! thread. `Endpoint::Loopback` records what is being played to the default
//! render device (`AUDCLNT_STREAMFLAGS_LOOPBACK`), `Endpoint::Microphone`
//! records the default capture device.
//!
//! The device is opened on the capture thread; `start` waits for that thread
//! to report whether opening succeeded, so open failures surface as start
//! errors. Failures after that (device unplugged, default device changed)
//! go through `ProviderSink::fail`. A change of default device is picked up
//! through an `IMMNotificationClient`; the stream keeps recording the old
//! device otherwise.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc;
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use windows::core::{implement, w, PCWSTR};
use windows::Win32::Foundation::{PROPERTYKEY, RPC_E_CHANGED_MODE};
use windows::Win32::Media::Audio::*;
use windows::Win32::Media::Multimedia::KSDATAFORMAT_SUBTYPE_IEEE_FLOAT;
use windows::Win32::System::Com::*;
use windows::Win32::System::Threading::{AvRevertMmThreadCharacteristics, AvSetMmThreadCharacteristicsW};

use audio_wrapper_core::models::error::CaptureError;
use audio_wrapper_core::traits::capture_provider::{CaptureProvider, ProviderSink};

/// Shared-mode buffer duration, in 100 ns units (100 ms).
const BUFFER_DURATION: i64 = 1_000_000;
const POLL_INTERVAL: Duration = Duration::from_millis(10);

const WAVE_FORMAT_PCM: u16 = 1;
const WAVE_FORMAT_IEEE_FLOAT: u16 = 3;
const WAVE_FORMAT_EXTENSIBLE: u16 = 0xFFFE;

/// Which default endpoint to capture from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Endpoint {
    /// System audio: loopback of the default render device.
    Loopback,
    Microphone,
}

impl Endpoint {
    fn data_flow(self) -> EDataFlow {
        match self {
            Endpoint::Loopback => eRender,
            Endpoint::Microphone => eCapture,
        }
    }

    fn stream_flags(self) -> u32 {
        match self {
            Endpoint::Loopback => AUDCLNT_STREAMFLAGS_LOOPBACK,
            Endpoint::Microphone => 0,
        }
    }

    fn label(self) -> &'static str {
        match self {
            Endpoint::Loopback => "System Audio (Loopback)",
            Endpoint::Microphone => "Default Microphone",
        }
    }
}

/// WASAPI capture of one default endpoint.
pub struct WasapiCapture {
    endpoint: Endpoint,
    running: Arc<AtomicBool>,
    handle: Option<thread::JoinHandle<()>>,
}

impl WasapiCapture {
    pub fn new(endpoint: Endpoint) -> Self {
        Self {
            endpoint,
            running: Arc::new(AtomicBool::new(false)),
            handle: None,
        }
    }

    /// System audio of the default render device.
    pub fn loopback() -> Self {
        Self::new(Endpoint::Loopback)
    }

    /// Default microphone.
    pub fn microphone() -> Self {
        Self::new(Endpoint::Microphone)
    }

    pub fn endpoint(&self) -> Endpoint {
        self.endpoint
    }
}

impl CaptureProvider for WasapiCapture {
    fn is_available(&self) -> bool {
        let _com = match ComScope::enter() {
            Ok(com) => com,
            Err(e) => {
                log::warn!("COM unavailable while checking {}: {}", self.endpoint.label(), e);
                return false;
            }
        };
        unsafe { default_device(self.endpoint).is_ok() }
    }

    fn start(&mut self, sink: ProviderSink) -> Result<(), CaptureError> {
        if self.handle.is_some() {
            return Err(CaptureError::InvalidState(format!(
                "{} capture already running",
                self.endpoint.label()
            )));
        }

        self.running.store(true, Ordering::SeqCst);
        let running = Arc::clone(&self.running);
        let endpoint = self.endpoint;
        let (ready_tx, ready_rx) = mpsc::channel();

        let handle = thread::Builder::new()
            .name("wasapi-capture".into())
            .spawn(move || capture_thread(endpoint, running, sink, ready_tx))
            .map_err(|e| {
                self.running.store(false, Ordering::SeqCst);
                CaptureError::Device(format!("failed to spawn capture thread: {}", e))
            })?;

        // A dropped sender without a message means the thread died while opening.
        let opened = ready_rx
            .recv()
            .unwrap_or_else(|_| Err(CaptureError::Device("capture thread exited during open".into())));

        match opened {
            Ok(()) => {
                self.handle = Some(handle);
                log::info!("WASAPI capture started on {}", endpoint.label());
                Ok(())
            }
            Err(e) => {
                self.running.store(false, Ordering::SeqCst);
                let _ = handle.join();
                Err(e)
            }
        }
    }

    fn stop(&mut self) -> Result<(), CaptureError> {
        self.running.store(false, Ordering::SeqCst);
        if let Some(handle) = self.handle.take() {
            if handle.join().is_err() {
                return Err(CaptureError::Device("WASAPI capture thread panicked".into()));
            }
            log::info!("WASAPI capture stopped on {}", self.endpoint.label());
        }
        Ok(())
    }

    fn device_name(&self) -> String {
        self.endpoint.label().into()
    }
}

impl Drop for WasapiCapture {
    fn drop(&mut self) {
        let _ = self.stop();
    }
}

/// How to read samples out of the endpoint's mix format.
#[derive(Debug, Clone, Copy)]
enum SampleLayout {
    Float32,
    Int16,
}

/// COM objects of an opened stream. Confined to the capture thread.
struct OpenStream {
    endpoint: Endpoint,
    enumerator: IMMDeviceEnumerator,
    audio_client: IAudioClient,
    capture_client: IAudioCaptureClient,
    watcher: Option<IMMNotificationClient>,
    default_changed: Arc<AtomicBool>,
    sample_rate: u32,
    channels: u16,
    layout: SampleLayout,
}

impl Drop for OpenStream {
    fn drop(&mut self) {
        if let Some(watcher) = self.watcher.take() {
            unsafe {
                let _ = self.enumerator.UnregisterEndpointNotificationCallback(&watcher);
            }
        }
    }
}

/// Flags a change of the default device the stream was opened on.
#[implement(IMMNotificationClient)]
struct DefaultDeviceWatcher {
    flow: EDataFlow,
    changed: Arc<AtomicBool>,
}

impl IMMNotificationClient_Impl for DefaultDeviceWatcher_Impl {
    fn OnDeviceStateChanged(&self, _device_id: &PCWSTR, _state: DEVICE_STATE) -> windows::core::Result<()> {
        Ok(())
    }

    fn OnDeviceAdded(&self, _device_id: &PCWSTR) -> windows::core::Result<()> {
        Ok(())
    }

    fn OnDeviceRemoved(&self, _device_id: &PCWSTR) -> windows::core::Result<()> {
        Ok(())
    }

    fn OnDefaultDeviceChanged(
        &self,
        flow: EDataFlow,
        role: ERole,
        _device_id: &PCWSTR,
    ) -> windows::core::Result<()> {
        if is_watched_default_change(self.flow, flow, role) {
            self.changed.store(true, Ordering::SeqCst);
        }
        Ok(())
    }

    fn OnPropertyValueChanged(&self, _device_id: &PCWSTR, _key: &PROPERTYKEY) -> windows::core::Result<()> {
        Ok(())
    }
}

/// Streams are opened on the `eConsole` default of their data flow.
fn is_watched_default_change(watched: EDataFlow, flow: EDataFlow, role: ERole) -> bool {
    flow == watched && role == eConsole
}

fn capture_thread(
    endpoint: Endpoint,
    running: Arc<AtomicBool>,
    sink: ProviderSink,
    ready: mpsc::Sender<Result<(), CaptureError>>,
) {
    let _com = match ComScope::enter() {
        Ok(com) => com,
        Err(e) => {
            let _ = ready.send(Err(e));
            return;
        }
    };

    let stream = match unsafe { open_stream(endpoint) } {
        Ok(stream) => stream,
        Err(e) => {
            let _ = ready.send(Err(e));
            return;
        }
    };

    let mmcss = unsafe {
        let mut task_index = 0u32;
        AvSetMmThreadCharacteristicsW(w!("Pro Audio"), &mut task_index)
    };
    if let Err(e) = &mmcss {
        log::warn!("MMCSS registration failed, capturing at normal priority: {}", e);
    }

    if let Err(e) = unsafe { stream.audio_client.Start() } {
        let _ = ready.send(Err(device_error("IAudioClient::Start", &e)));
        return;
    }
    let _ = ready.send(Ok(()));

    log::debug!(
        "{}: {} Hz, {} ch, {:?}",
        endpoint.label(),
        stream.sample_rate,
        stream.channels,
        stream.layout
    );

    if let Err(e) = unsafe { read_packets(&stream, &running, &sink) } {
        // Only report failures of a session that is still meant to run.
        if running.swap(false, Ordering::SeqCst) {
            sink.fail(e);
        }
    }

    unsafe {
        let _ = stream.audio_client.Stop();
        if let Ok(handle) = mmcss {
            let _ = AvRevertMmThreadCharacteristics(handle);
        }
    }
}

unsafe fn device_enumerator() -> Result<IMMDeviceEnumerator, CaptureError> {
    CoCreateInstance(&MMDeviceEnumerator, None, CLSCTX_ALL)
        .map_err(|e| CaptureError::Device(format!("failed to create device enumerator: {}", e)))
}

unsafe fn default_device(endpoint: Endpoint) -> Result<IMMDevice, CaptureError> {
    default_device_from(&device_enumerator()?, endpoint)
}

unsafe fn default_device_from(
    enumerator: &IMMDeviceEnumerator,
    endpoint: Endpoint,
) -> Result<IMMDevice, CaptureError> {
    enumerator
        .GetDefaultAudioEndpoint(endpoint.data_flow(), eConsole)
        .map_err(|_| CaptureError::DeviceNotAvailable)
}

unsafe fn open_stream(endpoint: Endpoint) -> Result<OpenStream, CaptureError> {
    let enumerator = device_enumerator()?;
    let device = default_device_from(&enumerator, endpoint)?;
    let audio_client: IAudioClient = device
        .Activate(CLSCTX_ALL, None)
        .map_err(|e| device_error("IMMDevice::Activate", &e))?;

    let mix_format_ptr = audio_client
        .GetMixFormat()
        .map_err(|e| device_error("IAudioClient::GetMixFormat", &e))?;
    let mix_format = MixFormat(mix_format_ptr);

    let format = std::ptr::read_unaligned(mix_format.0);
    let (sample_rate, channels) = ({ format.nSamplesPerSec }, { format.nChannels });
    let layout = sample_layout(mix_format.0)?;

    audio_client
        .Initialize(
            AUDCLNT_SHAREMODE_SHARED,
            endpoint.stream_flags(),
            BUFFER_DURATION,
            0,
            mix_format.0,
            None,
        )
        .map_err(|e| device_error("IAudioClient::Initialize", &e))?;

    let capture_client: IAudioCaptureClient = audio_client
        .GetService()
        .map_err(|e| device_error("IAudioClient::GetService", &e))?;

    let default_changed = Arc::new(AtomicBool::new(false));
    let watcher: IMMNotificationClient = DefaultDeviceWatcher {
        flow: endpoint.data_flow(),
        changed: Arc::clone(&default_changed),
    }
    .into();
    let watcher = match enumerator.RegisterEndpointNotificationCallback(&watcher) {
        Ok(()) => Some(watcher),
        Err(e) => {
            log::warn!("default device changes will go unnoticed: {}", e);
            None
        }
    };

    Ok(OpenStream {
        endpoint,
        enumerator,
        audio_client,
        capture_client,
        watcher,
        default_changed,
        sample_rate,
        channels,
        layout,
    })
}

/// Shared-mode mix formats are almost always 32-bit float; 16-bit PCM shows
/// up on some legacy drivers.
unsafe fn sample_layout(format: *const WAVEFORMATEX) -> Result<SampleLayout, CaptureError> {
    let header = std::ptr::read_unaligned(format);
    let (format_tag, bits) = ({ header.wFormatTag }, { header.wBitsPerSample });
    let tag = if format_tag == WAVE_FORMAT_EXTENSIBLE {
        let extensible = std::ptr::read_unaligned(format as *const WAVEFORMATEXTENSIBLE);
        let sub_format = { extensible.SubFormat };
        if sub_format == KSDATAFORMAT_SUBTYPE_IEEE_FLOAT {
            WAVE_FORMAT_IEEE_FLOAT
        } else {
            WAVE_FORMAT_PCM
        }
    } else {
        format_tag
    };

    match (tag, bits) {
        (WAVE_FORMAT_IEEE_FLOAT, 32) => Ok(SampleLayout::Float32),
        (WAVE_FORMAT_PCM, 16) => Ok(SampleLayout::Int16),
        (tag, bits) => Err(CaptureError::Device(format!(
            "unsupported mix format (tag {:#x}, {} bits)",
            tag, bits
        ))),
    }
}

unsafe fn read_packets(
    stream: &OpenStream,
    running: &AtomicBool,
    sink: &ProviderSink,
) -> Result<(), CaptureError> {
    let channels = stream.channels as usize;
    let mut converted: Vec<f32> = Vec::new();

    while running.load(Ordering::SeqCst) {
        thread::sleep(POLL_INTERVAL);

        if stream.default_changed.load(Ordering::SeqCst) {
            return Err(CaptureError::Device(format!(
                "default device changed during capture of {}",
                stream.endpoint.label()
            )));
        }

        let mut packet_length = stream
            .capture_client
            .GetNextPacketSize()
            .map_err(|e| device_error("GetNextPacketSize", &e))?;

        while packet_length > 0 {
            let mut data: *mut u8 = std::ptr::null_mut();
            let mut frames: u32 = 0;
            let mut flags: u32 = 0;
            stream
                .capture_client
                .GetBuffer(&mut data, &mut frames, &mut flags, None, None)
                .map_err(|e| device_error("GetBuffer", &e))?;

            let total = frames as usize * channels;
            if total > 0 {
                converted.clear();
                if flags & (AUDCLNT_BUFFERFLAGS_SILENT.0 as u32) != 0 || data.is_null() {
                    converted.resize(total, 0.0);
                } else {
                    match stream.layout {
                        SampleLayout::Float32 => {
                            converted.extend_from_slice(std::slice::from_raw_parts(data as *const f32, total));
                        }
                        SampleLayout::Int16 => {
                            let raw = std::slice::from_raw_parts(data as *const i16, total);
                            converted.extend(raw.iter().map(|&s| s as f32 / i16::MAX as f32));
                        }
                    }
                }
                sink.push(&converted, stream.sample_rate, stream.channels);
            }

            stream
                .capture_client
                .ReleaseBuffer(frames)
                .map_err(|e| device_error("ReleaseBuffer", &e))?;

            packet_length = stream
                .capture_client
                .GetNextPacketSize()
                .map_err(|e| device_error("GetNextPacketSize", &e))?;
        }
    }
    Ok(())
}

fn device_error(call: &str, error: &windows::core::Error) -> CaptureError {
    if error.code() == AUDCLNT_E_DEVICE_INVALIDATED {
        CaptureError::Device(format!("audio device invalidated ({})", call))
    } else {
        CaptureError::Device(format!("{} failed: {}", call, error))
    }
}

/// Owns a `GetMixFormat` allocation.
struct MixFormat(*mut WAVEFORMATEX);

impl Drop for MixFormat {
    fn drop(&mut self) {
        unsafe { CoTaskMemFree(Some(self.0 as *const _)) };
    }
}

/// COM initialized (MTA) for the lifetime of the value.
pub(crate) struct ComScope {
    initialized: bool,
}

impl ComScope {
    pub(crate) fn enter() -> Result<Self, CaptureError> {
        let hr = unsafe { CoInitializeEx(None, COINIT_MULTITHREADED) };
        if hr.is_ok() {
            return Ok(Self { initialized: true });
        }
        // Already initialized as STA by the host; usable, but not ours to undo.
        if hr == RPC_E_CHANGED_MODE {
            return Ok(Self { initialized: false });
        }
        Err(CaptureError::Device(format!("CoInitializeEx failed: {}", hr.message())))
    }
}

impl Drop for ComScope {
    fn drop(&mut self) {
        if self.initialized {
            unsafe { CoUninitialize() };
        }
    }
}
