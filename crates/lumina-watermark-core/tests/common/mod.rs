//! Resource-tracking fakes shared by the integration tests.

#![allow(dead_code)]

use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use crossbeam_channel::Receiver;
use parking_lot::Mutex;

use lumina_watermark_core::frame_buffer::ExternalTexture;
use lumina_watermark_core::provider::RawSurfaceProvider;
use lumina_watermark_core::{
    CpuBackend, DecoderEventSink, DecoderFactory, DrawableKind, GpuBackend, MediaDecoder,
    NativeCompositor, NativeModule, PipelineConfig, PlatformServices, PlaybackEvent,
    RecoveryPolicy, RenderView, Surface, TextureId, TransformMatrix, WatermarkAsset,
    WatermarkError, WindowEvent, WindowEventSender,
};

/// Installs a test subscriber once; `RUST_LOG` controls verbosity.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

pub fn watermark() -> WatermarkAsset {
    WatermarkAsset::solid(8, 8, [255, 255, 255, 96]).unwrap()
}

/// Config with fast vsync-friendly timeouts.
pub fn test_config() -> PipelineConfig {
    PipelineConfig::default().with_render_command_timeout(Duration::from_secs(2))
}

/// Config that recreates immediately and never gives up.
pub fn immediate_recovery_config() -> PipelineConfig {
    test_config().with_recovery(RecoveryPolicy::unbounded())
}

/// Counts every compositor the backend hands out and flags double releases.
#[derive(Default)]
pub struct Tracker {
    next_instance: AtomicU64,
    live: Mutex<HashSet<u64>>,
    initialized: Mutex<Vec<u64>>,
    releases: AtomicUsize,
    double_releases: AtomicUsize,
    draws: AtomicU64,
    pub fail_init: AtomicBool,
    pub fail_draw: AtomicBool,
    views: Mutex<Vec<WindowEventSender>>,
    raw_requests: AtomicUsize,
}

impl Tracker {
    /// Compositor instances initialized and not released.
    pub fn live(&self) -> Vec<u64> {
        let mut live: Vec<u64> = self.live.lock().iter().copied().collect();
        live.sort_unstable();
        live
    }

    /// Instances initialized, in order.
    pub fn initialized(&self) -> Vec<u64> {
        self.initialized.lock().clone()
    }

    pub fn releases(&self) -> usize {
        self.releases.load(Ordering::SeqCst)
    }

    pub fn double_releases(&self) -> usize {
        self.double_releases.load(Ordering::SeqCst)
    }

    pub fn draws(&self) -> u64 {
        self.draws.load(Ordering::SeqCst)
    }

    pub fn raw_requests(&self) -> usize {
        self.raw_requests.load(Ordering::SeqCst)
    }
}

struct TrackingCompositor {
    instance: u64,
    inner: Box<dyn NativeCompositor>,
    tracker: Arc<Tracker>,
    initialized: bool,
    released: bool,
}

impl NativeCompositor for TrackingCompositor {
    fn init(
        &mut self,
        watermark: &WatermarkAsset,
        max_width: u32,
        max_height: u32,
    ) -> Result<(), WatermarkError> {
        if self.tracker.fail_init.load(Ordering::SeqCst) {
            return Err(WatermarkError::CompositorInit("injected init failure".into()));
        }
        self.inner.init(watermark, max_width, max_height)?;
        self.initialized = true;
        self.tracker.live.lock().insert(self.instance);
        self.tracker.initialized.lock().push(self.instance);
        Ok(())
    }

    fn texture_id(&self) -> TextureId {
        self.inner.texture_id()
    }

    fn draw_frame(
        &mut self,
        matrix: &TransformMatrix,
        width: u32,
        height: u32,
    ) -> Result<(), WatermarkError> {
        assert!(!self.released, "draw after release");
        if self.tracker.fail_draw.load(Ordering::SeqCst) {
            return Err(WatermarkError::GpuResource("injected draw failure".into()));
        }
        self.inner.draw_frame(matrix, width, height)?;
        self.tracker.draws.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn release(&mut self) {
        if self.released {
            self.tracker.double_releases.fetch_add(1, Ordering::SeqCst);
            return;
        }
        self.released = true;
        self.tracker.releases.fetch_add(1, Ordering::SeqCst);
        self.tracker.live.lock().remove(&self.instance);
        self.inner.release();
    }
}

/// View whose events the test sends by hand.
struct ManualView;

impl RenderView for ManualView {}

/// [`CpuBackend`] wrapped with compositor tracking and failure injection.
pub struct TrackingBackend {
    pub cpu: CpuBackend,
    pub tracker: Arc<Tracker>,
    manual: bool,
}

impl TrackingBackend {
    /// Views are driven by the CPU vsync thread.
    pub fn new() -> Self {
        Self {
            cpu: CpuBackend::new(64, 36).with_vsync_interval(Duration::from_millis(2)),
            tracker: Arc::new(Tracker::default()),
            manual: false,
        }
    }

    /// Views produce nothing; use [`send_to_latest_view`](Self::send_to_latest_view).
    pub fn manual() -> Self {
        Self {
            manual: true,
            ..Self::new()
        }
    }

    /// Delivers `event` to the most recently created view's render thread.
    pub fn send_to_latest_view(&self, event: WindowEvent) -> bool {
        self.tracker
            .views
            .lock()
            .last()
            .is_some_and(|view| view.send(event))
    }
}

impl GpuBackend for TrackingBackend {
    fn display_size(&self) -> (u32, u32) {
        self.cpu.display_size()
    }

    fn create_view(&self, events: WindowEventSender) -> Result<Box<dyn RenderView>, WatermarkError> {
        self.tracker.views.lock().push(events.clone());
        if self.manual {
            return Ok(Box::new(ManualView));
        }
        self.cpu.create_view(events)
    }

    fn create_compositor(&self) -> Result<Box<dyn NativeCompositor>, WatermarkError> {
        Ok(Box::new(TrackingCompositor {
            instance: self.tracker.next_instance.fetch_add(1, Ordering::SeqCst) + 1,
            inner: self.cpu.create_compositor()?,
            tracker: Arc::clone(&self.tracker),
            initialized: false,
            released: false,
        }))
    }

    fn create_external_texture(
        &self,
        texture_id: TextureId,
    ) -> Result<Box<dyn ExternalTexture>, WatermarkError> {
        self.cpu.create_external_texture(texture_id)
    }
}

impl RawSurfaceProvider for TrackingBackend {
    fn raw_surface(&self) -> Result<Surface, WatermarkError> {
        self.tracker.raw_requests.fetch_add(1, Ordering::SeqCst);
        self.cpu.raw_surface()
    }
}

/// Call observed on a scripted decoder.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DecoderCall {
    SetSurface { kind: DrawableKind, valid: bool },
    SetDataSource(String),
    SetLooping(bool),
    SetScreenOn(bool),
    PrepareAsync,
    Start,
    Stop,
    Reset,
    Release,
}

struct ScriptedDecoder {
    index: usize,
    sink: DecoderEventSink,
    auto_prepare: bool,
    playing: bool,
    released: bool,
    log: Arc<Mutex<Vec<(usize, DecoderCall)>>>,
    live: Arc<AtomicUsize>,
}

impl ScriptedDecoder {
    fn record(&self, call: DecoderCall) {
        assert!(!self.released, "call after release: {call:?}");
        self.log.lock().push((self.index, call));
    }
}

impl MediaDecoder for ScriptedDecoder {
    fn set_surface(&mut self, surface: &Surface) -> Result<(), WatermarkError> {
        self.record(DecoderCall::SetSurface {
            kind: surface.kind(),
            valid: surface.is_valid(),
        });
        Ok(())
    }

    fn set_data_source(&mut self, url: &str) -> Result<(), WatermarkError> {
        self.record(DecoderCall::SetDataSource(url.to_string()));
        Ok(())
    }

    fn set_looping(&mut self, looping: bool) {
        self.record(DecoderCall::SetLooping(looping));
    }

    fn set_screen_on_while_playing(&mut self, screen_on: bool) {
        self.record(DecoderCall::SetScreenOn(screen_on));
    }

    fn prepare_async(&mut self) -> Result<(), WatermarkError> {
        self.record(DecoderCall::PrepareAsync);
        if self.auto_prepare {
            // Completion is delivered from another thread, like a real decoder.
            let sink = self.sink.clone();
            std::thread::spawn(move || {
                sink.prepared();
            });
        }
        Ok(())
    }

    fn start(&mut self) -> Result<(), WatermarkError> {
        self.record(DecoderCall::Start);
        self.playing = true;
        Ok(())
    }

    fn is_playing(&self) -> bool {
        self.playing
    }

    fn stop(&mut self) {
        self.record(DecoderCall::Stop);
        self.playing = false;
    }

    fn reset(&mut self) {
        self.record(DecoderCall::Reset);
    }

    fn release(&mut self) {
        self.record(DecoderCall::Release);
        self.released = true;
        self.live.fetch_sub(1, Ordering::SeqCst);
    }
}

/// Decoder factory whose decoders log every call and whose signals the test
/// fires by hand (or automatically for `prepared`).
pub struct ScriptedDecoders {
    auto_prepare: bool,
    pub fail_create: AtomicBool,
    log: Arc<Mutex<Vec<(usize, DecoderCall)>>>,
    sinks: Mutex<Vec<DecoderEventSink>>,
    live: Arc<AtomicUsize>,
}

impl ScriptedDecoders {
    pub fn new(auto_prepare: bool) -> Self {
        Self {
            auto_prepare,
            fail_create: AtomicBool::new(false),
            log: Arc::new(Mutex::new(Vec::new())),
            sinks: Mutex::new(Vec::new()),
            live: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Every call as `(decoder index, call)`.
    pub fn calls(&self) -> Vec<(usize, DecoderCall)> {
        self.log.lock().clone()
    }

    /// Calls made on decoder `index`.
    pub fn calls_of(&self, index: usize) -> Vec<DecoderCall> {
        self.log
            .lock()
            .iter()
            .filter(|(i, _)| *i == index)
            .map(|(_, c)| c.clone())
            .collect()
    }

    pub fn created(&self) -> usize {
        self.sinks.lock().len()
    }

    /// Decoders created and not released.
    pub fn live(&self) -> usize {
        self.live.load(Ordering::SeqCst)
    }

    /// Fires `prepared` from the most recent decoder.
    pub fn prepare_latest(&self) {
        if let Some(sink) = self.sinks.lock().last() {
            sink.prepared();
        }
    }

    /// Fires an error from the most recent decoder.
    pub fn fail_latest(&self, code: i32) {
        if let Some(sink) = self.sinks.lock().last() {
            sink.error(code, 0);
        }
    }
}

impl DecoderFactory for ScriptedDecoders {
    fn create(&self, events: DecoderEventSink) -> Result<Box<dyn MediaDecoder>, WatermarkError> {
        if self.fail_create.load(Ordering::SeqCst) {
            return Err(WatermarkError::DecoderInit("injected create failure".into()));
        }
        let index = {
            let mut sinks = self.sinks.lock();
            sinks.push(events.clone());
            sinks.len() - 1
        };
        self.live.fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(ScriptedDecoder {
            index,
            sink: events,
            auto_prepare: self.auto_prepare,
            playing: false,
            released: false,
            log: Arc::clone(&self.log),
            live: Arc::clone(&self.live),
        }))
    }
}

/// Services over the tracking fakes; `gpu_supported` drives the probe.
pub fn services(
    gpu_supported: bool,
    backend: &Arc<TrackingBackend>,
    decoders: &Arc<ScriptedDecoders>,
) -> PlatformServices {
    PlatformServices {
        probe: Arc::new(move |_min: u32| gpu_supported),
        gpu: Arc::clone(backend) as Arc<dyn GpuBackend>,
        module: Arc::new(NativeModule::builtin("MediaWatermark")),
        watermark: Ok(watermark()),
        raw_surfaces: Arc::clone(backend) as Arc<dyn RawSurfaceProvider>,
        decoders: Arc::clone(decoders) as Arc<dyn DecoderFactory>,
    }
}

/// Everything queued on an observer channel.
pub fn drain(events: &Receiver<PlaybackEvent>) -> Vec<PlaybackEvent> {
    events.try_iter().collect()
}

/// Keeps only the events a scenario asserts on: surface transitions,
/// `Prepared`, and the `Playing` state.
pub fn milestones(events: &[PlaybackEvent]) -> Vec<&'static str> {
    use lumina_watermark_core::{PlaybackState, SurfaceLifecycleEvent};

    events
        .iter()
        .filter_map(|e| match e {
            PlaybackEvent::Surface {
                event: SurfaceLifecycleEvent::Created,
                ..
            } => Some("Created"),
            PlaybackEvent::Surface {
                event: SurfaceLifecycleEvent::Destroyed,
                ..
            } => Some("Destroyed"),
            PlaybackEvent::Prepared => Some("Prepared"),
            PlaybackEvent::State(PlaybackState::Playing) => Some("Playing"),
            _ => None,
        })
        .collect()
}
