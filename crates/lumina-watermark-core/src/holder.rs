//! Render surface holder: render thread, compositor and frame buffer.
//!
//! A [`RenderSurfaceHolder`] owns one render thread. The platform view drives
//! that thread with [`WindowEvent`]s; the thread owns the
//! [`CompositorHandle`] and the [`TextureFrameBuffer`] and runs the per-frame
//! import + draw. Lifecycle transitions are posted to the control thread as
//! [`ControlMessage::Surface`], never delivered inline.
//!
//! ```text
//! Uninitialized ──Ready──► Created ──Resized──► Changed(w,h) ──► ... ──► Destroyed
//!        │                                                            ▲
//!        └───────────────────── destroy() / Lost ─────────────────────┘
//! ```

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

use crossbeam_channel::{Receiver, RecvTimeoutError, Sender};
use parking_lot::Mutex;

use crate::backend::{GpuResources, RenderView, WindowEvent, WindowEventSender};
use crate::compositor::CompositorHandle;
use crate::control::{ControlMessage, ControlSender, HolderId};
use crate::error::WatermarkError;
use crate::frame_buffer::TextureFrameBuffer;
use crate::matrix::TransformMatrix;
use crate::surface::{PixelFormat, Surface, SurfaceLifecycleEvent};

/// Lifecycle phase of a holder.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HolderPhase {
    /// Waiting for the render context
    Uninitialized,
    /// Compositor and frame buffer exist; drawable surface available
    Created,
    /// Output resized at least once after creation
    Changed {
        /// Width in pixels
        width: u32,
        /// Height in pixels
        height: u32,
    },
    /// Terminal; GPU resources released
    Destroyed,
}

enum RenderCommand {
    /// Release GPU resources, acknowledge, and exit
    Release { ack: Sender<()> },
}

struct HolderState {
    phase: HolderPhase,
    frame_buffer: Option<Arc<TextureFrameBuffer>>,
    size: Option<(u32, u32)>,
}

struct HolderShared {
    state: Mutex<HolderState>,
    created_sent: AtomicBool,
    destroyed_sent: AtomicBool,
    shutdown: AtomicBool,
    frames_rendered: AtomicU64,
}

impl HolderShared {
    /// Posts `Destroyed` if `Created` went out and `Destroyed` did not yet.
    fn post_destroyed_once(&self, holder: HolderId, control: &ControlSender) {
        if self.created_sent.load(Ordering::Acquire) && !self.destroyed_sent.swap(true, Ordering::AcqRel)
        {
            control.post(ControlMessage::Surface {
                holder,
                event: SurfaceLifecycleEvent::Destroyed,
            });
        }
    }
}

/// Owns the render thread and the GPU pipeline of one drawable.
///
/// Terminal after [`destroy`](Self::destroy): a new session constructs a new
/// holder.
pub struct RenderSurfaceHolder {
    id: HolderId,
    shared: Arc<HolderShared>,
    command_tx: Sender<RenderCommand>,
    thread: Option<JoinHandle<()>>,
    view: Option<Box<dyn RenderView>>,
    control: ControlSender,
    release_timeout: Duration,
    destroyed: bool,
}

impl std::fmt::Debug for RenderSurfaceHolder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RenderSurfaceHolder")
            .field("id", &self.id)
            .field("phase", &self.phase())
            .field("destroyed", &self.destroyed)
            .finish_non_exhaustive()
    }
}

impl RenderSurfaceHolder {
    /// Loads the native module (first holder only), starts the render thread
    /// and attaches a platform view to it.
    ///
    /// Lifecycle events are posted to `control`. `release_timeout` bounds how
    /// long [`destroy`](Self::destroy) waits for the render thread's
    /// acknowledgement before logging and falling back to a plain join.
    pub fn new(
        resources: &GpuResources,
        control: ControlSender,
        release_timeout: Duration,
    ) -> Result<Self, WatermarkError> {
        resources.module.ensure_loaded()?;

        let id = HolderId::next();
        let shared = Arc::new(HolderShared {
            state: Mutex::new(HolderState {
                phase: HolderPhase::Uninitialized,
                frame_buffer: None,
                size: None,
            }),
            created_sent: AtomicBool::new(false),
            destroyed_sent: AtomicBool::new(false),
            shutdown: AtomicBool::new(false),
            frames_rendered: AtomicU64::new(0),
        });

        let (command_tx, command_rx) = crossbeam_channel::unbounded();
        let (event_tx, event_rx) = crossbeam_channel::unbounded();

        let thread_resources = resources.clone();
        let thread_shared = Arc::clone(&shared);
        let thread_control = control.clone();

        // The compositor is not Send, so the loop state is built on the
        // render thread itself.
        let thread = std::thread::Builder::new()
            .name(format!("lumina-watermark-render-{}", id.get()))
            .spawn(move || {
                let render_loop = RenderLoop {
                    holder: id,
                    resources: thread_resources,
                    shared: thread_shared,
                    control: thread_control,
                    compositor: None,
                    frame_buffer: None,
                    matrix: TransformMatrix::FLIP_VERTICAL,
                    size: None,
                    failed: false,
                    lost: false,
                };
                render_loop.run(command_rx, event_rx);
            })
            .map_err(|e| WatermarkError::Generic(format!("Failed to spawn render thread: {e}")))?;

        let mut holder = Self {
            id,
            shared,
            command_tx,
            thread: Some(thread),
            view: None,
            control,
            release_timeout,
            destroyed: false,
        };

        match resources.backend.create_view(WindowEventSender::new(event_tx)) {
            Ok(view) => holder.view = Some(view),
            Err(e) => {
                tracing::warn!("RenderSurfaceHolder {}: view creation failed: {}", id.get(), e);
                holder.destroy();
                return Err(e);
            }
        }

        tracing::info!("RenderSurfaceHolder {}: started", id.get());
        Ok(holder)
    }

    /// Holder identity carried by its lifecycle messages.
    pub fn id(&self) -> HolderId {
        self.id
    }

    /// Current lifecycle phase.
    pub fn phase(&self) -> HolderPhase {
        self.shared.state.lock().phase
    }

    /// Last output size reported by the window.
    pub fn size(&self) -> Option<(u32, u32)> {
        self.shared.state.lock().size
    }

    /// Frames composited so far.
    pub fn frames_rendered(&self) -> u64 {
        self.shared.frames_rendered.load(Ordering::Relaxed)
    }

    /// Drawable surface for the decoder, available once `Created`.
    pub fn surface(&self) -> Option<Surface> {
        let state = self.shared.state.lock();
        match state.phase {
            HolderPhase::Created | HolderPhase::Changed { .. } => {}
            HolderPhase::Uninitialized | HolderPhase::Destroyed => return None,
        }
        let frame_buffer = state.frame_buffer.as_ref()?;
        match frame_buffer.drawable_surface() {
            Ok(surface) => Some(surface),
            Err(e) => {
                tracing::warn!("RenderSurfaceHolder {}: no drawable surface: {}", self.id.get(), e);
                None
            }
        }
    }

    /// Releases the compositor and the frame buffer and stops the render
    /// thread.
    ///
    /// Blocks until the render thread has released everything and exited, so
    /// no tick touches a released resource once this returns. Idempotent.
    pub fn destroy(&mut self) {
        if self.destroyed {
            return;
        }
        self.destroyed = true;
        self.shared.shutdown.store(true, Ordering::Release);

        let (ack_tx, ack_rx) = crossbeam_channel::bounded(1);
        if self.command_tx.send(RenderCommand::Release { ack: ack_tx }).is_ok() {
            match ack_rx.recv_timeout(self.release_timeout) {
                Ok(()) => {}
                Err(RecvTimeoutError::Timeout) => tracing::error!(
                    "RenderSurfaceHolder {}: render thread did not acknowledge release within {:?}, waiting",
                    self.id.get(),
                    self.release_timeout
                ),
                Err(RecvTimeoutError::Disconnected) => {
                    tracing::debug!("RenderSurfaceHolder {}: render thread already gone", self.id.get())
                }
            }
        }

        if let Some(thread) = self.thread.take() {
            if let Err(e) = thread.join() {
                tracing::warn!("RenderSurfaceHolder {}: render thread panicked: {:?}", self.id.get(), e);
            }
        }

        if let Some(mut view) = self.view.take() {
            view.detach();
        }

        {
            let mut state = self.shared.state.lock();
            if let Some(frame_buffer) = state.frame_buffer.take() {
                frame_buffer.release();
            }
            state.phase = HolderPhase::Destroyed;
        }

        self.shared.post_destroyed_once(self.id, &self.control);
        tracing::info!(
            "RenderSurfaceHolder {}: destroyed after {} frames",
            self.id.get(),
            self.frames_rendered()
        );
    }

    /// Returns true once [`destroy`](Self::destroy) ran.
    pub fn is_destroyed(&self) -> bool {
        self.destroyed
    }
}

impl Drop for RenderSurfaceHolder {
    fn drop(&mut self) {
        self.destroy();
    }
}

/// State owned by the render thread.
struct RenderLoop {
    holder: HolderId,
    resources: GpuResources,
    shared: Arc<HolderShared>,
    control: ControlSender,
    compositor: Option<CompositorHandle>,
    frame_buffer: Option<Arc<TextureFrameBuffer>>,
    matrix: TransformMatrix,
    size: Option<(u32, u32)>,
    failed: bool,
    lost: bool,
}

impl RenderLoop {
    fn run(mut self, commands: Receiver<RenderCommand>, events: Receiver<WindowEvent>) {
        tracing::debug!("RenderSurfaceHolder {}: render thread running", self.holder.get());
        let never = crossbeam_channel::never();
        let mut events_open = true;

        loop {
            let event_rx = if events_open { &events } else { &never };
            crossbeam_channel::select! {
                recv(commands) -> command => {
                    match command {
                        Ok(RenderCommand::Release { ack }) => {
                            self.release_gpu();
                            let _ = ack.send(());
                        }
                        Err(_) => self.release_gpu(),
                    }
                    break;
                }
                recv(event_rx) -> event => match event {
                    Ok(event) => self.handle_event(event),
                    Err(_) => {
                        tracing::debug!(
                            "RenderSurfaceHolder {}: view stopped delivering events",
                            self.holder.get()
                        );
                        events_open = false;
                    }
                },
            }
        }

        tracing::debug!("RenderSurfaceHolder {}: render thread exiting", self.holder.get());
    }

    fn handle_event(&mut self, event: WindowEvent) {
        match event {
            WindowEvent::Ready => self.on_ready(),
            WindowEvent::Resized {
                width,
                height,
                format,
            } => self.on_resized(width, height, format),
            WindowEvent::Vsync => self.on_vsync(),
            WindowEvent::Lost => self.on_lost(),
        }
    }

    fn on_ready(&mut self) {
        if self.shared.shutdown.load(Ordering::Acquire) {
            return;
        }
        if self.compositor.is_some() || self.lost || self.failed {
            tracing::warn!(
                "RenderSurfaceHolder {}: ignoring repeated render context creation",
                self.holder.get()
            );
            return;
        }

        if let Err(e) = self.create_pipeline() {
            tracing::warn!("RenderSurfaceHolder {}: pipeline creation failed: {}", self.holder.get(), e);
            self.fail(e);
            return;
        }

        self.shared.created_sent.store(true, Ordering::Release);
        self.control.post(ControlMessage::Surface {
            holder: self.holder,
            event: SurfaceLifecycleEvent::Created,
        });
        tracing::info!("RenderSurfaceHolder {}: created", self.holder.get());
    }

    /// Compositor first, then the frame buffer bound to its texture id.
    fn create_pipeline(&mut self) -> Result<(), WatermarkError> {
        let backend = &*self.resources.backend;
        let (max_width, max_height) = backend.display_size();
        let compositor =
            CompositorHandle::create(backend, &self.resources.watermark, max_width, max_height)?;
        let texture_id = compositor.texture_id();
        // On failure the compositor drops here and releases itself.
        let texture = backend.create_external_texture(texture_id)?;
        let frame_buffer = Arc::new(TextureFrameBuffer::new(texture_id, texture));

        self.compositor = Some(compositor);
        self.frame_buffer = Some(Arc::clone(&frame_buffer));

        let mut state = self.shared.state.lock();
        state.frame_buffer = Some(frame_buffer);
        state.phase = HolderPhase::Created;
        Ok(())
    }

    fn on_resized(&mut self, width: u32, height: u32, format: PixelFormat) {
        self.size = Some((width, height));
        let notify = {
            let mut state = self.shared.state.lock();
            state.size = Some((width, height));
            match state.phase {
                HolderPhase::Created | HolderPhase::Changed { .. } => {
                    state.phase = HolderPhase::Changed { width, height };
                    true
                }
                HolderPhase::Uninitialized | HolderPhase::Destroyed => false,
            }
        };
        if notify && !self.shared.shutdown.load(Ordering::Acquire) {
            tracing::info!(
                "RenderSurfaceHolder {}: changed to {}x{} ({:?})",
                self.holder.get(),
                width,
                height,
                format
            );
            self.control.post(ControlMessage::Surface {
                holder: self.holder,
                event: SurfaceLifecycleEvent::Changed {
                    width,
                    height,
                    format,
                },
            });
        }
    }

    fn on_vsync(&mut self) {
        if self.failed || self.shared.shutdown.load(Ordering::Acquire) {
            return;
        }
        let (Some(compositor), Some(frame_buffer)) =
            (self.compositor.as_mut(), self.frame_buffer.as_ref())
        else {
            return;
        };
        let Some((width, height)) = self.size else {
            tracing::trace!("RenderSurfaceHolder {}: tick before first resize", self.holder.get());
            return;
        };

        if tracing::enabled!(tracing::Level::TRACE) && !frame_buffer.has_new_frame() {
            tracing::trace!(
                "RenderSurfaceHolder {}: no new frame, redrawing with {:?}",
                self.holder.get(),
                frame_buffer.last_matrix()
            );
        }
        let result = match frame_buffer.consume_latest(&mut self.matrix) {
            Ok(true) => compositor.draw_frame(&self.matrix, width, height),
            Ok(false) => return,
            Err(e) => Err(e),
        };

        match result {
            Ok(()) => {
                let n = self.shared.frames_rendered.fetch_add(1, Ordering::Relaxed) + 1;
                tracing::trace!("RenderSurfaceHolder {}: frame {}", self.holder.get(), n);
            }
            Err(e) => {
                tracing::warn!("RenderSurfaceHolder {}: render failed: {}", self.holder.get(), e);
                self.fail(e);
            }
        }
    }

    fn on_lost(&mut self) {
        if self.lost {
            return;
        }
        self.lost = true;
        tracing::info!("RenderSurfaceHolder {}: render context lost", self.holder.get());
        self.release_gpu();
        self.shared.post_destroyed_once(self.holder, &self.control);
    }

    /// Reports one failure per holder and stops drawing.
    fn fail(&mut self, error: WatermarkError) {
        if self.failed {
            return;
        }
        self.failed = true;
        self.control.post(ControlMessage::RenderFailure {
            holder: self.holder,
            error,
        });
    }

    /// Compositor first; it may still reference the texture.
    fn release_gpu(&mut self) {
        if let Some(mut compositor) = self.compositor.take() {
            compositor.release();
        }
        if let Some(frame_buffer) = self.frame_buffer.take() {
            frame_buffer.release();
        }
        let mut state = self.shared.state.lock();
        state.frame_buffer = None;
        state.phase = HolderPhase::Destroyed;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::NativeModule;
    use crate::control;
    use crate::cpu::CpuBackend;
    use crate::watermark::WatermarkAsset;

    fn resources(backend: Arc<CpuBackend>) -> GpuResources {
        GpuResources {
            backend,
            module: Arc::new(NativeModule::builtin("test")),
            watermark: WatermarkAsset::solid(4, 4, [255, 255, 255, 128]).unwrap(),
        }
    }

    fn wait_for(rx: &control::ControlReceiver, want: SurfaceLifecycleEvent) -> bool {
        let deadline = std::time::Instant::now() + Duration::from_secs(5);
        while std::time::Instant::now() < deadline {
            if let Some(ControlMessage::Surface { event, .. }) =
                rx.next_timeout(Duration::from_millis(20))
            {
                if event == want {
                    return true;
                }
            }
        }
        false
    }

    #[test]
    fn test_surface_available_after_created() {
        let backend = Arc::new(CpuBackend::new(64, 48));
        let (tx, rx) = control::channel();
        let mut holder =
            RenderSurfaceHolder::new(&resources(backend), tx, Duration::from_secs(2)).unwrap();
        assert!(wait_for(&rx, SurfaceLifecycleEvent::Created));
        assert!(holder.surface().is_some());
        holder.destroy();
        assert_eq!(holder.phase(), HolderPhase::Destroyed);
        assert!(holder.surface().is_none());
    }

    #[test]
    fn test_destroy_twice_is_noop() {
        let backend = Arc::new(CpuBackend::new(32, 32));
        let (tx, rx) = control::channel();
        let mut holder =
            RenderSurfaceHolder::new(&resources(Arc::clone(&backend)), tx, Duration::from_secs(2))
                .unwrap();
        assert!(wait_for(&rx, SurfaceLifecycleEvent::Created));
        holder.destroy();
        holder.destroy();
        assert!(holder.is_destroyed());
        assert_eq!(backend.live_compositors(), 0);
    }

    #[test]
    fn test_ticks_redraw_without_new_frames() {
        let backend = Arc::new(
            CpuBackend::new(16, 16).with_vsync_interval(Duration::from_millis(1)),
        );
        let (tx, rx) = control::channel();
        let mut holder =
            RenderSurfaceHolder::new(&resources(Arc::clone(&backend)), tx, Duration::from_secs(2))
                .unwrap();
        assert!(wait_for(&rx, SurfaceLifecycleEvent::Created));

        let deadline = std::time::Instant::now() + Duration::from_secs(5);
        while holder.frames_rendered() < 5 && std::time::Instant::now() < deadline {
            std::thread::sleep(Duration::from_millis(2));
        }
        assert!(holder.frames_rendered() >= 5);
        let frame_buffer = holder.shared.state.lock().frame_buffer.clone().unwrap();
        assert!(!frame_buffer.has_new_frame());
        assert_eq!(frame_buffer.last_matrix(), TransformMatrix::FLIP_VERTICAL);
        assert_eq!(backend.presented().unwrap().source_sequence, 0);
        holder.destroy();
    }

    #[test]
    fn test_module_failure_prevents_holder() {
        let backend = Arc::new(CpuBackend::new(32, 32));
        let res = GpuResources {
            module: Arc::new(NativeModule::new("broken", || {
                Err(WatermarkError::ModuleLoad("not found".into()))
            })),
            ..resources(backend)
        };
        let (tx, _rx) = control::channel();
        let err = RenderSurfaceHolder::new(&res, tx, Duration::from_secs(1)).unwrap_err();
        assert!(matches!(err, WatermarkError::ModuleLoad(_)));
    }
}
