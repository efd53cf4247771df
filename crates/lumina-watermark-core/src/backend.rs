//! Platform GPU/windowing collaborator.
//!
//! A [`GpuBackend`] creates the three platform objects the render thread
//! needs: the windowing view that drives it, the native compositor, and the
//! external texture the decoder writes into.
//!
//! ```text
//! platform view ──WindowEvent──► render thread ──ControlMessage──► control thread
//!        (any thread)              (owns compositor)                (owns controller)
//! ```

use std::fmt;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, OnceLock};

use crossbeam_channel::Sender;

use crate::compositor::{NativeCompositor, TextureId};
use crate::error::WatermarkError;
use crate::frame_buffer::ExternalTexture;
use crate::surface::PixelFormat;
use crate::watermark::WatermarkAsset;

/// Callback from the platform's rendering view.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WindowEvent {
    /// Render context became current and usable
    Ready,
    /// Output surface size changed
    Resized {
        /// Width in pixels
        width: u32,
        /// Height in pixels
        height: u32,
        /// Pixel format of the output
        format: PixelFormat,
    },
    /// Continuous draw callback (one per display refresh)
    Vsync,
    /// Render context was lost; GPU objects created in it are gone
    Lost,
}

/// Handle the platform view uses to drive the render thread.
///
/// Sends never block. Once the render thread has exited every send returns
/// false and the view should stop producing events.
#[derive(Debug, Clone)]
pub struct WindowEventSender {
    tx: Sender<WindowEvent>,
}

impl WindowEventSender {
    pub(crate) fn new(tx: Sender<WindowEvent>) -> Self {
        Self { tx }
    }

    /// Delivers `event` to the render thread. Returns false if it is gone.
    pub fn send(&self, event: WindowEvent) -> bool {
        self.tx.send(event).is_ok()
    }
}

/// Opaque platform view created for one surface holder.
///
/// Dropping or detaching it stops event delivery.
pub trait RenderView: Send {
    /// Detaches the view from the window. Called once, after GPU release.
    fn detach(&mut self) {}
}

/// Platform provider of GPU objects.
pub trait GpuBackend: Send + Sync {
    /// Display size in pixels; the compositor's maximum output size.
    fn display_size(&self) -> (u32, u32);

    /// Creates the rendering view that will drive `events`.
    fn create_view(&self, events: WindowEventSender)
        -> Result<Box<dyn RenderView>, WatermarkError>;

    /// Creates an uninitialized compositor. Called on the render thread.
    fn create_compositor(&self) -> Result<Box<dyn NativeCompositor>, WatermarkError>;

    /// Creates the external texture bound to `texture_id`. Called on the
    /// render thread, after the compositor exists.
    fn create_external_texture(
        &self,
        texture_id: TextureId,
    ) -> Result<Box<dyn ExternalTexture>, WatermarkError>;
}

type Loader = Box<dyn Fn() -> Result<(), WatermarkError> + Send + Sync>;

/// One-time native library initialization.
///
/// The first surface holder triggers the load; every later holder reuses the
/// cached outcome, including a cached failure.
pub struct NativeModule {
    name: &'static str,
    loader: Loader,
    outcome: OnceLock<Result<(), WatermarkError>>,
    load_calls: AtomicUsize,
}

impl fmt::Debug for NativeModule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NativeModule")
            .field("name", &self.name)
            .field("outcome", &self.outcome.get())
            .finish_non_exhaustive()
    }
}

impl NativeModule {
    /// Creates a module loaded lazily by `loader`.
    pub fn new<F>(name: &'static str, loader: F) -> Self
    where
        F: Fn() -> Result<(), WatermarkError> + Send + Sync + 'static,
    {
        Self {
            name,
            loader: Box::new(loader),
            outcome: OnceLock::new(),
            load_calls: AtomicUsize::new(0),
        }
    }

    /// Module with nothing to load (statically linked compositor).
    pub fn builtin(name: &'static str) -> Self {
        Self::new(name, || Ok(()))
    }

    /// Loads the module on first call; returns the cached outcome afterwards.
    pub fn ensure_loaded(&self) -> Result<(), WatermarkError> {
        self.outcome
            .get_or_init(|| {
                self.load_calls.fetch_add(1, Ordering::Relaxed);
                let result = (self.loader)();
                match &result {
                    Ok(()) => tracing::info!("NativeModule: loaded {}", self.name),
                    Err(e) => tracing::warn!("NativeModule: failed to load {}: {}", self.name, e),
                }
                result
            })
            .clone()
    }

    /// Returns true if a load has succeeded.
    pub fn is_loaded(&self) -> bool {
        matches!(self.outcome.get(), Some(Ok(())))
    }

    /// Number of times the loader actually ran (0 or 1).
    pub fn load_calls(&self) -> usize {
        self.load_calls.load(Ordering::Relaxed)
    }
}

/// Everything a surface holder needs to build its GPU pipeline.
#[derive(Clone)]
pub struct GpuResources {
    /// Platform GPU provider
    pub backend: Arc<dyn GpuBackend>,
    /// Native library guard
    pub module: Arc<NativeModule>,
    /// Decoded watermark
    pub watermark: WatermarkAsset,
}

impl fmt::Debug for GpuResources {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("GpuResources")
            .field("module", &self.module)
            .field("watermark", &self.watermark)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_module_loads_once() {
        let module = NativeModule::builtin("MediaWatermark");
        assert!(!module.is_loaded());
        assert!(module.ensure_loaded().is_ok());
        assert!(module.ensure_loaded().is_ok());
        assert!(module.is_loaded());
        assert_eq!(module.load_calls(), 1);
    }

    #[test]
    fn test_module_failure_is_cached() {
        let module = NativeModule::new("missing", || {
            Err(WatermarkError::ModuleLoad("libmissing.so not found".into()))
        });
        assert!(module.ensure_loaded().is_err());
        assert!(matches!(
            module.ensure_loaded(),
            Err(WatermarkError::ModuleLoad(_))
        ));
        assert_eq!(module.load_calls(), 1);
        assert!(!module.is_loaded());
    }
}
