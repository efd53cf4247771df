//! Native compositor contract and its owning handle.
//!
//! The blending program itself is platform code (a GLES shader on Android,
//! [`SoftwareCompositor`](crate::cpu::SoftwareCompositor) on the CPU). The
//! rest of the pipeline only relies on the call contract enforced by
//! [`CompositorHandle`]:
//!
//! ```text
//! create → init (once) → texture_id / draw_frame (render thread) → release (once, last)
//! ```

use std::fmt;

use crate::backend::GpuBackend;
use crate::error::WatermarkError;
use crate::matrix::TransformMatrix;
use crate::watermark::WatermarkAsset;

/// External-texture binding point handed out by the compositor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TextureId(pub u32);

/// GPU program blending the current video texture with the watermark.
///
/// All calls happen on the render thread that created the compositor, so
/// implementations need not be `Send`.
pub trait NativeCompositor {
    /// One-time setup. Called from the render thread's current context.
    fn init(
        &mut self,
        watermark: &WatermarkAsset,
        max_width: u32,
        max_height: u32,
    ) -> Result<(), WatermarkError>;

    /// External texture the video stream binds to. Stable after `init`.
    fn texture_id(&self) -> TextureId;

    /// Blends and presents one frame into the currently bound framebuffer.
    fn draw_frame(
        &mut self,
        matrix: &TransformMatrix,
        width: u32,
        height: u32,
    ) -> Result<(), WatermarkError>;

    /// Frees all native resources. Last call made on the compositor.
    fn release(&mut self);
}

/// Exclusive owner of one initialized [`NativeCompositor`].
///
/// Guarantees `release` runs exactly once, either explicitly or on drop, and
/// that no draw reaches the compositor afterwards.
pub struct CompositorHandle {
    inner: Box<dyn NativeCompositor>,
    texture_id: TextureId,
    released: bool,
    frames_drawn: u64,
}

impl fmt::Debug for CompositorHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CompositorHandle")
            .field("texture_id", &self.texture_id)
            .field("released", &self.released)
            .field("frames_drawn", &self.frames_drawn)
            .finish()
    }
}

impl CompositorHandle {
    /// Creates and initializes a compositor bound to `watermark`.
    ///
    /// On init failure the half-constructed compositor is released before the
    /// error is returned.
    pub fn create(
        backend: &dyn GpuBackend,
        watermark: &WatermarkAsset,
        max_width: u32,
        max_height: u32,
    ) -> Result<Self, WatermarkError> {
        let mut inner = backend.create_compositor()?;
        if let Err(e) = inner.init(watermark, max_width, max_height) {
            tracing::warn!("CompositorHandle: init failed, releasing: {}", e);
            inner.release();
            return Err(e);
        }
        let texture_id = inner.texture_id();
        tracing::info!(
            "CompositorHandle: initialized (texture {:?}, max {}x{}, watermark {}x{})",
            texture_id,
            max_width,
            max_height,
            watermark.width(),
            watermark.height()
        );
        Ok(Self {
            inner,
            texture_id,
            released: false,
            frames_drawn: 0,
        })
    }

    /// External texture id for the video stream.
    pub fn texture_id(&self) -> TextureId {
        self.texture_id
    }

    /// Number of frames drawn so far.
    pub fn frames_drawn(&self) -> u64 {
        self.frames_drawn
    }

    /// Returns true once released.
    pub fn is_released(&self) -> bool {
        self.released
    }

    /// Draws one composited frame.
    pub fn draw_frame(
        &mut self,
        matrix: &TransformMatrix,
        width: u32,
        height: u32,
    ) -> Result<(), WatermarkError> {
        if self.released {
            return Err(WatermarkError::HolderDestroyed);
        }
        self.inner.draw_frame(matrix, width, height)?;
        self.frames_drawn += 1;
        Ok(())
    }

    /// Releases native resources. Idempotent.
    pub fn release(&mut self) {
        if self.released {
            return;
        }
        self.released = true;
        self.inner.release();
        tracing::debug!(
            "CompositorHandle: released texture {:?} after {} frames",
            self.texture_id,
            self.frames_drawn
        );
    }
}

impl Drop for CompositorHandle {
    fn drop(&mut self) {
        self.release();
    }
}
