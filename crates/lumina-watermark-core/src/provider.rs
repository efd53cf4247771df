//! Drawable provider selected once per session.

use crate::control::HolderId;
use crate::error::WatermarkError;
use crate::holder::RenderSurfaceHolder;
use crate::surface::{DrawableKind, Surface};

/// Platform source of raw window surfaces (the degraded path).
pub trait RawSurfaceProvider: Send + Sync {
    /// Returns the window's own surface. Frames written into it are shown
    /// without compositing.
    fn raw_surface(&self) -> Result<Surface, WatermarkError>;
}

/// Where the decoder's frames go for one session.
#[derive(Debug)]
pub enum DrawableProvider {
    /// GPU-backed holder; frames are composited with the watermark
    Gpu(RenderSurfaceHolder),
    /// Raw window surface; no watermark
    Raw(Surface),
}

impl DrawableProvider {
    /// Provider variant.
    pub fn kind(&self) -> DrawableKind {
        match self {
            DrawableProvider::Gpu(_) => DrawableKind::Gpu,
            DrawableProvider::Raw(_) => DrawableKind::Raw,
        }
    }

    /// Drawable target, if one is available yet.
    pub fn surface(&self) -> Option<Surface> {
        match self {
            DrawableProvider::Gpu(holder) => holder.surface(),
            DrawableProvider::Raw(surface) => Some(surface.clone()),
        }
    }

    /// Id of the GPU holder, if any.
    pub fn holder_id(&self) -> Option<HolderId> {
        match self {
            DrawableProvider::Gpu(holder) => Some(holder.id()),
            DrawableProvider::Raw(_) => None,
        }
    }

    /// Tears the provider down. Blocks until GPU resources are released.
    pub fn destroy(&mut self) {
        match self {
            DrawableProvider::Gpu(holder) => holder.destroy(),
            // The raw surface belongs to the window; only our use of it ends.
            DrawableProvider::Raw(_) => {}
        }
    }
}
