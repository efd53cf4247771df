//! Drawable surfaces and their lifecycle events.

use std::any::Any;
use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

/// Unique id of a [`Surface`] within the process.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SurfaceId(u64);

impl SurfaceId {
    fn next() -> Self {
        static NEXT_SURFACE_ID: AtomicU64 = AtomicU64::new(1);
        Self(NEXT_SURFACE_ID.fetch_add(1, Ordering::Relaxed))
    }

    /// Raw id value.
    pub fn get(self) -> u64 {
        self.0
    }
}

/// Which drawable provider produced a surface.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DrawableKind {
    /// Backed by an external GPU texture; frames get composited with the watermark
    Gpu,
    /// Raw platform window surface; frames are shown without the watermark
    Raw,
}

/// Pixel format reported by the window with a size change.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PixelFormat {
    /// 16-bit RGB, the default of GL-backed platform views
    Rgb565,
    /// 32-bit RGBA
    Rgba8888,
    /// Any other platform format code
    Other(i32),
}

/// Surface lifecycle transition delivered to the control thread.
///
/// Per holder lifetime the listener observes exactly one `Created`, zero or
/// more `Changed`, and exactly one `Destroyed`, in that order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SurfaceLifecycleEvent {
    /// Render context and drawable surface are ready
    Created,
    /// Output size changed
    Changed {
        /// Width in pixels
        width: u32,
        /// Height in pixels
        height: u32,
        /// Pixel format of the output
        format: PixelFormat,
    },
    /// GPU resources have been released
    Destroyed,
}

/// Producer-facing drawable handle a decoder writes frames into.
///
/// The platform object behind it is hidden as `Arc<dyn Any + Send + Sync>`;
/// clones share validity, so releasing the owner invalidates every copy.
#[derive(Clone)]
pub struct Surface {
    id: SurfaceId,
    kind: DrawableKind,
    valid: Arc<AtomicBool>,
    handle: Arc<dyn Any + Send + Sync>,
}

impl fmt::Debug for Surface {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Surface")
            .field("id", &self.id)
            .field("kind", &self.kind)
            .field("valid", &self.is_valid())
            .finish_non_exhaustive()
    }
}

impl PartialEq for Surface {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl Eq for Surface {}

impl Surface {
    /// Wraps a platform surface object.
    pub fn new(kind: DrawableKind, handle: Arc<dyn Any + Send + Sync>) -> Self {
        Self {
            id: SurfaceId::next(),
            kind,
            valid: Arc::new(AtomicBool::new(true)),
            handle,
        }
    }

    /// Unique id.
    pub fn id(&self) -> SurfaceId {
        self.id
    }

    /// Provider variant that produced this surface.
    pub fn kind(&self) -> DrawableKind {
        self.kind
    }

    /// Returns false once the owner has released the surface.
    pub fn is_valid(&self) -> bool {
        self.valid.load(Ordering::Acquire)
    }

    /// Marks the surface released. Returns true on the first call only.
    pub fn release(&self) -> bool {
        self.valid.swap(false, Ordering::AcqRel)
    }

    /// Downcasts the platform handle.
    pub fn handle<T: Any + Send + Sync>(&self) -> Option<&T> {
        self.handle.downcast_ref::<T>()
    }
}
