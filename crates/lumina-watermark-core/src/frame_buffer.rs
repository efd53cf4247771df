//! External texture slot shared by the decoder and the render thread.
//!
//! [`TextureFrameBuffer`] is the only object touched from both the render
//! thread (`consume_latest`) and the decoder's own threads
//! (`on_frame_arrived`). Every operation takes the same slot lock, so a frame
//! import and the arrival flag update never interleave partially.

use std::fmt;
use std::sync::{Arc, Weak};

use parking_lot::Mutex;

use crate::compositor::TextureId;
use crate::error::WatermarkError;
use crate::matrix::TransformMatrix;
use crate::surface::Surface;

/// Frame-available callback. Invocable from any thread.
pub type FrameListener = Arc<dyn Fn() + Send + Sync>;

/// Platform external texture (a `SurfaceTexture` on Android).
///
/// The frame listener must be invoked from the producer side only, never from
/// inside `update_tex_image` or `release`.
pub trait ExternalTexture: Send {
    /// Registers the frame-available callback.
    fn set_frame_listener(&mut self, listener: FrameListener);

    /// Imports the most recent producer frame into the texture and returns
    /// its sample transform.
    fn update_tex_image(&mut self) -> Result<TransformMatrix, WatermarkError>;

    /// Creates the producer-facing drawable surface.
    fn create_surface(&mut self) -> Result<Surface, WatermarkError>;

    /// Releases the texture. Called once, after the surface was released.
    fn release(&mut self);
}

struct FrameSlot {
    texture: Option<Box<dyn ExternalTexture>>,
    surface: Option<Surface>,
    frame_available: bool,
    matrix: TransformMatrix,
    frames_arrived: u64,
    frames_imported: u64,
    released: bool,
}

/// Counters for diagnostics.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FrameBufferStats {
    /// Frame-available notifications received
    pub frames_arrived: u64,
    /// Texture imports performed
    pub frames_imported: u64,
}

/// Owns one external texture and its drawable surface.
pub struct TextureFrameBuffer {
    texture_id: TextureId,
    slot: Arc<Mutex<FrameSlot>>,
}

impl fmt::Debug for TextureFrameBuffer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let slot = self.slot.lock();
        f.debug_struct("TextureFrameBuffer")
            .field("texture_id", &self.texture_id)
            .field("released", &slot.released)
            .field("frames_arrived", &slot.frames_arrived)
            .field("frames_imported", &slot.frames_imported)
            .finish()
    }
}

impl TextureFrameBuffer {
    /// Takes ownership of `texture` and subscribes to its frame notifications.
    pub fn new(texture_id: TextureId, mut texture: Box<dyn ExternalTexture>) -> Self {
        let slot = Arc::new(Mutex::new(FrameSlot {
            texture: None,
            surface: None,
            frame_available: false,
            matrix: TransformMatrix::FLIP_VERTICAL,
            frames_arrived: 0,
            frames_imported: 0,
            released: false,
        }));

        // Weak so a producer holding the listener does not keep the slot alive.
        let weak: Weak<Mutex<FrameSlot>> = Arc::downgrade(&slot);
        texture.set_frame_listener(Arc::new(move || {
            if let Some(slot) = weak.upgrade() {
                Self::mark_arrived(&slot);
            }
        }));
        slot.lock().texture = Some(texture);

        Self { texture_id, slot }
    }

    fn mark_arrived(slot: &Mutex<FrameSlot>) {
        let mut slot = slot.lock();
        if slot.released {
            return;
        }
        slot.frame_available = true;
        slot.frames_arrived += 1;
    }

    /// Texture id this buffer is bound to.
    pub fn texture_id(&self) -> TextureId {
        self.texture_id
    }

    /// Frame-available notification. Safe from any thread; holds the slot lock
    /// only for the flag update.
    pub fn on_frame_arrived(&self) {
        Self::mark_arrived(&self.slot);
    }

    /// Imports the latest frame and writes its transform into `out`.
    ///
    /// Every call re-imports, whether or not a new frame arrived, so bursty
    /// delivery can never leave a stale frame on screen. Returns `Ok(false)`
    /// only after [`release`](Self::release).
    pub fn consume_latest(&self, out: &mut TransformMatrix) -> Result<bool, WatermarkError> {
        let mut slot = self.slot.lock();
        let Some(texture) = slot.texture.as_mut() else {
            return Ok(false);
        };
        let matrix = texture.update_tex_image()?;
        slot.matrix = matrix;
        slot.frame_available = false;
        slot.frames_imported += 1;
        *out = matrix;
        Ok(true)
    }

    /// Returns true if a frame arrived since the last import.
    pub fn has_new_frame(&self) -> bool {
        self.slot.lock().frame_available
    }

    /// Transform of the last imported frame.
    pub fn last_matrix(&self) -> TransformMatrix {
        self.slot.lock().matrix
    }

    /// Returns the producer-facing surface, creating it on first call.
    pub fn drawable_surface(&self) -> Result<Surface, WatermarkError> {
        let mut slot = self.slot.lock();
        if let Some(surface) = &slot.surface {
            return Ok(surface.clone());
        }
        let texture = slot
            .texture
            .as_mut()
            .ok_or(WatermarkError::TextureReleased)?;
        let surface = texture.create_surface()?;
        tracing::debug!(
            "TextureFrameBuffer: created drawable surface {:?} for texture {:?}",
            surface.id(),
            self.texture_id
        );
        slot.surface = Some(surface.clone());
        Ok(surface)
    }

    /// Releases the drawable surface, then the texture. Idempotent.
    pub fn release(&self) {
        let mut slot = self.slot.lock();
        if slot.released {
            return;
        }
        slot.released = true;
        if let Some(surface) = slot.surface.take() {
            surface.release();
        }
        if let Some(mut texture) = slot.texture.take() {
            texture.release();
        }
        slot.frame_available = false;
        tracing::debug!(
            "TextureFrameBuffer: released texture {:?} ({} arrived, {} imported)",
            self.texture_id,
            slot.frames_arrived,
            slot.frames_imported
        );
    }

    /// Returns true once released.
    pub fn is_released(&self) -> bool {
        self.slot.lock().released
    }

    /// Arrival and import counters.
    pub fn stats(&self) -> FrameBufferStats {
        let slot = self.slot.lock();
        FrameBufferStats {
            frames_arrived: slot.frames_arrived,
            frames_imported: slot.frames_imported,
        }
    }
}

impl Drop for TextureFrameBuffer {
    fn drop(&mut self) {
        self.release();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::surface::DrawableKind;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[derive(Default)]
    struct Counters {
        imports: AtomicU32,
        surfaces: AtomicU32,
        releases: AtomicU32,
    }

    struct MockTexture {
        counters: Arc<Counters>,
        listener_out: Arc<Mutex<Option<FrameListener>>>,
    }

    impl ExternalTexture for MockTexture {
        fn set_frame_listener(&mut self, listener: FrameListener) {
            *self.listener_out.lock() = Some(listener);
        }

        fn update_tex_image(&mut self) -> Result<TransformMatrix, WatermarkError> {
            let n = self.counters.imports.fetch_add(1, Ordering::SeqCst) + 1;
            Ok(TransformMatrix([n as f32; 16]))
        }

        fn create_surface(&mut self) -> Result<Surface, WatermarkError> {
            self.counters.surfaces.fetch_add(1, Ordering::SeqCst);
            Ok(Surface::new(DrawableKind::Gpu, Arc::new(())))
        }

        fn release(&mut self) {
            self.counters.releases.fetch_add(1, Ordering::SeqCst);
        }
    }

    fn buffer() -> (TextureFrameBuffer, Arc<Counters>, Arc<Mutex<Option<FrameListener>>>) {
        let counters = Arc::new(Counters::default());
        let listener_out = Arc::new(Mutex::new(None));
        let texture = MockTexture {
            counters: Arc::clone(&counters),
            listener_out: Arc::clone(&listener_out),
        };
        (
            TextureFrameBuffer::new(TextureId(7), Box::new(texture)),
            counters,
            listener_out,
        )
    }

    #[test]
    fn test_consume_always_imports() {
        let (fb, counters, _) = buffer();
        let mut m = TransformMatrix::IDENTITY;
        assert!(fb.consume_latest(&mut m).unwrap());
        assert!(fb.consume_latest(&mut m).unwrap());
        assert_eq!(counters.imports.load(Ordering::SeqCst), 2);
        assert_eq!(m, TransformMatrix([2.0; 16]));
        assert_eq!(fb.last_matrix(), m);
    }

    #[test]
    fn test_listener_marks_arrival() {
        let (fb, _, listener) = buffer();
        assert!(!fb.has_new_frame());
        let cb = listener.lock().clone().unwrap();
        cb();
        assert!(fb.has_new_frame());
        let mut m = TransformMatrix::IDENTITY;
        fb.consume_latest(&mut m).unwrap();
        assert!(!fb.has_new_frame());
        assert_eq!(fb.stats().frames_arrived, 1);
        assert_eq!(fb.stats().frames_imported, 1);
    }

    #[test]
    fn test_surface_is_lazy_and_idempotent() {
        let (fb, counters, _) = buffer();
        assert_eq!(counters.surfaces.load(Ordering::SeqCst), 0);
        let a = fb.drawable_surface().unwrap();
        let b = fb.drawable_surface().unwrap();
        assert_eq!(a, b);
        assert_eq!(counters.surfaces.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_release_is_idempotent() {
        let (fb, counters, listener) = buffer();
        let surface = fb.drawable_surface().unwrap();
        fb.release();
        fb.release();
        assert_eq!(counters.releases.load(Ordering::SeqCst), 1);
        assert!(!surface.is_valid());
        assert!(fb.is_released());

        let mut m = TransformMatrix::IDENTITY;
        assert!(!fb.consume_latest(&mut m).unwrap());
        assert_eq!(fb.drawable_surface(), Err(WatermarkError::TextureReleased));

        // Late producer notifications are ignored.
        let cb = listener.lock().clone().unwrap();
        cb();
        assert!(!fb.has_new_frame());
    }

    #[test]
    fn test_listener_does_not_keep_buffer_alive() {
        let (fb, _, listener) = buffer();
        let cb = listener.lock().clone().unwrap();
        drop(fb);
        cb();
    }
}
