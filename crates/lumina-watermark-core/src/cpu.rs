//! Software reference backend.
//!
//! Implements every platform contract on the CPU: a vsync-driven view thread,
//! an external texture whose drawable surface accepts RGBA frames, and a
//! compositor that blends the watermark the same way the GLES fragment program
//! does:
//!
//! ```text
//! out.rgb = (1 - wm.a) * video.rgb + wm.a * wm.rgb
//! out.a   = video.a
//! ```
//!
//! Both the video frame and the watermark are sampled at the transformed
//! texture coordinate, nearest-neighbour, clamped to the edge.

use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

use parking_lot::Mutex;

use crate::backend::{GpuBackend, RenderView, WindowEvent, WindowEventSender};
use crate::compositor::{NativeCompositor, TextureId};
use crate::error::WatermarkError;
use crate::frame_buffer::{ExternalTexture, FrameListener};
use crate::matrix::TransformMatrix;
use crate::provider::RawSurfaceProvider;
use crate::surface::{DrawableKind, PixelFormat, Surface};
use crate::watermark::WatermarkAsset;

/// Sampled where no frame has been imported yet.
const BLACK: [u8; 4] = [0, 0, 0, 255];

/// One RGBA8 frame written by a producer.
#[derive(Clone, PartialEq, Eq)]
pub struct RgbaFrame {
    width: u32,
    height: u32,
    pixels: Arc<[u8]>,
}

impl fmt::Debug for RgbaFrame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RgbaFrame")
            .field("width", &self.width)
            .field("height", &self.height)
            .finish_non_exhaustive()
    }
}

impl RgbaFrame {
    /// Wraps tightly packed RGBA8 rows, top row first.
    pub fn new(width: u32, height: u32, pixels: Vec<u8>) -> Result<Self, WatermarkError> {
        let expected = width as usize * height as usize * 4;
        if width == 0 || height == 0 || pixels.len() != expected {
            return Err(WatermarkError::Generic(format!(
                "frame {}x{} needs {} bytes, got {}",
                width,
                height,
                expected,
                pixels.len()
            )));
        }
        Ok(Self {
            width,
            height,
            pixels: pixels.into(),
        })
    }

    /// Frame filled with one color.
    pub fn solid(width: u32, height: u32, rgba: [u8; 4]) -> Result<Self, WatermarkError> {
        let pixels = rgba
            .iter()
            .copied()
            .cycle()
            .take(width as usize * height as usize * 4)
            .collect();
        Self::new(width, height, pixels)
    }

    /// Width in pixels.
    pub fn width(&self) -> u32 {
        self.width
    }

    /// Height in pixels.
    pub fn height(&self) -> u32 {
        self.height
    }

    /// Pixel at `(x, y)`.
    pub fn pixel(&self, x: u32, y: u32) -> Option<[u8; 4]> {
        pixel_at(&self.pixels, self.width, self.height, x, y)
    }
}

/// Last image presented to the display.
#[derive(Clone, PartialEq)]
pub struct OutputFrame {
    /// Width in pixels
    pub width: u32,
    /// Height in pixels
    pub height: u32,
    /// RGBA8 rows, top row first
    pub pixels: Vec<u8>,
    /// Sample transform used for this frame
    pub matrix: TransformMatrix,
    /// Producer sequence number of the sampled frame (0 if none)
    pub source_sequence: u64,
    /// True if the watermark was blended in
    pub watermarked: bool,
}

impl fmt::Debug for OutputFrame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OutputFrame")
            .field("width", &self.width)
            .field("height", &self.height)
            .field("source_sequence", &self.source_sequence)
            .field("watermarked", &self.watermarked)
            .finish_non_exhaustive()
    }
}

impl OutputFrame {
    /// Pixel at `(x, y)`.
    pub fn pixel(&self, x: u32, y: u32) -> Option<[u8; 4]> {
        pixel_at(&self.pixels, self.width, self.height, x, y)
    }
}

fn pixel_at(pixels: &[u8], width: u32, height: u32, x: u32, y: u32) -> Option<[u8; 4]> {
    if x >= width || y >= height {
        return None;
    }
    let i = (y as usize * width as usize + x as usize) * 4;
    Some([pixels[i], pixels[i + 1], pixels[i + 2], pixels[i + 3]])
}

/// Nearest sample at texture coordinate `(s, t)`, clamped to the edge.
fn sample(pixels: &[u8], width: u32, height: u32, s: f32, t: f32) -> [u8; 4] {
    let x = ((s.clamp(0.0, 1.0) * width as f32) as u32).min(width - 1);
    let y = ((t.clamp(0.0, 1.0) * height as f32) as u32).min(height - 1);
    pixel_at(pixels, width, height, x, y).unwrap_or(BLACK)
}

fn blend(video: [u8; 4], watermark: [u8; 4]) -> [u8; 4] {
    let a = u32::from(watermark[3]);
    let mix = |v: u8, w: u8| ((u32::from(v) * (255 - a) + u32::from(w) * a + 127) / 255) as u8;
    [
        mix(video[0], watermark[0]),
        mix(video[1], watermark[1]),
        mix(video[2], watermark[2]),
        video[3],
    ]
}

#[derive(Clone)]
struct ImportedFrame {
    frame: RgbaFrame,
    matrix: TransformMatrix,
    sequence: u64,
}

/// Texture memory shared by one compositor and its external texture.
#[derive(Default)]
struct TextureStorage {
    imported: Mutex<Option<ImportedFrame>>,
}

#[derive(Default)]
struct WriterState {
    latest: Option<ImportedFrame>,
    next_sequence: u64,
    listener: Option<FrameListener>,
    released: bool,
}

/// Counters of live and created CPU objects.
#[derive(Debug, Default)]
struct CpuStats {
    compositors_created: AtomicUsize,
    live_compositors: AtomicUsize,
    textures_created: AtomicUsize,
    live_textures: AtomicUsize,
    frames_presented: AtomicU64,
}

struct CpuShared {
    display: (u32, u32),
    next_texture: AtomicU32,
    textures: Mutex<HashMap<TextureId, Arc<TextureStorage>>>,
    presented: Mutex<Option<OutputFrame>>,
    raw_sequence: AtomicU64,
    stats: CpuStats,
}

impl CpuShared {
    fn present(&self, frame: OutputFrame) {
        *self.presented.lock() = Some(frame);
        self.stats.frames_presented.fetch_add(1, Ordering::Relaxed);
    }
}

enum WriterTarget {
    Texture(Arc<Mutex<WriterState>>),
    Window(Arc<CpuShared>),
}

/// Producer handle behind a CPU [`Surface`]; retrieve it with
/// `surface.handle::<FrameWriter>()`.
pub struct FrameWriter {
    target: WriterTarget,
}

impl fmt::Debug for FrameWriter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let target = match self.target {
            WriterTarget::Texture(_) => "texture",
            WriterTarget::Window(_) => "window",
        };
        f.debug_struct("FrameWriter").field("target", &target).finish()
    }
}

impl FrameWriter {
    /// Queues a frame with the default (vertical flip) sample transform.
    pub fn write(&self, frame: RgbaFrame) -> Result<u64, WatermarkError> {
        self.write_with_transform(frame, TransformMatrix::FLIP_VERTICAL)
    }

    /// Queues a frame and returns its sequence number.
    ///
    /// Texture surfaces keep only the newest frame and notify the frame
    /// listener after the lock is dropped. Window surfaces present directly.
    pub fn write_with_transform(
        &self,
        frame: RgbaFrame,
        transform: TransformMatrix,
    ) -> Result<u64, WatermarkError> {
        match &self.target {
            WriterTarget::Texture(state) => {
                let (sequence, listener) = {
                    let mut state = state.lock();
                    if state.released {
                        return Err(WatermarkError::TextureReleased);
                    }
                    state.next_sequence += 1;
                    let sequence = state.next_sequence;
                    state.latest = Some(ImportedFrame {
                        frame,
                        matrix: transform,
                        sequence,
                    });
                    (sequence, state.listener.clone())
                };
                if let Some(listener) = listener {
                    listener();
                }
                Ok(sequence)
            }
            WriterTarget::Window(shared) => {
                let sequence = shared.raw_sequence.fetch_add(1, Ordering::Relaxed) + 1;
                shared.present(OutputFrame {
                    width: frame.width,
                    height: frame.height,
                    pixels: frame.pixels.to_vec(),
                    matrix: TransformMatrix::IDENTITY,
                    source_sequence: sequence,
                    watermarked: false,
                });
                Ok(sequence)
            }
        }
    }
}

/// CPU external texture bound to one compositor's storage.
pub struct CpuExternalTexture {
    id: TextureId,
    storage: Arc<TextureStorage>,
    writer: Arc<Mutex<WriterState>>,
    shared: Arc<CpuShared>,
    released: bool,
}

impl ExternalTexture for CpuExternalTexture {
    fn set_frame_listener(&mut self, listener: FrameListener) {
        self.writer.lock().listener = Some(listener);
    }

    fn update_tex_image(&mut self) -> Result<TransformMatrix, WatermarkError> {
        if self.released {
            return Err(WatermarkError::TextureReleased);
        }
        let latest = self.writer.lock().latest.take();
        let mut imported = self.storage.imported.lock();
        if let Some(frame) = latest {
            *imported = Some(frame);
        }
        Ok(imported
            .as_ref()
            .map_or(TransformMatrix::FLIP_VERTICAL, |f| f.matrix))
    }

    fn create_surface(&mut self) -> Result<Surface, WatermarkError> {
        if self.released {
            return Err(WatermarkError::TextureReleased);
        }
        let writer = FrameWriter {
            target: WriterTarget::Texture(Arc::clone(&self.writer)),
        };
        Ok(Surface::new(DrawableKind::Gpu, Arc::new(writer)))
    }

    fn release(&mut self) {
        if self.released {
            return;
        }
        self.released = true;
        let mut writer = self.writer.lock();
        writer.released = true;
        writer.listener = None;
        writer.latest = None;
        self.shared.stats.live_textures.fetch_sub(1, Ordering::Relaxed);
        tracing::trace!("CpuExternalTexture: released {:?}", self.id);
    }
}

/// CPU compositor writing the blended frame to the backend's display.
pub struct SoftwareCompositor {
    shared: Arc<CpuShared>,
    texture: Option<(TextureId, Arc<TextureStorage>)>,
    watermark: Option<WatermarkAsset>,
    max_size: (u32, u32),
}

impl NativeCompositor for SoftwareCompositor {
    fn init(
        &mut self,
        watermark: &WatermarkAsset,
        max_width: u32,
        max_height: u32,
    ) -> Result<(), WatermarkError> {
        if self.texture.is_some() {
            return Err(WatermarkError::CompositorInit("already initialized".into()));
        }
        if max_width == 0 || max_height == 0 {
            return Err(WatermarkError::CompositorInit(format!(
                "invalid output bounds {max_width}x{max_height}"
            )));
        }
        let id = TextureId(self.shared.next_texture.fetch_add(1, Ordering::Relaxed));
        let storage = Arc::new(TextureStorage::default());
        self.shared.textures.lock().insert(id, Arc::clone(&storage));
        self.texture = Some((id, storage));
        self.watermark = Some(watermark.clone());
        self.max_size = (max_width, max_height);
        self.shared.stats.compositors_created.fetch_add(1, Ordering::Relaxed);
        self.shared.stats.live_compositors.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }

    fn texture_id(&self) -> TextureId {
        self.texture.as_ref().map_or(TextureId(0), |(id, _)| *id)
    }

    fn draw_frame(
        &mut self,
        matrix: &TransformMatrix,
        width: u32,
        height: u32,
    ) -> Result<(), WatermarkError> {
        let (Some((_, storage)), Some(watermark)) = (&self.texture, &self.watermark) else {
            return Err(WatermarkError::GpuResource("compositor not initialized".into()));
        };
        let width = width.min(self.max_size.0);
        let height = height.min(self.max_size.1);
        if width == 0 || height == 0 {
            return Ok(());
        }

        let imported = storage.imported.lock().clone();
        let mut pixels = Vec::with_capacity(width as usize * height as usize * 4);
        for y in 0..height {
            let v = 1.0 - (y as f32 + 0.5) / height as f32;
            for x in 0..width {
                let u = (x as f32 + 0.5) / width as f32;
                let (s, t) = matrix.transform_uv(u, v);
                let video = match &imported {
                    Some(f) => sample(&f.frame.pixels, f.frame.width, f.frame.height, s, t),
                    None => BLACK,
                };
                let wm = sample(watermark.pixels(), watermark.width(), watermark.height(), s, t);
                pixels.extend_from_slice(&blend(video, wm));
            }
        }

        self.shared.present(OutputFrame {
            width,
            height,
            pixels,
            matrix: *matrix,
            source_sequence: imported.map_or(0, |f| f.sequence),
            watermarked: true,
        });
        Ok(())
    }

    fn release(&mut self) {
        if let Some((id, _)) = self.texture.take() {
            self.shared.textures.lock().remove(&id);
            self.shared.stats.live_compositors.fetch_sub(1, Ordering::Relaxed);
        }
        self.watermark = None;
    }
}

/// View thread: `Ready`, one `Resized`, then a `Vsync` every interval.
struct CpuView {
    stop: Arc<AtomicBool>,
    thread: Option<JoinHandle<()>>,
}

impl RenderView for CpuView {
    fn detach(&mut self) {
        self.stop.store(true, Ordering::Release);
        if let Some(thread) = self.thread.take() {
            if let Err(e) = thread.join() {
                tracing::warn!("CpuView: vsync thread panicked: {:?}", e);
            }
        }
    }
}

impl Drop for CpuView {
    fn drop(&mut self) {
        self.detach();
    }
}

/// CPU implementation of [`GpuBackend`] and [`RawSurfaceProvider`].
pub struct CpuBackend {
    shared: Arc<CpuShared>,
    vsync_interval: Duration,
    window_format: PixelFormat,
}

impl fmt::Debug for CpuBackend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CpuBackend")
            .field("display", &self.shared.display)
            .field("vsync_interval", &self.vsync_interval)
            .field("window_format", &self.window_format)
            .finish_non_exhaustive()
    }
}

impl CpuBackend {
    /// Backend for a `width`×`height` display refreshing at 60 Hz.
    pub fn new(width: u32, height: u32) -> Self {
        Self {
            shared: Arc::new(CpuShared {
                display: (width, height),
                next_texture: AtomicU32::new(1),
                textures: Mutex::new(HashMap::new()),
                presented: Mutex::new(None),
                raw_sequence: AtomicU64::new(0),
                stats: CpuStats::default(),
            }),
            vsync_interval: Duration::from_millis(16),
            window_format: PixelFormat::Rgb565,
        }
    }

    /// Sets the vsync period.
    pub fn with_vsync_interval(mut self, interval: Duration) -> Self {
        self.vsync_interval = interval;
        self
    }

    /// Sets the pixel format reported with window size changes.
    pub fn with_window_format(mut self, format: PixelFormat) -> Self {
        self.window_format = format;
        self
    }

    /// Last presented image.
    pub fn presented(&self) -> Option<OutputFrame> {
        self.shared.presented.lock().clone()
    }

    /// Number of presents (composited or raw).
    pub fn frames_presented(&self) -> u64 {
        self.shared.stats.frames_presented.load(Ordering::Relaxed)
    }

    /// Compositors initialized and not yet released.
    pub fn live_compositors(&self) -> usize {
        self.shared.stats.live_compositors.load(Ordering::Relaxed)
    }

    /// Compositors initialized over the backend's lifetime.
    pub fn compositors_created(&self) -> usize {
        self.shared.stats.compositors_created.load(Ordering::Relaxed)
    }

    /// External textures created and not yet released.
    pub fn live_textures(&self) -> usize {
        self.shared.stats.live_textures.load(Ordering::Relaxed)
    }

    /// External textures created over the backend's lifetime.
    pub fn textures_created(&self) -> usize {
        self.shared.stats.textures_created.load(Ordering::Relaxed)
    }
}

impl GpuBackend for CpuBackend {
    fn display_size(&self) -> (u32, u32) {
        self.shared.display
    }

    fn create_view(&self, events: WindowEventSender) -> Result<Box<dyn RenderView>, WatermarkError> {
        let stop = Arc::new(AtomicBool::new(false));
        let stop_flag = Arc::clone(&stop);
        let (width, height) = self.shared.display;
        let format = self.window_format;
        let interval = self.vsync_interval;

        let thread = std::thread::Builder::new()
            .name("lumina-watermark-vsync".into())
            .spawn(move || {
                if !events.send(WindowEvent::Ready)
                    || !events.send(WindowEvent::Resized {
                        width,
                        height,
                        format,
                    })
                {
                    return;
                }
                while !stop_flag.load(Ordering::Acquire) {
                    std::thread::sleep(interval);
                    if !events.send(WindowEvent::Vsync) {
                        break;
                    }
                }
            })
            .map_err(|e| WatermarkError::Generic(format!("Failed to spawn vsync thread: {e}")))?;

        Ok(Box::new(CpuView {
            stop,
            thread: Some(thread),
        }))
    }

    fn create_compositor(&self) -> Result<Box<dyn NativeCompositor>, WatermarkError> {
        Ok(Box::new(SoftwareCompositor {
            shared: Arc::clone(&self.shared),
            texture: None,
            watermark: None,
            max_size: (0, 0),
        }))
    }

    fn create_external_texture(
        &self,
        texture_id: TextureId,
    ) -> Result<Box<dyn ExternalTexture>, WatermarkError> {
        let storage = self
            .shared
            .textures
            .lock()
            .get(&texture_id)
            .cloned()
            .ok_or_else(|| {
                WatermarkError::GpuResource(format!("no compositor owns texture {texture_id:?}"))
            })?;
        self.shared.stats.textures_created.fetch_add(1, Ordering::Relaxed);
        self.shared.stats.live_textures.fetch_add(1, Ordering::Relaxed);
        Ok(Box::new(CpuExternalTexture {
            id: texture_id,
            storage,
            writer: Arc::new(Mutex::new(WriterState::default())),
            shared: Arc::clone(&self.shared),
            released: false,
        }))
    }
}

impl RawSurfaceProvider for CpuBackend {
    fn raw_surface(&self) -> Result<Surface, WatermarkError> {
        let writer = FrameWriter {
            target: WriterTarget::Window(Arc::clone(&self.shared)),
        };
        Ok(Surface::new(DrawableKind::Raw, Arc::new(writer)))
    }
}
