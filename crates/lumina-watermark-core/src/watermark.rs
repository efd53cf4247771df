//! Immutable decoded watermark image.

use std::fmt;
use std::sync::Arc;

use crate::error::WatermarkError;

/// Decoded RGBA8 watermark, loaded once and shared read-only.
///
/// Cloning is cheap (Arc bump); the pixel data is never mutated after
/// construction.
#[derive(Clone, PartialEq, Eq)]
pub struct WatermarkAsset {
    width: u32,
    height: u32,
    pixels: Arc<[u8]>,
}

impl fmt::Debug for WatermarkAsset {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WatermarkAsset")
            .field("width", &self.width)
            .field("height", &self.height)
            .field("bytes", &self.pixels.len())
            .finish()
    }
}

impl WatermarkAsset {
    /// Wraps tightly packed, non-premultiplied RGBA8 pixels.
    ///
    /// Fails with [`WatermarkError::AssetDecode`] if the buffer size does not
    /// match `width * height * 4` or the image is empty.
    pub fn from_rgba(width: u32, height: u32, pixels: Vec<u8>) -> Result<Self, WatermarkError> {
        if width == 0 || height == 0 {
            return Err(WatermarkError::AssetDecode(format!(
                "empty watermark ({width}x{height})"
            )));
        }
        let expected = (width as usize)
            .checked_mul(height as usize)
            .and_then(|n| n.checked_mul(4))
            .ok_or_else(|| {
                WatermarkError::AssetDecode(format!("watermark too large ({width}x{height})"))
            })?;
        if pixels.len() != expected {
            return Err(WatermarkError::AssetDecode(format!(
                "expected {expected} bytes for {width}x{height} RGBA, got {}",
                pixels.len()
            )));
        }
        Ok(Self {
            width,
            height,
            pixels: pixels.into(),
        })
    }

    /// Solid-color watermark, mostly useful for demos and tests.
    pub fn solid(width: u32, height: u32, rgba: [u8; 4]) -> Result<Self, WatermarkError> {
        let count = (width as usize) * (height as usize);
        let pixels = rgba.iter().copied().cycle().take(count * 4).collect();
        Self::from_rgba(width, height, pixels)
    }

    /// Width in pixels.
    pub fn width(&self) -> u32 {
        self.width
    }

    /// Height in pixels.
    pub fn height(&self) -> u32 {
        self.height
    }

    /// RGBA8 pixel data.
    pub fn pixels(&self) -> &[u8] {
        &self.pixels
    }

    /// Pixel at `(x, y)`, or `None` if out of bounds.
    pub fn pixel(&self, x: u32, y: u32) -> Option<[u8; 4]> {
        if x >= self.width || y >= self.height {
            return None;
        }
        let i = ((y as usize) * (self.width as usize) + x as usize) * 4;
        let p = &self.pixels[i..i + 4];
        Some([p[0], p[1], p[2], p[3]])
    }
}
