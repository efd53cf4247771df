//! Error types for the watermark pipeline.

use std::fmt;

/// Errors produced by the compositing and playback pipeline.
///
/// Capability absence is not represented here: a device without
/// the required GPU support selects the raw (unwatermarked) drawable path as
/// a normal outcome.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WatermarkError {
    /// The watermark image could not be decoded or has inconsistent dimensions
    AssetDecode(String),
    /// The native compositor failed to initialize its GPU program
    CompositorInit(String),
    /// GPU resource exhaustion or driver failure during rendering
    GpuResource(String),
    /// Importing the latest frame into the external texture failed
    TextureImport(String),
    /// The decoder could not be created or configured
    DecoderInit(String),
    /// The decoder reported an error signal
    Decoder {
        /// Platform reason code
        code: i32,
    },
    /// The native compositor module could not be loaded
    ModuleLoad(String),
    /// The surface holder was already destroyed
    HolderDestroyed,
    /// The external texture and its drawable surface were released
    TextureReleased,
    /// A cross-thread channel was closed unexpectedly
    ChannelClosed(String),
    /// Generic error
    Generic(String),
}

impl WatermarkError {
    /// Returns true if the controller can recover from this error by tearing
    /// down and recreating the whole pipeline.
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            WatermarkError::Decoder { .. }
                | WatermarkError::DecoderInit(_)
                | WatermarkError::GpuResource(_)
                | WatermarkError::TextureImport(_)
                | WatermarkError::CompositorInit(_)
        )
    }
}

impl fmt::Display for WatermarkError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            WatermarkError::AssetDecode(msg) => write!(f, "Watermark asset decode failed: {msg}"),
            WatermarkError::CompositorInit(msg) => {
                write!(f, "Compositor initialization failed: {msg}")
            }
            WatermarkError::GpuResource(msg) => write!(f, "GPU resource failure: {msg}"),
            WatermarkError::TextureImport(msg) => write!(f, "Texture import failed: {msg}"),
            WatermarkError::DecoderInit(msg) => write!(f, "Decoder initialization failed: {msg}"),
            WatermarkError::Decoder { code } => write!(f, "Decoder error (code {code})"),
            WatermarkError::ModuleLoad(msg) => write!(f, "Native module load failed: {msg}"),
            WatermarkError::HolderDestroyed => write!(f, "Surface holder already destroyed"),
            WatermarkError::TextureReleased => write!(f, "External texture already released"),
            WatermarkError::ChannelClosed(msg) => write!(f, "Channel closed: {msg}"),
            WatermarkError::Generic(msg) => write!(f, "Watermark error: {msg}"),
        }
    }
}

impl std::error::Error for WatermarkError {}
