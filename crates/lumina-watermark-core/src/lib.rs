//! lumina-watermark-core: GPU watermark compositing for streaming playback.
//!
//! A decoder writes frames into a drawable surface backed by an external
//! texture; a dedicated render thread imports the latest frame every vsync
//! and hands it to a native compositor that blends a fixed watermark over it.
//! The crate contains:
//!
//! - Contracts for the platform collaborators: [`backend`], [`compositor`],
//!   [`decoder`], [`capability`]
//! - The shared frame slot: [`frame_buffer`]
//! - The render thread and surface lifecycle: [`holder`], [`provider`]
//! - Session control and error recovery: [`controller`], [`control`]
//! - A CPU reference backend: [`cpu`]
//!
//! Nothing in here blocks the render thread on the control thread. All
//! render/decoder notifications reach the controller as queued
//! [`control::ControlMessage`]s.

pub mod backend;
pub mod capability;
pub mod compositor;
pub mod config;
pub mod control;
pub mod controller;
pub mod cpu;
pub mod decoder;
pub mod error;
pub mod frame_buffer;
pub mod holder;
pub mod matrix;
pub mod provider;
pub mod surface;
pub mod watermark;

#[cfg(target_os = "android")]
pub mod android;

pub use backend::{GpuBackend, GpuResources, NativeModule, RenderView, WindowEvent, WindowEventSender};
pub use capability::{CapabilityProbe, DeviceCaps, StaticProbe, MIN_GLES_VERSION};
pub use compositor::{CompositorHandle, NativeCompositor, TextureId};
pub use config::{PipelineConfig, RecoveryPolicy};
pub use control::{ControlMessage, HolderId, SessionId};
pub use controller::{PlatformServices, PlaybackController, PlaybackEvent, PlaybackState};
pub use cpu::{CpuBackend, FrameWriter, OutputFrame, RgbaFrame};
pub use decoder::{DecoderEvent, DecoderEventSink, DecoderFactory, MediaDecoder};
pub use error::WatermarkError;
pub use frame_buffer::{ExternalTexture, TextureFrameBuffer};
pub use holder::{HolderPhase, RenderSurfaceHolder};
pub use matrix::TransformMatrix;
pub use provider::{DrawableProvider, RawSurfaceProvider};
pub use surface::{DrawableKind, PixelFormat, Surface, SurfaceLifecycleEvent};
pub use watermark::WatermarkAsset;

#[cfg(target_os = "android")]
pub use android::GlesVersionProbe;
