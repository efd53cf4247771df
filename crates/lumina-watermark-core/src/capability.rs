//! GPU capability probing.
//!
//! The probe runs once per session before any GPU resource exists. A negative
//! answer is not an error: it routes the controller to the raw drawable path,
//! where video still plays but without the watermark.

/// Packed OpenGL ES 2.0 version (`major << 16 | minor`), the minimum the
/// compositor's shader program needs.
pub const MIN_GLES_VERSION: u32 = 0x20000;

/// Device GPU facts relevant to compositing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DeviceCaps {
    /// Packed GLES version reported by the driver (`major << 16 | minor`)
    pub gles_version: u32,
}

impl DeviceCaps {
    /// Builds caps from a major/minor pair.
    pub fn gles(major: u16, minor: u16) -> Self {
        Self {
            gles_version: (u32::from(major) << 16) | u32::from(minor),
        }
    }

    /// Returns true if the driver meets `min_version`.
    pub fn supports(&self, min_version: u32) -> bool {
        self.gles_version >= min_version
    }
}

/// One-shot, side-effect free capability check.
pub trait CapabilityProbe: Send + Sync {
    /// Returns true if the device driver meets `min_version`
    /// (packed `major << 16 | minor`).
    fn supported(&self, min_version: u32) -> bool;
}

/// Probe answering from known [`DeviceCaps`].
#[derive(Debug, Clone, Copy)]
pub struct StaticProbe {
    caps: DeviceCaps,
}

impl StaticProbe {
    /// Creates a probe reporting `caps`.
    pub fn new(caps: DeviceCaps) -> Self {
        Self { caps }
    }

    /// Probe for a device with no usable GPU driver.
    pub fn unsupported() -> Self {
        Self::new(DeviceCaps { gles_version: 0 })
    }
}

impl CapabilityProbe for StaticProbe {
    fn supported(&self, min_version: u32) -> bool {
        let supported = self.caps.supports(min_version);
        tracing::debug!(
            "Capability probe: GLES {:#x} (need {:#x}) -> {}",
            self.caps.gles_version,
            min_version,
            supported
        );
        supported
    }
}

impl<F> CapabilityProbe for F
where
    F: Fn(u32) -> bool + Send + Sync,
{
    fn supported(&self, min_version: u32) -> bool {
        self(min_version)
    }
}
