//! Android GLES capability probe.
//!
//! Reads `ActivityManager.getDeviceConfigurationInfo().reqGlEsVersion`
//! through JNI. Requires `ndk_context` to be initialized by the hosting
//! activity.

use std::sync::OnceLock;

use jni::objects::{JObject, JValue};
use jni::JavaVM;

use crate::capability::{CapabilityProbe, DeviceCaps};
use crate::error::WatermarkError;

/// Capability probe backed by the device configuration.
///
/// The driver version is queried once and cached. Any JNI failure counts as
/// "capability absent" so the session falls back to the raw surface.
#[derive(Debug, Default)]
pub struct GlesVersionProbe {
    caps: OnceLock<Option<DeviceCaps>>,
}

impl GlesVersionProbe {
    /// Creates a probe; nothing is queried until first use.
    pub fn new() -> Self {
        Self::default()
    }

    /// Device caps, or `None` if they could not be read.
    pub fn caps(&self) -> Option<DeviceCaps> {
        *self.caps.get_or_init(|| match query_gles_version() {
            Ok(gles_version) => {
                tracing::info!("GlesVersionProbe: reqGlEsVersion = {:#x}", gles_version);
                Some(DeviceCaps { gles_version })
            }
            Err(e) => {
                tracing::warn!("GlesVersionProbe: query failed: {}", e);
                None
            }
        })
    }
}

impl CapabilityProbe for GlesVersionProbe {
    fn supported(&self, min_version: u32) -> bool {
        self.caps().is_some_and(|caps| caps.supports(min_version))
    }
}

fn get_jvm() -> Result<JavaVM, WatermarkError> {
    // Safety: ndk_context::android_context() returns the VM pointer installed
    // by the activity glue; from_raw does not take ownership.
    unsafe { JavaVM::from_raw(ndk_context::android_context().vm().cast()) }
        .map_err(|e| WatermarkError::Generic(format!("Failed to get JavaVM: {e}")))
}

fn query_gles_version() -> Result<u32, WatermarkError> {
    let jni_err = |e: jni::errors::Error| WatermarkError::Generic(format!("JNI: {e}"));

    let vm = get_jvm()?;
    let mut env = vm.attach_current_thread().map_err(jni_err)?;

    // Safety: the context pointer stays valid for the lifetime of the activity
    // and we are attached to the VM.
    let context = unsafe { JObject::from_raw(ndk_context::android_context().context().cast()) };

    let service_name = env.new_string("activity").map_err(jni_err)?;
    let activity_manager = env
        .call_method(
            &context,
            "getSystemService",
            "(Ljava/lang/String;)Ljava/lang/Object;",
            &[JValue::Object(&service_name)],
        )
        .and_then(|v| v.l())
        .map_err(jni_err)?;
    if activity_manager.is_null() {
        return Err(WatermarkError::Generic("ActivityManager unavailable".into()));
    }

    let config_info = env
        .call_method(
            &activity_manager,
            "getDeviceConfigurationInfo",
            "()Landroid/content/pm/ConfigurationInfo;",
            &[],
        )
        .and_then(|v| v.l())
        .map_err(jni_err)?;
    if config_info.is_null() {
        return Err(WatermarkError::Generic("ConfigurationInfo unavailable".into()));
    }

    let version = env
        .get_field(&config_info, "reqGlEsVersion", "I")
        .and_then(|v| v.i())
        .map_err(jni_err)?;

    Ok(version as u32)
}
