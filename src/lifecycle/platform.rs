//! Platform collaborator
//!
//! The OS-facing glue (foreground service, wake lock, settings screens,
//! device info) lives behind [`Platform`] so the session core stays portable.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Text shown while the process is held in the foreground
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ForegroundNotice {
    pub title: String,
    pub text: String,
}

impl ForegroundNotice {
    pub fn new(title: impl Into<String>, text: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            text: text.into(),
        }
    }
}

impl Default for ForegroundNotice {
    fn default() -> Self {
        Self::new("Live streaming", "Broadcasting is running")
    }
}

/// Description of the device the process runs on
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeviceInfo {
    pub manufacturer: String,
    pub brand: String,
    pub model: String,
    pub os: String,
    pub arch: String,
    /// Platform API level, where the OS has one
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sdk_int: Option<u32>,
}

impl DeviceInfo {
    /// Best-effort description of the current host
    pub fn current() -> Self {
        Self {
            manufacturer: String::new(),
            brand: String::new(),
            model: String::new(),
            os: std::env::consts::OS.to_string(),
            arch: std::env::consts::ARCH.to_string(),
            sdk_int: None,
        }
    }
}

/// Failure reported by a platform call
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PlatformError {
    /// The platform has no such capability
    Unsupported(String),
    /// The OS or user refused the request
    Denied(String),
    /// The call was attempted and failed
    Failed(String),
}

impl fmt::Display for PlatformError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PlatformError::Unsupported(what) => write!(f, "{} is not supported on this platform", what),
            PlatformError::Denied(what) => write!(f, "{} was denied", what),
            PlatformError::Failed(msg) => write!(f, "platform call failed: {}", msg),
        }
    }
}

impl std::error::Error for PlatformError {}

/// OS integration used by the lifecycle guard and the control façade
///
/// Implementations must be cheap and must not call back into the guard.
pub trait Platform: Send + Sync {
    /// Keep the process from being suspended while a session runs
    fn start_foreground(&self, notice: &ForegroundNotice) -> Result<(), PlatformError>;

    fn stop_foreground(&self) -> Result<(), PlatformError>;

    /// Keep the CPU (capture, networking) running with the screen off
    fn acquire_wake_lock(&self) -> Result<(), PlatformError>;

    fn release_wake_lock(&self) -> Result<(), PlatformError>;

    fn open_battery_optimization_settings(&self) -> Result<(), PlatformError> {
        Err(PlatformError::Unsupported("battery optimization settings".into()))
    }

    fn request_ignore_battery_optimizations(&self) -> Result<(), PlatformError> {
        Err(PlatformError::Unsupported("battery optimization exemption".into()))
    }

    fn open_app_details_settings(&self) -> Result<(), PlatformError> {
        Err(PlatformError::Unsupported("app details settings".into()))
    }

    fn device_info(&self) -> DeviceInfo {
        DeviceInfo::current()
    }
}

/// Platform without background suspension; every keep-alive call succeeds
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopPlatform;

impl Platform for NoopPlatform {
    fn start_foreground(&self, notice: &ForegroundNotice) -> Result<(), PlatformError> {
        tracing::trace!(title = %notice.title, "Foreground requested (no-op)");
        Ok(())
    }

    fn stop_foreground(&self) -> Result<(), PlatformError> {
        Ok(())
    }

    fn acquire_wake_lock(&self) -> Result<(), PlatformError> {
        Ok(())
    }

    fn release_wake_lock(&self) -> Result<(), PlatformError> {
        Ok(())
    }
}
