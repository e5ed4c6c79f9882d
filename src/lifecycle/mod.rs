//! Lifecycle guard
//!
//! Keeps the process alive (foreground keep-alive plus wake lock) for as long
//! as a session or a manual foreground request holds a lease.

pub mod guard;
pub mod platform;

pub use guard::{LifecycleGuard, LifecycleLease};
pub use platform::{DeviceInfo, ForegroundNotice, NoopPlatform, Platform, PlatformError};
