//! Controller configuration

use crate::lifecycle::ForegroundNotice;
use crate::transport::TransportConfig;

/// Configuration for a [`LiveController`](super::LiveController)
#[derive(Debug, Clone, Default)]
pub struct ControllerConfig {
    pub transport: TransportConfig,

    /// Shown while a session holds the process in the foreground
    pub notice: ForegroundNotice,
}

impl ControllerConfig {
    pub fn with_transport(transport: TransportConfig) -> Self {
        Self {
            transport,
            ..Default::default()
        }
    }

    /// Set the session foreground notice
    pub fn notice(mut self, notice: ForegroundNotice) -> Self {
        self.notice = notice;
        self
    }
}
