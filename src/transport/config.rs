//! Transport configuration

use std::net::{Ipv4Addr, SocketAddr, SocketAddrV4};
use std::time::Duration;

use crate::protocol::constants::*;

/// Transport configuration options
#[derive(Debug, Clone)]
pub struct TransportConfig {
    /// Data channel listener address (host); port 0 picks a free port
    pub bind_addr: SocketAddr,

    /// Address the host answers discovery probes on
    pub discovery_bind_addr: SocketAddr,

    /// Where viewers send discovery probes
    pub discovery_target: SocketAddr,

    /// How long a viewer searches for a host before giving up
    pub discovery_timeout: Duration,

    /// Interval between repeated probes
    pub probe_interval: Duration,

    /// Connect plus join handshake must complete within this time
    pub connect_timeout: Duration,

    /// Viewer heartbeat interval
    pub heartbeat_interval: Duration,

    /// Maximum concurrent viewers per host session (0 = unlimited)
    pub max_viewers: usize,

    /// Outbound event queue depth per viewer
    pub event_queue_depth: usize,

    /// Outbound frame queue depth per viewer
    pub frame_queue_depth: usize,

    /// Largest accepted packet payload
    pub max_packet_size: usize,

    /// Enable TCP_NODELAY (disable Nagle's algorithm)
    pub tcp_nodelay: bool,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            bind_addr: SocketAddr::V4(SocketAddrV4::new(Ipv4Addr::UNSPECIFIED, 0)),
            discovery_bind_addr: SocketAddr::V4(SocketAddrV4::new(
                Ipv4Addr::UNSPECIFIED,
                DEFAULT_DISCOVERY_PORT,
            )),
            discovery_target: SocketAddr::V4(SocketAddrV4::new(
                Ipv4Addr::BROADCAST,
                DEFAULT_DISCOVERY_PORT,
            )),
            discovery_timeout: Duration::from_secs(5),
            probe_interval: Duration::from_millis(250),
            connect_timeout: Duration::from_secs(5),
            heartbeat_interval: Duration::from_secs(2),
            max_viewers: 0, // Unlimited
            event_queue_depth: DEFAULT_EVENT_QUEUE_DEPTH,
            frame_queue_depth: DEFAULT_FRAME_QUEUE_DEPTH,
            max_packet_size: DEFAULT_MAX_PACKET_SIZE,
            tcp_nodelay: true, // Important for low latency
        }
    }
}

impl TransportConfig {
    /// Set the data channel bind address
    pub fn bind(mut self, addr: SocketAddr) -> Self {
        self.bind_addr = addr;
        self
    }

    /// Use `port` for both answering and sending discovery probes
    pub fn discovery_port(mut self, port: u16) -> Self {
        self.discovery_bind_addr.set_port(port);
        self.discovery_target.set_port(port);
        self
    }

    /// Set where probes are sent (e.g. a unicast host address)
    pub fn discovery_target(mut self, addr: SocketAddr) -> Self {
        self.discovery_target = addr;
        self
    }

    /// Set discovery timeout
    pub fn discovery_timeout(mut self, timeout: Duration) -> Self {
        self.discovery_timeout = timeout;
        self
    }

    /// Set connect timeout
    pub fn connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    /// Set heartbeat interval
    pub fn heartbeat_interval(mut self, interval: Duration) -> Self {
        self.heartbeat_interval = interval;
        self
    }

    /// Set maximum viewers
    pub fn max_viewers(mut self, max: usize) -> Self {
        self.max_viewers = max;
        self
    }

    /// Set per-viewer frame queue depth (at least 1)
    pub fn frame_queue_depth(mut self, depth: usize) -> Self {
        self.frame_queue_depth = depth.max(1);
        self
    }

    /// Set per-viewer event queue depth (at least 1)
    pub fn event_queue_depth(mut self, depth: usize) -> Self {
        self.event_queue_depth = depth.max(1);
        self
    }

    /// Set max packet size, never below the handshake's needs
    pub fn max_packet_size(mut self, size: usize) -> Self {
        self.max_packet_size = size.max(MIN_PACKET_SIZE);
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = TransportConfig::default();

        assert_eq!(config.bind_addr.port(), 0);
        assert_eq!(config.discovery_bind_addr.port(), DEFAULT_DISCOVERY_PORT);
        assert_eq!(config.discovery_target.ip(), Ipv4Addr::BROADCAST);
        assert_eq!(config.max_viewers, 0);
        assert_eq!(config.frame_queue_depth, 2);
        assert_eq!(config.event_queue_depth, 64);
        assert!(config.tcp_nodelay);
    }

    #[test]
    fn test_builder_discovery_port() {
        let config = TransportConfig::default().discovery_port(50001);

        assert_eq!(config.discovery_bind_addr.port(), 50001);
        assert_eq!(config.discovery_target.port(), 50001);
    }

    #[test]
    fn test_builder_queue_depth_floor() {
        let config = TransportConfig::default().frame_queue_depth(0);

        assert_eq!(config.frame_queue_depth, 1);
    }

    #[test]
    fn test_builder_max_packet_size_floor() {
        let config = TransportConfig::default().max_packet_size(1);

        assert_eq!(config.max_packet_size, MIN_PACKET_SIZE);
    }

    #[test]
    fn test_builder_chaining() {
        let addr: SocketAddr = "127.0.0.1:0".parse().unwrap();
        let target: SocketAddr = "127.0.0.1:50002".parse().unwrap();
        let config = TransportConfig::default()
            .bind(addr)
            .discovery_target(target)
            .max_viewers(4)
            .discovery_timeout(Duration::from_millis(300))
            .connect_timeout(Duration::from_secs(1))
            .heartbeat_interval(Duration::from_millis(500));

        assert_eq!(config.bind_addr, addr);
        assert_eq!(config.discovery_target, target);
        assert_eq!(config.max_viewers, 4);
        assert_eq!(config.discovery_timeout, Duration::from_millis(300));
        assert_eq!(config.connect_timeout, Duration::from_secs(1));
        assert_eq!(config.heartbeat_interval, Duration::from_millis(500));
    }
}
