//! Wire protocol constants

/// Protocol version carried in the join `Hello`
pub const PROTOCOL_VERSION: u16 = 1;

/// Default UDP port the host answers discovery probes on
pub const DEFAULT_DISCOVERY_PORT: u16 = 47474;

/// Magic prefix of every discovery datagram
pub const DISCOVERY_MAGIC: &[u8; 4] = b"LLV1";

/// Largest discovery datagram we send or accept (MTU - IP/UDP headers)
pub const MAX_DATAGRAM_SIZE: usize = 1472;

/// Data channel packet header: kind (1) + payload length (4)
pub const PACKET_HEADER_SIZE: usize = 5;

/// Default cap on a single data channel packet payload (4MB)
pub const DEFAULT_MAX_PACKET_SIZE: usize = 4 * 1024 * 1024;

/// Smallest configurable packet cap (64KB)
pub const MIN_PACKET_SIZE: usize = 64 * 1024;

/// Default per-peer outbound event queue depth
pub const DEFAULT_EVENT_QUEUE_DEPTH: usize = 64;

/// Default per-peer outbound frame queue depth
pub const DEFAULT_FRAME_QUEUE_DEPTH: usize = 2;

// Discovery datagram kinds
pub const DATAGRAM_PROBE: u8 = 0x01;
pub const DATAGRAM_ANNOUNCE: u8 = 0x02;

// Data channel packet kinds
pub const PACKET_HELLO: u8 = 0x01;
pub const PACKET_ACCEPT: u8 = 0x02;
pub const PACKET_REJECT: u8 = 0x03;
pub const PACKET_EVENT: u8 = 0x10;
pub const PACKET_FRAME: u8 = 0x20;
pub const PACKET_HEARTBEAT: u8 = 0x30;
pub const PACKET_BYE: u8 = 0x7F;

/// Frame payload prefix: kind(1) + flags(1) + timestamp(4)
pub const FRAME_HEADER_SIZE: usize = 6;

/// Frame flag: keyframe
pub const FRAME_FLAG_KEYFRAME: u8 = 0x01;
