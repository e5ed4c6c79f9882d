//! Wire protocol
//!
//! Two channels connect a host and its viewers on the local network:
//!
//! - **Discovery** (UDP): viewers broadcast a probe naming a `liveMatchId`;
//!   the host serving it answers with its data channel port.
//! - **Data channel** (TCP): length-prefixed packets carrying the join
//!   handshake, application events, media frames and liveness pings.

pub mod announce;
pub mod constants;
pub mod handshake;
pub mod packet;

pub use announce::{Announcement, Datagram, Probe};
pub use handshake::{Admission, Handshake, HandshakeRole, HandshakeStep};
pub use packet::{Packet, PacketCodec, RejectReason};
