//! Session data model
//!
//! A session is one host's or one viewer's participation in a live match.
//! It owns its connected peers and moves through a one-way lifecycle.

pub mod context;
pub mod peer;
pub mod state;

pub use context::{MatchInfo, Role, SessionHandle};
pub use peer::{Delivery, OutboundQueues, Peer, PeerId, PeerInfo, PeerOutbound};
pub use state::{SessionPhase, SessionState};
