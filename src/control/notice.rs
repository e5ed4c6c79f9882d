//! Session notices
//!
//! Broadcast to every [`subscribe`](super::LiveController::subscribe)r. This
//! is how a viewer learns its connection to the host was lost.

use std::net::SocketAddr;

use crate::error::Error;
use crate::session::{MatchInfo, PeerId, Role};

/// Capacity of the notice channel; slow subscribers see `Lagged`
pub const NOTICE_CAPACITY: usize = 64;

#[derive(Debug)]
pub enum ControlEvent {
    SessionStarted { role: Role, info: MatchInfo },
    PeerJoined { peer_id: PeerId, addr: SocketAddr },
    PeerLeft { peer_id: PeerId, addr: SocketAddr },
    SessionStopped { role: Role, live_match_id: String },
    SessionFailed { live_match_id: String, error: Error },
}

impl Clone for ControlEvent {
    fn clone(&self) -> Self {
        match self {
            ControlEvent::SessionStarted { role, info } => ControlEvent::SessionStarted {
                role: *role,
                info: info.clone(),
            },
            ControlEvent::PeerJoined { peer_id, addr } => ControlEvent::PeerJoined {
                peer_id: *peer_id,
                addr: *addr,
            },
            ControlEvent::PeerLeft { peer_id, addr } => ControlEvent::PeerLeft {
                peer_id: *peer_id,
                addr: *addr,
            },
            ControlEvent::SessionStopped {
                role,
                live_match_id,
            } => ControlEvent::SessionStopped {
                role: *role,
                live_match_id: live_match_id.clone(),
            },
            ControlEvent::SessionFailed {
                live_match_id,
                error,
            } => ControlEvent::SessionFailed {
                live_match_id: live_match_id.clone(),
                error: error.duplicate(),
            },
        }
    }
}
