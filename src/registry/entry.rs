//! Session entry and snapshot types
//!
//! This module defines the per-session state stored in the registry.

use std::collections::HashMap;
use std::time::Duration;

use tokio_util::sync::CancellationToken;

use crate::session::{MatchInfo, Peer, PeerId, PeerInfo, Role, SessionHandle, SessionPhase, SessionState};

/// One recorded phase change
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Transition {
    pub session_id: u64,
    pub from: SessionPhase,
    pub to: SessionPhase,
}

/// Entry for the session currently registered
pub struct SessionEntry {
    /// Lifecycle state
    pub state: SessionState,

    /// Connected peers keyed by peer ID
    pub(super) peers: HashMap<PeerId, Peer>,

    /// Root cancellation token of the session
    pub(super) cancel: CancellationToken,
}

impl SessionEntry {
    pub(super) fn new(id: u64, role: Role, info: MatchInfo) -> Self {
        Self {
            state: SessionState::new(id, role, info),
            peers: HashMap::new(),
            cancel: CancellationToken::new(),
        }
    }

    pub fn id(&self) -> u64 {
        self.state.id
    }

    pub fn handle(&self) -> SessionHandle {
        SessionHandle::new(
            self.state.id,
            self.state.role,
            self.state.info.clone(),
            self.cancel.clone(),
        )
    }

    /// Get the number of peers
    pub fn peer_count(&self) -> usize {
        self.peers.len()
    }

    /// Whether peers may still be added or fed
    pub fn accepts_traffic(&self) -> bool {
        matches!(self.state.phase, SessionPhase::Starting | SessionPhase::Active)
    }

    /// Close and drop every peer
    pub(super) fn close_peers(&mut self) -> Vec<PeerInfo> {
        self.peers
            .drain()
            .map(|(_, peer)| {
                peer.close.cancel();
                peer.info()
            })
            .collect()
    }

    pub fn snapshot(&self) -> SessionSnapshot {
        let mut peers: Vec<PeerInfo> = self.peers.values().map(Peer::info).collect();
        peers.sort_by_key(|p| p.id);

        SessionSnapshot {
            id: self.state.id,
            role: self.state.role,
            info: self.state.info.clone(),
            phase: self.state.phase,
            peers,
            active_for: self.state.active_duration(),
        }
    }
}

/// Read-only view of the current session
#[derive(Debug, Clone)]
pub struct SessionSnapshot {
    pub id: u64,
    pub role: Role,
    pub info: MatchInfo,
    pub phase: SessionPhase,
    pub peers: Vec<PeerInfo>,
    pub active_for: Option<Duration>,
}

/// Result of a fan-out over the current session's peers
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FanOut {
    /// Peers the item was queued for
    pub queued: usize,
    /// Peers whose queue was full (item dropped for them only)
    pub full: usize,
    /// Peers found disconnected and removed
    pub closed: Vec<PeerId>,
}

/// Outcome of a stop request
#[derive(Debug)]
pub enum StopOutcome {
    /// Nothing matching was running
    NotRunning,
    /// Active session moved to Stopping; caller must finish teardown
    Stopping {
        handle: SessionHandle,
        peers: Vec<PeerInfo>,
    },
    /// Session was still starting and has been failed and removed
    Cancelled(SessionHandle),
}
