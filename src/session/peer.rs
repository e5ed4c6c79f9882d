//! Connected peers
//!
//! A host keeps one [`Peer`] per viewer; a viewer keeps one for its host.
//! Host-side peers own the sending half of two bounded outbound queues that a
//! per-connection writer task drains.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Instant;

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::bus::Event;
use crate::pipeline::StreamFrame;

/// Peer identifier, unique within the process
pub type PeerId = u64;

/// Outcome of a non-blocking enqueue
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Delivery {
    /// Item queued for the writer
    Queued,
    /// Queue at capacity, item dropped
    Full,
    /// Writer has gone away
    Closed,
}

/// Sending side of a peer's outbound queues
#[derive(Debug, Clone)]
pub struct PeerOutbound {
    events: mpsc::Sender<Arc<Event>>,
    frames: mpsc::Sender<StreamFrame>,
}

/// Receiving side, owned by the writer task
#[derive(Debug)]
pub struct OutboundQueues {
    pub events: mpsc::Receiver<Arc<Event>>,
    pub frames: mpsc::Receiver<StreamFrame>,
}

impl PeerOutbound {
    /// Create a bounded queue pair
    pub fn channel(event_depth: usize, frame_depth: usize) -> (Self, OutboundQueues) {
        let (event_tx, event_rx) = mpsc::channel(event_depth.max(1));
        let (frame_tx, frame_rx) = mpsc::channel(frame_depth.max(1));

        (
            Self {
                events: event_tx,
                frames: frame_tx,
            },
            OutboundQueues {
                events: event_rx,
                frames: frame_rx,
            },
        )
    }

    pub fn try_event(&self, event: Arc<Event>) -> Delivery {
        match self.events.try_send(event) {
            Ok(()) => Delivery::Queued,
            Err(mpsc::error::TrySendError::Full(_)) => Delivery::Full,
            Err(mpsc::error::TrySendError::Closed(_)) => Delivery::Closed,
        }
    }

    /// Queue a frame; a full queue drops this (the newest) frame
    pub fn try_frame(&self, frame: StreamFrame) -> Delivery {
        match self.frames.try_send(frame) {
            Ok(()) => Delivery::Queued,
            Err(mpsc::error::TrySendError::Full(_)) => Delivery::Full,
            Err(mpsc::error::TrySendError::Closed(_)) => Delivery::Closed,
        }
    }
}

/// A connected counterpart
#[derive(Debug)]
pub struct Peer {
    /// Unique peer ID
    pub id: PeerId,

    /// Remote address
    pub addr: SocketAddr,

    /// Connection time
    pub connected_at: Instant,

    /// Last time any packet arrived from this peer
    pub last_seen: Instant,

    /// Outbound queues (host-side peers only)
    pub(crate) outbound: Option<PeerOutbound>,

    /// Cancelled when the peer is removed; stops its connection tasks
    pub(crate) close: CancellationToken,
}

impl Peer {
    pub fn new(
        id: PeerId,
        addr: SocketAddr,
        outbound: Option<PeerOutbound>,
        close: CancellationToken,
    ) -> Self {
        let now = Instant::now();
        Self {
            id,
            addr,
            connected_at: now,
            last_seen: now,
            outbound,
            close,
        }
    }

    pub fn info(&self) -> PeerInfo {
        PeerInfo {
            id: self.id,
            addr: self.addr,
            connected_at: self.connected_at,
            last_seen: self.last_seen,
        }
    }
}

/// Read-only snapshot of a peer
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PeerInfo {
    pub id: PeerId,
    pub addr: SocketAddr,
    pub connected_at: Instant,
    pub last_seen: Instant,
}
