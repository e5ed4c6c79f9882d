//! Statistics for live sessions

use std::sync::atomic::{AtomicU64, Ordering};

/// Session-level statistics snapshot
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SessionStats {
    /// Events handed to the bus on the host
    pub events_published: u64,
    /// Event deliveries (per peer on the host, per consumer call on a viewer)
    pub events_delivered: u64,
    /// Events dropped (full peer queue, or no consumer on a viewer)
    pub events_dropped: u64,
    /// Frames produced by capture (host)
    pub frames_captured: u64,
    /// Frames queued for viewers, counted per peer (host)
    pub frames_forwarded: u64,
    /// Frames read off the host connection (viewer)
    pub frames_received: u64,
    /// Frames handed to the rendering consumer (viewer)
    pub frames_rendered: u64,
    /// Frames dropped: full or oversized on the host, renderer behind or
    /// absent on a viewer
    pub frames_dropped: u64,
    /// Peers that joined
    pub peers_joined: u64,
    /// Peers whose connection was lost
    pub peers_lost: u64,
}

impl SessionStats {
    /// Create new stats
    pub fn new() -> Self {
        Self::default()
    }

    /// Fraction of frame deliveries dropped, 0.0 when nothing was attempted
    ///
    /// Only one of `frames_forwarded`/`frames_rendered` grows in a session,
    /// depending on its role.
    pub fn frame_drop_ratio(&self) -> f64 {
        let attempted = self.frames_forwarded + self.frames_rendered + self.frames_dropped;
        if attempted > 0 {
            self.frames_dropped as f64 / attempted as f64
        } else {
            0.0
        }
    }
}

/// Live counters shared by the session tasks
#[derive(Debug, Default)]
pub struct SessionCounters {
    events_published: AtomicU64,
    events_delivered: AtomicU64,
    events_dropped: AtomicU64,
    frames_captured: AtomicU64,
    frames_forwarded: AtomicU64,
    frames_received: AtomicU64,
    frames_rendered: AtomicU64,
    frames_dropped: AtomicU64,
    peers_joined: AtomicU64,
    peers_lost: AtomicU64,
}

impl SessionCounters {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn event_published(&self) {
        self.events_published.fetch_add(1, Ordering::Relaxed);
    }

    pub fn events_delivered(&self, n: usize) {
        self.events_delivered.fetch_add(n as u64, Ordering::Relaxed);
    }

    pub fn events_dropped(&self, n: usize) {
        self.events_dropped.fetch_add(n as u64, Ordering::Relaxed);
    }

    pub fn frame_captured(&self) {
        self.frames_captured.fetch_add(1, Ordering::Relaxed);
    }

    pub fn frames_forwarded(&self, n: usize) {
        self.frames_forwarded.fetch_add(n as u64, Ordering::Relaxed);
    }

    pub fn frame_received(&self) {
        self.frames_received.fetch_add(1, Ordering::Relaxed);
    }

    pub fn frame_rendered(&self) {
        self.frames_rendered.fetch_add(1, Ordering::Relaxed);
    }

    pub fn frames_dropped(&self, n: usize) {
        self.frames_dropped.fetch_add(n as u64, Ordering::Relaxed);
    }

    pub fn peer_joined(&self) {
        self.peers_joined.fetch_add(1, Ordering::Relaxed);
    }

    pub fn peers_lost(&self, n: usize) {
        self.peers_lost.fetch_add(n as u64, Ordering::Relaxed);
    }

    /// Zero every counter (new session)
    pub fn reset(&self) {
        for counter in [
            &self.events_published,
            &self.events_delivered,
            &self.events_dropped,
            &self.frames_captured,
            &self.frames_forwarded,
            &self.frames_received,
            &self.frames_rendered,
            &self.frames_dropped,
            &self.peers_joined,
            &self.peers_lost,
        ] {
            counter.store(0, Ordering::Relaxed);
        }
    }

    pub fn snapshot(&self) -> SessionStats {
        SessionStats {
            events_published: self.events_published.load(Ordering::Relaxed),
            events_delivered: self.events_delivered.load(Ordering::Relaxed),
            events_dropped: self.events_dropped.load(Ordering::Relaxed),
            frames_captured: self.frames_captured.load(Ordering::Relaxed),
            frames_forwarded: self.frames_forwarded.load(Ordering::Relaxed),
            frames_received: self.frames_received.load(Ordering::Relaxed),
            frames_rendered: self.frames_rendered.load(Ordering::Relaxed),
            frames_dropped: self.frames_dropped.load(Ordering::Relaxed),
            peers_joined: self.peers_joined.load(Ordering::Relaxed),
            peers_lost: self.peers_lost.load(Ordering::Relaxed),
        }
    }
}
