//! Session registry implementation
//!
//! The single point of truth for the session of this process. Every phase
//! change and every peer add/remove goes through one mutex, which is never
//! held across an `.await`.

use std::collections::VecDeque;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::Mutex;
use tokio_util::sync::CancellationToken;

use crate::protocol::Admission;
use crate::session::{
    Delivery, MatchInfo, Peer, PeerId, PeerInfo, PeerOutbound, Role, SessionHandle, SessionPhase,
    SessionState,
};

use super::entry::{FanOut, SessionEntry, SessionSnapshot, StopOutcome, Transition};
use super::error::RegistryError;

/// Failure reason recorded when a stop catches a session still starting
const STOPPED_WHILE_STARTING: &str = "stopped while starting";

/// Number of transitions kept in the journal
const JOURNAL_CAPACITY: usize = 256;

struct RegistryInner {
    current: Option<SessionEntry>,
    last: Option<SessionState>,
    journal: VecDeque<Transition>,
}

impl RegistryInner {
    fn record(&mut self, session_id: u64, from: SessionPhase, to: SessionPhase) {
        if self.journal.len() == JOURNAL_CAPACITY {
            self.journal.pop_front();
        }
        self.journal.push_back(Transition {
            session_id,
            from,
            to,
        });
    }

    /// Advance the current session, recording the transition
    fn advance(&mut self, next: SessionPhase) -> bool {
        let Some(entry) = self.current.as_mut() else {
            return false;
        };
        let from = entry.state.phase;
        if !entry.state.advance(next) {
            return false;
        }
        let id = entry.id();
        self.record(id, from, next);
        true
    }

    fn current_for(&self, handle: &SessionHandle) -> Option<&SessionEntry> {
        self.current.as_ref().filter(|e| e.id() == handle.id())
    }

    fn current_for_mut(&mut self, handle: &SessionHandle) -> Option<&mut SessionEntry> {
        self.current.as_mut().filter(|e| e.id() == handle.id())
    }

    /// Remove the current session, keeping its final state
    fn retire(&mut self) -> Option<SessionEntry> {
        let mut entry = self.current.take()?;
        entry.cancel.cancel();
        entry.close_peers();
        self.last = Some(entry.state.clone());
        Some(entry)
    }
}

/// Registry for the single session of this process
///
/// Thread-safe via a `parking_lot::Mutex`; all methods are synchronous so
/// capture callbacks can fan out frames without awaiting.
pub struct SessionRegistry {
    inner: Mutex<RegistryInner>,
    next_session_id: AtomicU64,
    next_peer_id: AtomicU64,
}

impl SessionRegistry {
    /// Create an empty registry
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(RegistryInner {
                current: None,
                last: None,
                journal: VecDeque::with_capacity(JOURNAL_CAPACITY),
            }),
            next_session_id: AtomicU64::new(1),
            next_peer_id: AtomicU64::new(1),
        }
    }

    /// Register a new session in `Starting`
    ///
    /// Returns `AlreadyActive` if any session is registered, whatever its
    /// phase; the existing session is left untouched.
    pub fn begin(&self, role: Role, info: MatchInfo) -> Result<SessionHandle, RegistryError> {
        let mut inner = self.inner.lock();

        if let Some(ref existing) = inner.current {
            tracing::debug!(
                live_match_id = %existing.state.info.live_match_id,
                phase = %existing.state.phase,
                "Start rejected, session already registered"
            );
            return Err(RegistryError::AlreadyActive);
        }

        let id = self.next_session_id.fetch_add(1, Ordering::Relaxed);
        let entry = SessionEntry::new(id, role, info);
        let handle = entry.handle();
        inner.current = Some(entry);
        inner.advance(SessionPhase::Starting);

        tracing::info!(
            session_id = id,
            role = %role,
            live_match_id = %handle.live_match_id(),
            "Session starting"
        );

        Ok(handle)
    }

    /// Replace the match identifiers (viewer learns them from the host)
    pub fn set_match_info(&self, handle: &SessionHandle, info: MatchInfo) -> Result<(), RegistryError> {
        let mut inner = self.inner.lock();
        let entry = inner
            .current_for_mut(handle)
            .ok_or(RegistryError::StaleHandle(handle.id()))?;
        entry.state.info = info;
        Ok(())
    }

    /// Move a starting session to `Active`
    pub fn activate(&self, handle: &SessionHandle) -> Result<(), RegistryError> {
        let mut inner = self.inner.lock();

        if inner.current_for(handle).is_none() || !inner.advance(SessionPhase::Active) {
            return Err(RegistryError::StaleHandle(handle.id()));
        }

        tracing::info!(
            session_id = handle.id(),
            live_match_id = %handle.live_match_id(),
            "Session active"
        );
        Ok(())
    }

    /// Fail the session and remove it
    ///
    /// Cancels every task bound to the session and closes all peers.
    /// Returns false if the handle is not current (already stopped or failed).
    pub fn fail(&self, handle: &SessionHandle, reason: &str) -> bool {
        let mut inner = self.inner.lock();

        let Some(entry) = inner.current_for_mut(handle) else {
            return false;
        };
        let from = entry.state.phase;
        if !entry.state.fail(reason) {
            return false;
        }
        inner.record(handle.id(), from, SessionPhase::Failed);
        inner.retire();

        tracing::warn!(
            session_id = handle.id(),
            live_match_id = %handle.live_match_id(),
            reason = reason,
            "Session failed"
        );
        true
    }

    /// Begin stopping the session matching `role` and `live_match_id`
    ///
    /// A mismatching or absent session is a no-op. An active session moves to
    /// `Stopping` and its peers are closed; a session still starting is failed
    /// and removed so its pending start unwinds.
    pub fn begin_stop(&self, role: Role, live_match_id: &str) -> StopOutcome {
        let mut inner = self.inner.lock();

        let (handle, phase) = match inner.current {
            Some(ref entry)
                if entry.state.role == role && entry.state.info.live_match_id == live_match_id =>
            {
                (entry.handle(), entry.state.phase)
            }
            _ => return StopOutcome::NotRunning,
        };

        match phase {
            SessionPhase::Active => {
                inner.advance(SessionPhase::Stopping);
                let peers = match inner.current.as_mut() {
                    Some(entry) => {
                        entry.cancel.cancel();
                        entry.close_peers()
                    }
                    None => Vec::new(),
                };

                tracing::info!(
                    session_id = handle.id(),
                    live_match_id = live_match_id,
                    peers = peers.len(),
                    "Session stopping"
                );
                StopOutcome::Stopping { handle, peers }
            }
            SessionPhase::Starting => {
                if let Some(entry) = inner.current.as_mut() {
                    entry.state.fail(STOPPED_WHILE_STARTING);
                }
                inner.record(handle.id(), SessionPhase::Starting, SessionPhase::Failed);
                inner.retire();

                tracing::info!(
                    session_id = handle.id(),
                    live_match_id = live_match_id,
                    "Session cancelled while starting"
                );
                StopOutcome::Cancelled(handle)
            }
            _ => StopOutcome::NotRunning,
        }
    }

    /// Complete a stop begun with [`begin_stop`](Self::begin_stop)
    pub fn finish_stop(&self, handle: &SessionHandle) -> bool {
        let mut inner = self.inner.lock();

        if inner.current_for(handle).is_none() || !inner.advance(SessionPhase::Stopped) {
            return false;
        }
        inner.retire();

        tracing::info!(
            session_id = handle.id(),
            live_match_id = %handle.live_match_id(),
            "Session stopped"
        );
        true
    }

    /// Admission decision for a joining viewer
    pub fn admission(&self, handle: &SessionHandle, max_peers: usize) -> Admission {
        let inner = self.inner.lock();

        match inner.current_for(handle) {
            Some(entry) if entry.accepts_traffic() => {
                if max_peers > 0 && entry.peer_count() >= max_peers {
                    Admission::Full
                } else {
                    Admission::Open
                }
            }
            _ => Admission::Stopping,
        }
    }

    /// Add a connected peer to the session
    ///
    /// `max_peers` of 0 means unlimited. Returns the peer ID and a token that
    /// is cancelled when the peer is removed or the session ends.
    pub fn add_peer(
        &self,
        handle: &SessionHandle,
        addr: SocketAddr,
        outbound: Option<PeerOutbound>,
        max_peers: usize,
    ) -> Result<(PeerId, CancellationToken), RegistryError> {
        let mut inner = self.inner.lock();

        let entry = inner
            .current_for_mut(handle)
            .filter(|e| e.accepts_traffic())
            .ok_or(RegistryError::StaleHandle(handle.id()))?;

        if max_peers > 0 && entry.peer_count() >= max_peers {
            return Err(RegistryError::PeerLimit(max_peers));
        }

        let id = self.next_peer_id.fetch_add(1, Ordering::Relaxed);
        let close = entry.cancel.child_token();
        entry
            .peers
            .insert(id, Peer::new(id, addr, outbound, close.clone()));

        tracing::info!(
            session_id = handle.id(),
            peer_id = id,
            peer = %addr,
            peers = entry.peer_count(),
            "Peer added"
        );

        Ok((id, close))
    }

    /// Remove a peer; its connection tasks are cancelled
    pub fn remove_peer(&self, handle: &SessionHandle, peer_id: PeerId) -> Option<PeerInfo> {
        let mut inner = self.inner.lock();

        let entry = inner.current_for_mut(handle)?;
        let peer = entry.peers.remove(&peer_id)?;
        peer.close.cancel();

        tracing::info!(
            session_id = handle.id(),
            peer_id = peer_id,
            peer = %peer.addr,
            peers = entry.peer_count(),
            "Peer removed"
        );

        Some(peer.info())
    }

    /// Refresh a peer's last-seen time
    pub fn touch_peer(&self, handle: &SessionHandle, peer_id: PeerId) {
        let mut inner = self.inner.lock();

        if let Some(peer) = inner
            .current_for_mut(handle)
            .and_then(|e| e.peers.get_mut(&peer_id))
        {
            peer.last_seen = std::time::Instant::now();
        }
    }

    /// Offer an item to every peer of the current host session
    ///
    /// `send` is called once per peer holding outbound queues. Peers whose
    /// writer is gone are removed under the same lock. Returns `None` when no
    /// host session for `live_match_id` is accepting traffic.
    pub fn fan_out<F>(&self, live_match_id: &str, mut send: F) -> Option<FanOut>
    where
        F: FnMut(&PeerOutbound) -> Delivery,
    {
        let mut inner = self.inner.lock();

        let entry = inner.current.as_mut().filter(|e| {
            e.state.role == Role::Host
                && e.accepts_traffic()
                && e.state.info.live_match_id == live_match_id
        })?;

        let mut result = FanOut::default();

        for (id, peer) in entry.peers.iter() {
            let Some(ref outbound) = peer.outbound else {
                continue;
            };
            match send(outbound) {
                Delivery::Queued => result.queued += 1,
                Delivery::Full => result.full += 1,
                Delivery::Closed => result.closed.push(*id),
            }
        }

        for id in &result.closed {
            if let Some(peer) = entry.peers.remove(id) {
                peer.close.cancel();
                tracing::debug!(peer_id = id, peer = %peer.addr, "Removed closed peer during fan-out");
            }
        }

        Some(result)
    }

    /// Current phase (`Idle` when nothing is registered)
    pub fn phase(&self) -> SessionPhase {
        self.inner
            .lock()
            .current
            .as_ref()
            .map(|e| e.state.phase)
            .unwrap_or(SessionPhase::Idle)
    }

    /// Whether `handle` still names the registered session
    pub fn is_current(&self, handle: &SessionHandle) -> bool {
        self.inner.lock().current_for(handle).is_some()
    }

    /// Snapshot of the registered session
    pub fn current(&self) -> Option<SessionSnapshot> {
        self.inner.lock().current.as_ref().map(SessionEntry::snapshot)
    }

    /// Handle of the registered session
    pub fn current_handle(&self) -> Option<SessionHandle> {
        self.inner.lock().current.as_ref().map(SessionEntry::handle)
    }

    /// Final state of the most recently retired session
    pub fn last_session(&self) -> Option<SessionState> {
        self.inner.lock().last.clone()
    }

    /// Reason the session behind `handle` failed on its own
    ///
    /// `None` while it is still registered, when a newer session has been
    /// retired since, or when a stop cancelled it during start.
    pub fn failure(&self, handle: &SessionHandle) -> Option<String> {
        self.inner
            .lock()
            .last
            .as_ref()
            .filter(|s| s.id == handle.id())
            .and_then(|s| s.failure.clone())
            .filter(|reason| reason != STOPPED_WHILE_STARTING)
    }

    /// Recorded transitions, oldest first
    pub fn journal(&self) -> Vec<Transition> {
        self.inner.lock().journal.iter().copied().collect()
    }

    /// Peers of the registered session
    pub fn peers(&self) -> Vec<PeerInfo> {
        self.current().map(|s| s.peers).unwrap_or_default()
    }

    /// Number of peers of the registered session
    pub fn peer_count(&self) -> usize {
        self.inner
            .lock()
            .current
            .as_ref()
            .map(SessionEntry::peer_count)
            .unwrap_or(0)
    }
}

impl Default for SessionRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use bytes::Bytes;

    use super::*;
    use crate::bus::Event;
    use crate::pipeline::StreamFrame;

    fn host_info() -> MatchInfo {
        MatchInfo::new("L1", "M1", "LM1")
    }

    fn addr(port: u16) -> SocketAddr {
        SocketAddr::from(([127, 0, 0, 1], port))
    }

    fn assert_journal_legal(registry: &SessionRegistry) {
        for t in registry.journal() {
            assert!(
                t.from.can_transition_to(t.to),
                "illegal transition {:?} -> {:?}",
                t.from,
                t.to
            );
        }
    }

    #[test]
    fn test_single_active_session() {
        let registry = SessionRegistry::new();

        let handle = registry.begin(Role::Host, host_info()).unwrap();
        registry.activate(&handle).unwrap();

        // Can't start another session of either role
        assert_eq!(
            registry.begin(Role::Host, host_info()),
            Err(RegistryError::AlreadyActive)
        );
        assert_eq!(
            registry.begin(Role::Viewer, MatchInfo::viewer("LM2")),
            Err(RegistryError::AlreadyActive)
        );

        let current = registry.current().unwrap();
        assert_eq!(current.id, handle.id());
        assert_eq!(current.phase, SessionPhase::Active);
    }

    #[test]
    fn test_stop_lifecycle() {
        let registry = SessionRegistry::new();
        let handle = registry.begin(Role::Host, host_info()).unwrap();
        registry.activate(&handle).unwrap();

        match registry.begin_stop(Role::Host, "LM1") {
            StopOutcome::Stopping { handle: h, .. } => assert_eq!(h, handle),
            other => panic!("unexpected {:?}", other),
        }
        assert_eq!(registry.phase(), SessionPhase::Stopping);
        assert!(handle.is_cancelled());

        // A new start is still rejected while stopping
        assert!(registry.begin(Role::Host, host_info()).is_err());

        assert!(registry.finish_stop(&handle));
        assert_eq!(registry.phase(), SessionPhase::Idle);
        assert_eq!(
            registry.last_session().unwrap().history,
            vec![
                SessionPhase::Idle,
                SessionPhase::Starting,
                SessionPhase::Active,
                SessionPhase::Stopping,
                SessionPhase::Stopped,
            ]
        );
        assert_journal_legal(&registry);
    }

    #[test]
    fn test_stop_is_idempotent() {
        let registry = SessionRegistry::new();

        assert!(matches!(
            registry.begin_stop(Role::Host, "LM1"),
            StopOutcome::NotRunning
        ));

        let handle = registry.begin(Role::Host, host_info()).unwrap();
        registry.activate(&handle).unwrap();

        // Wrong id or role leaves the session alone
        assert!(matches!(
            registry.begin_stop(Role::Host, "LM9"),
            StopOutcome::NotRunning
        ));
        assert!(matches!(
            registry.begin_stop(Role::Viewer, "LM1"),
            StopOutcome::NotRunning
        ));
        assert_eq!(registry.phase(), SessionPhase::Active);

        assert!(matches!(
            registry.begin_stop(Role::Host, "LM1"),
            StopOutcome::Stopping { .. }
        ));
        // Second stop while the first is in progress
        assert!(matches!(
            registry.begin_stop(Role::Host, "LM1"),
            StopOutcome::NotRunning
        ));
        assert!(registry.finish_stop(&handle));
        assert!(!registry.finish_stop(&handle));
    }

    #[test]
    fn test_stop_while_starting_cancels() {
        let registry = SessionRegistry::new();
        let handle = registry.begin(Role::Viewer, MatchInfo::viewer("LM1")).unwrap();

        assert!(matches!(
            registry.begin_stop(Role::Viewer, "LM1"),
            StopOutcome::Cancelled(_)
        ));
        assert!(handle.is_cancelled());
        assert_eq!(registry.phase(), SessionPhase::Idle);

        // The pending join can no longer activate
        assert_eq!(
            registry.activate(&handle),
            Err(RegistryError::StaleHandle(handle.id()))
        );
        assert_journal_legal(&registry);
    }

    #[test]
    fn test_failure_reason_of_retired_session() {
        let registry = SessionRegistry::new();
        let handle = registry.begin(Role::Viewer, MatchInfo::viewer("LM1")).unwrap();
        assert_eq!(registry.failure(&handle), None);

        assert!(registry.fail(&handle, "connection reset by host"));
        assert_eq!(registry.failure(&handle).as_deref(), Some("connection reset by host"));

        // A cancelled start is not a failure of its own
        let next = registry.begin(Role::Viewer, MatchInfo::viewer("LM2")).unwrap();
        assert_eq!(registry.failure(&handle), None);
        registry.begin_stop(Role::Viewer, "LM2");
        assert_eq!(registry.failure(&next), None);
    }

    #[test]
    fn test_failed_start_returns_to_idle() {
        let registry = SessionRegistry::new();
        let handle = registry.begin(Role::Viewer, MatchInfo::viewer("LM2")).unwrap();

        assert!(registry.fail(&handle, "discovery timeout"));
        assert_eq!(registry.phase(), SessionPhase::Idle);
        assert!(!registry.fail(&handle, "again"));

        let last = registry.last_session().unwrap();
        assert_eq!(last.phase, SessionPhase::Failed);
        assert_eq!(last.failure.as_deref(), Some("discovery timeout"));

        // A fresh session may start
        assert!(registry.begin(Role::Viewer, MatchInfo::viewer("LM2")).is_ok());
    }

    #[test]
    fn test_peer_limit_and_admission() {
        let registry = SessionRegistry::new();
        let handle = registry.begin(Role::Host, host_info()).unwrap();
        registry.activate(&handle).unwrap();

        assert_eq!(registry.admission(&handle, 1), Admission::Open);
        registry.add_peer(&handle, addr(5000), None, 1).unwrap();
        assert_eq!(registry.admission(&handle, 1), Admission::Full);
        assert_eq!(
            registry.add_peer(&handle, addr(5001), None, 1),
            Err(RegistryError::PeerLimit(1))
        );

        // Unlimited
        assert!(registry.add_peer(&handle, addr(5001), None, 0).is_ok());
        assert_eq!(registry.peer_count(), 2);
    }

    #[test]
    fn test_remove_peer_cancels_its_token() {
        let registry = SessionRegistry::new();
        let handle = registry.begin(Role::Host, host_info()).unwrap();
        let (id, close) = registry.add_peer(&handle, addr(5000), None, 0).unwrap();

        let removed = registry.remove_peer(&handle, id).unwrap();
        assert_eq!(removed.addr, addr(5000));
        assert!(close.is_cancelled());
        assert!(registry.remove_peer(&handle, id).is_none());
        assert_eq!(registry.phase(), SessionPhase::Starting);
    }

    #[tokio::test]
    async fn test_fan_out_removes_closed_peers() {
        let registry = SessionRegistry::new();
        let handle = registry.begin(Role::Host, host_info()).unwrap();
        registry.activate(&handle).unwrap();

        let (alive, mut alive_queues) = PeerOutbound::channel(4, 2);
        let (dead, dead_queues) = PeerOutbound::channel(4, 2);
        registry.add_peer(&handle, addr(5000), Some(alive), 0).unwrap();
        let (dead_id, _) = registry.add_peer(&handle, addr(5001), Some(dead), 0).unwrap();
        drop(dead_queues);

        let event = Arc::new(Event::new("LM1"));
        let result = registry
            .fan_out("LM1", |out| out.try_event(Arc::clone(&event)))
            .unwrap();

        assert_eq!(result.queued, 1);
        assert_eq!(result.closed, vec![dead_id]);
        assert_eq!(registry.peer_count(), 1);
        assert!(alive_queues.events.recv().await.is_some());
    }

    #[test]
    fn test_fan_out_requires_active_host() {
        let registry = SessionRegistry::new();
        let frame = StreamFrame::video(0, Bytes::from_static(&[0]), true);

        assert!(registry.fan_out("LM1", |o| o.try_frame(frame.clone())).is_none());

        let handle = registry.begin(Role::Viewer, MatchInfo::viewer("LM1")).unwrap();
        registry.activate(&handle).unwrap();
        assert!(registry.fan_out("LM1", |o| o.try_frame(frame.clone())).is_none());
    }

    #[test]
    fn test_random_start_stop_sequences_stay_legal() {
        let registry = SessionRegistry::new();
        let mut seed: u64 = 0x5eed;

        for _ in 0..500 {
            seed = seed.wrapping_mul(6364136223846793005).wrapping_add(1);
            match (seed >> 33) % 5 {
                0 => {
                    let _ = registry.begin(Role::Host, host_info());
                }
                1 => {
                    if let Some(h) = registry.current_handle() {
                        let _ = registry.activate(&h);
                    }
                }
                2 => {
                    if let StopOutcome::Stopping { handle, .. } =
                        registry.begin_stop(Role::Host, "LM1")
                    {
                        registry.finish_stop(&handle);
                    }
                }
                3 => {
                    if let Some(h) = registry.current_handle() {
                        registry.fail(&h, "transport");
                    }
                }
                _ => {
                    let _ = registry.begin_stop(Role::Host, "LM1");
                }
            }
        }

        assert!(!registry.journal().is_empty());
        assert_journal_legal(&registry);
    }
}
