//! Frame forwarding
//!
//! Host: every captured frame is offered to each viewer's bounded frame
//! queue. A full queue drops the newest frame for that viewer only, so a slow
//! viewer never stalls capture or the other viewers.
//!
//! Viewer: received frames pass through a bounded queue to the rendering
//! consumer, dropping the newest frame when the consumer falls behind.

use std::sync::Arc;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::bus::consumer::{spawn_delivery, ConsumerSlot};
use crate::protocol::constants::{DEFAULT_MAX_PACKET_SIZE, FRAME_HEADER_SIZE};
use crate::registry::{FanOut, SessionRegistry};
use crate::session::Delivery;
use crate::stats::SessionCounters;

use super::frame::StreamFrame;

/// Host-side fan-out of captured frames
pub struct StreamForwarder {
    registry: Arc<SessionRegistry>,
    counters: Arc<SessionCounters>,
    live_match_id: String,
    max_frame_len: usize,
}

impl StreamForwarder {
    pub fn new(
        registry: Arc<SessionRegistry>,
        counters: Arc<SessionCounters>,
        live_match_id: impl Into<String>,
    ) -> Self {
        Self {
            registry,
            counters,
            live_match_id: live_match_id.into(),
            max_frame_len: DEFAULT_MAX_PACKET_SIZE - FRAME_HEADER_SIZE,
        }
    }

    /// Limit frames to what fits in one data channel packet
    pub fn max_packet_size(mut self, size: usize) -> Self {
        self.max_frame_len = size.saturating_sub(FRAME_HEADER_SIZE);
        self
    }

    pub fn live_match_id(&self) -> &str {
        &self.live_match_id
    }

    /// Offer `frame` to every viewer without blocking
    ///
    /// Returns `None` once the session is no longer accepting traffic.
    /// A frame too large for one packet is dropped for every viewer.
    pub fn forward(&self, frame: StreamFrame) -> Option<FanOut> {
        if frame.data.len() > self.max_frame_len {
            let result = self.registry.fan_out(&self.live_match_id, |_| Delivery::Full)?;

            self.counters.frame_captured();
            self.counters.frames_dropped(result.full);
            tracing::warn!(
                live_match_id = %self.live_match_id,
                timestamp = frame.timestamp,
                size = frame.data.len(),
                max = self.max_frame_len,
                "Frame exceeds packet size, dropped"
            );
            return Some(result);
        }

        let result = self
            .registry
            .fan_out(&self.live_match_id, |out| out.try_frame(frame.clone()))?;

        self.counters.frame_captured();
        self.counters.frames_forwarded(result.queued);
        self.counters.frames_dropped(result.full);
        self.counters.peers_lost(result.closed.len());

        if result.full > 0 {
            tracing::debug!(
                live_match_id = %self.live_match_id,
                timestamp = frame.timestamp,
                viewers = result.full,
                "Frame queue full, newest frame dropped"
            );
        }

        Some(result)
    }
}

/// Cloneable handle a capture source pushes frames into
#[derive(Clone)]
pub struct FrameSink {
    forwarder: Arc<StreamForwarder>,
}

impl FrameSink {
    pub fn new(forwarder: Arc<StreamForwarder>) -> Self {
        Self { forwarder }
    }

    /// Push a captured frame; returns false once the session has ended
    pub fn push(&self, frame: StreamFrame) -> bool {
        self.forwarder.forward(frame).is_some()
    }
}

/// Viewer-side hand-off of received frames to the renderer
pub struct FrameDispatcher {
    counters: Arc<SessionCounters>,
    consumer: ConsumerSlot<StreamFrame>,
}

impl FrameDispatcher {
    pub fn new(counters: Arc<SessionCounters>) -> Self {
        Self {
            counters,
            consumer: ConsumerSlot::new(),
        }
    }

    /// Register the rendering consumer, replacing any previous one
    pub fn set_consumer<F>(&self, consumer: F)
    where
        F: Fn(StreamFrame) + Send + Sync + 'static,
    {
        self.consumer.set(consumer);
    }

    /// Tear down the consumer; frames arriving afterwards are discarded
    pub fn clear_consumer(&self) {
        self.consumer.clear();
    }

    /// Start delivery to the consumer
    pub fn spawn_inbound(&self, depth: usize, cancel: CancellationToken) -> (InboundFrames, JoinHandle<()>) {
        let (tx, rx) = mpsc::channel(depth.max(1));
        let counters = Arc::clone(&self.counters);

        let task = spawn_delivery(rx, self.consumer.clone(), cancel, move |delivered| {
            if delivered {
                counters.frame_rendered();
            } else {
                counters.frames_dropped(1);
            }
        });

        let inbound = InboundFrames {
            tx,
            counters: Arc::clone(&self.counters),
        };
        (inbound, task)
    }
}

/// Sender the viewer's connection task feeds received frames into
#[derive(Clone)]
pub struct InboundFrames {
    tx: mpsc::Sender<StreamFrame>,
    counters: Arc<SessionCounters>,
}

impl InboundFrames {
    /// Queue a received frame, dropping it if the renderer is behind
    pub fn offer(&self, frame: StreamFrame) -> bool {
        self.counters.frame_received();
        match self.tx.try_send(frame) {
            Ok(()) => true,
            Err(_) => {
                self.counters.frames_dropped(1);
                false
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::net::SocketAddr;

    use bytes::Bytes;
    use parking_lot::Mutex;

    use super::*;
    use crate::session::{MatchInfo, PeerOutbound, Role};

    fn frame(ts: u32) -> StreamFrame {
        StreamFrame::video(ts, Bytes::from_static(&[0x17, 0x01]), ts == 0)
    }

    #[tokio::test]
    async fn test_full_queue_drops_newest_for_that_peer_only() {
        let registry = Arc::new(SessionRegistry::new());
        let counters = Arc::new(SessionCounters::new());
        let handle = registry
            .begin(Role::Host, MatchInfo::new("L1", "M1", "LM1"))
            .unwrap();
        registry.activate(&handle).unwrap();

        let (slow, mut slow_q) = PeerOutbound::channel(4, 2);
        let (fast, mut fast_q) = PeerOutbound::channel(4, 8);
        registry
            .add_peer(&handle, SocketAddr::from(([127, 0, 0, 1], 7000)), Some(slow), 0)
            .unwrap();
        registry
            .add_peer(&handle, SocketAddr::from(([127, 0, 0, 1], 7001)), Some(fast), 0)
            .unwrap();

        let forwarder = StreamForwarder::new(Arc::clone(&registry), Arc::clone(&counters), "LM1");
        for ts in 0..4 {
            // Never blocks even though the slow viewer is not draining
            forwarder.forward(frame(ts)).unwrap();
        }

        // Slow viewer kept the two oldest frames
        assert_eq!(slow_q.frames.recv().await.unwrap().timestamp, 0);
        assert_eq!(slow_q.frames.recv().await.unwrap().timestamp, 1);
        assert!(slow_q.frames.try_recv().is_err());

        // Fast viewer got everything
        for ts in 0..4 {
            assert_eq!(fast_q.frames.recv().await.unwrap().timestamp, ts);
        }

        let stats = counters.snapshot();
        assert_eq!(stats.frames_captured, 4);
        assert_eq!(stats.frames_forwarded, 6);
        assert_eq!(stats.frames_dropped, 2);
    }

    #[tokio::test]
    async fn test_oversized_frame_dropped_without_touching_viewers() {
        let registry = Arc::new(SessionRegistry::new());
        let counters = Arc::new(SessionCounters::new());
        let handle = registry
            .begin(Role::Host, MatchInfo::new("L1", "M1", "LM1"))
            .unwrap();
        registry.activate(&handle).unwrap();

        let (outbound, mut queues) = PeerOutbound::channel(4, 4);
        registry
            .add_peer(&handle, SocketAddr::from(([127, 0, 0, 1], 7000)), Some(outbound), 0)
            .unwrap();

        let forwarder = StreamForwarder::new(Arc::clone(&registry), Arc::clone(&counters), "LM1")
            .max_packet_size(64);

        let big = StreamFrame::video(0, Bytes::from(vec![0u8; 59]), true);
        let result = forwarder.forward(big).unwrap();
        assert_eq!(result.queued, 0);
        assert_eq!(result.full, 1);
        assert!(queues.frames.try_recv().is_err());

        // Exactly at the limit still goes through
        let fits = StreamFrame::video(33, Bytes::from(vec![0u8; 58]), false);
        assert_eq!(forwarder.forward(fits).unwrap().queued, 1);
        assert_eq!(queues.frames.recv().await.unwrap().timestamp, 33);

        assert_eq!(registry.peer_count(), 1);
        let stats = counters.snapshot();
        assert_eq!(stats.frames_captured, 2);
        assert_eq!(stats.frames_forwarded, 1);
        assert_eq!(stats.frames_dropped, 1);
    }

    #[test]
    fn test_sink_reports_ended_session() {
        let registry = Arc::new(SessionRegistry::new());
        let forwarder = Arc::new(StreamForwarder::new(
            registry,
            Arc::new(SessionCounters::new()),
            "LM1",
        ));
        let sink = FrameSink::new(forwarder);
        assert!(!sink.push(frame(0)));
    }

    #[tokio::test]
    async fn test_frames_after_teardown_discarded() {
        let counters = Arc::new(SessionCounters::new());
        let dispatcher = FrameDispatcher::new(Arc::clone(&counters));
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        dispatcher.set_consumer(move |f: StreamFrame| sink.lock().push(f.timestamp));

        let cancel = CancellationToken::new();
        let (inbound, task) = dispatcher.spawn_inbound(8, cancel.clone());
        assert!(inbound.offer(frame(0)));
        tokio::task::yield_now().await;
        while seen.lock().is_empty() {
            tokio::task::yield_now().await;
        }

        dispatcher.clear_consumer();
        assert!(inbound.offer(frame(1)));
        drop(inbound);
        task.await.unwrap();

        assert_eq!(*seen.lock(), vec![0]);
        let stats = counters.snapshot();
        assert_eq!(stats.frames_received, 2);
        assert_eq!(stats.frames_rendered, 1);
        assert_eq!(stats.frames_dropped, 1);
        // Host-side counters stay untouched on a viewer
        assert_eq!(stats.frames_captured, 0);
        assert_eq!(stats.frames_forwarded, 0);
    }
}
