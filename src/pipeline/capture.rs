//! Capture sources
//!
//! The platform (screen recorder, camera) produces frames at its own rate and
//! pushes them into a [`FrameSink`]. Pushing never waits on the network.

use std::sync::Arc;

use tokio::sync::{mpsc, Mutex};
use tokio_util::sync::CancellationToken;

use crate::error::Result;

use super::forwarder::FrameSink;
use super::frame::StreamFrame;

/// A platform media source driven by the host session
pub trait CaptureSource: Send {
    /// Begin producing frames into `sink`
    fn start(&mut self, sink: FrameSink) -> Result<()>;

    /// Stop producing frames; must be safe to call when not started
    fn stop(&mut self);

    /// Name for logging
    fn name(&self) -> &str {
        "capture"
    }
}

/// Source that never produces frames (event-only sessions)
#[derive(Debug, Default)]
pub struct NullCapture;

impl CaptureSource for NullCapture {
    fn start(&mut self, _sink: FrameSink) -> Result<()> {
        Ok(())
    }

    fn stop(&mut self) {}

    fn name(&self) -> &str {
        "null"
    }
}

/// Source fed through a channel by code outside the session
///
/// The paired [`CaptureFeed`] may be handed to a platform callback; frames
/// sent while no session is running are discarded.
pub struct ChannelCapture {
    rx: Arc<Mutex<mpsc::Receiver<StreamFrame>>>,
    running: Option<CancellationToken>,
}

/// Producer half of a [`ChannelCapture`]
#[derive(Debug, Clone)]
pub struct CaptureFeed {
    tx: mpsc::Sender<StreamFrame>,
}

impl CaptureFeed {
    /// Push a frame without waiting; returns false if it was dropped
    pub fn push(&self, frame: StreamFrame) -> bool {
        self.tx.try_send(frame).is_ok()
    }
}

impl ChannelCapture {
    /// Create a source with a feed queue of `depth` frames
    pub fn new(depth: usize) -> (Self, CaptureFeed) {
        let (tx, rx) = mpsc::channel(depth.max(1));
        (
            Self {
                rx: Arc::new(Mutex::new(rx)),
                running: None,
            },
            CaptureFeed { tx },
        )
    }
}

impl CaptureSource for ChannelCapture {
    fn start(&mut self, sink: FrameSink) -> Result<()> {
        self.stop();

        let cancel = CancellationToken::new();
        let token = cancel.clone();
        let rx = Arc::clone(&self.rx);

        tokio::spawn(async move {
            // Held for the life of this capture run; a restart waits for it
            let mut rx = rx.lock_owned().await;

            // Discard anything fed while no session was running
            while rx.try_recv().is_ok() {}

            loop {
                let frame = tokio::select! {
                    biased;
                    () = token.cancelled() => break,
                    frame = rx.recv() => match frame {
                        Some(frame) => frame,
                        None => break,
                    },
                };

                if !sink.push(frame) {
                    tracing::debug!("Capture sink closed, stopping capture task");
                    break;
                }
            }
        });

        self.running = Some(cancel);
        Ok(())
    }

    fn stop(&mut self) {
        if let Some(cancel) = self.running.take() {
            cancel.cancel();
        }
    }

    fn name(&self) -> &str {
        "channel"
    }
}

impl Drop for ChannelCapture {
    fn drop(&mut self) {
        self.stop();
    }
}

#[cfg(test)]
mod tests {
    use std::net::SocketAddr;

    use bytes::Bytes;

    use super::*;
    use crate::pipeline::StreamForwarder;
    use crate::registry::SessionRegistry;
    use crate::session::{MatchInfo, PeerOutbound, Role};
    use crate::stats::SessionCounters;

    #[tokio::test]
    async fn test_channel_capture_forwards_to_peers() {
        let registry = Arc::new(SessionRegistry::new());
        let handle = registry
            .begin(Role::Host, MatchInfo::new("L1", "M1", "LM1"))
            .unwrap();
        registry.activate(&handle).unwrap();
        let (outbound, mut queues) = PeerOutbound::channel(4, 4);
        registry
            .add_peer(&handle, SocketAddr::from(([127, 0, 0, 1], 8000)), Some(outbound), 0)
            .unwrap();

        let forwarder = Arc::new(StreamForwarder::new(
            Arc::clone(&registry),
            Arc::new(SessionCounters::new()),
            "LM1",
        ));

        let (mut capture, feed) = ChannelCapture::new(8);
        capture.start(FrameSink::new(forwarder)).unwrap();

        // Give the capture task a chance to take the receiver
        tokio::task::yield_now().await;
        assert!(feed.push(StreamFrame::video(33, Bytes::from_static(&[1]), true)));

        let received = queues.frames.recv().await.unwrap();
        assert_eq!(received.timestamp, 33);

        capture.stop();
        capture.stop();
    }

    #[test]
    fn test_null_capture_is_inert() {
        let mut capture = NullCapture;
        capture.stop();
        assert_eq!(capture.name(), "null");
    }
}
