//! Event broadcast bus
//!
//! Host side: `publish` offers an event to every connected viewer's outbound
//! event queue. Viewer side: events read off the data channel are delivered
//! in arrival order to the registered consumer.

use std::sync::Arc;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::registry::SessionRegistry;
use crate::stats::SessionCounters;

use super::consumer::{spawn_delivery, ConsumerSlot};
use super::event::Event;

/// Result of a host-side publish
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PublishReport {
    /// Whether a host session for the event's live match was running
    pub session_active: bool,
    /// Viewers the event was queued for
    pub queued: usize,
    /// Viewers that missed it because their queue was full
    pub dropped: usize,
    /// Viewers found disconnected (and removed)
    pub lost: usize,
}

/// Fan-out of application events
pub struct EventBus {
    registry: Arc<SessionRegistry>,
    counters: Arc<SessionCounters>,
    consumer: ConsumerSlot<Event>,
}

impl EventBus {
    pub fn new(registry: Arc<SessionRegistry>, counters: Arc<SessionCounters>) -> Self {
        Self {
            registry,
            counters,
            consumer: ConsumerSlot::new(),
        }
    }

    /// Deliver `event` to every viewer of the current host session
    ///
    /// Never blocks and never fails: with no matching session this is a
    /// no-op, and a slow or dead viewer only affects itself.
    pub fn publish(&self, event: Event) -> PublishReport {
        let event = Arc::new(event);

        let Some(result) = self
            .registry
            .fan_out(&event.live_match_id, |out| out.try_event(Arc::clone(&event)))
        else {
            tracing::debug!(
                live_match_id = %event.live_match_id,
                "No active host session, event dropped"
            );
            return PublishReport::default();
        };

        self.counters.event_published();
        self.counters.events_delivered(result.queued);
        self.counters.events_dropped(result.full);
        self.counters.peers_lost(result.closed.len());

        if result.full > 0 {
            tracing::warn!(
                live_match_id = %event.live_match_id,
                viewers = result.full,
                "Event queue full, event dropped for slow viewers"
            );
        }

        tracing::trace!(
            live_match_id = %event.live_match_id,
            event_type = ?event.event_type(),
            queued = result.queued,
            "Event published"
        );

        PublishReport {
            session_active: true,
            queued: result.queued,
            dropped: result.full,
            lost: result.closed.len(),
        }
    }

    /// Register the viewer-side consumer, replacing any previous one
    pub fn set_consumer<F>(&self, consumer: F)
    where
        F: Fn(Event) + Send + Sync + 'static,
    {
        self.consumer.set(consumer);
    }

    /// Remove the viewer-side consumer; later events are dropped
    pub fn clear_consumer(&self) {
        self.consumer.clear();
    }

    /// Start viewer-side delivery
    ///
    /// Returns the sender the connection task feeds and the delivery task.
    /// The queue is bounded by `depth`, so a stalled consumer backs up into
    /// the socket instead of growing memory.
    pub fn spawn_inbound(
        &self,
        depth: usize,
        cancel: CancellationToken,
    ) -> (mpsc::Sender<Event>, JoinHandle<()>) {
        let (tx, rx) = mpsc::channel(depth.max(1));
        let counters = Arc::clone(&self.counters);

        let task = spawn_delivery(rx, self.consumer.clone(), cancel, move |delivered| {
            if delivered {
                counters.events_delivered(1);
            } else {
                counters.events_dropped(1);
            }
        });

        (tx, task)
    }
}
