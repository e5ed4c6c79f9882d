//! Consumer registration and ordered delivery
//!
//! Viewers hand incoming events and frames to an application callback. The
//! connection task pushes into a bounded queue; a delivery task drains it in
//! arrival order and calls whatever consumer is registered at that moment.
//! Items that find no consumer are dropped.

use std::sync::Arc;

use parking_lot::RwLock;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

/// Consumer callback
pub type Callback<T> = Arc<dyn Fn(T) + Send + Sync>;

/// Slot holding the currently registered consumer
pub struct ConsumerSlot<T> {
    inner: Arc<RwLock<Option<Callback<T>>>>,
}

impl<T> ConsumerSlot<T> {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(RwLock::new(None)),
        }
    }

    /// Register a consumer, replacing any previous one
    pub fn set<F>(&self, consumer: F)
    where
        F: Fn(T) + Send + Sync + 'static,
    {
        *self.inner.write() = Some(Arc::new(consumer));
    }

    /// Tear down the consumer; later items are discarded
    pub fn clear(&self) {
        *self.inner.write() = None;
    }

    pub fn is_set(&self) -> bool {
        self.inner.read().is_some()
    }

    /// Hand `item` to the consumer
    ///
    /// The callback runs outside the lock, so it may itself set or clear the
    /// slot. Returns false when no consumer is registered.
    pub fn deliver(&self, item: T) -> bool {
        let consumer = self.inner.read().clone();
        match consumer {
            Some(callback) => {
                callback(item);
                true
            }
            None => false,
        }
    }
}

impl<T> Clone for ConsumerSlot<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<T> Default for ConsumerSlot<T> {
    fn default() -> Self {
        Self::new()
    }
}

/// Spawn the task that drains `rx` into `slot` until cancelled
///
/// `report` is told, per item, whether a consumer took it.
pub fn spawn_delivery<T, R>(
    mut rx: mpsc::Receiver<T>,
    slot: ConsumerSlot<T>,
    cancel: CancellationToken,
    report: R,
) -> JoinHandle<()>
where
    T: Send + 'static,
    R: Fn(bool) + Send + 'static,
{
    tokio::spawn(async move {
        loop {
            let item = tokio::select! {
                biased;
                () = cancel.cancelled() => break,
                item = rx.recv() => match item {
                    Some(item) => item,
                    None => break,
                },
            };

            // A stop may race with a queued item; never deliver past teardown
            if cancel.is_cancelled() {
                break;
            }
            report(slot.deliver(item));
        }
    })
}
