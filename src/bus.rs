use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::mpsc::{self, Receiver, SyncSender, TrySendError};
use std::sync::Mutex;

use tracing::{debug, warn};

/// Fan-out channel for ingestion events.
///
/// Every subscriber gets its own bounded queue. Publishing never blocks:
/// a subscriber whose queue is full misses that event, and subscribers
/// that dropped their receiver are pruned on the next publish.
pub struct NotificationBus<E> {
    subscribers: Mutex<Vec<SyncSender<E>>>,
    capacity: usize,
    stats: BusStats,
}

#[derive(Debug, Default)]
pub struct BusStats {
    published: AtomicU64,
    delivered: AtomicU64,
    dropped: AtomicU64,
}

impl BusStats {
    pub fn published(&self) -> u64 {
        self.published.load(Ordering::Relaxed)
    }

    pub fn delivered(&self) -> u64 {
        self.delivered.load(Ordering::Relaxed)
    }

    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }
}

impl<E: Clone + Send> NotificationBus<E> {
    pub fn new(capacity: usize) -> Self {
        Self {
            subscribers: Mutex::new(Vec::new()),
            capacity: capacity.max(1),
            stats: BusStats::default(),
        }
    }

    /// Receives every event published after this call.
    pub fn subscribe(&self) -> Receiver<E> {
        let (sender, receiver) = mpsc::sync_channel(self.capacity);
        if let Ok(mut subscribers) = self.subscribers.lock() {
            subscribers.push(sender);
        }
        receiver
    }

    /// Returns the number of subscribers the event reached.
    pub fn publish(&self, event: E) -> usize {
        self.stats.published.fetch_add(1, Ordering::Relaxed);
        let Ok(mut subscribers) = self.subscribers.lock() else {
            warn!("notification bus lock poisoned; event discarded");
            return 0;
        };
        let mut delivered = 0usize;
        subscribers.retain(|subscriber| match subscriber.try_send(event.clone()) {
            Ok(()) => {
                delivered += 1;
                true
            }
            Err(TrySendError::Full(_)) => {
                self.stats.dropped.fetch_add(1, Ordering::Relaxed);
                debug!("subscriber queue full; event dropped");
                true
            }
            Err(TrySendError::Disconnected(_)) => false,
        });
        self.stats
            .delivered
            .fetch_add(delivered as u64, Ordering::Relaxed);
        delivered
    }

    pub fn subscriber_count(&self) -> usize {
        self.subscribers
            .lock()
            .map(|subscribers| subscribers.len())
            .unwrap_or(0)
    }

    /// Drops every subscriber sender so receivers observe disconnection.
    pub fn close(&self) {
        if let Ok(mut subscribers) = self.subscribers.lock() {
            subscribers.clear();
        }
    }

    pub fn stats(&self) -> &BusStats {
        &self.stats
    }
}
