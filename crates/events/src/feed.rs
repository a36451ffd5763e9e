//! Bounded multi-subscriber broadcast feed.
//!
//! Every subscription owns an independent bounded queue. Publishing never
//! blocks: a subscriber that falls behind until its queue fills is dropped
//! from the feed and its subscription reports closed. Delivery is FIFO per
//! subscription, at-least-once to each live subscription.

use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, warn};

/// Default per-subscription queue capacity.
pub const DEFAULT_SUBSCRIPTION_CAPACITY: usize = 64;

/// Events that can be routed by topic.
pub trait Topical {
    /// Topic key type.
    type Topic: Copy + Eq + std::hash::Hash + Send + Sync + 'static;

    /// Topic of this event instance.
    fn topic(&self) -> Self::Topic;
}

type Filter<T> = Box<dyn Fn(&T) -> bool + Send + Sync>;

struct SubEntry<T> {
    tx: mpsc::Sender<T>,
    closed: Arc<AtomicBool>,
    filter: Option<Filter<T>>,
}

struct Shared<T> {
    subs: Mutex<Vec<SubEntry<T>>>,
    closed: AtomicBool,
    overflow_drops: AtomicU64,
}

/// A multi-subscriber broadcast feed.
pub struct Feed<T> {
    shared: Arc<Shared<T>>,
    capacity: usize,
}

impl<T> Clone for Feed<T> {
    fn clone(&self) -> Self {
        Self {
            shared: Arc::clone(&self.shared),
            capacity: self.capacity,
        }
    }
}

impl<T: Clone> Default for Feed<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: Clone> Feed<T> {
    /// Create a feed with the default per-subscription capacity.
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_SUBSCRIPTION_CAPACITY)
    }

    /// Create a feed whose subscriptions each buffer up to `capacity` events.
    pub fn with_capacity(capacity: usize) -> Self {
        assert!(capacity > 0, "subscription capacity must be positive");
        Self {
            shared: Arc::new(Shared {
                subs: Mutex::new(Vec::new()),
                closed: AtomicBool::new(false),
                overflow_drops: AtomicU64::new(0),
            }),
            capacity,
        }
    }

    /// Subscribe to every event published after this call.
    pub fn subscribe(&self) -> Subscription<T> {
        self.subscribe_inner(None)
    }

    /// Publish an event to all live subscriptions.
    ///
    /// Returns the number of subscriptions the event was delivered to. A
    /// subscription whose queue is full is closed and removed; the publisher
    /// is never blocked.
    pub fn publish(&self, event: T) -> usize {
        if self.shared.closed.load(Ordering::Acquire) {
            return 0;
        }
        let mut delivered = 0;
        let mut subs = self.shared.subs.lock();
        subs.retain(|entry| {
            if entry.closed.load(Ordering::Acquire) {
                return false;
            }
            if let Some(filter) = &entry.filter {
                if !filter(&event) {
                    return true;
                }
            }
            match entry.tx.try_send(event.clone()) {
                Ok(()) => {
                    delivered += 1;
                    true
                }
                Err(mpsc::error::TrySendError::Full(_)) => {
                    // Slow subscriber: drop it rather than stall the publisher.
                    entry.closed.store(true, Ordering::Release);
                    self.shared.overflow_drops.fetch_add(1, Ordering::Relaxed);
                    warn!("Dropping feed subscription on overflow");
                    false
                }
                Err(mpsc::error::TrySendError::Closed(_)) => false,
            }
        });
        delivered
    }

    /// Close the feed: all subscriptions end after draining buffered events.
    pub fn close(&self) {
        self.shared.closed.store(true, Ordering::Release);
        let mut subs = self.shared.subs.lock();
        for entry in subs.drain(..) {
            entry.closed.store(true, Ordering::Release);
            // Dropping the sender ends the receiver after its buffer drains.
        }
        debug!("Feed closed");
    }

    /// Whether [`close`](Self::close) has been called.
    pub fn is_closed(&self) -> bool {
        self.shared.closed.load(Ordering::Acquire)
    }

    /// Number of live subscriptions.
    pub fn subscriber_count(&self) -> usize {
        self.shared.subs.lock().len()
    }

    /// Total subscriptions dropped because their queue overflowed.
    pub fn overflow_drops(&self) -> u64 {
        self.shared.overflow_drops.load(Ordering::Relaxed)
    }

    fn subscribe_inner(&self, filter: Option<Filter<T>>) -> Subscription<T> {
        let (tx, rx) = mpsc::channel(self.capacity);
        let closed = Arc::new(AtomicBool::new(false));
        if self.shared.closed.load(Ordering::Acquire) {
            // Subscribing to a closed feed yields an already-terminated
            // subscription rather than an error.
            closed.store(true, Ordering::Release);
            return Subscription { rx, closed };
        }
        self.shared.subs.lock().push(SubEntry {
            tx,
            closed: Arc::clone(&closed),
            filter,
        });
        Subscription { rx, closed }
    }
}

impl<T: Clone + Topical> Feed<T> {
    /// Subscribe to events whose topic is in `topics`.
    pub fn subscribe_topics(
        &self,
        topics: impl IntoIterator<Item = T::Topic>,
    ) -> Subscription<T> {
        let topics: std::collections::HashSet<T::Topic> = topics.into_iter().collect();
        self.subscribe_inner(Some(Box::new(move |event: &T| {
            topics.contains(&event.topic())
        })))
    }
}

/// Receiving half of a feed subscription.
pub struct Subscription<T> {
    rx: mpsc::Receiver<T>,
    closed: Arc<AtomicBool>,
}

impl<T> Subscription<T> {
    /// Receive the next event.
    ///
    /// Returns `None` once the subscription has terminated (unsubscribe,
    /// feed close, or overflow drop) and its buffer is drained.
    pub async fn recv(&mut self) -> Option<T> {
        self.rx.recv().await
    }

    /// Non-blocking receive, for draining in tests and shutdown paths.
    pub fn try_recv(&mut self) -> Option<T> {
        self.rx.try_recv().ok()
    }

    /// Stop receiving. Idempotent; already-buffered events remain readable.
    pub fn unsubscribe(&mut self) {
        self.closed.store(true, Ordering::Release);
        self.rx.close();
    }

    /// Whether this subscription has terminated.
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }
}
