//! Per-document fan-out of committed vertices to live subscribers.
//!
//! `notify` runs synchronously inside the writer's critical section, so every
//! subscriber sees commits in exactly the order they happened. A subscriber
//! whose callback returns `false` is dropped at the end of that pass and never
//! called again; there is no retry and no resume.
//!
//! Callbacks must not block. The server's callbacks only enqueue into a
//! bounded per-connection channel.

use crate::protocol::Vertex;

/// Delivery callback: returns `false` when the subscriber is gone.
pub type DeliveryFn = Box<dyn FnMut(&Vertex) -> bool + Send>;

/// Opaque subscriber identity issued by [`SubscriberHub::subscribe`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SubscriberToken(u64);

/// Delivery counters for monitoring.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct HubStats {
    pub delivered: u64,
    pub dropped: u64,
    pub active_subscribers: usize,
}

struct Subscriber {
    token: SubscriberToken,
    deliver: DeliveryFn,
}

/// Live subscribers of one document, in subscription order.
#[derive(Default)]
pub struct SubscriberHub {
    subscribers: Vec<Subscriber>,
    next_token: u64,
    delivered: u64,
    dropped: u64,
}

impl SubscriberHub {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a callback and return its token.
    pub fn subscribe(&mut self, deliver: DeliveryFn) -> SubscriberToken {
        let token = SubscriberToken(self.next_token);
        self.next_token += 1;
        self.subscribers.push(Subscriber { token, deliver });
        token
    }

    /// Remove a subscriber. Returns `false` if it was already gone.
    pub fn unsubscribe(&mut self, token: SubscriberToken) -> bool {
        let before = self.subscribers.len();
        self.subscribers.retain(|s| s.token != token);
        self.subscribers.len() != before
    }

    /// Deliver a committed vertex to every subscriber.
    ///
    /// Returns the number of successful deliveries.
    pub fn notify(&mut self, vertex: &Vertex) -> usize {
        let mut failed = Vec::new();
        let mut delivered = 0;

        for subscriber in self.subscribers.iter_mut() {
            if (subscriber.deliver)(vertex) {
                delivered += 1;
            } else {
                failed.push(subscriber.token);
            }
        }

        if !failed.is_empty() {
            self.subscribers.retain(|s| !failed.contains(&s.token));
            log::warn!(
                "Dropped {} subscriber(s) after failed delivery of {}",
                failed.len(),
                vertex.id
            );
        }

        self.delivered += delivered as u64;
        self.dropped += failed.len() as u64;
        delivered
    }

    pub fn len(&self) -> usize {
        self.subscribers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.subscribers.is_empty()
    }

    pub fn contains(&self, token: SubscriberToken) -> bool {
        self.subscribers.iter().any(|s| s.token == token)
    }

    pub fn stats(&self) -> HubStats {
        HubStats {
            delivered: self.delivered,
            dropped: self.dropped,
            active_subscribers: self.subscribers.len(),
        }
    }
}
