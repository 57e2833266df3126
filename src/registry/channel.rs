//! Channel state
//!
//! A channel is a named, ordered set of subscribers plus a delivery queue.
//! It knows nothing about the wire protocol.
//!
//! Events published to one channel are delivered strictly in the order they
//! were queued. Whichever publisher finds the queue idle drains it; anyone
//! publishing meanwhile (including a subscriber reacting from inside
//! `on_notify`) just queues and returns. No lock is held while a subscriber
//! runs.

use std::collections::{HashSet, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Instant;

use crate::protocol::{Value, Visibility};

use super::event::Event;
use super::subscriber::{Subscriber, SubscriberId};

struct ChannelInner {
    /// Subscribers in insertion order
    subscribers: Vec<Arc<dyn Subscriber>>,
    /// Membership index for `subscribers`
    ids: HashSet<SubscriberId>,
    /// Events waiting for delivery
    pending: VecDeque<Arc<Event>>,
    /// Some caller is currently draining `pending`
    draining: bool,
    /// Total events accepted
    published: u64,
}

/// A named fan-out group
pub struct Channel {
    name: String,
    inner: Mutex<ChannelInner>,
    created_at: Instant,
}

/// Point-in-time channel statistics
#[derive(Debug, Clone)]
pub struct ChannelStats {
    /// Number of current subscribers
    pub subscriber_count: usize,
    /// Events published since the channel was created
    pub published: u64,
    /// When the channel was created
    pub created_at: Instant,
}

impl Channel {
    /// Create an empty channel
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            inner: Mutex::new(ChannelInner {
                subscribers: Vec::new(),
                ids: HashSet::new(),
                pending: VecDeque::new(),
                draining: false,
                published: 0,
            }),
            created_at: Instant::now(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    fn lock(&self) -> MutexGuard<'_, ChannelInner> {
        // Subscriber callbacks never run under this lock, so a poisoned
        // guard still holds consistent state.
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Add a subscriber
    ///
    /// Returns false if it was already present; its position is unchanged.
    pub fn add_subscriber(&self, subscriber: Arc<dyn Subscriber>) -> bool {
        let mut inner = self.lock();
        if !inner.ids.insert(subscriber.id()) {
            return false;
        }
        inner.subscribers.push(subscriber);
        true
    }

    /// Remove a subscriber
    ///
    /// Returns false if it was not present.
    pub fn remove_subscriber(&self, id: SubscriberId) -> bool {
        let mut inner = self.lock();
        if !inner.ids.remove(&id) {
            return false;
        }
        inner.subscribers.retain(|s| s.id() != id);
        true
    }

    pub fn contains(&self, id: SubscriberId) -> bool {
        self.lock().ids.contains(&id)
    }

    pub fn len(&self) -> usize {
        self.lock().subscribers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().subscribers.is_empty()
    }

    /// Subscriber ids in subscription order
    pub fn subscriber_ids(&self) -> Vec<SubscriberId> {
        self.lock().subscribers.iter().map(|s| s.id()).collect()
    }

    pub fn stats(&self) -> ChannelStats {
        let inner = self.lock();
        ChannelStats {
            subscriber_count: inner.subscribers.len(),
            published: inner.published,
            created_at: self.created_at,
        }
    }

    /// Publish a value to every current subscriber
    ///
    /// Builds a single event and hands it to each subscriber in
    /// subscription order. A subscriber removed before its turn is
    /// skipped.
    pub fn notify(&self, value: Value, publisher: Option<&dyn Subscriber>, visibility: Visibility) {
        let event = Arc::new(Event::new(value, publisher, visibility));

        {
            let mut inner = self.lock();
            inner.pending.push_back(event);
            inner.published += 1;
            if inner.draining {
                return;
            }
            inner.draining = true;
        }

        self.drain();
    }

    fn drain(&self) {
        let mut guard = DrainGuard {
            channel: self,
            armed: true,
        };

        loop {
            let (event, subscribers) = {
                let mut inner = self.lock();
                match inner.pending.pop_front() {
                    Some(event) => (event, inner.subscribers.clone()),
                    None => {
                        // Must be cleared under the same lock that saw the
                        // queue empty, or a concurrent publish could strand.
                        inner.draining = false;
                        guard.armed = false;
                        return;
                    }
                }
            };

            for subscriber in subscribers {
                if !self.contains(subscriber.id()) {
                    continue;
                }
                subscriber.on_notify(&self.name, &event);
            }
        }
    }
}

/// Releases the drain role if a subscriber panics mid-delivery
struct DrainGuard<'a> {
    channel: &'a Channel,
    armed: bool,
}

impl Drop for DrainGuard<'_> {
    fn drop(&mut self) {
        if self.armed {
            self.channel.lock().draining = false;
        }
    }
}

impl std::fmt::Debug for Channel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Channel")
            .field("name", &self.name)
            .field("subscribers", &self.len())
            .finish()
    }
}
