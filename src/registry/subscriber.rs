//! Subscriber capabilities
//!
//! Channels and the registry only ever talk to these traits. A connected
//! peer implements both [`Subscriber`] and [`Peer`]; server-side code uses
//! [`FnSubscriber`] or [`Inbox`].

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use tokio::sync::mpsc;

use crate::protocol::Origin;

use super::event::Event;

static NEXT_ID: AtomicU64 = AtomicU64::new(1);

/// Process-unique identity of a subscriber
///
/// Used for membership checks and for the "never echo to the publisher"
/// rule, so events never need to hold a reference to their publisher.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SubscriberId(u64);

impl SubscriberId {
    /// Allocate a fresh id
    pub fn next() -> Self {
        Self(NEXT_ID.fetch_add(1, Ordering::Relaxed))
    }

    pub fn as_u64(self) -> u64 {
        self.0
    }
}

impl std::fmt::Display for SubscriberId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Anything that can receive channel events
pub trait Subscriber: Send + Sync {
    /// Stable identity of this subscriber
    fn id(&self) -> SubscriberId;

    /// Provenance stamped on events this subscriber publishes
    fn origin(&self) -> Origin {
        Origin::Server
    }

    /// Called once per publish on every channel this subscriber belongs to
    ///
    /// Must not block. No registry or channel lock is held during the
    /// call, so implementations may subscribe, unsubscribe or publish.
    fn on_notify(&self, channel: &str, event: &Arc<Event>);
}

/// A remote endpoint that mirrors the registry's active-channel list
pub trait Peer: Send + Sync {
    /// Identity shared with the peer's [`Subscriber`] side
    fn id(&self) -> SubscriberId;

    /// Tell the peer these channels now have subscribers
    fn mirror_subscribe(&self, channels: &[String]);

    /// Tell the peer these channels no longer have subscribers
    fn mirror_unsubscribe(&self, channels: &[String]);
}

/// Server-side subscriber backed by a closure
pub struct FnSubscriber<F> {
    id: SubscriberId,
    callback: F,
}

impl<F> FnSubscriber<F>
where
    F: Fn(&str, &Arc<Event>) + Send + Sync,
{
    pub fn new(callback: F) -> Arc<Self> {
        Arc::new(Self {
            id: SubscriberId::next(),
            callback,
        })
    }
}

impl<F> Subscriber for FnSubscriber<F>
where
    F: Fn(&str, &Arc<Event>) + Send + Sync,
{
    fn id(&self) -> SubscriberId {
        self.id
    }

    fn on_notify(&self, channel: &str, event: &Arc<Event>) {
        (self.callback)(channel, event)
    }
}

/// Server-side subscriber that queues events for an async consumer
///
/// Events are delivered as `(channel, event)` pairs. Once the receiver is
/// dropped, further events are discarded.
pub struct Inbox {
    id: SubscriberId,
    tx: mpsc::UnboundedSender<(String, Arc<Event>)>,
}

impl Inbox {
    /// Create an inbox and the receiver that drains it
    pub fn new() -> (Arc<Self>, mpsc::UnboundedReceiver<(String, Arc<Event>)>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let inbox = Arc::new(Self {
            id: SubscriberId::next(),
            tx,
        });
        (inbox, rx)
    }
}

impl Subscriber for Inbox {
    fn id(&self) -> SubscriberId {
        self.id
    }

    fn on_notify(&self, channel: &str, event: &Arc<Event>) {
        let _ = self.tx.send((channel.to_string(), Arc::clone(event)));
    }
}
