//! Registry implementation
//!
//! The central registry that owns the channel directory, the list of
//! connected peers and the active-channel list, and keeps every peer's
//! view of that list in sync.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use crate::protocol::{Value, Visibility};
use crate::stats::RegistryStats;

use super::channel::{Channel, ChannelStats};
use super::subscriber::{Peer, Subscriber, SubscriberId};

struct RegistryState {
    /// Channel directory; only non-empty channels are kept
    channels: HashMap<String, Arc<Channel>>,
    /// Names of channels with at least one subscriber, in activation order
    active: Vec<String>,
    /// Connected peers
    peers: Vec<Arc<dyn Peer>>,
}

/// Central registry for channels and connected peers
///
/// One mutex guards the directory, the active list and the peer list, so
/// an empty/non-empty transition and the mirror frames announcing it are
/// atomic with respect to every other subscribe or unsubscribe. Mirroring
/// only enqueues text on each peer, so nothing blocks under the lock.
/// Publishing looks up the channel under the lock and delivers after
/// releasing it.
pub struct Registry {
    state: Mutex<RegistryState>,
    publishes: AtomicU64,
    dropped_publishes: AtomicU64,
}

impl Registry {
    /// Create an empty registry
    pub fn new() -> Self {
        Self {
            state: Mutex::new(RegistryState {
                channels: HashMap::new(),
                active: Vec::new(),
                peers: Vec::new(),
            }),
            publishes: AtomicU64::new(0),
            dropped_publishes: AtomicU64::new(0),
        }
    }

    fn state(&self) -> MutexGuard<'_, RegistryState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Subscribe to a channel, creating it if needed
    ///
    /// If the channel was empty, it becomes active and every connected peer
    /// other than the subscriber itself is told about it.
    pub fn subscribe(&self, channel: &str, subscriber: Arc<dyn Subscriber>) {
        let skip = subscriber.id();
        let mut state = self.state();
        if state.activate(channel, subscriber) {
            state.mirror_subscribe(&[channel.to_string()], Some(skip));
        }
    }

    /// Subscribe to several channels at once
    ///
    /// Peers receive one mirror frame listing only the channels that became
    /// active.
    pub fn subscribe_many<S: AsRef<str>>(&self, channels: &[S], subscriber: Arc<dyn Subscriber>) {
        let skip = subscriber.id();
        let mut state = self.state();

        let mut activated = Vec::new();
        for channel in channels {
            let channel = channel.as_ref();
            if state.activate(channel, Arc::clone(&subscriber)) {
                activated.push(channel.to_string());
            }
        }

        if !activated.is_empty() {
            state.mirror_subscribe(&activated, Some(skip));
        }
    }

    /// Unsubscribe from a channel
    ///
    /// If the channel becomes empty it is deactivated and every connected
    /// peer is told.
    pub fn unsubscribe(&self, channel: &str, subscriber: SubscriberId) {
        let mut state = self.state();
        if state.deactivate(channel, subscriber) {
            state.mirror_unsubscribe(&[channel.to_string()]);
        }
    }

    /// Unsubscribe from several channels at once
    ///
    /// Peers receive one mirror frame listing the channels that became
    /// empty, or nothing if none did.
    pub fn unsubscribe_many<S: AsRef<str>>(&self, channels: &[S], subscriber: SubscriberId) {
        let mut state = self.state();

        let mut emptied = Vec::new();
        for channel in channels {
            let channel = channel.as_ref();
            if state.deactivate(channel, subscriber) {
                emptied.push(channel.to_string());
            }
        }

        if !emptied.is_empty() {
            state.mirror_unsubscribe(&emptied);
        }
    }

    /// Publish a value to one channel
    ///
    /// A channel without subscribers swallows the value silently.
    pub fn publish(
        &self,
        channel: &str,
        value: impl Into<Value>,
        publisher: Option<&dyn Subscriber>,
        visibility: Visibility,
    ) {
        let target = self.state().channels.get(channel).cloned();

        match target {
            Some(target) => {
                self.publishes.fetch_add(1, Ordering::Relaxed);
                tracing::trace!(
                    channel = channel,
                    visibility = ?visibility,
                    publisher = ?publisher.map(|p| p.id()),
                    "Publish"
                );
                target.notify(value.into(), publisher, visibility);
            }
            None => {
                self.dropped_publishes.fetch_add(1, Ordering::Relaxed);
            }
        }
    }

    /// Publish a value to each listed channel independently
    pub fn publish_many<S: AsRef<str>>(
        &self,
        channels: &[S],
        value: impl Into<Value>,
        publisher: Option<&dyn Subscriber>,
        visibility: Visibility,
    ) {
        let value = value.into();
        for channel in channels {
            self.publish(channel.as_ref(), value.clone(), publisher, visibility);
        }
    }

    /// Register a newly connected peer
    ///
    /// The peer immediately receives the full active-channel list.
    pub fn on_new_connection(&self, peer: Arc<dyn Peer>) {
        let mut state = self.state();
        let id = peer.id();

        if !state.peers.iter().any(|p| p.id() == id) {
            peer.mirror_subscribe(&state.active);
            state.peers.push(peer);
        }

        tracing::info!(
            peer = %id,
            peers = state.peers.len(),
            active_channels = state.active.len(),
            "Peer registered"
        );
    }

    /// Deregister a peer
    ///
    /// The peer must already have left all of its channels.
    pub fn on_connection_closed(&self, peer: SubscriberId) {
        let mut state = self.state();
        let before = state.peers.len();
        state.peers.retain(|p| p.id() != peer);

        if state.peers.len() != before {
            tracing::info!(
                peer = %peer,
                peers = state.peers.len(),
                "Peer deregistered"
            );
        }
    }

    /// Names of all channels with subscribers, in activation order
    pub fn active_channels(&self) -> Vec<String> {
        self.state().active.clone()
    }

    /// Whether the channel has at least one subscriber
    pub fn is_active(&self, channel: &str) -> bool {
        self.state().channels.contains_key(channel)
    }

    /// Number of subscribers on a channel (0 if unknown)
    pub fn subscriber_count(&self, channel: &str) -> usize {
        self.state()
            .channels
            .get(channel)
            .map_or(0, |c| c.len())
    }

    /// Number of connected peers
    pub fn connection_count(&self) -> usize {
        self.state().peers.len()
    }

    /// Get statistics for a channel
    pub fn channel_stats(&self, channel: &str) -> Option<ChannelStats> {
        self.state().channels.get(channel).map(|c| c.stats())
    }

    /// Get registry-wide statistics
    pub fn stats(&self) -> RegistryStats {
        let state = self.state();
        RegistryStats {
            active_channels: state.active.len(),
            connections: state.peers.len(),
            subscriptions: state.channels.values().map(|c| c.len()).sum(),
            publishes: self.publishes.load(Ordering::Relaxed),
            dropped_publishes: self.dropped_publishes.load(Ordering::Relaxed),
        }
    }
}

impl RegistryState {
    /// Add a subscriber; returns true if the channel went from empty to active
    fn activate(&mut self, name: &str, subscriber: Arc<dyn Subscriber>) -> bool {
        let channel = self
            .channels
            .entry(name.to_string())
            .or_insert_with(|| Arc::new(Channel::new(name)));

        let was_empty = channel.is_empty();
        let added = channel.add_subscriber(subscriber);

        if was_empty && added {
            self.active.push(name.to_string());
            tracing::info!(channel = name, "Channel activated");
            true
        } else {
            if added {
                tracing::debug!(
                    channel = name,
                    subscribers = channel.len(),
                    "Subscriber added"
                );
            }
            false
        }
    }

    /// Remove a subscriber; returns true if the channel became empty
    fn deactivate(&mut self, name: &str, subscriber: SubscriberId) -> bool {
        let Some(channel) = self.channels.get(name) else {
            return false;
        };

        if !channel.remove_subscriber(subscriber) {
            return false;
        }

        if !channel.is_empty() {
            tracing::debug!(
                channel = name,
                subscribers = channel.len(),
                "Subscriber removed"
            );
            return false;
        }

        self.channels.remove(name);
        self.active.retain(|n| n != name);
        tracing::info!(channel = name, "Channel deactivated");
        true
    }

    fn mirror_subscribe(&self, names: &[String], skip: Option<SubscriberId>) {
        for peer in &self.peers {
            if Some(peer.id()) != skip {
                peer.mirror_subscribe(names);
            }
        }
        tracing::debug!(channels = ?names, peers = self.peers.len(), "Mirrored subscribe");
    }

    fn mirror_unsubscribe(&self, names: &[String]) {
        for peer in &self.peers {
            peer.mirror_unsubscribe(names);
        }
        tracing::debug!(channels = ?names, peers = self.peers.len(), "Mirrored unsubscribe");
    }
}

impl Default for Registry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashSet;
    use std::sync::Mutex;

    use super::*;
    use crate::protocol::Origin;
    use crate::registry::event::Event;
    use crate::registry::subscriber::{FnSubscriber, Inbox};

    /// Records mirror frames and notifications like a connection would
    #[derive(Default)]
    struct FakePeer {
        id: Option<SubscriberId>,
        mirrored: Mutex<Vec<String>>,
        notified: Mutex<Vec<(String, Value)>>,
    }

    impl FakePeer {
        fn new() -> Arc<Self> {
            Arc::new(Self {
                id: Some(SubscriberId::next()),
                ..Default::default()
            })
        }

        fn take_mirrored(&self) -> Vec<String> {
            std::mem::take(&mut *self.mirrored.lock().unwrap())
        }
    }

    impl Peer for FakePeer {
        fn id(&self) -> SubscriberId {
            self.id.unwrap()
        }

        fn mirror_subscribe(&self, channels: &[String]) {
            self.mirrored
                .lock()
                .unwrap()
                .push(format!("s{}", channels.join("|")));
        }

        fn mirror_unsubscribe(&self, channels: &[String]) {
            self.mirrored
                .lock()
                .unwrap()
                .push(format!("u{}", channels.join("|")));
        }
    }

    impl Subscriber for FakePeer {
        fn id(&self) -> SubscriberId {
            self.id.unwrap()
        }

        fn origin(&self) -> Origin {
            Origin::Connection
        }

        fn on_notify(&self, channel: &str, event: &Arc<Event>) {
            self.notified
                .lock()
                .unwrap()
                .push((channel.to_string(), event.value().clone()));
        }
    }

    fn connect(registry: &Registry) -> Arc<FakePeer> {
        let peer = FakePeer::new();
        registry.on_new_connection(peer.clone());
        peer
    }

    #[test]
    fn test_new_connection_receives_active_list() {
        let registry = Registry::new();
        let a = connect(&registry);
        assert_eq!(a.take_mirrored(), vec!["s"]);

        registry.subscribe("chat", a.clone());
        registry.subscribe("news", a.clone());

        let b = connect(&registry);
        assert_eq!(b.take_mirrored(), vec!["schat|news"]);
    }

    #[test]
    fn test_subscribe_mirrors_to_others_only() {
        let registry = Registry::new();
        let a = connect(&registry);
        let b = connect(&registry);
        a.take_mirrored();
        b.take_mirrored();

        registry.subscribe("chat", a.clone());

        assert!(a.take_mirrored().is_empty());
        assert_eq!(b.take_mirrored(), vec!["schat"]);
        assert_eq!(registry.active_channels(), vec!["chat"]);

        // Second subscriber does not re-announce
        registry.subscribe("chat", b.clone());
        assert!(a.take_mirrored().is_empty());
        assert!(b.take_mirrored().is_empty());
    }

    #[test]
    fn test_server_subscriber_mirrors_to_everyone() {
        let registry = Registry::new();
        let a = connect(&registry);
        a.take_mirrored();

        let (inbox, _rx) = Inbox::new();
        registry.subscribe("jobs", inbox);

        assert_eq!(a.take_mirrored(), vec!["sjobs"]);
    }

    #[test]
    fn test_subscribe_many_batches_transitions() {
        let registry = Registry::new();
        let a = connect(&registry);
        let b = connect(&registry);
        a.take_mirrored();
        b.take_mirrored();

        registry.subscribe("x", b.clone());
        a.take_mirrored();

        registry.subscribe_many(&["x", "y", "z"], a.clone());

        // Only y and z transitioned, in one frame
        assert_eq!(b.take_mirrored(), vec!["sy|z"]);
        assert!(a.take_mirrored().is_empty());
        assert_eq!(registry.active_channels(), vec!["x", "y", "z"]);
    }

    #[test]
    fn test_unsubscribe_mirrors_only_when_empty() {
        let registry = Registry::new();
        let a = connect(&registry);
        let b = connect(&registry);
        let c = connect(&registry);
        registry.subscribe("x", a.clone());
        registry.subscribe("x", b.clone());
        for p in [&a, &b, &c] {
            p.take_mirrored();
        }

        registry.unsubscribe("x", Subscriber::id(&*a));
        assert!(registry.is_active("x"));
        assert!(c.take_mirrored().is_empty());
        assert!(b.take_mirrored().is_empty());

        registry.unsubscribe("x", Subscriber::id(&*b));
        assert!(!registry.is_active("x"));
        assert!(registry.active_channels().is_empty());
        assert_eq!(c.take_mirrored(), vec!["ux"]);
        assert_eq!(a.take_mirrored(), vec!["ux"]);
        assert_eq!(b.take_mirrored(), vec!["ux"]);
    }

    #[test]
    fn test_unsubscribe_many_batches_and_skips_empty() {
        let registry = Registry::new();
        let a = connect(&registry);
        let b = connect(&registry);
        registry.subscribe_many(&["x", "y"], a.clone());
        registry.subscribe("y", b.clone());
        a.take_mirrored();
        b.take_mirrored();

        registry.unsubscribe_many(&["x", "y"], Subscriber::id(&*a));
        assert_eq!(b.take_mirrored(), vec!["ux"]);
        assert_eq!(registry.active_channels(), vec!["y"]);

        // Nothing emptied, nothing sent
        registry.unsubscribe_many(&["x", "missing"], Subscriber::id(&*a));
        assert!(b.take_mirrored().is_empty());
    }

    #[test]
    fn test_double_subscribe_and_unsubscribe_are_noops() {
        let registry = Registry::new();
        let a = connect(&registry);
        let b = connect(&registry);
        a.take_mirrored();
        b.take_mirrored();

        registry.subscribe("x", a.clone());
        registry.subscribe("x", a.clone());
        assert_eq!(registry.subscriber_count("x"), 1);
        assert_eq!(b.take_mirrored(), vec!["sx"]);

        registry.unsubscribe("x", Subscriber::id(&*a));
        registry.unsubscribe("x", Subscriber::id(&*a));
        assert_eq!(b.take_mirrored(), vec!["ux"]);
    }

    #[test]
    fn test_reactivation() {
        let registry = Registry::new();
        let a = connect(&registry);
        let b = connect(&registry);

        registry.subscribe("x", a.clone());
        registry.unsubscribe("x", Subscriber::id(&*a));
        registry.subscribe("x", a.clone());
        b.take_mirrored();

        assert!(registry.is_active("x"));
        assert_eq!(registry.active_channels(), vec!["x"]);
    }

    #[test]
    fn test_publish_reaches_subscribers() {
        let registry = Registry::new();
        let a = connect(&registry);
        let (inbox, mut rx) = Inbox::new();

        registry.subscribe("chat", a.clone());
        registry.subscribe("chat", inbox);

        registry.publish("chat", "hello", None, Visibility::ServerOnly);

        assert_eq!(
            *a.notified.lock().unwrap(),
            vec![("chat".to_string(), Value::from("hello"))]
        );
        let (channel, event) = rx.try_recv().unwrap();
        assert_eq!(channel, "chat");
        assert_eq!(event.origin(), Origin::Server);
        assert_eq!(registry.stats().publishes, 1);
    }

    #[test]
    fn test_publish_to_inactive_channel_is_noop() {
        let registry = Registry::new();
        registry.publish("nobody", 1, None, Visibility::All);

        assert!(!registry.is_active("nobody"));
        assert_eq!(registry.stats().dropped_publishes, 1);
    }

    #[test]
    fn test_publish_many_is_independent() {
        let registry = Registry::new();
        let (inbox, mut rx) = Inbox::new();
        registry.subscribe("b", inbox);

        registry.publish_many(&["a", "b"], 9, None, Visibility::All);

        let (channel, event) = rx.try_recv().unwrap();
        assert_eq!(channel, "b");
        assert_eq!(event.value().as_i64(), Some(9));
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn test_closed_connection_deregistered() {
        let registry = Registry::new();
        let a = connect(&registry);
        let b = connect(&registry);
        assert_eq!(registry.connection_count(), 2);

        registry.on_connection_closed(Peer::id(&*a));
        assert_eq!(registry.connection_count(), 1);

        registry.subscribe("x", b.clone());
        assert_eq!(a.take_mirrored(), vec!["s"]);
    }

    #[test]
    fn test_active_iff_nonempty_under_random_ops() {
        let registry = Registry::new();
        let subs: Vec<Arc<FakePeer>> = (0..4).map(|_| FakePeer::new()).collect();
        let names = ["a", "b", "c"];

        // Deterministic pseudo-random walk
        let mut seed: u32 = 12345;
        for _ in 0..500 {
            seed = seed.wrapping_mul(1_103_515_245).wrapping_add(12345);
            let sub = &subs[(seed >> 16) as usize % subs.len()];
            let name = names[(seed >> 8) as usize % names.len()];
            if seed % 2 == 0 {
                registry.subscribe(name, sub.clone());
            } else {
                registry.unsubscribe(name, Subscriber::id(&**sub));
            }

            for name in names {
                let count = registry.subscriber_count(name);
                let active = registry.active_channels().iter().any(|n| n == name);
                assert_eq!(count > 0, active);
                assert_eq!(registry.is_active(name), active);
            }
        }
    }

    #[test]
    fn test_subscriber_may_reenter_registry_from_notify() {
        let registry = Arc::new(Registry::new());
        let watcher = connect(&registry);
        let (helper, mut rx) = Inbox::new();
        registry.subscribe("z", helper.clone());
        watcher.take_mirrored();

        let weak = Arc::downgrade(&registry);
        let target = helper.clone();
        let reactor = FnSubscriber::new(move |_: &str, event: &Arc<Event>| {
            let (Some(registry), Some(n)) = (weak.upgrade(), event.value().as_i64()) else {
                return;
            };
            registry.subscribe("y", target.clone());
            registry.publish("y", n, None, Visibility::All);
            registry.unsubscribe("z", target.id());
            if n < 2 {
                registry.publish("x", n + 1, None, Visibility::All);
            }
        });
        registry.subscribe("x", reactor);
        watcher.take_mirrored();

        registry.publish("x", 0, None, Visibility::All);

        let mut seen = Vec::new();
        while let Ok((channel, event)) = rx.try_recv() {
            assert_eq!(channel, "y");
            seen.push(event.value().as_i64());
        }
        assert_eq!(seen, vec![Some(0), Some(1), Some(2)]);
        assert_eq!(watcher.take_mirrored(), vec!["sy", "uz"]);
        assert_eq!(registry.active_channels(), vec!["x", "y"]);
    }

    #[test]
    fn test_directory_consistent_under_concurrent_callers() {
        let registry = Registry::new();
        let watcher = connect(&registry);
        watcher.take_mirrored();
        let names = ["a", "b", "c", "d"];

        std::thread::scope(|scope| {
            for t in 0..8u32 {
                let registry = &registry;
                scope.spawn(move || {
                    let subs: Vec<Arc<FakePeer>> = (0..2).map(|_| FakePeer::new()).collect();
                    let mut seed: u32 = 7 + t * 7919;
                    for _ in 0..2_000 {
                        seed = seed.wrapping_mul(1_103_515_245).wrapping_add(12345);
                        let sub = &subs[(seed >> 16) as usize % subs.len()];
                        let name = names[(seed >> 8) as usize % names.len()];
                        match (seed >> 24) % 3 {
                            0 => {
                                registry.subscribe(name, sub.clone());
                                // Only this thread can remove `sub`, so the
                                // channel cannot be empty here
                                assert!(registry.is_active(name));
                                assert!(registry.subscriber_count(name) > 0);
                            }
                            1 => registry.unsubscribe(name, Subscriber::id(&**sub)),
                            _ => registry.publish(name, 1, None, Visibility::All),
                        }
                    }
                });
            }
        });

        let active = registry.active_channels();
        for name in names {
            assert_eq!(
                registry.subscriber_count(name) > 0,
                active.iter().any(|n| n == name)
            );
        }

        // Replaying the mirror frames reproduces the directory
        let mut mirrored = HashSet::new();
        for frame in watcher.take_mirrored() {
            let (command, rest) = frame.split_at(1);
            for name in rest.split('|').filter(|n| !n.is_empty()) {
                if command == "s" {
                    assert!(mirrored.insert(name.to_string()));
                } else {
                    assert!(mirrored.remove(name));
                }
            }
        }
        let mut replayed: Vec<String> = mirrored.into_iter().collect();
        replayed.sort();
        let mut expected = active;
        expected.sort();
        assert_eq!(replayed, expected);
    }
}
