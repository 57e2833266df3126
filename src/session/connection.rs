//! Connected peer
//!
//! A `Connection` is both a subscriber (it relays channel events to its
//! peer) and a registry peer (it receives mirror frames). It decodes
//! inbound frames, keeps the set of channels its peer asked for, and
//! leaves all of them when the transport closes.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tokio::sync::{mpsc, Notify};

use crate::protocol::{
    encode_publish, encode_subscribe, encode_unsubscribe, Frame, Origin, ProtocolError, Value,
    Visibility,
};
use crate::registry::{Event, Peer, Registry, Subscriber, SubscriberId};
use crate::stats::{SessionCounters, SessionStats};

use super::context::SessionContext;

/// Why an outbound frame could not be queued
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum OutboundError {
    /// The send queue is at capacity; the peer is not keeping up
    #[error("send queue full")]
    Full,
    /// The transport is gone
    #[error("transport closed")]
    Closed,
}

/// Outbound half of a transport
///
/// `send` queues a text frame and returns immediately; the actual write
/// happens elsewhere. It must never wait for queue space.
pub trait Outbound: Send + Sync {
    fn send(&self, text: String) -> Result<(), OutboundError>;
}

impl Outbound for mpsc::Sender<String> {
    fn send(&self, text: String) -> Result<(), OutboundError> {
        self.try_send(text).map_err(|e| match e {
            mpsc::error::TrySendError::Full(_) => OutboundError::Full,
            mpsc::error::TrySendError::Closed(_) => OutboundError::Closed,
        })
    }
}

/// One connected peer
pub struct Connection {
    context: SessionContext,
    registry: Arc<Registry>,
    outbound: Box<dyn Outbound>,
    /// Channels this peer subscribed to, in subscription order
    channels: Mutex<Vec<String>>,
    closed: AtomicBool,
    /// Set once the send queue overflowed; nothing more is queued after that
    lagging: AtomicBool,
    lag_signal: Notify,
    counters: SessionCounters,
}

impl Connection {
    /// Create a connection and register it with the registry
    ///
    /// The peer is immediately sent the current active-channel list.
    pub fn open(
        registry: Arc<Registry>,
        context: SessionContext,
        outbound: impl Outbound + 'static,
    ) -> Arc<Self> {
        let connection = Arc::new(Self {
            context,
            registry: Arc::clone(&registry),
            outbound: Box::new(outbound),
            channels: Mutex::new(Vec::new()),
            closed: AtomicBool::new(false),
            lagging: AtomicBool::new(false),
            lag_signal: Notify::new(),
            counters: SessionCounters::new(),
        });

        registry.on_new_connection(connection.clone());
        connection
    }

    pub fn id(&self) -> SubscriberId {
        self.context.session_id
    }

    pub fn context(&self) -> &SessionContext {
        &self.context
    }

    /// Channels this peer is subscribed to
    pub fn channels(&self) -> Vec<String> {
        self.local().clone()
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    /// Whether the send queue overflowed
    ///
    /// A lagging peer has missed frames, so its mirrored directory can no
    /// longer be trusted. The transport disconnects it.
    pub fn is_lagging(&self) -> bool {
        self.lagging.load(Ordering::Acquire)
    }

    /// Resolves once the send queue has overflowed
    pub async fn lagged(&self) {
        if self.is_lagging() {
            return;
        }
        self.lag_signal.notified().await;
    }

    pub fn stats(&self) -> SessionStats {
        self.counters.snapshot()
    }

    fn local(&self) -> MutexGuard<'_, Vec<String>> {
        self.channels.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Queue a frame for the peer
    ///
    /// Dropped silently once closed. Never waits: a full queue drops the
    /// frame and marks the peer as lagging.
    fn send(&self, text: String) {
        if self.is_closed() {
            return;
        }
        if self.is_lagging() {
            self.counters.record_overflowed();
            return;
        }

        let len = text.len();
        match self.outbound.send(text) {
            Ok(()) => self.counters.record_sent(len),
            Err(OutboundError::Full) => {
                self.counters.record_overflowed();
                if !self.lagging.swap(true, Ordering::AcqRel) {
                    tracing::warn!(
                        session_id = %self.id(),
                        peer = %self.context.peer_addr,
                        "Send queue full, dropping slow peer"
                    );
                    self.lag_signal.notify_one();
                }
            }
            Err(OutboundError::Closed) => {}
        }
    }

    /// Handle one inbound text frame
    ///
    /// A malformed frame is logged and dropped without touching any state;
    /// the connection stays open.
    pub fn on_message(self: &Arc<Self>, text: &str) -> Result<(), ProtocolError> {
        self.counters.record_received(text.len());

        let limit = self.context.max_frame_size;
        let parsed = if limit > 0 && text.len() > limit {
            Err(ProtocolError::FrameTooLarge {
                size: text.len(),
                limit,
            })
        } else {
            Frame::parse(text)
        };

        match parsed {
            Ok(frame) => {
                self.dispatch(frame);
                Ok(())
            }
            Err(e) => {
                self.counters.record_dropped();
                tracing::warn!(
                    session_id = %self.id(),
                    peer = %self.context.peer_addr,
                    error = %e,
                    "Dropping malformed frame"
                );
                Err(e)
            }
        }
    }

    fn dispatch(self: &Arc<Self>, frame: Frame) {
        match frame {
            Frame::Publish {
                visibility,
                channels,
                value,
            } => {
                let publisher: &dyn Subscriber = &**self;
                self.registry
                    .publish_many(&channels, value, Some(publisher), visibility);
            }
            Frame::Subscribe(channels) => self.on_subscribe(&channels),
            Frame::Unsubscribe(channels) => self.on_unsubscribe(&channels),
        }
    }

    /// Subscribe this connection to channels it is not yet subscribed to
    pub fn on_subscribe<S: AsRef<str>>(self: &Arc<Self>, channels: &[S]) {
        // Held across the registry call so a concurrent close cannot slip
        // in between the closed check and the subscription.
        let mut local = self.local();
        if self.is_closed() {
            return;
        }

        let mut fresh = Vec::new();
        for channel in channels {
            let channel = channel.as_ref();
            if !local.iter().any(|c| c == channel) {
                local.push(channel.to_string());
                fresh.push(channel.to_string());
            }
        }

        if fresh.is_empty() {
            return;
        }

        tracing::debug!(session_id = %self.id(), channels = ?fresh, "Subscribe");
        let subscriber: Arc<dyn Subscriber> = self.clone();
        self.registry.subscribe_many(&fresh, subscriber);
    }

    /// Unsubscribe this connection from channels
    pub fn on_unsubscribe<S: AsRef<str>>(&self, channels: &[S]) {
        let mut local = self.local();
        if self.is_closed() {
            return;
        }

        local.retain(|c| !channels.iter().any(|n| n.as_ref() == c.as_str()));
        tracing::debug!(
            session_id = %self.id(),
            channels = channels.len(),
            "Unsubscribe"
        );
        self.registry.unsubscribe_many(channels, self.id());
    }

    /// Publish to a channel as this connection
    ///
    /// Visibility defaults to `ServerOnly`.
    pub fn publish(&self, channel: &str, value: impl Into<Value>, visibility: Option<Visibility>) {
        self.registry.publish(
            channel,
            value,
            Some(self as &dyn Subscriber),
            visibility.unwrap_or_default(),
        );
    }

    /// Publish to several channels as this connection
    ///
    /// Visibility defaults to `ServerOnly`.
    pub fn publish_many<S: AsRef<str>>(
        &self,
        channels: &[S],
        value: impl Into<Value>,
        visibility: Option<Visibility>,
    ) {
        self.registry.publish_many(
            channels,
            value,
            Some(self as &dyn Subscriber),
            visibility.unwrap_or_default(),
        );
    }

    /// Tear down after the transport closed
    ///
    /// Leaves every subscribed channel, then deregisters from the registry.
    /// Later calls are no-ops.
    pub fn close(&self) {
        let channels = {
            let mut local = self.local();
            if self.closed.swap(true, Ordering::AcqRel) {
                return;
            }
            std::mem::take(&mut *local)
        };

        self.registry.unsubscribe_many(&channels, self.id());
        self.registry.on_connection_closed(self.id());

        let stats = self.stats();
        tracing::info!(
            session_id = %self.id(),
            peer = %self.context.peer_addr,
            channels = channels.len(),
            frames_received = stats.frames_received,
            frames_sent = stats.frames_sent,
            frames_dropped = stats.frames_dropped,
            frames_overflowed = stats.frames_overflowed,
            duration_ms = stats.duration.as_millis() as u64,
            "Connection closed"
        );
    }
}

impl Subscriber for Connection {
    fn id(&self) -> SubscriberId {
        self.context.session_id
    }

    fn origin(&self) -> Origin {
        Origin::Connection
    }

    /// Relay to the peer unless the event stays server-side or came from it
    fn on_notify(&self, channel: &str, event: &Arc<Event>) {
        if !event.visibility().crosses_wire() || event.is_from(Subscriber::id(self)) {
            return;
        }
        self.send(encode_publish(event.visibility(), &[channel], event.value()));
    }
}

impl Peer for Connection {
    fn id(&self) -> SubscriberId {
        self.context.session_id
    }

    fn mirror_subscribe(&self, channels: &[String]) {
        self.send(encode_subscribe(channels));
    }

    fn mirror_unsubscribe(&self, channels: &[String]) {
        self.send(encode_unsubscribe(channels));
    }
}

impl std::fmt::Debug for Connection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Connection")
            .field("session_id", &self.context.session_id)
            .field("peer_addr", &self.context.peer_addr)
            .field("closed", &self.is_closed())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use std::net::SocketAddr;
    use std::time::Duration;

    use tokio_test::{assert_err, assert_ok};

    use super::*;
    use crate::registry::Inbox;

    /// Captures every frame queued for the peer
    #[derive(Clone, Default)]
    struct Wire(Arc<Mutex<Vec<String>>>);

    impl Wire {
        fn take(&self) -> Vec<String> {
            std::mem::take(&mut *self.0.lock().unwrap())
        }
    }

    impl Outbound for Wire {
        fn send(&self, text: String) -> Result<(), OutboundError> {
            self.0.lock().unwrap().push(text);
            Ok(())
        }
    }

    fn addr() -> SocketAddr {
        "127.0.0.1:9000".parse().unwrap()
    }

    fn connect(registry: &Arc<Registry>) -> (Arc<Connection>, Wire) {
        let wire = Wire::default();
        let conn = Connection::open(Arc::clone(registry), SessionContext::new(addr()), wire.clone());
        (conn, wire)
    }

    #[test]
    fn test_chat_scenario() {
        let registry = Arc::new(Registry::new());

        // A joins an empty system
        let (a, wire_a) = connect(&registry);
        assert_eq!(wire_a.take(), vec!["s"]);

        // A subscribes; nobody else to tell
        assert_ok!(a.on_message("schat"));
        assert!(registry.is_active("chat"));
        assert!(wire_a.take().is_empty());

        // B joins and learns about "chat"
        let (b, wire_b) = connect(&registry);
        assert_eq!(wire_b.take(), vec!["schat"]);

        // B publishes to everyone
        assert_ok!(b.on_message("p24:chatschat"));
        assert_eq!(wire_a.take(), vec!["p24:chatschat"]);
        assert!(wire_b.take().is_empty());
    }

    #[test]
    fn test_disconnect_scenario() {
        let registry = Arc::new(Registry::new());
        let (a, _wire_a) = connect(&registry);
        let (b, wire_b) = connect(&registry);
        let (_c, wire_c) = connect(&registry);

        assert_ok!(a.on_message("sx"));
        assert_ok!(b.on_message("sx"));
        wire_b.take();
        wire_c.take();

        a.close();
        assert!(registry.is_active("x"));
        assert!(wire_b.take().is_empty());
        assert!(wire_c.take().is_empty());
        assert_eq!(registry.connection_count(), 2);

        b.close();
        assert!(!registry.is_active("x"));
        assert_eq!(wire_c.take(), vec!["ux"]);
        assert_eq!(registry.connection_count(), 1);
    }

    #[test]
    fn test_server_only_never_hits_the_wire() {
        let registry = Arc::new(Registry::new());
        let (a, wire_a) = connect(&registry);
        let (b, wire_b) = connect(&registry);
        let (inbox, mut rx) = Inbox::new();

        assert_ok!(a.on_message("sx"));
        assert_ok!(b.on_message("sx"));
        registry.subscribe("x", inbox);
        wire_a.take();
        wire_b.take();

        assert_ok!(a.on_message("p11:xi5"));
        registry.publish("x", 6, None, Visibility::ServerOnly);
        registry.publish("x", 7, None, Visibility::ClientOnly);

        assert!(wire_a.take().is_empty());
        assert!(wire_b.take().is_empty());

        let (_, first) = rx.try_recv().unwrap();
        assert_eq!(first.value().as_i64(), Some(5));
        assert_eq!(first.origin(), Origin::Connection);
        assert!(first.is_from(a.id()));
        assert_eq!(rx.try_recv().unwrap().1.value().as_i64(), Some(6));
        assert_eq!(rx.try_recv().unwrap().1.value().as_i64(), Some(7));
    }

    #[test]
    fn test_server_publish_to_all_reaches_every_connection() {
        let registry = Arc::new(Registry::new());
        let (a, wire_a) = connect(&registry);
        let (b, wire_b) = connect(&registry);
        assert_ok!(a.on_message("sx"));
        assert_ok!(b.on_message("sx"));
        wire_a.take();
        wire_b.take();

        registry.publish("x", serde_json::json!({"k": 1}), None, Visibility::All);

        assert_eq!(wire_a.take(), vec!["p21:xj{\"k\":1}"]);
        assert_eq!(wire_b.take(), vec!["p21:xj{\"k\":1}"]);
    }

    #[test]
    fn test_unknown_command_is_dropped() {
        let registry = Arc::new(Registry::new());
        let (a, wire_a) = connect(&registry);
        wire_a.take();

        let err = assert_err!(a.on_message("zgarbage"));
        assert_eq!(err, ProtocolError::UnknownCommand('z'));

        assert!(!a.is_closed());
        assert!(registry.active_channels().is_empty());
        assert_eq!(registry.connection_count(), 1);
        assert_eq!(a.stats().frames_dropped, 1);
        assert!(wire_a.take().is_empty());
    }

    #[test]
    fn test_bad_value_drops_whole_frame() {
        let registry = Arc::new(Registry::new());
        let (a, _) = connect(&registry);
        let (inbox, mut rx) = Inbox::new();
        registry.subscribe("x", inbox);

        assert_err!(a.on_message("p21:xiNaN"));
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn test_frame_size_limit() {
        let registry = Arc::new(Registry::new());
        let wire = Wire::default();
        let conn = Connection::open(
            Arc::clone(&registry),
            SessionContext::new(addr()).max_frame_size(8),
            wire,
        );

        let err = assert_err!(conn.on_message("sa-very-long-channel"));
        assert!(matches!(err, ProtocolError::FrameTooLarge { limit: 8, .. }));
        assert!(!registry.is_active("a-very-long-channel"));

        assert_ok!(conn.on_message("sshort"));
        assert!(registry.is_active("short"));
    }

    #[test]
    fn test_repeated_subscribe_is_idempotent() {
        let registry = Arc::new(Registry::new());
        let (a, _) = connect(&registry);
        let (_b, wire_b) = connect(&registry);
        wire_b.take();

        assert_ok!(a.on_message("sx,x"));
        assert_ok!(a.on_message("sx"));

        assert_eq!(a.channels(), vec!["x"]);
        assert_eq!(registry.subscriber_count("x"), 1);
        assert_eq!(wire_b.take(), vec!["sx"]);
    }

    #[test]
    fn test_batched_subscribe_and_unsubscribe_frames() {
        let registry = Arc::new(Registry::new());
        let (a, _) = connect(&registry);
        let (_b, wire_b) = connect(&registry);
        wire_b.take();

        assert_ok!(a.on_message("sx,y\\,z"));
        assert_eq!(wire_b.take(), vec!["sx,y\\,z"]);
        assert_eq!(a.channels(), vec!["x", "y,z"]);

        assert_ok!(a.on_message("ux,y\\,z,never"));
        assert_eq!(wire_b.take(), vec!["ux,y\\,z"]);
        assert!(a.channels().is_empty());
    }

    #[test]
    fn test_close_is_idempotent_and_silences_connection() {
        let registry = Arc::new(Registry::new());
        let (a, wire_a) = connect(&registry);
        assert_ok!(a.on_message("sx"));
        wire_a.take();

        a.close();
        a.close();
        assert!(a.is_closed());
        assert!(a.channels().is_empty());
        assert_eq!(registry.connection_count(), 0);

        // Late deliveries and requests are inert
        let event = Arc::new(Event::new(Value::from(1), None, Visibility::All));
        a.on_notify("x", &event);
        Peer::mirror_subscribe(&*a, &["y".to_string()]);
        assert_ok!(a.on_message("sz"));
        assert!(!registry.is_active("z"));
        assert!(wire_a.take().is_empty());
    }

    #[test]
    fn test_connection_publish_defaults_to_server_only() {
        let registry = Arc::new(Registry::new());
        let (a, wire_a) = connect(&registry);
        let (b, wire_b) = connect(&registry);
        assert_ok!(b.on_message("sx"));
        wire_a.take();
        wire_b.take();

        a.publish("x", "quiet", None);
        assert!(wire_b.take().is_empty());

        a.publish_many(&["x"], "loud", Some(Visibility::All));
        assert_eq!(wire_b.take(), vec!["p21:xsloud"]);
        assert!(wire_a.take().is_empty());
    }

    #[tokio::test]
    async fn test_full_send_queue_marks_peer_lagging() {
        let registry = Arc::new(Registry::new());
        let (tx, mut rx) = mpsc::channel::<String>(2);
        let a = Connection::open(Arc::clone(&registry), SessionContext::new(addr()), tx);
        assert_ok!(a.on_message("sx"));

        // Bootstrap frame plus one publish fill the queue
        for i in 0..10 {
            registry.publish("x", i, None, Visibility::All);
        }

        assert!(a.is_lagging());
        assert_ok!(tokio::time::timeout(Duration::from_secs(1), a.lagged()).await);

        let stats = a.stats();
        assert_eq!(stats.frames_sent, 2);
        assert_eq!(stats.frames_overflowed, 9);

        assert_eq!(rx.recv().await.unwrap(), "s");
        assert_eq!(rx.recv().await.unwrap(), "p21:xi0");

        // Room again, but a lagging peer gets nothing further
        registry.publish("x", 99, None, Visibility::All);
        assert!(rx.try_recv().is_err());
        assert_eq!(a.stats().frames_overflowed, 10);
    }

    #[test]
    fn test_closed_transport_is_not_lagging() {
        let registry = Arc::new(Registry::new());
        let (tx, rx) = mpsc::channel::<String>(4);
        drop(rx);
        let a = Connection::open(Arc::clone(&registry), SessionContext::new(addr()), tx);
        assert_ok!(a.on_message("sx"));

        registry.publish("x", 1, None, Visibility::All);

        assert!(!a.is_lagging());
        assert_eq!(a.stats().frames_sent, 0);
        assert_eq!(a.stats().frames_overflowed, 0);
    }
}
