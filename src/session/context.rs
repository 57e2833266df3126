//! Session context
//!
//! Identity and transport details of one connected peer.

use std::net::SocketAddr;
use std::time::Instant;

use crate::registry::SubscriberId;
use crate::server::config::DEFAULT_SEND_QUEUE_CAPACITY;

/// Per-connection information shared with the registry and logs
#[derive(Debug, Clone)]
pub struct SessionContext {
    /// Unique session ID, also the connection's subscriber identity
    pub session_id: SubscriberId,

    /// Remote peer address
    pub peer_addr: SocketAddr,

    /// When the connection was accepted
    pub connected_at: Instant,

    /// Inbound frames longer than this many bytes are dropped (0 = unlimited)
    pub max_frame_size: usize,

    /// Outbound frames that may wait for the socket before the peer is
    /// treated as lagging
    pub send_queue_capacity: usize,
}

impl SessionContext {
    /// Create a new context with a fresh session ID
    pub fn new(peer_addr: SocketAddr) -> Self {
        Self {
            session_id: SubscriberId::next(),
            peer_addr,
            connected_at: Instant::now(),
            max_frame_size: 0,
            send_queue_capacity: DEFAULT_SEND_QUEUE_CAPACITY,
        }
    }

    /// Set the inbound frame size limit
    pub fn max_frame_size(mut self, limit: usize) -> Self {
        self.max_frame_size = limit;
        self
    }

    /// Set the outbound queue capacity
    pub fn send_queue_capacity(mut self, capacity: usize) -> Self {
        self.send_queue_capacity = capacity;
        self
    }
}
