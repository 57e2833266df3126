//! Statistics and metrics for connections, the registry and the server

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

/// Session-level statistics
#[derive(Debug, Clone, Default)]
pub struct SessionStats {
    /// Text frames received from the peer
    pub frames_received: u64,
    /// Text frames queued for the peer
    pub frames_sent: u64,
    /// Inbound frames dropped as malformed
    pub frames_dropped: u64,
    /// Outbound frames discarded because the send queue was full
    pub frames_overflowed: u64,
    /// Total bytes received
    pub bytes_received: u64,
    /// Total bytes queued for sending
    pub bytes_sent: u64,
    /// Connection duration
    pub duration: Duration,
}

impl SessionStats {
    /// Create new stats tracker
    pub fn new() -> Self {
        Self::default()
    }

    /// Fraction of inbound frames that were dropped
    pub fn drop_ratio(&self) -> f64 {
        if self.frames_received > 0 {
            self.frames_dropped as f64 / self.frames_received as f64
        } else {
            0.0
        }
    }
}

/// Live counters behind [`SessionStats`]
///
/// Updated from the transport task and from registry fan-out concurrently.
#[derive(Debug)]
pub struct SessionCounters {
    started_at: Instant,
    frames_received: AtomicU64,
    frames_sent: AtomicU64,
    frames_dropped: AtomicU64,
    frames_overflowed: AtomicU64,
    bytes_received: AtomicU64,
    bytes_sent: AtomicU64,
}

impl SessionCounters {
    pub fn new() -> Self {
        Self {
            started_at: Instant::now(),
            frames_received: AtomicU64::new(0),
            frames_sent: AtomicU64::new(0),
            frames_dropped: AtomicU64::new(0),
            frames_overflowed: AtomicU64::new(0),
            bytes_received: AtomicU64::new(0),
            bytes_sent: AtomicU64::new(0),
        }
    }

    pub fn record_received(&self, len: usize) {
        self.frames_received.fetch_add(1, Ordering::Relaxed);
        self.bytes_received.fetch_add(len as u64, Ordering::Relaxed);
    }

    pub fn record_sent(&self, len: usize) {
        self.frames_sent.fetch_add(1, Ordering::Relaxed);
        self.bytes_sent.fetch_add(len as u64, Ordering::Relaxed);
    }

    pub fn record_dropped(&self) {
        self.frames_dropped.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_overflowed(&self) {
        self.frames_overflowed.fetch_add(1, Ordering::Relaxed);
    }

    /// Take a point-in-time snapshot
    pub fn snapshot(&self) -> SessionStats {
        SessionStats {
            frames_received: self.frames_received.load(Ordering::Relaxed),
            frames_sent: self.frames_sent.load(Ordering::Relaxed),
            frames_dropped: self.frames_dropped.load(Ordering::Relaxed),
            frames_overflowed: self.frames_overflowed.load(Ordering::Relaxed),
            bytes_received: self.bytes_received.load(Ordering::Relaxed),
            bytes_sent: self.bytes_sent.load(Ordering::Relaxed),
            duration: self.started_at.elapsed(),
        }
    }
}

impl Default for SessionCounters {
    fn default() -> Self {
        Self::new()
    }
}

/// Registry-wide statistics
#[derive(Debug, Clone, Default)]
pub struct RegistryStats {
    /// Channels with at least one subscriber
    pub active_channels: usize,
    /// Connected peers
    pub connections: usize,
    /// Sum of subscribers over all channels
    pub subscriptions: usize,
    /// Publishes delivered to an active channel
    pub publishes: u64,
    /// Publishes addressed to a channel with no subscribers
    pub dropped_publishes: u64,
}

/// Server-wide statistics
#[derive(Debug, Clone, Default)]
pub struct ServerStats {
    /// Total connections ever accepted
    pub total_connections: u64,
    /// Current active connections
    pub active_connections: u64,
    /// Connections turned away by the connection limit
    pub rejected_connections: u64,
    /// Uptime
    pub uptime: Duration,
}

impl ServerStats {
    pub fn new() -> Self {
        Self::default()
    }
}
