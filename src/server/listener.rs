//! Pub/sub server listener
//!
//! Handles TCP accept loop, WebSocket upgrade, and spawns connection pumps.

use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;

use tokio::net::{TcpListener, TcpStream};
use tokio::sync::Semaphore;

use crate::error::Result;
use crate::registry::Registry;
use crate::server::config::ServerConfig;
use crate::server::transport::run_session;
use crate::session::SessionContext;
use crate::stats::ServerStats;

#[derive(Debug, Default)]
struct ServerCounters {
    total_connections: AtomicU64,
    active_connections: AtomicU64,
    rejected_connections: AtomicU64,
}

/// Pub/sub server
pub struct PubSubServer {
    config: ServerConfig,
    registry: Arc<Registry>,
    connection_semaphore: Option<Arc<Semaphore>>,
    counters: Arc<ServerCounters>,
    started_at: Instant,
}

impl PubSubServer {
    /// Create a new server with its own registry
    pub fn new(config: ServerConfig) -> Self {
        Self::with_registry(config, Arc::new(Registry::new()))
    }

    /// Create a server around an existing registry
    ///
    /// Useful when server-side code subscribes or publishes before the
    /// server starts accepting peers.
    pub fn with_registry(config: ServerConfig, registry: Arc<Registry>) -> Self {
        let connection_semaphore = if config.max_connections > 0 {
            Some(Arc::new(Semaphore::new(config.max_connections)))
        } else {
            None
        };

        Self {
            config,
            registry,
            connection_semaphore,
            counters: Arc::new(ServerCounters::default()),
            started_at: Instant::now(),
        }
    }

    /// Get a reference to the registry
    pub fn registry(&self) -> &Arc<Registry> {
        &self.registry
    }

    /// Get the configuration
    pub fn config(&self) -> &ServerConfig {
        &self.config
    }

    /// Get server-wide statistics
    pub fn stats(&self) -> ServerStats {
        ServerStats {
            total_connections: self.counters.total_connections.load(Ordering::Relaxed),
            active_connections: self.counters.active_connections.load(Ordering::Relaxed),
            rejected_connections: self.counters.rejected_connections.load(Ordering::Relaxed),
            uptime: self.started_at.elapsed(),
        }
    }

    /// Run the server
    ///
    /// This method blocks until the listener fails.
    pub async fn run(&self) -> Result<()> {
        let listener = TcpListener::bind(self.config.bind_addr).await?;
        self.serve(listener).await
    }

    /// Run the server with graceful shutdown
    pub async fn run_until<F>(&self, shutdown: F) -> Result<()>
    where
        F: std::future::Future<Output = ()>,
    {
        let listener = TcpListener::bind(self.config.bind_addr).await?;

        tokio::select! {
            _ = shutdown => {
                tracing::info!("Shutdown signal received");
                Ok(())
            }
            result = self.serve(listener) => result,
        }
    }

    /// Accept connections on an already-bound listener
    pub async fn serve(&self, listener: TcpListener) -> Result<()> {
        let addr = listener.local_addr()?;
        tracing::info!(addr = %addr, "Pub/sub server listening");

        loop {
            match listener.accept().await {
                Ok((socket, peer_addr)) => {
                    self.handle_connection(socket, peer_addr);
                }
                Err(e) => {
                    tracing::error!(error = %e, "Failed to accept connection");
                }
            }
        }
    }

    fn handle_connection(&self, socket: TcpStream, peer_addr: SocketAddr) {
        // Check connection limit
        let permit = if let Some(ref sem) = self.connection_semaphore {
            match sem.clone().try_acquire_owned() {
                Ok(permit) => Some(permit),
                Err(_) => {
                    self.counters
                        .rejected_connections
                        .fetch_add(1, Ordering::Relaxed);
                    tracing::warn!(peer = %peer_addr, "Connection rejected: limit reached");
                    return;
                }
            }
        } else {
            None
        };

        if let Err(e) = self.configure_socket(&socket) {
            tracing::error!(error = %e, "Failed to configure socket");
            return;
        }

        let context = SessionContext::new(peer_addr)
            .max_frame_size(self.config.max_frame_size)
            .send_queue_capacity(self.config.send_queue_capacity);
        let session_id = context.session_id;
        let registry = Arc::clone(&self.registry);
        let counters = Arc::clone(&self.counters);

        tracing::debug!(session_id = %session_id, peer = %peer_addr, "New connection");

        tokio::spawn(async move {
            let _permit = permit;

            let ws = match tokio_tungstenite::accept_async(socket).await {
                Ok(ws) => ws,
                Err(e) => {
                    tracing::debug!(
                        session_id = %session_id,
                        peer = %peer_addr,
                        error = %e,
                        "WebSocket handshake failed"
                    );
                    return;
                }
            };

            counters.total_connections.fetch_add(1, Ordering::Relaxed);
            counters.active_connections.fetch_add(1, Ordering::Relaxed);
            tracing::info!(session_id = %session_id, peer = %peer_addr, "WebSocket connection established");

            if let Err(e) = run_session(ws, context, registry).await {
                tracing::debug!(
                    session_id = %session_id,
                    error = %e,
                    "Connection error"
                );
            }

            counters.active_connections.fetch_sub(1, Ordering::Relaxed);
        });
    }

    fn configure_socket(&self, socket: &TcpStream) -> std::io::Result<()> {
        if self.config.tcp_nodelay {
            socket.set_nodelay(true)?;
        }
        Ok(())
    }

    /// Get the bind address
    pub fn bind_addr(&self) -> SocketAddr {
        self.config.bind_addr
    }
}
