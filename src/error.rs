//! Crate-wide error type

/// Result alias used by server entry points
pub type Result<T> = std::result::Result<T, Error>;

/// Errors surfaced by the server and transport layers
///
/// Registry and channel operations never fail; only I/O and the WebSocket
/// layer produce errors. Malformed sync-protocol frames are dropped per frame
/// by the connection and reported as [`crate::protocol::ProtocolError`],
/// never as a session error.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Socket-level failure (bind, accept, configure)
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// WebSocket handshake or framing failure
    #[error("WebSocket error: {0}")]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),
}
