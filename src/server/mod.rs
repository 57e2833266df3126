//! WebSocket server
//!
//! - [`config`]: listener options
//! - [`listener`]: accept loop and connection limit
//! - [`transport`]: per-connection socket pump

pub mod config;
pub mod listener;
pub mod transport;

pub use config::ServerConfig;
pub use listener::PubSubServer;
pub use transport::run_session;
