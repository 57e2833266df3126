//! # wsps-rs
//!
//! A WebSocket pub/sub broker whose peers always know which channels have
//! an audience.
//!
//! Any peer, or the server itself, publishes typed values to named
//! channels; every current subscriber receives them. On top of that data
//! path the server mirrors its directory of active channels (those with at
//! least one subscriber anywhere) to every connected peer, so a peer can
//! skip publishing to a channel nobody listens to without asking.
//!
//! ```text
//!  peer ──text frame──► Connection ──► Registry ──► Channel::notify
//!                           ▲              │              │
//!                           │   mirror s/u │              ▼
//!  peer ◄──text frame───────┴──────────────┘      subscribers (Connections,
//!                                                 in-process Inbox / FnSubscriber)
//! ```
//!
//! ## Modules
//!
//! - [`protocol`]: text wire format (frames, values, channel lists)
//! - [`registry`]: channels, subscribers and the mirrored directory
//! - [`session`]: one connected peer
//! - [`server`]: WebSocket listener and transport
//! - [`stats`]: counters
//!
//! ## Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use wsps_rs::{Inbox, PubSubServer, Registry, ServerConfig, Visibility};
//!
//! # async fn run() -> wsps_rs::Result<()> {
//! let registry = Arc::new(Registry::new());
//!
//! let (inbox, mut events) = Inbox::new();
//! registry.subscribe("chat", inbox);
//! tokio::spawn(async move {
//!     while let Some((channel, event)) = events.recv().await {
//!         println!("{channel}: {}", event.value());
//!     }
//! });
//!
//! registry.publish("chat", "server says hi", None, Visibility::All);
//!
//! let server = PubSubServer::with_registry(ServerConfig::default(), registry);
//! server.run().await
//! # }
//! ```

pub mod error;
pub mod protocol;
pub mod registry;
pub mod server;
pub mod session;
pub mod stats;

pub use error::{Error, Result};
pub use protocol::{Frame, Origin, ProtocolError, Value, ValueKind, Visibility};
pub use registry::{Channel, Event, FnSubscriber, Inbox, Peer, Registry, Subscriber, SubscriberId};
pub use server::{PubSubServer, ServerConfig};
pub use session::{Connection, Outbound, OutboundError, SessionContext};
