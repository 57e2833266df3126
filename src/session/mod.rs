//! Per-connection session handling
//!
//! - [`connection`]: the connected peer: frame dispatch, local channel set,
//!   relaying and mirroring
//! - [`context`]: identity and transport details of a peer

pub mod connection;
pub mod context;

pub use connection::{Connection, Outbound, OutboundError};
pub use context::SessionContext;
