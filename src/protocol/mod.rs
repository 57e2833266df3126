//! Sync-protocol wire format
//!
//! Text frames that carry publishes and mirror subscription state between
//! the server and its peers.
//!
//! - [`frame`]: publish / subscribe / unsubscribe frames
//! - [`names`]: escaped channel-name lists
//! - [`value`]: tagged value encoding
//! - [`visibility`]: publish scope and origin

pub mod error;
pub mod frame;
pub mod names;
pub mod value;
pub mod visibility;

pub use error::ProtocolError;
pub use frame::{encode_publish, encode_subscribe, encode_unsubscribe, Frame};
pub use names::{parse_names, stringify_names};
pub use value::{JsonPayload, Value, ValueKind};
pub use visibility::{Origin, Visibility};
