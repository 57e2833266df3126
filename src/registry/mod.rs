//! Channel registry for pub/sub routing
//!
//! The registry owns every channel and every connected peer. It decides when
//! a channel becomes active or inactive and tells all peers, so each peer
//! can tell locally whether a channel has any audience before it publishes.
//!
//! # Architecture
//!
//! ```text
//!                           Arc<Registry>
//!                  ┌──────────────────────────────┐
//!                  │ channels: HashMap<name,      │
//!                  │   Arc<Channel> {             │
//!                  │     subscribers, pending }>  │
//!                  │ active:   Vec<name>          │
//!                  │ peers:    Vec<Arc<dyn Peer>> │
//!                  └──────┬──────────────┬────────┘
//!                         │              │
//!            data events  │              │ sync events
//!       Channel::notify() ▼              ▼ mirror_subscribe()/unsubscribe()
//!        ┌────────────┬────────┐   ┌──────────┬──────────┐
//!        ▼            ▼        ▼   ▼          ▼          ▼
//!   [Connection] [Inbox]  [FnSub] [Conn A]  [Conn B]  [Conn C]
//! ```
//!
//! Two independent fan-outs leave the registry: channel events go to a
//! channel's subscribers, and directory changes go to every peer.

pub mod channel;
pub mod event;
pub mod store;
pub mod subscriber;

pub use channel::{Channel, ChannelStats};
pub use event::Event;
pub use store::Registry;
pub use subscriber::{FnSubscriber, Inbox, Peer, Subscriber, SubscriberId};
