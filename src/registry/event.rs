//! Event envelope
//!
//! One event is built per channel per publish and shared by reference with
//! every subscriber of that channel.

use crate::protocol::{Origin, Value, Visibility};

use super::subscriber::{Subscriber, SubscriberId};

/// An immutable published value plus its provenance and scope
#[derive(Debug, Clone)]
pub struct Event {
    value: Value,
    publisher: Option<SubscriberId>,
    origin: Origin,
    visibility: Visibility,
}

impl Event {
    /// Build an event; the origin follows from the publisher
    ///
    /// Only the publisher's id is kept, so an event never extends the
    /// lifetime of the connection that produced it.
    pub fn new(value: Value, publisher: Option<&dyn Subscriber>, visibility: Visibility) -> Self {
        Self {
            value,
            publisher: publisher.map(|p| p.id()),
            origin: publisher.map_or(Origin::Server, |p| p.origin()),
            visibility,
        }
    }

    pub fn value(&self) -> &Value {
        &self.value
    }

    /// Id of the publishing subscriber, `None` for anonymous server publishes
    pub fn publisher(&self) -> Option<SubscriberId> {
        self.publisher
    }

    pub fn origin(&self) -> Origin {
        self.origin
    }

    pub fn visibility(&self) -> Visibility {
        self.visibility
    }

    /// Whether `id` published this event
    pub fn is_from(&self, id: SubscriberId) -> bool {
        self.publisher == Some(id)
    }
}
