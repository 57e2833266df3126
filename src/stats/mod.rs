//! Connection, registry and server statistics

pub mod metrics;

pub use metrics::{RegistryStats, ServerStats, SessionCounters, SessionStats};
