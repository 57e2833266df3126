//! Protocol error types
//!
//! Every way an inbound frame can be rejected. All of these are
//! recoverable: the frame is dropped and the connection stays open.

/// Error type for frame and value decoding
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ProtocolError {
    /// Frame had no content at all
    #[error("Empty frame")]
    EmptyFrame,

    /// Leading command character is not `p`, `s` or `u`
    #[error("Unknown command: {0:?}")]
    UnknownCommand(char),

    /// Visibility digit missing or outside 0..=2
    #[error("Invalid visibility: {0:?}")]
    InvalidVisibility(Option<char>),

    /// Name-list length prefix missing, non-numeric or unterminated
    #[error("Invalid channel list length")]
    InvalidLength,

    /// Declared name-list length runs past the frame or splits a character
    #[error("Channel list truncated: declared {declared} bytes, {available} available")]
    Truncated { declared: usize, available: usize },

    /// Value encoding had no tag character
    #[error("Empty value")]
    EmptyValue,

    /// Integer payload is not a valid i64
    #[error("Invalid integer payload: {0:?}")]
    InvalidInteger(String),

    /// Float payload is not a valid f64
    #[error("Invalid float payload: {0:?}")]
    InvalidFloat(String),

    /// Frame exceeds the configured size limit
    #[error("Frame too large: {size} bytes (limit {limit})")]
    FrameTooLarge { size: usize, limit: usize },
}
