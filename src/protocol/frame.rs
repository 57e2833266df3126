//! Sync-protocol frames
//!
//! Three text frames travel in both directions:
//!
//! ```text
//! Publish:      p<visibility digit><name list byte length>:<name list><value>
//! Subscribe:    s<name list>
//! Unsubscribe:  u<name list>
//! ```
//!
//! Name lists use the escaping in [`super::names`]; values use the tagged
//! encoding in [`super::value`].

use super::error::ProtocolError;
use super::names::{parse_names, stringify_names};
use super::value::Value;
use super::visibility::Visibility;

/// Leading command characters
pub const PUBLISH: char = 'p';
pub const SUBSCRIBE: char = 's';
pub const UNSUBSCRIBE: char = 'u';

/// A decoded inbound frame
#[derive(Debug, Clone, PartialEq)]
pub enum Frame {
    /// Publish one value to every listed channel
    Publish {
        visibility: Visibility,
        channels: Vec<String>,
        value: Value,
    },
    /// Subscribe to the listed channels
    Subscribe(Vec<String>),
    /// Unsubscribe from the listed channels
    Unsubscribe(Vec<String>),
}

impl Frame {
    /// Parse a text frame
    ///
    /// Parsing is all-or-nothing: a frame that fails anywhere yields an
    /// error and nothing else.
    pub fn parse(text: &str) -> Result<Self, ProtocolError> {
        let mut chars = text.chars();
        let command = chars.next().ok_or(ProtocolError::EmptyFrame)?;
        let rest = chars.as_str();

        match command {
            PUBLISH => Self::parse_publish(rest),
            SUBSCRIBE => Ok(Frame::Subscribe(parse_names(rest))),
            UNSUBSCRIBE => Ok(Frame::Unsubscribe(parse_names(rest))),
            other => Err(ProtocolError::UnknownCommand(other)),
        }
    }

    fn parse_publish(rest: &str) -> Result<Self, ProtocolError> {
        let mut chars = rest.chars();
        let digit = chars.next();
        let visibility = digit
            .and_then(Visibility::from_digit)
            .ok_or(ProtocolError::InvalidVisibility(digit))?;
        let rest = chars.as_str();

        let colon = rest.find(':').ok_or(ProtocolError::InvalidLength)?;
        let len_field = &rest[..colon];
        if len_field.is_empty() || !len_field.bytes().all(|b| b.is_ascii_digit()) {
            return Err(ProtocolError::InvalidLength);
        }
        let declared: usize = len_field
            .parse()
            .map_err(|_| ProtocolError::InvalidLength)?;

        let body = &rest[colon + 1..];
        let truncated = ProtocolError::Truncated {
            declared,
            available: body.len(),
        };
        let list = body.get(..declared).ok_or_else(|| truncated.clone())?;
        let data = body.get(declared..).ok_or(truncated)?;

        Ok(Frame::Publish {
            visibility,
            channels: parse_names(list),
            value: Value::decode(data)?,
        })
    }

    /// Encode this frame as text
    pub fn encode(&self) -> String {
        match self {
            Frame::Publish {
                visibility,
                channels,
                value,
            } => encode_publish(*visibility, channels, value),
            Frame::Subscribe(channels) => encode_subscribe(channels),
            Frame::Unsubscribe(channels) => encode_unsubscribe(channels),
        }
    }
}

/// Build a publish frame without cloning the value
pub fn encode_publish<S: AsRef<str>>(
    visibility: Visibility,
    channels: &[S],
    value: &Value,
) -> String {
    let list = stringify_names(channels);
    let mut out = String::with_capacity(list.len() + 16);
    out.push(PUBLISH);
    out.push(visibility.as_digit());
    out.push_str(&list.len().to_string());
    out.push(':');
    out.push_str(&list);
    value.encode_into(&mut out);
    out
}

/// Build a subscribe frame
pub fn encode_subscribe<S: AsRef<str>>(channels: &[S]) -> String {
    format!("{}{}", SUBSCRIBE, stringify_names(channels))
}

/// Build an unsubscribe frame
pub fn encode_unsubscribe<S: AsRef<str>>(channels: &[S]) -> String {
    format!("{}{}", UNSUBSCRIBE, stringify_names(channels))
}
