//! Published values
//!
//! A value travels as `<tag><payload>`:
//!
//! | Tag | Variant | Payload |
//! |-----|---------|---------|
//! | `n` | `Null` | empty |
//! | `i` | `Integer` | decimal i64 |
//! | `f` | `Float` | decimal f64 |
//! | `s` | `String` | literal text |
//! | `j` | `Json` | pre-rendered JSON text |
//!
//! JSON values published by the server keep their structured form so that
//! in-process subscribers can read them without a parse. The JSON text is
//! rendered once, the first time something asks for it. JSON values that
//! arrive over the wire stay as text.

use std::sync::OnceLock;

use super::error::ProtocolError;

/// JSON payload of a [`Value::Json`]
#[derive(Debug, Clone)]
pub struct JsonPayload {
    object: Option<serde_json::Value>,
    text: OnceLock<String>,
}

impl JsonPayload {
    /// Wrap a structured value; the text form is rendered on demand
    pub fn from_object(object: serde_json::Value) -> Self {
        Self {
            object: Some(object),
            text: OnceLock::new(),
        }
    }

    /// Wrap JSON text received from a peer
    pub fn from_text(text: impl Into<String>) -> Self {
        Self {
            object: None,
            text: OnceLock::from(text.into()),
        }
    }

    /// The structured value, if this payload was built server-side
    pub fn object(&self) -> Option<&serde_json::Value> {
        self.object.as_ref()
    }

    /// JSON text, rendered and cached on first call
    pub fn as_str(&self) -> &str {
        self.text.get_or_init(|| match &self.object {
            Some(object) => object.to_string(),
            None => String::new(),
        })
    }
}

impl PartialEq for JsonPayload {
    fn eq(&self, other: &Self) -> bool {
        self.as_str() == other.as_str()
    }
}

/// Value variant tag
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ValueKind {
    Null,
    Integer,
    Float,
    String,
    Json,
}

impl ValueKind {
    /// Tag character used on the wire
    pub fn tag(self) -> char {
        match self {
            ValueKind::Null => 'n',
            ValueKind::Integer => 'i',
            ValueKind::Float => 'f',
            ValueKind::String => 's',
            ValueKind::Json => 'j',
        }
    }
}

/// A published payload
#[derive(Debug, Clone, PartialEq, Default)]
pub enum Value {
    #[default]
    Null,
    Integer(i64),
    Float(f64),
    String(String),
    Json(JsonPayload),
}

impl Value {
    /// Wrap a structured JSON value
    pub fn json(object: serde_json::Value) -> Self {
        Value::Json(JsonPayload::from_object(object))
    }

    /// Decode a wire value
    ///
    /// An unknown tag decodes as `Null` and its payload is ignored.
    pub fn decode(wire: &str) -> Result<Self, ProtocolError> {
        let mut chars = wire.chars();
        let tag = chars.next().ok_or(ProtocolError::EmptyValue)?;
        let payload = chars.as_str();

        let value = match tag {
            's' => Value::String(payload.to_string()),
            'j' => Value::Json(JsonPayload::from_text(payload)),
            'i' => Value::Integer(
                payload
                    .parse()
                    .map_err(|_| ProtocolError::InvalidInteger(payload.to_string()))?,
            ),
            'f' => Value::Float(
                payload
                    .parse()
                    .map_err(|_| ProtocolError::InvalidFloat(payload.to_string()))?,
            ),
            _ => Value::Null,
        };

        Ok(value)
    }

    /// Encode for the wire
    pub fn encode(&self) -> String {
        let mut out = String::new();
        self.encode_into(&mut out);
        out
    }

    /// Append the wire encoding to an existing buffer
    pub fn encode_into(&self, out: &mut String) {
        out.push(self.kind().tag());
        match self {
            Value::Null => {}
            Value::Integer(i) => out.push_str(&i.to_string()),
            Value::Float(f) => out.push_str(&f.to_string()),
            Value::String(s) => out.push_str(s),
            Value::Json(j) => out.push_str(j.as_str()),
        }
    }

    /// Variant tag
    pub fn kind(&self) -> ValueKind {
        match self {
            Value::Null => ValueKind::Null,
            Value::Integer(_) => ValueKind::Integer,
            Value::Float(_) => ValueKind::Float,
            Value::String(_) => ValueKind::String,
            Value::Json(_) => ValueKind::Json,
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    /// Integer payload
    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Value::Integer(i) => Some(*i),
            _ => None,
        }
    }

    /// Numeric payload (integers widen to f64)
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Float(f) => Some(*f),
            Value::Integer(i) => Some(*i as f64),
            _ => None,
        }
    }

    /// String payload, or the JSON text of a JSON value
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::String(s) => Some(s),
            Value::Json(j) => Some(j.as_str()),
            _ => None,
        }
    }

    /// Structured JSON, only for values published server-side
    pub fn as_json(&self) -> Option<&serde_json::Value> {
        match self {
            Value::Json(j) => j.object(),
            _ => None,
        }
    }
}

impl std::fmt::Display for Value {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Value::Null => f.write_str("null"),
            Value::Integer(i) => write!(f, "{}", i),
            Value::Float(x) => write!(f, "{}", x),
            Value::String(s) => f.write_str(s),
            Value::Json(j) => f.write_str(j.as_str()),
        }
    }
}

impl From<()> for Value {
    fn from(_: ()) -> Self {
        Value::Null
    }
}

macro_rules! impl_from_int {
    ($($t:ty),*) => {
        $(
            impl From<$t> for Value {
                fn from(v: $t) -> Self {
                    Value::Integer(i64::from(v))
                }
            }
        )*
    };
}

impl_from_int!(i8, i16, i32, i64, u8, u16, u32);

impl From<f32> for Value {
    fn from(v: f32) -> Self {
        Value::Float(f64::from(v))
    }
}

impl From<f64> for Value {
    fn from(v: f64) -> Self {
        Value::Float(v)
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Value::String(v.to_string())
    }
}

impl From<String> for Value {
    fn from(v: String) -> Self {
        Value::String(v)
    }
}

impl From<serde_json::Value> for Value {
    fn from(v: serde_json::Value) -> Self {
        Value::json(v)
    }
}
