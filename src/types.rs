use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// A typed field value as stored locally.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum FieldValue {
    Bool(bool),
    Number(f64),
    Text(String),
}

impl FieldValue {
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            FieldValue::Number(n) => Some(*n),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            FieldValue::Text(s) => Some(s),
            _ => None,
        }
    }

    pub fn kind(&self) -> ValueKind {
        match self {
            FieldValue::Bool(_) => ValueKind::Boolean,
            FieldValue::Number(_) => ValueKind::Number,
            FieldValue::Text(_) => ValueKind::String,
        }
    }
}

impl fmt::Display for FieldValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FieldValue::Bool(b) => write!(f, "{b}"),
            FieldValue::Number(n) => write!(f, "{n}"),
            FieldValue::Text(s) => write!(f, "{s}"),
        }
    }
}

impl From<f64> for FieldValue {
    fn from(n: f64) -> Self {
        FieldValue::Number(n)
    }
}

impl From<bool> for FieldValue {
    fn from(b: bool) -> Self {
        FieldValue::Bool(b)
    }
}

impl From<&str> for FieldValue {
    fn from(s: &str) -> Self {
        FieldValue::Text(s.to_string())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ValueKind {
    Number,
    Boolean,
    String,
}

/// Semantic role of a field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    Temperature,
    Humidity,
    Battery,
    Switch,
    EnumText,
    Indicator,
    Generic,
}

impl Role {
    pub fn is_temperature(&self) -> bool {
        matches!(self, Role::Temperature)
    }
}

/// Object metadata for a single field.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FieldMeta {
    pub name: String,
    pub kind: ValueKind,
    pub role: Role,
    pub unit: String,
    pub writable: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum ObjectMeta {
    Device { name: String, device_type: String },
    State(FieldMeta),
}

/// A device as reported by the cloud listing.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Device {
    /// Vendor identifier, used on the wire.
    pub id: String,
    pub name: String,
    pub device_type: String,
    pub online: bool,
    /// Canonical code to raw vendor value.
    pub status: BTreeMap<String, Value>,
    pub raw: Value,
}

impl Device {
    /// Sanitized identifier used in local state keys.
    pub fn key(&self) -> String {
        sanitize_id(&self.id)
    }
}

/// A single `{code, value}` entry of a command batch.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Command {
    pub code: String,
    pub value: Value,
}

impl Command {
    pub fn new(code: impl Into<String>, value: Value) -> Self {
        Self {
            code: code.into(),
            value,
        }
    }
}

/// Stored value plus its acknowledged flag.
#[derive(Debug, Clone, PartialEq)]
pub struct StoredState {
    pub value: FieldValue,
    pub ack: bool,
}

/// Replace every character outside `[A-Za-z0-9_-]` with `_`.
pub fn sanitize_id(id: &str) -> String {
    id.trim()
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '_' || c == '-' {
                c
            } else {
                '_'
            }
        })
        .collect()
}

pub fn state_key(device_key: &str, code: &str) -> String {
    format!("{device_key}.{code}")
}

pub fn online_key(device_key: &str) -> String {
    state_key(device_key, "online")
}

/// Split `<deviceKey>.<code>` into its parts.
pub fn split_key(key: &str) -> Option<(&str, &str)> {
    let (device, code) = key.split_once('.')?;
    if device.is_empty() || code.is_empty() {
        return None;
    }
    Some((device, code))
}
