//! Pattern normalization.
//!
//! A [`Pattern`] is whatever the caller uses to address a handler: a plain
//! string, a number, or a structured JSON object. Patterns are never compared
//! directly; they are first reduced to a canonical [`Route`] string.
//!
//! Canonical form:
//! - strings that parse as a JSON object or array are replaced by the parsed value
//! - objects render as `{"k1":v1,"k2":v2}` with keys sorted at every level
//! - arrays render as `[v1,v2]`
//! - strings nested inside structures are JSON-quoted
//! - top-level scalars render as their literal text (strings unquoted)

use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// A caller-supplied route identifier.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Pattern(pub Value);

impl Pattern {
    /// Whether the pattern is null (no route at all).
    pub fn is_nil(&self) -> bool {
        self.0.is_null()
    }

    /// The underlying JSON value.
    pub fn as_value(&self) -> &Value {
        &self.0
    }

    /// Canonical route for this pattern.
    pub fn route(&self) -> Route {
        normalize(self)
    }
}

impl From<&str> for Pattern {
    fn from(value: &str) -> Self {
        Self(Value::String(value.to_owned()))
    }
}

impl From<String> for Pattern {
    fn from(value: String) -> Self {
        Self(Value::String(value))
    }
}

impl From<Value> for Pattern {
    fn from(value: Value) -> Self {
        Self(value)
    }
}

impl From<i64> for Pattern {
    fn from(value: i64) -> Self {
        Self(Value::from(value))
    }
}

impl From<u64> for Pattern {
    fn from(value: u64) -> Self {
        Self(Value::from(value))
    }
}

/// Canonical string form of a [`Pattern`]; the registry key.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Route(String);

impl Route {
    /// Borrow the route text.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Take the route text.
    pub fn into_string(self) -> String {
        self.0
    }
}

impl fmt::Display for Route {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for Route {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// Normalize a pattern to its canonical route.
///
/// Pure and total: malformed structured-looking strings fall back to the raw
/// string.
pub fn normalize(pattern: &Pattern) -> Route {
    match &pattern.0 {
        Value::String(raw) => route_from_str(raw),
        other => Route(canonical(other, false)),
    }
}

/// Normalize a pattern that arrived as text (e.g. a channel name or a
/// JSON-encoded structured pattern).
pub fn route_from_str(raw: &str) -> Route {
    match serde_json::from_str::<Value>(raw) {
        Ok(parsed @ (Value::Object(_) | Value::Array(_))) => Route(canonical(&parsed, false)),
        _ => Route(raw.to_owned()),
    }
}

fn canonical(value: &Value, nested: bool) -> String {
    match value {
        Value::String(s) if nested => quote(s),
        Value::String(s) => s.clone(),
        Value::Object(map) => {
            let mut entries: Vec<(&String, &Value)> = map.iter().collect();
            entries.sort_by(|a, b| a.0.cmp(b.0));
            let parts: Vec<String> = entries
                .into_iter()
                .map(|(key, val)| format!("{}:{}", quote(key), canonical(val, true)))
                .collect();
            format!("{{{}}}", parts.join(","))
        }
        Value::Array(items) => {
            let parts: Vec<String> = items.iter().map(|item| canonical(item, true)).collect();
            format!("[{}]", parts.join(","))
        }
        // Numbers, booleans and null render as their JSON text.
        other => other.to_string(),
    }
}

fn quote(s: &str) -> String {
    Value::String(s.to_owned()).to_string()
}
