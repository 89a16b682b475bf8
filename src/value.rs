//! Structured payload and result values.
//!
//! Jobs carry a [`Payload`] (a string-keyed map of [`Value`]s) into a task and
//! receive one back. The value set is closed so each task can validate its
//! input at the boundary with the accessors below.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// Map of string keys to values, passed to and returned from tasks.
pub type Payload = BTreeMap<String, Value>;

/// A single structured value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Value {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    String(String),
    Array(Vec<Value>),
    Map(Payload),
}

impl Value {
    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Self::Bool(b) => Some(*b),
            _ => None,
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Self::Int(i) => Some(*i),
            _ => None,
        }
    }

    /// Numeric view of the value; integers are widened.
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Self::Int(i) => Some(*i as f64),
            Self::Float(f) => Some(*f),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::String(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_map(&self) -> Option<&Payload> {
        match self {
            Self::Map(m) => Some(m),
            _ => None,
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Self::Null)
    }

    /// False if any float in the value is NaN or infinite. JSON has no
    /// encoding for those.
    pub fn is_finite(&self) -> bool {
        match self {
            Self::Float(f) => f.is_finite(),
            Self::Array(items) => items.iter().all(Value::is_finite),
            Self::Map(map) => map.values().all(Value::is_finite),
            _ => true,
        }
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Self::Bool(b)
    }
}

impl From<i64> for Value {
    fn from(i: i64) -> Self {
        Self::Int(i)
    }
}

impl From<i32> for Value {
    fn from(i: i32) -> Self {
        Self::Int(i64::from(i))
    }
}

impl From<u32> for Value {
    fn from(i: u32) -> Self {
        Self::Int(i64::from(i))
    }
}

impl From<f64> for Value {
    fn from(f: f64) -> Self {
        Self::Float(f)
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Self::String(s.to_string())
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Self::String(s)
    }
}

impl From<Vec<Value>> for Value {
    fn from(items: Vec<Value>) -> Self {
        Self::Array(items)
    }
}

impl From<Payload> for Value {
    fn from(map: Payload) -> Self {
        Self::Map(map)
    }
}

/// Short description of a payload for error details: its keys, sorted.
pub fn payload_summary(payload: &Payload) -> String {
    if payload.is_empty() {
        return "<empty>".to_string();
    }
    payload.keys().map(String::as_str).collect::<Vec<_>>().join(", ")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn nested_non_finite_is_detected() {
        assert!(Value::from(1.5).is_finite());
        assert!(!Value::from(f64::NAN).is_finite());
        let nested = Value::Map(Payload::from([(
            "inner".to_string(),
            Value::Array(vec![Value::from(1), Value::from(f64::INFINITY)]),
        )]));
        assert!(!nested.is_finite());
    }

    #[test]
    fn integers_and_floats_stay_distinct() {
        let payload: Payload = serde_json::from_str(r#"{"x": 1, "y": 1.5, "z": null}"#).unwrap();
        assert_eq!(payload["x"], Value::Int(1));
        assert_eq!(payload["y"], Value::Float(1.5));
        assert!(payload["z"].is_null());
    }

    #[test]
    fn nested_values_parse() {
        let payload: Payload =
            serde_json::from_str(r#"{"tags": ["a", true], "meta": {"n": -3}}"#).unwrap();
        assert_eq!(
            payload["tags"],
            Value::Array(vec![Value::from("a"), Value::from(true)])
        );
        let meta = payload["meta"].as_map().unwrap();
        assert_eq!(meta["n"].as_i64(), Some(-3));
        assert_eq!(meta["n"].as_f64(), Some(-3.0));
    }

    #[test]
    fn serializes_as_plain_json() {
        let payload = Payload::from([
            ("name".to_string(), Value::from("riser")),
            ("floors".to_string(), Value::from(12)),
        ]);
        let json = serde_json::to_string(&payload).unwrap();
        assert_eq!(json, r#"{"floors":12,"name":"riser"}"#);
    }

    #[test]
    fn summary_lists_sorted_keys() {
        let payload = Payload::from([
            ("b".to_string(), Value::Null),
            ("a".to_string(), Value::from(1)),
        ]);
        assert_eq!(payload_summary(&payload), "a, b");
        assert_eq!(payload_summary(&Payload::new()), "<empty>");
    }
}
