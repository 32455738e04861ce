//! Message payloads carried on the bus.
//!
//! A [`Payload`] is a small dynamically typed value. The direct transport
//! hands the same value to every listener by reference; the network
//! transport serializes it with `bincode` (an internal contract between
//! same-version peers, no cross-version compatibility).

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// A message value.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub enum Payload {
    /// No value.
    #[default]
    Null,
    /// Boolean flag (switches, toggles).
    Bool(bool),
    /// Signed integer.
    Int(i64),
    /// Floating point value (steering angle, throttle, ...).
    Float(f64),
    /// UTF-8 text.
    Text(String),
    /// Opaque binary blob (encoded image, raw sensor frame).
    Bytes(Vec<u8>),
    /// Ordered sequence.
    List(Vec<Payload>),
    /// String-keyed record.
    Map(BTreeMap<String, Payload>),
}

impl Payload {
    /// Numeric view: ints and floats as `f64`, bools as 0/1.
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Payload::Int(v) => Some(*v as f64),
            Payload::Float(v) => Some(*v),
            Payload::Bool(v) => Some(if *v { 1.0 } else { 0.0 }),
            _ => None,
        }
    }

    /// Integer view; floats are accepted only when they are whole numbers.
    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Payload::Int(v) => Some(*v),
            Payload::Float(v) if v.fract() == 0.0 && v.is_finite() => Some(*v as i64),
            _ => None,
        }
    }

    /// Boolean view.
    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Payload::Bool(v) => Some(*v),
            _ => None,
        }
    }

    /// Text view.
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Payload::Text(v) => Some(v),
            _ => None,
        }
    }

    /// Whether this is [`Payload::Null`].
    pub fn is_null(&self) -> bool {
        matches!(self, Payload::Null)
    }

    /// Natural JSON rendering for human-readable sinks (logs, recordings).
    ///
    /// Non-finite floats become `null`, bytes become an array of numbers.
    pub fn to_json(&self) -> serde_json::Value {
        use serde_json::Value;
        match self {
            Payload::Null => Value::Null,
            Payload::Bool(v) => Value::Bool(*v),
            Payload::Int(v) => Value::from(*v),
            Payload::Float(v) => serde_json::Number::from_f64(*v)
                .map(Value::Number)
                .unwrap_or(Value::Null),
            Payload::Text(v) => Value::String(v.clone()),
            Payload::Bytes(v) => Value::Array(v.iter().map(|b| Value::from(*b)).collect()),
            Payload::List(v) => Value::Array(v.iter().map(Payload::to_json).collect()),
            Payload::Map(v) => Value::Object(
                v.iter()
                    .map(|(k, item)| (k.clone(), item.to_json()))
                    .collect(),
            ),
        }
    }
}

impl fmt::Display for Payload {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Payload::Bytes(v) => write!(f, "<{} bytes>", v.len()),
            other => write!(f, "{}", other.to_json()),
        }
    }
}

impl From<bool> for Payload {
    fn from(v: bool) -> Self {
        Payload::Bool(v)
    }
}

impl From<i32> for Payload {
    fn from(v: i32) -> Self {
        Payload::Int(v.into())
    }
}

impl From<i64> for Payload {
    fn from(v: i64) -> Self {
        Payload::Int(v)
    }
}

impl From<u32> for Payload {
    fn from(v: u32) -> Self {
        Payload::Int(v.into())
    }
}

impl From<f32> for Payload {
    fn from(v: f32) -> Self {
        Payload::Float(v.into())
    }
}

impl From<f64> for Payload {
    fn from(v: f64) -> Self {
        Payload::Float(v)
    }
}

impl From<&str> for Payload {
    fn from(v: &str) -> Self {
        Payload::Text(v.to_string())
    }
}

impl From<String> for Payload {
    fn from(v: String) -> Self {
        Payload::Text(v)
    }
}

impl From<Vec<u8>> for Payload {
    fn from(v: Vec<u8>) -> Self {
        Payload::Bytes(v)
    }
}

impl From<Vec<Payload>> for Payload {
    fn from(v: Vec<Payload>) -> Self {
        Payload::List(v)
    }
}

impl From<BTreeMap<String, Payload>> for Payload {
    fn from(v: BTreeMap<String, Payload>) -> Self {
        Payload::Map(v)
    }
}

impl<T: Into<Payload>> From<Option<T>> for Payload {
    fn from(v: Option<T>) -> Self {
        v.map(Into::into).unwrap_or(Payload::Null)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn numeric_views() {
        assert_eq!(Payload::from(42).as_f64(), Some(42.0));
        assert_eq!(Payload::from(0.5).as_f64(), Some(0.5));
        assert_eq!(Payload::from(true).as_f64(), Some(1.0));
        assert_eq!(Payload::from("x").as_f64(), None);

        assert_eq!(Payload::from(3.0).as_i64(), Some(3));
        assert_eq!(Payload::from(3.5).as_i64(), None);
    }

    #[test]
    fn option_maps_none_to_null() {
        assert!(Payload::from(None::<i64>).is_null());
        assert_eq!(Payload::from(Some(7)), Payload::Int(7));
    }

    #[test]
    fn json_rendering_is_natural() {
        let mut map = BTreeMap::new();
        map.insert("angle".to_string(), Payload::from(-0.25));
        map.insert("nan".to_string(), Payload::Float(f64::NAN));
        let value = Payload::List(vec![Payload::from(1), Payload::Map(map)]).to_json();
        assert_eq!(
            value,
            serde_json::json!([1, {"angle": -0.25, "nan": null}])
        );
    }

    #[test]
    fn display_summarizes_bytes() {
        assert_eq!(Payload::Bytes(vec![0; 16]).to_string(), "<16 bytes>");
        assert_eq!(Payload::from("go").to_string(), "\"go\"");
    }

    #[test]
    fn bincode_preserves_nested_values() {
        let mut map = BTreeMap::new();
        map.insert("frame".to_string(), Payload::Bytes(vec![1, 2, 3]));
        let original = Payload::List(vec![Payload::Null, Payload::Map(map)]);

        let bytes = bincode::serialize(&original).unwrap();
        let decoded: Payload = bincode::deserialize(&bytes).unwrap();
        assert_eq!(decoded, original);
    }
}
