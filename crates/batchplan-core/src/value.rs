//! Runtime values flowing from producer steps to consumer steps.
//!
//! Values are immutable once produced: consumers receive clones (cheap for
//! markers, which are reference counted) and never write back.

use std::fmt;
use std::sync::Arc;

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

use crate::polymorphic::PolymorphicMarker;

/// Ordered object payload; key order follows construction order.
pub type Object = IndexMap<String, Value>;

/// Attribute under which a polymorphic value reports its variant when
/// converted to JSON.
pub const TYPENAME_KEY: &str = "__typename";

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(from = "serde_json::Value", into = "serde_json::Value")]
pub enum Value {
    #[default]
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    String(String),
    List(Vec<Value>),
    Object(Object),
    Polymorphic(Arc<PolymorphicMarker>),
}

impl Value {
    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::String(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Value::Int(i) => Some(*i),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Bool(b) => Some(*b),
            _ => None,
        }
    }

    pub fn as_list(&self) -> Option<&[Value]> {
        match self {
            Value::List(items) => Some(items),
            _ => None,
        }
    }

    pub fn as_object(&self) -> Option<&Object> {
        match self {
            Value::Object(o) => Some(o),
            Value::Polymorphic(m) => m.data().as_object(),
            _ => None,
        }
    }

    /// Attribute lookup. Polymorphic values delegate to their payload.
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.as_object().and_then(|o| o.get(key))
    }

    /// Short label of the value's kind, used in error messages.
    pub fn kind(&self) -> &'static str {
        match self {
            Value::Null => "null",
            Value::Bool(_) => "boolean",
            Value::Int(_) => "int",
            Value::Float(_) => "float",
            Value::String(_) => "string",
            Value::List(_) => "list",
            Value::Object(_) => "object",
            Value::Polymorphic(_) => "polymorphic",
        }
    }

    pub fn to_json(&self) -> serde_json::Value {
        use serde_json::Value as J;
        match self {
            Value::Null => J::Null,
            Value::Bool(b) => J::Bool(*b),
            Value::Int(i) => J::from(*i),
            Value::Float(f) => serde_json::Number::from_f64(*f)
                .map(J::Number)
                .unwrap_or(J::Null),
            Value::String(s) => J::String(s.clone()),
            Value::List(items) => J::Array(items.iter().map(Value::to_json).collect()),
            Value::Object(o) => J::Object(
                o.iter()
                    .map(|(k, v)| (k.clone(), v.to_json()))
                    .collect(),
            ),
            Value::Polymorphic(m) => {
                let mut out = serde_json::Map::new();
                out.insert(
                    TYPENAME_KEY.to_string(),
                    J::String(m.concrete_type().to_string()),
                );
                match m.data().to_json() {
                    J::Object(fields) => out.extend(fields),
                    J::Null => {}
                    other => {
                        out.insert("data".to_string(), other);
                    }
                }
                J::Object(out)
            }
        }
    }
}

impl From<serde_json::Value> for Value {
    fn from(v: serde_json::Value) -> Self {
        use serde_json::Value as J;
        match v {
            J::Null => Value::Null,
            J::Bool(b) => Value::Bool(b),
            J::Number(n) => match n.as_i64() {
                Some(i) => Value::Int(i),
                None => Value::Float(n.as_f64().unwrap_or(f64::NAN)),
            },
            J::String(s) => Value::String(s),
            J::Array(items) => Value::List(items.into_iter().map(Value::from).collect()),
            J::Object(o) => Value::Object(o.into_iter().map(|(k, v)| (k, Value::from(v))).collect()),
        }
    }
}

impl From<Value> for serde_json::Value {
    fn from(v: Value) -> Self {
        v.to_json()
    }
}

impl From<bool> for Value {
    fn from(v: bool) -> Self {
        Value::Bool(v)
    }
}

impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Value::Int(v)
    }
}

impl From<i32> for Value {
    fn from(v: i32) -> Self {
        Value::Int(v as i64)
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

impl From<Vec<Value>> for Value {
    fn from(v: Vec<Value>) -> Self {
        Value::List(v)
    }
}

impl From<Object> for Value {
    fn from(v: Object) -> Self {
        Value::Object(v)
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_json())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::polymorphic::polymorphic_wrap;

    #[test]
    fn json_conversion_keeps_shape() {
        let json = serde_json::json!({"id": 1, "tags": ["a", "b"], "score": 1.5, "gone": null});
        let v = Value::from(json.clone());
        assert_eq!(v.get("id"), Some(&Value::Int(1)));
        assert_eq!(v.get("tags").and_then(Value::as_list).map(<[Value]>::len), Some(2));
        assert_eq!(v.to_json(), json);
    }

    #[test]
    fn polymorphic_json_carries_typename() {
        let payload = Value::from(serde_json::json!({"name": "Rex"}));
        let v = polymorphic_wrap("Dog", payload).unwrap();
        assert_eq!(
            v.to_json(),
            serde_json::json!({"__typename": "Dog", "name": "Rex"})
        );
        assert_eq!(v.get("name"), Some(&Value::from("Rex")));
    }

    #[test]
    fn serde_roundtrip_goes_through_json() {
        let v: Value = serde_json::from_str(r#"{"a":[1,true,"x"]}"#).unwrap();
        assert_eq!(serde_json::to_string(&v).unwrap(), r#"{"a":[1,true,"x"]}"#);
    }
}
