//! Polymorphic markers: a value tagged with the concrete variant it represents.
//!
//! A marker is created once, by the step that produces a polymorphic-typed
//! value, and is only ever read afterwards. The scheduler uses
//! [`resolve_type`] to decide which type-conditional buckets admit a row.

use std::sync::Arc;

use crate::error::{Error, Result};
use crate::value::Value;

#[derive(Debug, Clone, PartialEq)]
pub struct PolymorphicMarker {
    concrete_type: String,
    data: Value,
}

impl PolymorphicMarker {
    pub fn new(concrete_type: impl Into<String>, data: Value) -> Result<Self> {
        let concrete_type = concrete_type.into();
        if concrete_type.is_empty() || concrete_type.chars().any(char::is_whitespace) {
            return Err(Error::InvalidTypeName(concrete_type));
        }
        Ok(Self {
            concrete_type,
            data,
        })
    }

    pub fn concrete_type(&self) -> &str {
        &self.concrete_type
    }

    pub fn data(&self) -> &Value {
        &self.data
    }
}

/// Returns a value tagged with the given concrete type and payload.
pub fn polymorphic_wrap(type_name: impl Into<String>, data: Value) -> Result<Value> {
    Ok(Value::Polymorphic(Arc::new(PolymorphicMarker::new(
        type_name, data,
    )?)))
}

pub fn is_polymorphic(value: &Value) -> bool {
    matches!(value, Value::Polymorphic(_))
}

/// The variant name of a polymorphic value. Any other value is rejected.
pub fn resolve_type(value: &Value) -> Result<&str> {
    match value {
        Value::Polymorphic(m) => Ok(m.concrete_type()),
        other => Err(Error::NotPolymorphic(other.to_string())),
    }
}
