use async_trait::async_trait;
use batchplan_core::value::TYPENAME_KEY;
use batchplan_core::{polymorphic_wrap, Value};

use crate::error::StepError;
use crate::step::{RowResult, Step, StepBatch};

/// Wraps its dependency in a polymorphic marker, taking the concrete type
/// from a discriminator attribute. Null stays null; lists are wrapped
/// item by item.
#[derive(Debug, Clone)]
pub struct PolymorphicWrapStep {
    discriminator: String,
}

impl PolymorphicWrapStep {
    pub fn new(discriminator: impl Into<String>) -> Self {
        Self {
            discriminator: discriminator.into(),
        }
    }

    fn wrap(&self, value: &Value) -> RowResult {
        if value.is_null() {
            return Ok(Value::Null);
        }
        match value {
            Value::Polymorphic(_) => return Ok(value.clone()),
            Value::List(items) => {
                return items
                    .iter()
                    .map(|item| self.wrap(item))
                    .collect::<Result<Vec<_>, _>>()
                    .map(Value::List)
            }
            _ => {}
        }
        let type_name = value
            .get(&self.discriminator)
            .and_then(Value::as_str)
            .ok_or_else(|| {
                StepError::Failed(format!(
                    "cannot resolve concrete type: '{}' missing on {}",
                    self.discriminator,
                    value.kind()
                ))
            })?;
        Ok(polymorphic_wrap(type_name, value.clone())?)
    }
}

impl Default for PolymorphicWrapStep {
    fn default() -> Self {
        Self::new(TYPENAME_KEY)
    }
}

#[async_trait]
impl Step for PolymorphicWrapStep {
    fn name(&self) -> &'static str {
        "PolymorphicWrap"
    }

    fn params(&self) -> Option<Value> {
        Some(Value::from(self.discriminator.as_str()))
    }

    fn meta(&self) -> Option<String> {
        Some(self.discriminator.clone())
    }

    async fn execute(&self, batch: StepBatch) -> Result<Vec<RowResult>, StepError> {
        Ok(batch.dependency(0).iter().map(|v| self.wrap(v)).collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use batchplan_core::resolve_type;

    #[tokio::test]
    async fn wraps_by_discriminator() {
        let rows = vec![
            Value::from(serde_json::json!({"__typename": "Dog", "name": "Rex"})),
            Value::Null,
            Value::from(serde_json::json!({"name": "?"})),
        ];
        let out = PolymorphicWrapStep::default()
            .execute(StepBatch::new(3, vec![rows]))
            .await
            .unwrap();
        assert_eq!(resolve_type(out[0].as_ref().unwrap()).unwrap(), "Dog");
        assert_eq!(out[1], Ok(Value::Null));
        assert!(out[2].is_err());
    }
}
