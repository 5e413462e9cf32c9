use async_trait::async_trait;
use batchplan_core::Value;

use crate::error::StepError;
use crate::step::{RowResult, Step, StepBatch};

/// Reads an attribute path from its single dependency.
///
/// Missing attributes and null intermediates yield null; reading an
/// attribute of a non-object value is a row error.
#[derive(Debug, Clone)]
pub struct AccessStep {
    path: Vec<String>,
}

impl AccessStep {
    pub fn new(attr: impl Into<String>) -> Self {
        Self {
            path: vec![attr.into()],
        }
    }

    pub fn path(path: &[&str]) -> Self {
        Self {
            path: path.iter().map(|p| p.to_string()).collect(),
        }
    }

    fn read(&self, value: &Value) -> RowResult {
        let mut cur = value;
        for attr in &self.path {
            match cur {
                Value::Null => return Ok(Value::Null),
                Value::Object(_) | Value::Polymorphic(_) => match cur.get(attr) {
                    Some(next) => cur = next,
                    None => return Ok(Value::Null),
                },
                other => {
                    return Err(StepError::Failed(format!(
                        "cannot read '{attr}' of {}",
                        other.kind()
                    )))
                }
            }
        }
        Ok(cur.clone())
    }
}

#[async_trait]
impl Step for AccessStep {
    fn name(&self) -> &'static str {
        "Access"
    }

    fn params(&self) -> Option<Value> {
        Some(Value::List(
            self.path.iter().map(|p| Value::from(p.as_str())).collect(),
        ))
    }

    fn meta(&self) -> Option<String> {
        Some(format!(".{}", self.path.join(".")))
    }

    async fn execute(&self, batch: StepBatch) -> Result<Vec<RowResult>, StepError> {
        Ok(batch.dependency(0).iter().map(|v| self.read(v)).collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn reads_nested_paths_null_safely() {
        let rows = vec![
            Value::from(serde_json::json!({"a": {"b": 1}})),
            Value::from(serde_json::json!({"a": null})),
            Value::Null,
            Value::from(7),
        ];
        let step = AccessStep::path(&["a", "b"]);
        let out = step.execute(StepBatch::new(4, vec![rows])).await.unwrap();
        assert_eq!(out[0], Ok(Value::from(1)));
        assert_eq!(out[1], Ok(Value::Null));
        assert_eq!(out[2], Ok(Value::Null));
        assert!(out[3].is_err());
    }
}
