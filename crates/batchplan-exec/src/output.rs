//! Result assembly: walk the output maps over the published bucket stores
//! and build the response value plus located errors.
//!
//! A failed cell becomes null at the field reading it, with an error at that
//! field's path. A null in a non-null field makes the enclosing object null,
//! up to the nearest nullable field (or `data` itself).

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use batchplan_core::manifest::RunManifest;
use batchplan_core::value::Object;
use batchplan_core::{resolve_type, LayerPlanId, Value};
use batchplan_planner::{OperationPlan, OutputEntry, OutputMap, OutputMode};

use crate::runtime::ExecError;
use crate::store::BucketStore;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum PathSegment {
    Key(String),
    Index(usize),
}

impl fmt::Display for PathSegment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PathSegment::Key(k) => write!(f, "{k}"),
            PathSegment::Index(i) => write!(f, "{i}"),
        }
    }
}

/// An error attached to a location in the response.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LocatedError {
    pub message: String,
    pub path: Vec<PathSegment>,
}

impl LocatedError {
    /// Dotted rendering of the path, e.g. `users.1.name`.
    pub fn path_string(&self) -> String {
        self.path
            .iter()
            .map(ToString::to_string)
            .collect::<Vec<_>>()
            .join(".")
    }
}

impl fmt::Display for LocatedError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} (at {})", self.message, self.path_string())
    }
}

#[derive(Debug, Clone)]
pub struct ExecutionResult {
    pub data: Value,
    pub errors: Vec<LocatedError>,
    pub manifest: RunManifest,
}

impl ExecutionResult {
    /// `{ "data": ..., "errors": [...] }`, omitting `errors` when empty.
    pub fn to_json(&self) -> serde_json::Value {
        let mut out = serde_json::Map::new();
        out.insert("data".into(), self.data.to_json());
        if !self.errors.is_empty() {
            out.insert(
                "errors".into(),
                serde_json::to_value(&self.errors).unwrap_or_default(),
            );
        }
        serde_json::Value::Object(out)
    }

    /// First error recorded at exactly `path` (dotted form).
    pub fn error_at(&self, path: &str) -> Option<&LocatedError> {
        self.errors.iter().find(|e| e.path_string() == path)
    }
}

pub(crate) fn assemble(
    plan: &OperationPlan,
    stores: &HashMap<LayerPlanId, Arc<BucketStore>>,
) -> Result<(Value, Vec<LocatedError>), ExecError> {
    let root = plan.root_layer_plan();
    let store = stores
        .get(&root.id)
        .ok_or_else(|| ExecError::Invariant("root bucket did not run".into()))?;
    let mut asm = Assembler {
        plan,
        stores,
        errors: Vec::new(),
        path: Vec::new(),
    };
    let data = asm
        .object(&root.output_map, store, 0)?
        .map(Value::Object)
        .unwrap_or(Value::Null);
    Ok((data, asm.errors))
}

struct Assembler<'a> {
    plan: &'a OperationPlan,
    stores: &'a HashMap<LayerPlanId, Arc<BucketStore>>,
    errors: Vec<LocatedError>,
    path: Vec<PathSegment>,
}

impl<'a> Assembler<'a> {
    /// `None` when a non-null field resolved to null.
    fn object(
        &mut self,
        map: &OutputMap,
        store: &BucketStore,
        row: usize,
    ) -> Result<Option<Object>, ExecError> {
        let mut out = Object::with_capacity(map.len());
        let mut null_propagated = false;
        for (key, entry) in map {
            self.path.push(PathSegment::Key(key.clone()));
            let errors_before = self.errors.len();
            let value = self.field(entry, store, row)?;
            if value.is_null() && !entry.nullable {
                if self.errors.len() == errors_before {
                    self.error("cannot return null for non-null field");
                }
                null_propagated = true;
            }
            self.path.pop();
            out.insert(key.clone(), value);
        }
        Ok((!null_propagated).then_some(out))
    }

    fn field(
        &mut self,
        entry: &OutputEntry,
        store: &BucketStore,
        row: usize,
    ) -> Result<Value, ExecError> {
        let value = match store.cell(entry.step, row) {
            Some(Ok(v)) => v,
            Some(Err(failure)) => {
                self.error(failure);
                return Ok(Value::Null);
            }
            None => {
                return Err(ExecError::Invariant(format!(
                    "{} holds no value for {} at row {row}",
                    store.layer(),
                    entry.step
                )))
            }
        };
        if value.is_null() {
            return Ok(Value::Null);
        }

        match &entry.mode {
            OutputMode::Scalar => Ok(value.clone()),
            OutputMode::Object(fields) => Ok(self
                .object(fields, store, row)?
                .map(Value::Object)
                .unwrap_or(Value::Null)),
            OutputMode::List(child) => {
                if value.as_list().is_none() {
                    self.error(&format!("expected a list, received {}", value.kind()));
                    return Ok(Value::Null);
                }
                let Some(child_store) = self.child(*child)? else {
                    return Ok(Value::Null);
                };
                let plan = self.plan;
                let item = plan
                    .layer_plan(*child)?
                    .item_output
                    .as_ref()
                    .ok_or_else(|| ExecError::Invariant(format!("{child} has no item output")))?;
                let mut items = Vec::new();
                let mut null_propagated = false;
                for (i, child_row) in child_store.rows_for(row).iter().enumerate() {
                    self.path.push(PathSegment::Index(i));
                    let errors_before = self.errors.len();
                    let v = self.field(item, &child_store, *child_row)?;
                    if v.is_null() && !item.nullable {
                        if self.errors.len() == errors_before {
                            self.error("cannot return null for non-null list item");
                        }
                        null_propagated = true;
                    }
                    self.path.pop();
                    items.push(v);
                }
                // a null non-null item nulls the whole list
                Ok(if null_propagated {
                    Value::Null
                } else {
                    Value::List(items)
                })
            }
            OutputMode::Polymorphic(branches) => {
                let type_name = match resolve_type(value) {
                    Ok(t) => t,
                    Err(e) => {
                        self.error(&e.to_string());
                        return Ok(Value::Null);
                    }
                };
                let plan = self.plan;
                for branch in branches {
                    if !plan.layer_plan(*branch)?.reason.admits(type_name) {
                        continue;
                    }
                    return self.nested(*branch, row);
                }
                Ok(Value::Null)
            }
            OutputMode::Deferred(child) => self.nested(*child, row),
        }
    }

    /// The object produced for parent `row` by a single-row child bucket.
    fn nested(&mut self, child: LayerPlanId, row: usize) -> Result<Value, ExecError> {
        let Some(child_store) = self.child(child)? else {
            return Ok(Value::Null);
        };
        let Some(child_row) = child_store.rows_for(row).first().copied() else {
            return Ok(Value::Null);
        };
        let plan = self.plan;
        let map = &plan.layer_plan(child)?.output_map;
        Ok(self
            .object(map, &child_store, child_row)?
            .map(Value::Object)
            .unwrap_or(Value::Null))
    }

    /// Store of a child bucket, or `None` (with an error recorded) when the
    /// bucket failed or never ran.
    fn child(&mut self, layer: LayerPlanId) -> Result<Option<Arc<BucketStore>>, ExecError> {
        match self.stores.get(&layer) {
            Some(store) => match store.failure() {
                Some(failure) => {
                    let failure = failure.clone();
                    self.error(&failure);
                    Ok(None)
                }
                None => Ok(Some(store.clone())),
            },
            None => {
                self.error("bucket was not executed");
                Ok(None)
            }
        }
    }

    fn error(&mut self, message: &str) {
        self.errors.push(LocatedError {
            message: message.to_string(),
            path: self.path.clone(),
        });
    }
}
