//! The resolved request tree the planner consumes.
//!
//! The tree is assumed to be already parsed and validated against whatever
//! query language produced it; the planner only needs field names,
//! arguments, the named type of each object selection and whether a field is
//! a list, a polymorphic selection or deferred.

use batchplan_core::Value;
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

use crate::error::{PlanError, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FieldKind {
    #[default]
    Scalar,
    Object,
    Polymorphic,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RequestTree {
    /// Type name of the root object (e.g. `Query`, `Mutation`).
    pub root_type: String,
    pub selections: Vec<RequestNode>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RequestNode {
    pub field: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub alias: Option<String>,

    #[serde(default, skip_serializing_if = "IndexMap::is_empty")]
    pub arguments: IndexMap<String, Value>,

    /// Named type of an object selection.
    #[serde(default, rename = "type", skip_serializing_if = "Option::is_none")]
    pub type_name: Option<String>,

    #[serde(default)]
    pub kind: FieldKind,

    #[serde(default)]
    pub list: bool,

    #[serde(default = "default_nullable")]
    pub nullable: bool,

    /// Whether the items of a list field may be null.
    #[serde(default = "default_nullable")]
    pub item_nullable: bool,

    #[serde(default)]
    pub deferred: bool,

    /// Concrete variants a polymorphic selection may resolve to.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub possible_types: Vec<String>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub selections: Vec<RequestNode>,

    /// Type-conditional selections of a polymorphic field.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub fragments: Vec<Fragment>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Fragment {
    pub on: String,
    pub selections: Vec<RequestNode>,
}

fn default_nullable() -> bool {
    true
}

impl RequestTree {
    pub fn new(root_type: impl Into<String>, selections: Vec<RequestNode>) -> Self {
        Self {
            root_type: root_type.into(),
            selections,
        }
    }

    /// Structural checks the planner relies on.
    pub fn validate(&self) -> Result<()> {
        if self.root_type.is_empty() {
            return Err(PlanError::Request("root type must not be empty".into()));
        }
        check_keys(&self.selections, &self.root_type)?;
        for node in &self.selections {
            node.validate(&self.root_type)?;
        }
        Ok(())
    }
}

impl RequestNode {
    pub fn scalar(field: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            alias: None,
            arguments: IndexMap::new(),
            type_name: None,
            kind: FieldKind::Scalar,
            list: false,
            nullable: true,
            item_nullable: true,
            deferred: false,
            possible_types: Vec::new(),
            selections: Vec::new(),
            fragments: Vec::new(),
        }
    }

    pub fn object(
        field: impl Into<String>,
        type_name: impl Into<String>,
        selections: Vec<RequestNode>,
    ) -> Self {
        Self {
            kind: FieldKind::Object,
            type_name: Some(type_name.into()),
            selections,
            ..Self::scalar(field)
        }
    }

    pub fn polymorphic(
        field: impl Into<String>,
        type_name: impl Into<String>,
        possible_types: &[&str],
    ) -> Self {
        Self {
            kind: FieldKind::Polymorphic,
            type_name: Some(type_name.into()),
            possible_types: possible_types.iter().map(|t| t.to_string()).collect(),
            ..Self::scalar(field)
        }
    }

    pub fn list(mut self) -> Self {
        self.list = true;
        self
    }

    pub fn non_null(mut self) -> Self {
        self.nullable = false;
        self
    }

    pub fn non_null_items(mut self) -> Self {
        self.item_nullable = false;
        self
    }

    pub fn deferred(mut self) -> Self {
        self.deferred = true;
        self
    }

    pub fn alias(mut self, alias: impl Into<String>) -> Self {
        self.alias = Some(alias.into());
        self
    }

    pub fn arg(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        self.arguments.insert(name.into(), value.into());
        self
    }

    pub fn select(mut self, node: RequestNode) -> Self {
        self.selections.push(node);
        self
    }

    pub fn on(mut self, type_name: impl Into<String>, selections: Vec<RequestNode>) -> Self {
        self.fragments.push(Fragment {
            on: type_name.into(),
            selections,
        });
        self
    }

    /// Key under which this field appears in the result.
    pub fn response_key(&self) -> &str {
        self.alias.as_deref().unwrap_or(&self.field)
    }

    /// Selections that apply when this polymorphic field resolves to `type_name`.
    pub fn selections_for<'a>(&'a self, type_name: &str) -> impl Iterator<Item = &'a RequestNode> + 'a {
        let type_name = type_name.to_string();
        self.selections.iter().chain(
            self.fragments
                .iter()
                .filter(move |f| f.on == type_name)
                .flat_map(|f| f.selections.iter()),
        )
    }

    fn validate(&self, parent_type: &str) -> Result<()> {
        let at = format!("{parent_type}.{}", self.field);
        if !self.item_nullable && !self.list {
            return Err(PlanError::Request(format!(
                "{at}: item nullability only applies to list fields"
            )));
        }
        match self.kind {
            FieldKind::Scalar => {
                if !self.selections.is_empty() || !self.fragments.is_empty() {
                    return Err(PlanError::Request(format!(
                        "{at}: scalar fields cannot have selections"
                    )));
                }
                if self.deferred {
                    return Err(PlanError::Request(format!(
                        "{at}: only object selections can be deferred"
                    )));
                }
            }
            FieldKind::Object => {
                let type_name = self.named_type(&at)?;
                if !self.fragments.is_empty() {
                    return Err(PlanError::Request(format!(
                        "{at}: fragments are only allowed on polymorphic fields"
                    )));
                }
                check_keys(&self.selections, type_name)?;
                for child in &self.selections {
                    child.validate(type_name)?;
                }
            }
            FieldKind::Polymorphic => {
                self.named_type(&at)?;
                if self.possible_types.is_empty() {
                    return Err(PlanError::Request(format!(
                        "{at}: polymorphic fields need at least one possible type"
                    )));
                }
                if self.deferred {
                    return Err(PlanError::Request(format!(
                        "{at}: polymorphic fields cannot be deferred"
                    )));
                }
                for fragment in &self.fragments {
                    if !self.possible_types.contains(&fragment.on) {
                        return Err(PlanError::Request(format!(
                            "{at}: fragment on '{}' is not a possible type",
                            fragment.on
                        )));
                    }
                }
                for concrete in &self.possible_types {
                    let selected: Vec<RequestNode> =
                        self.selections_for(concrete).cloned().collect();
                    check_keys(&selected, concrete)?;
                    for child in &selected {
                        child.validate(concrete)?;
                    }
                }
            }
        }
        Ok(())
    }

    fn named_type(&self, at: &str) -> Result<&str> {
        self.type_name
            .as_deref()
            .filter(|t| !t.is_empty())
            .ok_or_else(|| PlanError::Request(format!("{at}: object selections need a type")))
    }
}

fn check_keys(selections: &[RequestNode], type_name: &str) -> Result<()> {
    let mut seen = std::collections::HashSet::new();
    for node in selections {
        if !seen.insert(node.response_key()) {
            return Err(PlanError::Request(format!(
                "{type_name}: duplicate response key '{}'",
                node.response_key()
            )));
        }
    }
    Ok(())
}
