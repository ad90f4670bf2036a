/*!
Validated schema evolution.

Operations are queued on a [SchemaEvolution] and validated together before
a new schema is produced, so a batch either applies completely or not at
all. Renames preserve field ids; added columns draw fresh ids from a
[FieldIdManager] seeded with the table's `last-column-id`.
*/

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::model::schema::{AllType, Schema, StructField};
use crate::model::types::PrimitiveType;

/// Hands out fresh field ids, starting after the highest ever assigned.
#[derive(Debug, Clone, Copy)]
pub struct FieldIdManager {
    next: i32,
}

impl FieldIdManager {
    /// Seed from the table's `last-column-id`.
    pub fn new(last_column_id: i32) -> Self {
        FieldIdManager {
            next: last_column_id + 1,
        }
    }

    /// The next unused field id.
    pub fn next_id(&mut self) -> i32 {
        let id = self.next;
        self.next += 1;
        id
    }

    /// The highest id handed out so far.
    pub fn last_assigned(&self) -> i32 {
        self.next - 1
    }
}

/// Where a moved column lands.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ColumnPosition {
    /// Before every other column.
    First,
    /// After every other column.
    Last,
    /// Directly before the named column.
    Before(String),
    /// Directly after the named column.
    After(String),
}

/// Options for [SchemaEvolution::add_column].
#[derive(Debug, Clone, Default)]
pub struct AddColumnOptions {
    /// Whether the column is required. Required additions to a table with
    /// existing data need an `initial-default`.
    pub required: bool,
    /// Doc string.
    pub doc: Option<String>,
    /// Default applied to pre-existing rows.
    pub initial_default: Option<serde_json::Value>,
    /// Default applied to new rows written without the column.
    pub write_default: Option<serde_json::Value>,
}

#[derive(Debug, Clone)]
enum Operation {
    AddColumn {
        name: String,
        field_type: AllType,
        options: AddColumnOptions,
    },
    DropColumn(String),
    RenameColumn {
        from: String,
        to: String,
    },
    UpdateColumnType {
        name: String,
        new_type: PrimitiveType,
    },
    MakeColumnOptional(String),
    MakeColumnRequired(String),
    UpdateColumnDoc {
        name: String,
        doc: Option<String>,
    },
    MoveColumn {
        name: String,
        position: ColumnPosition,
    },
}

/// A queued batch of schema changes, applied atomically.
pub struct SchemaEvolution {
    base: Schema,
    ids: FieldIdManager,
    table_has_data: bool,
    operations: Vec<Operation>,
}

fn evolution_error(code: &'static str, message: String) -> Error {
    Error::SchemaEvolution { code, message }
}

impl SchemaEvolution {
    /// Start evolving a schema. `last_column_id` is the highest field id
    /// ever assigned in the table.
    pub fn new(base: &Schema, last_column_id: i32) -> Self {
        SchemaEvolution {
            base: base.clone(),
            ids: FieldIdManager::new(last_column_id.max(base.highest_field_id())),
            table_has_data: true,
            operations: vec![],
        }
    }

    /// Mark the table as empty, which lifts the `initial-default`
    /// requirement for added required columns.
    pub fn for_empty_table(mut self) -> Self {
        self.table_has_data = false;
        self
    }

    /// Queue adding a column.
    pub fn add_column(
        mut self,
        name: &str,
        field_type: impl Into<AllType>,
        options: AddColumnOptions,
    ) -> Self {
        self.operations.push(Operation::AddColumn {
            name: name.to_string(),
            field_type: field_type.into(),
            options,
        });
        self
    }

    /// Queue dropping a column. Identifier fields cannot be dropped.
    pub fn drop_column(mut self, name: &str) -> Self {
        self.operations.push(Operation::DropColumn(name.to_string()));
        self
    }

    /// Queue renaming a column. The field id is preserved.
    pub fn rename_column(mut self, from: &str, to: &str) -> Self {
        self.operations.push(Operation::RenameColumn {
            from: from.to_string(),
            to: to.to_string(),
        });
        self
    }

    /// Queue widening a column's type. The promotion table is enforced.
    pub fn update_column_type(mut self, name: &str, new_type: PrimitiveType) -> Self {
        self.operations.push(Operation::UpdateColumnType {
            name: name.to_string(),
            new_type,
        });
        self
    }

    /// Queue loosening a column from required to optional.
    pub fn make_column_optional(mut self, name: &str) -> Self {
        self.operations
            .push(Operation::MakeColumnOptional(name.to_string()));
        self
    }

    /// Queue tightening a column from optional to required. Breaking for
    /// readers of historical data.
    pub fn make_column_required(mut self, name: &str) -> Self {
        self.operations
            .push(Operation::MakeColumnRequired(name.to_string()));
        self
    }

    /// Queue replacing a column's doc string.
    pub fn update_column_doc(mut self, name: &str, doc: Option<String>) -> Self {
        self.operations.push(Operation::UpdateColumnDoc {
            name: name.to_string(),
            doc,
        });
        self
    }

    /// Queue moving a column.
    pub fn move_column(mut self, name: &str, position: ColumnPosition) -> Self {
        self.operations.push(Operation::MoveColumn {
            name: name.to_string(),
            position,
        });
        self
    }

    /// Validate all queued operations and produce the evolved schema with
    /// an incremented `schema-id`. Returns the schema and the new
    /// `last-column-id`.
    pub fn apply(mut self) -> Result<(Schema, i32)> {
        let mut fields = self.base.fields.fields.clone();
        let operations = std::mem::take(&mut self.operations);
        for operation in operations {
            fields = self.apply_operation(fields, operation)?;
        }
        let schema = Schema {
            schema_id: self.base.schema_id + 1,
            identifier_field_ids: self.base.identifier_field_ids.clone(),
            fields: crate::model::schema::StructType { fields },
        };
        Ok((schema, self.ids.last_assigned()))
    }

    fn find<'a>(
        fields: &'a [StructField],
        name: &str,
    ) -> Result<(usize, &'a StructField)> {
        fields
            .iter()
            .enumerate()
            .find(|(_, field)| field.name == name)
            .ok_or_else(|| {
                evolution_error("unknown-column", format!("column {} does not exist", name))
            })
    }

    fn apply_operation(
        &mut self,
        mut fields: Vec<StructField>,
        operation: Operation,
    ) -> Result<Vec<StructField>> {
        match operation {
            Operation::AddColumn {
                name,
                field_type,
                options,
            } => {
                if fields.iter().any(|field| field.name == name) {
                    return Err(evolution_error(
                        "duplicate-column-name",
                        format!("column {} already exists", name),
                    ));
                }
                let mut initial_default = options.initial_default;
                if let AllType::Primitive(primitive) = &field_type {
                    if primitive.must_be_optional() && options.required {
                        return Err(evolution_error(
                            "required-unknown-field",
                            format!("column {} of type unknown must be optional", name),
                        ));
                    }
                    if primitive.requires_null_default() {
                        match &initial_default {
                            None => initial_default = Some(serde_json::Value::Null),
                            Some(serde_json::Value::Null) => {}
                            Some(other) => {
                                return Err(evolution_error(
                                    "invalid-default",
                                    format!(
                                        "column {} of type {} requires a null default, got {}",
                                        name, primitive, other
                                    ),
                                ));
                            }
                        }
                    }
                }
                if options.required && self.table_has_data && initial_default.is_none() {
                    return Err(evolution_error(
                        "missing-default-for-required",
                        format!(
                            "required column {} added to a non-empty table needs an initial default",
                            name
                        ),
                    ));
                }
                fields.push(StructField {
                    id: self.ids.next_id(),
                    name,
                    required: options.required,
                    field_type,
                    doc: options.doc,
                    initial_default,
                    write_default: options.write_default,
                });
                Ok(fields)
            }
            Operation::DropColumn(name) => {
                let (index, field) = Self::find(&fields, &name)?;
                if self.base.is_identifier_field(field.id) {
                    return Err(evolution_error(
                        "drop-identifier-field",
                        format!("column {} is an identifier field", name),
                    ));
                }
                fields.remove(index);
                Ok(fields)
            }
            Operation::RenameColumn { from, to } => {
                if fields.iter().any(|field| field.name == to) {
                    return Err(evolution_error(
                        "duplicate-column-name",
                        format!("column {} already exists", to),
                    ));
                }
                let (index, _) = Self::find(&fields, &from)?;
                fields[index].name = to;
                Ok(fields)
            }
            Operation::UpdateColumnType { name, new_type } => {
                let (index, field) = Self::find(&fields, &name)?;
                let current = match &field.field_type {
                    AllType::Primitive(primitive) => primitive.clone(),
                    other => {
                        return Err(evolution_error(
                            "invalid-type-promotion",
                            format!("column {} of type {} is not primitive", name, other),
                        ))
                    }
                };
                if !current.can_promote_to(&new_type) {
                    return Err(evolution_error(
                        "invalid-type-promotion",
                        format!("cannot promote {} from {} to {}", name, current, new_type),
                    ));
                }
                fields[index].field_type = AllType::Primitive(new_type);
                Ok(fields)
            }
            Operation::MakeColumnOptional(name) => {
                let (index, _) = Self::find(&fields, &name)?;
                fields[index].required = false;
                Ok(fields)
            }
            Operation::MakeColumnRequired(name) => {
                let (index, field) = Self::find(&fields, &name)?;
                if let AllType::Primitive(primitive) = &field.field_type {
                    if primitive.must_be_optional() {
                        return Err(evolution_error(
                            "required-unknown-field",
                            format!("column {} of type unknown must stay optional", name),
                        ));
                    }
                }
                fields[index].required = true;
                Ok(fields)
            }
            Operation::UpdateColumnDoc { name, doc } => {
                let (index, _) = Self::find(&fields, &name)?;
                fields[index].doc = doc;
                Ok(fields)
            }
            Operation::MoveColumn { name, position } => {
                let (index, _) = Self::find(&fields, &name)?;
                let field = fields.remove(index);
                let target = match position {
                    ColumnPosition::First => 0,
                    ColumnPosition::Last => fields.len(),
                    ColumnPosition::Before(anchor) => Self::find(&fields, &anchor)?.0,
                    ColumnPosition::After(anchor) => Self::find(&fields, &anchor)?.0 + 1,
                };
                fields.insert(target, field);
                Ok(fields)
            }
        }
    }
}

/// One difference between two schemas, keyed by field id.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "kind", rename_all = "kebab-case")]
pub enum SchemaChange {
    /// A field only the new schema has.
    #[serde(rename_all = "kebab-case")]
    Added {
        /// Field id.
        id: i32,
        /// Field name.
        name: String,
        /// Whether the field is required.
        required: bool,
        /// Whether the field carries an initial default.
        has_initial_default: bool,
    },
    /// A field only the old schema has.
    #[serde(rename_all = "kebab-case")]
    Removed {
        /// Field id.
        id: i32,
        /// Field name.
        name: String,
        /// Whether the field was required.
        required: bool,
    },
    /// Same id, different name.
    #[serde(rename_all = "kebab-case")]
    Renamed {
        /// Field id.
        id: i32,
        /// Old name.
        from: String,
        /// New name.
        to: String,
    },
    /// Same id, different type.
    #[serde(rename_all = "kebab-case")]
    TypeChanged {
        /// Field id.
        id: i32,
        /// Field name in the new schema.
        name: String,
        /// Old type rendered as a string.
        from: String,
        /// New type rendered as a string.
        to: String,
        /// Whether the change follows the promotion table.
        is_promotion: bool,
    },
    /// Same id, different nullability.
    #[serde(rename_all = "kebab-case")]
    NullabilityChanged {
        /// Field id.
        id: i32,
        /// Field name in the new schema.
        name: String,
        /// Whether the field is required now.
        now_required: bool,
    },
    /// Same id, different doc string.
    #[serde(rename_all = "kebab-case")]
    DocChanged {
        /// Field id.
        id: i32,
        /// Field name in the new schema.
        name: String,
    },
}

/// Compare two schemas field by field, matching on field ids.
pub fn compare_schemas(old: &Schema, new: &Schema) -> Vec<SchemaChange> {
    let mut changes = vec![];
    for old_field in &old.fields.fields {
        match new.field_by_id(old_field.id) {
            None => changes.push(SchemaChange::Removed {
                id: old_field.id,
                name: old_field.name.clone(),
                required: old_field.required,
            }),
            Some(new_field) => {
                if old_field.name != new_field.name {
                    changes.push(SchemaChange::Renamed {
                        id: old_field.id,
                        from: old_field.name.clone(),
                        to: new_field.name.clone(),
                    });
                }
                if old_field.field_type != new_field.field_type {
                    let is_promotion = match (&old_field.field_type, &new_field.field_type) {
                        (AllType::Primitive(from), AllType::Primitive(to)) => {
                            from.can_promote_to(to)
                        }
                        _ => false,
                    };
                    changes.push(SchemaChange::TypeChanged {
                        id: old_field.id,
                        name: new_field.name.clone(),
                        from: old_field.field_type.to_string(),
                        to: new_field.field_type.to_string(),
                        is_promotion,
                    });
                }
                if old_field.required != new_field.required {
                    changes.push(SchemaChange::NullabilityChanged {
                        id: old_field.id,
                        name: new_field.name.clone(),
                        now_required: new_field.required,
                    });
                }
                if old_field.doc != new_field.doc {
                    changes.push(SchemaChange::DocChanged {
                        id: old_field.id,
                        name: new_field.name.clone(),
                    });
                }
            }
        }
    }
    for new_field in &new.fields.fields {
        if old.field_by_id(new_field.id).is_none() {
            changes.push(SchemaChange::Added {
                id: new_field.id,
                name: new_field.name.clone(),
                required: new_field.required,
                has_initial_default: new_field.initial_default.is_some(),
            });
        }
    }
    changes
}

/// The verdict of a compatibility check.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Compatibility {
    /// Whether the evolution is compatible in the checked direction.
    pub compatible: bool,
    /// Human readable descriptions of the incompatible changes.
    pub incompatible_changes: Vec<String>,
}

impl Compatibility {
    fn from_problems(incompatible_changes: Vec<String>) -> Self {
        Compatibility {
            compatible: incompatible_changes.is_empty(),
            incompatible_changes,
        }
    }
}

/// Backward compatibility: readers of the new schema can read data written
/// with the old one.
pub fn backward_compatibility(old: &Schema, new: &Schema) -> Compatibility {
    let mut problems = vec![];
    for change in compare_schemas(old, new) {
        match change {
            SchemaChange::Added {
                name,
                required,
                has_initial_default,
                ..
            } => {
                if required && !has_initial_default {
                    problems.push(format!(
                        "added required column {} has no initial default for old rows",
                        name
                    ));
                }
            }
            SchemaChange::TypeChanged {
                name,
                from,
                to,
                is_promotion,
                ..
            } => {
                if !is_promotion {
                    problems.push(format!(
                        "column {} changed from {} to {} outside the promotion table",
                        name, from, to
                    ));
                }
            }
            SchemaChange::NullabilityChanged {
                name, now_required, ..
            } => {
                if now_required {
                    problems.push(format!(
                        "column {} tightened to required but old rows may hold nulls",
                        name
                    ));
                }
            }
            _ => {}
        }
    }
    Compatibility::from_problems(problems)
}

/// Forward compatibility: readers of the old schema can read data written
/// with the new one.
pub fn forward_compatibility(old: &Schema, new: &Schema) -> Compatibility {
    let mut problems = vec![];
    for change in compare_schemas(old, new) {
        match change {
            SchemaChange::Removed { name, required, id } => {
                if required {
                    problems.push(format!(
                        "removed column {} (id {}) is required by old readers",
                        name, id
                    ));
                }
            }
            SchemaChange::TypeChanged { name, from, to, .. } => {
                problems.push(format!(
                    "old readers expect column {} as {} but new data holds {}",
                    name, from, to
                ));
            }
            SchemaChange::NullabilityChanged {
                name, now_required, ..
            } => {
                if !now_required {
                    problems.push(format!(
                        "column {} loosened to optional but old readers require it",
                        name
                    ));
                }
            }
            _ => {}
        }
    }
    Compatibility::from_problems(problems)
}

/// Full compatibility: both directions hold.
pub fn full_compatibility(old: &Schema, new: &Schema) -> Compatibility {
    let mut problems = backward_compatibility(old, new).incompatible_changes;
    problems.extend(forward_compatibility(old, new).incompatible_changes);
    Compatibility::from_problems(problems)
}
