/*!
Commit request shapes shared by every catalog implementation and by the
REST boundary: the requirements a commit asserts against the current table
state and the updates applied, in order, to a working copy of the metadata.
*/

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{Error, Result};
use crate::model::metadata::{FormatVersion, TableMetadata};
use crate::model::partition::PartitionSpec;
use crate::model::schema::Schema;
use crate::model::snapshot::{Reference, Snapshot};
use crate::model::sort::SortOrder;

use super::identifier::Identifier;

/// A table commit: all requirements must hold against the current state,
/// then the updates are applied in order.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CommitTable {
    /// The table to update.
    pub identifier: Identifier,
    /// Assertions against the current table state.
    pub requirements: Vec<TableRequirement>,
    /// Changes applied to a working copy of the metadata.
    pub updates: Vec<TableUpdate>,
}

/// A view commit, mirroring [CommitTable].
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CommitView {
    /// The view to update.
    pub identifier: Identifier,
    /// Changes applied to a working copy of the metadata.
    pub updates: Vec<ViewUpdate>,
}

/// The response of a table commit.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "kebab-case")]
pub struct CommitTableResponse {
    /// Location of the metadata file the commit produced.
    pub metadata_location: String,
    /// The committed metadata.
    pub metadata: TableMetadata,
}

/// Assertion a commit makes about the table state it was built against.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum TableRequirement {
    /// The table must not exist yet.
    AssertCreate,
    /// The table UUID must match.
    #[serde(rename_all = "kebab-case")]
    AssertTableUuid {
        /// Expected table UUID.
        uuid: Uuid,
    },
    /// The named ref must point at the given snapshot, or be absent when
    /// `snapshot-id` is null.
    #[serde(rename_all = "kebab-case")]
    AssertRefSnapshotId {
        /// The ref name.
        r#ref: String,
        /// Expected snapshot id, null for "ref must not exist".
        snapshot_id: Option<i64>,
    },
    /// The highest assigned field id must match.
    #[serde(rename_all = "kebab-case")]
    AssertLastAssignedFieldId {
        /// Expected `last-column-id`.
        last_assigned_field_id: i32,
    },
    /// The current schema id must match.
    #[serde(rename_all = "kebab-case")]
    AssertCurrentSchemaId {
        /// Expected `current-schema-id`.
        current_schema_id: i32,
    },
    /// The highest assigned partition field id must match.
    #[serde(rename_all = "kebab-case")]
    AssertLastAssignedPartitionId {
        /// Expected `last-partition-id`.
        last_assigned_partition_id: i32,
    },
    /// The default partition spec id must match.
    #[serde(rename_all = "kebab-case")]
    AssertDefaultSpecId {
        /// Expected `default-spec-id`.
        default_spec_id: i32,
    },
    /// The default sort order id must match.
    #[serde(rename_all = "kebab-case")]
    AssertDefaultSortOrderId {
        /// Expected `default-sort-order-id`.
        default_sort_order_id: i32,
    },
}

impl TableRequirement {
    /// The requirement name used in commit-failed errors.
    pub fn name(&self) -> &'static str {
        match self {
            TableRequirement::AssertCreate => "assert-create",
            TableRequirement::AssertTableUuid { .. } => "assert-table-uuid",
            TableRequirement::AssertRefSnapshotId { .. } => "assert-ref-snapshot-id",
            TableRequirement::AssertLastAssignedFieldId { .. } => {
                "assert-last-assigned-field-id"
            }
            TableRequirement::AssertCurrentSchemaId { .. } => "assert-current-schema-id",
            TableRequirement::AssertLastAssignedPartitionId { .. } => {
                "assert-last-assigned-partition-id"
            }
            TableRequirement::AssertDefaultSpecId { .. } => "assert-default-spec-id",
            TableRequirement::AssertDefaultSortOrderId { .. } => "assert-default-sort-order-id",
        }
    }

    /// Check the requirement against the current state. `None` means the
    /// table does not exist.
    pub fn check(&self, current: Option<&TableMetadata>) -> Result<()> {
        let fail = |message: String| Err(Error::CommitFailed(self.name().to_string(), message));
        match self {
            TableRequirement::AssertCreate => match current {
                None => Ok(()),
                Some(_) => fail("table already exists".to_string()),
            },
            requirement => {
                let metadata = match current {
                    Some(metadata) => metadata,
                    None => return fail("table does not exist".to_string()),
                };
                match requirement {
                    TableRequirement::AssertTableUuid { uuid } => {
                        if metadata.table_uuid != *uuid {
                            return fail(format!(
                                "expected table uuid {}, found {}",
                                uuid, metadata.table_uuid
                            ));
                        }
                        Ok(())
                    }
                    TableRequirement::AssertRefSnapshotId { r#ref, snapshot_id } => {
                        let actual = metadata.refs.get(r#ref).map(|r| r.snapshot_id);
                        if actual != *snapshot_id {
                            return fail(format!(
                                "expected ref {} at {:?}, found {:?}",
                                r#ref, snapshot_id, actual
                            ));
                        }
                        Ok(())
                    }
                    TableRequirement::AssertLastAssignedFieldId {
                        last_assigned_field_id,
                    } => {
                        if metadata.last_column_id != *last_assigned_field_id {
                            return fail(format!(
                                "expected last column id {}, found {}",
                                last_assigned_field_id, metadata.last_column_id
                            ));
                        }
                        Ok(())
                    }
                    TableRequirement::AssertCurrentSchemaId { current_schema_id } => {
                        if metadata.current_schema_id != *current_schema_id {
                            return fail(format!(
                                "expected current schema id {}, found {}",
                                current_schema_id, metadata.current_schema_id
                            ));
                        }
                        Ok(())
                    }
                    TableRequirement::AssertLastAssignedPartitionId {
                        last_assigned_partition_id,
                    } => {
                        if metadata.last_partition_id != *last_assigned_partition_id {
                            return fail(format!(
                                "expected last partition id {}, found {}",
                                last_assigned_partition_id, metadata.last_partition_id
                            ));
                        }
                        Ok(())
                    }
                    TableRequirement::AssertDefaultSpecId { default_spec_id } => {
                        if metadata.default_spec_id != *default_spec_id {
                            return fail(format!(
                                "expected default spec id {}, found {}",
                                default_spec_id, metadata.default_spec_id
                            ));
                        }
                        Ok(())
                    }
                    TableRequirement::AssertDefaultSortOrderId {
                        default_sort_order_id,
                    } => {
                        if metadata.default_sort_order_id != *default_sort_order_id {
                            return fail(format!(
                                "expected default sort order id {}, found {}",
                                default_sort_order_id, metadata.default_sort_order_id
                            ));
                        }
                        Ok(())
                    }
                    TableRequirement::AssertCreate => unreachable!(),
                }
            }
        }
    }
}

/// Check every requirement; all must hold simultaneously.
pub fn check_requirements(
    requirements: &[TableRequirement],
    current: Option<&TableMetadata>,
) -> Result<()> {
    for requirement in requirements {
        requirement.check(current)?;
    }
    Ok(())
}

/// A change applied to a working copy of table metadata.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "action", rename_all = "kebab-case")]
pub enum TableUpdate {
    /// Set the table UUID; only valid while staging a create.
    #[serde(rename_all = "kebab-case")]
    AssignUuid {
        /// The UUID to assign.
        uuid: Uuid,
    },
    /// Upgrade the format version.
    #[serde(rename_all = "kebab-case")]
    UpgradeFormatVersion {
        /// Target format version.
        format_version: FormatVersion,
    },
    /// Add a schema to the history.
    #[serde(rename_all = "kebab-case")]
    AddSchema {
        /// The schema to add.
        schema: Schema,
    },
    /// Select the current schema. `-1` selects the last added schema.
    #[serde(rename_all = "kebab-case")]
    SetCurrentSchema {
        /// The schema id to select.
        schema_id: i32,
    },
    /// Add a partition spec to the history.
    #[serde(rename_all = "kebab-case")]
    AddPartitionSpec {
        /// The spec to add.
        spec: PartitionSpec,
    },
    /// Select the default partition spec. `-1` selects the last added spec.
    #[serde(rename_all = "kebab-case")]
    SetDefaultSpec {
        /// The spec id to select.
        spec_id: i32,
    },
    /// Add a sort order to the history.
    #[serde(rename_all = "kebab-case")]
    AddSortOrder {
        /// The sort order to add.
        sort_order: SortOrder,
    },
    /// Select the default sort order. `-1` selects the last added order.
    #[serde(rename_all = "kebab-case")]
    SetDefaultSortOrder {
        /// The order id to select.
        sort_order_id: i32,
    },
    /// Append a snapshot.
    #[serde(rename_all = "kebab-case")]
    AddSnapshot {
        /// The snapshot to append.
        snapshot: Snapshot,
    },
    /// Remove snapshots from the metadata.
    #[serde(rename_all = "kebab-case")]
    RemoveSnapshots {
        /// Ids of the snapshots to remove.
        snapshot_ids: Vec<i64>,
    },
    /// Create or retarget a branch or tag.
    #[serde(rename_all = "kebab-case")]
    SetSnapshotRef {
        /// Name of the reference.
        ref_name: String,
        /// The reference, including retention settings.
        #[serde(flatten)]
        reference: Reference,
    },
    /// Remove a branch or tag.
    #[serde(rename_all = "kebab-case")]
    RemoveSnapshotRef {
        /// Name of the reference.
        ref_name: String,
    },
    /// Set table properties.
    #[serde(rename_all = "kebab-case")]
    SetProperties {
        /// Properties to set.
        updates: HashMap<String, String>,
    },
    /// Remove table properties.
    #[serde(rename_all = "kebab-case")]
    RemoveProperties {
        /// Property keys to remove.
        removals: Vec<String>,
    },
    /// Move the table's base location.
    #[serde(rename_all = "kebab-case")]
    SetLocation {
        /// The new location.
        location: String,
    },
}

/// Apply updates, in order, to a working copy of the metadata.
pub fn apply_table_updates(
    metadata: TableMetadata,
    updates: &[TableUpdate],
) -> Result<TableMetadata> {
    let mut metadata = metadata;
    for update in updates {
        metadata = apply_table_update(metadata, update)?;
    }
    Ok(metadata)
}

fn apply_table_update(
    mut metadata: TableMetadata,
    update: &TableUpdate,
) -> Result<TableMetadata> {
    match update {
        TableUpdate::AssignUuid { uuid } => {
            metadata.table_uuid = *uuid;
            Ok(metadata)
        }
        TableUpdate::UpgradeFormatVersion { format_version } => {
            metadata.upgrade_format_version(*format_version)
        }
        TableUpdate::AddSchema { schema } => metadata.add_schema(schema.clone()),
        TableUpdate::SetCurrentSchema { schema_id } => {
            let schema_id = if *schema_id == -1 {
                metadata
                    .schemas
                    .last()
                    .map(|schema| schema.schema_id)
                    .ok_or(Error::InvalidMetadata {
                        field: "current-schema-id",
                        message: "no schema to select".to_string(),
                    })?
            } else {
                *schema_id
            };
            if !metadata
                .schemas
                .iter()
                .any(|schema| schema.schema_id == schema_id)
            {
                return Err(Error::InvalidMetadata {
                    field: "current-schema-id",
                    message: format!("schema {} not in schemas", schema_id),
                });
            }
            metadata.current_schema_id = schema_id;
            Ok(metadata)
        }
        TableUpdate::AddPartitionSpec { spec } => metadata.add_partition_spec(spec.clone()),
        TableUpdate::SetDefaultSpec { spec_id } => {
            let spec_id = if *spec_id == -1 {
                metadata
                    .partition_specs
                    .last()
                    .map(|spec| spec.spec_id)
                    .ok_or(Error::InvalidMetadata {
                        field: "default-spec-id",
                        message: "no partition spec to select".to_string(),
                    })?
            } else {
                *spec_id
            };
            if !metadata
                .partition_specs
                .iter()
                .any(|spec| spec.spec_id == spec_id)
            {
                return Err(Error::InvalidMetadata {
                    field: "default-spec-id",
                    message: format!("partition spec {} not in partition-specs", spec_id),
                });
            }
            metadata.default_spec_id = spec_id;
            Ok(metadata)
        }
        TableUpdate::AddSortOrder { sort_order } => metadata.add_sort_order(sort_order.clone()),
        TableUpdate::SetDefaultSortOrder { sort_order_id } => {
            let sort_order_id = if *sort_order_id == -1 {
                metadata
                    .sort_orders
                    .last()
                    .map(|order| order.order_id)
                    .ok_or(Error::InvalidMetadata {
                        field: "default-sort-order-id",
                        message: "no sort order to select".to_string(),
                    })?
            } else {
                *sort_order_id
            };
            if !metadata
                .sort_orders
                .iter()
                .any(|order| order.order_id == sort_order_id)
            {
                return Err(Error::InvalidMetadata {
                    field: "default-sort-order-id",
                    message: format!("sort order {} not in sort-orders", sort_order_id),
                });
            }
            metadata.default_sort_order_id = sort_order_id;
            Ok(metadata)
        }
        TableUpdate::AddSnapshot { snapshot } => metadata.append_snapshot(snapshot.clone()),
        TableUpdate::RemoveSnapshots { snapshot_ids } => metadata.remove_snapshots(snapshot_ids),
        TableUpdate::SetSnapshotRef {
            ref_name,
            reference,
        } => {
            if metadata.snapshot_by_id(reference.snapshot_id).is_none() {
                return Err(Error::InvalidMetadata {
                    field: "refs",
                    message: format!(
                        "ref {} points to unknown snapshot {}",
                        ref_name, reference.snapshot_id
                    ),
                });
            }
            if ref_name == crate::model::snapshot::MAIN_BRANCH {
                metadata.current_snapshot_id = Some(reference.snapshot_id);
            }
            metadata.refs.insert(ref_name.clone(), reference.clone());
            Ok(metadata)
        }
        TableUpdate::RemoveSnapshotRef { ref_name } => {
            if ref_name == crate::model::snapshot::MAIN_BRANCH
                && metadata.current_snapshot_id.is_some()
            {
                return Err(Error::InvalidMetadata {
                    field: "refs",
                    message: "cannot remove the main branch of a snapshotted table".to_string(),
                });
            }
            metadata.refs.remove(ref_name);
            Ok(metadata)
        }
        TableUpdate::SetProperties { updates } => {
            metadata.properties.extend(updates.clone());
            Ok(metadata)
        }
        TableUpdate::RemoveProperties { removals } => {
            for key in removals {
                metadata.properties.remove(key);
            }
            Ok(metadata)
        }
        TableUpdate::SetLocation { location } => {
            metadata.location = location.clone();
            Ok(metadata)
        }
    }
}

/// A change applied to a working copy of view metadata.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "action", rename_all = "kebab-case")]
pub enum ViewUpdate {
    /// Replace the view definition with a new version.
    #[serde(rename_all = "kebab-case")]
    Replace {
        /// Schema of the new definition.
        schema: Schema,
        /// The SQL text.
        sql: String,
        /// The SQL dialect.
        dialect: String,
    },
    /// Set view properties.
    #[serde(rename_all = "kebab-case")]
    SetProperties {
        /// Properties to set.
        updates: HashMap<String, String>,
    },
    /// Remove view properties.
    #[serde(rename_all = "kebab-case")]
    RemoveProperties {
        /// Property keys to remove.
        removals: Vec<String>,
    },
    /// Move the view's base location.
    #[serde(rename_all = "kebab-case")]
    SetLocation {
        /// The new location.
        location: String,
    },
}

/// Apply view updates, in order, to a working copy of the metadata.
pub fn apply_view_updates(
    metadata: crate::model::view_metadata::ViewMetadata,
    updates: &[ViewUpdate],
) -> Result<crate::model::view_metadata::ViewMetadata> {
    let mut metadata = metadata;
    for update in updates {
        metadata = match update {
            ViewUpdate::Replace {
                schema,
                sql,
                dialect,
            } => metadata.replace(schema.clone(), sql.clone(), dialect.clone()),
            ViewUpdate::SetProperties { updates } => {
                metadata.properties.extend(updates.clone());
                metadata
            }
            ViewUpdate::RemoveProperties { removals } => {
                for key in removals {
                    metadata.properties.remove(key);
                }
                metadata
            }
            ViewUpdate::SetLocation { location } => {
                metadata.location = location.clone();
                metadata
            }
        };
    }
    Ok(metadata)
}
