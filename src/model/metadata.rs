/*!
Defines the [table metadata](https://iceberg.apache.org/spec/#table-metadata).
The main struct here is [TableMetadata] which defines the data for a table,
for format versions 2 and 3.
*/
use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use serde_repr::{Deserialize_repr, Serialize_repr};
use uuid::Uuid;

use crate::error::{Error, Entity, Result};
use crate::model::{
    partition::{PartitionSpec, PARTITION_FIELD_ID_START},
    schema::Schema,
    snapshot::{Reference, Snapshot, MAIN_BRANCH},
    sort::SortOrder,
};

/// Directory under the table location that holds metadata files.
pub const METADATA_DIR: &str = "metadata";
/// Name of the pointer file holding the current metadata version.
pub const VERSION_HINT_FILENAME: &str = "version-hint.text";
/// Milliseconds per day.
pub const MS_PER_DAY: i64 = 86_400_000;

#[derive(Debug, Serialize_repr, Deserialize_repr, PartialEq, Eq, Clone, Copy, PartialOrd, Ord)]
#[repr(u8)]
/// Table format version. Version 1 tables are not supported.
pub enum FormatVersion {
    /// Version 2: sequence numbers, delete files.
    V2 = 2,
    /// Version 3: row lineage, deletion vectors, new types.
    V3 = 3,
}

#[derive(Debug, Serialize, Deserialize, PartialEq, Eq, Clone)]
#[serde(rename_all = "kebab-case")]
/// A reference to an encryption key. The key material lives with the
/// encryption provider, never in the metadata.
pub struct EncryptionKey {
    /// Identifier other metadata structs use to name this key.
    pub key_id: String,
    /// Encrypted key metadata, opaque to the core.
    pub encrypted_key_metadata: String,
}

#[derive(Debug, Serialize, Deserialize, PartialEq, Clone)]
#[serde(rename_all = "kebab-case")]
/// Metadata of an iceberg table.
pub struct TableMetadata {
    /// Integer version for the format.
    pub format_version: FormatVersion,
    /// A UUID that identifies the table
    pub table_uuid: Uuid,
    /// Location tables base location
    pub location: String,
    /// The tables highest sequence number
    pub last_sequence_number: i64,
    /// Timestamp in milliseconds from the unix epoch when the table was last updated.
    pub last_updated_ms: i64,
    /// An integer; the highest assigned column ID for the table.
    pub last_column_id: i32,
    /// ID of the table's current schema.
    pub current_schema_id: i32,
    /// A list of schemas, stored as objects with schema-id.
    pub schemas: Vec<Schema>,
    /// ID of the "current" spec that writers should use by default.
    pub default_spec_id: i32,
    /// A list of partition specs, stored as full partition spec objects.
    pub partition_specs: Vec<PartitionSpec>,
    /// An integer; the highest assigned partition field ID across all partition specs for the table.
    pub last_partition_id: i32,
    /// Default sort order id of the table. Note that this could be used by
    /// writers, but is not used when reading because reads use the specs
    /// stored in manifest files.
    pub default_sort_order_id: i32,
    /// A list of sort orders, stored as full sort order objects.
    pub sort_orders: Vec<SortOrder>,
    /// A string to string map of table properties. This is used to control settings that
    /// affect reading and writing and is not intended to be used for arbitrary metadata.
    /// For example, commit.retry.num-retries is used to control the number of commit retries.
    #[serde(default)]
    pub properties: HashMap<String, String>,
    /// long ID of the current table snapshot; must be the same as the current
    /// ID of the main branch in refs. Serialized as an explicit null when the
    /// table has no snapshots.
    #[serde(default)]
    pub current_snapshot_id: Option<i64>,
    /// A list of valid snapshots. Valid snapshots are snapshots for which all
    /// data files exist in the file system. A data file must not be deleted
    /// from the file system until the last snapshot in which it was listed is
    /// garbage collected.
    #[serde(default)]
    pub snapshots: Vec<Snapshot>,
    /// A list of timestamp and snapshot ID pairs that encodes changes
    /// to the current snapshot for the table. Each time the current-snapshot-id
    /// is changed, a new entry should be added with the last-updated-ms
    /// and the new current-snapshot-id.
    #[serde(default)]
    pub snapshot_log: Vec<SnapshotLog>,
    /// A list of timestamp and metadata file location pairs
    /// that encodes changes to the previous metadata files for the table.
    /// Each time a new metadata file is created, a new entry of the
    /// previous metadata file location should be added to the list.
    /// Tables can be configured to remove oldest metadata log entries and
    /// keep a fixed-size log of the most recent entries after a commit.
    #[serde(default)]
    pub metadata_log: Vec<MetadataLog>,
    /// A map of snapshot references. The map keys are the unique snapshot reference
    /// names in the table, and the map values are snapshot reference objects.
    /// There is always a main branch reference pointing to the current-snapshot-id
    /// even if the refs map is null.
    #[serde(default)]
    pub refs: HashMap<String, Reference>,
    /// The next row id to assign to newly added rows (format v3 row lineage).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub next_row_id: Option<i64>,
    /// References to encryption keys used by this table (format v3).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub encryption_keys: Option<Vec<EncryptionKey>>,
}

#[derive(Debug, Serialize, Deserialize, PartialEq, Eq, Clone)]
#[serde(rename_all = "kebab-case")]
/// Encodes changes to the previous metadata files for the table
pub struct MetadataLog {
    /// The file for the log.
    pub metadata_file: String,
    /// Time new metadata was created
    pub timestamp_ms: i64,
}

#[derive(Debug, Serialize, Deserialize, PartialEq, Eq, Clone)]
#[serde(rename_all = "kebab-case")]
/// A log of when each snapshot was made.
pub struct SnapshotLog {
    /// Id of the snapshot.
    pub snapshot_id: i64,
    /// Last updated timestamp
    pub timestamp_ms: i64,
}

impl TableMetadata {
    /// Get current schema of the table
    pub fn current_schema(&self) -> Result<&Schema> {
        self.schemas
            .iter()
            .find(|schema| schema.schema_id == self.current_schema_id)
            .ok_or(Error::InvalidMetadata {
                field: "current-schema-id",
                message: format!("schema {} not in schemas", self.current_schema_id),
            })
    }

    /// Get the default partition spec for the table
    pub fn default_spec(&self) -> Result<&PartitionSpec> {
        self.partition_specs
            .iter()
            .find(|spec| spec.spec_id == self.default_spec_id)
            .ok_or(Error::InvalidMetadata {
                field: "default-spec-id",
                message: format!("partition spec {} not in partition-specs", self.default_spec_id),
            })
    }

    /// Get the default sort order for the table
    pub fn default_sort_order(&self) -> Result<&SortOrder> {
        self.sort_orders
            .iter()
            .find(|order| order.order_id == self.default_sort_order_id)
            .ok_or(Error::InvalidMetadata {
                field: "default-sort-order-id",
                message: format!("sort order {} not in sort-orders", self.default_sort_order_id),
            })
    }

    /// Get the current snapshot of the table
    pub fn current_snapshot(&self) -> Option<&Snapshot> {
        self.current_snapshot_id
            .and_then(|snapshot_id| self.snapshot_by_id(snapshot_id))
    }

    /// Get a snapshot by id.
    pub fn snapshot_by_id(&self, snapshot_id: i64) -> Option<&Snapshot> {
        self.snapshots
            .iter()
            .find(|snapshot| snapshot.snapshot_id == snapshot_id)
    }

    /// Check the structural invariants that every metadata file must hold.
    pub fn validate(&self) -> Result<()> {
        self.current_schema()?;
        self.default_spec()?;
        self.default_sort_order()?;

        match self.current_snapshot_id {
            None => {
                if !self.snapshots.is_empty() {
                    return Err(Error::InvalidMetadata {
                        field: "current-snapshot-id",
                        message: "null while snapshots exist".to_string(),
                    });
                }
            }
            Some(current) => {
                if self.snapshot_by_id(current).is_none() {
                    return Err(Error::InvalidMetadata {
                        field: "current-snapshot-id",
                        message: format!("snapshot {} not in snapshots", current),
                    });
                }
            }
        }

        for snapshot in &self.snapshots {
            if snapshot.sequence_number > self.last_sequence_number {
                return Err(Error::InvalidMetadata {
                    field: "last-sequence-number",
                    message: format!(
                        "snapshot {} sequence number {} over {}",
                        snapshot.snapshot_id, snapshot.sequence_number, self.last_sequence_number
                    ),
                });
            }
            if let Some(schema_id) = snapshot.schema_id {
                if !self.schemas.iter().any(|schema| schema.schema_id == schema_id) {
                    return Err(Error::InvalidMetadata {
                        field: "schema-id",
                        message: format!(
                            "snapshot {} references unknown schema {}",
                            snapshot.snapshot_id, schema_id
                        ),
                    });
                }
            }
            if snapshot.manifest_list.is_empty() {
                return Err(Error::InvalidMetadata {
                    field: "manifest-list",
                    message: format!("snapshot {} has no manifest list", snapshot.snapshot_id),
                });
            }
        }

        for (name, reference) in &self.refs {
            if self.snapshot_by_id(reference.snapshot_id).is_none() {
                return Err(Error::InvalidMetadata {
                    field: "refs",
                    message: format!(
                        "ref {} points to unknown snapshot {}",
                        name, reference.snapshot_id
                    ),
                });
            }
        }

        if self.format_version == FormatVersion::V3 {
            match self.next_row_id {
                None => {
                    return Err(Error::InvalidMetadata {
                        field: "next-row-id",
                        message: "required for format version 3".to_string(),
                    })
                }
                Some(next_row_id) if next_row_id < 0 => {
                    return Err(Error::InvalidMetadata {
                        field: "next-row-id",
                        message: format!("negative value {}", next_row_id),
                    })
                }
                _ => {}
            }
        }
        Ok(())
    }

    /// Append a snapshot, updating `snapshots`, the snapshot log, the
    /// current snapshot id and the `main` branch ref in one step.
    ///
    /// The snapshot's sequence number must be greater than
    /// `last-sequence-number`; afterwards `last-sequence-number` is the
    /// maximum of the two. For format v3, `next-row-id` advances by the
    /// snapshot's `added-rows`.
    pub fn append_snapshot(mut self, mut snapshot: Snapshot) -> Result<TableMetadata> {
        if snapshot.sequence_number <= self.last_sequence_number {
            return Err(Error::InvalidMetadata {
                field: "sequence-number",
                message: format!(
                    "snapshot sequence number {} not greater than {}",
                    snapshot.sequence_number, self.last_sequence_number
                ),
            });
        }
        if self.format_version == FormatVersion::V3 {
            let next_row_id = self.next_row_id.unwrap_or(0);
            snapshot.first_row_id.get_or_insert(next_row_id);
            self.next_row_id = Some(next_row_id + snapshot.added_rows.unwrap_or(0));
        }
        self.last_sequence_number = self.last_sequence_number.max(snapshot.sequence_number);
        self.last_updated_ms = snapshot.timestamp_ms;
        self.current_snapshot_id = Some(snapshot.snapshot_id);
        self.snapshot_log.push(SnapshotLog {
            snapshot_id: snapshot.snapshot_id,
            timestamp_ms: snapshot.timestamp_ms,
        });
        let main = match self.refs.remove(MAIN_BRANCH) {
            Some(mut main) => {
                main.snapshot_id = snapshot.snapshot_id;
                main
            }
            None => Reference::branch(snapshot.snapshot_id),
        };
        self.refs.insert(MAIN_BRANCH.to_string(), main);
        self.snapshots.push(snapshot);
        Ok(self)
    }

    /// Remove the given snapshots, dropping dangling snapshot-log entries.
    /// The current snapshot and referenced snapshots cannot be removed.
    pub fn remove_snapshots(mut self, snapshot_ids: &[i64]) -> Result<TableMetadata> {
        for snapshot_id in snapshot_ids {
            if self.current_snapshot_id == Some(*snapshot_id) {
                return Err(Error::InvalidMetadata {
                    field: "current-snapshot-id",
                    message: format!("cannot remove current snapshot {}", snapshot_id),
                });
            }
            if self.refs.values().any(|r| r.snapshot_id == *snapshot_id) {
                return Err(Error::InvalidMetadata {
                    field: "refs",
                    message: format!("cannot remove referenced snapshot {}", snapshot_id),
                });
            }
            if self.snapshot_by_id(*snapshot_id).is_none() {
                return Err(Error::NotFound(Entity::Snapshot(*snapshot_id)));
            }
        }
        self.snapshots
            .retain(|snapshot| !snapshot_ids.contains(&snapshot.snapshot_id));
        self.snapshot_log
            .retain(|entry| !snapshot_ids.contains(&entry.snapshot_id));
        Ok(self)
    }

    /// Add a schema to the history. The caller decides separately whether it
    /// becomes current.
    pub fn add_schema(mut self, schema: Schema) -> Result<TableMetadata> {
        if self.schemas.iter().any(|s| s.schema_id == schema.schema_id) {
            return Err(Error::InvalidMetadata {
                field: "schemas",
                message: format!("schema id {} already present", schema.schema_id),
            });
        }
        self.last_column_id = self.last_column_id.max(schema.highest_field_id());
        self.schemas.push(schema);
        Ok(self)
    }

    /// Add a partition spec to the history.
    pub fn add_partition_spec(mut self, spec: PartitionSpec) -> Result<TableMetadata> {
        if self.partition_specs.iter().any(|s| s.spec_id == spec.spec_id) {
            return Err(Error::InvalidMetadata {
                field: "partition-specs",
                message: format!("spec id {} already present", spec.spec_id),
            });
        }
        if let Some(highest) = spec.highest_field_id() {
            self.last_partition_id = self.last_partition_id.max(highest);
        }
        self.partition_specs.push(spec);
        Ok(self)
    }

    /// Add a sort order to the history.
    pub fn add_sort_order(mut self, order: SortOrder) -> Result<TableMetadata> {
        if self.sort_orders.iter().any(|o| o.order_id == order.order_id) {
            return Err(Error::InvalidMetadata {
                field: "sort-orders",
                message: format!("order id {} already present", order.order_id),
            });
        }
        self.sort_orders.push(order);
        Ok(self)
    }

    /// Upgrade a format v2 table to v3. Pre-existing snapshots are left
    /// untouched; they keep no `first-row-id`. Upgrading a v3 table is
    /// rejected, as is any downgrade.
    pub fn upgrade_format_version(mut self, target: FormatVersion) -> Result<TableMetadata> {
        match (self.format_version, target) {
            (FormatVersion::V2, FormatVersion::V3) => {
                self.format_version = FormatVersion::V3;
                self.next_row_id = Some(0);
                self.last_updated_ms = chrono::Utc::now().timestamp_millis();
                Ok(self)
            }
            (from, to) if from == to => Err(Error::InvalidMetadata {
                field: "format-version",
                message: format!("table is already at version {:?}", from),
            }),
            (from, to) => Err(Error::InvalidMetadata {
                field: "format-version",
                message: format!("cannot change version {:?} to {:?}", from, to),
            }),
        }
    }
}

/// Builder for a fresh [TableMetadata].
pub struct TableMetadataBuilder {
    location: String,
    format_version: FormatVersion,
    schema: Option<Schema>,
    partition_spec: Option<PartitionSpec>,
    sort_order: Option<SortOrder>,
    properties: HashMap<String, String>,
}

impl TableMetadataBuilder {
    /// Creates a new builder for a table at the given location.
    pub fn new(location: impl Into<String>) -> Self {
        TableMetadataBuilder {
            location: location.into(),
            format_version: FormatVersion::V2,
            schema: None,
            partition_spec: None,
            sort_order: None,
            properties: HashMap::new(),
        }
    }

    /// Table format version, defaults to 2.
    pub fn with_format_version(mut self, format_version: FormatVersion) -> Self {
        self.format_version = format_version;
        self
    }

    /// The initial schema. Defaults to an empty schema with id 0.
    pub fn with_schema(mut self, schema: Schema) -> Self {
        self.schema = Some(schema);
        self
    }

    /// The initial partition spec. Defaults to unpartitioned.
    pub fn with_partition_spec(mut self, spec: PartitionSpec) -> Self {
        self.partition_spec = Some(spec);
        self
    }

    /// The initial sort order. Defaults to unsorted.
    pub fn with_sort_order(mut self, order: SortOrder) -> Self {
        self.sort_order = Some(order);
        self
    }

    /// Initial table properties.
    pub fn with_properties(mut self, properties: HashMap<String, String>) -> Self {
        self.properties = properties;
        self
    }

    /// Build the metadata with a fresh table UUID.
    pub fn build(self) -> Result<TableMetadata> {
        let schema = self.schema.unwrap_or(Schema {
            schema_id: 0,
            identifier_field_ids: None,
            fields: crate::model::schema::StructType { fields: vec![] },
        });
        let partition_spec = self.partition_spec.unwrap_or_else(PartitionSpec::unpartitioned);
        let sort_order = self.sort_order.unwrap_or_else(SortOrder::unsorted);
        partition_spec.validate_against(&schema)?;
        sort_order.validate_against(&schema)?;
        let metadata = TableMetadata {
            format_version: self.format_version,
            table_uuid: Uuid::new_v4(),
            location: self.location,
            last_sequence_number: 0,
            last_updated_ms: chrono::Utc::now().timestamp_millis(),
            last_column_id: schema.highest_field_id(),
            current_schema_id: schema.schema_id,
            schemas: vec![schema],
            default_spec_id: partition_spec.spec_id,
            last_partition_id: partition_spec
                .highest_field_id()
                .unwrap_or(PARTITION_FIELD_ID_START - 1),
            partition_specs: vec![partition_spec],
            default_sort_order_id: sort_order.order_id,
            sort_orders: vec![sort_order],
            properties: self.properties,
            current_snapshot_id: None,
            snapshots: vec![],
            snapshot_log: vec![],
            metadata_log: vec![],
            refs: HashMap::new(),
            next_row_id: match self.format_version {
                FormatVersion::V2 => None,
                FormatVersion::V3 => Some(0),
            },
            encryption_keys: None,
        };
        metadata.validate()?;
        Ok(metadata)
    }
}

#[cfg(test)]
mod tests {
    use anyhow::Result;

    use super::*;
    use crate::model::schema::{StructField, StructType};
    use crate::model::snapshot::{Operation, Summary, SummaryDeltas, SnapshotBuilder};
    use crate::model::types::PrimitiveType;

    fn test_schema() -> Schema {
        Schema {
            schema_id: 0,
            identifier_field_ids: None,
            fields: StructType {
                fields: vec![
                    StructField::required(1, "id", PrimitiveType::Long),
                    StructField::optional(2, "name", PrimitiveType::String),
                ],
            },
        }
    }

    fn test_snapshot(sequence_number: i64) -> Snapshot {
        SnapshotBuilder::default()
            .with_last_sequence_number(sequence_number - 1)
            .with_manifest_list("memory://w/db/t/metadata/snap-1-0-x.avro")
            .with_summary(Summary::from_deltas(
                Operation::Append,
                None,
                &SummaryDeltas::default(),
            ))
            .with_schema_id(0)
            .build()
            .unwrap()
    }

    #[test]
    fn test_deserialize_table_metadata_v2() -> Result<()> {
        let data = r#"
            {
                "format-version" : 2,
                "table-uuid": "fb072c92-a02b-11e9-ae9c-1bb7bc9eca94",
                "location": "s3://b/wh/data.db/table",
                "last-sequence-number" : 1,
                "last-updated-ms": 1515100955770,
                "last-column-id": 1,
                "schemas": [
                    {
                        "schema-id" : 1,
                        "type" : "struct",
                        "fields" :[
                            {
                                "id": 1,
                                "name": "struct_name",
                                "required": true,
                                "type": "fixed[1]"
                            }
                        ]
                    }
                ],
                "current-schema-id" : 1,
                "partition-specs": [
                    {
                        "spec-id": 1,
                        "fields": [
                            {
                                "source-id": 4,
                                "field-id": 1000,
                                "name": "ts_day",
                                "transform": "day"
                            }
                        ]
                    }
                ],
                "default-spec-id": 1,
                "last-partition-id": 1000,
                "properties": {
                    "commit.retry.num-retries": "1"
                },
                "current-snapshot-id": null,
                "metadata-log": [
                    {
                        "metadata-file": "s3://bucket/.../v1.json",
                        "timestamp-ms": 1515100
                    }
                ],
                "sort-orders": [{"order-id": 0, "fields": []}],
                "default-sort-order-id": 0
            }
        "#;
        let metadata = serde_json::from_str::<TableMetadata>(data)?;
        //test serialise deserialise works.
        let metadata_two: TableMetadata =
            serde_json::from_str(&serde_json::to_string(&metadata)?)?;
        assert_eq!(metadata, metadata_two);
        assert_eq!(metadata.format_version, FormatVersion::V2);

        Ok(())
    }

    #[test]
    fn test_format_version_one_rejected() {
        let data = r#"{"format-version" : 1, "table-uuid": "fb072c92-a02b-11e9-ae9c-1bb7bc9eca94"}"#;
        assert!(serde_json::from_str::<TableMetadata>(data).is_err());
    }

    #[test]
    fn test_invalid_table_uuid() {
        let data = r#"
            {
                "format-version" : 2,
                "table-uuid": "xxxx"
            }
        "#;
        assert!(serde_json::from_str::<TableMetadata>(data).is_err());
    }

    #[test]
    fn test_current_snapshot_id_serialized_as_null() -> Result<()> {
        let metadata = TableMetadataBuilder::new("memory://w/db/t")
            .with_schema(test_schema())
            .build()?;
        let json: serde_json::Value = serde_json::to_value(&metadata)?;
        assert!(json.get("current-snapshot-id").is_some());
        assert!(json["current-snapshot-id"].is_null());
        // long fields are plain JSON numbers
        assert!(json["last-sequence-number"].is_i64());
        Ok(())
    }

    #[test]
    fn test_builder_defaults() -> Result<()> {
        let metadata = TableMetadataBuilder::new("memory://w/db/t")
            .with_schema(test_schema())
            .build()?;
        assert_eq!(metadata.last_column_id, 2);
        assert_eq!(metadata.current_schema_id, 0);
        assert_eq!(metadata.last_partition_id, PARTITION_FIELD_ID_START - 1);
        assert_eq!(metadata.current_snapshot_id, None);
        assert!(metadata.snapshots.is_empty());
        assert_eq!(metadata.next_row_id, None);
        Ok(())
    }

    #[test]
    fn test_append_snapshot_updates_everything() -> Result<()> {
        let metadata = TableMetadataBuilder::new("memory://w/db/t")
            .with_schema(test_schema())
            .build()?;
        let snapshot = test_snapshot(1);
        let snapshot_id = snapshot.snapshot_id;
        let metadata = metadata.append_snapshot(snapshot)?;

        assert_eq!(metadata.last_sequence_number, 1);
        assert_eq!(metadata.current_snapshot_id, Some(snapshot_id));
        assert_eq!(metadata.snapshot_log.len(), 1);
        assert_eq!(metadata.refs.get(MAIN_BRANCH).unwrap().snapshot_id, snapshot_id);
        metadata.validate()?;
        Ok(())
    }

    #[test]
    fn test_append_snapshot_rejects_stale_sequence_number() -> Result<()> {
        let metadata = TableMetadataBuilder::new("memory://w/db/t")
            .with_schema(test_schema())
            .build()?
            .append_snapshot(test_snapshot(1))?;
        let stale = test_snapshot(1);
        assert!(metadata.append_snapshot(stale).is_err());
        Ok(())
    }

    #[test]
    fn test_v3_row_lineage_advances() -> Result<()> {
        let metadata = TableMetadataBuilder::new("memory://w/db/t")
            .with_schema(test_schema())
            .with_format_version(FormatVersion::V3)
            .build()?;
        assert_eq!(metadata.next_row_id, Some(0));

        let mut snapshot = test_snapshot(1);
        snapshot.added_rows = Some(10);
        let metadata = metadata.append_snapshot(snapshot)?;
        assert_eq!(metadata.next_row_id, Some(10));
        assert_eq!(metadata.snapshots[0].first_row_id, Some(0));
        Ok(())
    }

    #[test]
    fn test_upgrade_v2_to_v3_is_one_way() -> Result<()> {
        let metadata = TableMetadataBuilder::new("memory://w/db/t")
            .with_schema(test_schema())
            .build()?
            .append_snapshot(test_snapshot(1))?;
        let upgraded = metadata.upgrade_format_version(FormatVersion::V3)?;
        assert_eq!(upgraded.format_version, FormatVersion::V3);
        assert_eq!(upgraded.next_row_id, Some(0));
        // pre-existing snapshots keep no first-row-id
        assert_eq!(upgraded.snapshots[0].first_row_id, None);
        assert!(upgraded
            .clone()
            .upgrade_format_version(FormatVersion::V3)
            .is_err());
        assert!(upgraded.upgrade_format_version(FormatVersion::V2).is_err());
        Ok(())
    }

    #[test]
    fn test_remove_snapshots_protects_referenced() -> Result<()> {
        let metadata = TableMetadataBuilder::new("memory://w/db/t")
            .with_schema(test_schema())
            .build()?
            .append_snapshot(test_snapshot(1))?;
        let current = metadata.current_snapshot_id.unwrap();
        assert!(metadata.clone().remove_snapshots(&[current]).is_err());
        assert!(metadata.remove_snapshots(&[999]).is_err());
        Ok(())
    }

    #[test]
    fn test_validate_catches_dangling_refs() -> Result<()> {
        let mut metadata = TableMetadataBuilder::new("memory://w/db/t")
            .with_schema(test_schema())
            .build()?;
        metadata
            .refs
            .insert("nightly".to_string(), Reference::tag(42));
        assert!(metadata.validate().is_err());
        Ok(())
    }
}
