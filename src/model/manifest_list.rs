/*!
 * Manifest lists: one Avro file per snapshot listing that snapshot's
 * manifests with partition summaries.
*/

use lazy_static::lazy_static;
use serde::{Deserialize, Serialize};
use serde_bytes::ByteBuf;
use serde_repr::{Deserialize_repr, Serialize_repr};
use uuid::Uuid;

use crate::error::Result;
use crate::model::metadata::METADATA_DIR;

#[derive(Debug, Serialize_repr, Deserialize_repr, PartialEq, Eq, Clone, Copy)]
#[repr(u8)]
/// The type of files tracked by a manifest.
pub enum ManifestContent {
    /// Data files.
    Data = 0,
    /// Delete files.
    Deletes = 1,
}

#[derive(Debug, Serialize, Deserialize, PartialEq, Eq, Clone)]
/// Value summary for one partition field across all files of a manifest.
pub struct FieldSummary {
    /// Whether the manifest contains at least one partition with a null value for the field
    pub contains_null: bool,
    /// Whether the manifest contains at least one partition with a NaN value for the field.
    /// Present only for float and double partition fields.
    pub contains_nan: Option<bool>,
    /// Lower bound for the non-null, non-NaN values in the partition field, or null if all values are null or NaN.
    /// If -0.0 is a value of the partition field, the lower_bound must not be +0.0
    pub lower_bound: Option<ByteBuf>,
    /// Upper bound for the non-null, non-NaN values in the partition field, or null if all values are null or NaN.
    /// If +0.0 is a value of the partition field, the upper_bound must not be -0.0.
    pub upper_bound: Option<ByteBuf>,
}

#[derive(Debug, Serialize, Deserialize, PartialEq, Eq, Clone)]
/// A manifest list includes summary metadata that can be used to avoid scanning all of the manifests in a snapshot when planning a table scan.
/// This includes the number of added, existing, and deleted files, and a summary of values for each field of the partition spec used to write the manifest.
pub struct ManifestFile {
    /// Location of the manifest file
    pub manifest_path: String,
    /// Length of the manifest file in bytes
    pub manifest_length: i64,
    /// ID of a partition spec used to write the manifest; must be listed in table metadata partition-specs
    pub partition_spec_id: i32,
    /// The type of files tracked by the manifest, either data or delete files
    pub content: ManifestContent,
    /// The sequence number when the manifest was added to the table
    pub sequence_number: i64,
    /// The minimum data sequence number of all live data or delete files in the manifest
    pub min_sequence_number: i64,
    /// ID of the snapshot where the manifest file was added
    pub added_snapshot_id: i64,
    /// Number of entries in the manifest that have status ADDED (1)
    pub added_files_count: i32,
    /// Number of entries in the manifest that have status EXISTING (0)
    pub existing_files_count: i32,
    /// Number of entries in the manifest that have status DELETED (2)
    pub deleted_files_count: i32,
    /// Number of rows in all of files in the manifest that have status ADDED
    pub added_rows_count: i64,
    /// Number of rows in all of files in the manifest that have status EXISTING
    pub existing_rows_count: i64,
    /// Number of rows in all of files in the manifest that have status DELETED
    pub deleted_rows_count: i64,
    /// A list of field summaries for each partition field in the spec. Each field in the list corresponds to a field in the manifest file's partition spec.
    pub partitions: Option<Vec<FieldSummary>>,
    /// Implementation-specific key metadata for encryption
    pub key_metadata: Option<ByteBuf>,
}

static MANIFEST_LIST_SCHEMA: &str = r#"
{
    "type": "record",
    "name": "manifest_file",
    "fields": [
        {"name": "manifest_path", "type": "string"},
        {"name": "manifest_length", "type": "long"},
        {"name": "partition_spec_id", "type": "int"},
        {"name": "content", "type": "int"},
        {"name": "sequence_number", "type": "long"},
        {"name": "min_sequence_number", "type": "long"},
        {"name": "added_snapshot_id", "type": "long"},
        {"name": "added_files_count", "type": "int"},
        {"name": "existing_files_count", "type": "int"},
        {"name": "deleted_files_count", "type": "int"},
        {"name": "added_rows_count", "type": "long"},
        {"name": "existing_rows_count", "type": "long"},
        {"name": "deleted_rows_count", "type": "long"},
        {"name": "partitions", "type": ["null", {"type": "array", "items": {
            "type": "record",
            "name": "field_summary",
            "fields": [
                {"name": "contains_null", "type": "boolean"},
                {"name": "contains_nan", "type": ["null", "boolean"], "default": null},
                {"name": "lower_bound", "type": ["null", "bytes"], "default": null},
                {"name": "upper_bound", "type": ["null", "bytes"], "default": null}
            ]
        }}], "default": null},
        {"name": "key_metadata", "type": ["null", "bytes"], "default": null}
    ]
}
"#;

lazy_static! {
    static ref MANIFEST_LIST_AVRO_SCHEMA: apache_avro::Schema =
        apache_avro::Schema::parse_str(MANIFEST_LIST_SCHEMA).unwrap();
}

impl ManifestFile {
    /// The Avro record schema of a manifest list entry.
    pub fn schema() -> &'static apache_avro::Schema {
        &MANIFEST_LIST_AVRO_SCHEMA
    }
}

/// Writes the manifest list of one snapshot and names it
/// `snap-{snapshot-id}-{attempt}-{uuid}.avro` under the table's metadata
/// directory.
pub struct ManifestListWriter {
    writer: apache_avro::Writer<'static, Vec<u8>>,
    path: String,
}

impl ManifestListWriter {
    /// Create a writer for the snapshot's manifest list.
    pub fn new(table_location: &str, snapshot_id: i64, attempt: u32) -> Self {
        let path = format!(
            "{}/{}/snap-{}-{}-{}.avro",
            table_location,
            METADATA_DIR,
            snapshot_id,
            attempt,
            Uuid::new_v4()
        );
        ManifestListWriter {
            writer: apache_avro::Writer::new(ManifestFile::schema(), Vec::new()),
            path,
        }
    }

    /// Location the manifest list should be written to.
    pub fn path(&self) -> &str {
        &self.path
    }

    /// Append a manifest entry to the list.
    pub fn append(&mut self, manifest: &ManifestFile) -> Result<()> {
        self.writer.append_ser(manifest)?;
        Ok(())
    }

    /// Finish writing and return the location and the Avro bytes for the
    /// caller to store.
    pub fn into_bytes(self) -> Result<(String, Vec<u8>)> {
        let bytes = self.writer.into_inner()?;
        Ok((self.path, bytes))
    }
}

/// Read all manifest entries of an Avro manifest list.
pub fn read_manifest_list<R: std::io::Read>(reader: R) -> Result<Vec<ManifestFile>> {
    let reader = apache_avro::Reader::with_schema(ManifestFile::schema(), reader)?;
    reader
        .map(|value| Ok(apache_avro::from_value::<ManifestFile>(&value?)?))
        .collect()
}
