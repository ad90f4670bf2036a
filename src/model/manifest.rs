/*!
Manifest files: Avro-framed lists of data and delete files with their
partition tuples, metrics and tracking information.
*/
use std::collections::HashMap;

use apache_avro::types::Value as AvroValue;
use apache_avro::Schema as AvroSchema;
use serde_repr::{Deserialize_repr, Serialize_repr};

use crate::error::{Error, Result};
use crate::model::metadata::FormatVersion;
use crate::model::partition::PartitionSpec;
use crate::model::schema::{Schema, StructField, StructType};
use crate::model::types::PrimitiveType;
use crate::model::values::{encode_stat_value, Value};

/// Reserved field id of the `file_path` column in position delete files.
pub const POSITION_DELETE_PATH_FIELD_ID: i32 = 2147483546;
/// Reserved field id of the `pos` column in position delete files.
pub const POSITION_DELETE_POS_FIELD_ID: i32 = 2147483545;

#[derive(Debug, Serialize_repr, Deserialize_repr, PartialEq, Eq, Clone, Copy)]
#[repr(u8)]
/// Used to track additions and deletions
pub enum Status {
    /// Existing files
    Existing = 0,
    /// Added files
    Added = 1,
    /// Deleted files
    Deleted = 2,
}

#[derive(Debug, Serialize_repr, Deserialize_repr, PartialEq, Eq, Clone, Copy)]
#[repr(u8)]
/// Type of content stored by the data file.
pub enum Content {
    /// Data.
    Data = 0,
    /// Deletes at position.
    PositionDeletes = 1,
    /// Delete by equality.
    EqualityDeletes = 2,
}

#[derive(Debug, serde::Serialize, serde::Deserialize, PartialEq, Eq, Clone, Copy)]
#[serde(rename_all = "lowercase")]
/// Name of file format
pub enum FileFormat {
    /// Avro file
    Avro,
    /// Orc file
    Orc,
    /// Parquet file
    Parquet,
}

impl std::fmt::Display for FileFormat {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        match self {
            FileFormat::Avro => write!(f, "avro"),
            FileFormat::Orc => write!(f, "orc"),
            FileFormat::Parquet => write!(f, "parquet"),
        }
    }
}

/// One partition value, named after its partition field.
#[derive(Debug, PartialEq, Clone)]
pub struct PartitionValue {
    /// The partition field name.
    pub name: String,
    /// The value, null when the transform produced null.
    pub value: Option<Value>,
}

/// The partition tuple of a data file, ordered as in the partition spec.
#[derive(Debug, PartialEq, Clone, Default)]
pub struct PartitionValues(pub Vec<PartitionValue>);

impl FromIterator<(String, Option<Value>)> for PartitionValues {
    fn from_iter<I: IntoIterator<Item = (String, Option<Value>)>>(iter: I) -> Self {
        PartitionValues(
            iter.into_iter()
                .map(|(name, value)| PartitionValue { name, value })
                .collect(),
        )
    }
}

impl PartitionValues {
    /// Avro record schema for the partition tuple of the given spec,
    /// resolving each field's type through its transform.
    pub fn schema(spec: &PartitionSpec, schema: &Schema) -> Result<String> {
        let fields = spec
            .fields
            .iter()
            .map(|field| {
                let result = field.result_type(schema)?;
                Ok(format!(
                    r#"{{"name": "{}", "type": ["null", {}], "default": null}}"#,
                    field.name,
                    avro_primitive(&result)
                ))
            })
            .collect::<Result<Vec<String>>>()?;
        Ok(format!(
            r#"{{"type": "record", "name": "partition", "fields": [{}]}}"#,
            fields.join(", ")
        ))
    }

    fn to_avro(&self) -> AvroValue {
        AvroValue::Record(
            self.0
                .iter()
                .map(|field| {
                    let value = match &field.value {
                        None => AvroValue::Union(0, Box::new(AvroValue::Null)),
                        Some(value) => AvroValue::Union(1, Box::new(value_to_avro(value))),
                    };
                    (field.name.clone(), value)
                })
                .collect(),
        )
    }
}

fn avro_primitive(primitive: &PrimitiveType) -> &'static str {
    match primitive {
        PrimitiveType::Boolean => r#""boolean""#,
        PrimitiveType::Int | PrimitiveType::Date => r#""int""#,
        PrimitiveType::Long
        | PrimitiveType::Time
        | PrimitiveType::Timestamp
        | PrimitiveType::Timestamptz
        | PrimitiveType::TimestampNs
        | PrimitiveType::TimestamptzNs => r#""long""#,
        PrimitiveType::Float => r#""float""#,
        PrimitiveType::Double => r#""double""#,
        PrimitiveType::String | PrimitiveType::Uuid => r#""string""#,
        _ => r#""bytes""#,
    }
}

fn value_to_avro(value: &Value) -> AvroValue {
    match value {
        Value::Boolean(b) => AvroValue::Boolean(*b),
        Value::Int(i) => AvroValue::Int(*i),
        Value::Long(l) => AvroValue::Long(*l),
        Value::Float(f) => AvroValue::Float(*f),
        Value::Double(d) => AvroValue::Double(*d),
        Value::Date(d) => AvroValue::Int(*d),
        Value::Time(t)
        | Value::Timestamp(t)
        | Value::Timestamptz(t)
        | Value::TimestampNs(t)
        | Value::TimestamptzNs(t) => AvroValue::Long(*t),
        Value::String(s) => AvroValue::String(s.clone()),
        Value::Uuid(u) => AvroValue::String(u.to_string()),
        Value::Fixed(b) | Value::Binary(b) => AvroValue::Bytes(b.clone()),
        Value::Decimal(d) => AvroValue::Bytes(d.to_bytes()),
    }
}

fn avro_to_value(value: &AvroValue) -> Option<Value> {
    match value {
        AvroValue::Null => None,
        AvroValue::Union(_, inner) => avro_to_value(inner),
        AvroValue::Boolean(b) => Some(Value::Boolean(*b)),
        AvroValue::Int(i) => Some(Value::Int(*i)),
        AvroValue::Long(l) => Some(Value::Long(*l)),
        AvroValue::Float(f) => Some(Value::Float(*f)),
        AvroValue::Double(d) => Some(Value::Double(*d)),
        AvroValue::String(s) => Some(Value::String(s.clone())),
        AvroValue::Bytes(b) => Some(Value::Binary(b.clone())),
        _ => None,
    }
}

/// DataFile found in a manifest.
#[derive(Debug, PartialEq, Clone)]
pub struct DataFile {
    /// Type of content in the data file.
    pub content: Content,
    /// Full URI for the file with a FS scheme.
    pub file_path: String,
    /// File format of the data file.
    pub file_format: FileFormat,
    /// Partition tuple, ordered as in the partition spec.
    pub partition: PartitionValues,
    /// Number of records in this file
    pub record_count: i64,
    /// Total file size in bytes
    pub file_size_in_bytes: i64,
    /// Map from column id to total size on disk
    pub column_sizes: Option<HashMap<i32, i64>>,
    /// Map from column id to number of values, including null and NaN
    pub value_counts: Option<HashMap<i32, i64>>,
    /// Map from column id to number of null values
    pub null_value_counts: Option<HashMap<i32, i64>>,
    /// Map from column id to number of NaN values
    pub nan_value_counts: Option<HashMap<i32, i64>>,
    /// Map from column id to lower bound in the column
    pub lower_bounds: Option<HashMap<i32, Vec<u8>>>,
    /// Map from column id to upper bound in the column
    pub upper_bounds: Option<HashMap<i32, Vec<u8>>>,
    /// Implementation specific key metadata for encryption
    pub key_metadata: Option<Vec<u8>>,
    /// Split offsets for the data file.
    pub split_offsets: Option<Vec<i64>>,
    /// Field ids used to determine row equality in equality delete files.
    pub equality_ids: Option<Vec<i32>>,
    /// ID representing sort order for this file
    pub sort_order_id: Option<i32>,
    /// Offset of a deletion vector blob in a Puffin file (format v3).
    pub content_offset: Option<i64>,
    /// Size of a deletion vector blob in a Puffin file (format v3).
    pub content_size_in_bytes: Option<i64>,
}

impl DataFile {
    /// Whether this file carries deletes instead of data.
    pub fn is_delete_file(&self) -> bool {
        self.content != Content::Data
    }

    /// Whether this file is a position delete file.
    pub fn is_position_delete_file(&self) -> bool {
        self.content == Content::PositionDeletes
    }

    /// Whether this file entry describes a deletion vector: a blob inside a
    /// Puffin file rather than a standalone delete file.
    pub fn is_deletion_vector(&self) -> bool {
        self.content_offset.is_some() || self.content_size_in_bytes.is_some()
    }

    /// Validate the deletion-vector constraints of format v3: both blob
    /// coordinates present and no equality ids.
    pub fn validate_deletion_vector(&self) -> Result<()> {
        if !self.is_deletion_vector() {
            return Ok(());
        }
        if self.content_offset.is_none() || self.content_size_in_bytes.is_none() {
            return Err(Error::InvalidMetadata {
                field: "content-offset",
                message: "deletion vector requires both content-offset and content-size-in-bytes"
                    .to_string(),
            });
        }
        if self.equality_ids.is_some() {
            return Err(Error::InvalidMetadata {
                field: "equality-ids",
                message: "deletion vector must not carry equality ids".to_string(),
            });
        }
        Ok(())
    }
}

/// A deletion vector in scope for a data file supersedes position delete
/// files with the same or older sequence numbers targeting the same path.
pub fn is_superseded_by_deletion_vector(
    position_delete_sequence_number: i64,
    deletion_vector_sequence_number: i64,
) -> bool {
    position_delete_sequence_number <= deletion_vector_sequence_number
}

/// The fixed schema of rows in position delete files.
pub fn position_delete_schema() -> Schema {
    Schema {
        schema_id: 0,
        identifier_field_ids: None,
        fields: StructType {
            fields: vec![
                StructField::required(
                    POSITION_DELETE_PATH_FIELD_ID,
                    "file_path",
                    PrimitiveType::String,
                ),
                StructField::required(POSITION_DELETE_POS_FIELD_ID, "pos", PrimitiveType::Long),
            ],
        },
    }
}

/// Entry in a manifest.
#[derive(Debug, PartialEq, Clone)]
pub struct ManifestEntry {
    /// Used to track additions and deletions
    pub status: Status,
    /// Snapshot id where the file was added, or deleted if status is 2.
    /// Inherited when null.
    pub snapshot_id: Option<i64>,
    /// Data sequence number of the file. Inherited when null.
    pub sequence_number: Option<i64>,
    /// File sequence number indicating when the file was added.
    /// Inherited when null.
    pub file_sequence_number: Option<i64>,
    /// The file this entry tracks.
    pub data_file: DataFile,
}

impl ManifestEntry {
    /// The Avro record schema of a manifest entry over the given partition
    /// record schema.
    pub fn schema(partition_schema: &str) -> String {
        format!(
            r#"{{
    "type": "record",
    "name": "manifest_entry",
    "fields": [
        {{"name": "status", "type": "int"}},
        {{"name": "snapshot_id", "type": ["null", "long"], "default": null}},
        {{"name": "sequence_number", "type": ["null", "long"], "default": null}},
        {{"name": "file_sequence_number", "type": ["null", "long"], "default": null}},
        {{"name": "data_file", "type": {{
            "type": "record",
            "name": "r2",
            "fields": [
                {{"name": "content", "type": "int"}},
                {{"name": "file_path", "type": "string"}},
                {{"name": "file_format", "type": "string"}},
                {{"name": "partition", "type": {partition_schema}}},
                {{"name": "record_count", "type": "long"}},
                {{"name": "file_size_in_bytes", "type": "long"}},
                {{"name": "column_sizes", "type": ["null", {{"type": "array", "items": {{
                    "type": "record", "name": "k117_v118", "fields": [
                        {{"name": "key", "type": "int"}}, {{"name": "value", "type": "long"}}
                ]}}}}], "default": null}},
                {{"name": "value_counts", "type": ["null", {{"type": "array", "items": {{
                    "type": "record", "name": "k119_v120", "fields": [
                        {{"name": "key", "type": "int"}}, {{"name": "value", "type": "long"}}
                ]}}}}], "default": null}},
                {{"name": "null_value_counts", "type": ["null", {{"type": "array", "items": {{
                    "type": "record", "name": "k121_v122", "fields": [
                        {{"name": "key", "type": "int"}}, {{"name": "value", "type": "long"}}
                ]}}}}], "default": null}},
                {{"name": "nan_value_counts", "type": ["null", {{"type": "array", "items": {{
                    "type": "record", "name": "k123_v124", "fields": [
                        {{"name": "key", "type": "int"}}, {{"name": "value", "type": "long"}}
                ]}}}}], "default": null}},
                {{"name": "lower_bounds", "type": ["null", {{"type": "array", "items": {{
                    "type": "record", "name": "k126_v127", "fields": [
                        {{"name": "key", "type": "int"}}, {{"name": "value", "type": "bytes"}}
                ]}}}}], "default": null}},
                {{"name": "upper_bounds", "type": ["null", {{"type": "array", "items": {{
                    "type": "record", "name": "k129_v130", "fields": [
                        {{"name": "key", "type": "int"}}, {{"name": "value", "type": "bytes"}}
                ]}}}}], "default": null}},
                {{"name": "key_metadata", "type": ["null", "bytes"], "default": null}},
                {{"name": "split_offsets", "type": ["null", {{"type": "array", "items": "long"}}], "default": null}},
                {{"name": "equality_ids", "type": ["null", {{"type": "array", "items": "int"}}], "default": null}},
                {{"name": "sort_order_id", "type": ["null", "int"], "default": null}},
                {{"name": "content_offset", "type": ["null", "long"], "default": null}},
                {{"name": "content_size_in_bytes", "type": ["null", "long"], "default": null}}
            ]
        }}}}
    ]
}}"#,
            partition_schema = partition_schema
        )
    }

    /// Build the Avro value for this entry.
    pub fn to_avro(&self) -> AvroValue {
        let file = &self.data_file;
        let data_file = AvroValue::Record(vec![
            ("content".to_string(), AvroValue::Int(file.content as i32)),
            (
                "file_path".to_string(),
                AvroValue::String(file.file_path.clone()),
            ),
            (
                "file_format".to_string(),
                AvroValue::String(file.file_format.to_string()),
            ),
            ("partition".to_string(), file.partition.to_avro()),
            (
                "record_count".to_string(),
                AvroValue::Long(file.record_count),
            ),
            (
                "file_size_in_bytes".to_string(),
                AvroValue::Long(file.file_size_in_bytes),
            ),
            (
                "column_sizes".to_string(),
                long_map_to_avro(&file.column_sizes),
            ),
            (
                "value_counts".to_string(),
                long_map_to_avro(&file.value_counts),
            ),
            (
                "null_value_counts".to_string(),
                long_map_to_avro(&file.null_value_counts),
            ),
            (
                "nan_value_counts".to_string(),
                long_map_to_avro(&file.nan_value_counts),
            ),
            (
                "lower_bounds".to_string(),
                bytes_map_to_avro(&file.lower_bounds),
            ),
            (
                "upper_bounds".to_string(),
                bytes_map_to_avro(&file.upper_bounds),
            ),
            (
                "key_metadata".to_string(),
                option_to_avro(file.key_metadata.as_ref().map(|b| AvroValue::Bytes(b.clone()))),
            ),
            (
                "split_offsets".to_string(),
                option_to_avro(file.split_offsets.as_ref().map(|offsets| {
                    AvroValue::Array(offsets.iter().map(|o| AvroValue::Long(*o)).collect())
                })),
            ),
            (
                "equality_ids".to_string(),
                option_to_avro(file.equality_ids.as_ref().map(|ids| {
                    AvroValue::Array(ids.iter().map(|id| AvroValue::Int(*id)).collect())
                })),
            ),
            (
                "sort_order_id".to_string(),
                option_to_avro(file.sort_order_id.map(AvroValue::Int)),
            ),
            (
                "content_offset".to_string(),
                option_to_avro(file.content_offset.map(AvroValue::Long)),
            ),
            (
                "content_size_in_bytes".to_string(),
                option_to_avro(file.content_size_in_bytes.map(AvroValue::Long)),
            ),
        ]);
        AvroValue::Record(vec![
            ("status".to_string(), AvroValue::Int(self.status as i32)),
            (
                "snapshot_id".to_string(),
                option_to_avro(self.snapshot_id.map(AvroValue::Long)),
            ),
            (
                "sequence_number".to_string(),
                option_to_avro(self.sequence_number.map(AvroValue::Long)),
            ),
            (
                "file_sequence_number".to_string(),
                option_to_avro(self.file_sequence_number.map(AvroValue::Long)),
            ),
            ("data_file".to_string(), data_file),
        ])
    }
}

fn option_to_avro(value: Option<AvroValue>) -> AvroValue {
    match value {
        None => AvroValue::Union(0, Box::new(AvroValue::Null)),
        Some(value) => AvroValue::Union(1, Box::new(value)),
    }
}

fn long_map_to_avro(map: &Option<HashMap<i32, i64>>) -> AvroValue {
    option_to_avro(map.as_ref().map(|map| {
        let mut entries: Vec<(i32, i64)> = map.iter().map(|(k, v)| (*k, *v)).collect();
        entries.sort_by_key(|(k, _)| *k);
        AvroValue::Array(
            entries
                .into_iter()
                .map(|(key, value)| {
                    AvroValue::Record(vec![
                        ("key".to_string(), AvroValue::Int(key)),
                        ("value".to_string(), AvroValue::Long(value)),
                    ])
                })
                .collect(),
        )
    }))
}

fn bytes_map_to_avro(map: &Option<HashMap<i32, Vec<u8>>>) -> AvroValue {
    option_to_avro(map.as_ref().map(|map| {
        let mut entries: Vec<(i32, &Vec<u8>)> = map.iter().map(|(k, v)| (*k, v)).collect();
        entries.sort_by_key(|(k, _)| *k);
        AvroValue::Array(
            entries
                .into_iter()
                .map(|(key, value)| {
                    AvroValue::Record(vec![
                        ("key".to_string(), AvroValue::Int(key)),
                        ("value".to_string(), AvroValue::Bytes(value.clone())),
                    ])
                })
                .collect(),
        )
    }))
}

fn record_fields(value: AvroValue) -> Result<HashMap<String, AvroValue>> {
    if let AvroValue::Record(values) = value {
        Ok(HashMap::from_iter(values))
    } else {
        Err(Error::InvalidFormat("avro record".to_string()))
    }
}

fn unwrap_union(value: &AvroValue) -> Option<&AvroValue> {
    match value {
        AvroValue::Union(_, inner) => match inner.as_ref() {
            AvroValue::Null => None,
            other => Some(other),
        },
        AvroValue::Null => None,
        other => Some(other),
    }
}

fn get_long(fields: &HashMap<String, AvroValue>, name: &str) -> Result<i64> {
    match fields.get(name).and_then(unwrap_union) {
        Some(AvroValue::Long(l)) => Ok(*l),
        Some(AvroValue::Int(i)) => Ok(*i as i64),
        _ => Err(Error::InvalidFormat(format!("manifest field {}", name))),
    }
}

fn get_opt_long(fields: &HashMap<String, AvroValue>, name: &str) -> Option<i64> {
    match fields.get(name).and_then(unwrap_union) {
        Some(AvroValue::Long(l)) => Some(*l),
        Some(AvroValue::Int(i)) => Some(*i as i64),
        _ => None,
    }
}

fn get_string(fields: &HashMap<String, AvroValue>, name: &str) -> Result<String> {
    match fields.get(name).and_then(unwrap_union) {
        Some(AvroValue::String(s)) => Ok(s.clone()),
        _ => Err(Error::InvalidFormat(format!("manifest field {}", name))),
    }
}

fn get_long_map(
    fields: &HashMap<String, AvroValue>,
    name: &str,
) -> Option<HashMap<i32, i64>> {
    match fields.get(name).and_then(unwrap_union) {
        Some(AvroValue::Array(items)) => {
            let mut map = HashMap::new();
            for item in items {
                if let AvroValue::Record(pairs) = item {
                    let mut key = None;
                    let mut value = None;
                    for (field_name, field_value) in pairs {
                        match (field_name.as_str(), field_value) {
                            ("key", AvroValue::Int(k)) => key = Some(*k),
                            ("value", AvroValue::Long(v)) => value = Some(*v),
                            _ => {}
                        }
                    }
                    if let (Some(key), Some(value)) = (key, value) {
                        map.insert(key, value);
                    }
                }
            }
            Some(map)
        }
        _ => None,
    }
}

fn get_bytes_map(
    fields: &HashMap<String, AvroValue>,
    name: &str,
) -> Option<HashMap<i32, Vec<u8>>> {
    match fields.get(name).and_then(unwrap_union) {
        Some(AvroValue::Array(items)) => {
            let mut map = HashMap::new();
            for item in items {
                if let AvroValue::Record(pairs) = item {
                    let mut key = None;
                    let mut value = None;
                    for (field_name, field_value) in pairs {
                        match (field_name.as_str(), field_value) {
                            ("key", AvroValue::Int(k)) => key = Some(*k),
                            ("value", AvroValue::Bytes(v)) => value = Some(v.clone()),
                            _ => {}
                        }
                    }
                    if let (Some(key), Some(value)) = (key, value) {
                        map.insert(key, value);
                    }
                }
            }
            Some(map)
        }
        _ => None,
    }
}

impl TryFrom<AvroValue> for ManifestEntry {
    type Error = Error;

    fn try_from(value: AvroValue) -> Result<ManifestEntry> {
        let fields = record_fields(value)?;
        let status = match fields.get("status") {
            Some(AvroValue::Int(0)) => Status::Existing,
            Some(AvroValue::Int(1)) => Status::Added,
            Some(AvroValue::Int(2)) => Status::Deleted,
            _ => return Err(Error::InvalidFormat("manifest entry status".to_string())),
        };
        let data_file = fields
            .get("data_file")
            .cloned()
            .ok_or_else(|| Error::InvalidFormat("manifest entry data_file".to_string()))?;
        Ok(ManifestEntry {
            status,
            snapshot_id: get_opt_long(&fields, "snapshot_id"),
            sequence_number: get_opt_long(&fields, "sequence_number"),
            file_sequence_number: get_opt_long(&fields, "file_sequence_number"),
            data_file: DataFile::try_from(data_file)?,
        })
    }
}

impl TryFrom<AvroValue> for DataFile {
    type Error = Error;

    fn try_from(value: AvroValue) -> Result<DataFile> {
        let fields = record_fields(value)?;
        let content = match fields.get("content") {
            Some(AvroValue::Int(0)) | None => Content::Data,
            Some(AvroValue::Int(1)) => Content::PositionDeletes,
            Some(AvroValue::Int(2)) => Content::EqualityDeletes,
            _ => return Err(Error::InvalidFormat("data file content".to_string())),
        };
        let file_format = match get_string(&fields, "file_format")?.to_lowercase().as_str() {
            "avro" => FileFormat::Avro,
            "orc" => FileFormat::Orc,
            "parquet" => FileFormat::Parquet,
            other => return Err(Error::InvalidFormat(format!("file format {}", other))),
        };
        let partition = match fields.get("partition") {
            Some(AvroValue::Record(pairs)) => PartitionValues(
                pairs
                    .iter()
                    .map(|(name, value)| PartitionValue {
                        name: name.clone(),
                        value: avro_to_value(value),
                    })
                    .collect(),
            ),
            _ => PartitionValues::default(),
        };
        let equality_ids = match fields.get("equality_ids").and_then(unwrap_union) {
            Some(AvroValue::Array(items)) => Some(
                items
                    .iter()
                    .filter_map(|item| match item {
                        AvroValue::Int(i) => Some(*i),
                        _ => None,
                    })
                    .collect(),
            ),
            _ => None,
        };
        let split_offsets = match fields.get("split_offsets").and_then(unwrap_union) {
            Some(AvroValue::Array(items)) => Some(
                items
                    .iter()
                    .filter_map(|item| match item {
                        AvroValue::Long(l) => Some(*l),
                        _ => None,
                    })
                    .collect(),
            ),
            _ => None,
        };
        let key_metadata = match fields.get("key_metadata").and_then(unwrap_union) {
            Some(AvroValue::Bytes(bytes)) => Some(bytes.clone()),
            _ => None,
        };
        Ok(DataFile {
            content,
            file_path: get_string(&fields, "file_path")?,
            file_format,
            partition,
            record_count: get_long(&fields, "record_count")?,
            file_size_in_bytes: get_long(&fields, "file_size_in_bytes")?,
            column_sizes: get_long_map(&fields, "column_sizes"),
            value_counts: get_long_map(&fields, "value_counts"),
            null_value_counts: get_long_map(&fields, "null_value_counts"),
            nan_value_counts: get_long_map(&fields, "nan_value_counts"),
            lower_bounds: get_bytes_map(&fields, "lower_bounds"),
            upper_bounds: get_bytes_map(&fields, "upper_bounds"),
            key_metadata,
            split_offsets,
            equality_ids,
            sort_order_id: get_opt_long(&fields, "sort_order_id").map(|id| id as i32),
            content_offset: get_opt_long(&fields, "content_offset"),
            content_size_in_bytes: get_opt_long(&fields, "content_size_in_bytes"),
        })
    }
}

/// Summary counters reported by [ManifestWriter::finalize].
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct ManifestStats {
    /// Entries with status ADDED.
    pub added_files: i64,
    /// Entries with status EXISTING.
    pub existing_files: i64,
    /// Entries with status DELETED.
    pub deleted_files: i64,
    /// Rows in ADDED entries.
    pub added_rows: i64,
    /// Rows in EXISTING entries.
    pub existing_rows: i64,
    /// Rows in DELETED entries.
    pub deleted_rows: i64,
    /// Bytes in ADDED entries.
    pub added_size: i64,
    /// Bytes in DELETED entries.
    pub removed_size: i64,
}

/// Collects per-partition-field bounds while entries are appended.
#[derive(Debug, Clone)]
pub struct PartitionFieldStats {
    primitive: PrimitiveType,
    contains_null: bool,
    contains_nan: Option<bool>,
    lower: Option<Value>,
    upper: Option<Value>,
}

impl PartitionFieldStats {
    fn new(primitive: PrimitiveType) -> Self {
        let contains_nan = primitive.is_floating_point().then_some(false);
        PartitionFieldStats {
            primitive,
            contains_null: false,
            contains_nan,
            lower: None,
            upper: None,
        }
    }

    fn update(&mut self, value: Option<&Value>) {
        let value = match value {
            None => {
                self.contains_null = true;
                return;
            }
            Some(value) => value,
        };
        if value.is_nan() {
            self.contains_nan = Some(true);
            return;
        }
        match &self.lower {
            None => self.lower = Some(value.clone()),
            Some(lower) => {
                if value.compare(lower) == Some(std::cmp::Ordering::Less) {
                    self.lower = Some(value.clone());
                }
            }
        }
        match &self.upper {
            None => self.upper = Some(value.clone()),
            Some(upper) => {
                if value.compare(upper) == Some(std::cmp::Ordering::Greater) {
                    self.upper = Some(value.clone());
                }
            }
        }
    }

    fn finalize(self) -> crate::model::manifest_list::FieldSummary {
        crate::model::manifest_list::FieldSummary {
            contains_null: self.contains_null,
            contains_nan: self.contains_nan,
            lower_bound: self.lower.as_ref().map(|v| encode_stat_value(v).into()),
            upper_bound: self.upper.as_ref().map(|v| encode_stat_value(v).into()),
        }
    }

    /// The partition field's primitive type.
    pub fn primitive(&self) -> &PrimitiveType {
        &self.primitive
    }
}

/// Buffers manifest entries, tracks summary counters and partition bounds,
/// and emits the Avro-framed manifest on finalize.
pub struct ManifestWriter {
    partition_schema: String,
    entries: Vec<ManifestEntry>,
    stats: ManifestStats,
    partition_stats: Vec<PartitionFieldStats>,
    content: Content,
    schema_json: String,
    spec_id: i32,
    format_version: FormatVersion,
}

impl ManifestWriter {
    /// Create a writer for manifests of the given spec over the given schema.
    pub fn new(
        spec: &PartitionSpec,
        schema: &Schema,
        content: Content,
        format_version: FormatVersion,
    ) -> Result<Self> {
        let partition_schema = PartitionValues::schema(spec, schema)?;
        let partition_stats = spec
            .validate_against(schema)?
            .into_iter()
            .map(PartitionFieldStats::new)
            .collect();
        Ok(ManifestWriter {
            partition_schema,
            entries: vec![],
            stats: ManifestStats::default(),
            partition_stats,
            content,
            schema_json: serde_json::to_string(schema)?,
            spec_id: spec.spec_id,
            format_version,
        })
    }

    /// Append an entry, updating counters and partition bounds.
    pub fn append(&mut self, entry: ManifestEntry) -> Result<()> {
        entry.data_file.validate_deletion_vector()?;
        match entry.status {
            Status::Added => {
                self.stats.added_files += 1;
                self.stats.added_rows += entry.data_file.record_count;
                self.stats.added_size += entry.data_file.file_size_in_bytes;
            }
            Status::Existing => {
                self.stats.existing_files += 1;
                self.stats.existing_rows += entry.data_file.record_count;
            }
            Status::Deleted => {
                self.stats.deleted_files += 1;
                self.stats.deleted_rows += entry.data_file.record_count;
                self.stats.removed_size += entry.data_file.file_size_in_bytes;
            }
        }
        for (stats, value) in self
            .partition_stats
            .iter_mut()
            .zip(entry.data_file.partition.0.iter())
        {
            stats.update(value.value.as_ref());
        }
        self.entries.push(entry);
        Ok(())
    }

    /// Number of buffered entries.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether no entries are buffered.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Serialize the buffered entries to an Avro manifest. Returns the
    /// bytes, the summary counters and the partition field summaries.
    pub fn finalize(
        self,
    ) -> Result<(
        Vec<u8>,
        ManifestStats,
        Vec<crate::model::manifest_list::FieldSummary>,
    )> {
        let raw_schema = ManifestEntry::schema(&self.partition_schema);
        let schema = AvroSchema::parse_str(&raw_schema)?;
        let mut writer = apache_avro::Writer::new(&schema, Vec::new());
        writer.add_user_metadata("schema".to_string(), self.schema_json.as_str())?;
        writer.add_user_metadata(
            "partition-spec-id".to_string(),
            self.spec_id.to_string().as_str(),
        )?;
        writer.add_user_metadata(
            "format-version".to_string(),
            (self.format_version as u8).to_string().as_str(),
        )?;
        writer.add_user_metadata(
            "content".to_string(),
            match self.content {
                Content::Data => "data",
                _ => "deletes",
            },
        )?;
        for entry in &self.entries {
            writer.append(entry.to_avro())?;
        }
        let bytes = writer.into_inner()?;
        let summaries = self
            .partition_stats
            .into_iter()
            .map(PartitionFieldStats::finalize)
            .collect();
        Ok((bytes, self.stats, summaries))
    }
}

/// Read all entries of an Avro manifest.
pub fn read_manifest<R: std::io::Read>(reader: R) -> Result<Vec<ManifestEntry>> {
    let reader = apache_avro::Reader::new(reader)?;
    reader
        .map(|value| ManifestEntry::try_from(value?))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::partition::{PartitionSpec, Transform};
    use crate::model::schema::{StructField, StructType};
    use proptest::prelude::*;

    fn test_schema() -> Schema {
        Schema {
            schema_id: 0,
            identifier_field_ids: None,
            fields: StructType {
                fields: vec![
                    StructField::required(1, "id", PrimitiveType::Long),
                    StructField::optional(2, "ts", PrimitiveType::Timestamp),
                    StructField::optional(3, "amount", PrimitiveType::Double),
                ],
            },
        }
    }

    fn day_spec() -> PartitionSpec {
        PartitionSpec::builder(0)
            .with_field(2, "ts_day", Transform::Day)
            .build()
    }

    fn data_file(path: &str, records: i64, partition_day: Option<i32>) -> DataFile {
        DataFile {
            content: Content::Data,
            file_path: path.to_string(),
            file_format: FileFormat::Parquet,
            partition: PartitionValues::from_iter(vec![(
                "ts_day".to_string(),
                partition_day.map(Value::Int),
            )]),
            record_count: records,
            file_size_in_bytes: 4096,
            column_sizes: None,
            value_counts: Some(HashMap::from([(1, records)])),
            null_value_counts: Some(HashMap::from([(1, 0)])),
            nan_value_counts: None,
            lower_bounds: Some(HashMap::from([(1, vec![1, 0, 0, 0, 0, 0, 0, 0])])),
            upper_bounds: Some(HashMap::from([(1, vec![9, 0, 0, 0, 0, 0, 0, 0])])),
            key_metadata: None,
            split_offsets: Some(vec![4]),
            equality_ids: None,
            sort_order_id: Some(0),
            content_offset: None,
            content_size_in_bytes: None,
        }
    }

    #[test]
    fn test_writer_counts_and_roundtrip() {
        let mut writer = ManifestWriter::new(
            &day_spec(),
            &test_schema(),
            Content::Data,
            FormatVersion::V2,
        )
        .unwrap();
        writer
            .append(ManifestEntry {
                status: Status::Added,
                snapshot_id: Some(99),
                sequence_number: Some(1),
                file_sequence_number: Some(1),
                data_file: data_file("s3://b/t/data/f1.parquet", 10, Some(19000)),
            })
            .unwrap();
        writer
            .append(ManifestEntry {
                status: Status::Deleted,
                snapshot_id: Some(99),
                sequence_number: Some(1),
                file_sequence_number: Some(1),
                data_file: data_file("s3://b/t/data/f0.parquet", 4, None),
            })
            .unwrap();
        assert_eq!(writer.len(), 2);

        let (bytes, stats, summaries) = writer.finalize().unwrap();
        assert_eq!(stats.added_files, 1);
        assert_eq!(stats.added_rows, 10);
        assert_eq!(stats.added_size, 4096);
        assert_eq!(stats.deleted_files, 1);
        assert_eq!(stats.deleted_rows, 4);
        assert_eq!(stats.removed_size, 4096);

        assert_eq!(summaries.len(), 1);
        assert!(summaries[0].contains_null);
        assert_eq!(summaries[0].contains_nan, None);
        assert_eq!(
            summaries[0].lower_bound.as_ref().map(|b| b.to_vec()),
            Some(encode_stat_value(&Value::Int(19000)))
        );

        let entries = read_manifest(&bytes[..]).unwrap();
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].status, Status::Added);
        assert_eq!(entries[0].data_file.file_path, "s3://b/t/data/f1.parquet");
        assert_eq!(entries[0].data_file.record_count, 10);
        assert_eq!(
            entries[0].data_file.value_counts.as_ref().unwrap().get(&1),
            Some(&10)
        );
        assert_eq!(entries[1].data_file.partition.0[0].value, None);
    }

    #[test]
    fn test_contains_nan_only_for_floats() {
        let spec = PartitionSpec::builder(0)
            .with_field(3, "amount", Transform::Identity)
            .build();
        let mut writer =
            ManifestWriter::new(&spec, &test_schema(), Content::Data, FormatVersion::V2).unwrap();
        let mut file = data_file("s3://b/t/data/f1.parquet", 1, None);
        file.partition = PartitionValues::from_iter(vec![(
            "amount".to_string(),
            Some(Value::Double(f64::NAN)),
        )]);
        writer
            .append(ManifestEntry {
                status: Status::Added,
                snapshot_id: None,
                sequence_number: None,
                file_sequence_number: None,
                data_file: file,
            })
            .unwrap();
        let (_, _, summaries) = writer.finalize().unwrap();
        assert_eq!(summaries[0].contains_nan, Some(true));
        assert_eq!(summaries[0].lower_bound, None);
    }

    #[test]
    fn test_delete_file_predicates() {
        let mut file = data_file("s3://b/t/data/d1.parquet", 2, None);
        assert!(!file.is_delete_file());
        file.content = Content::PositionDeletes;
        assert!(file.is_delete_file());
        assert!(file.is_position_delete_file());
        file.content = Content::EqualityDeletes;
        assert!(file.is_delete_file());
        assert!(!file.is_position_delete_file());
    }

    #[test]
    fn test_deletion_vector_validation() {
        let mut file = data_file("s3://b/t/data/deletes.puffin", 2, None);
        file.content = Content::PositionDeletes;
        file.content_offset = Some(4);
        assert!(file.validate_deletion_vector().is_err());
        file.content_size_in_bytes = Some(128);
        assert!(file.validate_deletion_vector().is_ok());
        file.equality_ids = Some(vec![1]);
        assert!(file.validate_deletion_vector().is_err());
    }

    #[test]
    fn test_deletion_vector_supersedes_older_position_deletes() {
        assert!(is_superseded_by_deletion_vector(3, 3));
        assert!(is_superseded_by_deletion_vector(2, 3));
        assert!(!is_superseded_by_deletion_vector(4, 3));
    }

    #[test]
    fn test_position_delete_schema_reserved_ids() {
        let schema = position_delete_schema();
        assert_eq!(
            schema.field_by_name("file_path").unwrap().id,
            POSITION_DELETE_PATH_FIELD_ID
        );
        assert_eq!(
            schema.field_by_name("pos").unwrap().id,
            POSITION_DELETE_POS_FIELD_ID
        );
    }

    proptest! {
        #[test]
        fn test_entry_roundtrip(records in 0i64..1_000_000, size in 0i64..1_000_000_000, day in prop::option::of(0i32..30000)) {
            let mut writer = ManifestWriter::new(
                &day_spec(),
                &test_schema(),
                Content::Data,
                FormatVersion::V2,
            ).unwrap();
            let mut file = data_file("s3://b/t/data/px.parquet", records, day);
            file.file_size_in_bytes = size;
            let entry = ManifestEntry {
                status: Status::Added,
                snapshot_id: Some(7),
                sequence_number: Some(2),
                file_sequence_number: Some(2),
                data_file: file,
            };
            writer.append(entry.clone()).unwrap();
            let (bytes, _, _) = writer.finalize().unwrap();
            let entries = read_manifest(&bytes[..]).unwrap();
            prop_assert_eq!(entries.len(), 1);
            prop_assert_eq!(&entries[0], &entry);
        }
    }
}
