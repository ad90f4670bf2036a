/*!
Partition specs define the partition values of a table and how they are
derived from the source fields.

Each [PartitionField] applies a [Transform] to one source column. The
transform decides both which source types it accepts and the type of the
values it produces, so a spec can be checked against a schema before any
manifest is written.
*/
use std::fmt;
use std::str::FromStr;

use serde::{de, Deserialize, Deserializer, Serialize};

use crate::error::{Error, Result};
use crate::model::schema::{AllType, Schema};
use crate::model::types::PrimitiveType;

/// Partition field ids are assigned starting at 1000 to avoid colliding
/// with data field ids.
pub const PARTITION_FIELD_ID_START: i32 = 1000;

#[derive(Debug, PartialEq, Eq, Clone, Copy)]
/// A transformation applied to each source column to produce a partition
/// value.
pub enum Transform {
    /// Always produces `null`
    Void,
    /// Source value, unmodified
    Identity,
    /// Extract a date or timestamp year as years from 1970
    Year,
    /// Extract a date or timestamp month as months from 1970-01-01
    Month,
    /// Extract a date or timestamp day as days from 1970-01-01
    Day,
    /// Extract a timestamp hour as hours from 1970-01-01 00:00:00
    Hour,
    /// Hash of value, mod N
    Bucket(u32),
    /// Value truncated to width
    Truncate(u32),
}

impl Transform {
    /// The type of the values this transform produces from a column of the
    /// given type, or an error when the transform does not apply to it.
    ///
    /// `identity` and `void` accept any primitive and keep its type. The
    /// date transforms produce ints counted from 1970; `hour` needs a
    /// timestamp. `bucket` hashes any orderable primitive to an int,
    /// `truncate` keeps the source type for ints, longs, decimals, strings
    /// and binary.
    pub fn result_type(&self, source: &PrimitiveType) -> Result<PrimitiveType> {
        use PrimitiveType::*;
        let unsupported = || {
            Err(Error::InvalidMetadata {
                field: "transform",
                message: format!("cannot apply {} to {}", self, source),
            })
        };
        match self {
            Transform::Identity | Transform::Void => Ok(source.clone()),
            Transform::Year | Transform::Month | Transform::Day => match source {
                Date | Timestamp | Timestamptz | TimestampNs | TimestamptzNs => Ok(Int),
                _ => unsupported(),
            },
            Transform::Hour => match source {
                Timestamp | Timestamptz | TimestampNs | TimestamptzNs => Ok(Int),
                _ => unsupported(),
            },
            Transform::Bucket(_) => match source {
                Int | Long | Decimal { .. } | Date | Time | Timestamp | Timestamptz
                | TimestampNs | TimestamptzNs | String | Uuid | Fixed(_) | Binary => Ok(Int),
                _ => unsupported(),
            },
            Transform::Truncate(_) => match source {
                Int | Long | Decimal { .. } | String | Binary => Ok(source.clone()),
                _ => unsupported(),
            },
        }
    }
}

impl fmt::Display for Transform {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Transform::Void => write!(f, "void"),
            Transform::Identity => write!(f, "identity"),
            Transform::Year => write!(f, "year"),
            Transform::Month => write!(f, "month"),
            Transform::Day => write!(f, "day"),
            Transform::Hour => write!(f, "hour"),
            Transform::Bucket(n) => write!(f, "bucket[{}]", n),
            Transform::Truncate(width) => write!(f, "truncate[{}]", width),
        }
    }
}

impl FromStr for Transform {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "void" => Ok(Transform::Void),
            "identity" => Ok(Transform::Identity),
            "year" => Ok(Transform::Year),
            "month" => Ok(Transform::Month),
            "day" => Ok(Transform::Day),
            "hour" => Ok(Transform::Hour),
            _ => {
                let parameter = |name: &str| {
                    s.strip_prefix(name)
                        .and_then(|rest| rest.strip_prefix('['))
                        .and_then(|rest| rest.strip_suffix(']'))
                };
                let parsed = if let Some(n) = parameter("bucket") {
                    n.parse().ok().map(Transform::Bucket)
                } else if let Some(width) = parameter("truncate") {
                    width.parse().ok().map(Transform::Truncate)
                } else {
                    None
                };
                match parsed {
                    Some(Transform::Bucket(0)) | Some(Transform::Truncate(0)) | None => {
                        Err(Error::InvalidFormat(format!("transform {}", s)))
                    }
                    Some(transform) => Ok(transform),
                }
            }
        }
    }
}

impl Serialize for Transform {
    fn serialize<S>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for Transform {
    fn deserialize<D>(deserializer: D) -> std::result::Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(de::Error::custom)
    }
}

#[derive(Debug, Serialize, Deserialize, PartialEq, Eq, Clone)]
#[serde(rename_all = "kebab-case")]
/// One field of a partition spec: a transform over a source column.
pub struct PartitionField {
    /// A source column id from the table's schema
    pub source_id: i32,
    /// A partition field id that is used to identify a partition field and is unique within a partition spec.
    /// In v2 table metadata, it is unique across all partition specs.
    pub field_id: i32,
    /// A partition name.
    pub name: String,
    /// A transform that is applied to the source column to produce a partition value.
    pub transform: Transform,
}

impl PartitionField {
    /// The type of this field's partition values over the given schema.
    pub fn result_type(&self, schema: &Schema) -> Result<PrimitiveType> {
        let source = schema
            .field_by_id(self.source_id)
            .ok_or(Error::InvalidMetadata {
                field: "partition-specs",
                message: format!("partition source field {} not in schema", self.source_id),
            })?;
        match &source.field_type {
            AllType::Primitive(primitive) => self.transform.result_type(primitive),
            other => Err(Error::InvalidMetadata {
                field: "partition-specs",
                message: format!("cannot partition by {} field {}", other, source.name),
            }),
        }
    }
}

#[derive(Debug, Serialize, Deserialize, PartialEq, Eq, Clone)]
#[serde(rename_all = "kebab-case")]
/// A definition of how partition values are derived from data fields.
pub struct PartitionSpec {
    /// Identifier for the specification
    pub spec_id: i32,
    /// Fields for the specification
    pub fields: Vec<PartitionField>,
}

impl PartitionSpec {
    /// The unpartitioned spec.
    pub fn unpartitioned() -> Self {
        PartitionSpec {
            spec_id: 0,
            fields: vec![],
        }
    }

    /// Start building a spec with field ids assigned from
    /// [PARTITION_FIELD_ID_START].
    pub fn builder(spec_id: i32) -> PartitionSpecBuilder {
        PartitionSpecBuilder {
            spec_id,
            next_field_id: PARTITION_FIELD_ID_START,
            fields: vec![],
        }
    }

    /// The highest partition field id in this spec, if any.
    pub fn highest_field_id(&self) -> Option<i32> {
        self.fields.iter().map(|field| field.field_id).max()
    }

    /// Resolve every field against the schema, checking that the source
    /// columns exist and the transforms apply to them. Returns the result
    /// types, ordered as the fields.
    pub fn validate_against(&self, schema: &Schema) -> Result<Vec<PrimitiveType>> {
        self.fields
            .iter()
            .map(|field| field.result_type(schema))
            .collect()
    }
}

/// Assigns partition field ids sequentially while collecting fields.
pub struct PartitionSpecBuilder {
    spec_id: i32,
    next_field_id: i32,
    fields: Vec<PartitionField>,
}

impl PartitionSpecBuilder {
    /// Add a partition field derived from the given source column.
    pub fn with_field(mut self, source_id: i32, name: &str, transform: Transform) -> Self {
        let field_id = self.next_field_id;
        self.next_field_id += 1;
        self.fields.push(PartitionField {
            source_id,
            field_id,
            name: name.to_string(),
            transform,
        });
        self
    }

    /// Finish the spec.
    pub fn build(self) -> PartitionSpec {
        PartitionSpec {
            spec_id: self.spec_id,
            fields: self.fields,
        }
    }
}
