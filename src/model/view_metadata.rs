/*!
 * View metadata: versioned SQL definitions over table schemas.
*/

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use serde_repr::{Deserialize_repr, Serialize_repr};
use uuid::Uuid;

use crate::error::{Error, Result};
use crate::model::schema::Schema;

#[derive(Debug, Serialize_repr, Deserialize_repr, PartialEq, Eq, Clone, Copy)]
#[repr(u8)]
/// View format version. Only version 1 exists.
pub enum ViewFormatVersion {
    /// Version 1.
    V1 = 1,
}

#[derive(Debug, Serialize, Deserialize, PartialEq, Clone)]
#[serde(rename_all = "kebab-case")]
/// Metadata of an iceberg view
pub struct ViewMetadata {
    /// A UUID that identifies the view.
    pub view_uuid: Uuid,
    /// Integer version for the format.
    pub format_version: ViewFormatVersion,
    /// The view's base location used to store metadata files.
    pub location: String,
    /// Current version of the view. Set to 1 when the view is first created.
    pub current_version_id: i32,
    /// An array of structs describing the last known versions of the view.
    pub versions: Vec<Version>,
    /// A list of timestamp and version ID pairs that encodes changes to the
    /// current version for the view.
    pub version_log: Vec<VersionLog>,
    /// A list of schemas, the same as the schemas field of table metadata.
    pub schemas: Vec<Schema>,
    /// A string to string map of view properties.
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub properties: HashMap<String, String>,
}

#[derive(Debug, Serialize, Deserialize, PartialEq, Clone)]
#[serde(rename_all = "kebab-case")]
/// A materialized version of the view definition.
pub struct Version {
    /// Monotonically increasing id indicating the version of the view. Starts with 1.
    pub version_id: i32,
    /// ID of the schema for the view version.
    pub schema_id: i32,
    /// Timestamp expressed in ms since epoch at which the version of the view was created.
    pub timestamp_ms: i64,
    /// A string map summarizing the version changes, including operation.
    pub summary: HashMap<String, String>,
    /// A list of representations for the view definition.
    pub representations: Vec<Representation>,
    /// Catalog to use when table or view references in the definition do not
    /// contain an explicit catalog.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default_catalog: Option<String>,
    /// Namespace to use when table or view references in the definition do
    /// not contain an explicit namespace.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default_namespace: Option<Vec<String>>,
}

#[derive(Debug, Serialize, Deserialize, PartialEq, Eq, Clone)]
#[serde(rename_all = "kebab-case")]
/// The timestamp when each version was made current.
pub struct VersionLog {
    /// The timestamp when the referenced version was made the current version
    pub timestamp_ms: i64,
    /// Version id of the view
    pub version_id: i32,
}

#[derive(Debug, Serialize, Deserialize, PartialEq, Eq, Clone)]
#[serde(rename_all = "kebab-case", tag = "type", rename = "sql")]
/// A view definition in SQL.
pub struct Representation {
    /// A string representing the original view definition in SQL
    pub sql: String,
    /// A string specifying the dialect of the sql field. It can be used by the engines to detect the SQL dialect.
    pub dialect: String,
}

impl ViewMetadata {
    /// The currently active version.
    pub fn current_version(&self) -> Result<&Version> {
        self.versions
            .iter()
            .find(|version| version.version_id == self.current_version_id)
            .ok_or(Error::InvalidMetadata {
                field: "current-version-id",
                message: format!("version {} not in versions", self.current_version_id),
            })
    }

    /// Create view metadata for a freshly defined view.
    pub fn create(
        location: impl Into<String>,
        schema: Schema,
        sql: impl Into<String>,
        dialect: impl Into<String>,
    ) -> ViewMetadata {
        let timestamp_ms = chrono::Utc::now().timestamp_millis();
        let version = Version {
            version_id: 1,
            schema_id: schema.schema_id,
            timestamp_ms,
            summary: HashMap::from([("operation".to_string(), "create".to_string())]),
            representations: vec![Representation {
                sql: sql.into(),
                dialect: dialect.into(),
            }],
            default_catalog: None,
            default_namespace: None,
        };
        ViewMetadata {
            view_uuid: Uuid::new_v4(),
            format_version: ViewFormatVersion::V1,
            location: location.into(),
            current_version_id: 1,
            versions: vec![version],
            version_log: vec![VersionLog {
                timestamp_ms,
                version_id: 1,
            }],
            schemas: vec![schema],
            properties: HashMap::new(),
        }
    }

    /// Replace the view definition with a new version.
    pub fn replace(
        mut self,
        schema: Schema,
        sql: impl Into<String>,
        dialect: impl Into<String>,
    ) -> ViewMetadata {
        let timestamp_ms = chrono::Utc::now().timestamp_millis();
        let version_id = self.current_version_id + 1;
        if !self
            .schemas
            .iter()
            .any(|existing| existing.schema_id == schema.schema_id)
        {
            self.schemas.push(schema.clone());
        }
        self.versions.push(Version {
            version_id,
            schema_id: schema.schema_id,
            timestamp_ms,
            summary: HashMap::from([("operation".to_string(), "replace".to_string())]),
            representations: vec![Representation {
                sql: sql.into(),
                dialect: dialect.into(),
            }],
            default_catalog: None,
            default_namespace: None,
        });
        self.version_log.push(VersionLog {
            timestamp_ms,
            version_id,
        });
        self.current_version_id = version_id;
        self
    }
}

#[cfg(test)]
mod tests {

    use anyhow::Result;

    use super::*;
    use crate::model::schema::{StructField, StructType};
    use crate::model::types::PrimitiveType;

    fn view_schema() -> Schema {
        Schema {
            schema_id: 1,
            identifier_field_ids: None,
            fields: StructType {
                fields: vec![
                    StructField::optional(1, "c1", PrimitiveType::Int),
                    StructField::optional(2, "c2", PrimitiveType::String),
                ],
            },
        }
    }

    #[test]
    fn test_deserialize_view_metadata_v1() -> Result<()> {
        let data = r#"
        {
            "view-uuid": "fa6506c3-7681-40c8-86dc-e36561f83385",
            "format-version" : 1,
            "location" : "s3://warehouse/default.db/event_agg",
            "current-version-id" : 1,
            "properties" : {
              "comment" : "Daily event counts"
            },
            "versions" : [ {
              "version-id" : 1,
              "timestamp-ms" : 1573518431292,
              "schema-id" : 1,
              "summary" : {
                "operation" : "create"
              },
              "representations" : [ {
                "type" : "sql",
                "sql" : "SELECT count(1) FROM events",
                "dialect" : "spark"
              } ],
              "default-namespace" : [ "default" ]
            } ],
            "version-log" : [ {
              "timestamp-ms" : 1573518431292,
              "version-id" : 1
            } ],
            "schemas": [ {
              "schema-id": 1,
              "type" : "struct",
              "fields" : [ {
                "id" : 1,
                "name" : "event_count",
                "required" : false,
                "type" : "int"
              } ]
            } ]
          }
        "#;
        let metadata = serde_json::from_str::<ViewMetadata>(data)?;
        //test serialise deserialise works.
        let metadata_two: ViewMetadata =
            serde_json::from_str(&serde_json::to_string(&metadata)?)?;
        assert_eq!(metadata, metadata_two);
        assert_eq!(metadata.current_version()?.version_id, 1);

        Ok(())
    }

    #[test]
    fn test_create_and_replace() {
        let metadata = ViewMetadata::create(
            "memory://w/db/v",
            view_schema(),
            "SELECT * FROM db.t",
            "spark",
        );
        assert_eq!(metadata.current_version_id, 1);

        let replaced = metadata.replace(view_schema(), "SELECT c1 FROM db.t", "spark");
        assert_eq!(replaced.current_version_id, 2);
        assert_eq!(replaced.versions.len(), 2);
        assert_eq!(replaced.version_log.len(), 2);
        // same schema id is not duplicated
        assert_eq!(replaced.schemas.len(), 1);
        assert_eq!(
            replaced.current_version().unwrap().summary.get("operation"),
            Some(&"replace".to_string())
        );
    }
}
