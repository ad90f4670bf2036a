/*!
Sort orders describe how the rows inside data files are arranged: an
ordered list of transformed source columns, each with a direction and a
null placement. Order id `0` is reserved for the unsorted order.

Like a partition spec, a [SortOrder] can be resolved against a schema
before it is recorded in table metadata, so dangling source columns and
inapplicable transforms are caught at build time instead of at read time.
*/
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::model::partition::Transform;
use crate::model::schema::{AllType, Schema};

#[derive(Debug, Serialize, Deserialize, PartialEq, Eq, Clone, Copy)]
/// Whether a field sorts ascending or descending.
pub enum SortDirection {
    /// Smallest values first.
    #[serde(rename = "asc")]
    Ascending,
    /// Largest values first.
    #[serde(rename = "desc")]
    Descending,
}

#[derive(Debug, Serialize, Deserialize, PartialEq, Eq, Clone, Copy)]
/// Where null values land within a sorted field.
pub enum NullOrder {
    /// Nulls sort before every non-null value.
    #[serde(rename = "nulls-first")]
    First,
    /// Nulls sort after every non-null value.
    #[serde(rename = "nulls-last")]
    Last,
}

#[derive(Debug, Serialize, Deserialize, PartialEq, Eq, Clone)]
#[serde(rename_all = "kebab-case")]
/// One entry of a sort order: a transform over a source column plus the
/// direction and null placement.
pub struct SortField {
    /// A source column id from the table's schema.
    pub source_id: i32,
    /// Transform producing the values that are compared.
    pub transform: Transform,
    /// Sort direction.
    pub direction: SortDirection,
    /// Null placement.
    pub null_order: NullOrder,
}

#[derive(Debug, Serialize, Deserialize, PartialEq, Eq, Clone)]
#[serde(rename_all = "kebab-case")]
/// An ordered list of [SortField]s identified by an order id. Earlier
/// fields dominate later ones.
pub struct SortOrder {
    /// Identifier for the order; `0` means unsorted.
    pub order_id: i32,
    /// The sort fields, most significant first.
    pub fields: Vec<SortField>,
}

impl SortOrder {
    /// The unsorted order, order id `0`.
    pub fn unsorted() -> Self {
        SortOrder {
            order_id: 0,
            fields: vec![],
        }
    }

    /// Whether this is the unsorted order.
    pub fn is_unsorted(&self) -> bool {
        self.fields.is_empty()
    }

    /// Start building a sort order.
    pub fn builder(order_id: i32) -> SortOrderBuilder {
        SortOrderBuilder {
            order_id,
            fields: vec![],
        }
    }

    /// Resolve every sort field against the schema: the source column must
    /// exist, be primitive, and accept the field's transform.
    pub fn validate_against(&self, schema: &Schema) -> Result<()> {
        for field in &self.fields {
            let source = schema
                .field_by_id(field.source_id)
                .ok_or(Error::InvalidMetadata {
                    field: "sort-orders",
                    message: format!("sort source field {} not in schema", field.source_id),
                })?;
            match &source.field_type {
                AllType::Primitive(primitive) => {
                    field.transform.result_type(primitive)?;
                }
                other => {
                    return Err(Error::InvalidMetadata {
                        field: "sort-orders",
                        message: format!("cannot sort by {} field {}", other, source.name),
                    })
                }
            }
        }
        Ok(())
    }
}

/// Collects sort fields in significance order.
pub struct SortOrderBuilder {
    order_id: i32,
    fields: Vec<SortField>,
}

impl SortOrderBuilder {
    /// Append an ascending, nulls-first field.
    pub fn asc(self, source_id: i32, transform: Transform) -> Self {
        self.with_field(source_id, transform, SortDirection::Ascending, NullOrder::First)
    }

    /// Append a descending, nulls-last field.
    pub fn desc(self, source_id: i32, transform: Transform) -> Self {
        self.with_field(source_id, transform, SortDirection::Descending, NullOrder::Last)
    }

    /// Append a fully specified field.
    pub fn with_field(
        mut self,
        source_id: i32,
        transform: Transform,
        direction: SortDirection,
        null_order: NullOrder,
    ) -> Self {
        self.fields.push(SortField {
            source_id,
            transform,
            direction,
            null_order,
        });
        self
    }

    /// Finish the order.
    pub fn build(self) -> SortOrder {
        SortOrder {
            order_id: self.order_id,
            fields: self.fields,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::schema::{StructField, StructType};
    use crate::model::types::PrimitiveType;

    fn schema() -> Schema {
        Schema {
            schema_id: 0,
            identifier_field_ids: None,
            fields: StructType {
                fields: vec![
                    StructField::required(1, "id", PrimitiveType::Long),
                    StructField::optional(2, "category", PrimitiveType::String),
                    StructField::optional(3, "score", PrimitiveType::Double),
                ],
            },
        }
    }

    #[test]
    fn test_builder_keeps_significance_order() {
        let order = SortOrder::builder(1)
            .desc(1, Transform::Identity)
            .with_field(
                2,
                Transform::Truncate(4),
                SortDirection::Ascending,
                NullOrder::Last,
            )
            .build();
        assert_eq!(order.order_id, 1);
        assert_eq!(order.fields.len(), 2);
        assert_eq!(order.fields[0].source_id, 1);
        assert_eq!(order.fields[0].direction, SortDirection::Descending);
        assert_eq!(order.fields[1].transform, Transform::Truncate(4));
        assert!(!order.is_unsorted());
        assert!(SortOrder::unsorted().is_unsorted());
    }

    #[test]
    fn test_validate_against_schema() {
        let order = SortOrder::builder(1)
            .asc(1, Transform::Bucket(8))
            .desc(3, Transform::Identity)
            .build();
        order.validate_against(&schema()).unwrap();

        // unknown source column
        let dangling = SortOrder::builder(1).asc(42, Transform::Identity).build();
        assert!(dangling.validate_against(&schema()).is_err());

        // bucket cannot hash a double
        let bad_transform = SortOrder::builder(1).asc(3, Transform::Bucket(8)).build();
        assert!(bad_transform.validate_against(&schema()).is_err());

        // the unsorted order passes against any schema
        SortOrder::unsorted().validate_against(&schema()).unwrap();
    }

    #[test]
    fn test_serde_wire_format() {
        let order = SortOrder::builder(2).desc(2, Transform::Truncate(8)).build();
        let json = serde_json::to_value(&order).unwrap();
        assert_eq!(json["order-id"], 2);
        assert_eq!(json["fields"][0]["source-id"], 2);
        assert_eq!(json["fields"][0]["transform"], "truncate[8]");
        assert_eq!(json["fields"][0]["direction"], "desc");
        assert_eq!(json["fields"][0]["null-order"], "nulls-last");

        let back: SortOrder = serde_json::from_value(json).unwrap();
        assert_eq!(back, order);
    }

    #[test]
    fn test_parses_external_order() {
        let data = r#"
            {
                "order-id": 3,
                "fields": [
                    {
                        "transform": "identity",
                        "source-id": 1,
                        "direction": "asc",
                        "null-order": "nulls-first"
                    },
                    {
                        "transform": "bucket[4]",
                        "source-id": 2,
                        "direction": "desc",
                        "null-order": "nulls-last"
                    }
                ]
            }
        "#;
        let order: SortOrder = serde_json::from_str(data).unwrap();
        assert_eq!(order.fields[1].transform, Transform::Bucket(4));
        assert_eq!(order.fields[0].null_order, NullOrder::First);
        order.validate_against(&schema()).unwrap();
    }
}
