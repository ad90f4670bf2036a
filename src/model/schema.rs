/*!
A table's [schema](https://iceberg.apache.org/spec/#schemas-and-data-types) is a list of named columns, represented by [Schema].
All data types are either [primitives](PrimitiveType) or nested types, which are [Map], [List], or [StructType]. A table [Schema] is also a [StructType].
*/

use serde::{Deserialize, Serialize};

use crate::model::types::PrimitiveType;

/// A union type of all allowed Schema types.
#[derive(Debug, Serialize, Deserialize, PartialEq, Clone)]
#[serde(untagged)]
pub enum AllType {
    /// All the primitive types
    Primitive(PrimitiveType),
    /// A Struct type
    Struct(StructType),
    /// A List type.
    List(List),
    /// A Map type
    Map(Map),
}

impl std::fmt::Display for AllType {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        match self {
            AllType::Primitive(primitive) => write!(f, "{}", primitive),
            AllType::Struct(_) => write!(f, "struct"),
            AllType::List(_) => write!(f, "list"),
            AllType::Map(_) => write!(f, "map"),
        }
    }
}

impl From<PrimitiveType> for AllType {
    fn from(value: PrimitiveType) -> Self {
        AllType::Primitive(value)
    }
}

/// A struct is a tuple of typed values. Each field in the tuple is
/// named and has an integer id that is unique in the table schema.
/// Each field can be either optional or required, meaning that values can (or cannot) be null.
/// Fields may be any type.
/// Fields may have an optional comment or doc string.
#[derive(Debug, Serialize, Deserialize, PartialEq, Clone)]
#[serde(tag = "type", rename = "struct")]
pub struct StructType {
    /// The fields of the struct.
    pub fields: Vec<StructField>,
}

impl StructType {
    /// Get the field carrying the given id.
    pub fn get(&self, id: i32) -> Option<&StructField> {
        self.fields.iter().find(|field| field.id == id)
    }
    /// Get the field with the given name.
    pub fn get_by_name(&self, name: &str) -> Option<&StructField> {
        self.fields.iter().find(|field| field.name == name)
    }
}

/// Details of a field in a struct.
#[derive(Debug, Serialize, Deserialize, PartialEq, Clone)]
#[serde(rename_all = "kebab-case")]
pub struct StructField {
    /// Unique Id
    pub id: i32,
    /// Field Name
    pub name: String,
    /// Optional or required, meaning that values can (or can not be null)
    pub required: bool,
    /// Field can have any type
    #[serde(rename = "type")]
    pub field_type: AllType,
    /// Fields can have any optional comment or doc string.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub doc: Option<String>,
    /// Default applied to rows written before the field existed.
    /// Immutable once set.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub initial_default: Option<serde_json::Value>,
    /// Default applied to rows written without a value for the field.
    /// May evolve over time.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub write_default: Option<serde_json::Value>,
}

impl StructField {
    /// A required field with no defaults.
    pub fn required(id: i32, name: &str, field_type: impl Into<AllType>) -> Self {
        StructField {
            id,
            name: name.to_string(),
            required: true,
            field_type: field_type.into(),
            doc: None,
            initial_default: None,
            write_default: None,
        }
    }
    /// An optional field with no defaults.
    pub fn optional(id: i32, name: &str, field_type: impl Into<AllType>) -> Self {
        StructField {
            id,
            name: name.to_string(),
            required: false,
            field_type: field_type.into(),
            doc: None,
            initial_default: None,
            write_default: None,
        }
    }
}

/// Names and types of fields in a table.
#[derive(Debug, Serialize, Deserialize, PartialEq, Clone)]
#[serde(rename_all = "kebab-case")]
pub struct Schema {
    /// Identifier of the schema
    pub schema_id: i32,
    /// Set of primitive fields that identify rows in a table.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub identifier_field_ids: Option<Vec<i32>>,

    #[serde(flatten)]
    /// The struct fields
    pub fields: StructType,
}

impl Schema {
    /// Get the top level field with the given id.
    pub fn field_by_id(&self, id: i32) -> Option<&StructField> {
        self.fields.get(id)
    }
    /// Get the top level field with the given name.
    pub fn field_by_name(&self, name: &str) -> Option<&StructField> {
        self.fields.get_by_name(name)
    }
    /// Whether a field id is part of the row identifier.
    pub fn is_identifier_field(&self, id: i32) -> bool {
        self.identifier_field_ids
            .as_ref()
            .map(|ids| ids.contains(&id))
            .unwrap_or(false)
    }
    /// The highest field id assigned anywhere in this schema, including
    /// nested list elements and map keys/values.
    pub fn highest_field_id(&self) -> i32 {
        self.fields
            .fields
            .iter()
            .map(highest_field_id_in_field)
            .max()
            .unwrap_or(0)
    }
}

fn highest_field_id_in_field(field: &StructField) -> i32 {
    field.id.max(highest_field_id_in_type(&field.field_type))
}

fn highest_field_id_in_type(field_type: &AllType) -> i32 {
    match field_type {
        AllType::Primitive(_) => 0,
        AllType::Struct(fields) => fields
            .fields
            .iter()
            .map(highest_field_id_in_field)
            .max()
            .unwrap_or(0),
        AllType::List(list) => list.element_id.max(highest_field_id_in_type(&list.element)),
        AllType::Map(map) => map
            .key_id
            .max(map.value_id)
            .max(highest_field_id_in_type(&map.key))
            .max(highest_field_id_in_type(&map.value)),
    }
}

/// A Schema type that contains List elements.
#[derive(Debug, Serialize, Deserialize, PartialEq, Clone)]
#[serde(rename_all = "kebab-case", tag = "type", rename = "list")]
pub struct List {
    /// Unique identifier for the element
    pub element_id: i32,

    /// If the element is mandatory.
    pub element_required: bool,

    /// The type of the element.
    pub element: Box<AllType>,
}

/// A Schema type that contains Map elements.
/// A map is a collection of key-value pairs with a key type and a value type.
/// Both the key field and value field each have an integer id that is unique
/// in the table schema. Map keys are required and map values can be either
/// optional or required. Both map keys and map values may be any type,
/// including nested types.
#[derive(Debug, Serialize, Deserialize, PartialEq, Clone)]
#[serde(rename_all = "kebab-case", tag = "type", rename = "map")]
pub struct Map {
    ///Unique key field id
    pub key_id: i32,
    ///Type of the map key
    pub key: Box<AllType>,
    ///Unique key for the value id
    pub value_id: i32,
    ///Indicates if the value is required.
    pub value_required: bool,
    ///Type of the value.
    pub value: Box<AllType>,
}
