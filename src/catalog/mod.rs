/*!
Defines the [Catalog] contract: namespaces, tables and views, loaded and
committed through one trait implemented by the filesystem catalog and the
authoritative single-writer catalog.
*/

pub mod authoritative;
pub mod cache;
pub mod commit;
pub mod filesystem;
pub mod identifier;
pub mod namespace;

use std::collections::HashMap;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::model::metadata::{FormatVersion, TableMetadata};
use crate::model::partition::PartitionSpec;
use crate::model::schema::Schema;
use crate::model::sort::SortOrder;
use crate::model::view_metadata::ViewMetadata;

use commit::{CommitTable, CommitTableResponse, CommitView};
use identifier::Identifier;
use namespace::Namespace;

/// Metadata of anything a catalog can serve under a name.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(untagged)]
#[allow(clippy::large_enum_variant)]
pub enum TabularMetadata {
    /// Table metadata
    Table(TableMetadata),
    /// View metadata
    View(ViewMetadata),
}

impl TabularMetadata {
    /// Base location of the tabular.
    pub fn location(&self) -> &str {
        match self {
            TabularMetadata::Table(table) => &table.location,
            TabularMetadata::View(view) => &view.location,
        }
    }
}

impl From<TableMetadata> for TabularMetadata {
    fn from(value: TableMetadata) -> Self {
        TabularMetadata::Table(value)
    }
}

impl From<ViewMetadata> for TabularMetadata {
    fn from(value: ViewMetadata) -> Self {
        TabularMetadata::View(value)
    }
}

/// Request to create a table.
#[derive(Debug, Clone)]
pub struct CreateTableRequest {
    /// Name of the new table.
    pub identifier: Identifier,
    /// Base location; derived from the warehouse layout when absent.
    pub location: Option<String>,
    /// Initial schema.
    pub schema: Schema,
    /// Initial partition spec; unpartitioned when absent.
    pub partition_spec: Option<PartitionSpec>,
    /// Initial sort order; unsorted when absent.
    pub sort_order: Option<SortOrder>,
    /// Initial table properties.
    pub properties: HashMap<String, String>,
    /// Table format version; defaults to 2.
    pub format_version: Option<FormatVersion>,
}

impl CreateTableRequest {
    /// A minimal request: identifier and schema.
    pub fn new(identifier: Identifier, schema: Schema) -> Self {
        CreateTableRequest {
            identifier,
            location: None,
            schema,
            partition_spec: None,
            sort_order: None,
            properties: HashMap::new(),
            format_version: None,
        }
    }
}

/// Request to create a view.
#[derive(Debug, Clone)]
pub struct CreateViewRequest {
    /// Name of the new view.
    pub identifier: Identifier,
    /// Base location; derived from the warehouse layout when absent.
    pub location: Option<String>,
    /// Schema of the view definition.
    pub schema: Schema,
    /// The SQL text.
    pub sql: String,
    /// The SQL dialect.
    pub dialect: String,
    /// Initial view properties.
    pub properties: HashMap<String, String>,
}

/// The report of a namespace properties update.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct PropertiesUpdateResult {
    /// Keys that were set or changed.
    pub updated: Vec<String>,
    /// Keys that were removed.
    pub removed: Vec<String>,
    /// Requested removals that were not present.
    pub missing: Vec<String>,
}

/// Trait to create, load, commit and drop namespaces, tables and views in
/// an iceberg catalog.
#[async_trait]
pub trait Catalog: Send + Sync {
    /// List namespaces, optionally only direct children of `parent`.
    async fn list_namespaces(&self, parent: Option<&Namespace>) -> Result<Vec<Namespace>>;

    /// Create a namespace with properties.
    async fn create_namespace(
        &self,
        namespace: &Namespace,
        properties: HashMap<String, String>,
    ) -> Result<()>;

    /// Whether the namespace exists.
    async fn namespace_exists(&self, namespace: &Namespace) -> Result<bool>;

    /// The namespace's properties.
    async fn namespace_properties(&self, namespace: &Namespace)
        -> Result<HashMap<String, String>>;

    /// Apply property updates and removals, reporting what changed.
    async fn update_namespace_properties(
        &self,
        namespace: &Namespace,
        updates: HashMap<String, String>,
        removals: Vec<String>,
    ) -> Result<PropertiesUpdateResult>;

    /// Drop an empty namespace. Refuses when tables or views remain.
    async fn drop_namespace(&self, namespace: &Namespace) -> Result<()>;

    /// List the tables of a namespace.
    async fn list_tables(&self, namespace: &Namespace) -> Result<Vec<Identifier>>;

    /// Create a table and return its metadata.
    async fn create_table(&self, request: CreateTableRequest) -> Result<TableMetadata>;

    /// Load a table's current metadata location and metadata.
    async fn load_table(&self, identifier: &Identifier) -> Result<CommitTableResponse>;

    /// Whether the table exists.
    async fn table_exists(&self, identifier: &Identifier) -> Result<bool>;

    /// Drop a table. With `purge`, its metadata files are deleted too.
    async fn drop_table(&self, identifier: &Identifier, purge: bool) -> Result<()>;

    /// Rename a table within the catalog.
    async fn rename_table(&self, from: &Identifier, to: &Identifier) -> Result<()>;

    /// Commit requirements and updates against a table.
    async fn commit_table(&self, commit: CommitTable) -> Result<CommitTableResponse>;

    /// List the views of a namespace.
    async fn list_views(&self, namespace: &Namespace) -> Result<Vec<Identifier>>;

    /// Create a view and return its metadata.
    async fn create_view(&self, request: CreateViewRequest) -> Result<ViewMetadata>;

    /// Load a view's current metadata location and metadata.
    async fn load_view(&self, identifier: &Identifier) -> Result<(String, ViewMetadata)>;

    /// Whether the view exists.
    async fn view_exists(&self, identifier: &Identifier) -> Result<bool>;

    /// Drop a view.
    async fn drop_view(&self, identifier: &Identifier) -> Result<()>;

    /// Rename a view within the catalog.
    async fn rename_view(&self, from: &Identifier, to: &Identifier) -> Result<()>;

    /// Commit updates against a view.
    async fn commit_view(&self, commit: CommitView) -> Result<(String, ViewMetadata)>;
}
