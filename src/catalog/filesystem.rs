/*!
A catalog stored entirely in a warehouse prefix of a [StorageBackend].

Namespaces are marker objects holding their properties, tables and views
are directories whose current state is the `version-hint.text` pointer
managed by the [CommitEngine]. Everything a reader needs is reachable from
the warehouse prefix alone.
*/

use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;

use async_trait::async_trait;
use tracing::debug;

use crate::commit::CommitEngine;
use crate::error::{Entity, Error, Result};
use crate::model::metadata::{TableMetadataBuilder, METADATA_DIR, VERSION_HINT_FILENAME};
use crate::model::view_metadata::ViewMetadata;
use crate::storage::StorageBackend;

use super::commit::{
    apply_table_updates, apply_view_updates, check_requirements, CommitTable,
    CommitTableResponse, CommitView,
};
use super::identifier::Identifier;
use super::namespace::Namespace;
use super::{
    Catalog, CreateTableRequest, CreateViewRequest, PropertiesUpdateResult, TabularMetadata,
};
use crate::model::metadata::TableMetadata;

/// Name of the marker object holding a namespace's properties.
const NAMESPACE_MARKER: &str = "namespace.json";

/// Catalog over a warehouse prefix of a storage backend.
pub struct FilesystemCatalog {
    warehouse: String,
    storage: Arc<dyn StorageBackend>,
    engine: CommitEngine,
}

impl FilesystemCatalog {
    /// Catalog rooted at the warehouse prefix.
    pub fn new(warehouse: impl Into<String>, storage: Arc<dyn StorageBackend>) -> Self {
        let warehouse = warehouse.into();
        FilesystemCatalog {
            engine: CommitEngine::new(storage.clone()),
            warehouse,
            storage,
        }
    }

    /// The commit engine used for table commits.
    pub fn engine(&self) -> &CommitEngine {
        &self.engine
    }

    fn namespace_path(&self, namespace: &Namespace) -> String {
        format!("{}/{}", self.warehouse, namespace.levels().join("/"))
    }

    fn namespace_marker(&self, namespace: &Namespace) -> String {
        format!("{}/{}", self.namespace_path(namespace), NAMESPACE_MARKER)
    }

    /// The default location of a table or view.
    pub fn tabular_location(&self, identifier: &Identifier) -> String {
        format!(
            "{}/{}",
            self.namespace_path(identifier.namespace()),
            identifier.name()
        )
    }

    fn namespace_from_marker(&self, key: &str) -> Option<Namespace> {
        let relative = key
            .strip_prefix(&format!("{}/", self.warehouse))?
            .strip_suffix(&format!("/{}", NAMESPACE_MARKER))?;
        let levels: Vec<String> = relative.split('/').map(|s| s.to_string()).collect();
        Namespace::try_new(&levels).ok()
    }

    async fn read_namespace_properties(
        &self,
        namespace: &Namespace,
    ) -> Result<HashMap<String, String>> {
        let bytes = self
            .storage
            .get(&self.namespace_marker(namespace))
            .await?
            .ok_or_else(|| Error::NotFound(Entity::Namespace(namespace.to_string())))?;
        Ok(serde_json::from_slice(&bytes)?)
    }

    /// Load the current tabular metadata at a location, if any.
    async fn load_tabular(&self, location: &str) -> Result<Option<(u64, String, TabularMetadata)>> {
        let version = match self.engine.current_version(location).await? {
            None => return Ok(None),
            Some(version) => version,
        };
        let metadata_location = CommitEngine::metadata_path(location, version);
        let bytes = self
            .storage
            .get(&metadata_location)
            .await?
            .ok_or_else(|| Error::NotFound(Entity::Other(metadata_location.clone())))?;
        let metadata: TabularMetadata = serde_json::from_slice(&bytes)?;
        Ok(Some((version, metadata_location, metadata)))
    }

    /// Tabular names directly inside a namespace, derived from version
    /// hint pointers.
    async fn tabular_names(&self, namespace: &Namespace) -> Result<Vec<String>> {
        let prefix = format!("{}/", self.namespace_path(namespace));
        let hint_suffix = format!("/{}/{}", METADATA_DIR, VERSION_HINT_FILENAME);
        let keys = self.storage.list(&prefix).await?;
        let names: BTreeSet<String> = keys
            .iter()
            .filter_map(|key| {
                let relative = key.strip_prefix(&prefix)?;
                let name = relative.strip_suffix(&hint_suffix)?;
                // nested namespaces hold their own tabulars
                if name.contains('/') {
                    None
                } else {
                    Some(name.to_string())
                }
            })
            .collect();
        Ok(names.into_iter().collect())
    }

    /// Refuse creating a tabular over an existing table or view, naming
    /// the occupying type.
    async fn check_name_free(&self, identifier: &Identifier) -> Result<()> {
        let location = self.tabular_location(identifier);
        match self.load_tabular(&location).await? {
            None => Ok(()),
            Some((_, _, TabularMetadata::Table(_))) => {
                Err(Error::AlreadyExists(Entity::Table(identifier.to_string())))
            }
            Some((_, _, TabularMetadata::View(_))) => {
                Err(Error::AlreadyExists(Entity::View(identifier.to_string())))
            }
        }
    }

    async fn rename_tabular(&self, from: &Identifier, to: &Identifier) -> Result<()> {
        let from_location = self.tabular_location(from);
        let to_location = self.tabular_location(to);
        if !self.namespace_exists(to.namespace()).await? {
            return Err(Error::NotFound(Entity::Namespace(
                to.namespace().to_string(),
            )));
        }
        self.check_name_free(to).await?;

        let keys = self.storage.list(&format!("{}/", from_location)).await?;
        for key in &keys {
            let bytes = self
                .storage
                .get(key)
                .await?
                .ok_or_else(|| Error::NotFound(Entity::Other(key.clone())))?;
            let target = format!(
                "{}{}",
                to_location,
                key.strip_prefix(&from_location).unwrap_or(key)
            );
            self.storage.put(&target, bytes).await?;
        }
        // rewrite the current metadata with the new base location
        if let Some((version, _, metadata)) = self.load_tabular(&to_location).await? {
            let metadata = match metadata {
                TabularMetadata::Table(mut table) => {
                    table.location = to_location.clone();
                    TabularMetadata::Table(table)
                }
                TabularMetadata::View(mut view) => {
                    view.location = to_location.clone();
                    TabularMetadata::View(view)
                }
            };
            self.storage
                .put(
                    &CommitEngine::metadata_path(&to_location, version),
                    serde_json::to_vec(&metadata)?,
                )
                .await?;
        }
        for key in &keys {
            self.storage.delete(key).await?;
        }
        debug!(from = %from, to = %to, "renamed tabular");
        Ok(())
    }
}

#[async_trait]
impl Catalog for FilesystemCatalog {
    async fn list_namespaces(&self, parent: Option<&Namespace>) -> Result<Vec<Namespace>> {
        let prefix = match parent {
            None => format!("{}/", self.warehouse),
            Some(parent) => format!("{}/", self.namespace_path(parent)),
        };
        let keys = self.storage.list(&prefix).await?;
        let mut namespaces: Vec<Namespace> = keys
            .iter()
            .filter(|key| key.ends_with(NAMESPACE_MARKER))
            .filter_map(|key| self.namespace_from_marker(key))
            .filter(|namespace| match parent {
                None => true,
                Some(parent) => namespace.is_child_of(parent),
            })
            .collect();
        namespaces.sort();
        Ok(namespaces)
    }

    async fn create_namespace(
        &self,
        namespace: &Namespace,
        properties: HashMap<String, String>,
    ) -> Result<()> {
        let marker = self.namespace_marker(namespace);
        let bytes = serde_json::to_vec(&properties)?;
        if !self.storage.put_if_absent(&marker, bytes).await? {
            return Err(Error::AlreadyExists(Entity::Namespace(
                namespace.to_string(),
            )));
        }
        Ok(())
    }

    async fn namespace_exists(&self, namespace: &Namespace) -> Result<bool> {
        self.storage.exists(&self.namespace_marker(namespace)).await
    }

    async fn namespace_properties(
        &self,
        namespace: &Namespace,
    ) -> Result<HashMap<String, String>> {
        self.read_namespace_properties(namespace).await
    }

    async fn update_namespace_properties(
        &self,
        namespace: &Namespace,
        updates: HashMap<String, String>,
        removals: Vec<String>,
    ) -> Result<PropertiesUpdateResult> {
        let mut properties = self.read_namespace_properties(namespace).await?;
        let mut result = PropertiesUpdateResult::default();
        for key in removals {
            if properties.remove(&key).is_some() {
                result.removed.push(key);
            } else {
                result.missing.push(key);
            }
        }
        for (key, value) in updates {
            properties.insert(key.clone(), value);
            result.updated.push(key);
        }
        self.storage
            .put(
                &self.namespace_marker(namespace),
                serde_json::to_vec(&properties)?,
            )
            .await?;
        Ok(result)
    }

    async fn drop_namespace(&self, namespace: &Namespace) -> Result<()> {
        let marker = self.namespace_marker(namespace);
        if !self.storage.exists(&marker).await? {
            return Err(Error::NotFound(Entity::Namespace(namespace.to_string())));
        }
        let prefix = format!("{}/", self.namespace_path(namespace));
        let hint_suffix = format!("/{}/{}", METADATA_DIR, VERSION_HINT_FILENAME);
        let keys = self.storage.list(&prefix).await?;
        let has_child_namespace = keys
            .iter()
            .any(|key| key != &marker && key.ends_with(&format!("/{}", NAMESPACE_MARKER)));
        let has_tabular = keys.iter().any(|key| key.ends_with(&hint_suffix));
        if has_child_namespace || has_tabular {
            return Err(Error::NamespaceNotEmpty(namespace.to_string()));
        }
        self.storage.delete(&marker).await
    }

    async fn list_tables(&self, namespace: &Namespace) -> Result<Vec<Identifier>> {
        if !self.namespace_exists(namespace).await? {
            return Err(Error::NotFound(Entity::Namespace(namespace.to_string())));
        }
        let mut tables = vec![];
        for name in self.tabular_names(namespace).await? {
            let identifier = Identifier::new(namespace.clone(), &name);
            let location = self.tabular_location(&identifier);
            if let Some((_, _, TabularMetadata::Table(_))) = self.load_tabular(&location).await? {
                tables.push(identifier);
            }
        }
        Ok(tables)
    }

    async fn create_table(&self, request: CreateTableRequest) -> Result<TableMetadata> {
        let identifier = request.identifier.clone();
        if !self.namespace_exists(identifier.namespace()).await? {
            return Err(Error::NotFound(Entity::Namespace(
                identifier.namespace().to_string(),
            )));
        }
        self.check_name_free(&identifier).await?;

        let location = request
            .location
            .unwrap_or_else(|| self.tabular_location(&identifier));
        let mut builder = TableMetadataBuilder::new(location)
            .with_schema(request.schema)
            .with_properties(request.properties);
        if let Some(partition_spec) = request.partition_spec {
            builder = builder.with_partition_spec(partition_spec);
        }
        if let Some(sort_order) = request.sort_order {
            builder = builder.with_sort_order(sort_order);
        }
        if let Some(format_version) = request.format_version {
            builder = builder.with_format_version(format_version);
        }
        let metadata = builder.build()?;
        let outcome = self.engine.create(&metadata).await.map_err(|err| {
            if err.is_already_exists() {
                Error::AlreadyExists(Entity::Table(identifier.to_string()))
            } else {
                err
            }
        })?;
        Ok(outcome.metadata)
    }

    async fn load_table(&self, identifier: &Identifier) -> Result<CommitTableResponse> {
        let location = self.tabular_location(identifier);
        match self.load_tabular(&location).await? {
            Some((_, metadata_location, TabularMetadata::Table(metadata))) => {
                Ok(CommitTableResponse {
                    metadata_location,
                    metadata,
                })
            }
            _ => Err(Error::NotFound(Entity::Table(identifier.to_string()))),
        }
    }

    async fn table_exists(&self, identifier: &Identifier) -> Result<bool> {
        let location = self.tabular_location(identifier);
        Ok(matches!(
            self.load_tabular(&location).await?,
            Some((_, _, TabularMetadata::Table(_)))
        ))
    }

    async fn drop_table(&self, identifier: &Identifier, purge: bool) -> Result<()> {
        if !self.table_exists(identifier).await? {
            return Err(Error::NotFound(Entity::Table(identifier.to_string())));
        }
        let location = self.tabular_location(identifier);
        if purge {
            for key in self.storage.list(&format!("{}/", location)).await? {
                self.storage.delete(&key).await?;
            }
        } else {
            self.storage
                .delete(&CommitEngine::version_hint_path(&location))
                .await?;
        }
        Ok(())
    }

    async fn rename_table(&self, from: &Identifier, to: &Identifier) -> Result<()> {
        if !self.table_exists(from).await? {
            return Err(Error::NotFound(Entity::Table(from.to_string())));
        }
        self.rename_tabular(from, to).await
    }

    async fn commit_table(&self, commit: CommitTable) -> Result<CommitTableResponse> {
        let identifier = commit.identifier.clone();
        let location = self.tabular_location(&identifier);
        if !self.table_exists(&identifier).await? {
            return Err(Error::NotFound(Entity::Table(identifier.to_string())));
        }
        let requirements = commit.requirements;
        let updates = commit.updates;
        let outcome = self
            .engine
            .commit(&location, move |current| {
                check_requirements(&requirements, Some(current))?;
                apply_table_updates(current.clone(), &updates)
            })
            .await?;
        Ok(CommitTableResponse {
            metadata_location: outcome.metadata_location,
            metadata: outcome.metadata,
        })
    }

    async fn list_views(&self, namespace: &Namespace) -> Result<Vec<Identifier>> {
        if !self.namespace_exists(namespace).await? {
            return Err(Error::NotFound(Entity::Namespace(namespace.to_string())));
        }
        let mut views = vec![];
        for name in self.tabular_names(namespace).await? {
            let identifier = Identifier::new(namespace.clone(), &name);
            let location = self.tabular_location(&identifier);
            if let Some((_, _, TabularMetadata::View(_))) = self.load_tabular(&location).await? {
                views.push(identifier);
            }
        }
        Ok(views)
    }

    async fn create_view(&self, request: CreateViewRequest) -> Result<ViewMetadata> {
        let identifier = request.identifier.clone();
        if !self.namespace_exists(identifier.namespace()).await? {
            return Err(Error::NotFound(Entity::Namespace(
                identifier.namespace().to_string(),
            )));
        }
        self.check_name_free(&identifier).await?;

        let location = request
            .location
            .unwrap_or_else(|| self.tabular_location(&identifier));
        let mut metadata =
            ViewMetadata::create(location.as_str(), request.schema, request.sql, request.dialect);
        metadata.properties = request.properties;

        let metadata_location = CommitEngine::metadata_path(&location, 1);
        if !self
            .storage
            .put_if_absent(&metadata_location, serde_json::to_vec(&metadata)?)
            .await?
        {
            return Err(Error::AlreadyExists(Entity::View(identifier.to_string())));
        }
        self.storage
            .put(&CommitEngine::version_hint_path(&location), b"1".to_vec())
            .await?;
        Ok(metadata)
    }

    async fn load_view(&self, identifier: &Identifier) -> Result<(String, ViewMetadata)> {
        let location = self.tabular_location(identifier);
        match self.load_tabular(&location).await? {
            Some((_, metadata_location, TabularMetadata::View(metadata))) => {
                Ok((metadata_location, metadata))
            }
            _ => Err(Error::NotFound(Entity::View(identifier.to_string()))),
        }
    }

    async fn view_exists(&self, identifier: &Identifier) -> Result<bool> {
        let location = self.tabular_location(identifier);
        Ok(matches!(
            self.load_tabular(&location).await?,
            Some((_, _, TabularMetadata::View(_)))
        ))
    }

    async fn drop_view(&self, identifier: &Identifier) -> Result<()> {
        if !self.view_exists(identifier).await? {
            return Err(Error::NotFound(Entity::View(identifier.to_string())));
        }
        let location = self.tabular_location(identifier);
        self.storage
            .delete(&CommitEngine::version_hint_path(&location))
            .await
    }

    async fn rename_view(&self, from: &Identifier, to: &Identifier) -> Result<()> {
        if !self.view_exists(from).await? {
            return Err(Error::NotFound(Entity::View(from.to_string())));
        }
        self.rename_tabular(from, to).await
    }

    async fn commit_view(&self, commit: CommitView) -> Result<(String, ViewMetadata)> {
        let identifier = commit.identifier.clone();
        let location = self.tabular_location(&identifier);
        let (version, _, metadata) = match self.load_tabular(&location).await? {
            Some((version, metadata_location, TabularMetadata::View(metadata))) => {
                (version, metadata_location, metadata)
            }
            _ => return Err(Error::NotFound(Entity::View(identifier.to_string()))),
        };
        let updated = apply_view_updates(metadata, &commit.updates)?;
        let next_version = version + 1;
        let metadata_location = CommitEngine::metadata_path(&location, next_version);
        if !self
            .storage
            .put_if_absent(&metadata_location, serde_json::to_vec(&updated)?)
            .await?
        {
            return Err(Error::CommitConflict(format!(
                "view metadata version {} already exists",
                next_version
            )));
        }
        self.storage
            .put(
                &CommitEngine::version_hint_path(&location),
                next_version.to_string().into_bytes(),
            )
            .await?;
        Ok((metadata_location, updated))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::schema::{Schema, StructField, StructType};
    use crate::model::types::PrimitiveType;
    use crate::storage::InMemoryStorage;

    fn catalog() -> FilesystemCatalog {
        FilesystemCatalog::new("warehouse", Arc::new(InMemoryStorage::new()))
    }

    fn simple_schema() -> Schema {
        Schema {
            schema_id: 0,
            identifier_field_ids: None,
            fields: StructType {
                fields: vec![StructField::required(1, "id", PrimitiveType::Long)],
            },
        }
    }

    #[tokio::test]
    async fn test_namespace_lifecycle() {
        let catalog = catalog();
        let namespace = Namespace::parse("db").unwrap();
        catalog
            .create_namespace(
                &namespace,
                HashMap::from([("owner".to_string(), "root".to_string())]),
            )
            .await
            .unwrap();
        assert!(catalog.namespace_exists(&namespace).await.unwrap());
        assert!(catalog
            .create_namespace(&namespace, HashMap::new())
            .await
            .unwrap_err()
            .is_already_exists());

        let result = catalog
            .update_namespace_properties(
                &namespace,
                HashMap::from([("comment".to_string(), "test".to_string())]),
                vec!["owner".to_string(), "absent".to_string()],
            )
            .await
            .unwrap();
        assert_eq!(result.updated, vec!["comment".to_string()]);
        assert_eq!(result.removed, vec!["owner".to_string()]);
        assert_eq!(result.missing, vec!["absent".to_string()]);

        catalog.drop_namespace(&namespace).await.unwrap();
        assert!(!catalog.namespace_exists(&namespace).await.unwrap());
    }

    #[tokio::test]
    async fn test_drop_namespace_with_view_refused() {
        let catalog = catalog();
        let namespace = Namespace::parse("db").unwrap();
        catalog
            .create_namespace(&namespace, HashMap::new())
            .await
            .unwrap();
        let view = Identifier::parse("db.v").unwrap();
        catalog
            .create_view(CreateViewRequest {
                identifier: view.clone(),
                location: None,
                schema: simple_schema(),
                sql: "SELECT 1".to_string(),
                dialect: "spark".to_string(),
                properties: HashMap::new(),
            })
            .await
            .unwrap();

        let err = catalog.drop_namespace(&namespace).await.unwrap_err();
        assert!(matches!(err, Error::NamespaceNotEmpty(_)));

        catalog.drop_view(&view).await.unwrap();
        catalog.drop_namespace(&namespace).await.unwrap();
        assert!(!catalog.namespace_exists(&namespace).await.unwrap());
    }

    #[tokio::test]
    async fn test_table_create_load_list() {
        let catalog = catalog();
        let namespace = Namespace::parse("db").unwrap();
        catalog
            .create_namespace(&namespace, HashMap::new())
            .await
            .unwrap();
        let identifier = Identifier::parse("db.t").unwrap();
        let metadata = catalog
            .create_table(CreateTableRequest::new(identifier.clone(), simple_schema()))
            .await
            .unwrap();
        assert_eq!(metadata.location, "warehouse/db/t");

        let loaded = catalog.load_table(&identifier).await.unwrap();
        assert_eq!(loaded.metadata, metadata);
        assert!(loaded
            .metadata_location
            .ends_with("metadata/v1.metadata.json"));

        assert_eq!(
            catalog.list_tables(&namespace).await.unwrap(),
            vec![identifier.clone()]
        );
        assert!(catalog.list_views(&namespace).await.unwrap().is_empty());
        assert!(catalog.table_exists(&identifier).await.unwrap());
        assert!(!catalog.view_exists(&identifier).await.unwrap());
    }

    #[tokio::test]
    async fn test_create_table_over_view_disambiguates() {
        let catalog = catalog();
        let namespace = Namespace::parse("db").unwrap();
        catalog
            .create_namespace(&namespace, HashMap::new())
            .await
            .unwrap();
        catalog
            .create_view(CreateViewRequest {
                identifier: Identifier::parse("db.x").unwrap(),
                location: None,
                schema: simple_schema(),
                sql: "SELECT 1".to_string(),
                dialect: "spark".to_string(),
                properties: HashMap::new(),
            })
            .await
            .unwrap();
        let err = catalog
            .create_table(CreateTableRequest::new(
                Identifier::parse("db.x").unwrap(),
                simple_schema(),
            ))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::AlreadyExists(Entity::View(_))));
    }

    #[tokio::test]
    async fn test_rename_table() {
        let catalog = catalog();
        let namespace = Namespace::parse("db").unwrap();
        catalog
            .create_namespace(&namespace, HashMap::new())
            .await
            .unwrap();
        let from = Identifier::parse("db.t").unwrap();
        let to = Identifier::parse("db.t2").unwrap();
        catalog
            .create_table(CreateTableRequest::new(from.clone(), simple_schema()))
            .await
            .unwrap();

        catalog.rename_table(&from, &to).await.unwrap();
        assert!(!catalog.table_exists(&from).await.unwrap());
        let loaded = catalog.load_table(&to).await.unwrap();
        assert_eq!(loaded.metadata.location, "warehouse/db/t2");
    }
}
