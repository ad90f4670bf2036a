/*!
The authoritative single-writer catalog.

One instance owns the durable row set of a logical catalog:
`(namespace, name) -> {location, metadata_location, metadata, version}`.
All mutations serialize through one lock, so no two mutations interleave
and per-row version increments behave like compare-and-swap without
explicit transactions. Row lookups go through LRU+TTL caches that are
invalidated on every mutation of the keyed row.
*/

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use async_trait::async_trait;
use tracing::debug;

use crate::commit::CommitEngine;
use crate::error::{Entity, Error, Result};
use crate::model::metadata::{TableMetadata, TableMetadataBuilder};
use crate::model::view_metadata::ViewMetadata;
use crate::storage::StorageBackend;

use super::cache::TtlCache;
use super::commit::{
    apply_table_updates, apply_view_updates, check_requirements, CommitTable,
    CommitTableResponse, CommitView,
};
use super::identifier::Identifier;
use super::namespace::Namespace;
use super::{
    Catalog, CreateTableRequest, CreateViewRequest, PropertiesUpdateResult, TabularMetadata,
};

/// One catalog row: the authoritative state of a table or view.
#[derive(Debug, Clone)]
struct TabularRow {
    location: String,
    metadata_location: String,
    metadata: TabularMetadata,
    /// Increments by one on each successful commit of this row.
    version: u64,
}

#[derive(Debug, Clone, Default)]
struct NamespaceRow {
    properties: HashMap<String, String>,
}

type TabularKey = (String, String);

struct State {
    namespaces: BTreeMap<String, NamespaceRow>,
    tabulars: BTreeMap<TabularKey, TabularRow>,
    namespace_cache: TtlCache<String, NamespaceRow>,
    tabular_cache: TtlCache<TabularKey, TabularRow>,
}

impl State {
    fn tabular(&mut self, key: &TabularKey) -> Option<TabularRow> {
        if let Some(row) = self.tabular_cache.get(key) {
            debug!(namespace = %key.0, name = %key.1, "tabular cache hit");
            return Some(row);
        }
        let row = self.tabulars.get(key).cloned()?;
        self.tabular_cache.put(key.clone(), row.clone());
        Some(row)
    }

    fn namespace(&mut self, key: &str) -> Option<NamespaceRow> {
        if let Some(row) = self.namespace_cache.get(&key.to_string()) {
            debug!(namespace = %key, "namespace cache hit");
            return Some(row);
        }
        let row = self.namespaces.get(key).cloned()?;
        self.namespace_cache.put(key.to_string(), row.clone());
        Some(row)
    }

    fn store_tabular(&mut self, key: TabularKey, row: TabularRow) {
        self.tabular_cache.invalidate(&key);
        self.tabulars.insert(key, row);
    }

    fn remove_tabular(&mut self, key: &TabularKey) -> Option<TabularRow> {
        self.tabular_cache.invalidate(key);
        self.tabulars.remove(key)
    }
}

/// The single-writer catalog over a storage backend for metadata files.
pub struct AuthoritativeCatalog {
    warehouse: String,
    storage: Arc<dyn StorageBackend>,
    state: tokio::sync::Mutex<State>,
}

impl AuthoritativeCatalog {
    /// A fresh catalog whose tabular locations live under the warehouse
    /// prefix.
    pub fn new(warehouse: impl Into<String>, storage: Arc<dyn StorageBackend>) -> Self {
        AuthoritativeCatalog {
            warehouse: warehouse.into(),
            storage,
            state: tokio::sync::Mutex::new(State {
                namespaces: BTreeMap::new(),
                tabulars: BTreeMap::new(),
                namespace_cache: TtlCache::new(),
                tabular_cache: TtlCache::new(),
            }),
        }
    }

    fn key(identifier: &Identifier) -> TabularKey {
        (
            identifier.namespace().to_string(),
            identifier.name().to_string(),
        )
    }

    fn default_location(&self, identifier: &Identifier) -> String {
        format!(
            "{}/{}/{}",
            self.warehouse,
            identifier.namespace().levels().join("/"),
            identifier.name()
        )
    }

    /// Error for a name already taken, naming the occupying type.
    fn occupied(identifier: &Identifier, row: &TabularRow) -> Error {
        match &row.metadata {
            TabularMetadata::Table(_) => {
                Error::AlreadyExists(Entity::Table(identifier.to_string()))
            }
            TabularMetadata::View(_) => Error::AlreadyExists(Entity::View(identifier.to_string())),
        }
    }

    async fn write_metadata_file(
        &self,
        location: &str,
        version: u64,
        metadata: &TabularMetadata,
    ) -> Result<String> {
        let metadata_location = CommitEngine::metadata_path(location, version);
        self.storage
            .put(&metadata_location, serde_json::to_vec(metadata)?)
            .await?;
        Ok(metadata_location)
    }
}

#[async_trait]
impl Catalog for AuthoritativeCatalog {
    async fn list_namespaces(&self, parent: Option<&Namespace>) -> Result<Vec<Namespace>> {
        let state = self.state.lock().await;
        state
            .namespaces
            .keys()
            .map(|name| Namespace::parse(name))
            .filter(|namespace| match (parent, namespace) {
                (Some(parent), Ok(namespace)) => namespace.is_child_of(parent),
                _ => true,
            })
            .collect()
    }

    async fn create_namespace(
        &self,
        namespace: &Namespace,
        properties: HashMap<String, String>,
    ) -> Result<()> {
        let mut state = self.state.lock().await;
        let key = namespace.to_string();
        if state.namespaces.contains_key(&key) {
            return Err(Error::AlreadyExists(Entity::Namespace(key)));
        }
        state.namespace_cache.invalidate(&key);
        state.namespaces.insert(key, NamespaceRow { properties });
        Ok(())
    }

    async fn namespace_exists(&self, namespace: &Namespace) -> Result<bool> {
        let mut state = self.state.lock().await;
        Ok(state.namespace(&namespace.to_string()).is_some())
    }

    async fn namespace_properties(
        &self,
        namespace: &Namespace,
    ) -> Result<HashMap<String, String>> {
        let mut state = self.state.lock().await;
        state
            .namespace(&namespace.to_string())
            .map(|row| row.properties)
            .ok_or_else(|| Error::NotFound(Entity::Namespace(namespace.to_string())))
    }

    async fn update_namespace_properties(
        &self,
        namespace: &Namespace,
        updates: HashMap<String, String>,
        removals: Vec<String>,
    ) -> Result<PropertiesUpdateResult> {
        let mut state = self.state.lock().await;
        let key = namespace.to_string();
        let row = state
            .namespaces
            .get_mut(&key)
            .ok_or_else(|| Error::NotFound(Entity::Namespace(key.clone())))?;
        let mut result = PropertiesUpdateResult::default();
        for removal in removals {
            if row.properties.remove(&removal).is_some() {
                result.removed.push(removal);
            } else {
                result.missing.push(removal);
            }
        }
        for (property, value) in updates {
            row.properties.insert(property.clone(), value);
            result.updated.push(property);
        }
        state.namespace_cache.invalidate(&key);
        Ok(result)
    }

    async fn drop_namespace(&self, namespace: &Namespace) -> Result<()> {
        let mut state = self.state.lock().await;
        let key = namespace.to_string();
        if !state.namespaces.contains_key(&key) {
            return Err(Error::NotFound(Entity::Namespace(key)));
        }
        if state.tabulars.keys().any(|(ns, _)| ns == &key) {
            return Err(Error::NamespaceNotEmpty(key));
        }
        let has_children = state.namespaces.keys().any(|other| {
            other != &key && other.starts_with(&format!("{}.", key))
        });
        if has_children {
            return Err(Error::NamespaceNotEmpty(key));
        }
        state.namespace_cache.invalidate(&key);
        state.namespaces.remove(&key);
        Ok(())
    }

    async fn list_tables(&self, namespace: &Namespace) -> Result<Vec<Identifier>> {
        let mut state = self.state.lock().await;
        let key = namespace.to_string();
        if state.namespace(&key).is_none() {
            return Err(Error::NotFound(Entity::Namespace(key)));
        }
        Ok(state
            .tabulars
            .iter()
            .filter(|((ns, _), row)| {
                ns == &key && matches!(row.metadata, TabularMetadata::Table(_))
            })
            .map(|((_, name), _)| Identifier::new(namespace.clone(), name))
            .collect())
    }

    async fn create_table(&self, request: CreateTableRequest) -> Result<TableMetadata> {
        let identifier = request.identifier.clone();
        let mut state = self.state.lock().await;
        if state.namespace(&identifier.namespace().to_string()).is_none() {
            return Err(Error::NotFound(Entity::Namespace(
                identifier.namespace().to_string(),
            )));
        }
        let key = Self::key(&identifier);
        if let Some(row) = state.tabular(&key) {
            return Err(Self::occupied(&identifier, &row));
        }

        let location = request
            .location
            .unwrap_or_else(|| self.default_location(&identifier));
        let mut builder = TableMetadataBuilder::new(location.clone())
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
        let tabular = TabularMetadata::Table(metadata.clone());
        let metadata_location = self.write_metadata_file(&location, 1, &tabular).await?;
        state.store_tabular(
            key,
            TabularRow {
                location,
                metadata_location,
                metadata: tabular,
                version: 1,
            },
        );
        Ok(metadata)
    }

    async fn load_table(&self, identifier: &Identifier) -> Result<CommitTableResponse> {
        let mut state = self.state.lock().await;
        match state.tabular(&Self::key(identifier)) {
            Some(TabularRow {
                metadata_location,
                metadata: TabularMetadata::Table(metadata),
                ..
            }) => Ok(CommitTableResponse {
                metadata_location,
                metadata,
            }),
            _ => Err(Error::NotFound(Entity::Table(identifier.to_string()))),
        }
    }

    async fn table_exists(&self, identifier: &Identifier) -> Result<bool> {
        let mut state = self.state.lock().await;
        Ok(matches!(
            state.tabular(&Self::key(identifier)),
            Some(TabularRow {
                metadata: TabularMetadata::Table(_),
                ..
            })
        ))
    }

    async fn drop_table(&self, identifier: &Identifier, purge: bool) -> Result<()> {
        let mut state = self.state.lock().await;
        let key = Self::key(identifier);
        match state.tabular(&key) {
            Some(TabularRow {
                metadata: TabularMetadata::Table(_),
                location,
                ..
            }) => {
                state.remove_tabular(&key);
                drop(state);
                if purge {
                    for file in self.storage.list(&format!("{}/", location)).await? {
                        self.storage.delete(&file).await?;
                    }
                }
                Ok(())
            }
            _ => Err(Error::NotFound(Entity::Table(identifier.to_string()))),
        }
    }

    async fn rename_table(&self, from: &Identifier, to: &Identifier) -> Result<()> {
        let mut state = self.state.lock().await;
        let from_key = Self::key(from);
        let to_key = Self::key(to);
        match state.tabular(&from_key) {
            Some(TabularRow {
                metadata: TabularMetadata::Table(_),
                ..
            }) => {}
            _ => return Err(Error::NotFound(Entity::Table(from.to_string()))),
        }
        if state.namespace(&to.namespace().to_string()).is_none() {
            return Err(Error::NotFound(Entity::Namespace(
                to.namespace().to_string(),
            )));
        }
        if let Some(occupying) = state.tabular(&to_key) {
            return Err(Self::occupied(to, &occupying));
        }
        let row = match state.remove_tabular(&from_key) {
            Some(row) => row,
            None => return Err(Error::NotFound(Entity::Table(from.to_string()))),
        };
        state.store_tabular(to_key, row);
        debug!(from = %from, to = %to, "renamed table");
        Ok(())
    }

    async fn commit_table(&self, commit: CommitTable) -> Result<CommitTableResponse> {
        let identifier = commit.identifier.clone();
        let mut state = self.state.lock().await;
        let key = Self::key(&identifier);
        let row = match state.tabular(&key) {
            Some(
                row @ TabularRow {
                    metadata: TabularMetadata::Table(_),
                    ..
                },
            ) => row,
            _ => return Err(Error::NotFound(Entity::Table(identifier.to_string()))),
        };
        let current = match &row.metadata {
            TabularMetadata::Table(metadata) => metadata.clone(),
            TabularMetadata::View(_) => unreachable!("matched above"),
        };
        check_requirements(&commit.requirements, Some(&current))?;
        let updated = apply_table_updates(current, &commit.updates)?;
        updated.validate()?;

        let next_version = row.version + 1;
        let tabular = TabularMetadata::Table(updated.clone());
        let metadata_location = self
            .write_metadata_file(&row.location, next_version, &tabular)
            .await?;
        state.store_tabular(
            key,
            TabularRow {
                location: row.location,
                metadata_location: metadata_location.clone(),
                metadata: tabular,
                version: next_version,
            },
        );
        Ok(CommitTableResponse {
            metadata_location,
            metadata: updated,
        })
    }

    async fn list_views(&self, namespace: &Namespace) -> Result<Vec<Identifier>> {
        let mut state = self.state.lock().await;
        let key = namespace.to_string();
        if state.namespace(&key).is_none() {
            return Err(Error::NotFound(Entity::Namespace(key)));
        }
        Ok(state
            .tabulars
            .iter()
            .filter(|((ns, _), row)| ns == &key && matches!(row.metadata, TabularMetadata::View(_)))
            .map(|((_, name), _)| Identifier::new(namespace.clone(), name))
            .collect())
    }

    async fn create_view(&self, request: CreateViewRequest) -> Result<ViewMetadata> {
        let identifier = request.identifier.clone();
        let mut state = self.state.lock().await;
        if state.namespace(&identifier.namespace().to_string()).is_none() {
            return Err(Error::NotFound(Entity::Namespace(
                identifier.namespace().to_string(),
            )));
        }
        let key = Self::key(&identifier);
        if let Some(row) = state.tabular(&key) {
            return Err(Self::occupied(&identifier, &row));
        }

        let location = request
            .location
            .unwrap_or_else(|| self.default_location(&identifier));
        let mut metadata = ViewMetadata::create(
            location.as_str(),
            request.schema,
            request.sql,
            request.dialect,
        );
        metadata.properties = request.properties;
        let tabular = TabularMetadata::View(metadata.clone());
        let metadata_location = self.write_metadata_file(&location, 1, &tabular).await?;
        state.store_tabular(
            key,
            TabularRow {
                location,
                metadata_location,
                metadata: tabular,
                version: 1,
            },
        );
        Ok(metadata)
    }

    async fn load_view(&self, identifier: &Identifier) -> Result<(String, ViewMetadata)> {
        let mut state = self.state.lock().await;
        match state.tabular(&Self::key(identifier)) {
            Some(TabularRow {
                metadata_location,
                metadata: TabularMetadata::View(metadata),
                ..
            }) => Ok((metadata_location, metadata)),
            _ => Err(Error::NotFound(Entity::View(identifier.to_string()))),
        }
    }

    async fn view_exists(&self, identifier: &Identifier) -> Result<bool> {
        let mut state = self.state.lock().await;
        Ok(matches!(
            state.tabular(&Self::key(identifier)),
            Some(TabularRow {
                metadata: TabularMetadata::View(_),
                ..
            })
        ))
    }

    async fn drop_view(&self, identifier: &Identifier) -> Result<()> {
        let mut state = self.state.lock().await;
        let key = Self::key(identifier);
        match state.tabular(&key) {
            Some(TabularRow {
                metadata: TabularMetadata::View(_),
                ..
            }) => {
                state.remove_tabular(&key);
                Ok(())
            }
            _ => Err(Error::NotFound(Entity::View(identifier.to_string()))),
        }
    }

    async fn rename_view(&self, from: &Identifier, to: &Identifier) -> Result<()> {
        let mut state = self.state.lock().await;
        let from_key = Self::key(from);
        let to_key = Self::key(to);
        match state.tabular(&from_key) {
            Some(TabularRow {
                metadata: TabularMetadata::View(_),
                ..
            }) => {}
            _ => return Err(Error::NotFound(Entity::View(from.to_string()))),
        }
        if state.namespace(&to.namespace().to_string()).is_none() {
            return Err(Error::NotFound(Entity::Namespace(
                to.namespace().to_string(),
            )));
        }
        if let Some(occupying) = state.tabular(&to_key) {
            return Err(Self::occupied(to, &occupying));
        }
        let row = match state.remove_tabular(&from_key) {
            Some(row) => row,
            None => return Err(Error::NotFound(Entity::View(from.to_string()))),
        };
        state.store_tabular(to_key, row);
        Ok(())
    }

    async fn commit_view(&self, commit: CommitView) -> Result<(String, ViewMetadata)> {
        let identifier = commit.identifier.clone();
        let mut state = self.state.lock().await;
        let key = Self::key(&identifier);
        let row = match state.tabular(&key) {
            Some(
                row @ TabularRow {
                    metadata: TabularMetadata::View(_),
                    ..
                },
            ) => row,
            _ => return Err(Error::NotFound(Entity::View(identifier.to_string()))),
        };
        let current = match &row.metadata {
            TabularMetadata::View(metadata) => metadata.clone(),
            TabularMetadata::Table(_) => unreachable!("matched above"),
        };
        let updated = apply_view_updates(current, &commit.updates)?;
        let next_version = row.version + 1;
        let tabular = TabularMetadata::View(updated.clone());
        let metadata_location = self
            .write_metadata_file(&row.location, next_version, &tabular)
            .await?;
        state.store_tabular(
            key,
            TabularRow {
                location: row.location,
                metadata_location: metadata_location.clone(),
                metadata: tabular,
                version: next_version,
            },
        );
        Ok((metadata_location, updated))
    }
}
