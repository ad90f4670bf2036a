/*!
The [StorageBackend] capability the core consumes for all file I/O.

Two implementations live in-repo: [InMemoryStorage] backs tests and
`memory://` locations, [ObjectStoreStorage] adapts any
[object_store::ObjectStore]. Atomic create-if-absent on the object store is
emulated with a temporary object and `copy_if_not_exists`.
*/

use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use futures::TryStreamExt;
use object_store::{path::Path, ObjectStore};
use tokio::sync::Mutex;
use uuid::Uuid;

use crate::error::{Error, Result};
use crate::util::strip_prefix;

/// Capability set for metadata and manifest I/O. Single-key operations are
/// atomic by the backend's own contract; the optional operations report
/// their absence through the `supports_*` probes.
#[async_trait]
pub trait StorageBackend: Send + Sync {
    /// Read a key, `None` when absent.
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>>;

    /// Write a key with overwrite semantics.
    async fn put(&self, key: &str, bytes: Vec<u8>) -> Result<()>;

    /// Create a key only if it does not exist. `Ok(false)` signals the
    /// conflict. Backends that cannot provide this return
    /// [Error::NotSupported].
    async fn put_if_absent(&self, key: &str, bytes: Vec<u8>) -> Result<bool>;

    /// Replace a key's content only when it currently equals `expected`
    /// (`None` = key absent). `Ok(false)` signals the conflict. Backends
    /// that cannot provide this return [Error::NotSupported].
    async fn compare_and_swap(
        &self,
        key: &str,
        expected: Option<&[u8]>,
        bytes: Vec<u8>,
    ) -> Result<bool>;

    /// Delete a key. Deleting an absent key is not an error.
    async fn delete(&self, key: &str) -> Result<()>;

    /// All keys under a prefix, sorted.
    async fn list(&self, prefix: &str) -> Result<Vec<String>>;

    /// Whether a key exists.
    async fn exists(&self, key: &str) -> Result<bool>;

    /// Whether [StorageBackend::put_if_absent] is available.
    fn supports_put_if_absent(&self) -> bool;

    /// Whether [StorageBackend::compare_and_swap] is available.
    fn supports_compare_and_swap(&self) -> bool;
}

/// In-memory storage used by tests and `memory://` table locations.
#[derive(Debug, Default)]
pub struct InMemoryStorage {
    objects: Mutex<BTreeMap<String, Vec<u8>>>,
}

impl InMemoryStorage {
    /// An empty store.
    pub fn new() -> Self {
        InMemoryStorage::default()
    }
}

#[async_trait]
impl StorageBackend for InMemoryStorage {
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>> {
        Ok(self.objects.lock().await.get(key).cloned())
    }

    async fn put(&self, key: &str, bytes: Vec<u8>) -> Result<()> {
        self.objects.lock().await.insert(key.to_string(), bytes);
        Ok(())
    }

    async fn put_if_absent(&self, key: &str, bytes: Vec<u8>) -> Result<bool> {
        let mut objects = self.objects.lock().await;
        if objects.contains_key(key) {
            return Ok(false);
        }
        objects.insert(key.to_string(), bytes);
        Ok(true)
    }

    async fn compare_and_swap(
        &self,
        key: &str,
        expected: Option<&[u8]>,
        bytes: Vec<u8>,
    ) -> Result<bool> {
        let mut objects = self.objects.lock().await;
        let current = objects.get(key).map(|bytes| bytes.as_slice());
        if current != expected {
            return Ok(false);
        }
        objects.insert(key.to_string(), bytes);
        Ok(true)
    }

    async fn delete(&self, key: &str) -> Result<()> {
        self.objects.lock().await.remove(key);
        Ok(())
    }

    async fn list(&self, prefix: &str) -> Result<Vec<String>> {
        Ok(self
            .objects
            .lock()
            .await
            .keys()
            .filter(|key| key.starts_with(prefix))
            .cloned()
            .collect())
    }

    async fn exists(&self, key: &str) -> Result<bool> {
        Ok(self.objects.lock().await.contains_key(key))
    }

    fn supports_put_if_absent(&self) -> bool {
        true
    }

    fn supports_compare_and_swap(&self) -> bool {
        true
    }
}

/// Adapter over an [ObjectStore]. Create-if-absent is emulated by writing a
/// temporary object and renaming with `copy_if_not_exists`; compare-and-swap
/// is not available, so commits detect conflicts on the metadata write.
pub struct ObjectStoreStorage {
    store: Arc<dyn ObjectStore>,
}

impl ObjectStoreStorage {
    /// Wrap an object store.
    pub fn new(store: Arc<dyn ObjectStore>) -> Self {
        ObjectStoreStorage { store }
    }

    fn path(key: &str) -> Path {
        Path::from(strip_prefix(key))
    }
}

#[async_trait]
impl StorageBackend for ObjectStoreStorage {
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>> {
        match self.store.get(&Self::path(key)).await {
            Ok(result) => Ok(Some(result.bytes().await?.to_vec())),
            Err(object_store::Error::NotFound { .. }) => Ok(None),
            Err(err) => Err(err.into()),
        }
    }

    async fn put(&self, key: &str, bytes: Vec<u8>) -> Result<()> {
        self.store.put(&Self::path(key), bytes.into()).await?;
        Ok(())
    }

    async fn put_if_absent(&self, key: &str, bytes: Vec<u8>) -> Result<bool> {
        let temp = Self::path(&format!("{}.{}.tmp", key, Uuid::new_v4()));
        let target = Self::path(key);
        self.store.put(&temp, bytes.into()).await?;
        let outcome = match self.store.copy_if_not_exists(&temp, &target).await {
            Ok(()) => Ok(true),
            Err(object_store::Error::AlreadyExists { .. }) => Ok(false),
            Err(err) => Err(Error::from(err)),
        };
        self.store.delete(&temp).await?;
        outcome
    }

    async fn compare_and_swap(
        &self,
        _key: &str,
        _expected: Option<&[u8]>,
        _bytes: Vec<u8>,
    ) -> Result<bool> {
        Err(Error::NotSupported(
            "compare-and-swap on object storage".to_string(),
        ))
    }

    async fn delete(&self, key: &str) -> Result<()> {
        match self.store.delete(&Self::path(key)).await {
            Ok(()) | Err(object_store::Error::NotFound { .. }) => Ok(()),
            Err(err) => Err(err.into()),
        }
    }

    async fn list(&self, prefix: &str) -> Result<Vec<String>> {
        let prefix = Self::path(prefix);
        let mut keys: Vec<String> = self
            .store
            .list(Some(&prefix))
            .await?
            .map_ok(|meta| meta.location.to_string())
            .try_collect()
            .await?;
        keys.sort();
        Ok(keys)
    }

    async fn exists(&self, key: &str) -> Result<bool> {
        match self.store.head(&Self::path(key)).await {
            Ok(_) => Ok(true),
            Err(object_store::Error::NotFound { .. }) => Ok(false),
            Err(err) => Err(err.into()),
        }
    }

    fn supports_put_if_absent(&self) -> bool {
        true
    }

    fn supports_compare_and_swap(&self) -> bool {
        false
    }
}
