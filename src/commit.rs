/*!
The atomic commit protocol.

A table's linearization axis is the `version-hint.text` pointer next to the
versioned metadata files. A commit loads the current metadata, applies its
changes, writes the next version with create-if-absent semantics and flips
the pointer. Losing either race is a commit conflict; the engine retries
with exponential backoff until `max_retries` is exhausted.
*/

use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, info, warn};

use crate::error::{Entity, Error, Result};
use crate::model::metadata::{
    MetadataLog, TableMetadata, METADATA_DIR, MS_PER_DAY, VERSION_HINT_FILENAME,
};
use crate::storage::StorageBackend;

/// Retry schedule of the commit loop.
#[derive(Debug, Clone, Copy)]
pub struct CommitOptions {
    /// Retries after the first attempt.
    pub max_retries: u32,
    /// Base backoff delay in milliseconds.
    pub base_delay_ms: u64,
    /// Backoff delay ceiling in milliseconds.
    pub max_delay_ms: u64,
    /// Relative jitter applied to each delay, e.g. 0.2 for +-20%.
    pub jitter: f64,
}

impl Default for CommitOptions {
    fn default() -> Self {
        CommitOptions {
            max_retries: 5,
            base_delay_ms: 100,
            max_delay_ms: 5000,
            jitter: 0.2,
        }
    }
}

/// Retention of historical metadata files.
#[derive(Debug, Clone, Copy)]
pub struct MetadataRetention {
    /// Always keep at least this many previous metadata files.
    pub retain_versions: usize,
    /// Remove previous metadata files older than this.
    pub max_age_ms: i64,
}

impl Default for MetadataRetention {
    fn default() -> Self {
        MetadataRetention {
            retain_versions: 10,
            max_age_ms: 7 * MS_PER_DAY,
        }
    }
}

/// Callback invoked when cleanup of an obsolete file fails. Cleanup
/// failures never fail the commit.
pub type CleanupErrorCallback = Arc<dyn Fn(&str, &Error) + Send + Sync>;

/// The result of a successful commit.
#[derive(Debug, Clone)]
pub struct CommitOutcome {
    /// The committed metadata.
    pub metadata: TableMetadata,
    /// The version the commit produced.
    pub version: u64,
    /// Load-build-write cycles used, starting at 1.
    pub attempts: u32,
    /// Whether a conflicting writer was observed and outrun.
    pub conflict_resolved: bool,
    /// Location of the committed metadata file.
    pub metadata_location: String,
}

/// Drives the optimistic commit protocol over a [StorageBackend].
pub struct CommitEngine {
    storage: Arc<dyn StorageBackend>,
    options: CommitOptions,
    retention: MetadataRetention,
    on_cleanup_error: Option<CleanupErrorCallback>,
}

impl CommitEngine {
    /// Engine with default options over the given storage.
    pub fn new(storage: Arc<dyn StorageBackend>) -> Self {
        CommitEngine {
            storage,
            options: CommitOptions::default(),
            retention: MetadataRetention::default(),
            on_cleanup_error: None,
        }
    }

    /// Override the retry schedule.
    pub fn with_options(mut self, options: CommitOptions) -> Self {
        self.options = options;
        self
    }

    /// Override metadata file retention.
    pub fn with_retention(mut self, retention: MetadataRetention) -> Self {
        self.retention = retention;
        self
    }

    /// Report cleanup failures to the callback instead of only the log.
    pub fn with_cleanup_callback(mut self, callback: CleanupErrorCallback) -> Self {
        self.on_cleanup_error = Some(callback);
        self
    }

    /// The storage this engine writes through.
    pub fn storage(&self) -> &Arc<dyn StorageBackend> {
        &self.storage
    }

    /// Path of a versioned metadata file.
    pub fn metadata_path(location: &str, version: u64) -> String {
        format!(
            "{}/{}/v{}.metadata.json",
            location, METADATA_DIR, version
        )
    }

    /// Path of the version hint pointer.
    pub fn version_hint_path(location: &str) -> String {
        format!("{}/{}/{}", location, METADATA_DIR, VERSION_HINT_FILENAME)
    }

    /// Read the current version from the pointer, `None` when the table
    /// does not exist yet.
    pub async fn current_version(&self, location: &str) -> Result<Option<u64>> {
        let hint = self
            .storage
            .get(&Self::version_hint_path(location))
            .await?;
        match hint {
            None => Ok(None),
            Some(bytes) => {
                let text = String::from_utf8(bytes)?;
                Ok(Some(text.trim().parse::<u64>()?))
            }
        }
    }

    /// Load the metadata file of a specific version.
    pub async fn load_metadata(&self, location: &str, version: u64) -> Result<TableMetadata> {
        let path = Self::metadata_path(location, version);
        let bytes = self
            .storage
            .get(&path)
            .await?
            .ok_or_else(|| Error::NotFound(Entity::Other(path.clone())))?;
        Ok(serde_json::from_slice(&bytes)?)
    }

    /// Load the current metadata through the pointer.
    pub async fn load_current_metadata(
        &self,
        location: &str,
    ) -> Result<Option<(u64, TableMetadata)>> {
        match self.current_version(location).await? {
            None => Ok(None),
            Some(version) => Ok(Some((version, self.load_metadata(location, version).await?))),
        }
    }

    /// Write version 1 of a fresh table. Fails with already-exists when a
    /// concurrent creator wins.
    pub async fn create(&self, metadata: &TableMetadata) -> Result<CommitOutcome> {
        metadata.validate()?;
        let location = metadata.location.clone();
        let metadata_location = Self::metadata_path(&location, 1);
        let bytes = serde_json::to_vec(metadata)?;
        if !self.storage.put_if_absent(&metadata_location, bytes).await? {
            return Err(Error::AlreadyExists(Entity::Table(location)));
        }
        self.storage
            .put(&Self::version_hint_path(&location), b"1".to_vec())
            .await?;
        info!(location = %location, "created table metadata v1");
        Ok(CommitOutcome {
            metadata: metadata.clone(),
            version: 1,
            attempts: 1,
            conflict_resolved: false,
            metadata_location,
        })
    }

    /// Run the load-build-write cycle until it wins or retries are
    /// exhausted. `build` receives the freshly loaded current metadata on
    /// every attempt.
    pub async fn commit<F>(&self, location: &str, build: F) -> Result<CommitOutcome>
    where
        F: Fn(&TableMetadata) -> Result<TableMetadata>,
    {
        if !self.storage.supports_put_if_absent() && !self.storage.supports_compare_and_swap() {
            return Err(Error::NotSupported(
                "commit requires put-if-absent or compare-and-swap".to_string(),
            ));
        }
        let mut last_error: Option<Error> = None;
        let mut attempts = 0u32;
        for attempt in 0..=self.options.max_retries {
            if attempt > 0 {
                tokio::time::sleep(self.backoff_delay(attempt - 1)).await;
            }
            attempts += 1;
            match self.try_commit(location, &build).await {
                Ok(mut outcome) => {
                    outcome.attempts = attempts;
                    outcome.conflict_resolved = attempts > 1;
                    info!(
                        location = %location,
                        version = outcome.version,
                        attempts = outcome.attempts,
                        "committed table metadata"
                    );
                    return Ok(outcome);
                }
                Err(err) if err.is_conflict() => {
                    debug!(location = %location, attempt = attempt, "commit conflict, retrying");
                    last_error = Some(err);
                }
                Err(err) => return Err(err),
            }
        }
        Err(Error::CommitRetryExhausted {
            attempts,
            source: Box::new(last_error.unwrap_or_else(|| {
                Error::CommitConflict("no attempt recorded".to_string())
            })),
        })
    }

    async fn try_commit<F>(&self, location: &str, build: &F) -> Result<CommitOutcome>
    where
        F: Fn(&TableMetadata) -> Result<TableMetadata>,
    {
        let version = self
            .current_version(location)
            .await?
            .ok_or_else(|| Error::NotFound(Entity::Table(location.to_string())))?;
        let current = self.load_metadata(location, version).await?;

        let mut updated = build(&current)?;
        updated.metadata_log.push(MetadataLog {
            metadata_file: Self::metadata_path(location, version),
            timestamp_ms: current.last_updated_ms,
        });
        let removed_entries = self.prune_metadata_log(&mut updated);
        updated.validate()?;

        let next_version = version + 1;
        let metadata_location = Self::metadata_path(location, next_version);
        let bytes = serde_json::to_vec(&updated)?;
        if self.storage.supports_put_if_absent() {
            if !self.storage.put_if_absent(&metadata_location, bytes).await? {
                return Err(Error::CommitConflict(format!(
                    "metadata version {} already exists",
                    next_version
                )));
            }
        } else {
            self.storage.put(&metadata_location, bytes).await?;
        }

        let hint_path = Self::version_hint_path(location);
        if self.storage.supports_compare_and_swap() {
            let expected = version.to_string();
            let flipped = self
                .storage
                .compare_and_swap(
                    &hint_path,
                    Some(expected.as_bytes()),
                    next_version.to_string().into_bytes(),
                )
                .await?;
            if !flipped {
                // the metadata file this attempt wrote is orphaned but
                // harmless; sweep it now
                self.cleanup(&metadata_location).await;
                return Err(Error::CommitConflict(format!(
                    "version hint moved past {}",
                    version
                )));
            }
        } else {
            self.storage
                .put(&hint_path, next_version.to_string().into_bytes())
                .await?;
        }

        for entry in removed_entries {
            self.cleanup(&entry.metadata_file).await;
        }

        Ok(CommitOutcome {
            metadata: updated,
            version: next_version,
            attempts: 1,
            conflict_resolved: false,
            metadata_location,
        })
    }

    /// Trim the metadata log: keep at least `retain_versions` entries and
    /// drop older-than-`max_age_ms` entries beyond that. Returns the
    /// dropped entries so their files can be deleted after the flip.
    fn prune_metadata_log(&self, metadata: &mut TableMetadata) -> Vec<MetadataLog> {
        let total = metadata.metadata_log.len();
        if total <= self.retention.retain_versions {
            return vec![];
        }
        let now_ms = chrono::Utc::now().timestamp_millis();
        let excess = total - self.retention.retain_versions;
        let mut removed = vec![];
        let mut kept = vec![];
        for (index, entry) in metadata.metadata_log.drain(..).enumerate() {
            if index < excess && now_ms - entry.timestamp_ms > self.retention.max_age_ms {
                removed.push(entry);
            } else {
                kept.push(entry);
            }
        }
        metadata.metadata_log = kept;
        removed
    }

    async fn cleanup(&self, path: &str) {
        if let Err(err) = self.storage.delete(path).await {
            warn!(path = %path, error = %err, "failed to clean up metadata file");
            if let Some(callback) = &self.on_cleanup_error {
                callback(path, &err);
            }
        }
    }

    fn backoff_delay(&self, retry: u32) -> Duration {
        let exponential = self
            .options
            .base_delay_ms
            .saturating_mul(1u64 << retry.min(32))
            .min(self.options.max_delay_ms) as f64;
        let jitter = 1.0 + self.options.jitter * (uniform_unit() * 2.0 - 1.0);
        Duration::from_millis((exponential * jitter).max(0.0) as u64)
    }
}

/// Uniform value in [0, 1).
fn uniform_unit() -> f64 {
    let mut bytes = [0u8; 8];
    if getrandom::getrandom(&mut bytes).is_err() {
        return 0.5;
    }
    (u64::from_le_bytes(bytes) >> 11) as f64 / (1u64 << 53) as f64
}
