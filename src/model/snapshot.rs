/*!
Details of [snapshots](https://iceberg.apache.org/spec/#snapshots) for a table.

A [Snapshot] contains a pointer to the manifest list as well as supporting data
for the snapshot. A [Reference] is a named pointer to a [Snapshot] stored in the
refs field of the table metadata; it can be a branch or a tag.
*/
use std::collections::{HashMap, HashSet};

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::model::metadata::TableMetadata;

/// The name of the implicit branch every snapshotted table carries.
pub const MAIN_BRANCH: &str = "main";

#[derive(Debug, Serialize, Deserialize, PartialEq, Eq, Clone, Copy)]
#[serde(rename_all = "lowercase")]
/// The type of operations included in the snapshot, this allows
/// certain snapshots to be skipped during operation.
pub enum Operation {
    /// Only data files were added and no files were removed.
    Append,
    /// Data and delete files were added and removed without changing
    /// table data; i.e., compaction, changing the data file format,
    /// or relocating data files.
    Replace,
    /// Data and delete files were added and removed in a logical
    /// overwrite operation.
    Overwrite,
    /// Data files were removed and their contents logically deleted
    /// and/or delete files were added to delete rows.
    Delete,
}

#[derive(Debug, Serialize, Deserialize, PartialEq, Eq, Clone)]
/// Summarises the changes in the snapshot.
pub struct Summary {
    /// The type of operation in the snapshot
    pub operation: Operation,
    /// Other summary data. All values are strings, even integer counts.
    #[serde(flatten)]
    pub other: HashMap<String, String>,
}

impl Summary {
    fn get_long(&self, key: &str) -> i64 {
        self.other
            .get(key)
            .and_then(|raw| raw.parse().ok())
            .unwrap_or(0)
    }

    /// Rolling totals of this summary: records, file size, data files.
    pub fn totals(&self) -> (i64, i64, i64) {
        (
            self.get_long("total-records"),
            self.get_long("total-files-size"),
            self.get_long("total-data-files"),
        )
    }
}

/// Per-commit changes used to synthesize a snapshot summary. Sizes and
/// counts are deltas for this commit, not running accumulators.
#[derive(Debug, Default, Clone, Copy)]
pub struct SummaryDeltas {
    /// Data files added in this commit.
    pub added_data_files: i64,
    /// Data files logically removed in this commit.
    pub deleted_data_files: i64,
    /// Rows added in this commit.
    pub added_records: i64,
    /// Rows logically removed in this commit.
    pub deleted_records: i64,
    /// Bytes of files added in this commit.
    pub added_files_size: i64,
    /// Bytes of files removed in this commit.
    pub removed_files_size: i64,
}

impl Summary {
    /// Build a summary from this commit's deltas and the parent snapshot's
    /// rolling totals.
    pub fn from_deltas(
        operation: Operation,
        parent: Option<&Summary>,
        deltas: &SummaryDeltas,
    ) -> Summary {
        let (parent_records, parent_size, parent_files) =
            parent.map(|summary| summary.totals()).unwrap_or((0, 0, 0));
        let mut other = HashMap::new();
        other.insert(
            "added-data-files".to_string(),
            deltas.added_data_files.to_string(),
        );
        other.insert(
            "deleted-data-files".to_string(),
            deltas.deleted_data_files.to_string(),
        );
        other.insert("added-records".to_string(), deltas.added_records.to_string());
        other.insert(
            "deleted-records".to_string(),
            deltas.deleted_records.to_string(),
        );
        other.insert(
            "added-files-size".to_string(),
            deltas.added_files_size.to_string(),
        );
        other.insert(
            "removed-files-size".to_string(),
            deltas.removed_files_size.to_string(),
        );
        other.insert(
            "total-records".to_string(),
            (parent_records + deltas.added_records - deltas.deleted_records).to_string(),
        );
        other.insert(
            "total-files-size".to_string(),
            (parent_size + deltas.added_files_size - deltas.removed_files_size).to_string(),
        );
        other.insert(
            "total-data-files".to_string(),
            (parent_files + deltas.added_data_files - deltas.deleted_data_files).to_string(),
        );
        Summary { operation, other }
    }
}

#[derive(Debug, Serialize, Deserialize, PartialEq, Eq, Clone)]
#[serde(rename_all = "kebab-case")]
/// An immutable table state: the set of files reachable through one
/// manifest list.
pub struct Snapshot {
    /// A unique long ID
    pub snapshot_id: i64,
    /// The snapshot ID of the snapshot's parent.
    /// Omitted for any snapshot with no parent
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent_snapshot_id: Option<i64>,
    /// A monotonically increasing long that tracks the order of
    /// changes to a table.
    pub sequence_number: i64,
    /// A timestamp when the snapshot was created, used for garbage
    /// collection and table inspection
    pub timestamp_ms: i64,
    /// The location of a manifest list for this snapshot that
    /// tracks manifest files with additional metadata.
    pub manifest_list: String,
    /// A string map that summarizes the snapshot changes, including operation.
    pub summary: Summary,
    /// ID of the table's current schema when the snapshot was created.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub schema_id: Option<i32>,
    /// Reference to the encryption key used to encrypt this snapshot's files.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub key_id: Option<String>,
    /// First row id assigned to rows in this snapshot (format v3 row lineage).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub first_row_id: Option<i64>,
    /// Number of rows this snapshot added (format v3 row lineage).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub added_rows: Option<i64>,
}

/// Generate a random positive 63-bit snapshot id.
pub fn generate_snapshot_id() -> i64 {
    let mut bytes = [0u8; 8];
    if getrandom::getrandom(&mut bytes).is_err() {
        // fall back to the clock; ids only need to be unique per table
        return chrono::Utc::now().timestamp_millis();
    }
    (i64::from_le_bytes(bytes) & i64::MAX).max(1)
}

/// Builder for a [Snapshot]. Sequence number and parent come from the
/// current table metadata; the summary from the manifest counters.
#[derive(Debug, Default)]
pub struct SnapshotBuilder {
    snapshot_id: Option<i64>,
    parent_snapshot_id: Option<i64>,
    sequence_number: Option<i64>,
    timestamp_ms: Option<i64>,
    manifest_list: Option<String>,
    summary: Option<Summary>,
    schema_id: Option<i32>,
    first_row_id: Option<i64>,
    added_rows: Option<i64>,
}

impl SnapshotBuilder {
    /// Explicit snapshot id; a random one is generated if absent.
    pub fn with_snapshot_id(mut self, snapshot_id: i64) -> Self {
        self.snapshot_id = Some(snapshot_id);
        self
    }
    /// The current snapshot the new one builds on.
    pub fn with_parent_snapshot_id(mut self, parent: Option<i64>) -> Self {
        self.parent_snapshot_id = parent;
        self
    }
    /// The table's `last-sequence-number` before this commit; the snapshot
    /// gets the next number.
    pub fn with_last_sequence_number(mut self, last_sequence_number: i64) -> Self {
        self.sequence_number = Some(last_sequence_number + 1);
        self
    }
    /// Creation timestamp; defaults to now.
    pub fn with_timestamp_ms(mut self, timestamp_ms: i64) -> Self {
        self.timestamp_ms = Some(timestamp_ms);
        self
    }
    /// Location of the snapshot's manifest list.
    pub fn with_manifest_list(mut self, manifest_list: impl Into<String>) -> Self {
        self.manifest_list = Some(manifest_list.into());
        self
    }
    /// The snapshot summary.
    pub fn with_summary(mut self, summary: Summary) -> Self {
        self.summary = Some(summary);
        self
    }
    /// Schema in effect when the snapshot was created.
    pub fn with_schema_id(mut self, schema_id: i32) -> Self {
        self.schema_id = Some(schema_id);
        self
    }
    /// Row lineage bookkeeping for format v3.
    pub fn with_row_lineage(mut self, first_row_id: i64, added_rows: i64) -> Self {
        self.first_row_id = Some(first_row_id);
        self.added_rows = Some(added_rows);
        self
    }

    /// Build the snapshot.
    pub fn build(self) -> Result<Snapshot> {
        let manifest_list = self.manifest_list.ok_or(Error::InvalidMetadata {
            field: "manifest-list",
            message: "snapshot requires a manifest list location".to_string(),
        })?;
        if manifest_list.is_empty() {
            return Err(Error::InvalidMetadata {
                field: "manifest-list",
                message: "manifest list location is empty".to_string(),
            });
        }
        let sequence_number = self.sequence_number.ok_or(Error::InvalidMetadata {
            field: "sequence-number",
            message: "snapshot requires a sequence number".to_string(),
        })?;
        let summary = self.summary.ok_or(Error::InvalidMetadata {
            field: "summary",
            message: "snapshot requires a summary".to_string(),
        })?;
        if let Some(first_row_id) = self.first_row_id {
            if first_row_id < 0 {
                return Err(Error::InvalidMetadata {
                    field: "first-row-id",
                    message: format!("negative first-row-id {}", first_row_id),
                });
            }
        }
        Ok(Snapshot {
            snapshot_id: self.snapshot_id.unwrap_or_else(generate_snapshot_id),
            parent_snapshot_id: self.parent_snapshot_id,
            sequence_number,
            timestamp_ms: self
                .timestamp_ms
                .unwrap_or_else(|| chrono::Utc::now().timestamp_millis()),
            manifest_list,
            summary,
            schema_id: self.schema_id,
            key_id: None,
            first_row_id: self.first_row_id,
            added_rows: self.added_rows,
        })
    }
}

#[derive(Debug, Serialize, Deserialize, PartialEq, Eq, Clone)]
#[serde(rename_all = "kebab-case")]
/// Iceberg tables keep track of branches and tags using snapshot references.
pub struct Reference {
    /// A reference's snapshot ID. The tagged snapshot or latest snapshot of a branch.
    pub snapshot_id: i64,
    #[serde(flatten)]
    /// The retention policy for the reference.
    pub retention: Retention,
}

impl Reference {
    /// A branch with no retention overrides.
    pub fn branch(snapshot_id: i64) -> Self {
        Reference {
            snapshot_id,
            retention: Retention::Branch {
                min_snapshots_to_keep: None,
                max_snapshot_age_ms: None,
                max_ref_age_ms: None,
            },
        }
    }
    /// A tag with no retention override.
    pub fn tag(snapshot_id: i64) -> Self {
        Reference {
            snapshot_id,
            retention: Retention::Tag {
                max_ref_age_ms: None,
            },
        }
    }
}

#[derive(Debug, Serialize, Deserialize, PartialEq, Eq, Clone)]
#[serde(rename_all = "lowercase", tag = "type")]
/// Retention policy field, which differs based on whether the reference
/// is a branch or a tag.
pub enum Retention {
    #[serde(rename_all = "kebab-case")]
    /// A branch reference
    Branch {
        /// A positive number for the minimum number of snapshots to keep in a
        /// branch while expiring snapshots.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        min_snapshots_to_keep: Option<i32>,
        /// A positive number for the max age of snapshots to keep when expiring,
        /// including the latest snapshot.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        max_snapshot_age_ms: Option<i64>,
        /// A positive number for the max age of the snapshot reference to
        /// keep while expiring snapshots.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        max_ref_age_ms: Option<i64>,
    },
    #[serde(rename_all = "kebab-case")]
    /// A tag reference.
    Tag {
        /// A positive number for the max age of the snapshot reference to
        /// keep while expiring snapshots.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        max_ref_age_ms: Option<i64>,
    },
}

/// Policy for [find_expired_snapshots].
#[derive(Debug, Clone, Copy)]
pub struct ExpirationPolicy {
    /// Expire unreferenced snapshots older than this.
    pub max_snapshot_age_ms: i64,
    /// Always keep at least this many of the most recent snapshots.
    pub min_snapshots_to_keep: usize,
}

impl Default for ExpirationPolicy {
    fn default() -> Self {
        ExpirationPolicy {
            max_snapshot_age_ms: 5 * 24 * 60 * 60 * 1000,
            min_snapshots_to_keep: 1,
        }
    }
}

/// Identify snapshots that may be removed from the metadata.
///
/// A snapshot referenced by a branch or tag, or reachable as an ancestor of
/// one, is never expired. Among the rest, the newest
/// `min_snapshots_to_keep` survive and anything younger than
/// `max_snapshot_age_ms` survives.
pub fn find_expired_snapshots(
    metadata: &TableMetadata,
    policy: &ExpirationPolicy,
    now_ms: i64,
) -> Vec<i64> {
    let by_id: HashMap<i64, &Snapshot> = metadata
        .snapshots
        .iter()
        .map(|snapshot| (snapshot.snapshot_id, snapshot))
        .collect();

    let mut protected: HashSet<i64> = HashSet::new();
    for reference in metadata.refs.values() {
        let mut cursor = Some(reference.snapshot_id);
        while let Some(snapshot_id) = cursor {
            if !protected.insert(snapshot_id) {
                break;
            }
            cursor = by_id
                .get(&snapshot_id)
                .and_then(|snapshot| snapshot.parent_snapshot_id);
        }
    }

    let mut candidates: Vec<&Snapshot> = metadata
        .snapshots
        .iter()
        .filter(|snapshot| !protected.contains(&snapshot.snapshot_id))
        .collect();
    candidates.sort_by_key(|snapshot| snapshot.timestamp_ms);

    let mut remaining = metadata.snapshots.len();
    let mut expired = vec![];
    for snapshot in candidates {
        if remaining <= policy.min_snapshots_to_keep {
            break;
        }
        if now_ms - snapshot.timestamp_ms > policy.max_snapshot_age_ms {
            expired.push(snapshot.snapshot_id);
            remaining -= 1;
        }
    }
    expired
}
