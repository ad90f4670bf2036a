/*!
End to end scenarios: create a table, write manifests and statistics,
commit snapshots under contention, evolve the schema, and read the chain
back for pruning.
*/

use std::collections::HashMap;
use std::sync::Arc;

use anyhow::Result;

use iceberg_core::bloom::{
    bloom_filter_path, read_filter_file, write_filter_file, BloomFilter, FieldFilter,
};
use iceberg_core::catalog::commit::{CommitTable, TableRequirement, TableUpdate};
use iceberg_core::catalog::filesystem::FilesystemCatalog;
use iceberg_core::catalog::identifier::Identifier;
use iceberg_core::catalog::namespace::Namespace;
use iceberg_core::catalog::{Catalog, CreateTableRequest, CreateViewRequest};
use iceberg_core::commit::CommitEngine;
use iceberg_core::evolution::{AddColumnOptions, SchemaEvolution};
use iceberg_core::model::manifest::{
    read_manifest, Content, DataFile, FileFormat, ManifestEntry, ManifestWriter,
    PartitionValues, Status,
};
use iceberg_core::model::manifest_list::{
    read_manifest_list, ManifestContent, ManifestFile, ManifestListWriter,
};
use iceberg_core::model::metadata::FormatVersion;
use iceberg_core::model::schema::{Schema, StructField, StructType};
use iceberg_core::model::snapshot::{
    Operation, SnapshotBuilder, Summary, SummaryDeltas, MAIN_BRANCH,
};
use iceberg_core::model::types::PrimitiveType;
use iceberg_core::model::values::{encode_stat_value, Value};
use iceberg_core::stats::{can_skip_encoded, FileStatsCollector, PruneOp};
use iceberg_core::storage::{InMemoryStorage, StorageBackend};

fn table_schema() -> Schema {
    Schema {
        schema_id: 0,
        identifier_field_ids: None,
        fields: StructType {
            fields: vec![
                StructField::required(1, "id", PrimitiveType::Long),
                StructField::optional(2, "name", PrimitiveType::String),
                StructField::required(3, "created", PrimitiveType::Timestamp),
            ],
        },
    }
}

fn setup() -> (Arc<InMemoryStorage>, FilesystemCatalog, Identifier) {
    let storage = Arc::new(InMemoryStorage::new());
    let catalog = FilesystemCatalog::new("memory://w", storage.clone());
    let identifier = Identifier::parse("db.t").unwrap();
    (storage, catalog, identifier)
}

/// Build one data file with stats, wrap it into a manifest and a manifest
/// list, and return an append-snapshot update for the current metadata.
async fn append_one_file(
    storage: &Arc<InMemoryStorage>,
    metadata: &iceberg_core::model::metadata::TableMetadata,
    attempt: u32,
) -> Result<TableUpdate> {
    let schema = metadata.current_schema()?.clone();
    let spec = metadata.default_spec()?.clone();

    let mut stats = FileStatsCollector::new(&schema);
    for row in 0..10i64 {
        stats.add(1, Some(&Value::Long(row)))?;
        stats.add(2, Some(&Value::String(format!("name-{}", row))))?;
        stats.add(3, Some(&Value::Timestamp(1_700_000_000_000_000 + row)))?;
    }
    let file_stats = stats.finalize();

    let data_file = DataFile {
        content: Content::Data,
        file_path: format!("{}/data/part-{}.parquet", metadata.location, attempt),
        file_format: FileFormat::Parquet,
        partition: PartitionValues::default(),
        record_count: 10,
        file_size_in_bytes: 4096,
        column_sizes: Some(file_stats.column_sizes.clone()),
        value_counts: Some(file_stats.value_counts.clone()),
        null_value_counts: Some(file_stats.null_value_counts.clone()),
        nan_value_counts: Some(file_stats.nan_value_counts.clone()),
        lower_bounds: Some(file_stats.lower_bounds.clone()),
        upper_bounds: Some(file_stats.upper_bounds.clone()),
        key_metadata: None,
        split_offsets: None,
        equality_ids: None,
        sort_order_id: Some(metadata.default_sort_order_id),
        content_offset: None,
        content_size_in_bytes: None,
    };

    let mut writer =
        ManifestWriter::new(&spec, &schema, Content::Data, metadata.format_version)?;
    let sequence_number = metadata.last_sequence_number + 1;
    writer.append(ManifestEntry {
        status: Status::Added,
        snapshot_id: None,
        sequence_number: Some(sequence_number),
        file_sequence_number: Some(sequence_number),
        data_file,
    })?;
    let (manifest_bytes, manifest_stats, partition_summaries) = writer.finalize()?;

    let manifest_path = format!(
        "{}/metadata/{}-m0.avro",
        metadata.location,
        uuid::Uuid::new_v4()
    );
    storage
        .put(&manifest_path, manifest_bytes.clone())
        .await?;

    let snapshot_id = iceberg_core::model::snapshot::generate_snapshot_id();
    let mut list_writer = ManifestListWriter::new(&metadata.location, snapshot_id, attempt);
    list_writer.append(&ManifestFile {
        manifest_path: manifest_path.clone(),
        manifest_length: manifest_bytes.len() as i64,
        partition_spec_id: spec.spec_id,
        content: ManifestContent::Data,
        sequence_number,
        min_sequence_number: sequence_number,
        added_snapshot_id: snapshot_id,
        added_files_count: manifest_stats.added_files as i32,
        existing_files_count: manifest_stats.existing_files as i32,
        deleted_files_count: manifest_stats.deleted_files as i32,
        added_rows_count: manifest_stats.added_rows,
        existing_rows_count: manifest_stats.existing_rows,
        deleted_rows_count: manifest_stats.deleted_rows,
        partitions: Some(partition_summaries),
        key_metadata: None,
    })?;
    let (manifest_list_path, list_bytes) = list_writer.into_bytes()?;
    storage.put(&manifest_list_path, list_bytes).await?;

    let snapshot = SnapshotBuilder::default()
        .with_snapshot_id(snapshot_id)
        .with_parent_snapshot_id(metadata.current_snapshot_id)
        .with_last_sequence_number(metadata.last_sequence_number)
        .with_manifest_list(manifest_list_path)
        .with_summary(Summary::from_deltas(
            Operation::Append,
            metadata.current_snapshot().map(|snapshot| &snapshot.summary),
            &SummaryDeltas {
                added_data_files: manifest_stats.added_files,
                added_records: manifest_stats.added_rows,
                added_files_size: manifest_stats.added_size,
                ..Default::default()
            },
        ))
        .with_schema_id(metadata.current_schema_id)
        .build()?;
    Ok(TableUpdate::AddSnapshot { snapshot })
}

#[tokio::test]
async fn test_create_and_first_commit() -> Result<()> {
    let (storage, catalog, identifier) = setup();
    catalog
        .create_namespace(&Namespace::parse("db")?, HashMap::new())
        .await?;
    let metadata = catalog
        .create_table(CreateTableRequest::new(identifier.clone(), table_schema()))
        .await?;

    // metadata v1 and the pointer exist, no snapshot yet
    assert!(storage
        .exists("memory://w/db/t/metadata/v1.metadata.json")
        .await?);
    assert_eq!(
        storage
            .get("memory://w/db/t/metadata/version-hint.text")
            .await?,
        Some(b"1".to_vec())
    );
    assert_eq!(metadata.current_snapshot_id, None);

    let update = append_one_file(&storage, &metadata, 0).await?;
    let response = catalog
        .commit_table(CommitTable {
            identifier: identifier.clone(),
            requirements: vec![TableRequirement::AssertTableUuid {
                uuid: metadata.table_uuid,
            }],
            updates: vec![update],
        })
        .await?;

    let committed = response.metadata;
    assert_eq!(committed.last_sequence_number, 1);
    assert_eq!(committed.snapshots.len(), 1);
    let snapshot = &committed.snapshots[0];
    assert_eq!(snapshot.sequence_number, 1);
    assert_eq!(committed.current_snapshot_id, Some(snapshot.snapshot_id));
    assert_eq!(
        committed.refs.get(MAIN_BRANCH).map(|r| r.snapshot_id),
        Some(snapshot.snapshot_id)
    );
    assert_eq!(
        snapshot.summary.other.get("total-records"),
        Some(&"10".to_string())
    );
    Ok(())
}

#[tokio::test]
async fn test_read_chain_and_prune() -> Result<()> {
    let (storage, catalog, identifier) = setup();
    catalog
        .create_namespace(&Namespace::parse("db")?, HashMap::new())
        .await?;
    let metadata = catalog
        .create_table(CreateTableRequest::new(identifier.clone(), table_schema()))
        .await?;
    let update = append_one_file(&storage, &metadata, 0).await?;
    let committed = catalog
        .commit_table(CommitTable {
            identifier: identifier.clone(),
            requirements: vec![],
            updates: vec![update],
        })
        .await?
        .metadata;

    // resolve current metadata -> snapshot -> manifest list -> manifest
    let loaded = catalog.load_table(&identifier).await?.metadata;
    assert_eq!(loaded, committed);
    let snapshot = loaded.current_snapshot().unwrap();
    let list_bytes = storage.get(&snapshot.manifest_list).await?.unwrap();
    let manifests = read_manifest_list(&list_bytes[..])?;
    assert_eq!(manifests.len(), 1);
    assert_eq!(manifests[0].added_rows_count, 10);

    let manifest_bytes = storage.get(&manifests[0].manifest_path).await?.unwrap();
    let entries = read_manifest(&manifest_bytes[..])?;
    assert_eq!(entries.len(), 1);
    let data_file = &entries[0].data_file;
    assert_eq!(data_file.record_count, 10);

    // ids span [0, 9]: a predicate outside the range skips the file
    let lower = data_file.lower_bounds.as_ref().unwrap().get(&1).unwrap();
    let upper = data_file.upper_bounds.as_ref().unwrap().get(&1).unwrap();
    assert_eq!(lower, &encode_stat_value(&Value::Long(0)));
    assert_eq!(upper, &encode_stat_value(&Value::Long(9)));
    assert!(can_skip_encoded(
        PruneOp::Eq,
        &Value::Long(100),
        Some(lower),
        Some(upper),
        &PrimitiveType::Long,
    )?);
    assert!(!can_skip_encoded(
        PruneOp::Eq,
        &Value::Long(5),
        Some(lower),
        Some(upper),
        &PrimitiveType::Long,
    )?);

    // a bloom filter sidecar narrows point lookups further
    let mut filter = BloomFilter::new(100, 0.01);
    for row in 0..10i64 {
        filter.add(&Value::String(format!("name-{}", row)));
    }
    let sidecar = bloom_filter_path(&data_file.file_path);
    storage
        .put(
            &sidecar,
            write_filter_file(&[FieldFilter {
                field_id: 2,
                name: "name".to_string(),
                filter,
            }]),
        )
        .await?;
    let filters = read_filter_file(&storage.get(&sidecar).await?.unwrap())?;
    assert!(filters[0]
        .filter
        .might_contain(&Value::String("name-3".to_string())));
    Ok(())
}

#[tokio::test]
async fn test_sequential_writers_share_history() -> Result<()> {
    // two writers with their own engines commit one after the other; both
    // succeed and versions stack up
    let (storage, catalog, identifier) = setup();
    catalog
        .create_namespace(&Namespace::parse("db")?, HashMap::new())
        .await?;
    let metadata = catalog
        .create_table(CreateTableRequest::new(identifier.clone(), table_schema()))
        .await?;
    let location = metadata.location.clone();

    let writer_a = CommitEngine::new(storage.clone());
    let writer_b = CommitEngine::new(storage.clone());

    let current = writer_a.load_current_metadata(&location).await?.unwrap().1;
    let update_a = append_one_file(&storage, &current, 0).await?;
    let outcome_a = writer_a
        .commit(&location, move |current| {
            iceberg_core::catalog::commit::apply_table_updates(
                current.clone(),
                std::slice::from_ref(&update_a),
            )
        })
        .await?;
    assert_eq!(outcome_a.version, 2);

    let current = writer_b.load_current_metadata(&location).await?.unwrap().1;
    let update_b = append_one_file(&storage, &current, 0).await?;
    let outcome_b = writer_b
        .commit(&location, move |current| {
            iceberg_core::catalog::commit::apply_table_updates(
                current.clone(),
                std::slice::from_ref(&update_b),
            )
        })
        .await?;
    assert_eq!(outcome_b.version, 3);

    assert!(storage
        .exists("memory://w/db/t/metadata/v2.metadata.json")
        .await?);
    assert!(storage
        .exists("memory://w/db/t/metadata/v3.metadata.json")
        .await?);
    assert_eq!(outcome_b.metadata.last_sequence_number, 2);
    assert_eq!(outcome_b.metadata.snapshots.len(), 2);
    // rolling totals accumulate across commits
    let current_snapshot = outcome_b.metadata.current_snapshot().unwrap();
    assert_eq!(
        current_snapshot.summary.other.get("total-records"),
        Some(&"20".to_string())
    );
    Ok(())
}

#[tokio::test]
async fn test_schema_evolution_through_commit() -> Result<()> {
    let (_, catalog, identifier) = setup();
    catalog
        .create_namespace(&Namespace::parse("db")?, HashMap::new())
        .await?;
    let schema = Schema {
        schema_id: 0,
        identifier_field_ids: None,
        fields: StructType {
            fields: vec![
                StructField::required(1, "id", PrimitiveType::Long),
                StructField::optional(2, "name", PrimitiveType::String),
            ],
        },
    };
    let metadata = catalog
        .create_table(CreateTableRequest::new(identifier.clone(), schema))
        .await?;

    let (evolved, last_column_id) =
        SchemaEvolution::new(metadata.current_schema()?, metadata.last_column_id)
            .rename_column("name", "full_name")
            .add_column("phone", PrimitiveType::String, AddColumnOptions::default())
            .apply()?;

    let response = catalog
        .commit_table(CommitTable {
            identifier: identifier.clone(),
            requirements: vec![TableRequirement::AssertLastAssignedFieldId {
                last_assigned_field_id: metadata.last_column_id,
            }],
            updates: vec![
                TableUpdate::AddSchema {
                    schema: evolved.clone(),
                },
                TableUpdate::SetCurrentSchema { schema_id: -1 },
            ],
        })
        .await?;

    let committed = response.metadata;
    assert_eq!(committed.current_schema_id, 1);
    let current = committed.current_schema()?;
    assert_eq!(current.schema_id, 1);
    assert_eq!(current.field_by_name("full_name").unwrap().id, 2);
    assert_eq!(current.field_by_name("phone").unwrap().id, 3);
    assert_eq!(committed.last_column_id, 3);
    assert_eq!(last_column_id, 3);

    // a stale writer asserting the old field id now fails
    let err = catalog
        .commit_table(CommitTable {
            identifier,
            requirements: vec![TableRequirement::AssertLastAssignedFieldId {
                last_assigned_field_id: 2,
            }],
            updates: vec![],
        })
        .await
        .unwrap_err();
    assert!(err.is_validation());
    Ok(())
}

#[tokio::test]
async fn test_format_upgrade_through_commit() -> Result<()> {
    let (storage, catalog, identifier) = setup();
    catalog
        .create_namespace(&Namespace::parse("db")?, HashMap::new())
        .await?;
    let metadata = catalog
        .create_table(CreateTableRequest::new(identifier.clone(), table_schema()))
        .await?;
    assert_eq!(metadata.format_version, FormatVersion::V2);

    let upgraded = catalog
        .commit_table(CommitTable {
            identifier: identifier.clone(),
            requirements: vec![],
            updates: vec![TableUpdate::UpgradeFormatVersion {
                format_version: FormatVersion::V3,
            }],
        })
        .await?
        .metadata;
    assert_eq!(upgraded.format_version, FormatVersion::V3);
    assert_eq!(upgraded.next_row_id, Some(0));

    // v3 snapshots advance the row lineage
    let mut update = append_one_file(&storage, &upgraded, 0).await?;
    if let TableUpdate::AddSnapshot { snapshot } = &mut update {
        snapshot.added_rows = Some(10);
    }
    let committed = catalog
        .commit_table(CommitTable {
            identifier: identifier.clone(),
            requirements: vec![],
            updates: vec![update],
        })
        .await?
        .metadata;
    assert_eq!(committed.next_row_id, Some(10));
    assert_eq!(committed.snapshots[0].first_row_id, Some(0));

    // downgrading is rejected
    let err = catalog
        .commit_table(CommitTable {
            identifier,
            requirements: vec![],
            updates: vec![TableUpdate::UpgradeFormatVersion {
                format_version: FormatVersion::V2,
            }],
        })
        .await
        .unwrap_err();
    assert!(err.is_validation());
    Ok(())
}

#[tokio::test]
async fn test_namespace_not_empty_boundary() -> Result<()> {
    let (_, catalog, _) = setup();
    let namespace = Namespace::parse("db")?;
    catalog.create_namespace(&namespace, HashMap::new()).await?;
    let view = Identifier::parse("db.events_view")?;
    catalog
        .create_view(CreateViewRequest {
            identifier: view.clone(),
            location: None,
            schema: table_schema(),
            sql: "SELECT * FROM db.t".to_string(),
            dialect: "spark".to_string(),
            properties: HashMap::new(),
        })
        .await?;

    let err = catalog.drop_namespace(&namespace).await.unwrap_err();
    assert!(matches!(
        err,
        iceberg_core::error::Error::NamespaceNotEmpty(_)
    ));

    catalog.drop_view(&view).await?;
    catalog.drop_namespace(&namespace).await?;
    Ok(())
}
