//! End-to-end coverage of the full read/serialize/checkpoint pipeline
//! against the in-memory mock client, exercising the concrete scenarios
//! this engine is expected to satisfy: a clean round trip, a query filter,
//! resuming after new documents arrive, incompatible-resume rejection, and
//! size-based rotation.

mod mock_client;

use std::{collections::BTreeSet, fs, sync::Arc};

use bson::{doc, oid::ObjectId};
use pretty_assertions::assert_eq;

use mock_client::MockClient;
use snapshot_engine::{
    client::CollectionClient,
    config::{Compression, Format, SnapshotOptions},
    ErrorKind,
};

/// An `ObjectId` with a fixed timestamp component and a strictly increasing
/// counter, so the partitioner's timestamp planner (which needs a nonzero
/// `[min, max]` time span) declines and falls back to sampling sorted
/// `_id`s directly -- keeping partition boundaries stable across reruns in
/// these tests even as new documents are inserted.
fn oid(counter: u64) -> ObjectId {
    let mut bytes = [0u8; 12];
    bytes[0..4].copy_from_slice(&1_700_000_000u32.to_be_bytes());
    bytes[4..12].copy_from_slice(&counter.to_be_bytes());
    ObjectId::from_bytes(bytes)
}

fn part_files(dir: &std::path::Path, prefix: &str, ext: &str) -> Vec<std::path::PathBuf> {
    let mut paths: Vec<_> = fs::read_dir(dir)
        .unwrap()
        .filter_map(|e| e.ok())
        .map(|e| e.path())
        .filter(|p| {
            p.file_name()
                .and_then(|n| n.to_str())
                .map(|n| n.starts_with(prefix) && n.ends_with(ext))
                .unwrap_or(false)
        })
        .collect();
    paths.sort();
    paths
}

fn read_jsonl_values(dir: &std::path::Path, prefix: &str) -> Vec<serde_json::Value> {
    let mut values = Vec::new();
    for path in part_files(dir, prefix, ".jsonl") {
        let content = fs::read_to_string(&path).unwrap();
        for line in content.lines() {
            if !line.is_empty() {
                values.push(serde_json::from_str(line).unwrap());
            }
        }
    }
    values
}

fn base_options(collection: &str, output: &std::path::Path) -> SnapshotOptions {
    let mut options = SnapshotOptions::new(collection.to_string(), output.to_path_buf());
    options.compression = Compression::None;
    options.partitions = 4;
    options.telemetry = false;
    options
}

#[test]
fn round_trip_jsonl_across_partitions() {
    let docs: Vec<_> = (1..=1000u64)
        .map(|i| doc! { "_id": oid(i), "v": i as i64 })
        .collect();
    let client: Arc<dyn CollectionClient> = Arc::new(MockClient::new(docs));

    let dir = tempfile::tempdir().unwrap();
    let options = base_options("widgets", dir.path());

    let outcome = snapshot_engine::run(&options, client).unwrap();
    let manifest = outcome.manifest.unwrap();

    let values = read_jsonl_values(dir.path(), &options.prefix);
    assert_eq!(values.len(), 1000);

    let vs: BTreeSet<i64> = values.iter().map(|v| v["v"].as_i64().unwrap()).collect();
    assert_eq!(vs, (1..=1000).collect());

    let total_rows: u64 = manifest.parts.iter().map(|p| p.rows).sum();
    assert_eq!(total_rows, 1000);
    assert!(manifest.partitions.iter().all(|p| p.completed));
}

#[test]
fn query_filter_excludes_non_matching_documents() {
    let docs: Vec<_> = (0..100u64)
        .map(|i| {
            let status = if i % 2 == 0 { "active" } else { "inactive" };
            doc! { "_id": oid(i), "status": status, "n": i as i64 }
        })
        .collect();
    let client: Arc<dyn CollectionClient> = Arc::new(MockClient::new(docs));

    let dir = tempfile::tempdir().unwrap();
    let mut options = base_options("widgets", dir.path());
    options.query = doc! { "status": "active" };

    snapshot_engine::run(&options, client).unwrap();

    let values = read_jsonl_values(dir.path(), &options.prefix);
    assert_eq!(values.len(), 50);
    assert!(values.iter().all(|v| v["status"] == "active"));
}

#[test]
fn resume_picks_up_documents_inserted_after_a_completed_run() {
    let docs: Vec<_> = (0..50u64).map(|i| doc! { "_id": oid(i), "active": true }).collect();
    let client = Arc::new(MockClient::new(docs));
    let dynamic: Arc<dyn CollectionClient> = client.clone();

    let dir = tempfile::tempdir().unwrap();
    let mut options = base_options("widgets", dir.path());
    options.partitions = 1;

    let first = snapshot_engine::run(&options, dynamic.clone()).unwrap();
    assert_eq!(first.manifest.unwrap().parts.iter().map(|p| p.rows).sum::<u64>(), 50);

    for i in 50..80u64 {
        client.insert(doc! { "_id": oid(i), "active": true });
    }

    let second = snapshot_engine::run(&options, dynamic).unwrap();
    let manifest = second.manifest.unwrap();

    let values = read_jsonl_values(dir.path(), &options.prefix);
    let raw_ids: Vec<String> = values.iter().map(|v| v["_id"].as_str().unwrap().to_string()).collect();
    let unique: BTreeSet<&String> = raw_ids.iter().collect();
    assert_eq!(unique.len(), raw_ids.len(), "no duplicate _id values across both runs");
    assert_eq!(raw_ids.len(), 80);

    let total_rows: u64 = manifest.parts.iter().map(|p| p.rows).sum();
    assert!(total_rows >= 80);
}

#[test]
fn rerunning_a_completed_snapshot_with_no_new_data_creates_no_new_parts() {
    let docs: Vec<_> = (0..20u64).map(|i| doc! { "_id": oid(i), "active": true }).collect();
    let client: Arc<dyn CollectionClient> = Arc::new(MockClient::new(docs));

    let dir = tempfile::tempdir().unwrap();
    let mut options = base_options("widgets", dir.path());
    options.partitions = 1;

    let first = snapshot_engine::run(&options, client.clone()).unwrap();
    let first_parts = first.manifest.unwrap().parts.len();

    let second = snapshot_engine::run(&options, client).unwrap();
    let second_parts = second.manifest.unwrap().parts.len();

    assert_eq!(first_parts, second_parts);
}

#[test]
fn incompatible_resume_fails_unless_overwrite_is_requested() {
    let docs: Vec<_> = (0..10u64).map(|i| doc! { "_id": oid(i), "n": i as i64 }).collect();
    let client: Arc<dyn CollectionClient> = Arc::new(MockClient::new(docs));

    let dir = tempfile::tempdir().unwrap();
    let mut options = base_options("widgets", dir.path());
    options.format = Format::Jsonl;

    snapshot_engine::run(&options, client.clone()).unwrap();

    let mut csv_options = options.clone();
    csv_options.format = Format::Csv;

    let err = snapshot_engine::run(&csv_options, client.clone()).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::IncompatibleResume);

    csv_options.resume_overwrite_incompatible = true;
    let outcome = snapshot_engine::run(&csv_options, client).unwrap();
    let manifest = outcome.manifest.unwrap();
    assert_eq!(manifest.format, "csv");
    assert_eq!(manifest.parts.iter().map(|p| p.rows).sum::<u64>(), 10);
}

#[test]
fn rotation_splits_into_multiple_parts_of_at_least_the_configured_size() {
    // Padded to push total output well past the reader's 1 MiB batch
    // threshold (src/reader.rs), so the run is guaranteed several batches,
    // each of which rotates the output immediately since it alone exceeds
    // `rotate_bytes` below.
    let docs: Vec<_> = (0..10_000u64)
        .map(|i| doc! { "_id": oid(i), "padding": "x".repeat(200), "n": i as i64 })
        .collect();
    let client: Arc<dyn CollectionClient> = Arc::new(MockClient::new(docs));

    let dir = tempfile::tempdir().unwrap();
    let mut options = base_options("widgets", dir.path());
    options.partitions = 1;
    let rotate_bytes = 8 * 1024u64;
    options.rotate_bytes = Some(rotate_bytes);
    options.single_file = false;

    let outcome = snapshot_engine::run(&options, client).unwrap();
    let manifest = outcome.manifest.unwrap();

    assert!(manifest.parts.len() >= 2, "expected rotation to produce multiple parts, got {}", manifest.parts.len());
    for part in &manifest.parts[..manifest.parts.len() - 1] {
        assert!(part.bytes >= rotate_bytes, "non-final part too small: {} bytes", part.bytes);
    }

    let total_rows: u64 = manifest.parts.iter().map(|p| p.rows).sum();
    assert_eq!(total_rows, 10_000);
}

#[test]
fn empty_collection_produces_zero_parts() {
    let client: Arc<dyn CollectionClient> = Arc::new(MockClient::new(Vec::new()));
    let dir = tempfile::tempdir().unwrap();
    let options = base_options("widgets", dir.path());

    let outcome = snapshot_engine::run(&options, client).unwrap();
    let manifest = outcome.manifest.unwrap();

    assert!(manifest.parts.is_empty());
    assert_eq!(manifest.partitions.len(), 1);
}

#[test]
fn single_document_produces_exactly_one_part_one_row() {
    let client: Arc<dyn CollectionClient> = Arc::new(MockClient::new(vec![doc! { "_id": oid(1), "v": 1i64 }]));
    let dir = tempfile::tempdir().unwrap();
    let mut options = base_options("widgets", dir.path());
    options.partitions = 1;

    let outcome = snapshot_engine::run(&options, client).unwrap();
    let manifest = outcome.manifest.unwrap();

    assert_eq!(manifest.parts.len(), 1);
    assert_eq!(manifest.parts[0].rows, 1);
}

#[test]
fn csv_output_round_trips_through_full_run() {
    let docs: Vec<_> = (0..20u64).map(|i| doc! { "_id": oid(i), "n": i as i64 }).collect();
    let client: Arc<dyn CollectionClient> = Arc::new(MockClient::new(docs));

    let dir = tempfile::tempdir().unwrap();
    let mut options = base_options("widgets", dir.path());
    options.format = Format::Csv;
    options.partitions = 1;

    snapshot_engine::run(&options, client).unwrap();

    let paths = part_files(dir.path(), &options.prefix, ".csv");
    assert_eq!(paths.len(), 1);

    let mut reader = csv::Reader::from_path(&paths[0]).unwrap();
    let headers: Vec<String> = reader.headers().unwrap().iter().map(|h| h.to_string()).collect();
    assert_eq!(headers, vec!["_id".to_string(), "n".to_string()]);

    let rows: Vec<_> = reader.records().map(|r| r.unwrap()).collect();
    assert_eq!(rows.len(), 20);
    let ns: BTreeSet<i64> = rows.iter().map(|r| r.get(1).unwrap().parse().unwrap()).collect();
    assert_eq!(ns, (0..20).collect());
}

#[test]
fn parquet_output_round_trips_through_full_run() {
    let docs: Vec<_> = (0..20u64).map(|i| doc! { "_id": oid(i), "n": i as i64 }).collect();
    let client: Arc<dyn CollectionClient> = Arc::new(MockClient::new(docs));

    let dir = tempfile::tempdir().unwrap();
    let mut options = base_options("widgets", dir.path());
    options.format = Format::Parquet;
    options.partitions = 1;

    snapshot_engine::run(&options, client).unwrap();

    let paths = part_files(dir.path(), &options.prefix, ".parquet");
    assert_eq!(paths.len(), 1);

    let file = fs::File::open(&paths[0]).unwrap();
    let reader = parquet::arrow::arrow_reader::ParquetRecordBatchReaderBuilder::try_new(file)
        .unwrap()
        .build()
        .unwrap();
    let total_rows: usize = reader.map(|b| b.unwrap().num_rows()).sum();
    assert_eq!(total_rows, 20);
}

#[test]
fn requesting_more_partitions_than_documents_still_covers_every_document() {
    let docs: Vec<_> = (0..3u64).map(|i| doc! { "_id": oid(i), "v": i as i64 }).collect();
    let client: Arc<dyn CollectionClient> = Arc::new(MockClient::new(docs));
    let dir = tempfile::tempdir().unwrap();
    let mut options = base_options("widgets", dir.path());
    options.partitions = 8;

    let outcome = snapshot_engine::run(&options, client).unwrap();
    let manifest = outcome.manifest.unwrap();

    let total_rows: u64 = manifest.parts.iter().map(|p| p.rows).sum();
    assert_eq!(total_rows, 3);
    assert!(manifest.partitions.iter().all(|p| p.completed));
}
