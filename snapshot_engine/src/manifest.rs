//! Durable, atomically-updated run manifest (spec §3, §4.5).

use std::{
    fs,
    io::Write,
    path::{Path, PathBuf},
    sync::Mutex,
    time::{Duration, Instant},
};

use bson::Document;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::{
    config::{Compression, Format, ManifestOptions},
    document::Id,
    error::{ErrorKind, Result},
};

/// Throttle interval for [`Manifest::add_progress_to_part`] (spec §4.5:
/// "may be throttled (coalesced) at ~2-second intervals").
const PROGRESS_THROTTLE: Duration = Duration::from_secs(2);

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct PartitionRecord {
    pub index: usize,
    pub last_id_exclusive: Option<bson::Bson>,
    pub completed: bool,
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct PartRecord {
    pub index: usize,
    pub path: PathBuf,
    pub bytes: u64,
    pub rows: u64,
    pub complete: bool,
    pub checksum: Option<String>,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ManifestDocument {
    pub version: u32,
    pub run_id: String,
    pub created_at: String,
    pub collection: String,
    pub format: String,
    pub compression: String,
    pub query_digest: String,
    pub options: ManifestOptions,
    pub partitions: Vec<PartitionRecord>,
    pub parts: Vec<PartRecord>,
}

/// Computes `query_digest`: the SHA-256 hex of the canonical JSON of
/// `{query, projection}` (spec §3). "Canonical" means object keys sorted
/// recursively, so the digest is independent of field insertion order.
pub fn query_digest(query: &Document, projection: Option<&Document>) -> String {
    let mut canonical = Document::new();
    canonical.insert("query", query.clone());
    if let Some(projection) = projection {
        canonical.insert("projection", projection.clone());
    }
    let json = canonicalize(crate::document::bson_document_to_json(&canonical));
    let bytes = serde_json::to_vec(&json).expect("json serialization of bson document never fails");
    let digest = Sha256::digest(&bytes);
    hex::encode(digest)
}

/// SHA-256 over raw bytes, used for the optional part checksum (spec §9,
/// "Checksum computation on part completion is left as optional").
pub fn sha256_hex(bytes: &[u8]) -> String {
    hex::encode(Sha256::digest(bytes))
}

/// Recursively sorts object keys so structurally-equal documents with
/// different field orders hash identically.
fn canonicalize(value: serde_json::Value) -> serde_json::Value {
    match value {
        serde_json::Value::Object(map) => {
            let mut entries: Vec<_> = map.into_iter().map(|(k, v)| (k, canonicalize(v))).collect();
            entries.sort_by(|a, b| a.0.cmp(&b.0));
            serde_json::Value::Object(entries.into_iter().collect())
        }
        serde_json::Value::Array(items) => {
            serde_json::Value::Array(items.into_iter().map(canonicalize).collect())
        }
        other => other,
    }
}

/// Thread-safe handle to the on-disk manifest. All mutating operations are
/// serialized under a single mutex, per spec §4.5.
pub struct Manifest {
    path: PathBuf,
    inner: Mutex<Inner>,
}

struct Inner {
    doc: ManifestDocument,
    last_progress_flush: Option<Instant>,
}

impl Manifest {
    /// Loads an existing manifest from `path`, if present.
    pub fn load(path: impl Into<PathBuf>) -> Result<Option<Self>> {
        let path = path.into();
        if !path.exists() {
            return Ok(None);
        }
        let bytes = fs::read(&path).map_err(|e| ErrorKind::Manifest.with_source(e))?;
        let doc: ManifestDocument =
            serde_json::from_slice(&bytes).map_err(|e| ErrorKind::Manifest.with_source(e))?;
        Ok(Some(Self {
            path,
            inner: Mutex::new(Inner {
                doc,
                last_progress_flush: None,
            }),
        }))
    }

    /// Creates a fresh manifest with a new `run_id`.
    pub fn create(
        path: impl Into<PathBuf>,
        collection: &str,
        format: Format,
        compression: Compression,
        query_digest: String,
        options: ManifestOptions,
        now_rfc3339: String,
    ) -> Self {
        Self {
            path: path.into(),
            inner: Mutex::new(Inner {
                doc: ManifestDocument {
                    version: 1,
                    run_id: uuid::Uuid::new_v4().to_string(),
                    created_at: now_rfc3339,
                    collection: collection.to_string(),
                    format: format.as_str().to_string(),
                    compression: compression.as_str().to_string(),
                    query_digest,
                    options,
                    partitions: Vec::new(),
                    parts: Vec::new(),
                },
                last_progress_flush: None,
            }),
        }
    }

    /// Equality check on the four fields that pin resumability (spec §3).
    pub fn compatible_with(
        &self,
        collection: &str,
        format: Format,
        compression: Compression,
        query_digest: &str,
    ) -> bool {
        let inner = self.inner.lock().unwrap();
        inner.doc.collection == collection
            && inner.doc.format == format.as_str()
            && inner.doc.compression == compression.as_str()
            && inner.doc.query_digest == query_digest
    }

    /// Idempotent: does nothing if partitions are already populated.
    pub fn ensure_partitions(&self, n: usize) -> Result<()> {
        let mut inner = self.inner.lock().unwrap();
        if !inner.doc.partitions.is_empty() {
            return Ok(());
        }
        inner.doc.partitions = (0..n)
            .map(|index| PartitionRecord {
                index,
                last_id_exclusive: None,
                completed: false,
            })
            .collect();
        drop(inner);
        self.save()
    }

    pub fn partition_checkpoint(&self, index: usize) -> Option<bson::Bson> {
        let inner = self.inner.lock().unwrap();
        inner
            .doc
            .partitions
            .get(index)
            .and_then(|p| p.last_id_exclusive.clone())
    }

    pub fn partition_completed(&self, index: usize) -> bool {
        let inner = self.inner.lock().unwrap();
        inner
            .doc
            .partitions
            .get(index)
            .map(|p| p.completed)
            .unwrap_or(false)
    }

    /// Persisted immediately; checkpoint operations must not be throttled
    /// (spec §4.5).
    pub fn update_partition_checkpoint(&self, index: usize, last_id: Id) -> Result<()> {
        {
            let mut inner = self.inner.lock().unwrap();
            if let Some(partition) = inner.doc.partitions.get_mut(index) {
                partition.last_id_exclusive = Some(last_id);
            }
        }
        self.save()
    }

    pub fn mark_partition_complete(&self, index: usize) -> Result<()> {
        {
            let mut inner = self.inner.lock().unwrap();
            if let Some(partition) = inner.doc.partitions.get_mut(index) {
                partition.completed = true;
            }
        }
        self.save()
    }

    /// Appends a new part record, persists immediately, and returns its
    /// index.
    pub fn open_part(&self, path: PathBuf) -> Result<usize> {
        let index;
        {
            let mut inner = self.inner.lock().unwrap();
            index = inner.doc.parts.len();
            inner.doc.parts.push(PartRecord {
                index,
                path,
                bytes: 0,
                rows: 0,
                complete: false,
                checksum: None,
            });
        }
        self.save()?;
        Ok(index)
    }

    /// May coalesce writes at roughly 2-second intervals (spec §4.5).
    pub fn add_progress_to_part(&self, index: usize, rows_delta: u64, bytes_delta: u64) -> Result<()> {
        let should_flush = {
            let mut inner = self.inner.lock().unwrap();
            if let Some(part) = inner.doc.parts.get_mut(index) {
                part.rows += rows_delta;
                part.bytes += bytes_delta;
            }
            let now = Instant::now();
            let due = inner
                .last_progress_flush
                .map(|last| now.duration_since(last) >= PROGRESS_THROTTLE)
                .unwrap_or(true);
            if due {
                inner.last_progress_flush = Some(now);
            }
            due
        };
        if should_flush {
            self.save()?;
        }
        Ok(())
    }

    /// Marks a part complete and persists immediately, bypassing the
    /// progress throttle.
    pub fn complete_part(&self, index: usize, bytes: u64, checksum: Option<String>) -> Result<()> {
        {
            let mut inner = self.inner.lock().unwrap();
            if let Some(part) = inner.doc.parts.get_mut(index) {
                part.bytes = bytes;
                part.complete = true;
                part.checksum = checksum;
            }
        }
        self.save()
    }

    /// Replaces the manifest in place with a fresh one (used when
    /// `resume_overwrite_incompatible` is set).
    pub fn reset(
        &self,
        collection: &str,
        format: Format,
        compression: Compression,
        query_digest: String,
        options: ManifestOptions,
        now_rfc3339: String,
    ) -> Result<()> {
        {
            let mut inner = self.inner.lock().unwrap();
            inner.doc = ManifestDocument {
                version: 1,
                run_id: uuid::Uuid::new_v4().to_string(),
                created_at: now_rfc3339,
                collection: collection.to_string(),
                format: format.as_str().to_string(),
                compression: compression.as_str().to_string(),
                query_digest,
                options,
                partitions: Vec::new(),
                parts: Vec::new(),
            };
            inner.last_progress_flush = None;
        }
        self.save()
    }

    pub fn snapshot(&self) -> ManifestDocument {
        self.inner.lock().unwrap().doc.clone()
    }

    pub fn all_partitions_complete(&self) -> bool {
        self.inner
            .lock()
            .unwrap()
            .doc
            .partitions
            .iter()
            .all(|p| p.completed)
    }

    /// Writes `<path>.tmp`, fsyncs (best effort), then renames over `path`,
    /// so a reader never observes a partially written document (spec
    /// §4.5).
    fn save(&self) -> Result<()> {
        let inner = self.inner.lock().unwrap();
        let json = serde_json::to_vec_pretty(&inner.doc).map_err(|e| ErrorKind::Manifest.with_source(e))?;
        drop(inner);

        let tmp_path = tmp_path_for(&self.path);
        let mut file = fs::File::create(&tmp_path).map_err(|e| ErrorKind::Manifest.with_source(e))?;
        file.write_all(&json).map_err(|e| ErrorKind::Manifest.with_source(e))?;
        let _ = file.sync_all();
        drop(file);
        fs::rename(&tmp_path, &self.path).map_err(|e| ErrorKind::Manifest.with_source(e))?;
        Ok(())
    }
}

fn tmp_path_for(path: &Path) -> PathBuf {
    let mut name = path
        .file_name()
        .map(|n| n.to_os_string())
        .unwrap_or_default();
    name.push(".tmp");
    path.with_file_name(name)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn query_digest_is_stable_across_key_order() {
        let mut q1 = Document::new();
        q1.insert("status", "active");
        q1.insert("n", 1);

        let mut q2 = Document::new();
        q2.insert("n", 1);
        q2.insert("status", "active");

        assert_eq!(query_digest(&q1, None), query_digest(&q2, None));
    }

    #[test]
    fn query_digest_differs_for_different_queries() {
        let mut q1 = Document::new();
        q1.insert("status", "active");
        let mut q2 = Document::new();
        q2.insert("status", "inactive");

        assert_ne!(query_digest(&q1, None), query_digest(&q2, None));
    }
}
