//! Per-partition reader (spec §4.2): streams one assigned range in primary
//! key order, batches documents (or pre-serialized JSONL bytes), and pushes
//! them onto the shared queue while advancing the partition's checkpoint.

use std::sync::Arc;

use bson::Document;

use crate::{
    client::{CollectionClient, FindSpec, SortDirection},
    config::{Format, Range, SnapshotOptions},
    document::{document_id, to_jsonl_line, Id},
    error::Result,
    manifest::Manifest,
    queue::ByteQueue,
    writer::Batch,
};

/// 1 MiB: the JSONL-fast-path and non-JSONL byte thresholds that force a
/// batch to become ready, independent of `batch_size` (spec §4.2 step 5).
const BATCH_BYTES_THRESHOLD: usize = 1024 * 1024;

struct PendingBatch {
    lines: Vec<u8>,
    documents: Vec<Document>,
    bytes: usize,
    rows: usize,
}

impl PendingBatch {
    fn new() -> Self {
        Self {
            lines: Vec::new(),
            documents: Vec::new(),
            bytes: 0,
            rows: 0,
        }
    }

    fn is_empty(&self) -> bool {
        self.rows == 0
    }
}

/// Streams partition `index` over `range`, pushing batches onto `queue` and
/// updating `manifest` as it goes. Runs to completion or returns the first
/// error encountered; on error, the partition's checkpoint reflects only
/// what was successfully enqueued (spec §4.2 "Failure semantics").
#[tracing::instrument(level = "debug", skip(collection, queue, manifest, options), fields(partition = index))]
pub fn run(
    index: usize,
    range: Range,
    collection: &dyn CollectionClient,
    queue: &ByteQueue<Batch>,
    manifest: &Arc<Manifest>,
    options: &SnapshotOptions,
) -> Result<()> {
    // A partition previously marked complete is not skipped outright: its
    // checkpoint still tightens the query, so a rerun against an otherwise
    // unchanged collection finds nothing and writes nothing, while a rerun
    // after new matching documents were inserted beyond the checkpoint
    // picks them up.
    let checkpoint = manifest.partition_checkpoint(index);
    let effective_range = range.with_checkpoint(checkpoint.as_ref());

    let mut filter = options.query.clone();
    let range_fragment = effective_range.to_filter_fragment();
    if !range_fragment.is_empty() {
        filter.insert("_id", range_fragment);
    }

    let mut spec = FindSpec::sorted_by_id(filter, SortDirection::Ascending);
    spec.hint = options.hint.clone().or_else(|| Some(bson::doc! { "_id": 1 }));
    spec.projection = options.projection.clone();
    spec.batch_size = options.batch_size as u32;
    spec.read_preference = options.read_preference;
    spec.read_concern = options.read_concern;
    spec.no_cursor_timeout = options.no_cursor_timeout;

    let mut cursor = collection.find(spec)?;
    let mut pending = PendingBatch::new();
    let mut last_id: Option<Id> = checkpoint;

    while let Some(mut doc) = cursor.next()? {
        if let Some(mapper) = &options.mapper {
            doc = mapper(doc);
        }
        last_id = Some(document_id(&doc)?);

        match options.format {
            Format::Jsonl => {
                let line = to_jsonl_line(&doc)?;
                pending.bytes += line.len();
                pending.lines.extend_from_slice(line.as_bytes());
                pending.rows += 1;
            }
            Format::Csv | Format::Parquet => {
                pending.bytes += approx_document_bytes(&doc);
                pending.documents.push(doc);
                pending.rows += 1;
            }
        }

        let ready = match options.format {
            Format::Jsonl => pending.bytes >= BATCH_BYTES_THRESHOLD,
            Format::Csv | Format::Parquet => {
                pending.rows >= options.batch_size || pending.bytes >= BATCH_BYTES_THRESHOLD
            }
        };

        if ready {
            flush(&mut pending, queue, manifest, index, &last_id)?;
        }
    }

    if !pending.is_empty() {
        flush(&mut pending, queue, manifest, index, &last_id)?;
    }

    manifest.mark_partition_complete(index)?;
    tracing::debug!(partition = index, "partition complete");
    Ok(())
}

fn flush(
    pending: &mut PendingBatch,
    queue: &ByteQueue<Batch>,
    manifest: &Arc<Manifest>,
    index: usize,
    last_id: &Option<Id>,
) -> Result<()> {
    let bytes = pending.bytes as u64;
    let batch = if !pending.lines.is_empty() {
        Batch::Lines {
            bytes: std::mem::take(&mut pending.lines),
            rows: pending.rows as u64,
        }
    } else {
        Batch::Documents(std::mem::take(&mut pending.documents))
    };
    queue.push(batch, bytes)?;

    if let Some(id) = last_id {
        manifest.update_partition_checkpoint(index, id.clone())?;
    }

    pending.bytes = 0;
    pending.rows = 0;
    Ok(())
}

/// A cheap estimate of a document's serialized size, used only for batch
/// thresholding (not persisted anywhere), since documents destined for
/// CSV/Parquet are kept structured rather than pre-serialized.
fn approx_document_bytes(doc: &Document) -> usize {
    bson::to_vec(doc).map(|v| v.len()).unwrap_or(256)
}
