//! Top-level run loop (spec §5): wires the partitioner, N reader threads, a
//! single writer thread, a progress worker, and the manifest together, and
//! is the one place that decides how a fatal error propagates.

use std::{
    sync::{Arc, Mutex},
    thread,
};

use crate::{
    client::CollectionClient,
    config::SnapshotOptions,
    error::{Error, ErrorKind, Result},
    manifest::{self, Manifest, ManifestDocument},
    partitioner,
    queue::ByteQueue,
    telemetry::Telemetry,
    writer::{self, Batch, SnapshotWriter},
};

/// What a completed (or dry-run) invocation reports back to the caller.
pub struct SnapshotOutcome {
    /// `None` only when `options.dry_run` was set.
    pub manifest: Option<ManifestDocument>,
}

/// Runs one snapshot to completion (or until the first fatal error),
/// honoring any existing manifest at `options.manifest_path()` for resume.
pub fn run(options: &SnapshotOptions, collection: Arc<dyn CollectionClient>) -> Result<SnapshotOutcome> {
    validate(options)?;

    let digest = manifest::query_digest(&options.query, options.projection.as_ref());
    let manifest = open_manifest(options, &digest)?;

    let plan = partitioner::plan(collection.as_ref(), &options.query, options.partitions)?;
    tracing::info!(partitions = plan.len(), "partition plan computed");

    if options.dry_run {
        tracing::info!("dry run: skipping read/write phase");
        return Ok(SnapshotOutcome { manifest: None });
    }

    let manifest = Arc::new(manifest);
    manifest.ensure_partitions(plan.len())?;

    if options.writer_threads > 1 {
        tracing::warn!(
            requested = options.writer_threads,
            "multiple writer threads requested, but the engine's rotation and \
             manifest ordering invariants require exactly one writer; using 1"
        );
    }

    let queue: Arc<ByteQueue<Batch>> = ByteQueue::new(options.queue_bytes);
    let telemetry = Telemetry::spawn(options.telemetry, options.on_progress.clone(), queue.clone());

    let resume_seq = manifest.snapshot().parts.len() as u64;
    let mut writer = writer::build(options, manifest.clone(), resume_seq)?;

    let writer_queue = queue.clone();
    let writer_handle: thread::JoinHandle<Result<()>> = thread::spawn(move || run_writer(&mut *writer, &writer_queue));

    let first_error: Arc<Mutex<Option<Error>>> = Arc::new(Mutex::new(None));
    thread::scope(|scope| {
        let mut handles = Vec::with_capacity(plan.len());
        for (index, range) in plan.into_iter().enumerate() {
            let collection = collection.clone();
            let manifest = manifest.clone();
            let queue = queue.clone();
            let first_error = first_error.clone();
            handles.push(scope.spawn(move || {
                if let Err(err) = crate::reader::run(index, range, collection.as_ref(), &queue, &manifest, options) {
                    tracing::warn!(partition = index, error = %err, "reader failed");
                    let mut slot = first_error.lock().unwrap();
                    if slot.is_none() {
                        *slot = Some(err);
                    }
                }
            }));
        }
        for handle in handles {
            let _ = handle.join();
        }
    });

    // All readers have finished (successfully or not): no more producers,
    // so the writer can drain and stop (spec §2 "Termination").
    queue.close();

    let writer_result = writer_handle.join().unwrap_or_else(|_| {
        Err(ErrorKind::Internal.with_message("writer thread panicked"))
    });

    telemetry.shutdown();

    if let Some(err) = Arc::try_unwrap(first_error).ok().and_then(|m| m.into_inner().unwrap()) {
        return Err(err);
    }
    writer_result?;

    Ok(SnapshotOutcome {
        manifest: Some(manifest.snapshot()),
    })
}

fn run_writer(writer: &mut dyn SnapshotWriter, queue: &ByteQueue<Batch>) -> Result<()> {
    while let Some(item) = queue.pop() {
        writer.write_many(item.payload)?;
    }
    writer.close()
}

fn validate(options: &SnapshotOptions) -> Result<()> {
    if options.partitions == 0 {
        return Err(ErrorKind::Configuration.with_message("partitions must be >= 1"));
    }
    if options.queue_bytes == 0 {
        return Err(ErrorKind::Configuration.with_message("queue_bytes must be > 0"));
    }
    if options.writer_threads == 0 {
        return Err(ErrorKind::Configuration.with_message("writer_threads must be >= 1"));
    }
    Ok(())
}

/// Loads an existing manifest if compatible, resets it if told to, or
/// creates a fresh one -- spec §7 "Incompatible resume".
fn open_manifest(options: &SnapshotOptions, digest: &str) -> Result<Manifest> {
    let path = options.manifest_path();
    let manifest_options = options.manifest_options();
    let now = bson::DateTime::now().try_to_rfc3339_string().unwrap_or_default();
    let compression = writer::effective_compression_for(options.format, options.compression);

    match Manifest::load(path.clone())? {
        Some(existing) => {
            if existing.compatible_with(&options.collection, options.format, compression, digest) {
                Ok(existing)
            } else if options.resume_overwrite_incompatible {
                tracing::warn!("existing manifest incompatible with this invocation, overwriting");
                existing.reset(
                    &options.collection,
                    options.format,
                    compression,
                    digest.to_string(),
                    manifest_options,
                    now,
                )?;
                Ok(existing)
            } else {
                Err(ErrorKind::IncompatibleResume.with_message(
                    "existing manifest's collection/format/compression/query_digest do not match this invocation",
                ))
            }
        }
        None => Ok(Manifest::create(
            path,
            &options.collection,
            options.format,
            compression,
            digest.to_string(),
            manifest_options,
            now,
        )),
    }
}
