//! Shared "open -> write -> rotate -> finalize" machinery used by every
//! format-specific writer (spec §4.4 "Common contract", "File naming",
//! "Rotation", "State machine").

use std::{
    fs::File,
    io::Write,
    path::PathBuf,
    sync::{Arc, Mutex},
};

use sha2::{Digest, Sha256};

use crate::{
    config::Compression,
    error::{ErrorKind, Result},
    manifest::Manifest,
    writer::compression::{self, CompressedWriter},
};

#[derive(Default)]
struct Accumulator {
    bytes: u64,
    hasher: Sha256,
}

/// A `Write` sink that counts and hashes every byte that reaches it -- the
/// raw, already-compressed output stream -- without the boxed
/// [`CompressedWriter`] above it needing to expose that bookkeeping.
struct CountingWriter {
    file: File,
    acc: Arc<Mutex<Accumulator>>,
}

impl Write for CountingWriter {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        let n = self.file.write(buf)?;
        let mut acc = self.acc.lock().unwrap();
        acc.bytes += n as u64;
        acc.hasher.update(&buf[..n]);
        Ok(n)
    }

    fn flush(&mut self) -> std::io::Result<()> {
        self.file.flush()
    }
}

struct OpenPart {
    manifest_index: usize,
    compressed: Box<dyn CompressedWriter>,
    acc: Arc<Mutex<Accumulator>>,
    last_reported_bytes: u64,
}

/// Drives part lifecycle for one writer. Not `Clone`/`Sync`: owned
/// exclusively by the single writer thread (spec §5, "The writer's file
/// and compressor: owned solely by the writer worker").
pub struct PartSink {
    output_dir: PathBuf,
    prefix: String,
    ext: &'static str,
    compression: Compression,
    level: i32,
    rotate_bytes: Option<u64>,
    single_file: bool,
    manifest: Arc<Manifest>,
    next_seq: u64,
    effective_compression: Option<Compression>,
    current: Option<OpenPart>,
    compute_checksum: bool,
}

impl PartSink {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        output_dir: PathBuf,
        prefix: String,
        ext: &'static str,
        compression: Compression,
        level: i32,
        rotate_bytes: Option<u64>,
        single_file: bool,
        manifest: Arc<Manifest>,
        resume_seq: u64,
        compute_checksum: bool,
    ) -> Self {
        Self {
            output_dir,
            prefix,
            ext,
            compression,
            level,
            rotate_bytes,
            single_file,
            manifest,
            next_seq: resume_seq,
            effective_compression: None,
            current: None,
            compute_checksum,
        }
    }

    /// The compression actually in effect (after any availability-driven
    /// downgrade). `None` until the first part is opened.
    pub fn effective_compression(&self) -> Option<Compression> {
        self.effective_compression
    }

    fn effective_compression_resolved(&mut self) -> Compression {
        *self
            .effective_compression
            .get_or_insert_with(|| compression::effective_compression(self.compression))
    }

    fn part_path(&self, effective: Compression, seq: u64) -> PathBuf {
        let ext_suffix = effective.extension();
        let name = if self.single_file {
            format!("{}.{}{}", self.prefix, self.ext, ext_suffix)
        } else {
            format!("{}-part-{:06}.{}{}", self.prefix, seq, self.ext, ext_suffix)
        };
        self.output_dir.join(name)
    }

    pub fn ensure_open(&mut self) -> Result<()> {
        if self.current.is_some() {
            return Ok(());
        }
        self.open_next()
    }

    fn open_next(&mut self) -> Result<()> {
        let effective = self.effective_compression_resolved();
        let seq = self.next_seq;
        let path = self.part_path(effective, seq);

        let file = File::create(&path).map_err(|e| ErrorKind::Writer.with_source(e))?;
        let acc = Arc::new(Mutex::new(Accumulator::default()));
        let sink: Box<dyn Write + Send> = Box::new(CountingWriter {
            file,
            acc: acc.clone(),
        });
        let compressed = compression::make_writer(effective, self.level, sink)?;

        let manifest_index = self.manifest.open_part(path)?;
        self.next_seq += 1;
        self.current = Some(OpenPart {
            manifest_index,
            compressed,
            acc,
            last_reported_bytes: 0,
        });
        Ok(())
    }

    /// Writes raw bytes to the currently open part and reports row
    /// progress to the manifest.
    pub fn write_raw(&mut self, bytes: &[u8], rows_delta: u64) -> Result<()> {
        self.ensure_open()?;
        let part = self.current.as_mut().expect("ensure_open just opened a part");
        part.compressed.write_all(bytes).map_err(|e| ErrorKind::Writer.with_source(e))?;
        self.report_progress(rows_delta)
    }

    fn report_progress(&mut self, rows_delta: u64) -> Result<()> {
        let part = self.current.as_mut().expect("part open");
        let current_bytes = part.acc.lock().unwrap().bytes;
        let bytes_delta = current_bytes.saturating_sub(part.last_reported_bytes);
        part.last_reported_bytes = current_bytes;
        self.manifest
            .add_progress_to_part(part.manifest_index, rows_delta, bytes_delta)
    }

    /// Current raw (compressed) byte size of the part being written, used
    /// by rotation decisions (spec §4.4 "Rotation").
    pub fn current_part_bytes(&self) -> u64 {
        self.current
            .as_ref()
            .map(|p| p.acc.lock().unwrap().bytes)
            .unwrap_or(0)
    }

    /// Rotates to a new part if not in single-file mode and the size
    /// threshold has been crossed.
    pub fn maybe_rotate(&mut self) -> Result<()> {
        if self.single_file || self.current.is_none() {
            return Ok(());
        }
        let Some(threshold) = self.rotate_bytes else {
            return Ok(());
        };
        if self.current_part_bytes() >= threshold {
            self.finalize_current()?;
        }
        Ok(())
    }

    /// Finalizes the currently open part: close the compressed stream
    /// (forcing codec trailers), close the raw file handle, then tell the
    /// manifest the part is complete (spec §4.4 "Rotation").
    pub fn finalize_current(&mut self) -> Result<()> {
        let Some(mut part) = self.current.take() else {
            return Ok(());
        };
        let mut raw = part.compressed.finish()?;
        raw.flush().map_err(|e| ErrorKind::Writer.with_source(e))?;
        drop(raw);

        let acc = part.acc.lock().unwrap();
        let bytes = acc.bytes;
        let checksum = if self.compute_checksum {
            Some(hex::encode(acc.hasher.clone().finalize()))
        } else {
            None
        };
        drop(acc);

        self.manifest.complete_part(part.manifest_index, bytes, checksum)
    }

    /// Finalizes the current part, if any. Idempotent.
    pub fn close(&mut self) -> Result<()> {
        self.finalize_current()
    }
}

/// Infers CSV/Parquet columns from a batch of documents: `_id` first if
/// present, then the union of remaining keys sorted lexicographically
/// (spec §4.4.2/§4.4.3, "Column inference").
pub fn infer_columns(documents: &[bson::Document]) -> Vec<String> {
    let mut columns = Vec::new();
    let mut seen = std::collections::BTreeSet::new();
    let has_id = documents.iter().any(|d| d.contains_key("_id"));
    if has_id {
        columns.push("_id".to_string());
        seen.insert("_id".to_string());
    }
    let mut rest = std::collections::BTreeSet::new();
    for doc in documents {
        for key in doc.keys() {
            if key != "_id" && !seen.contains(key) {
                rest.insert(key.clone());
            }
        }
    }
    columns.extend(rest);
    columns
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{Format, ManifestOptions};

    fn test_manifest(dir: &std::path::Path) -> Arc<Manifest> {
        let options = ManifestOptions {
            batch_size: 1000,
            rotate_bytes: None,
            single_file: false,
            parquet_row_group: 10_000,
            parquet_rotate_rows: None,
            write_chunk_bytes: 8 * 1024 * 1024,
            compression_level: 0,
        };
        Arc::new(Manifest::create(
            dir.join("snap.manifest.json"),
            "widgets",
            Format::Jsonl,
            Compression::None,
            "digest".to_string(),
            options,
            "2024-01-01T00:00:00Z".to_string(),
        ))
    }

    #[test]
    fn infer_columns_puts_id_first_then_lexicographic() {
        let docs = vec![bson::doc! { "b": 1, "_id": 1, "a": 2 }, bson::doc! { "_id": 2, "c": 3 }];
        assert_eq!(infer_columns(&docs), vec!["_id", "a", "b", "c"]);
    }

    #[test]
    fn infer_columns_without_id_is_just_lexicographic() {
        let docs = vec![bson::doc! { "z": 1, "a": 2 }];
        assert_eq!(infer_columns(&docs), vec!["a", "z"]);
    }

    #[test]
    fn rotates_to_a_new_part_once_the_threshold_is_crossed() {
        let dir = tempfile::tempdir().unwrap();
        let manifest = test_manifest(dir.path());
        let mut sink = PartSink::new(
            dir.path().to_path_buf(),
            "snap".to_string(),
            "jsonl",
            Compression::None,
            0,
            Some(16),
            false,
            manifest.clone(),
            0,
            false,
        );

        sink.write_raw(&[b'x'; 32], 1).unwrap();
        sink.maybe_rotate().unwrap();
        sink.write_raw(&[b'y'; 4], 1).unwrap();
        sink.close().unwrap();

        let parts = manifest.snapshot().parts;
        assert_eq!(parts.len(), 2);
        assert!(parts[0].complete);
        assert!(parts[1].complete);
        assert_eq!(parts[0].path.file_name().unwrap(), "snap-part-000000.jsonl");
        assert_eq!(parts[1].path.file_name().unwrap(), "snap-part-000001.jsonl");
    }
}
