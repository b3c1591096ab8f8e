//! Parquet writer (spec §4.4.3).
//!
//! Unlike JSONL/CSV, a Parquet file is self-contained binary framing with
//! its own footer -- it cannot be streamed through the generic
//! [`super::compression::CompressedWriter`] chain the way a byte stream
//! can, because compression here is an internal, per-column codec rather
//! than an outer wrapper around the whole file (spec §6: "compression
//! codec from effective compression where supported"). So this writer
//! manages its own file lifecycle directly against `arrow`/`parquet`,
//! reusing only the manifest/column-inference helpers from [`part_sink`].

use std::{
    fs::File,
    io::Write,
    path::PathBuf,
    sync::{Arc, Mutex},
};

use arrow::array::StringArray;
use arrow::datatypes::{DataType, Field, Schema};
use arrow::record_batch::RecordBatch;
use parquet::arrow::arrow_writer::ArrowWriter;
use parquet::file::properties::WriterProperties;

use super::part_sink::infer_columns;
use super::{parquet_codec, Batch, SnapshotWriter};
use crate::{
    config::Compression,
    document,
    error::{ErrorKind, Result},
    manifest::Manifest,
};

/// Counts bytes as they pass through to the underlying file, so rotation
/// decisions and manifest progress don't need to re-stat the file.
struct CountingFile {
    file: File,
    bytes: Arc<Mutex<u64>>,
}

impl Write for CountingFile {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        let n = self.file.write(buf)?;
        *self.bytes.lock().unwrap() += n as u64;
        Ok(n)
    }
    fn flush(&mut self) -> std::io::Result<()> {
        self.file.flush()
    }
}

struct OpenPart {
    manifest_index: usize,
    writer: ArrowWriter<CountingFile>,
    bytes: Arc<Mutex<u64>>,
    last_reported_bytes: u64,
    rows_in_part: u64,
}

/// Every column is written as a `Utf8` array: documents are heterogeneous
/// and the engine does not enforce a schema beyond the inferred column
/// union (spec §1 Non-goals), so the simplest faithful representation is
/// each value's canonical text form -- the same rendering the CSV writer
/// uses, which already normalizes ObjectId to its 24-character hex string.
pub struct ParquetWriter {
    output_dir: PathBuf,
    prefix: String,
    compression: Compression,
    rotate_bytes: Option<u64>,
    single_file: bool,
    manifest: Arc<Manifest>,
    next_seq: u64,
    row_group_size: usize,
    rotate_rows: Option<u64>,
    columns: Option<Vec<String>>,
    pending: Vec<bson::Document>,
    current: Option<OpenPart>,
}

impl ParquetWriter {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        output_dir: PathBuf,
        prefix: String,
        compression: Compression,
        rotate_bytes: Option<u64>,
        single_file: bool,
        manifest: Arc<Manifest>,
        resume_seq: u64,
        row_group_size: usize,
        rotate_rows: Option<u64>,
    ) -> Self {
        Self {
            output_dir,
            prefix,
            compression,
            rotate_bytes,
            single_file,
            manifest,
            next_seq: resume_seq,
            row_group_size,
            rotate_rows,
            columns: None,
            pending: Vec::new(),
            current: None,
        }
    }

    fn part_path(&self, seq: u64) -> PathBuf {
        // No `.zst`/`.gz` suffix: Parquet's compression is an internal,
        // per-column codec, not an outer stream wrapper (see module docs).
        let name = if self.single_file {
            format!("{}.parquet", self.prefix)
        } else {
            format!("{}-part-{:06}.parquet", self.prefix, seq)
        };
        self.output_dir.join(name)
    }

    fn schema(&self, columns: &[String]) -> Arc<Schema> {
        Arc::new(Schema::new(
            columns
                .iter()
                .map(|name| Field::new(name, DataType::Utf8, true))
                .collect::<Vec<_>>(),
        ))
    }

    fn ensure_open(&mut self) -> Result<()> {
        if self.current.is_some() {
            return Ok(());
        }
        let columns = self.columns.clone().unwrap_or_default();
        let seq = self.next_seq;
        let path = self.part_path(seq);

        let file = File::create(&path).map_err(|e| ErrorKind::Writer.with_source(e))?;
        let bytes = Arc::new(Mutex::new(0u64));
        let counting = CountingFile {
            file,
            bytes: bytes.clone(),
        };

        let props = WriterProperties::builder()
            .set_compression(parquet_codec(self.compression))
            .build();
        let schema = self.schema(&columns);
        let writer = ArrowWriter::try_new(counting, schema, Some(props))
            .map_err(|e| ErrorKind::Writer.with_source(e))?;

        let manifest_index = self.manifest.open_part(path)?;
        self.next_seq += 1;
        self.current = Some(OpenPart {
            manifest_index,
            writer,
            bytes,
            last_reported_bytes: 0,
            rows_in_part: 0,
        });
        Ok(())
    }

    fn report_progress(&mut self, rows_delta: u64) -> Result<()> {
        let part = self.current.as_mut().expect("part open");
        let current_bytes = *part.bytes.lock().unwrap();
        let bytes_delta = current_bytes.saturating_sub(part.last_reported_bytes);
        part.last_reported_bytes = current_bytes;
        self.manifest
            .add_progress_to_part(part.manifest_index, rows_delta, bytes_delta)
    }

    fn current_part_bytes(&self) -> u64 {
        self.current.as_ref().map(|p| *p.bytes.lock().unwrap()).unwrap_or(0)
    }

    fn current_part_rows(&self) -> u64 {
        self.current.as_ref().map(|p| p.rows_in_part).unwrap_or(0)
    }

    /// Finalizes the currently open part (closes the `ArrowWriter`,
    /// forcing its footer to be written), then tells the manifest.
    fn finalize_current(&mut self) -> Result<()> {
        let Some(part) = self.current.take() else {
            return Ok(());
        };
        part.writer.close().map_err(|e| ErrorKind::Writer.with_source(e))?;
        let bytes = *part.bytes.lock().unwrap();
        self.manifest.complete_part(part.manifest_index, bytes, None)
    }

    /// Writes one row group, splitting it if it would push the current
    /// part past `rotate_rows` (spec §4.4.3).
    fn write_row_group(&mut self, columns: &[String], documents: &[bson::Document]) -> Result<()> {
        let mut start = 0;
        while start < documents.len() {
            self.ensure_open()?;
            let room = self
                .rotate_rows
                .map(|cap| cap.saturating_sub(self.current_part_rows()) as usize)
                .unwrap_or(documents.len() - start);
            if room == 0 {
                self.finalize_current()?;
                continue;
            }
            let end = (start + room).min(documents.len());
            let chunk = &documents[start..end];

            let schema = self.schema(columns);
            let arrays = columns
                .iter()
                .map(|column| {
                    let values: Vec<Option<String>> = chunk
                        .iter()
                        .map(|doc| doc.get(column).map(document::bson_to_csv_field))
                        .collect();
                    Arc::new(StringArray::from(values)) as arrow::array::ArrayRef
                })
                .collect::<Vec<_>>();
            let batch = RecordBatch::try_new(schema, arrays).map_err(|e| ErrorKind::Writer.with_source(e))?;

            let part = self.current.as_mut().expect("ensure_open just opened a part");
            part.writer.write(&batch).map_err(|e| ErrorKind::Writer.with_source(e))?;
            part.rows_in_part += chunk.len() as u64;
            self.report_progress(chunk.len() as u64)?;

            start = end;

            if !self.single_file {
                if let Some(threshold) = self.rotate_bytes {
                    if self.current_part_bytes() >= threshold {
                        self.finalize_current()?;
                    }
                }
            }
        }
        Ok(())
    }

    fn flush_pending(&mut self) -> Result<()> {
        if self.pending.is_empty() {
            return Ok(());
        }
        if self.columns.is_none() {
            self.columns = Some(infer_columns(&self.pending));
        }
        let columns = self.columns.clone().unwrap_or_default();
        let documents = std::mem::take(&mut self.pending);
        for chunk in documents.chunks(self.row_group_size.max(1)) {
            self.write_row_group(&columns, chunk)?;
        }
        Ok(())
    }
}

impl SnapshotWriter for ParquetWriter {
    fn write_many(&mut self, batch: Batch) -> Result<()> {
        let Batch::Documents(documents) = batch else {
            return Err(ErrorKind::Internal.with_message("Parquet writer received a pre-serialized batch"));
        };
        self.pending.extend(documents);
        if self.pending.len() >= self.row_group_size {
            self.flush_pending()?;
        }
        Ok(())
    }

    fn close(&mut self) -> Result<()> {
        self.flush_pending()?;
        self.finalize_current()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ManifestOptions;
    use parquet::arrow::arrow_reader::ParquetRecordBatchReaderBuilder;

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
            crate::config::Format::Parquet,
            Compression::None,
            "digest".to_string(),
            options,
            "2024-01-01T00:00:00Z".to_string(),
        ))
    }

    fn read_back(path: &std::path::Path) -> Vec<RecordBatch> {
        let file = File::open(path).unwrap();
        let reader = ParquetRecordBatchReaderBuilder::try_new(file).unwrap().build().unwrap();
        reader.map(|b| b.unwrap()).collect()
    }

    #[test]
    fn round_trips_document_fields_as_utf8_columns() {
        let dir = tempfile::tempdir().unwrap();
        let manifest = test_manifest(dir.path());
        let mut writer = ParquetWriter::new(
            dir.path().to_path_buf(),
            "snap".to_string(),
            Compression::None,
            None,
            false,
            manifest,
            0,
            10_000,
            None,
        );

        let docs = vec![
            bson::doc! { "_id": bson::oid::ObjectId::from_bytes([1u8; 12]), "name": "alpha" },
            bson::doc! { "_id": bson::oid::ObjectId::from_bytes([2u8; 12]), "name": "beta" },
        ];
        writer.write_many(Batch::Documents(docs)).unwrap();
        writer.close().unwrap();

        let batches = read_back(&dir.path().join("snap-part-000000.parquet"));
        let total_rows: usize = batches.iter().map(|b| b.num_rows()).sum();
        assert_eq!(total_rows, 2);

        let schema = batches[0].schema();
        let names: Vec<&str> = schema.fields().iter().map(|f| f.name().as_str()).collect();
        assert_eq!(names, vec!["_id", "name"]);

        let name_col = batches[0].column(1).as_any().downcast_ref::<StringArray>().unwrap();
        assert_eq!(name_col.value(0), "alpha");
        assert_eq!(name_col.value(1), "beta");
    }

    #[test]
    fn rotate_rows_splits_output_into_multiple_parts() {
        let dir = tempfile::tempdir().unwrap();
        let manifest = test_manifest(dir.path());
        let mut writer = ParquetWriter::new(
            dir.path().to_path_buf(),
            "snap".to_string(),
            Compression::None,
            None,
            false,
            manifest.clone(),
            0,
            5,
            Some(5),
        );

        let docs: Vec<_> = (0..12u64).map(|i| bson::doc! { "_id": i as i64, "n": i as i64 }).collect();
        writer.write_many(Batch::Documents(docs)).unwrap();
        writer.close().unwrap();

        let parts = manifest.snapshot().parts;
        assert_eq!(parts.len(), 3);
        assert!(parts.iter().all(|p| p.complete));
        let total_rows: u64 = parts.iter().map(|p| p.rows).sum();
        assert_eq!(total_rows, 12);
    }
}
